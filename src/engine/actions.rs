use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_conflict, validate_span};
use super::lifecycle::{ActionOp, AppointmentOp, append_note, next_appointment_status, next_confirmation_status};
use super::{Engine, EngineError, check_len};

/// A board action to record.
#[derive(Debug, Clone)]
pub enum NewAction {
    AppointmentScheduling {
        board_id: Ulid,
        customer_id: Ulid,
        service_id: Ulid,
        resource_id: Option<Ulid>,
        proposals: Vec<Proposal>,
    },
    FollowUp {
        board_id: Ulid,
        customer_id: Ulid,
        note: String,
    },
}

/// The customer's answer to an offer. `start` picks one of the proposed
/// times and may be omitted when only one was proposed; `platform`
/// overrides the proposed one.
#[derive(Debug, Clone, Default)]
pub struct ActionAcceptance {
    pub start: Option<Ms>,
    pub platform: Option<String>,
}

pub(super) fn visible_action<'a>(ledger: &'a Ledger, id: Ulid, actor: Actor) -> Result<&'a Action, EngineError> {
    ledger
        .action(&id)
        .filter(|a| actor.can_see(a.customer_id))
        .ok_or(EngineError::not_found("action", id))
}

fn scheduling(action: &Action) -> Result<&SchedulingDetails, EngineError> {
    action.scheduling().ok_or_else(|| {
        EngineError::Validation(format!(
            "action {} is a {} action, not appointment_scheduling",
            action.id,
            action.details.kind()
        ))
    })
}

fn pick_proposal(proposals: &[Proposal], start: Option<Ms>) -> Result<Proposal, EngineError> {
    match (start, proposals) {
        (Some(start), _) => proposals
            .iter()
            .find(|p| p.start == start)
            .cloned()
            .ok_or_else(|| EngineError::Validation("datetime is not one of the proposed times".into())),
        (None, [only]) => Ok(only.clone()),
        (None, _) => Err(EngineError::Validation(
            "datetime is required when several times were proposed".into(),
        )),
    }
}

#[derive(Debug, Clone, Copy)]
enum Closing {
    Reschedule,
    Cancel,
}

impl Closing {
    fn action_op(self) -> ActionOp {
        match self {
            Closing::Reschedule => ActionOp::RequestReschedule,
            Closing::Cancel => ActionOp::Cancel,
        }
    }

    fn appointment_op(self) -> AppointmentOp {
        match self {
            Closing::Reschedule => AppointmentOp::Reschedule,
            Closing::Cancel => AppointmentOp::Cancel,
        }
    }
}

/// Status change for the live appointment descended from an action, if
/// any. Closed appointments are left as they are.
fn linked_change(
    ledger: &Ledger,
    action_id: Ulid,
    op: AppointmentOp,
    reason: Option<&str>,
) -> Option<AppointmentChange> {
    let appt = ledger.active_from_action(&action_id)?;
    let status = next_appointment_status(appt.status, op).ok()?;
    Some(AppointmentChange {
        id: appt.id,
        status,
        notes: append_note(appt.notes.as_deref(), op.note_label(), reason),
    })
}

impl Engine {
    pub async fn record_action(&self, new: NewAction, now: Ms) -> Result<Action, EngineError> {
        let (board_id, customer_id, details) = match new {
            NewAction::AppointmentScheduling {
                board_id,
                customer_id,
                service_id,
                resource_id,
                proposals,
            } => {
                if proposals.is_empty() {
                    return Err(EngineError::Validation("at least one proposed time is required".into()));
                }
                if proposals.len() > MAX_PROPOSALS_PER_ACTION {
                    return Err(EngineError::LimitExceeded("too many proposed times"));
                }
                for p in &proposals {
                    check_len(p.platform.as_deref(), MAX_PLATFORM_LEN, "platform too long")?;
                    check_len(p.location.as_deref(), MAX_PLATFORM_LEN, "location too long")?;
                }
                let service = self.active_service(service_id).await?;
                let length = Ms::from(service.occupied_minutes()) * MINUTE_MS;
                for p in &proposals {
                    validate_span(&Span {
                        start: p.start,
                        end: p.start + length,
                    })?;
                }
                let details = ActionDetails::AppointmentScheduling(SchedulingDetails {
                    service_id,
                    resource_id,
                    proposals,
                    confirmation: Confirmation::PendingCustomer,
                });
                (board_id, customer_id, details)
            }
            NewAction::FollowUp {
                board_id,
                customer_id,
                note,
            } => {
                check_len(Some(&note), MAX_NOTES_LEN, "note too long")?;
                (board_id, customer_id, ActionDetails::FollowUp { note })
            }
        };

        let mut ledger = self.ledger.write().await;
        if ledger.action_count() >= MAX_ACTIONS_PER_BUSINESS {
            return Err(EngineError::LimitExceeded("too many actions for business"));
        }
        let action = Action {
            id: Ulid::new(),
            board_id,
            business_id: self.business_id,
            customer_id,
            status: ActionStatus::Pending,
            details,
            created_at: now,
            updated_at: now,
        };
        self.persist_and_apply(&mut ledger, Event::ActionRecorded { action: action.clone() })
            .await?;
        Ok(action)
    }

    /// Accept an offer: book the chosen time and mark the action confirmed
    /// in one step. On conflict nothing changes and the offer stays pending.
    pub async fn confirm_action(
        &self,
        action_id: Ulid,
        actor: Actor,
        acceptance: ActionAcceptance,
        now: Ms,
    ) -> Result<(Action, Appointment), EngineError> {
        check_len(acceptance.platform.as_deref(), MAX_PLATFORM_LEN, "platform too long")?;
        let mut ledger = self.ledger.write().await;
        let action = visible_action(&ledger, action_id, actor)?;
        let customer_id = action.customer_id;
        let details = scheduling(action)?.clone();
        next_confirmation_status(details.confirmation.status(), ActionOp::Confirm)?;

        let mut accepted = pick_proposal(&details.proposals, acceptance.start)?;
        if let Some(platform) = acceptance.platform.filter(|p| !p.trim().is_empty()) {
            accepted.platform = Some(platform);
        }

        let service = self.active_service(details.service_id).await?;
        let span = Span {
            start: accepted.start,
            end: accepted.start + Ms::from(service.occupied_minutes()) * MINUTE_MS,
        };
        validate_span(&span)?;
        if ledger.appointment_count() >= MAX_APPOINTMENTS_PER_BUSINESS {
            return Err(EngineError::LimitExceeded("too many appointments for business"));
        }
        check_no_conflict(&ledger, details.resource_id, &span, None)?;

        let appointment = Appointment {
            id: Ulid::new(),
            business_id: self.business_id,
            service_id: service.id,
            customer_id,
            resource_id: details.resource_id,
            span,
            status: AppointmentStatus::Scheduled,
            notes: None,
            originating_action_id: Some(action_id),
            replaces: None,
            created_at: now,
            updated_at: now,
        };
        self.persist_and_apply(
            &mut ledger,
            Event::ActionConfirmed {
                action_id,
                accepted,
                appointment: appointment.clone(),
                at: now,
            },
        )
        .await?;
        tracing::info!(
            business_id = %self.business_id,
            action_id = %action_id,
            appointment_id = %appointment.id,
            "action confirmed"
        );
        let action = visible_action(&ledger, action_id, actor)?.clone();
        Ok((action, appointment))
    }

    pub async fn reject_action(
        &self,
        action_id: Ulid,
        actor: Actor,
        reason: Option<String>,
        now: Ms,
    ) -> Result<Action, EngineError> {
        check_len(reason.as_deref(), MAX_REASON_LEN, "reason too long")?;
        let mut ledger = self.ledger.write().await;
        let action = visible_action(&ledger, action_id, actor)?;
        next_confirmation_status(scheduling(action)?.confirmation.status(), ActionOp::Reject)?;

        self.persist_and_apply(
            &mut ledger,
            Event::ActionRejected {
                action_id,
                reason: reason.filter(|r| !r.trim().is_empty()),
                at: now,
            },
        )
        .await?;
        visible_action(&ledger, action_id, actor).cloned()
    }

    /// Ask for new options. Any confirmed datetime is dropped and the
    /// appointment booked from it, if still active, becomes `rescheduled`
    /// with the reason as its note.
    pub async fn request_action_reschedule(
        &self,
        action_id: Ulid,
        actor: Actor,
        reason: Option<String>,
        now: Ms,
    ) -> Result<(Action, Option<Appointment>), EngineError> {
        self.close_action(action_id, actor, Closing::Reschedule, reason, now)
            .await
    }

    /// Withdraw the offer. An appointment booked from it, if still active,
    /// is cancelled.
    pub async fn cancel_action(
        &self,
        action_id: Ulid,
        actor: Actor,
        reason: Option<String>,
        now: Ms,
    ) -> Result<(Action, Option<Appointment>), EngineError> {
        self.close_action(action_id, actor, Closing::Cancel, reason, now).await
    }

    async fn close_action(
        &self,
        action_id: Ulid,
        actor: Actor,
        closing: Closing,
        reason: Option<String>,
        now: Ms,
    ) -> Result<(Action, Option<Appointment>), EngineError> {
        check_len(reason.as_deref(), MAX_REASON_LEN, "reason too long")?;
        let reason = reason.filter(|r| !r.trim().is_empty());
        let mut ledger = self.ledger.write().await;
        let action = visible_action(&ledger, action_id, actor)?;
        let confirmation = &scheduling(action)?.confirmation;
        next_confirmation_status(confirmation.status(), closing.action_op())?;

        let change = linked_change(&ledger, action_id, closing.appointment_op(), reason.as_deref());
        let linked = change.as_ref().map(|c| c.id);
        let event = match closing {
            Closing::Reschedule => Event::ActionRescheduleRequested {
                action_id,
                reason,
                appointment: change,
                at: now,
            },
            Closing::Cancel => Event::ActionCancelled {
                action_id,
                reason,
                appointment: change,
                at: now,
            },
        };

        self.persist_and_apply(&mut ledger, event).await?;
        tracing::info!(
            business_id = %self.business_id,
            action_id = %action_id,
            op = closing.action_op().as_str(),
            linked_appointment = ?linked,
            "action closed"
        );
        let action = visible_action(&ledger, action_id, actor)?.clone();
        let appointment = linked.and_then(|id| ledger.appointment(&id).cloned());
        Ok((action, appointment))
    }
}
