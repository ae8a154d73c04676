use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_conflict, validate_span};
use super::lifecycle::{AppointmentOp, append_note, next_appointment_status};
use super::{Engine, EngineError, check_len};

/// Direct booking request.
#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub service_id: Ulid,
    pub customer_id: Ulid,
    pub resource_id: Option<Ulid>,
    pub start: Ms,
    pub notes: Option<String>,
}

/// Appointment visible to `actor`; customers only see their own.
pub(super) fn visible_appointment<'a>(
    ledger: &'a Ledger,
    id: Ulid,
    actor: Actor,
) -> Result<&'a Appointment, EngineError> {
    ledger
        .appointment(&id)
        .filter(|a| actor.can_see(a.customer_id))
        .ok_or(EngineError::not_found("appointment", id))
}

impl Engine {
    pub async fn book_appointment(&self, req: NewAppointment, now: Ms) -> Result<Appointment, EngineError> {
        check_len(req.notes.as_deref(), MAX_NOTES_LEN, "notes too long")?;
        let service = self.active_service(req.service_id).await?;
        let span = Span {
            start: req.start,
            end: req.start + Ms::from(service.occupied_minutes()) * MINUTE_MS,
        };
        validate_span(&span)?;

        let mut ledger = self.ledger.write().await;
        if ledger.appointment_count() >= MAX_APPOINTMENTS_PER_BUSINESS {
            return Err(EngineError::LimitExceeded("too many appointments for business"));
        }
        check_no_conflict(&ledger, req.resource_id, &span, None)?;

        let appointment = Appointment {
            id: Ulid::new(),
            business_id: self.business_id,
            service_id: service.id,
            customer_id: req.customer_id,
            resource_id: req.resource_id,
            span,
            status: AppointmentStatus::Scheduled,
            notes: req.notes.filter(|n| !n.trim().is_empty()),
            originating_action_id: None,
            replaces: None,
            created_at: now,
            updated_at: now,
        };
        self.persist_and_apply(
            &mut ledger,
            Event::AppointmentBooked {
                appointment: appointment.clone(),
            },
        )
        .await?;
        tracing::info!(
            business_id = %self.business_id,
            appointment_id = %appointment.id,
            start = appointment.span.start,
            "appointment booked"
        );
        Ok(appointment)
    }

    pub async fn confirm_appointment(&self, id: Ulid, actor: Actor, now: Ms) -> Result<Appointment, EngineError> {
        self.transition(id, actor, AppointmentOp::Confirm, None, now).await
    }

    /// Completion notes are prefixed to any existing notes.
    pub async fn complete_appointment(
        &self,
        id: Ulid,
        actor: Actor,
        notes: Option<String>,
        now: Ms,
    ) -> Result<Appointment, EngineError> {
        self.transition(id, actor, AppointmentOp::Complete, notes, now).await
    }

    pub async fn mark_no_show(
        &self,
        id: Ulid,
        actor: Actor,
        notes: Option<String>,
        now: Ms,
    ) -> Result<Appointment, EngineError> {
        self.transition(id, actor, AppointmentOp::NoShow, notes, now).await
    }

    pub async fn cancel_appointment(
        &self,
        id: Ulid,
        actor: Actor,
        reason: Option<String>,
        now: Ms,
    ) -> Result<Appointment, EngineError> {
        self.transition(id, actor, AppointmentOp::Cancel, reason, now).await
    }

    async fn transition(
        &self,
        id: Ulid,
        actor: Actor,
        op: AppointmentOp,
        note: Option<String>,
        now: Ms,
    ) -> Result<Appointment, EngineError> {
        let mut ledger = self.ledger.write().await;
        let current = visible_appointment(&ledger, id, actor)?;
        let status = next_appointment_status(current.status, op)?;
        let notes = append_note(current.notes.as_deref(), op.note_label(), note.as_deref());
        check_len(notes.as_deref(), MAX_NOTES_LEN, "notes too long")?;

        self.persist_and_apply(
            &mut ledger,
            Event::AppointmentStatusChanged {
                id,
                status,
                notes,
                at: now,
            },
        )
        .await?;
        tracing::info!(
            business_id = %self.business_id,
            appointment_id = %id,
            status = status.as_str(),
            "appointment transitioned"
        );
        visible_appointment(&ledger, id, actor).cloned()
    }

    /// Atomically retire `id` and book its replacement at `new_start`.
    ///
    /// The replacement keeps the original length, customer, service and
    /// resource. It is `confirmed` when the business moves the appointment and
    /// `scheduled` when the customer does, pending the business's approval.
    pub async fn reschedule_appointment(
        &self,
        id: Ulid,
        actor: Actor,
        new_start: Ms,
        reason: Option<String>,
        now: Ms,
    ) -> Result<Appointment, EngineError> {
        check_len(reason.as_deref(), MAX_REASON_LEN, "reason too long")?;
        let mut ledger = self.ledger.write().await;
        let old = visible_appointment(&ledger, id, actor)?;
        next_appointment_status(old.status, AppointmentOp::Reschedule)?;

        let span = Span {
            start: new_start,
            end: new_start + old.span.duration_ms(),
        };
        validate_span(&span)?;
        check_no_conflict(&ledger, old.resource_id, &span, Some(id))?;

        let notes = append_note(old.notes.as_deref(), AppointmentOp::Reschedule.note_label(), reason.as_deref());
        check_len(notes.as_deref(), MAX_NOTES_LEN, "notes too long")?;
        let status = match actor {
            Actor::Business => AppointmentStatus::Confirmed,
            Actor::Customer(_) => AppointmentStatus::Scheduled,
        };
        let replacement = Appointment {
            id: Ulid::new(),
            span,
            status,
            notes: None,
            replaces: Some(id),
            created_at: now,
            updated_at: now,
            ..old.clone()
        };

        self.persist_and_apply(
            &mut ledger,
            Event::AppointmentRescheduled {
                old_id: id,
                notes,
                replacement: replacement.clone(),
                at: now,
            },
        )
        .await?;
        tracing::info!(
            business_id = %self.business_id,
            appointment_id = %id,
            replacement_id = %replacement.id,
            "appointment rescheduled"
        );
        Ok(replacement)
    }
}
