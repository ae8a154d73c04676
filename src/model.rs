use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only instant type inside the engine.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Touching endpoints do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && self.end > other.start
    }

    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Who is calling. Resolved per request, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Business,
    Customer(Ulid),
}

impl Actor {
    pub fn can_see(&self, customer_id: Ulid) -> bool {
        match self {
            Actor::Business => true,
            Actor::Customer(id) => *id == customer_id,
        }
    }
}

// ── Appointments ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
    Rescheduled,
}

impl AppointmentStatus {
    /// Only active appointments occupy time.
    pub fn is_active(self) -> bool {
        matches!(self, AppointmentStatus::Scheduled | AppointmentStatus::Confirmed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::NoShow => "no_show",
            AppointmentStatus::Rescheduled => "rescheduled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub business_id: Ulid,
    pub service_id: Ulid,
    pub customer_id: Ulid,
    pub resource_id: Option<Ulid>,
    /// Work time plus buffer.
    pub span: Span,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub originating_action_id: Option<Ulid>,
    /// The appointment this one superseded through a reschedule.
    pub replaces: Option<Ulid>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

// ── Board actions ────────────────────────────────────────────────

/// One offered appointment time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub start: Ms,
    pub platform: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationStatus {
    PendingCustomer,
    Confirmed,
    Rejected,
    Rescheduled,
    Cancelled,
}

impl ConfirmationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfirmationStatus::PendingCustomer => "pending_customer",
            ConfirmationStatus::Confirmed => "confirmed",
            ConfirmationStatus::Rejected => "rejected",
            ConfirmationStatus::Rescheduled => "rescheduled",
            ConfirmationStatus::Cancelled => "cancelled",
        }
    }
}

/// Confirmation state of an offer. The appointment id only exists in
/// `Confirmed`, so "appointment_id set iff confirmed" holds by construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Confirmation {
    PendingCustomer,
    Confirmed { appointment_id: Ulid, accepted: Proposal },
    Rejected { reason: Option<String> },
    Rescheduled { reason: Option<String> },
    Cancelled { reason: Option<String> },
}

impl Confirmation {
    pub fn status(&self) -> ConfirmationStatus {
        match self {
            Confirmation::PendingCustomer => ConfirmationStatus::PendingCustomer,
            Confirmation::Confirmed { .. } => ConfirmationStatus::Confirmed,
            Confirmation::Rejected { .. } => ConfirmationStatus::Rejected,
            Confirmation::Rescheduled { .. } => ConfirmationStatus::Rescheduled,
            Confirmation::Cancelled { .. } => ConfirmationStatus::Cancelled,
        }
    }

    pub fn appointment_id(&self) -> Option<Ulid> {
        match self {
            Confirmation::Confirmed { appointment_id, .. } => Some(*appointment_id),
            _ => None,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Confirmation::Rejected { reason }
            | Confirmation::Rescheduled { reason }
            | Confirmation::Cancelled { reason } => reason.as_deref(),
            Confirmation::PendingCustomer | Confirmation::Confirmed { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulingDetails {
    pub service_id: Ulid,
    pub resource_id: Option<Ulid>,
    pub proposals: Vec<Proposal>,
    pub confirmation: Confirmation,
}

/// Payload of a board action, one variant per action kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionDetails {
    AppointmentScheduling(SchedulingDetails),
    FollowUp { note: String },
}

impl ActionDetails {
    pub fn kind(&self) -> &'static str {
        match self {
            ActionDetails::AppointmentScheduling(_) => "appointment_scheduling",
            ActionDetails::FollowUp { .. } => "follow_up",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub id: Ulid,
    pub board_id: Ulid,
    pub business_id: Ulid,
    pub customer_id: Ulid,
    pub status: ActionStatus,
    pub details: ActionDetails,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Action {
    pub fn scheduling(&self) -> Option<&SchedulingDetails> {
        match &self.details {
            ActionDetails::AppointmentScheduling(d) => Some(d),
            ActionDetails::FollowUp { .. } => None,
        }
    }
}

/// Status change carried along with an action transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentChange {
    pub id: Ulid,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
}

/// The WAL record format. Each record is one complete transition, so
/// multi-entity changes are never half-persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    AppointmentBooked {
        appointment: Appointment,
    },
    AppointmentStatusChanged {
        id: Ulid,
        status: AppointmentStatus,
        notes: Option<String>,
        at: Ms,
    },
    AppointmentRescheduled {
        old_id: Ulid,
        notes: Option<String>,
        replacement: Appointment,
        at: Ms,
    },
    ActionRecorded {
        action: Action,
    },
    ActionConfirmed {
        action_id: Ulid,
        accepted: Proposal,
        appointment: Appointment,
        at: Ms,
    },
    ActionRejected {
        action_id: Ulid,
        reason: Option<String>,
        at: Ms,
    },
    ActionRescheduleRequested {
        action_id: Ulid,
        reason: Option<String>,
        appointment: Option<AppointmentChange>,
        at: Ms,
    },
    ActionCancelled {
        action_id: Ulid,
        reason: Option<String>,
        appointment: Option<AppointmentChange>,
        at: Ms,
    },
}

// ── Ledger ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveBooking {
    pub id: Ulid,
    pub resource_id: Option<Ulid>,
    pub span: Span,
}

/// All appointments and actions of one business.
#[derive(Debug, Clone)]
pub struct Ledger {
    pub business_id: Ulid,
    appointments: HashMap<Ulid, Appointment>,
    actions: HashMap<Ulid, Action>,
    /// Active (scheduled/confirmed) appointments, sorted by `span.start`.
    active: Vec<ActiveBooking>,
}

impl Ledger {
    pub fn new(business_id: Ulid) -> Self {
        Self {
            business_id,
            appointments: HashMap::new(),
            actions: HashMap::new(),
            active: Vec::new(),
        }
    }

    pub fn appointment(&self, id: &Ulid) -> Option<&Appointment> {
        self.appointments.get(id)
    }

    pub fn appointments(&self) -> impl Iterator<Item = &Appointment> {
        self.appointments.values()
    }

    pub fn appointment_count(&self) -> usize {
        self.appointments.len()
    }

    /// The active appointment booked from an action. Reschedules carry the
    /// action link to the replacement, so this follows them.
    pub fn active_from_action(&self, action_id: &Ulid) -> Option<&Appointment> {
        self.active
            .iter()
            .filter_map(|b| self.appointments.get(&b.id))
            .find(|a| a.originating_action_id == Some(*action_id))
    }

    pub fn action(&self, id: &Ulid) -> Option<&Action> {
        self.actions.get(id)
    }

    pub fn actions(&self) -> impl Iterator<Item = &Action> {
        self.actions.values()
    }

    pub fn action_count(&self) -> usize {
        self.actions.len()
    }

    /// Active bookings whose span overlaps the query window.
    /// Uses binary search to skip bookings starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &ActiveBooking> {
        let right_bound = self.active.partition_point(|b| b.span.start < query.end);
        self.active[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }

    fn index_active(&mut self, appointment: &Appointment) {
        let entry = ActiveBooking {
            id: appointment.id,
            resource_id: appointment.resource_id,
            span: appointment.span,
        };
        let pos = self
            .active
            .binary_search_by_key(&entry.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.active.insert(pos, entry);
    }

    fn unindex_active(&mut self, id: &Ulid) {
        if let Some(pos) = self.active.iter().position(|b| b.id == *id) {
            self.active.remove(pos);
        }
    }

    fn put_appointment(&mut self, appointment: Appointment) {
        self.unindex_active(&appointment.id);
        if appointment.status.is_active() {
            self.index_active(&appointment);
        }
        self.appointments.insert(appointment.id, appointment);
    }

    fn set_appointment_status(
        &mut self,
        id: &Ulid,
        status: AppointmentStatus,
        notes: Option<String>,
        at: Ms,
    ) {
        let Some(appt) = self.appointments.get_mut(id) else {
            return;
        };
        appt.status = status;
        appt.notes = notes;
        appt.updated_at = at;
        if !status.is_active() {
            self.unindex_active(id);
        }
    }

    fn set_confirmation(&mut self, action_id: &Ulid, confirmation: Confirmation, status: ActionStatus, at: Ms) {
        let Some(action) = self.actions.get_mut(action_id) else {
            return;
        };
        if let ActionDetails::AppointmentScheduling(details) = &mut action.details {
            details.confirmation = confirmation;
        }
        action.status = status;
        action.updated_at = at;
    }

    /// Apply a committed event. Events are validated before they are
    /// written, so application never fails.
    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::AppointmentBooked { appointment } => {
                self.put_appointment(appointment.clone());
            }
            Event::AppointmentStatusChanged { id, status, notes, at } => {
                self.set_appointment_status(id, *status, notes.clone(), *at);
            }
            Event::AppointmentRescheduled {
                old_id,
                notes,
                replacement,
                at,
            } => {
                self.set_appointment_status(old_id, AppointmentStatus::Rescheduled, notes.clone(), *at);
                self.put_appointment(replacement.clone());
            }
            Event::ActionRecorded { action } => {
                self.actions.insert(action.id, action.clone());
            }
            Event::ActionConfirmed {
                action_id,
                accepted,
                appointment,
                at,
            } => {
                let confirmation = Confirmation::Confirmed {
                    appointment_id: appointment.id,
                    accepted: accepted.clone(),
                };
                self.set_confirmation(action_id, confirmation, ActionStatus::Completed, *at);
                self.put_appointment(appointment.clone());
            }
            Event::ActionRejected { action_id, reason, at } => {
                let confirmation = Confirmation::Rejected { reason: reason.clone() };
                self.set_confirmation(action_id, confirmation, ActionStatus::Cancelled, *at);
            }
            Event::ActionRescheduleRequested {
                action_id,
                reason,
                appointment,
                at,
            } => {
                let confirmation = Confirmation::Rescheduled { reason: reason.clone() };
                self.set_confirmation(action_id, confirmation, ActionStatus::Pending, *at);
                if let Some(change) = appointment {
                    self.set_appointment_status(&change.id, change.status, change.notes.clone(), *at);
                }
            }
            Event::ActionCancelled {
                action_id,
                reason,
                appointment,
                at,
            } => {
                let confirmation = Confirmation::Cancelled { reason: reason.clone() };
                self.set_confirmation(action_id, confirmation, ActionStatus::Cancelled, *at);
                if let Some(change) = appointment {
                    self.set_appointment_status(&change.id, change.status, change.notes.clone(), *at);
                }
            }
        }
    }
}
