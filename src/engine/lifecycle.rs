use crate::model::{AppointmentStatus, ConfirmationStatus};

use super::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppointmentOp {
    Confirm,
    Complete,
    NoShow,
    Cancel,
    Reschedule,
}

impl AppointmentOp {
    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentOp::Confirm => "confirm",
            AppointmentOp::Complete => "complete",
            AppointmentOp::NoShow => "mark no-show",
            AppointmentOp::Cancel => "cancel",
            AppointmentOp::Reschedule => "reschedule",
        }
    }

    /// Divider label used when this operation appends to the notes.
    pub fn note_label(self) -> &'static str {
        match self {
            AppointmentOp::Confirm => "Confirmation notes",
            AppointmentOp::Complete => "Completion notes",
            AppointmentOp::NoShow => "No-show notes",
            AppointmentOp::Cancel => "Cancellation reason",
            AppointmentOp::Reschedule => "Reschedule reason",
        }
    }
}

pub fn next_appointment_status(
    from: AppointmentStatus,
    op: AppointmentOp,
) -> Result<AppointmentStatus, EngineError> {
    use AppointmentStatus::*;
    match (from, op) {
        (Scheduled, AppointmentOp::Confirm) => Ok(Confirmed),
        (Scheduled | Confirmed, AppointmentOp::Complete) => Ok(Completed),
        (Scheduled | Confirmed, AppointmentOp::NoShow) => Ok(NoShow),
        (Scheduled | Confirmed, AppointmentOp::Cancel) => Ok(Cancelled),
        (Scheduled | Confirmed, AppointmentOp::Reschedule) => Ok(Rescheduled),
        (from, op) => Err(EngineError::InvalidTransition {
            entity: "appointment",
            from: from.as_str(),
            op: op.as_str(),
        }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOp {
    Confirm,
    Reject,
    RequestReschedule,
    Cancel,
}

impl ActionOp {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionOp::Confirm => "confirm",
            ActionOp::Reject => "reject",
            ActionOp::RequestReschedule => "request reschedule of",
            ActionOp::Cancel => "cancel",
        }
    }
}

/// Confirm and reject only answer a pending offer. A reschedule request
/// and a cancel are taken from any state except their own outcome.
pub fn next_confirmation_status(
    from: ConfirmationStatus,
    op: ActionOp,
) -> Result<ConfirmationStatus, EngineError> {
    use ConfirmationStatus::*;
    match (from, op) {
        (PendingCustomer, ActionOp::Confirm) => Ok(Confirmed),
        (PendingCustomer, ActionOp::Reject) => Ok(Rejected),
        (PendingCustomer | Confirmed | Rejected | Cancelled, ActionOp::RequestReschedule) => Ok(Rescheduled),
        (PendingCustomer | Confirmed | Rejected | Rescheduled, ActionOp::Cancel) => Ok(Cancelled),
        (from, op) => Err(EngineError::InvalidTransition {
            entity: "action",
            from: from.as_str(),
            op: op.as_str(),
        }),
    }
}

/// Prefix a labeled note before any existing history. Blank notes leave
/// the history untouched.
pub fn append_note(existing: Option<&str>, label: &str, note: Option<&str>) -> Option<String> {
    let note = note.map(str::trim).filter(|n| !n.is_empty());
    match (note, existing) {
        (None, existing) => existing.map(str::to_owned),
        (Some(note), None) => Some(format!("{label}: {note}")),
        (Some(note), Some(previous)) => {
            Some(format!("{label}: {note}\n\n--- Previous notes ---\n{previous}"))
        }
    }
}
