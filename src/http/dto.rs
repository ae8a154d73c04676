//! Request bodies, response views and the wall-clock parsing between them.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::{NewAction, local_to_ms};
use crate::model::*;

use super::error::ApiError;

// ── Parsing ──────────────────────────────────────────────────────

pub fn parse_ulid(field: &str, raw: &str) -> Result<Ulid, ApiError> {
    Ulid::from_string(raw.trim()).map_err(|_| ApiError::BadRequest(format!("{field} is not a valid id")))
}

/// Required query/body field.
pub fn required<'a>(field: &str, value: &'a Option<String>) -> Result<&'a str, ApiError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::BadRequest(format!("{field} is required")))
}

/// `YYYY-MM-DD`
pub fn parse_date(field: &str, raw: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| ApiError::BadRequest(format!("{field} must be YYYY-MM-DD")))
}

/// `HH:MM`, seconds tolerated.
pub fn parse_time(field: &str, raw: &str) -> Result<NaiveTime, ApiError> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .map_err(|_| ApiError::BadRequest(format!("{field} must be HH:MM")))
}

/// A business-local wall-clock time as an instant.
pub fn local_instant(tz: Tz, local: NaiveDateTime) -> Result<Ms, ApiError> {
    local_to_ms(tz, local).ok_or_else(|| {
        ApiError::BadRequest(format!("{local} does not exist in {} (clock change)", tz.name()))
    })
}

/// RFC 3339 with an offset, or a naive `YYYY-MM-DDTHH:MM[:SS]` read in the
/// business's timezone.
pub fn parse_datetime(field: &str, tz: Tz, raw: &str) -> Result<Ms, ApiError> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.timestamp_millis());
    }
    let naive = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .ok_or_else(|| ApiError::BadRequest(format!("{field} must be an ISO 8601 date-time")))?;
    local_instant(tz, naive)
}

/// RFC 3339 in the business's timezone.
pub fn format_instant(tz: Tz, ms: Ms) -> String {
    match tz.timestamp_millis_opt(ms).single() {
        Some(dt) => dt.to_rfc3339(),
        None => DateTime::<Utc>::from_timestamp_millis(ms)
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| ms.to_string()),
    }
}

/// Treat an absent or empty body as `T::default()`.
pub fn optional_body<T>(bytes: &[u8]) -> Result<T, ApiError>
where
    T: for<'de> Deserialize<'de> + Default,
{
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(bytes).map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {e}")))
}

// ── Requests ─────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct SlotsQuery {
    pub business_id: Option<String>,
    pub service_id: Option<String>,
    pub date: Option<String>,
    pub resource_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BookRequest {
    pub service_id: Ulid,
    /// Defaults to the calling customer.
    pub customer_id: Option<Ulid>,
    pub resource_id: Option<Ulid>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<AppointmentStatus>,
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RescheduleRequest {
    pub new_date: Option<String>,
    pub new_time: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CompleteRequest {
    pub completion_notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct NoShowRequest {
    pub no_show_notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

/// Body of the action-based confirm/reject/reschedule/cancel endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct ActionCommand {
    pub action_id: Option<String>,
    pub datetime: Option<String>,
    pub platform: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProposalRequest {
    pub datetime: String,
    pub platform: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordActionRequest {
    AppointmentScheduling {
        board_id: Ulid,
        customer_id: Ulid,
        service_id: Ulid,
        resource_id: Option<Ulid>,
        proposals: Vec<ProposalRequest>,
    },
    FollowUp {
        board_id: Ulid,
        customer_id: Ulid,
        note: String,
    },
}

impl RecordActionRequest {
    pub fn into_new_action(self, tz: Tz) -> Result<NewAction, ApiError> {
        Ok(match self {
            RecordActionRequest::AppointmentScheduling {
                board_id,
                customer_id,
                service_id,
                resource_id,
                proposals,
            } => NewAction::AppointmentScheduling {
                board_id,
                customer_id,
                service_id,
                resource_id,
                proposals: proposals
                    .into_iter()
                    .map(|p| {
                        Ok(Proposal {
                            start: parse_datetime("proposals.datetime", tz, &p.datetime)?,
                            platform: p.platform,
                            location: p.location,
                        })
                    })
                    .collect::<Result<_, ApiError>>()?,
            },
            RecordActionRequest::FollowUp {
                board_id,
                customer_id,
                note,
            } => NewAction::FollowUp {
                board_id,
                customer_id,
                note,
            },
        })
    }
}

// ── Views ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct AppointmentView {
    pub id: Ulid,
    pub business_id: Ulid,
    pub service_id: Ulid,
    pub customer_id: Ulid,
    pub resource_id: Option<Ulid>,
    pub start_time: String,
    pub end_time: String,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub originating_action_id: Option<Ulid>,
    pub replaces: Option<Ulid>,
    pub created_at: String,
    pub updated_at: String,
}

impl AppointmentView {
    pub fn new(appt: &Appointment, tz: Tz) -> Self {
        Self {
            id: appt.id,
            business_id: appt.business_id,
            service_id: appt.service_id,
            customer_id: appt.customer_id,
            resource_id: appt.resource_id,
            start_time: format_instant(tz, appt.span.start),
            end_time: format_instant(tz, appt.span.end),
            status: appt.status,
            notes: appt.notes.clone(),
            originating_action_id: appt.originating_action_id,
            replaces: appt.replaces,
            created_at: format_instant(tz, appt.created_at),
            updated_at: format_instant(tz, appt.updated_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProposalView {
    pub datetime: String,
    pub platform: Option<String>,
    pub location: Option<String>,
}

impl ProposalView {
    fn new(p: &Proposal, tz: Tz) -> Self {
        Self {
            datetime: format_instant(tz, p.start),
            platform: p.platform.clone(),
            location: p.location.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionDetailsView {
    AppointmentScheduling {
        service_id: Ulid,
        resource_id: Option<Ulid>,
        proposals: Vec<ProposalView>,
        confirmation_status: ConfirmationStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        appointment_id: Option<Ulid>,
        #[serde(skip_serializing_if = "Option::is_none")]
        confirmed: Option<ProposalView>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    FollowUp {
        note: String,
    },
}

#[derive(Debug, Serialize)]
pub struct ActionView {
    pub id: Ulid,
    pub board_id: Ulid,
    pub business_id: Ulid,
    pub customer_id: Ulid,
    pub status: ActionStatus,
    pub action_details: ActionDetailsView,
    pub created_at: String,
    pub updated_at: String,
}

impl ActionView {
    pub fn new(action: &Action, tz: Tz) -> Self {
        let action_details = match &action.details {
            ActionDetails::AppointmentScheduling(d) => ActionDetailsView::AppointmentScheduling {
                service_id: d.service_id,
                resource_id: d.resource_id,
                proposals: d.proposals.iter().map(|p| ProposalView::new(p, tz)).collect(),
                confirmation_status: d.confirmation.status(),
                appointment_id: d.confirmation.appointment_id(),
                confirmed: match &d.confirmation {
                    Confirmation::Confirmed { accepted, .. } => Some(ProposalView::new(accepted, tz)),
                    _ => None,
                },
                reason: d.confirmation.reason().map(str::to_owned),
            },
            ActionDetails::FollowUp { note } => ActionDetailsView::FollowUp { note: note.clone() },
        };
        Self {
            id: action.id,
            board_id: action.board_id,
            business_id: action.business_id,
            customer_id: action.customer_id,
            status: action.status,
            action_details,
            created_at: format_instant(tz, action.created_at),
            updated_at: format_instant(tz, action.updated_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AppointmentBody {
    pub appointment: AppointmentView,
}

#[derive(Debug, Serialize)]
pub struct AppointmentsBody {
    pub appointments: Vec<AppointmentView>,
}

#[derive(Debug, Serialize)]
pub struct ActionBody {
    pub action: ActionView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub appointment: Option<AppointmentView>,
}

#[derive(Debug, Serialize)]
pub struct ActionsBody {
    pub actions: Vec<ActionView>,
}
