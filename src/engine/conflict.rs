use ulid::Ulid;

use crate::model::*;

use super::EngineError;

/// Half-open overlap: `[a_start, a_end)` and `[b_start, b_end)` share an instant.
pub fn overlaps(a_start: Ms, a_end: Ms, b_start: Ms, b_end: Ms) -> bool {
    a_start < b_end && a_end > b_start
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    use crate::limits::*;
    if span.start >= span.end {
        return Err(EngineError::Validation("interval must end after it starts".into()));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("appointment too long"));
    }
    Ok(())
}

/// First active booking that blocks `span`.
///
/// With a resource, bookings on that resource and business-wide bookings
/// (no resource) both block. Without one, every booking of the business does.
pub(crate) fn find_conflict(
    ledger: &Ledger,
    resource_id: Option<Ulid>,
    span: &Span,
    excluding: Option<Ulid>,
) -> Option<Ulid> {
    ledger
        .overlapping(span)
        .filter(|b| Some(b.id) != excluding)
        .filter(|b| match (resource_id, b.resource_id) {
            (Some(wanted), Some(held)) => wanted == held,
            _ => true,
        })
        .find(|b| overlaps(span.start, span.end, b.span.start, b.span.end))
        .map(|b| b.id)
}

pub(crate) fn check_no_conflict(
    ledger: &Ledger,
    resource_id: Option<Ulid>,
    span: &Span,
    excluding: Option<Ulid>,
) -> Result<(), EngineError> {
    match find_conflict(ledger, resource_id, span, excluding) {
        Some(id) => {
            metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            Err(EngineError::Conflict(id))
        }
        None => Ok(()),
    }
}
