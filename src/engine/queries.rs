use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::actions::visible_action;
use super::appointments::visible_appointment;
use super::availability::{Slot, SlotQuery, generate_slots};
use super::conflict::{find_conflict, validate_span};
use super::{Engine, EngineError};

/// Narrows `list_appointments`. `from`/`to` select appointments whose span
/// overlaps `[from, to)`.
#[derive(Debug, Clone, Default)]
pub struct AppointmentFilter {
    pub status: Option<AppointmentStatus>,
    pub customer_id: Option<Ulid>,
    pub from: Option<Ms>,
    pub to: Option<Ms>,
}

impl AppointmentFilter {
    fn matches(&self, appt: &Appointment) -> bool {
        self.status.is_none_or(|s| appt.status == s)
            && self.customer_id.is_none_or(|c| appt.customer_id == c)
            && self.from.is_none_or(|from| appt.span.end > from)
            && self.to.is_none_or(|to| appt.span.start < to)
    }
}

impl Engine {
    /// Bookable starts for `service_id` on the business-local `date`,
    /// in chronological order.
    pub async fn available_slots(
        &self,
        service_id: Ulid,
        date: NaiveDate,
        resource_id: Option<Ulid>,
        now: Ms,
    ) -> Result<Vec<Slot>, EngineError> {
        let business = self.business().await?;
        let service = self.active_service(service_id).await?;
        let windows = self.catalog.windows(self.business_id, service_id).await?;

        let ledger = self.ledger.read().await;
        let slots = generate_slots(
            &ledger,
            &SlotQuery {
                service: &service,
                windows: &windows,
                date,
                timezone: business.timezone,
                now,
                resource_id,
            },
        );
        drop(ledger);

        metrics::histogram!(crate::observability::SLOTS_GENERATED).record(slots.len() as f64);
        tracing::debug!(
            business_id = %self.business_id,
            service_id = %service_id,
            %date,
            slots = slots.len(),
            "slots generated"
        );
        Ok(slots)
    }

    /// First active booking in scope that overlaps `span`, if any.
    pub async fn has_conflict(
        &self,
        resource_id: Option<Ulid>,
        span: Span,
        excluding: Option<Ulid>,
    ) -> Result<Option<Ulid>, EngineError> {
        validate_span(&span)?;
        let ledger = self.ledger.read().await;
        Ok(find_conflict(&ledger, resource_id, &span, excluding))
    }

    pub async fn get_appointment(&self, id: Ulid, actor: Actor) -> Result<Appointment, EngineError> {
        let ledger = self.ledger.read().await;
        visible_appointment(&ledger, id, actor).cloned()
    }

    /// Appointments visible to `actor`, ordered by start time.
    pub async fn list_appointments(&self, actor: Actor, filter: &AppointmentFilter) -> Vec<Appointment> {
        let ledger = self.ledger.read().await;
        let mut out: Vec<Appointment> = ledger
            .appointments()
            .filter(|a| actor.can_see(a.customer_id) && filter.matches(a))
            .cloned()
            .collect();
        out.sort_by_key(|a| (a.span.start, a.id));
        out
    }

    pub async fn get_action(&self, id: Ulid, actor: Actor) -> Result<Action, EngineError> {
        let ledger = self.ledger.read().await;
        visible_action(&ledger, id, actor).cloned()
    }

    /// Actions visible to `actor`, oldest first.
    pub async fn list_actions(&self, actor: Actor) -> Vec<Action> {
        let ledger = self.ledger.read().await;
        let mut out: Vec<Action> = ledger
            .actions()
            .filter(|a| actor.can_see(a.customer_id))
            .cloned()
            .collect();
        out.sort_by_key(|a| a.id);
        out
    }
}
