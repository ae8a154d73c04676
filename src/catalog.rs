//! Business, service and availability records.
//!
//! The engine only reads these; they are maintained by business
//! configuration elsewhere. [`InMemoryCatalog`] is the bundled
//! implementation, seeded from a JSON file at startup.

use std::path::Path;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, NaiveTime};
use chrono_tz::Tz;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::EngineError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Business {
    pub id: Ulid,
    pub name: String,
    /// Wall-clock times of this business are interpreted in this zone.
    pub timezone: Tz,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Ulid,
    pub business_id: Ulid,
    pub name: String,
    pub duration_minutes: u32,
    /// Idle time appended after the work time (cleanup, travel).
    #[serde(default)]
    pub buffer_minutes: u32,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl Service {
    /// Minutes an appointment of this service occupies.
    pub fn occupied_minutes(&self) -> u32 {
        self.duration_minutes + self.buffer_minutes
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.occupied_minutes() == 0 {
            return Err(EngineError::Validation(format!(
                "service {} has zero duration and buffer",
                self.id
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowSource {
    Recurring,
    /// Date-specific window; takes precedence over recurring ones it overlaps.
    Override,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityWindow {
    pub id: Ulid,
    pub business_id: Ulid,
    /// `None` applies to every service of the business.
    #[serde(default)]
    pub service_id: Option<Ulid>,
    #[serde(default)]
    pub resource_id: Option<Ulid>,
    /// 0 = Sunday .. 6 = Saturday. Required for recurring windows.
    #[serde(default)]
    pub day_of_week: Option<u8>,
    /// Single day a non-recurring window applies to.
    #[serde(default)]
    pub date: Option<NaiveDate>,
    pub is_recurring: bool,
    pub time_start: NaiveTime,
    pub time_end: NaiveTime,
    pub slot_interval_minutes: u32,
    #[serde(default)]
    pub date_effective_from: Option<NaiveDate>,
    #[serde(default)]
    pub date_effective_to: Option<NaiveDate>,
}

impl AvailabilityWindow {
    pub fn validate(&self) -> Result<(), EngineError> {
        let invalid = |msg: &str| Err(EngineError::Validation(format!("window {}: {msg}", self.id)));
        if self.time_start >= self.time_end {
            return invalid("time_start must be before time_end");
        }
        if self.slot_interval_minutes == 0 {
            return invalid("slot_interval_minutes must be positive");
        }
        if self.day_of_week.is_some_and(|d| d > 6) {
            return invalid("day_of_week must be 0..=6");
        }
        if self.is_recurring && self.day_of_week.is_none() {
            return invalid("recurring window needs day_of_week");
        }
        if !self.is_recurring
            && self.date.is_none()
            && (self.date_effective_from.is_none() || self.date_effective_to.is_none())
        {
            return invalid("non-recurring window needs date or effective range");
        }
        if let (Some(from), Some(to)) = (self.date_effective_from, self.date_effective_to)
            && from > to
        {
            return invalid("date_effective_from is after date_effective_to");
        }
        Ok(())
    }

    fn within_effective_bounds(&self, date: NaiveDate) -> bool {
        self.date_effective_from.is_none_or(|from| from <= date)
            && self.date_effective_to.is_none_or(|to| date <= to)
    }

    /// Whether this window contributes to `date`, and in which role.
    pub fn applies_on(&self, date: NaiveDate) -> Option<WindowSource> {
        if !self.within_effective_bounds(date) {
            return None;
        }
        if self.is_recurring {
            let weekday = date.weekday().num_days_from_sunday() as u8;
            return (self.day_of_week == Some(weekday)).then_some(WindowSource::Recurring);
        }
        match self.date {
            Some(d) if d != date => None,
            _ => Some(WindowSource::Override),
        }
    }

    /// Whether the window is scoped to this service and resource.
    pub fn covers(&self, service_id: Ulid, resource_id: Option<Ulid>) -> bool {
        let service_ok = self.service_id.is_none_or(|s| s == service_id);
        let resource_ok = match self.resource_id {
            None => true,
            Some(r) => resource_id == Some(r),
        };
        service_ok && resource_ok
    }
}

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn business(&self, id: Ulid) -> Result<Option<Business>, EngineError>;

    async fn service(&self, business_id: Ulid, service_id: Ulid) -> Result<Option<Service>, EngineError>;

    /// Windows of the business that may apply to the service (business-wide
    /// windows included). Date filtering is left to the caller.
    async fn windows(&self, business_id: Ulid, service_id: Ulid) -> Result<Vec<AvailabilityWindow>, EngineError>;
}

/// JSON seed layout for [`InMemoryCatalog`].
#[derive(Debug, Default, Deserialize)]
pub struct CatalogSeed {
    #[serde(default)]
    pub businesses: Vec<Business>,
    #[serde(default)]
    pub services: Vec<Service>,
    #[serde(default)]
    pub windows: Vec<AvailabilityWindow>,
}

#[derive(Default)]
pub struct InMemoryCatalog {
    businesses: DashMap<Ulid, Business>,
    services: DashMap<Ulid, Service>,
    /// business id → windows
    windows: DashMap<Ulid, Vec<AvailabilityWindow>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: CatalogSeed) -> Result<Self, EngineError> {
        let catalog = Self::new();
        for business in seed.businesses {
            catalog.upsert_business(business);
        }
        for service in seed.services {
            catalog.upsert_service(service)?;
        }
        for window in seed.windows {
            catalog.add_window(window)?;
        }
        Ok(catalog)
    }

    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Catalog(format!("reading {}: {e}", path.display())))?;
        let seed: CatalogSeed = serde_json::from_str(&raw)
            .map_err(|e| EngineError::Catalog(format!("parsing {}: {e}", path.display())))?;
        Self::from_seed(seed)
    }

    pub fn upsert_business(&self, business: Business) {
        self.businesses.insert(business.id, business);
    }

    pub fn upsert_service(&self, service: Service) -> Result<(), EngineError> {
        service.validate()?;
        if !self.businesses.contains_key(&service.business_id) {
            return Err(EngineError::not_found("business", service.business_id));
        }
        self.services.insert(service.id, service);
        Ok(())
    }

    pub fn add_window(&self, window: AvailabilityWindow) -> Result<(), EngineError> {
        window.validate()?;
        if !self.businesses.contains_key(&window.business_id) {
            return Err(EngineError::not_found("business", window.business_id));
        }
        self.windows.entry(window.business_id).or_default().push(window);
        Ok(())
    }

    pub fn business_count(&self) -> usize {
        self.businesses.len()
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn business(&self, id: Ulid) -> Result<Option<Business>, EngineError> {
        Ok(self.businesses.get(&id).map(|b| b.value().clone()))
    }

    async fn service(&self, business_id: Ulid, service_id: Ulid) -> Result<Option<Service>, EngineError> {
        Ok(self
            .services
            .get(&service_id)
            .filter(|s| s.business_id == business_id)
            .map(|s| s.value().clone()))
    }

    async fn windows(&self, business_id: Ulid, service_id: Ulid) -> Result<Vec<AvailabilityWindow>, EngineError> {
        Ok(self
            .windows
            .get(&business_id)
            .map(|ws| {
                ws.iter()
                    .filter(|w| w.service_id.is_none_or(|s| s == service_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
