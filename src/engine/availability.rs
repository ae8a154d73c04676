use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike};
use chrono_tz::Tz;
use ulid::Ulid;

use crate::catalog::{AvailabilityWindow, Service, WindowSource};
use crate::limits::MIN_LEAD_TIME_MS;
use crate::model::*;

use super::conflict::find_conflict;

// ── Slot Generation ───────────────────────────────────────────────

/// A bookable start time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub start: Ms,
    /// `start` + work time + buffer.
    pub end: Ms,
    pub local_start: NaiveDateTime,
}

impl Slot {
    /// `HH:MM` in business-local time.
    pub fn label(&self) -> String {
        self.local_start.format("%H:%M").to_string()
    }
}

pub struct SlotQuery<'a> {
    pub service: &'a Service,
    pub windows: &'a [AvailabilityWindow],
    pub date: NaiveDate,
    pub timezone: Tz,
    pub now: Ms,
    pub resource_id: Option<Ulid>,
}

/// Resolve a business-local wall-clock time to an instant.
/// Ambiguous times take the earlier instant; times inside a DST gap do not exist.
pub fn local_to_ms(tz: Tz, local: NaiveDateTime) -> Option<Ms> {
    tz.from_local_datetime(&local)
        .earliest()
        .map(|dt| dt.timestamp_millis())
}

/// Windows contributing to `date`.
///
/// Date-specific overrides take precedence: a recurring window whose time
/// range overlaps an override is dropped. Non-overlapping ones both count.
pub fn windows_for_date(
    windows: &[AvailabilityWindow],
    date: NaiveDate,
    service_id: Ulid,
    resource_id: Option<Ulid>,
) -> Vec<&AvailabilityWindow> {
    let mut recurring = Vec::new();
    let mut overrides = Vec::new();
    for window in windows.iter().filter(|w| w.covers(service_id, resource_id)) {
        match window.applies_on(date) {
            Some(WindowSource::Recurring) => recurring.push(window),
            Some(WindowSource::Override) => overrides.push(window),
            None => {}
        }
    }
    recurring.retain(|r| {
        !overrides
            .iter()
            .any(|o| r.time_start < o.time_end && r.time_end > o.time_start)
    });
    overrides.extend(recurring);
    overrides
}

/// Wall-clock starts inside one window: step by the slot interval while the
/// whole occupied length still ends by `time_end`.
pub fn candidate_starts(window: &AvailabilityWindow, occupied_minutes: u32) -> Vec<NaiveTime> {
    let end = i64::from(window.time_end.num_seconds_from_midnight());
    let step = i64::from(window.slot_interval_minutes) * 60;
    let length = i64::from(occupied_minutes) * 60;

    let mut starts = Vec::new();
    let mut s = i64::from(window.time_start.num_seconds_from_midnight());
    while s + length <= end {
        if let Some(t) = NaiveTime::from_num_seconds_from_midnight_opt(s as u32, 0) {
            starts.push(t);
        }
        s += step;
    }
    starts
}

/// Bookable slots for one date, ascending and deduplicated by start.
///
/// Candidates earlier than `now` + lead time are dropped, as is any
/// candidate whose occupied interval overlaps an active booking in scope.
pub fn generate_slots(ledger: &Ledger, query: &SlotQuery<'_>) -> Vec<Slot> {
    let occupied = query.service.occupied_minutes();
    let length_ms = Ms::from(occupied) * MINUTE_MS;
    let earliest = query.now + MIN_LEAD_TIME_MS;

    let mut slots: BTreeMap<Ms, Slot> = BTreeMap::new();
    for window in windows_for_date(query.windows, query.date, query.service.id, query.resource_id) {
        for time in candidate_starts(window, occupied) {
            let local = query.date.and_time(time);
            let Some(start) = local_to_ms(query.timezone, local) else {
                continue;
            };
            if start < earliest || slots.contains_key(&start) {
                continue;
            }
            let span = Span::new(start, start + length_ms);
            if find_conflict(ledger, query.resource_id, &span, None).is_some() {
                continue;
            }
            slots.insert(
                start,
                Slot {
                    start,
                    end: span.end,
                    local_start: local,
                },
            );
        }
    }
    slots.into_values().collect()
}
