use std::path::PathBuf;

use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use tokio_test::{assert_err, assert_ok};

use super::*;
use crate::catalog::{AvailabilityWindow, InMemoryCatalog};
use crate::compactor::{compact_if_due, maintain};

const M: Ms = 60_000; // 1 minute in ms

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("appointd_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

/// 2030-01-07 is a Monday.
fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2030, 1, 7).unwrap()
}

fn at(h: u32, m: u32) -> Ms {
    Utc.with_ymd_and_hms(2030, 1, 7, h, m, 0).unwrap().timestamp_millis()
}

/// A week before the test day.
const NOW: Ms = 1_893_456_000_000; // 2030-01-01T00:00:00Z

struct Fixture {
    engine: Arc<Engine>,
    catalog: Arc<InMemoryCatalog>,
    notify: Arc<NotifyHub>,
    business_id: Ulid,
    service_id: Ulid,
    path: PathBuf,
}

impl Fixture {
    /// UTC business with a 60 min service bookable Mondays 09:00–12:00 every 30 min.
    fn new(name: &str) -> Self {
        let business_id = Ulid::new();
        let service_id = Ulid::new();
        let catalog = InMemoryCatalog::new();
        catalog.upsert_business(Business {
            id: business_id,
            name: "Studio".into(),
            timezone: chrono_tz::UTC,
        });
        catalog
            .upsert_service(Service {
                id: service_id,
                business_id,
                name: "Haircut".into(),
                duration_minutes: 60,
                buffer_minutes: 0,
                active: true,
            })
            .unwrap();
        catalog
            .add_window(AvailabilityWindow {
                id: Ulid::new(),
                business_id,
                service_id: Some(service_id),
                resource_id: None,
                day_of_week: Some(1),
                date: None,
                is_recurring: true,
                time_start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                time_end: NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
                slot_interval_minutes: 30,
                date_effective_from: None,
                date_effective_to: None,
            })
            .unwrap();
        let catalog = Arc::new(catalog);
        let notify = Arc::new(NotifyHub::new());
        let path = test_wal_path(name);
        let engine = Arc::new(Engine::new(business_id, path.clone(), catalog.clone(), notify.clone()).unwrap());
        Self {
            engine,
            catalog,
            notify,
            business_id,
            service_id,
            path,
        }
    }

    /// Fresh engine over the same WAL, as after a restart.
    fn reopen(&self) -> Engine {
        Engine::new(
            self.business_id,
            self.path.clone(),
            self.catalog.clone(),
            Arc::new(NotifyHub::new()),
        )
        .unwrap()
    }

    fn booking(&self, customer_id: Ulid, start: Ms) -> NewAppointment {
        NewAppointment {
            service_id: self.service_id,
            customer_id,
            resource_id: None,
            start,
            notes: None,
        }
    }

    async fn book(&self, start: Ms) -> Appointment {
        self.engine
            .book_appointment(self.booking(Ulid::new(), start), NOW)
            .await
            .unwrap()
    }

    async fn offer(&self, customer_id: Ulid, starts: &[Ms]) -> Action {
        self.engine
            .record_action(
                NewAction::AppointmentScheduling {
                    board_id: Ulid::new(),
                    customer_id,
                    service_id: self.service_id,
                    resource_id: None,
                    proposals: starts
                        .iter()
                        .map(|&start| Proposal {
                            start,
                            platform: Some("Zoom".into()),
                            location: None,
                        })
                        .collect(),
                },
                NOW,
            )
            .await
            .unwrap()
    }

    async fn slot_labels(&self) -> Vec<String> {
        self.engine
            .available_slots(self.service_id, monday(), None, NOW)
            .await
            .unwrap()
            .iter()
            .map(Slot::label)
            .collect()
    }
}

fn confirmation_of(action: &Action) -> &Confirmation {
    &action.scheduling().unwrap().confirmation
}

// ── Slots ────────────────────────────────────────────────

#[tokio::test]
async fn slots_follow_window_and_bookings() {
    let f = Fixture::new("slots_example.wal");
    assert_eq!(f.slot_labels().await, ["09:00", "09:30", "10:00", "10:30", "11:00"]);

    let appt = f.book(at(10, 0)).await;
    f.engine.confirm_appointment(appt.id, Actor::Business, NOW).await.unwrap();
    assert_eq!(f.slot_labels().await, ["09:00", "11:00"]);
}

#[tokio::test]
async fn cancelled_booking_frees_its_slots() {
    let f = Fixture::new("slots_cancel.wal");
    let appt = f.book(at(10, 0)).await;
    assert_eq!(f.slot_labels().await, ["09:00", "11:00"]);

    f.engine
        .cancel_appointment(appt.id, Actor::Business, Some("closed".into()), NOW)
        .await
        .unwrap();
    assert_eq!(f.slot_labels().await.len(), 5);
}

#[tokio::test]
async fn slots_for_unknown_or_inactive_service() {
    let f = Fixture::new("slots_unknown.wal");
    let err = f
        .engine
        .available_slots(Ulid::new(), monday(), None, NOW)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { kind: "service", .. }));

    let mut service = f.catalog.service(f.business_id, f.service_id).await.unwrap().unwrap();
    service.active = false;
    f.catalog.upsert_service(service).unwrap();
    assert_err!(f.engine.available_slots(f.service_id, monday(), None, NOW).await);
}

#[tokio::test]
async fn slots_on_day_without_window() {
    let f = Fixture::new("slots_tuesday.wal");
    let tuesday = monday().succ_opt().unwrap();
    let slots = f.engine.available_slots(f.service_id, tuesday, None, NOW).await.unwrap();
    assert!(slots.is_empty());
}

#[tokio::test]
async fn slots_respect_lead_time_on_the_day() {
    let f = Fixture::new("slots_lead_time.wal");
    // 09:50: 10:00 is inside the 15 minute lead time, 10:30 is not.
    let slots = f
        .engine
        .available_slots(f.service_id, monday(), None, at(9, 50))
        .await
        .unwrap();
    let labels: Vec<_> = slots.iter().map(Slot::label).collect();
    assert_eq!(labels, ["10:30", "11:00"]);
}

// ── Booking ──────────────────────────────────────────────

#[tokio::test]
async fn booking_span_uses_duration_and_buffer() {
    let f = Fixture::new("book_span.wal");
    let mut service = f.catalog.service(f.business_id, f.service_id).await.unwrap().unwrap();
    service.buffer_minutes = 15;
    f.catalog.upsert_service(service).unwrap();

    let appt = f.book(at(9, 0)).await;
    assert_eq!(appt.span, Span::new(at(9, 0), at(10, 15)));
    assert_eq!(appt.status, AppointmentStatus::Scheduled);
}

#[tokio::test]
async fn overlapping_booking_conflicts_adjacent_does_not() {
    let f = Fixture::new("book_overlap.wal");
    let first = f.book(at(9, 0)).await;

    let err = f
        .engine
        .book_appointment(f.booking(Ulid::new(), at(9, 30)), NOW)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(id) if id == first.id));

    // Touching end points do not overlap.
    assert_ok!(f.engine.book_appointment(f.booking(Ulid::new(), at(10, 0)), NOW).await);
}

#[tokio::test]
async fn resource_bookings_only_block_their_resource() {
    let f = Fixture::new("book_resources.wal");
    let (chair_a, chair_b) = (Ulid::new(), Ulid::new());
    let on = |resource_id| NewAppointment {
        resource_id: Some(resource_id),
        ..f.booking(Ulid::new(), at(9, 0))
    };

    f.engine.book_appointment(on(chair_a), NOW).await.unwrap();
    assert_ok!(f.engine.book_appointment(on(chair_b), NOW).await);
    assert!(matches!(
        f.engine.book_appointment(on(chair_a), NOW).await,
        Err(EngineError::Conflict(_))
    ));
    // A business-wide booking collides with every resource.
    assert!(matches!(
        f.engine.book_appointment(f.booking(Ulid::new(), at(9, 30)), NOW).await,
        Err(EngineError::Conflict(_))
    ));
}

#[tokio::test]
async fn concurrent_overlapping_bookings_exactly_one_wins() {
    let f = Fixture::new("book_race.wal");
    let mut handles = Vec::new();
    for i in 0..16 {
        let engine = f.engine.clone();
        let req = f.booking(Ulid::new(), at(10, 0) + i * M);
        handles.push(tokio::spawn(async move { engine.book_appointment(req, NOW).await }));
    }

    let mut won = 0;
    let mut conflicts = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => won += 1,
            Err(EngineError::Conflict(_)) => conflicts += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(won, 1);
    assert_eq!(conflicts, 15);
    assert_eq!(f.engine.list_appointments(Actor::Business, &Default::default()).await.len(), 1);
}

#[tokio::test]
async fn has_conflict_reports_blocking_booking() {
    let f = Fixture::new("has_conflict.wal");
    let appt = f.book(at(9, 0)).await;

    let hit = f
        .engine
        .has_conflict(None, Span::new(at(9, 30), at(9, 45)), None)
        .await
        .unwrap();
    assert_eq!(hit, Some(appt.id));
    let excluded = f
        .engine
        .has_conflict(None, Span::new(at(9, 30), at(9, 45)), Some(appt.id))
        .await
        .unwrap();
    assert_eq!(excluded, None);
    assert_err!(f.engine.has_conflict(None, Span { start: at(10, 0), end: at(9, 0) }, None).await);
}

// ── Appointment lifecycle ────────────────────────────────

#[tokio::test]
async fn terminal_appointments_refuse_transitions() {
    let f = Fixture::new("lifecycle_terminal.wal");
    let appt = f.book(at(9, 0)).await;
    f.engine
        .complete_appointment(appt.id, Actor::Business, None, NOW)
        .await
        .unwrap();

    for result in [
        f.engine.cancel_appointment(appt.id, Actor::Business, None, NOW).await,
        f.engine.confirm_appointment(appt.id, Actor::Business, NOW).await,
        f.engine.mark_no_show(appt.id, Actor::Business, None, NOW).await,
    ] {
        assert!(matches!(result, Err(EngineError::InvalidTransition { entity: "appointment", .. })));
    }
}

#[tokio::test]
async fn notes_are_prefixed_with_labels() {
    let f = Fixture::new("lifecycle_notes.wal");
    let appt = f
        .engine
        .book_appointment(
            NewAppointment {
                notes: Some("bring photos".into()),
                ..f.booking(Ulid::new(), at(9, 0))
            },
            NOW,
        )
        .await
        .unwrap();

    let done = f
        .engine
        .complete_appointment(appt.id, Actor::Business, Some("went well".into()), NOW + M)
        .await
        .unwrap();
    assert_eq!(done.status, AppointmentStatus::Completed);
    assert_eq!(
        done.notes.as_deref(),
        Some("Completion notes: went well\n\n--- Previous notes ---\nbring photos")
    );
    assert_eq!(done.updated_at, NOW + M);
}

#[tokio::test]
async fn customers_only_reach_their_own_appointments() {
    let f = Fixture::new("lifecycle_customer.wal");
    let alice = Ulid::new();
    let appt = f
        .engine
        .book_appointment(f.booking(alice, at(9, 0)), NOW)
        .await
        .unwrap();

    let mallory = Actor::Customer(Ulid::new());
    assert!(matches!(
        f.engine.get_appointment(appt.id, mallory).await,
        Err(EngineError::NotFound { .. })
    ));
    assert!(matches!(
        f.engine.cancel_appointment(appt.id, mallory, None, NOW).await,
        Err(EngineError::NotFound { .. })
    ));
    assert!(f.engine.list_appointments(mallory, &Default::default()).await.is_empty());

    assert_ok!(f.engine.get_appointment(appt.id, Actor::Customer(alice)).await);
    assert_eq!(f.engine.list_appointments(Actor::Customer(alice), &Default::default()).await.len(), 1);
}

#[tokio::test]
async fn list_filters_by_status_and_range() {
    let f = Fixture::new("list_filters.wal");
    let early = f.book(at(9, 0)).await;
    let late = f.book(at(11, 0)).await;
    f.engine.cancel_appointment(late.id, Actor::Business, None, NOW).await.unwrap();

    let scheduled = f
        .engine
        .list_appointments(
            Actor::Business,
            &AppointmentFilter {
                status: Some(AppointmentStatus::Scheduled),
                ..Default::default()
            },
        )
        .await;
    assert_eq!(scheduled.iter().map(|a| a.id).collect::<Vec<_>>(), [early.id]);

    let morning = f
        .engine
        .list_appointments(
            Actor::Business,
            &AppointmentFilter {
                from: Some(at(10, 30)),
                to: Some(at(12, 0)),
                ..Default::default()
            },
        )
        .await;
    assert_eq!(morning.iter().map(|a| a.id).collect::<Vec<_>>(), [late.id]);
}

// ── Reschedule ───────────────────────────────────────────

#[tokio::test]
async fn reschedule_retires_old_and_books_replacement() {
    let f = Fixture::new("reschedule_ok.wal");
    let customer = Ulid::new();
    let old = f
        .engine
        .book_appointment(f.booking(customer, at(9, 0)), NOW)
        .await
        .unwrap();

    // Overlaps its own old interval, which does not count.
    let new = f
        .engine
        .reschedule_appointment(old.id, Actor::Business, at(9, 30), Some("late train".into()), NOW)
        .await
        .unwrap();

    assert_eq!(new.status, AppointmentStatus::Confirmed);
    assert_eq!(new.replaces, Some(old.id));
    assert_eq!(new.span, Span::new(at(9, 30), at(10, 30)));
    assert_eq!((new.customer_id, new.service_id, new.business_id), (customer, old.service_id, old.business_id));

    let old = f.engine.get_appointment(old.id, Actor::Business).await.unwrap();
    assert_eq!(old.status, AppointmentStatus::Rescheduled);
    assert_eq!(old.notes.as_deref(), Some("Reschedule reason: late train"));

    let all = f.engine.list_appointments(Actor::Business, &Default::default()).await;
    assert_eq!(all.len(), 2);
    assert_eq!(all.iter().filter(|a| a.status.is_active()).count(), 1);
}

#[tokio::test]
async fn customer_reschedule_awaits_business() {
    let f = Fixture::new("reschedule_customer.wal");
    let customer = Ulid::new();
    let old = f
        .engine
        .book_appointment(f.booking(customer, at(9, 0)), NOW)
        .await
        .unwrap();
    let new = f
        .engine
        .reschedule_appointment(old.id, Actor::Customer(customer), at(11, 0), None, NOW)
        .await
        .unwrap();
    assert_eq!(new.status, AppointmentStatus::Scheduled);
}

#[tokio::test]
async fn reschedule_conflict_changes_nothing() {
    let f = Fixture::new("reschedule_conflict.wal");
    let old = f.book(at(9, 0)).await;
    let blocker = f.book(at(11, 0)).await;

    let err = f
        .engine
        .reschedule_appointment(old.id, Actor::Business, at(10, 30), None, NOW)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(id) if id == blocker.id));

    let old = f.engine.get_appointment(old.id, Actor::Business).await.unwrap();
    assert_eq!(old.status, AppointmentStatus::Scheduled);
    assert_eq!(f.engine.list_appointments(Actor::Business, &Default::default()).await.len(), 2);
}

#[tokio::test]
async fn rescheduled_appointment_cannot_move_again() {
    let f = Fixture::new("reschedule_twice.wal");
    let old = f.book(at(9, 0)).await;
    f.engine
        .reschedule_appointment(old.id, Actor::Business, at(11, 0), None, NOW)
        .await
        .unwrap();
    assert!(matches!(
        f.engine
            .reschedule_appointment(old.id, Actor::Business, at(10, 0), None, NOW)
            .await,
        Err(EngineError::InvalidTransition { .. })
    ));
}

// ── Action workflow ──────────────────────────────────────

#[tokio::test]
async fn confirm_action_books_chosen_proposal() {
    let f = Fixture::new("action_confirm.wal");
    let customer = Ulid::new();
    let action = f.offer(customer, &[at(9, 0), at(11, 0)]).await;
    assert_eq!(confirmation_of(&action), &Confirmation::PendingCustomer);

    // Two proposals: the datetime must be given.
    assert!(matches!(
        f.engine
            .confirm_action(action.id, Actor::Customer(customer), ActionAcceptance::default(), NOW)
            .await,
        Err(EngineError::Validation(_))
    ));
    // And must be one of them.
    assert!(matches!(
        f.engine
            .confirm_action(
                action.id,
                Actor::Customer(customer),
                ActionAcceptance {
                    start: Some(at(10, 0)),
                    platform: None,
                },
                NOW,
            )
            .await,
        Err(EngineError::Validation(_))
    ));

    let (action, appt) = f
        .engine
        .confirm_action(
            action.id,
            Actor::Customer(customer),
            ActionAcceptance {
                start: Some(at(11, 0)),
                platform: Some("Meet".into()),
            },
            NOW,
        )
        .await
        .unwrap();

    assert_eq!(appt.span, Span::new(at(11, 0), at(12, 0)));
    assert_eq!(appt.status, AppointmentStatus::Scheduled);
    assert_eq!(appt.originating_action_id, Some(action.id));
    assert_eq!(appt.customer_id, customer);
    match confirmation_of(&action) {
        Confirmation::Confirmed { appointment_id, accepted } => {
            assert_eq!(*appointment_id, appt.id);
            assert_eq!(accepted.start, at(11, 0));
            assert_eq!(accepted.platform.as_deref(), Some("Meet"));
        }
        other => panic!("expected confirmed, got {other:?}"),
    }

    // Only a pending offer can be confirmed.
    assert!(matches!(
        f.engine
            .confirm_action(
                action.id,
                Actor::Customer(customer),
                ActionAcceptance {
                    start: Some(at(11, 0)),
                    platform: None,
                },
                NOW,
            )
            .await,
        Err(EngineError::InvalidTransition { entity: "action", .. })
    ));
}

#[tokio::test]
async fn single_proposal_confirms_without_datetime() {
    let f = Fixture::new("action_single.wal");
    let customer = Ulid::new();
    let action = f.offer(customer, &[at(9, 0)]).await;
    let (_, appt) = f
        .engine
        .confirm_action(action.id, Actor::Business, ActionAcceptance::default(), NOW)
        .await
        .unwrap();
    assert_eq!(appt.span.start, at(9, 0));
}

#[tokio::test]
async fn confirm_action_conflict_leaves_offer_pending() {
    let f = Fixture::new("action_conflict.wal");
    let customer = Ulid::new();
    let action = f.offer(customer, &[at(9, 0)]).await;
    f.book(at(9, 30)).await;

    let err = f
        .engine
        .confirm_action(action.id, Actor::Customer(customer), ActionAcceptance::default(), NOW)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));

    let action = f.engine.get_action(action.id, Actor::Business).await.unwrap();
    assert_eq!(confirmation_of(&action), &Confirmation::PendingCustomer);
    assert_eq!(f.engine.list_appointments(Actor::Business, &Default::default()).await.len(), 1);
}

#[tokio::test]
async fn concurrent_confirmations_of_overlapping_offers() {
    let f = Fixture::new("action_race.wal");
    let mut handles = Vec::new();
    for i in 0..8 {
        let customer = Ulid::new();
        let action = f.offer(customer, &[at(10, 0) + i * 5 * M]).await;
        let engine = f.engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .confirm_action(action.id, Actor::Customer(customer), ActionAcceptance::default(), NOW)
                .await
        }));
    }
    let results: Vec<_> = futures::future::join_all(handles).await;
    let won = results.iter().filter(|r| matches!(r, Ok(Ok(_)))).count();
    assert_eq!(won, 1);

    let confirmed = f
        .engine
        .list_actions(Actor::Business)
        .await
        .iter()
        .filter(|a| confirmation_of(a).status() == ConfirmationStatus::Confirmed)
        .count();
    assert_eq!(confirmed, 1);
}

#[tokio::test]
async fn reject_then_reschedule_request() {
    let f = Fixture::new("action_reject.wal");
    let customer = Ulid::new();
    let action = f.offer(customer, &[at(9, 0)]).await;

    let rejected = f
        .engine
        .reject_action(action.id, Actor::Customer(customer), Some("too early".into()), NOW)
        .await
        .unwrap();
    assert_eq!(
        confirmation_of(&rejected),
        &Confirmation::Rejected {
            reason: Some("too early".into())
        }
    );
    assert_err!(
        f.engine
            .confirm_action(action.id, Actor::Customer(customer), ActionAcceptance::default(), NOW)
            .await
    );

    let (action, appt) = f
        .engine
        .request_action_reschedule(action.id, Actor::Customer(customer), Some("afternoon?".into()), NOW)
        .await
        .unwrap();
    assert_eq!(confirmation_of(&action).status(), ConfirmationStatus::Rescheduled);
    assert!(appt.is_none());
}

#[tokio::test]
async fn reschedule_request_releases_linked_appointment() {
    let f = Fixture::new("action_reschedule_linked.wal");
    let customer = Ulid::new();
    let action = f.offer(customer, &[at(9, 0)]).await;
    let (_, appt) = f
        .engine
        .confirm_action(action.id, Actor::Customer(customer), ActionAcceptance::default(), NOW)
        .await
        .unwrap();

    let (action, linked) = f
        .engine
        .request_action_reschedule(action.id, Actor::Business, Some("stylist ill".into()), NOW)
        .await
        .unwrap();
    let linked = linked.unwrap();
    assert_eq!(linked.id, appt.id);
    assert_eq!(linked.status, AppointmentStatus::Rescheduled);
    assert_eq!(linked.notes.as_deref(), Some("Reschedule reason: stylist ill"));
    assert_eq!(confirmation_of(&action).appointment_id(), None);

    // The slot is free again.
    assert_eq!(f.slot_labels().await.len(), 5);
}

#[tokio::test]
async fn cancel_action_cancels_active_linked_appointment_only() {
    let f = Fixture::new("action_cancel_linked.wal");
    let customer = Ulid::new();
    let action = f.offer(customer, &[at(9, 0)]).await;
    let (_, appt) = f
        .engine
        .confirm_action(action.id, Actor::Customer(customer), ActionAcceptance::default(), NOW)
        .await
        .unwrap();

    let (action, linked) = f
        .engine
        .cancel_action(action.id, Actor::Customer(customer), None, NOW)
        .await
        .unwrap();
    assert_eq!(confirmation_of(&action).status(), ConfirmationStatus::Cancelled);
    assert_eq!(linked.map(|a| (a.id, a.status)), Some((appt.id, AppointmentStatus::Cancelled)));

    // Cancelling twice is an invalid transition.
    assert!(matches!(
        f.engine.cancel_action(action.id, Actor::Business, None, NOW).await,
        Err(EngineError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn closing_action_leaves_completed_appointment_alone() {
    let f = Fixture::new("action_cancel_completed.wal");
    let customer = Ulid::new();
    let action = f.offer(customer, &[at(9, 0)]).await;
    let (_, appt) = f
        .engine
        .confirm_action(action.id, Actor::Business, ActionAcceptance::default(), NOW)
        .await
        .unwrap();
    f.engine
        .complete_appointment(appt.id, Actor::Business, None, NOW)
        .await
        .unwrap();

    let (_, linked) = f.engine.cancel_action(action.id, Actor::Business, None, NOW).await.unwrap();
    assert!(linked.is_none());
    let appt = f.engine.get_appointment(appt.id, Actor::Business).await.unwrap();
    assert_eq!(appt.status, AppointmentStatus::Completed);
}

#[tokio::test]
async fn rejected_action_can_be_cancelled() {
    let f = Fixture::new("action_reject_cancel.wal");
    let customer = Ulid::new();
    let action = f.offer(customer, &[at(9, 0)]).await;
    f.engine
        .reject_action(action.id, Actor::Customer(customer), None, NOW)
        .await
        .unwrap();

    let (action, linked) = f
        .engine
        .cancel_action(action.id, Actor::Business, Some("offer withdrawn".into()), NOW)
        .await
        .unwrap();
    assert_eq!(
        confirmation_of(&action),
        &Confirmation::Cancelled {
            reason: Some("offer withdrawn".into())
        }
    );
    assert_eq!(action.status, ActionStatus::Cancelled);
    assert!(linked.is_none());
}

#[tokio::test]
async fn cancelled_action_can_be_reopened() {
    let f = Fixture::new("action_cancel_reopen.wal");
    let customer = Ulid::new();
    let action = f.offer(customer, &[at(9, 0)]).await;
    f.engine
        .confirm_action(action.id, Actor::Customer(customer), ActionAcceptance::default(), NOW)
        .await
        .unwrap();
    f.engine.cancel_action(action.id, Actor::Business, None, NOW).await.unwrap();

    let (action, linked) = f
        .engine
        .request_action_reschedule(action.id, Actor::Customer(customer), Some("new week".into()), NOW)
        .await
        .unwrap();
    assert_eq!(confirmation_of(&action).status(), ConfirmationStatus::Rescheduled);
    assert_eq!(action.status, ActionStatus::Pending);
    // The appointment was already cancelled with the action.
    assert!(linked.is_none());

    assert!(matches!(
        f.engine
            .request_action_reschedule(action.id, Actor::Business, None, NOW)
            .await,
        Err(EngineError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn closing_action_follows_appointment_reschedule() {
    let f = Fixture::new("action_cancel_moved.wal");
    let customer = Ulid::new();
    let action = f.offer(customer, &[at(9, 0)]).await;
    let (_, original) = f
        .engine
        .confirm_action(action.id, Actor::Customer(customer), ActionAcceptance::default(), NOW)
        .await
        .unwrap();
    let moved = f
        .engine
        .reschedule_appointment(original.id, Actor::Business, at(11, 0), None, NOW)
        .await
        .unwrap();
    assert_eq!(moved.originating_action_id, Some(action.id));
    assert_eq!(f.slot_labels().await, ["09:00", "09:30", "10:00"]);

    let (_, linked) = f
        .engine
        .cancel_action(action.id, Actor::Customer(customer), Some("moving away".into()), NOW)
        .await
        .unwrap();
    let linked = linked.unwrap();
    assert_eq!(linked.id, moved.id);
    assert_eq!(linked.status, AppointmentStatus::Cancelled);
    assert_eq!(linked.notes.as_deref(), Some("Cancellation reason: moving away"));

    let original = f.engine.get_appointment(original.id, Actor::Business).await.unwrap();
    assert_eq!(original.status, AppointmentStatus::Rescheduled);
    assert_eq!(f.slot_labels().await.len(), 5);
}

#[tokio::test]
async fn follow_up_actions_reject_scheduling_ops() {
    let f = Fixture::new("action_follow_up.wal");
    let action = f
        .engine
        .record_action(
            NewAction::FollowUp {
                board_id: Ulid::new(),
                customer_id: Ulid::new(),
                note: "send invoice".into(),
            },
            NOW,
        )
        .await
        .unwrap();
    assert!(matches!(
        f.engine
            .confirm_action(action.id, Actor::Business, ActionAcceptance::default(), NOW)
            .await,
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        f.engine.cancel_action(action.id, Actor::Business, None, NOW).await,
        Err(EngineError::Validation(_))
    ));
}

#[tokio::test]
async fn record_action_validates_proposals() {
    let f = Fixture::new("action_record_invalid.wal");
    let offer = |service_id, proposals: Vec<Proposal>| NewAction::AppointmentScheduling {
        board_id: Ulid::new(),
        customer_id: Ulid::new(),
        service_id,
        resource_id: None,
        proposals,
    };
    let proposal = Proposal {
        start: at(9, 0),
        platform: None,
        location: None,
    };

    assert!(matches!(
        f.engine.record_action(offer(f.service_id, vec![]), NOW).await,
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        f.engine
            .record_action(offer(f.service_id, vec![proposal.clone(); 21]), NOW)
            .await,
        Err(EngineError::LimitExceeded(_))
    ));
    assert!(matches!(
        f.engine.record_action(offer(Ulid::new(), vec![proposal]), NOW).await,
        Err(EngineError::NotFound { kind: "service", .. })
    ));
}

#[tokio::test]
async fn customers_only_reach_their_own_actions() {
    let f = Fixture::new("action_visibility.wal");
    let alice = Ulid::new();
    let action = f.offer(alice, &[at(9, 0)]).await;

    let mallory = Actor::Customer(Ulid::new());
    assert!(matches!(
        f.engine.get_action(action.id, mallory).await,
        Err(EngineError::NotFound { kind: "action", .. })
    ));
    assert!(matches!(
        f.engine
            .confirm_action(action.id, mallory, ActionAcceptance::default(), NOW)
            .await,
        Err(EngineError::NotFound { .. })
    ));
    assert!(f.engine.list_actions(mallory).await.is_empty());
    assert_eq!(f.engine.list_actions(Actor::Customer(alice)).await.len(), 1);
}

#[tokio::test]
async fn action_appointment_link_is_consistent() {
    let f = Fixture::new("action_consistency.wal");
    let c = Ulid::new();
    let confirmed = f.offer(c, &[at(9, 0)]).await;
    let rejected = f.offer(c, &[at(10, 0)]).await;
    let pending = f.offer(c, &[at(11, 0)]).await;
    f.engine
        .confirm_action(confirmed.id, Actor::Business, ActionAcceptance::default(), NOW)
        .await
        .unwrap();
    f.engine.reject_action(rejected.id, Actor::Business, None, NOW).await.unwrap();

    for action in f.engine.list_actions(Actor::Business).await {
        let confirmation = confirmation_of(&action);
        let is_confirmed = confirmation.status() == ConfirmationStatus::Confirmed;
        assert_eq!(confirmation.appointment_id().is_some(), is_confirmed);
        if let Some(id) = confirmation.appointment_id() {
            let appt = f.engine.get_appointment(id, Actor::Business).await.unwrap();
            assert_eq!(appt.originating_action_id, Some(action.id));
        }
    }
    let pending = f.engine.get_action(pending.id, Actor::Business).await.unwrap();
    assert_eq!(confirmation_of(&pending), &Confirmation::PendingCustomer);
}

// ── Persistence ──────────────────────────────────────────

#[tokio::test]
async fn wal_replay_restores_ledger() {
    let f = Fixture::new("replay.wal");
    let customer = Ulid::new();
    let kept = f.book(at(9, 0)).await;
    let moved = f.book(at(10, 0)).await;
    let replacement = f
        .engine
        .reschedule_appointment(moved.id, Actor::Business, at(11, 0), Some("swap".into()), NOW)
        .await
        .unwrap();
    let action = f.offer(customer, &[at(9, 0), at(11, 0)]).await;
    f.engine.reject_action(action.id, Actor::Business, None, NOW).await.unwrap();

    let before = f.engine.list_appointments(Actor::Business, &Default::default()).await;
    let restarted = f.reopen();
    let after = restarted.list_appointments(Actor::Business, &Default::default()).await;
    assert_eq!(before, after);

    assert_eq!(
        restarted.get_appointment(replacement.id, Actor::Business).await.unwrap().replaces,
        Some(moved.id)
    );
    assert_eq!(
        restarted.get_action(action.id, Actor::Business).await.unwrap(),
        f.engine.get_action(action.id, Actor::Business).await.unwrap()
    );
    // Conflict index rebuilt: the kept slot is still taken.
    assert!(matches!(
        restarted.book_appointment(f.booking(customer, at(9, 30)), NOW).await,
        Err(EngineError::Conflict(id)) if id == kept.id
    ));
}

#[tokio::test]
async fn group_commit_then_replay() {
    let f = Fixture::new("group_commit.wal");
    let mut handles = Vec::new();
    for i in 0..6 {
        let engine = f.engine.clone();
        let req = f.booking(Ulid::new(), at(9, 0) + i * 60 * M);
        handles.push(tokio::spawn(async move { engine.book_appointment(req, NOW).await }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }
    assert_eq!(f.engine.wal_appends_since_compact().await, 6);
    assert_eq!(f.reopen().list_appointments(Actor::Business, &Default::default()).await.len(), 6);
}

#[tokio::test]
async fn compaction_preserves_state() {
    let f = Fixture::new("compact.wal");
    let customer = Ulid::new();
    for _ in 0..5 {
        let appt = f.book(at(9, 0)).await;
        f.engine.cancel_appointment(appt.id, Actor::Business, None, NOW).await.unwrap();
    }
    let kept = f.book(at(9, 0)).await;
    let action = f.offer(customer, &[at(11, 0)]).await;
    f.engine
        .confirm_action(action.id, Actor::Business, ActionAcceptance::default(), NOW)
        .await
        .unwrap();

    let before_len = std::fs::metadata(&f.path).unwrap().len();
    assert!(!compact_if_due(&f.engine, 100).await.unwrap());
    assert!(compact_if_due(&f.engine, 10).await.unwrap());
    assert_eq!(f.engine.wal_appends_since_compact().await, 0);
    assert!(std::fs::metadata(&f.path).unwrap().len() < before_len);

    let restarted = f.reopen();
    assert_eq!(
        restarted.list_appointments(Actor::Business, &Default::default()).await,
        f.engine.list_appointments(Actor::Business, &Default::default()).await
    );
    assert_eq!(
        restarted.get_action(action.id, Actor::Business).await.unwrap(),
        f.engine.get_action(action.id, Actor::Business).await.unwrap()
    );
    assert!(matches!(
        restarted.book_appointment(f.booking(customer, at(9, 0)), NOW).await,
        Err(EngineError::Conflict(id)) if id == kept.id
    ));
}

#[tokio::test]
async fn committed_events_are_broadcast() {
    let f = Fixture::new("notify.wal");
    let mut rx = f.notify.subscribe(f.business_id);

    let appt = f.book(at(9, 0)).await;
    match rx.recv().await.unwrap() {
        Event::AppointmentBooked { appointment } => assert_eq!(appointment.id, appt.id),
        other => panic!("unexpected event {other:?}"),
    }

    // Failed operations publish nothing.
    assert_err!(f.engine.book_appointment(f.booking(Ulid::new(), at(9, 0)), NOW).await);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn maintenance_drops_abandoned_channel() {
    let f = Fixture::new("notify_prune.wal");
    let rx = f.notify.subscribe(f.business_id);
    f.book(at(9, 0)).await;

    assert!(!maintain(&f.engine, 100).await.unwrap());
    assert!(f.notify.has_channel(&f.business_id));

    drop(rx);
    assert!(!maintain(&f.engine, 100).await.unwrap());
    assert!(!f.notify.has_channel(&f.business_id));
}
