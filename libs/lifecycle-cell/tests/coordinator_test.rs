use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use appointment_cell::{Appointment, AppointmentStatus};
use consultation_cell::ConsultationNotes;
use lifecycle_cell::LifecycleCoordinator;
use queue_cell::QueueStatus;
use shared_database::InMemoryStore;
use shared_models::LifecycleError;
use shared_utils::test_utils::{FixedClock, TestConfig, TestRefs};
use shared_utils::Clock;

struct Harness {
    store: InMemoryStore,
    clock: Arc<FixedClock>,
    start: DateTime<Utc>,
    coordinator: Arc<LifecycleCoordinator>,
    refs: TestRefs,
}

fn harness_with(config: TestConfig) -> Harness {
    let store = InMemoryStore::new();
    let clock = Arc::new(FixedClock::morning());
    let coordinator = LifecycleCoordinator::new(
        Arc::new(store.clone()),
        clock.clone(),
        &config.to_app_config(),
    );

    Harness {
        store,
        start: clock.now(),
        clock,
        coordinator: Arc::new(coordinator),
        refs: TestRefs::default(),
    }
}

fn harness() -> Harness {
    harness_with(TestConfig::default())
}

impl Harness {
    /// 10:00 on the harness day, an hour after the clock started.
    fn ten_am(&self) -> DateTime<Utc> {
        self.start + Duration::hours(1)
    }

    async fn book_at(&self, at: DateTime<Utc>) -> Appointment {
        self.coordinator
            .create_appointment(self.refs.patient_id, self.refs.doctor_id, self.refs.branch_id, at)
            .await
            .unwrap()
    }
}

// ==============================================================================
// TICKETING
// ==============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_walk_ins_are_numbered_without_gaps() {
    let h = harness();
    let branch_id = h.refs.branch_id;

    let handles: Vec<_> = (0..30)
        .map(|_| {
            let coordinator = h.coordinator.clone();
            tokio::spawn(async move { coordinator.create_walk_in_ticket(branch_id, Uuid::new_v4()).await })
        })
        .collect();

    let mut numbers: Vec<u32> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap().ticket_number())
        .collect();
    numbers.sort_unstable();

    assert_eq!(numbers, (1..=30).collect::<Vec<u32>>());
}

#[tokio::test]
async fn test_branches_and_days_number_independently() {
    let h = harness();
    let other_branch = Uuid::new_v4();

    let first = h.coordinator.create_walk_in_ticket(h.refs.branch_id, Uuid::new_v4()).await.unwrap();
    let elsewhere = h.coordinator.create_walk_in_ticket(other_branch, Uuid::new_v4()).await.unwrap();
    assert_eq!(first.ticket_number(), 1);
    assert_eq!(elsewhere.ticket_number(), 1);

    h.clock.advance(Duration::days(1));
    let tomorrow = h.coordinator.create_walk_in_ticket(h.refs.branch_id, Uuid::new_v4()).await.unwrap();
    assert_eq!(tomorrow.ticket_number(), 1);
    assert_eq!(tomorrow.queue_date(), first.queue_date() + Duration::days(1));
}

#[tokio::test]
async fn test_clinic_day_follows_configured_offset() {
    // UTC+10: 09:00 UTC is already 19:00 local, 15:00 UTC is the next local day
    let h = harness_with(TestConfig {
        clinic_utc_offset_minutes: 600,
        ..TestConfig::default()
    });

    let evening = h.coordinator.create_walk_in_ticket(h.refs.branch_id, Uuid::new_v4()).await.unwrap();
    h.clock.advance(Duration::hours(6));
    let next_morning = h.coordinator.create_walk_in_ticket(h.refs.branch_id, Uuid::new_v4()).await.unwrap();

    assert_eq!(next_morning.queue_date(), evening.queue_date() + Duration::days(1));
    assert_eq!(next_morning.ticket_number(), 1);
}

#[tokio::test]
async fn test_walk_in_ticket_end_to_end() {
    let h = harness();
    let ticket = h
        .coordinator
        .create_walk_in_ticket(h.refs.branch_id, h.refs.patient_id)
        .await
        .unwrap();

    assert_eq!(ticket.ticket_number(), 1);
    assert_eq!(ticket.status(), QueueStatus::Waiting);
    assert_eq!(ticket.appointment_id(), None);

    let called = h.coordinator.advance_queue_ticket(ticket.id(), QueueStatus::Called).await.unwrap();
    assert_eq!(called.status(), QueueStatus::Called);

    let served = h.coordinator.advance_queue_ticket(ticket.id(), QueueStatus::Served).await.unwrap();
    assert_eq!(served.status(), QueueStatus::Served);

    let again = h.coordinator.advance_queue_ticket(ticket.id(), QueueStatus::Served).await;
    assert_matches!(again, Err(LifecycleError::InvalidTransition { .. }));
    assert_eq!(
        h.coordinator.get_ticket(ticket.id()).await.unwrap().status(),
        QueueStatus::Served
    );
}

#[tokio::test]
async fn test_terminal_tickets_reject_every_target() {
    let h = harness();

    for terminal in [QueueStatus::Cancelled, QueueStatus::NoShow] {
        let ticket = h.coordinator.create_walk_in_ticket(h.refs.branch_id, Uuid::new_v4()).await.unwrap();
        h.coordinator.advance_queue_ticket(ticket.id(), terminal).await.unwrap();

        for target in [QueueStatus::Waiting, QueueStatus::Called, QueueStatus::Served, QueueStatus::Cancelled] {
            let result = h.coordinator.advance_queue_ticket(ticket.id(), target).await;
            assert_matches!(result, Err(LifecycleError::InvalidTransition { .. }));
        }
        assert_eq!(h.coordinator.get_ticket(ticket.id()).await.unwrap().status(), terminal);
    }
}

#[tokio::test]
async fn test_unknown_ticket_is_not_found() {
    let h = harness();
    let result = h.coordinator.advance_queue_ticket(Uuid::new_v4(), QueueStatus::Called).await;
    assert_matches!(result, Err(LifecycleError::NotFound { entity: "queue ticket", .. }));
}

#[tokio::test]
async fn test_queue_queries() {
    let h = harness();
    let first = h.coordinator.create_walk_in_ticket(h.refs.branch_id, h.refs.patient_id).await.unwrap();
    let second = h.coordinator.create_walk_in_ticket(h.refs.branch_id, Uuid::new_v4()).await.unwrap();
    h.coordinator.advance_queue_ticket(first.id(), QueueStatus::Called).await.unwrap();

    let queue = h.coordinator.queue_for_branch_today(h.refs.branch_id).await.unwrap();
    let numbers: Vec<u32> = queue.iter().map(|t| t.ticket_number()).collect();
    assert_eq!(numbers, vec![1, 2]);

    let waiting = h
        .coordinator
        .queue_for_branch_today_by_status(h.refs.branch_id, QueueStatus::Waiting)
        .await
        .unwrap();
    assert_eq!(waiting.len(), 1);
    assert_eq!(waiting[0].id(), second.id());

    let mine = h.coordinator.tickets_for_patient(h.refs.patient_id).await.unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].id(), first.id());
}

// ==============================================================================
// STORE FAILURES
// ==============================================================================

#[tokio::test]
async fn test_transient_commit_failures_are_retried() {
    let h = harness();

    h.store.fail_next_commits(2);
    let ticket = h.coordinator.create_walk_in_ticket(h.refs.branch_id, Uuid::new_v4()).await.unwrap();
    assert_eq!(ticket.ticket_number(), 1);

    h.store.fail_next_commits(3);
    let exhausted = h.coordinator.create_walk_in_ticket(h.refs.branch_id, Uuid::new_v4()).await;
    assert_matches!(exhausted, Err(LifecycleError::StoreUnavailable(_)));

    // nothing from the failed attempts is visible and no number is skipped
    let next = h.coordinator.create_walk_in_ticket(h.refs.branch_id, Uuid::new_v4()).await.unwrap();
    assert_eq!(next.ticket_number(), 2);
    assert_eq!(h.store.record_count("queue_tickets").await, 2);
}

#[tokio::test]
async fn test_failed_visit_completion_leaves_no_partial_writes() {
    let h = harness_with(TestConfig {
        store_max_attempts: 1,
        ..TestConfig::default()
    });
    let appointment = h.book_at(h.ten_am()).await;
    let ticket = h.coordinator.create_walk_in_ticket(h.refs.branch_id, h.refs.patient_id).await.unwrap();
    h.coordinator.advance_queue_ticket(ticket.id(), QueueStatus::Called).await.unwrap();
    let consultation = h.coordinator.open_consultation(appointment.id(), h.ten_am()).await.unwrap();

    h.store.fail_next_commits(1);
    let result = h
        .coordinator
        .close_consultation(consultation.id(), h.ten_am() + Duration::minutes(20), ConsultationNotes::default())
        .await;
    assert_matches!(result, Err(LifecycleError::StoreUnavailable(_)));

    assert!(h.coordinator.get_consultation(consultation.id()).await.unwrap().is_open());
    assert_eq!(
        h.coordinator.get_appointment(appointment.id()).await.unwrap().status(),
        AppointmentStatus::InProgress
    );
    assert_eq!(h.coordinator.get_ticket(ticket.id()).await.unwrap().status(), QueueStatus::Called);
}

#[tokio::test]
async fn test_failed_ticket_call_leaves_booking_untouched() {
    let h = harness_with(TestConfig {
        store_max_attempts: 1,
        ..TestConfig::default()
    });
    let appointment = h.book_at(h.ten_am()).await;
    let ticket = h.coordinator.create_walk_in_ticket(h.refs.branch_id, h.refs.patient_id).await.unwrap();
    assert_eq!(ticket.appointment_id(), Some(appointment.id()));

    h.store.fail_next_commits(1);
    let result = h.coordinator.advance_queue_ticket(ticket.id(), QueueStatus::Called).await;
    assert_matches!(result, Err(LifecycleError::StoreUnavailable(_)));

    assert_eq!(h.coordinator.get_ticket(ticket.id()).await.unwrap().status(), QueueStatus::Waiting);
    assert_eq!(
        h.coordinator.get_appointment(appointment.id()).await.unwrap().status(),
        AppointmentStatus::Scheduled
    );

    h.coordinator.advance_queue_ticket(ticket.id(), QueueStatus::Called).await.unwrap();
    assert_eq!(
        h.coordinator.get_appointment(appointment.id()).await.unwrap().status(),
        AppointmentStatus::InProgress
    );
}

// ==============================================================================
// APPOINTMENTS
// ==============================================================================

#[tokio::test]
async fn test_overlapping_bookings_conflict() {
    let h = harness();
    h.book_at(h.ten_am()).await;

    let overlapping = h
        .coordinator
        .create_appointment(Uuid::new_v4(), h.refs.doctor_id, h.refs.branch_id, h.ten_am() + Duration::minutes(15))
        .await;
    assert_matches!(overlapping, Err(LifecycleError::Conflict(_)));

    let adjacent = h
        .coordinator
        .create_appointment(Uuid::new_v4(), h.refs.doctor_id, h.refs.branch_id, h.ten_am() + Duration::minutes(30))
        .await
        .unwrap();
    assert_eq!(adjacent.duration_minutes(), 30);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_bookings_for_one_slot_admit_one() {
    let h = harness();
    let at = h.ten_am();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let coordinator = h.coordinator.clone();
            let refs = h.refs;
            tokio::spawn(async move {
                coordinator
                    .create_appointment(Uuid::new_v4(), refs.doctor_id, refs.branch_id, at)
                    .await
            })
        })
        .collect();

    let results: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, LifecycleError::Conflict(_))));
}

#[tokio::test]
async fn test_booking_in_the_past_is_invalid() {
    let h = harness();
    let result = h
        .coordinator
        .create_appointment(h.refs.patient_id, h.refs.doctor_id, h.refs.branch_id, h.clock.now() - Duration::minutes(1))
        .await;
    assert_matches!(result, Err(LifecycleError::Validation(_)));
}

#[tokio::test]
async fn test_booking_past_calendar_end_is_invalid() {
    let h = harness();
    let last = DateTime::<Utc>::MAX_UTC - Duration::seconds(1);

    let result = h
        .coordinator
        .create_appointment(h.refs.patient_id, h.refs.doctor_id, h.refs.branch_id, last)
        .await;
    assert_matches!(result, Err(LifecycleError::Validation(_)));
    assert_eq!(h.store.record_count("appointments").await, 0);
}

#[tokio::test]
async fn test_slot_length_comes_from_config() {
    let h = harness_with(TestConfig {
        slot_duration_minutes: 45,
        ..TestConfig::default()
    });
    let appointment = h.book_at(h.ten_am()).await;
    assert_eq!(appointment.scheduled_end_time(), h.ten_am() + Duration::minutes(45));

    let clash = h
        .coordinator
        .create_appointment(Uuid::new_v4(), h.refs.doctor_id, h.refs.branch_id, h.ten_am() + Duration::minutes(30))
        .await;
    assert_matches!(clash, Err(LifecycleError::Conflict(_)));
}

#[tokio::test]
async fn test_doctor_schedule_queries() {
    let h = harness();
    let later = h.book_at(h.ten_am() + Duration::hours(2)).await;
    let sooner = h.book_at(h.ten_am()).await;
    let tomorrow = h.book_at(h.ten_am() + Duration::days(1)).await;

    let today = h.coordinator.todays_appointments_for_doctor(h.refs.doctor_id).await.unwrap();
    let ids: Vec<Uuid> = today.iter().map(Appointment::id).collect();
    assert_eq!(ids, vec![sooner.id(), later.id()]);

    let week = h
        .coordinator
        .appointments_for_doctor_in_range(h.refs.doctor_id, h.clock.now(), h.clock.now() + Duration::days(7))
        .await
        .unwrap();
    assert_eq!(week.len(), 3);
    assert_eq!(week[2].id(), tomorrow.id());

    let inverted = h
        .coordinator
        .appointments_for_doctor_in_range(h.refs.doctor_id, h.ten_am(), h.ten_am())
        .await;
    assert_matches!(inverted, Err(LifecycleError::Validation(_)));

    let patient = h.coordinator.appointments_for_patient(h.refs.patient_id).await.unwrap();
    assert_eq!(patient.len(), 3);
}

#[tokio::test]
async fn test_no_show_needs_the_slot_to_start() {
    let h = harness();
    let appointment = h.book_at(h.ten_am()).await;

    let early = h.coordinator.advance_appointment(appointment.id(), AppointmentStatus::NoShow).await;
    assert_matches!(early, Err(LifecycleError::PreconditionFailed(_)));

    h.clock.set(h.ten_am() + Duration::minutes(10));
    let late = h
        .coordinator
        .advance_appointment(appointment.id(), AppointmentStatus::NoShow)
        .await
        .unwrap();
    assert_eq!(late.status(), AppointmentStatus::NoShow);
}

// ==============================================================================
// LINKED VISITS
// ==============================================================================

#[tokio::test]
async fn test_walk_in_links_todays_booking() {
    let h = harness();
    let appointment = h.book_at(h.ten_am()).await;

    // another branch and another day are ignored
    h.coordinator
        .create_appointment(h.refs.patient_id, Uuid::new_v4(), Uuid::new_v4(), h.ten_am())
        .await
        .unwrap();
    h.book_at(h.ten_am() + Duration::days(1)).await;

    let ticket = h.coordinator.create_walk_in_ticket(h.refs.branch_id, h.refs.patient_id).await.unwrap();
    assert_eq!(ticket.appointment_id(), Some(appointment.id()));

    let second = h.coordinator.create_walk_in_ticket(h.refs.branch_id, h.refs.patient_id).await.unwrap();
    assert_eq!(second.appointment_id(), None);
}

#[tokio::test]
async fn test_linked_visit_runs_through_to_served() {
    let h = harness();
    let appointment = h.book_at(h.ten_am()).await;
    h.coordinator
        .advance_appointment(appointment.id(), AppointmentStatus::Confirmed)
        .await
        .unwrap();
    let ticket = h.coordinator.create_walk_in_ticket(h.refs.branch_id, h.refs.patient_id).await.unwrap();

    h.clock.set(h.ten_am());
    h.coordinator.advance_queue_ticket(ticket.id(), QueueStatus::Called).await.unwrap();
    assert_eq!(
        h.coordinator.get_appointment(appointment.id()).await.unwrap().status(),
        AppointmentStatus::InProgress
    );

    let consultation = h.coordinator.open_consultation(appointment.id(), h.ten_am()).await.unwrap();
    let end = h.ten_am() + Duration::minutes(20);
    let closed = h
        .coordinator
        .close_consultation(
            consultation.id(),
            end,
            ConsultationNotes {
                diagnosis: Some("Tension headache".to_string()),
                treatment_plan: Some("Hydration, ibuprofen as needed".to_string()),
                prescription: None,
                follow_up_date: Some(end.date_naive() + Duration::days(14)),
            },
        )
        .await
        .unwrap();

    assert_eq!(closed.end_time(), Some(end));
    assert_eq!(
        h.coordinator.get_appointment(appointment.id()).await.unwrap().status(),
        AppointmentStatus::Completed
    );
    assert_eq!(h.coordinator.get_ticket(ticket.id()).await.unwrap().status(), QueueStatus::Served);

    let found = h.coordinator.consultation_for_appointment(appointment.id()).await.unwrap();
    assert_eq!(found.id(), consultation.id());
}

#[tokio::test]
async fn test_follow_up_uses_clinic_day_of_visit_end() {
    // UTC-5: a visit ending 01:30 UTC on the 3rd ends on the evening of the 2nd
    let h = harness_with(TestConfig {
        clinic_utc_offset_minutes: -300,
        ..TestConfig::default()
    });
    let at = h.start + Duration::hours(16);
    let appointment = h.book_at(at).await;
    h.coordinator
        .advance_appointment(appointment.id(), AppointmentStatus::InProgress)
        .await
        .unwrap();
    let consultation = h.coordinator.open_consultation(appointment.id(), at).await.unwrap();

    let end = at + Duration::minutes(30);
    let clinic_day = h.start.date_naive();
    assert_eq!(end.date_naive(), clinic_day + Duration::days(1));

    let closed = h
        .coordinator
        .close_consultation(
            consultation.id(),
            end,
            ConsultationNotes {
                follow_up_date: Some(clinic_day),
                ..ConsultationNotes::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(closed.follow_up_date(), Some(clinic_day));
}

#[tokio::test]
async fn test_consultation_needs_in_progress_appointment() {
    let h = harness();
    let appointment = h.book_at(h.ten_am()).await;

    let refused = h.coordinator.open_consultation(appointment.id(), h.ten_am()).await;
    assert_matches!(refused, Err(LifecycleError::PreconditionFailed(_)));

    h.coordinator
        .advance_appointment(appointment.id(), AppointmentStatus::InProgress)
        .await
        .unwrap();
    h.coordinator.open_consultation(appointment.id(), h.ten_am()).await.unwrap();

    let second = h.coordinator.open_consultation(appointment.id(), h.ten_am()).await;
    assert_matches!(second, Err(LifecycleError::PreconditionFailed(_)));
}

#[tokio::test]
async fn test_closing_before_start_keeps_visit_in_progress() {
    let h = harness();
    let appointment = h.book_at(h.ten_am()).await;
    h.coordinator
        .advance_appointment(appointment.id(), AppointmentStatus::InProgress)
        .await
        .unwrap();
    let consultation = h
        .coordinator
        .open_consultation(appointment.id(), h.ten_am() + Duration::minutes(5))
        .await
        .unwrap();

    let result = h
        .coordinator
        .close_consultation(consultation.id(), h.ten_am(), ConsultationNotes::default())
        .await;
    assert_matches!(result, Err(LifecycleError::Validation(_)));
    assert_eq!(
        h.coordinator.get_appointment(appointment.id()).await.unwrap().status(),
        AppointmentStatus::InProgress
    );
}

#[tokio::test]
async fn test_completing_directly_waits_for_open_consultation() {
    let h = harness();
    let appointment = h.book_at(h.ten_am()).await;
    h.coordinator
        .advance_appointment(appointment.id(), AppointmentStatus::InProgress)
        .await
        .unwrap();
    let consultation = h.coordinator.open_consultation(appointment.id(), h.ten_am()).await.unwrap();

    let refused = h
        .coordinator
        .advance_appointment(appointment.id(), AppointmentStatus::Completed)
        .await;
    assert_matches!(refused, Err(LifecycleError::PreconditionFailed(_)));

    let amended = h
        .coordinator
        .amend_consultation(
            consultation.id(),
            ConsultationNotes {
                diagnosis: Some("Otitis media".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(amended.diagnosis(), Some("Otitis media"));
    assert!(amended.is_open());
}

#[tokio::test]
async fn test_cancelling_appointment_cancels_waiting_ticket() {
    let h = harness();
    let appointment = h.book_at(h.ten_am()).await;
    let ticket = h.coordinator.create_walk_in_ticket(h.refs.branch_id, h.refs.patient_id).await.unwrap();

    h.coordinator
        .advance_appointment(appointment.id(), AppointmentStatus::Cancelled)
        .await
        .unwrap();

    assert_eq!(h.coordinator.get_ticket(ticket.id()).await.unwrap().status(), QueueStatus::Cancelled);
}

#[tokio::test]
async fn test_no_show_appointment_marks_ticket_no_show() {
    let h = harness();
    let appointment = h.book_at(h.ten_am()).await;
    let ticket = h.coordinator.create_walk_in_ticket(h.refs.branch_id, h.refs.patient_id).await.unwrap();

    h.clock.set(h.ten_am() + Duration::minutes(15));
    h.coordinator
        .advance_appointment(appointment.id(), AppointmentStatus::NoShow)
        .await
        .unwrap();

    assert_eq!(h.coordinator.get_ticket(ticket.id()).await.unwrap().status(), QueueStatus::NoShow);
}

#[tokio::test]
async fn test_missing_consultation_lookup() {
    let h = harness();
    let appointment = h.book_at(h.ten_am()).await;

    let result = h.coordinator.consultation_for_appointment(appointment.id()).await;
    assert_matches!(result, Err(LifecycleError::NotFound { entity: "consultation", .. }));

    let unknown = h.coordinator.consultation_for_appointment(Uuid::new_v4()).await;
    assert_matches!(unknown, Err(LifecycleError::NotFound { entity: "appointment", .. }));
}
