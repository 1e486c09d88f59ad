// libs/lifecycle-cell/src/services/coordinator.rs
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use appointment_cell::{Appointment, AppointmentLifecycleService, AppointmentStatus, ConflictDetectionService};
use consultation_cell::{Consultation, ConsultationLinker, ConsultationNotes};
use queue_cell::{QueueStateMachine, QueueStatus, QueueTicket, TicketAllocator};
use shared_config::AppConfig;
use shared_database::{RecordStore, ScopeKey, StoreError, StoreTx};
use shared_models::LifecycleError;
use shared_utils::{ClinicCalendar, Clock};

use crate::services::retry::RetryPolicy;

/// Runs every multi-entity operation of the clinic as one atomic unit.
///
/// Each public write opens a single store transaction holding the scopes it
/// touches, stages all changes and commits once. Transient store failures
/// re-run the whole operation under [`RetryPolicy`].
pub struct LifecycleCoordinator {
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    calendar: ClinicCalendar,
    slot_duration_minutes: i64,
    retry: RetryPolicy,
}

impl LifecycleCoordinator {
    pub fn new(store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>, config: &AppConfig) -> Self {
        Self {
            store,
            clock,
            calendar: ClinicCalendar::from_config(config),
            slot_duration_minutes: config.slot_duration_minutes,
            retry: RetryPolicy::from_config(config),
        }
    }

    // ==========================================================================
    // QUEUE TICKETS
    // ==========================================================================

    /// Issues the next ticket for today's queue at `branch_id`, linking the
    /// patient's earliest unlinked booking for today at that branch.
    #[instrument(skip(self))]
    pub async fn create_walk_in_ticket(&self, branch_id: Uuid, patient_id: Uuid) -> Result<QueueTicket, LifecycleError> {
        let ticket = self
            .retry
            .run("create_walk_in_ticket", move || self.try_create_walk_in_ticket(branch_id, patient_id))
            .await?;

        info!(
            "Issued ticket #{} at branch {} for patient {}",
            ticket.ticket_number(),
            branch_id,
            patient_id
        );
        Ok(ticket)
    }

    async fn try_create_walk_in_ticket(&self, branch_id: Uuid, patient_id: Uuid) -> Result<QueueTicket, LifecycleError> {
        let now = self.clock.now();
        let day = self.calendar.day_of(now);
        let (day_start, day_end) = self.calendar.day_bounds(day);

        let booking = {
            let mut tx = StoreTx::read_only(self.store.as_ref()).await?;
            let mut found = None;
            for candidate in
                AppointmentLifecycleService::pending_check_in_for_patient(&mut tx, patient_id, branch_id, day_start, day_end)
                    .await?
            {
                if QueueStateMachine::linked_to_appointment(&mut tx, candidate.id()).await?.is_empty() {
                    found = Some(candidate.id());
                    break;
                }
            }
            found
        };

        let mut scopes = vec![TicketAllocator::sequence_scope(branch_id, day)];
        if let Some(appointment_id) = booking {
            scopes.push(AppointmentLifecycleService::appointment_scope(appointment_id));
        }
        let mut tx = StoreTx::begin(self.store.as_ref(), scopes).await?;

        if let Some(appointment_id) = booking {
            let appointment = AppointmentLifecycleService::load(&mut tx, appointment_id).await?;
            let already_linked = !QueueStateMachine::linked_to_appointment(&mut tx, appointment_id)
                .await?
                .is_empty();
            if !appointment.status().is_pending_check_in() || already_linked {
                return Err(link_changed("walk-in booking", appointment_id));
            }
        }

        let ticket = TicketAllocator::issue_ticket(&mut tx, branch_id, patient_id, booking, day, now).await?;
        tx.commit().await?;
        Ok(ticket)
    }

    /// Moves a ticket along the queue. Calling a ticket checks its linked
    /// booking in, in the same unit.
    #[instrument(skip(self))]
    pub async fn advance_queue_ticket(&self, ticket_id: Uuid, target: QueueStatus) -> Result<QueueTicket, LifecycleError> {
        self.retry
            .run("advance_queue_ticket", move || self.try_advance_queue_ticket(ticket_id, target))
            .await
    }

    async fn try_advance_queue_ticket(&self, ticket_id: Uuid, target: QueueStatus) -> Result<QueueTicket, LifecycleError> {
        let now = self.clock.now();

        let linked = {
            let mut tx = StoreTx::read_only(self.store.as_ref()).await?;
            QueueStateMachine::load(&mut tx, ticket_id).await?.appointment_id()
        };

        let mut scopes = vec![QueueStateMachine::ticket_scope(ticket_id)];
        if let Some(appointment_id) = linked {
            scopes.push(AppointmentLifecycleService::appointment_scope(appointment_id));
        }
        let mut tx = StoreTx::begin(self.store.as_ref(), scopes).await?;

        let ticket = QueueStateMachine::advance(&mut tx, ticket_id, target, now).await?;
        if ticket.appointment_id() != linked {
            return Err(link_changed("ticket", ticket_id));
        }

        if let (QueueStatus::Called, Some(appointment_id)) = (target, linked) {
            let appointment = AppointmentLifecycleService::load(&mut tx, appointment_id).await?;
            if appointment.status().is_pending_check_in() {
                AppointmentLifecycleService::advance(&mut tx, appointment_id, AppointmentStatus::InProgress, now).await?;
            } else {
                debug!(
                    "Appointment {} already {}, leaving it as is",
                    appointment_id,
                    appointment.status()
                );
            }
        }

        tx.commit().await?;
        Ok(ticket)
    }

    pub async fn get_ticket(&self, ticket_id: Uuid) -> Result<QueueTicket, LifecycleError> {
        self.retry
            .run("get_ticket", move || async move {
                let mut tx = StoreTx::read_only(self.store.as_ref()).await?;
                QueueStateMachine::load(&mut tx, ticket_id).await
            })
            .await
    }

    #[instrument(skip(self))]
    pub async fn queue_for_branch_today(&self, branch_id: Uuid) -> Result<Vec<QueueTicket>, LifecycleError> {
        let day = self.calendar.day_of(self.clock.now());
        self.retry
            .run("queue_for_branch_today", move || async move {
                let mut tx = StoreTx::read_only(self.store.as_ref()).await?;
                QueueStateMachine::for_branch_day(&mut tx, branch_id, day).await
            })
            .await
    }

    pub async fn queue_for_branch_today_by_status(
        &self,
        branch_id: Uuid,
        status: QueueStatus,
    ) -> Result<Vec<QueueTicket>, LifecycleError> {
        let tickets = self.queue_for_branch_today(branch_id).await?;
        Ok(tickets.into_iter().filter(|t| t.status() == status).collect())
    }

    pub async fn tickets_for_patient(&self, patient_id: Uuid) -> Result<Vec<QueueTicket>, LifecycleError> {
        self.retry
            .run("tickets_for_patient", move || async move {
                let mut tx = StoreTx::read_only(self.store.as_ref()).await?;
                QueueStateMachine::for_patient(&mut tx, patient_id).await
            })
            .await
    }

    // ==========================================================================
    // APPOINTMENTS
    // ==========================================================================

    /// Books a slot of the configured length, refusing any overlap with the
    /// doctor's active appointments.
    #[instrument(skip(self))]
    pub async fn create_appointment(
        &self,
        patient_id: Uuid,
        doctor_id: Uuid,
        branch_id: Uuid,
        appointment_date: DateTime<Utc>,
    ) -> Result<Appointment, LifecycleError> {
        let appointment = self
            .retry
            .run("create_appointment", move || {
                self.try_create_appointment(patient_id, doctor_id, branch_id, appointment_date)
            })
            .await?;

        info!(
            "Booked appointment {} with doctor {} at {}",
            appointment.id(),
            doctor_id,
            appointment_date
        );
        Ok(appointment)
    }

    async fn try_create_appointment(
        &self,
        patient_id: Uuid,
        doctor_id: Uuid,
        branch_id: Uuid,
        appointment_date: DateTime<Utc>,
    ) -> Result<Appointment, LifecycleError> {
        let appointment = Appointment::schedule(
            patient_id,
            doctor_id,
            branch_id,
            appointment_date,
            self.slot_duration_minutes,
            self.clock.now(),
        )?;

        let mut tx = StoreTx::begin(
            self.store.as_ref(),
            vec![ConflictDetectionService::doctor_schedule_scope(doctor_id)],
        )
        .await?;
        ConflictDetectionService::ensure_slot_free(&mut tx, doctor_id, appointment_date, self.slot_duration_minutes)
            .await?;
        tx.put(&appointment).await?;
        tx.commit().await?;

        Ok(appointment)
    }

    /// Moves an appointment along its lifecycle and carries cancellations and
    /// no-shows over to its queue tickets.
    #[instrument(skip(self))]
    pub async fn advance_appointment(
        &self,
        appointment_id: Uuid,
        target: AppointmentStatus,
    ) -> Result<Appointment, LifecycleError> {
        self.retry
            .run("advance_appointment", move || self.try_advance_appointment(appointment_id, target))
            .await
    }

    async fn try_advance_appointment(
        &self,
        appointment_id: Uuid,
        target: AppointmentStatus,
    ) -> Result<Appointment, LifecycleError> {
        let now = self.clock.now();
        let ticket_ids = self.linked_ticket_ids(appointment_id).await?;

        let mut tx = StoreTx::begin(self.store.as_ref(), appointment_scopes(appointment_id, &ticket_ids)).await?;
        let tickets = relinked_tickets(&mut tx, appointment_id, &ticket_ids).await?;

        if target == AppointmentStatus::Completed {
            if let Some(open) = ConsultationLinker::for_appointment(&mut tx, appointment_id)
                .await?
                .filter(Consultation::is_open)
            {
                return Err(LifecycleError::PreconditionFailed(format!(
                    "Appointment {} has open consultation {}, close it to complete the visit",
                    appointment_id,
                    open.id()
                )));
            }
        }

        let appointment = AppointmentLifecycleService::advance(&mut tx, appointment_id, target, now).await?;

        let cascade = match target {
            AppointmentStatus::Cancelled => Some((QueueStatus::Cancelled, &[QueueStatus::Waiting][..])),
            AppointmentStatus::NoShow => Some((QueueStatus::NoShow, &[QueueStatus::Waiting, QueueStatus::Called][..])),
            _ => None,
        };
        if let Some((ticket_target, from)) = cascade {
            for ticket in tickets.iter().filter(|t| from.contains(&t.status())) {
                QueueStateMachine::advance(&mut tx, ticket.id(), ticket_target, now).await?;
            }
        }

        tx.commit().await?;
        Ok(appointment)
    }

    pub async fn get_appointment(&self, appointment_id: Uuid) -> Result<Appointment, LifecycleError> {
        self.retry
            .run("get_appointment", move || async move {
                let mut tx = StoreTx::read_only(self.store.as_ref()).await?;
                AppointmentLifecycleService::load(&mut tx, appointment_id).await
            })
            .await
    }

    #[instrument(skip(self))]
    pub async fn appointments_for_doctor_in_range(
        &self,
        doctor_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, LifecycleError> {
        self.retry
            .run("appointments_for_doctor_in_range", move || async move {
                let mut tx = StoreTx::read_only(self.store.as_ref()).await?;
                AppointmentLifecycleService::appointments_for_doctor_in_range(&mut tx, doctor_id, start, end).await
            })
            .await
    }

    pub async fn todays_appointments_for_doctor(&self, doctor_id: Uuid) -> Result<Vec<Appointment>, LifecycleError> {
        let (start, end) = self.calendar.day_bounds(self.calendar.day_of(self.clock.now()));
        self.appointments_for_doctor_in_range(doctor_id, start, end).await
    }

    pub async fn appointments_for_patient(&self, patient_id: Uuid) -> Result<Vec<Appointment>, LifecycleError> {
        self.retry
            .run("appointments_for_patient", move || async move {
                let mut tx = StoreTx::read_only(self.store.as_ref()).await?;
                AppointmentLifecycleService::appointments_for_patient(&mut tx, patient_id).await
            })
            .await
    }

    // ==========================================================================
    // CONSULTATIONS
    // ==========================================================================

    #[instrument(skip(self))]
    pub async fn open_consultation(
        &self,
        appointment_id: Uuid,
        start_time: DateTime<Utc>,
    ) -> Result<Consultation, LifecycleError> {
        self.retry
            .run("open_consultation", move || self.try_open_consultation(appointment_id, start_time))
            .await
    }

    async fn try_open_consultation(
        &self,
        appointment_id: Uuid,
        start_time: DateTime<Utc>,
    ) -> Result<Consultation, LifecycleError> {
        let mut tx = StoreTx::begin(
            self.store.as_ref(),
            vec![AppointmentLifecycleService::appointment_scope(appointment_id)],
        )
        .await?;
        let consultation = ConsultationLinker::open(&mut tx, appointment_id, start_time, self.clock.now()).await?;
        tx.commit().await?;
        Ok(consultation)
    }

    /// Closes the consultation, completes its appointment and serves a called
    /// linked ticket, all in one unit.
    #[instrument(skip(self, notes))]
    pub async fn close_consultation(
        &self,
        consultation_id: Uuid,
        end_time: DateTime<Utc>,
        notes: ConsultationNotes,
    ) -> Result<Consultation, LifecycleError> {
        let consultation = self
            .retry
            .run("close_consultation", move || self.try_close_consultation(consultation_id, end_time, notes.clone()))
            .await?;

        info!(
            "Visit for appointment {} completed with consultation {}",
            consultation.appointment_id(),
            consultation_id
        );
        Ok(consultation)
    }

    async fn try_close_consultation(
        &self,
        consultation_id: Uuid,
        end_time: DateTime<Utc>,
        notes: ConsultationNotes,
    ) -> Result<Consultation, LifecycleError> {
        let now = self.clock.now();
        let appointment_id = self.owning_appointment(consultation_id).await?;
        let ticket_ids = self.linked_ticket_ids(appointment_id).await?;

        let mut tx = StoreTx::begin(self.store.as_ref(), appointment_scopes(appointment_id, &ticket_ids)).await?;
        let tickets = relinked_tickets(&mut tx, appointment_id, &ticket_ids).await?;

        let end_day = self.calendar.day_of(end_time);
        let consultation = ConsultationLinker::close(&mut tx, consultation_id, end_time, end_day, notes, now).await?;
        AppointmentLifecycleService::advance(&mut tx, appointment_id, AppointmentStatus::Completed, now).await?;

        for ticket in tickets.iter().filter(|t| t.status() == QueueStatus::Called) {
            QueueStateMachine::advance(&mut tx, ticket.id(), QueueStatus::Served, now).await?;
        }

        tx.commit().await?;
        Ok(consultation)
    }

    #[instrument(skip(self, notes))]
    pub async fn amend_consultation(
        &self,
        consultation_id: Uuid,
        notes: ConsultationNotes,
    ) -> Result<Consultation, LifecycleError> {
        self.retry
            .run("amend_consultation", move || self.try_amend_consultation(consultation_id, notes.clone()))
            .await
    }

    async fn try_amend_consultation(
        &self,
        consultation_id: Uuid,
        notes: ConsultationNotes,
    ) -> Result<Consultation, LifecycleError> {
        let appointment_id = self.owning_appointment(consultation_id).await?;
        let mut tx = StoreTx::begin(
            self.store.as_ref(),
            vec![AppointmentLifecycleService::appointment_scope(appointment_id)],
        )
        .await?;
        let consultation = ConsultationLinker::amend(&mut tx, consultation_id, notes, self.clock.now()).await?;
        tx.commit().await?;
        Ok(consultation)
    }

    pub async fn get_consultation(&self, consultation_id: Uuid) -> Result<Consultation, LifecycleError> {
        self.retry
            .run("get_consultation", move || async move {
                let mut tx = StoreTx::read_only(self.store.as_ref()).await?;
                ConsultationLinker::load(&mut tx, consultation_id).await
            })
            .await
    }

    pub async fn consultation_for_appointment(&self, appointment_id: Uuid) -> Result<Consultation, LifecycleError> {
        self.retry
            .run("consultation_for_appointment", move || async move {
                let mut tx = StoreTx::read_only(self.store.as_ref()).await?;
                AppointmentLifecycleService::load(&mut tx, appointment_id).await?;
                ConsultationLinker::for_appointment(&mut tx, appointment_id)
                    .await?
                    .ok_or_else(|| LifecycleError::not_found("consultation", appointment_id))
            })
            .await
    }

    // ==========================================================================
    // PRE-LOCK LOOKUPS
    // ==========================================================================

    async fn owning_appointment(&self, consultation_id: Uuid) -> Result<Uuid, LifecycleError> {
        let mut tx = StoreTx::read_only(self.store.as_ref()).await?;
        Ok(ConsultationLinker::load(&mut tx, consultation_id).await?.appointment_id())
    }

    async fn linked_ticket_ids(&self, appointment_id: Uuid) -> Result<Vec<Uuid>, LifecycleError> {
        let mut tx = StoreTx::read_only(self.store.as_ref()).await?;
        let tickets = QueueStateMachine::linked_to_appointment(&mut tx, appointment_id).await?;
        Ok(tickets.iter().map(QueueTicket::id).collect())
    }
}

fn appointment_scopes(appointment_id: Uuid, ticket_ids: &[Uuid]) -> Vec<ScopeKey> {
    let mut scopes = vec![AppointmentLifecycleService::appointment_scope(appointment_id)];
    scopes.extend(ticket_ids.iter().copied().map(QueueStateMachine::ticket_scope));
    scopes
}

/// Reloads the tickets linked to `appointment_id` under lock and checks they
/// are the ones whose scopes were taken.
async fn relinked_tickets(
    tx: &mut StoreTx,
    appointment_id: Uuid,
    expected: &[Uuid],
) -> Result<Vec<QueueTicket>, LifecycleError> {
    let tickets = QueueStateMachine::linked_to_appointment(tx, appointment_id).await?;
    let mut found: Vec<Uuid> = tickets.iter().map(QueueTicket::id).collect();
    let mut wanted = expected.to_vec();
    found.sort();
    wanted.sort();

    if found != wanted {
        return Err(link_changed("appointment", appointment_id));
    }
    Ok(tickets)
}

fn link_changed(entity: &str, id: Uuid) -> LifecycleError {
    warn!("Links for {} {} changed before the lock was taken", entity, id);
    StoreError::Conflict(format!("links for {} {} changed concurrently", entity, id)).into()
}
