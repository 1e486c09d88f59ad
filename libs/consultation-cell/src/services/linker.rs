// libs/consultation-cell/src/services/linker.rs
use chrono::{DateTime, NaiveDate, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use appointment_cell::{AppointmentLifecycleService, AppointmentStatus};
use shared_database::StoreTx;
use shared_models::LifecycleError;

use crate::models::{Consultation, ConsultationNotes, APPOINTMENT_INDEX};

/// Ties an in-progress appointment to its single consultation record. Every
/// write requires the owning appointment's scope.
pub struct ConsultationLinker;

impl ConsultationLinker {
    pub async fn load(tx: &mut StoreTx, consultation_id: Uuid) -> Result<Consultation, LifecycleError> {
        tx.get::<Consultation>(consultation_id)
            .await?
            .ok_or_else(|| LifecycleError::not_found("consultation", consultation_id))
    }

    pub async fn for_appointment(
        tx: &mut StoreTx,
        appointment_id: Uuid,
    ) -> Result<Option<Consultation>, LifecycleError> {
        let found: Vec<Consultation> = tx.query(APPOINTMENT_INDEX, &appointment_id.to_string()).await?;
        Ok(found.into_iter().next())
    }

    pub async fn open(
        tx: &mut StoreTx,
        appointment_id: Uuid,
        start_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Consultation, LifecycleError> {
        Self::require_scope(tx, appointment_id)?;

        let appointment = AppointmentLifecycleService::load(tx, appointment_id).await?;
        if appointment.status() != AppointmentStatus::InProgress {
            warn!(
                "Refused consultation for appointment {} in status {}",
                appointment_id,
                appointment.status()
            );
            return Err(LifecycleError::PreconditionFailed(format!(
                "Appointment {} is {}, consultations need an in-progress appointment",
                appointment_id,
                appointment.status()
            )));
        }

        if let Some(existing) = Self::for_appointment(tx, appointment_id).await? {
            return Err(LifecycleError::PreconditionFailed(format!(
                "Appointment {} already has consultation {}",
                appointment_id,
                existing.id()
            )));
        }

        if start_time < appointment.scheduled_start_time() {
            return Err(LifecycleError::Validation(format!(
                "Consultation start {} precedes the scheduled time {}",
                start_time,
                appointment.scheduled_start_time()
            )));
        }

        let consultation = Consultation::open(appointment_id, start_time, now);
        tx.put(&consultation).await?;

        info!("Opened consultation {} for appointment {}", consultation.id(), appointment_id);
        Ok(consultation)
    }

    pub async fn close(
        tx: &mut StoreTx,
        consultation_id: Uuid,
        end_time: DateTime<Utc>,
        end_day: NaiveDate,
        notes: ConsultationNotes,
        now: DateTime<Utc>,
    ) -> Result<Consultation, LifecycleError> {
        let current = Self::load(tx, consultation_id).await?;
        Self::require_scope(tx, current.appointment_id())?;

        let closed = current.close(end_time, end_day, notes, now)?;
        tx.put(&closed).await?;

        info!(
            "Closed consultation {} for appointment {}",
            consultation_id,
            closed.appointment_id()
        );
        Ok(closed)
    }

    pub async fn amend(
        tx: &mut StoreTx,
        consultation_id: Uuid,
        notes: ConsultationNotes,
        now: DateTime<Utc>,
    ) -> Result<Consultation, LifecycleError> {
        let current = Self::load(tx, consultation_id).await?;
        Self::require_scope(tx, current.appointment_id())?;

        let amended = current.amend(notes, now);
        tx.put(&amended).await?;

        info!("Amended notes on consultation {}", consultation_id);
        Ok(amended)
    }

    fn require_scope(tx: &StoreTx, appointment_id: Uuid) -> Result<(), LifecycleError> {
        if tx.holds(&AppointmentLifecycleService::appointment_scope(appointment_id)) {
            Ok(())
        } else {
            Err(LifecycleError::Storage(format!(
                "consultation write for appointment {} outside its scope",
                appointment_id
            )))
        }
    }
}
