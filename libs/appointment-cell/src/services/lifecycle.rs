// libs/appointment-cell/src/services/lifecycle.rs
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_database::{ScopeKey, StoreTx};
use shared_models::LifecycleError;

use crate::models::{Appointment, AppointmentStatus, DOCTOR_INDEX, PATIENT_INDEX};

pub struct AppointmentLifecycleService;

impl AppointmentLifecycleService {
    pub fn appointment_scope(appointment_id: Uuid) -> ScopeKey {
        ScopeKey::new("appointment", appointment_id)
    }

    /// Validate that a status transition is allowed
    pub fn validate_status_transition(
        current_status: &AppointmentStatus,
        new_status: &AppointmentStatus,
    ) -> Result<(), LifecycleError> {
        debug!("Validating status transition from {} to {}", current_status, new_status);

        if !current_status.can_transition_to(new_status) {
            warn!("Invalid status transition attempted: {} -> {}", current_status, new_status);
            return Err(LifecycleError::invalid_transition("appointment", current_status, new_status));
        }

        Ok(())
    }

    /// Get all valid next statuses for a given current status
    pub fn get_valid_transitions(current_status: &AppointmentStatus) -> Vec<AppointmentStatus> {
        current_status.allowed_targets().to_vec()
    }

    pub async fn load(tx: &mut StoreTx, appointment_id: Uuid) -> Result<Appointment, LifecycleError> {
        tx.get::<Appointment>(appointment_id)
            .await?
            .ok_or_else(|| LifecycleError::not_found("appointment", appointment_id))
    }

    /// Moves a stored appointment to `target` and stages the write. Requires the
    /// transaction to hold the appointment's scope.
    pub async fn advance(
        tx: &mut StoreTx,
        appointment_id: Uuid,
        target: AppointmentStatus,
        at: DateTime<Utc>,
    ) -> Result<Appointment, LifecycleError> {
        if !tx.holds(&Self::appointment_scope(appointment_id)) {
            return Err(LifecycleError::Storage(format!(
                "appointment {} advanced outside its scope",
                appointment_id
            )));
        }

        let current = Self::load(tx, appointment_id).await?;
        Self::validate_status_transition(&current.status(), &target)?;
        let next = current.advance(target, at)?;

        tx.put(&next).await?;

        info!(
            "Appointment {} moved {} -> {}",
            appointment_id,
            current.status(),
            next.status()
        );
        Ok(next)
    }

    /// Appointments for a doctor starting in `[start, end)`, earliest first.
    pub async fn appointments_for_doctor_in_range(
        tx: &mut StoreTx,
        doctor_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, LifecycleError> {
        if start >= end {
            return Err(LifecycleError::Validation(format!(
                "Range start {} must precede range end {}",
                start, end
            )));
        }

        let mut appointments: Vec<Appointment> = tx
            .query::<Appointment>(DOCTOR_INDEX, &doctor_id.to_string())
            .await?
            .into_iter()
            .filter(|a| a.scheduled_start_time() >= start && a.scheduled_start_time() < end)
            .collect();
        appointments.sort_by_key(Appointment::scheduled_start_time);

        debug!(
            "Doctor {} has {} appointments between {} and {}",
            doctor_id,
            appointments.len(),
            start,
            end
        );
        Ok(appointments)
    }

    /// Every appointment a patient has booked, earliest first.
    pub async fn appointments_for_patient(
        tx: &mut StoreTx,
        patient_id: Uuid,
    ) -> Result<Vec<Appointment>, LifecycleError> {
        let mut appointments: Vec<Appointment> = tx.query(PATIENT_INDEX, &patient_id.to_string()).await?;
        appointments.sort_by_key(Appointment::scheduled_start_time);
        Ok(appointments)
    }

    /// A patient's booked, not yet checked-in appointments at a branch starting in `[start, end)`.
    pub async fn pending_check_in_for_patient(
        tx: &mut StoreTx,
        patient_id: Uuid,
        branch_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, LifecycleError> {
        let appointments = Self::appointments_for_patient(tx, patient_id).await?;
        Ok(appointments
            .into_iter()
            .filter(|a| a.branch_id() == branch_id)
            .filter(|a| a.status().is_pending_check_in())
            .filter(|a| a.scheduled_start_time() >= start && a.scheduled_start_time() < end)
            .collect())
    }
}
