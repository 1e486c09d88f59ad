// libs/appointment-cell/src/services/conflict.rs
use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use shared_database::{ScopeKey, StoreTx};
use shared_models::LifecycleError;

use crate::models::{slot_end, Appointment, ConflictCheckResponse, DOCTOR_INDEX};

pub struct ConflictDetectionService;

impl ConflictDetectionService {
    /// Serializes bookings for one doctor so the overlap check and the insert
    /// see the same calendar.
    pub fn doctor_schedule_scope(doctor_id: Uuid) -> ScopeKey {
        ScopeKey::new("doctor-schedule", doctor_id)
    }

    /// Check for appointment conflicts for a doctor at a specific time
    pub async fn check_conflicts(
        tx: &mut StoreTx,
        doctor_id: Uuid,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        exclude_appointment_id: Option<Uuid>,
    ) -> Result<ConflictCheckResponse, LifecycleError> {
        debug!("Checking conflicts for doctor {} from {} to {}", doctor_id, start_time, end_time);

        let existing: Vec<Appointment> = tx.query(DOCTOR_INDEX, &doctor_id.to_string()).await?;

        let conflicting_appointments: Vec<Appointment> = existing
            .into_iter()
            .filter(|a| Some(a.id()) != exclude_appointment_id)
            // Only consider active appointments as conflicts
            .filter(|a| a.status().occupies_slot())
            .filter(|a| {
                Self::appointments_overlap(start_time, end_time, a.scheduled_start_time(), a.scheduled_end_time())
            })
            .collect();

        let has_conflict = !conflicting_appointments.is_empty();
        if has_conflict {
            warn!(
                "Conflict detected for doctor {} - {} conflicting appointments",
                doctor_id,
                conflicting_appointments.len()
            );
        }

        Ok(ConflictCheckResponse {
            has_conflict,
            conflicting_appointments,
        })
    }

    /// Fails with [`LifecycleError::Conflict`] when the doctor already holds an
    /// active slot overlapping `[start_time, start_time + duration)`.
    pub async fn ensure_slot_free(
        tx: &mut StoreTx,
        doctor_id: Uuid,
        start_time: DateTime<Utc>,
        duration_minutes: i64,
    ) -> Result<(), LifecycleError> {
        if !tx.holds(&Self::doctor_schedule_scope(doctor_id)) {
            return Err(LifecycleError::Storage(format!(
                "conflict check for doctor {} outside the schedule scope",
                doctor_id
            )));
        }

        let end_time = slot_end(start_time, duration_minutes).ok_or_else(|| {
            LifecycleError::Validation(format!(
                "Slot of {} minutes at {} ends beyond the supported calendar",
                duration_minutes, start_time
            ))
        })?;
        let response = Self::check_conflicts(tx, doctor_id, start_time, end_time, None).await?;

        match response.conflicting_appointments.first() {
            Some(existing) => Err(LifecycleError::Conflict(format!(
                "Doctor {} already has appointment {} from {} to {}",
                doctor_id,
                existing.id(),
                existing.scheduled_start_time(),
                existing.scheduled_end_time()
            ))),
            None => Ok(()),
        }
    }

    /// Half-open intervals: back-to-back slots do not overlap.
    pub fn appointments_overlap(
        start1: DateTime<Utc>,
        end1: DateTime<Utc>,
        start2: DateTime<Utc>,
        end2: DateTime<Utc>,
    ) -> bool {
        start1 < end2 && start2 < end1
    }
}
