// libs/appointment-cell/src/models.rs
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared_database::{IndexEntry, Record};
use shared_models::LifecycleError;

pub const DOCTOR_INDEX: &str = "doctor_id";
pub const PATIENT_INDEX: &str = "patient_id";

pub use shared_config::MAX_SLOT_DURATION_MINUTES as MAX_SLOT_MINUTES;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    id: Uuid,
    patient_id: Uuid,
    doctor_id: Uuid,
    branch_id: Uuid,
    appointment_date: DateTime<Utc>,
    duration_minutes: i64,
    status: AppointmentStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Appointment {
    /// Builds a SCHEDULED appointment. Rejects a start time already behind `now`
    /// and a slot that would end past the last representable instant.
    pub fn schedule(
        patient_id: Uuid,
        doctor_id: Uuid,
        branch_id: Uuid,
        appointment_date: DateTime<Utc>,
        duration_minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<Self, LifecycleError> {
        if duration_minutes <= 0 || duration_minutes > MAX_SLOT_MINUTES {
            return Err(LifecycleError::Validation(format!(
                "Appointment duration must be between 1 and {} minutes, got {}",
                MAX_SLOT_MINUTES, duration_minutes
            )));
        }
        if appointment_date < now {
            return Err(LifecycleError::Validation(
                "Appointment must be scheduled for a future time".to_string(),
            ));
        }
        if slot_end(appointment_date, duration_minutes).is_none() {
            return Err(LifecycleError::Validation(format!(
                "Appointment at {} ends beyond the supported calendar",
                appointment_date
            )));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            patient_id,
            doctor_id,
            branch_id,
            appointment_date,
            duration_minutes,
            status: AppointmentStatus::Scheduled,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn patient_id(&self) -> Uuid {
        self.patient_id
    }

    pub fn doctor_id(&self) -> Uuid {
        self.doctor_id
    }

    pub fn branch_id(&self) -> Uuid {
        self.branch_id
    }

    pub fn status(&self) -> AppointmentStatus {
        self.status
    }

    pub fn duration_minutes(&self) -> i64 {
        self.duration_minutes
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn scheduled_start_time(&self) -> DateTime<Utc> {
        self.appointment_date
    }

    pub fn scheduled_end_time(&self) -> DateTime<Utc> {
        slot_end(self.appointment_date, self.duration_minutes).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Returns the appointment in state `target`, or the reason it cannot get there.
    ///
    /// NO_SHOW is only reachable once the scheduled start has passed.
    pub fn advance(&self, target: AppointmentStatus, at: DateTime<Utc>) -> Result<Appointment, LifecycleError> {
        if !self.status.can_transition_to(&target) {
            return Err(LifecycleError::invalid_transition("appointment", self.status, target));
        }

        if target == AppointmentStatus::NoShow && at < self.appointment_date {
            return Err(LifecycleError::PreconditionFailed(format!(
                "Appointment {} cannot be marked no-show before its scheduled time {}",
                self.id, self.appointment_date
            )));
        }

        Ok(Appointment {
            status: target,
            updated_at: at,
            ..self.clone()
        })
    }
}

/// End of the half-open slot `[start, start + duration)`, or `None` when it
/// overflows the calendar.
pub fn slot_end(start: DateTime<Utc>, duration_minutes: i64) -> Option<DateTime<Utc>> {
    if !(0..=MAX_SLOT_MINUTES).contains(&duration_minutes) {
        return None;
    }
    start.checked_add_signed(Duration::minutes(duration_minutes))
}

impl Record for Appointment {
    const COLLECTION: &'static str = "appointments";

    fn record_id(&self) -> Uuid {
        self.id
    }

    fn index_entries(&self) -> Vec<IndexEntry> {
        vec![
            IndexEntry::lookup(DOCTOR_INDEX, self.doctor_id),
            IndexEntry::lookup(PATIENT_INDEX, self.patient_id),
        ]
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Scheduled => write!(f, "scheduled"),
            AppointmentStatus::Confirmed => write!(f, "confirmed"),
            AppointmentStatus::InProgress => write!(f, "in_progress"),
            AppointmentStatus::Completed => write!(f, "completed"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
            AppointmentStatus::NoShow => write!(f, "no_show"),
        }
    }
}

impl AppointmentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Cancelled | AppointmentStatus::NoShow
        )
    }

    /// Statuses that still hold a slot on the doctor's calendar.
    pub fn occupies_slot(&self) -> bool {
        !matches!(self, AppointmentStatus::Cancelled | AppointmentStatus::NoShow)
    }

    /// Booked but not yet checked in.
    pub fn is_pending_check_in(&self) -> bool {
        matches!(self, AppointmentStatus::Scheduled | AppointmentStatus::Confirmed)
    }

    pub fn allowed_targets(&self) -> &'static [AppointmentStatus] {
        use AppointmentStatus::*;
        match self {
            Scheduled => &[Confirmed, InProgress, Cancelled, NoShow],
            Confirmed => &[InProgress, Cancelled, NoShow],
            InProgress => &[Completed],
            // Terminal states - no transitions allowed
            Completed | Cancelled | NoShow => &[],
        }
    }

    pub fn can_transition_to(&self, target: &AppointmentStatus) -> bool {
        self.allowed_targets().contains(target)
    }
}

// ==============================================================================
// CONFLICT DETECTION MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictCheckResponse {
    pub has_conflict: bool,
    pub conflicting_appointments: Vec<Appointment>,
}
