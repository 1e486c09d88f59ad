// libs/consultation-cell/src/models.rs
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared_database::{IndexEntry, Record};
use shared_models::LifecycleError;

pub const APPOINTMENT_INDEX: &str = "appointment_id";

/// Clinical record for one appointment. Opened when the doctor starts seeing
/// the patient and closed with its notes once the visit ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consultation {
    id: Uuid,
    appointment_id: Uuid,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    diagnosis: Option<String>,
    treatment_plan: Option<String>,
    prescription: Option<String>,
    follow_up_date: Option<NaiveDate>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Free-text outcome of a visit. `None` fields are left as they are.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsultationNotes {
    pub diagnosis: Option<String>,
    pub treatment_plan: Option<String>,
    pub prescription: Option<String>,
    pub follow_up_date: Option<NaiveDate>,
}

impl Consultation {
    pub(crate) fn open(appointment_id: Uuid, start_time: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            appointment_id,
            start_time,
            end_time: None,
            diagnosis: None,
            treatment_plan: None,
            prescription: None,
            follow_up_date: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn appointment_id(&self) -> Uuid {
        self.appointment_id
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    pub fn diagnosis(&self) -> Option<&str> {
        self.diagnosis.as_deref()
    }

    pub fn treatment_plan(&self) -> Option<&str> {
        self.treatment_plan.as_deref()
    }

    pub fn prescription(&self) -> Option<&str> {
        self.prescription.as_deref()
    }

    pub fn follow_up_date(&self) -> Option<NaiveDate> {
        self.follow_up_date
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }

    /// Closes the record at `end_time` with the visit notes. `end_day` is the
    /// clinic calendar day containing `end_time`.
    pub fn close(
        &self,
        end_time: DateTime<Utc>,
        end_day: NaiveDate,
        notes: ConsultationNotes,
        now: DateTime<Utc>,
    ) -> Result<Consultation, LifecycleError> {
        if !self.is_open() {
            return Err(LifecycleError::PreconditionFailed(format!(
                "Consultation {} is already closed",
                self.id
            )));
        }

        if end_time < self.start_time {
            return Err(LifecycleError::Validation(format!(
                "Consultation end {} precedes its start {}",
                end_time, self.start_time
            )));
        }

        if let Some(follow_up) = notes.follow_up_date {
            if follow_up < end_day {
                return Err(LifecycleError::Validation(format!(
                    "Follow-up date {} precedes the consultation end day {}",
                    follow_up, end_day
                )));
            }
        }

        let amended = self.amend(notes, now);
        Ok(Consultation {
            end_time: Some(end_time),
            ..amended
        })
    }

    /// Overwrites every note field present in `notes`.
    pub fn amend(&self, notes: ConsultationNotes, now: DateTime<Utc>) -> Consultation {
        let current = self.clone();
        Consultation {
            diagnosis: notes.diagnosis.or(current.diagnosis),
            treatment_plan: notes.treatment_plan.or(current.treatment_plan),
            prescription: notes.prescription.or(current.prescription),
            follow_up_date: notes.follow_up_date.or(current.follow_up_date),
            updated_at: now,
            ..current
        }
    }
}

impl Record for Consultation {
    const COLLECTION: &'static str = "consultations";

    fn record_id(&self) -> Uuid {
        self.id
    }

    fn index_entries(&self) -> Vec<IndexEntry> {
        // at most one consultation per appointment
        vec![IndexEntry::unique(APPOINTMENT_INDEX, self.appointment_id)]
    }
}
