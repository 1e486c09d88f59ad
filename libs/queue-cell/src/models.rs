// libs/queue-cell/src/models.rs
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared_database::{IndexEntry, Record};
use shared_models::LifecycleError;

pub const BRANCH_DAY_INDEX: &str = "branch_day";
pub const PATIENT_INDEX: &str = "patient_id";
pub const APPOINTMENT_INDEX: &str = "appointment_id";
pub const TICKET_NUMBER_INDEX: &str = "ticket_number";

pub fn branch_day_key(branch_id: Uuid, day: NaiveDate) -> String {
    format!("{}:{}", branch_id, day)
}

// ==============================================================================
// QUEUE STATUS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Waiting,
    Called,
    Served,
    Cancelled,
    NoShow,
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueStatus::Waiting => write!(f, "waiting"),
            QueueStatus::Called => write!(f, "called"),
            QueueStatus::Served => write!(f, "served"),
            QueueStatus::Cancelled => write!(f, "cancelled"),
            QueueStatus::NoShow => write!(f, "no_show"),
        }
    }
}

impl QueueStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueStatus::Served | QueueStatus::Cancelled | QueueStatus::NoShow)
    }

    pub fn allowed_targets(&self) -> &'static [QueueStatus] {
        use QueueStatus::*;
        match self {
            Waiting => &[Called, Cancelled, NoShow],
            Called => &[Served, NoShow],
            Served | Cancelled | NoShow => &[],
        }
    }

    pub fn can_transition_to(&self, target: &QueueStatus) -> bool {
        self.allowed_targets().contains(target)
    }
}

// ==============================================================================
// QUEUE TICKET
// ==============================================================================

/// A numbered walk-in slot in one branch's queue for one clinic day.
///
/// Tickets are only created by the allocator and only change through
/// [`QueueTicket::advance`], which hands back a new value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueTicket {
    id: Uuid,
    branch_id: Uuid,
    patient_id: Uuid,
    appointment_id: Option<Uuid>,
    ticket_number: u32,
    queue_date: NaiveDate,
    status: QueueStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl QueueTicket {
    pub(crate) fn issue(
        branch_id: Uuid,
        patient_id: Uuid,
        appointment_id: Option<Uuid>,
        ticket_number: u32,
        queue_date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            branch_id,
            patient_id,
            appointment_id,
            ticket_number,
            queue_date,
            status: QueueStatus::Waiting,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn branch_id(&self) -> Uuid {
        self.branch_id
    }

    pub fn patient_id(&self) -> Uuid {
        self.patient_id
    }

    pub fn appointment_id(&self) -> Option<Uuid> {
        self.appointment_id
    }

    pub fn ticket_number(&self) -> u32 {
        self.ticket_number
    }

    pub fn queue_date(&self) -> NaiveDate {
        self.queue_date
    }

    pub fn status(&self) -> QueueStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Validates `target` against the transition table and returns the ticket
    /// in its new state. `self` is left untouched on failure.
    pub fn advance(&self, target: QueueStatus, at: DateTime<Utc>) -> Result<QueueTicket, LifecycleError> {
        if !self.status.can_transition_to(&target) {
            return Err(LifecycleError::invalid_transition("queue ticket", self.status, target));
        }

        Ok(QueueTicket {
            status: target,
            updated_at: at,
            ..self.clone()
        })
    }
}

impl Record for QueueTicket {
    const COLLECTION: &'static str = "queue_tickets";

    fn record_id(&self) -> Uuid {
        self.id
    }

    fn index_entries(&self) -> Vec<IndexEntry> {
        let branch_day = branch_day_key(self.branch_id, self.queue_date);
        let mut entries = vec![
            IndexEntry::unique(TICKET_NUMBER_INDEX, format!("{}:{}", branch_day, self.ticket_number)),
            IndexEntry::lookup(BRANCH_DAY_INDEX, branch_day),
            IndexEntry::lookup(PATIENT_INDEX, self.patient_id),
        ];
        if let Some(appointment_id) = self.appointment_id {
            entries.push(IndexEntry::lookup(APPOINTMENT_INDEX, appointment_id));
        }
        entries
    }
}
