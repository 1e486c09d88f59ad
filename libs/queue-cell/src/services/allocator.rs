// libs/queue-cell/src/services/allocator.rs
use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use shared_database::{ScopeKey, StoreTx};
use shared_models::LifecycleError;

use crate::models::{branch_day_key, QueueTicket, BRANCH_DAY_INDEX};

/// Hands out per-branch, per-day ticket numbers.
///
/// Numbering is gapless because the read of the current maximum and the write
/// of the new ticket happen in one transaction that holds the sequence scope.
pub struct TicketAllocator;

impl TicketAllocator {
    pub fn sequence_scope(branch_id: Uuid, day: NaiveDate) -> ScopeKey {
        ScopeKey::new("ticket-seq", branch_day_key(branch_id, day))
    }

    /// Smallest positive number not yet issued for `(branch_id, day)`.
    pub async fn allocate_ticket_number(
        tx: &mut StoreTx,
        branch_id: Uuid,
        day: NaiveDate,
    ) -> Result<u32, LifecycleError> {
        if !tx.holds(&Self::sequence_scope(branch_id, day)) {
            return Err(LifecycleError::Storage(format!(
                "ticket allocation for branch {} on {} outside its sequence scope",
                branch_id, day
            )));
        }

        let issued: Vec<QueueTicket> = tx.query(BRANCH_DAY_INDEX, &branch_day_key(branch_id, day)).await?;
        let current_max = issued.iter().map(QueueTicket::ticket_number).max().unwrap_or(0);

        let next = current_max.checked_add(1).ok_or_else(|| {
            LifecycleError::PreconditionFailed(format!("ticket numbers exhausted for branch {} on {}", branch_id, day))
        })?;

        debug!("Next ticket number for branch {} on {} is {}", branch_id, day, next);
        Ok(next)
    }

    /// Allocates a number and stages the new WAITING ticket in the same transaction.
    pub async fn issue_ticket(
        tx: &mut StoreTx,
        branch_id: Uuid,
        patient_id: Uuid,
        appointment_id: Option<Uuid>,
        day: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<QueueTicket, LifecycleError> {
        let number = Self::allocate_ticket_number(tx, branch_id, day).await?;
        let ticket = QueueTicket::issue(branch_id, patient_id, appointment_id, number, day, now);

        tx.put(&ticket).await?;

        info!(
            "Issued ticket #{} for patient {} at branch {} on {}",
            number, patient_id, branch_id, day
        );
        Ok(ticket)
    }
}
