// libs/queue-cell/src/services/state_machine.rs
use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_database::{ScopeKey, StoreTx};
use shared_models::LifecycleError;

use crate::models::{
    branch_day_key, QueueStatus, QueueTicket, APPOINTMENT_INDEX, BRANCH_DAY_INDEX, PATIENT_INDEX,
};

pub struct QueueStateMachine;

impl QueueStateMachine {
    pub fn ticket_scope(ticket_id: Uuid) -> ScopeKey {
        ScopeKey::new("ticket", ticket_id)
    }

    pub async fn load(tx: &mut StoreTx, ticket_id: Uuid) -> Result<QueueTicket, LifecycleError> {
        tx.get::<QueueTicket>(ticket_id)
            .await?
            .ok_or_else(|| LifecycleError::not_found("queue ticket", ticket_id))
    }

    /// Moves a stored ticket to `target` and stages the write. Requires the
    /// transaction to hold the ticket's scope.
    pub async fn advance(
        tx: &mut StoreTx,
        ticket_id: Uuid,
        target: QueueStatus,
        at: DateTime<Utc>,
    ) -> Result<QueueTicket, LifecycleError> {
        if !tx.holds(&Self::ticket_scope(ticket_id)) {
            return Err(LifecycleError::Storage(format!(
                "ticket {} advanced outside its scope",
                ticket_id
            )));
        }

        let current = Self::load(tx, ticket_id).await?;
        let next = current.advance(target, at).map_err(|e| {
            warn!("Rejected ticket {} transition {} -> {}", ticket_id, current.status(), target);
            e
        })?;

        tx.put(&next).await?;

        info!(
            "Ticket #{} ({}) moved {} -> {}",
            next.ticket_number(),
            ticket_id,
            current.status(),
            next.status()
        );
        Ok(next)
    }

    /// Tickets pointing at an appointment, oldest first.
    pub async fn linked_to_appointment(
        tx: &mut StoreTx,
        appointment_id: Uuid,
    ) -> Result<Vec<QueueTicket>, LifecycleError> {
        let mut tickets: Vec<QueueTicket> = tx.query(APPOINTMENT_INDEX, &appointment_id.to_string()).await?;
        tickets.sort_by_key(|t| t.created_at());
        Ok(tickets)
    }

    /// One branch's queue for a day in ticket-number order.
    pub async fn for_branch_day(
        tx: &mut StoreTx,
        branch_id: Uuid,
        day: NaiveDate,
    ) -> Result<Vec<QueueTicket>, LifecycleError> {
        let mut tickets: Vec<QueueTicket> = tx.query(BRANCH_DAY_INDEX, &branch_day_key(branch_id, day)).await?;
        tickets.sort_by_key(QueueTicket::ticket_number);
        debug!("Branch {} has {} tickets on {}", branch_id, tickets.len(), day);
        Ok(tickets)
    }

    /// Every ticket a patient has held, newest first.
    pub async fn for_patient(tx: &mut StoreTx, patient_id: Uuid) -> Result<Vec<QueueTicket>, LifecycleError> {
        let mut tickets: Vec<QueueTicket> = tx.query(PATIENT_INDEX, &patient_id.to_string()).await?;
        tickets.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        Ok(tickets)
    }
}
