use thiserror::Error;

/// Failure taxonomy shared by the ticketing, appointment and consultation engines.
///
/// Only [`LifecycleError::StoreUnavailable`] is worth retrying; every other
/// variant describes a request that cannot succeed against the current state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid {entity} status transition from {from} to {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Record store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Record store error: {0}")]
    Storage(String),
}

impl LifecycleError {
    pub fn invalid_transition(
        entity: &'static str,
        from: impl ToString,
        to: impl ToString,
    ) -> Self {
        LifecycleError::InvalidTransition {
            entity,
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        LifecycleError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, LifecycleError::StoreUnavailable(_))
    }
}
