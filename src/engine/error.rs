use thiserror::Error;
use ulid::Ulid;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: Ulid },

    #[error("conflict with appointment: {0}")]
    Conflict(Ulid),

    #[error("cannot {op} {entity} in status {from}")]
    InvalidTransition {
        entity: &'static str,
        from: &'static str,
        op: &'static str,
    },

    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),

    #[error("WAL error: {0}")]
    WalError(String),

    #[error("catalog error: {0}")]
    Catalog(String),
}

impl EngineError {
    pub fn not_found(kind: &'static str, id: Ulid) -> Self {
        EngineError::NotFound { kind, id }
    }

    /// Backing-store failures: logged, never detailed to callers.
    pub fn is_persistence(&self) -> bool {
        matches!(self, EngineError::WalError(_) | EngineError::Catalog(_))
    }
}
