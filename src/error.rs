/// Error taxonomy shared by every core service.
///
/// `Validation` and `NotFound` never mutate state. `InvalidTransition`
/// signals a caller defect and aborts the whole operation.
/// `ConcurrencyConflict` is retry-safe: replays are absorbed by the
/// submission idempotency ledger.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("invalid transition: task {task_id} is {status}, cannot {action}")]
    InvalidTransition {
        task_id: String,
        status: String,
        action: &'static str,
    },

    #[error("concurrent update on {kind} {id}, retry")]
    ConcurrencyConflict { kind: &'static str, id: String },

    #[error("collaborator unavailable: {0}")]
    CollaboratorUnavailable(&'static str),

    #[error("corrupt stored payload: {0}")]
    CorruptPayload(#[from] serde_json::Error),

    #[error(transparent)]
    Storage(#[from] sqlx::Error),
}

impl CoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
