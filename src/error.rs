use sled::transaction::TransactionError;
use std::time::Duration;

pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Every rejected operation surfaces one of these kinds so the caller can tell
/// "fix your input", "you lack permission", "state changed" and "try again" apart.
#[derive(thiserror::Error, Debug)]
pub enum WorkflowError {
    #[error("invalid input: {0}")]
    Validation(#[from] ValidationError),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("cannot {action} while status is {status}")]
    InvalidState { action: &'static str, status: String },
    #[error("{approver_id} has already approved requisition {requisition_id}")]
    AlreadyApproved {
        requisition_id: String,
        approver_id: String,
    },
    #[error("transaction conflict: {0}")]
    Conflict(String),
    #[error("transaction did not commit within {0:?}")]
    Timeout(Duration),
    #[error("storage failure: {0}")]
    Storage(#[from] sled::Error),
    #[error("record encoding failed: {0}")]
    Encoding(String),
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("{field} must be between {min} and {max} characters")]
    Length {
        field: &'static str,
        min: usize,
        max: usize,
    },
    #[error("quantity must be at least 1")]
    Quantity,
    #[error("line item {index}: {reason}")]
    LineItem { index: usize, reason: &'static str },
    #[error("minimum required approvals must be at least 1")]
    ApprovalThreshold,
    #[error("invoice total is lower than its amount")]
    InvoiceTotal,
}

impl WorkflowError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn invalid_state(action: &'static str, status: impl ToString) -> Self {
        Self::InvalidState {
            action,
            status: status.to_string(),
        }
    }

    /// Transient failures; the whole operation may be retried from scratch.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_) | Self::Timeout(_))
    }
}

impl From<TransactionError<WorkflowError>> for WorkflowError {
    fn from(value: TransactionError<WorkflowError>) -> Self {
        match value {
            TransactionError::Abort(e) => e,
            TransactionError::Storage(e) => WorkflowError::Storage(e),
        }
    }
}

impl From<minicbor::decode::Error> for WorkflowError {
    fn from(value: minicbor::decode::Error) -> Self {
        WorkflowError::Encoding(value.to_string())
    }
}

impl<E: std::fmt::Display> From<minicbor::encode::Error<E>> for WorkflowError {
    fn from(value: minicbor::encode::Error<E>) -> Self {
        WorkflowError::Encoding(value.to_string())
    }
}
