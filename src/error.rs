use crate::domain::actor::UserId;
use crate::domain::ids::PaymentId;
use crate::domain::payment::{Payment, PaymentStatus};
use crate::domain::request::RequestStatus;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("invalid transition from {from} to {to} by actor {actor}")]
    InvalidTransition {
        from: RequestStatus,
        to: RequestStatus,
        actor: UserId,
    },

    #[error("request has already been claimed")]
    AlreadyClaimed,

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// A second successful settlement was attempted. The payment that
    /// already settled the request is carried unchanged.
    #[error("request {} is already settled by payment {}", existing.request_id, existing.id)]
    DuplicateSettlement { existing: Box<Payment> },

    #[error("gateway verification failed for payment {payment_id}")]
    GatewayVerificationFailed { payment_id: PaymentId },

    #[error("payment {payment_id} is {status}, expected {expected}")]
    InvalidPaymentState {
        payment_id: PaymentId,
        status: PaymentStatus,
        expected: PaymentStatus,
    },

    /// The request moved on before work based on an earlier read of it ran.
    #[error("request {0} changed before its conversation was bound")]
    StaleRequest(String),

    #[error("conversation {0} is no longer active")]
    ConversationInactive(String),

    #[error("request {0} has already been reviewed")]
    ReviewExists(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    /// A precondition the engine itself is responsible for was violated.
    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("payment gateway error: {0}")]
    Gateway(String),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "storage-rocksdb")]
    #[error("RocksDB error: {0}")]
    RocksDB(#[from] rocksdb::Error),

    #[error("internal error: {0}")]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
}

impl DispatchError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Outcomes callers handle as ordinary control flow rather than failures.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            Self::AlreadyClaimed
                | Self::GatewayVerificationFailed { .. }
                | Self::StaleRequest(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_outcomes() {
        assert!(DispatchError::AlreadyClaimed.is_expected());
        assert!(
            DispatchError::GatewayVerificationFailed {
                payment_id: PaymentId::new()
            }
            .is_expected()
        );
        assert!(DispatchError::StaleRequest("r-1".to_string()).is_expected());
        assert!(!DispatchError::Unauthorized("nope".to_string()).is_expected());
        assert!(!DispatchError::not_found("request", "r-1").is_expected());
    }

    #[test]
    fn test_invalid_transition_message_names_states_and_actor() {
        let err = DispatchError::InvalidTransition {
            from: RequestStatus::Pending,
            to: RequestStatus::Completed,
            actor: UserId(7),
        };
        assert_eq!(
            err.to_string(),
            "invalid transition from pending to completed by actor 7"
        );
    }
}
