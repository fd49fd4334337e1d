//! Error types for the tool gate.
//!
//! Denials and approval requirements are not errors; they are
//! [`PolicyCheckResult`](crate::PolicyCheckResult) values. Errors here come
//! from the once-only transition handlers.

use thiserror::Error;

/// Errors that can occur in gate operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    #[error("idempotency entry expired while waiting: {key}")]
    IdempotencyExpired { key: String },
    #[error("timed out after {waited_ms}ms waiting for in-flight operation: {key}")]
    IdempotencyTimeout { key: String, waited_ms: u64 },
    #[error("operation {key} failed: {message}")]
    OperationFailed { key: String, message: String },
}

impl GateError {
    /// Whether retrying the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::IdempotencyExpired { .. } | Self::IdempotencyTimeout { .. }
        )
    }
}

/// Convenience result type for gate operations.
pub type GateResult<T> = Result<T, GateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_waiting_errors_are_retryable() {
        assert!(GateError::IdempotencyExpired { key: "k".into() }.is_retryable());
        assert!(
            GateError::IdempotencyTimeout {
                key: "k".into(),
                waited_ms: 10
            }
            .is_retryable()
        );
        let failed = GateError::OperationFailed {
            key: "task:abc".into(),
            message: "quota exceeded".into(),
        };
        assert!(!failed.is_retryable());
        assert_eq!(failed.to_string(), "operation task:abc failed: quota exceeded");
    }
}
