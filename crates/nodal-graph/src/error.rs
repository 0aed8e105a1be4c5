//! Error taxonomy of the graph client.

use nodal_core::{CoreError, EntityKind, Identity};

use crate::session::{RemoteError, RemoteErrorKind};

/// Errors from graph operations.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Not found: {0}")]
    NotFound(String),

    /// The whole transaction may be retried.
    #[error("Retryable error {code}: {message}")]
    Retryable { code: String, message: String },

    #[error("Network unavailable: {0}")]
    Network(String),

    #[error("Constraint violation {code}: {message}")]
    ConstraintViolation { code: String, message: String },

    #[error("Data format error {code}: {message}")]
    DataFormat { code: String, message: String },

    #[error("Client error {code}: {message}")]
    UnknownClient { code: String, message: String },

    #[error("Database error {code}: {message}")]
    UnknownDatabase { code: String, message: String },

    #[error("Not in transaction: {0}")]
    NotInTransaction(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl GraphError {
    pub fn entity_not_found(kind: EntityKind, identity: Identity) -> Self {
        Self::NotFound(format!("{kind} with id {identity}"))
    }

    pub fn data_format(message: impl Into<String>) -> Self {
        Self::DataFormat {
            code: String::new(),
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<RemoteError> for GraphError {
    fn from(err: RemoteError) -> Self {
        let RemoteError {
            kind,
            code,
            message,
        } = err;
        match kind {
            RemoteErrorKind::Transient => Self::Retryable { code, message },
            RemoteErrorKind::Network => Self::Network(message),
            RemoteErrorKind::ConstraintViolation => Self::ConstraintViolation { code, message },
            RemoteErrorKind::DataFormat => Self::DataFormat { code, message },
            RemoteErrorKind::Database => Self::UnknownDatabase { code, message },
            RemoteErrorKind::Client | RemoteErrorKind::Unknown => {
                Self::UnknownClient { code, message }
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, GraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_errors_translate_by_kind() {
        let err = GraphError::from(RemoteError::from_code(
            "Neo.TransientError.Transaction.DeadlockDetected",
            "deadlock",
        ));
        assert!(err.is_retryable());

        let err = GraphError::from(RemoteError::network("connection refused"));
        assert!(matches!(err, GraphError::Network(ref m) if m == "connection refused"));

        let err = GraphError::from(RemoteError::from_code(
            "Neo.ClientError.Schema.ConstraintValidationFailed",
            "exists",
        ));
        assert!(matches!(err, GraphError::ConstraintViolation { .. }));

        let err = GraphError::from(RemoteError::from_code(
            "Neo.DatabaseError.Statement.ExecutionFailed",
            "boom",
        ));
        assert!(matches!(err, GraphError::UnknownDatabase { ref code, .. } if code.ends_with("ExecutionFailed")));

        let err = GraphError::from(RemoteError::from_code("Neo.ClientError.Statement.SyntaxError", "bad"));
        assert!(matches!(err, GraphError::UnknownClient { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_not_found_message() {
        let err = GraphError::entity_not_found(EntityKind::Node, Identity(9));
        assert_eq!(err.to_string(), "Not found: node with id 9");
        assert!(err.is_not_found());
    }
}
