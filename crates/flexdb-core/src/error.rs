use thiserror::Error;

/// Coarse classification handed to protocol front ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing or invalid required field. Caller error.
    Validation,
    /// Referenced entity or relation absent.
    NotFound,
    /// Uniqueness violation or dependents still present.
    Conflict,
    /// Database unavailable, migration failure, unexpected driver error.
    Internal,
}

/// Top-level error type for flexdb operations.
#[derive(Error, Debug)]
pub enum FlexError {
    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("Conflict on {entity}: {message}")]
    Conflict { entity: String, message: String },

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FlexError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    pub fn conflict(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Conflict {
            entity: entity.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::DeadlineExceeded | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Message safe to return to a caller.
    ///
    /// Internal failures are collapsed to an opaque string so storage
    /// details never leave the process; log the full error instead.
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::Internal => "internal error".to_string(),
            _ => self.to_string(),
        }
    }
}

pub type FlexResult<T> = std::result::Result<T, FlexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_variants() {
        assert_eq!(FlexError::validation("x").kind(), ErrorKind::Validation);
        assert_eq!(FlexError::not_found("node", "1").kind(), ErrorKind::NotFound);
        assert_eq!(
            FlexError::conflict("tenant", "slug taken").kind(),
            ErrorKind::Conflict
        );
        assert_eq!(FlexError::DeadlineExceeded.kind(), ErrorKind::Internal);
        assert_eq!(
            FlexError::Internal("boom".into()).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn internal_errors_are_opaque() {
        let err = FlexError::Internal("connection refused at 10.0.0.3:5432".into());
        assert_eq!(err.public_message(), "internal error");
        assert!(err.to_string().contains("10.0.0.3"));
    }

    #[test]
    fn caller_errors_are_verbatim() {
        let err = FlexError::validation("slug is required");
        assert_eq!(err.public_message(), "Validation error: slug is required");

        let err = FlexError::not_found("node_type", "abc");
        assert_eq!(err.public_message(), "node_type not found: abc");
    }
}
