//! Error helpers shared by the entity services.

use flexdb_core::{ErrorKind, FlexError, FlexResult};
use flexdb_store::StoreResult;

/// Convert storage results into the caller-facing taxonomy, logging
/// internal failures in full before they are returned opaquely.
pub(crate) trait StoreResultExt<T> {
    fn during(self, operation: &'static str) -> FlexResult<T>;
}

impl<T> StoreResultExt<T> for StoreResult<T> {
    fn during(self, operation: &'static str) -> FlexResult<T> {
        self.map_err(|e| {
            let err = FlexError::from(e);
            if err.kind() == ErrorKind::Internal {
                tracing::error!(operation, error = %err, "Storage failure");
            }
            err
        })
    }
}

/// Reject a missing or blank required field.
pub(crate) fn require(value: &str, field: &'static str) -> FlexResult<()> {
    if value.trim().is_empty() {
        return Err(FlexError::validation(format!("{field} is required")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flexdb_store::StoreError;

    #[test]
    fn test_require() {
        assert!(require("acme", "slug").is_ok());
        let err = require("  ", "slug").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("slug is required"));
    }

    #[test]
    fn test_during_classifies() {
        let res: StoreResult<()> = Err(StoreError::not_found("node", "n1"));
        assert_eq!(res.during("get_node").unwrap_err().kind(), ErrorKind::NotFound);

        let res: StoreResult<()> = Err(StoreError::Database(sqlx::Error::PoolClosed));
        let err = res.during("get_node").unwrap_err();
        assert_eq!(err.public_message(), "internal error");
    }
}
