//! Deadline support for long-running operations.
//!
//! Every flexdb operation is an ordinary future: dropping it cancels the
//! in-flight database call and returns the connection to its pool. This
//! module adds an absolute deadline on top of that.

use std::future::Future;

use tokio::time::Instant;

use crate::error::{FlexError, FlexResult};

/// Run `op`, failing with [`FlexError::DeadlineExceeded`] once `deadline`
/// passes. `None` runs without a bound.
pub async fn with_deadline<T, F>(deadline: Option<Instant>, op: F) -> FlexResult<T>
where
    F: Future<Output = FlexResult<T>>,
{
    match deadline {
        Some(at) => match tokio::time::timeout_at(at, op).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("Operation abandoned at deadline");
                Err(FlexError::DeadlineExceeded)
            }
        },
        None => op.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn completes_before_deadline() {
        let at = Instant::now() + Duration::from_secs(5);
        let value = with_deadline(Some(at), async { Ok::<_, FlexError>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn expired_deadline_cancels() {
        let at = Instant::now() + Duration::from_millis(10);
        let result = with_deadline(Some(at), async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<_, FlexError>(())
        })
        .await;
        assert!(matches!(result, Err(FlexError::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn no_deadline_passes_errors_through() {
        let result: FlexResult<()> =
            with_deadline(None, async { Err(FlexError::validation("name is required")) }).await;
        assert!(matches!(result, Err(FlexError::Validation { .. })));
    }
}
