//! Bounded repair-and-retry execution
//!
//! A failed operation is retried on a fresh connection, sequentially, up to
//! a fixed attempt budget. Only transient connection faults are retried;
//! statement rejections cannot succeed on retry and surface immediately.

use futures::future::BoxFuture;

use crate::database::traits::DatabaseError;

/// Total attempt budget per logical call (one initial try plus two repairs).
pub const MAX_ATTEMPTS: u32 = 3;

/// Run `op` until it succeeds or the attempt budget is exhausted.
///
/// Each invocation of `op` is expected to obtain a healthy connection on its
/// own (pooled backends pre-ping; the SQL Server service discards a broken
/// client before reporting a transient error, so the next attempt
/// reconnects). Retried failures are logged so no earlier cause is lost; the
/// final failure is surfaced unmodified.
pub async fn execute_with_repair<'a, T>(
    mut op: impl FnMut() -> BoxFuture<'a, Result<T, DatabaseError>>,
) -> Result<T, DatabaseError> {
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_transient() && attempt < MAX_ATTEMPTS => {
                tracing::warn!(attempt, %error, "transient database error, retrying on a fresh connection");
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use futures::FutureExt;

    use super::*;

    #[tokio::test]
    async fn surfaces_last_error_after_budget_exhaustion() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let result = execute_with_repair(move || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                Err::<(), _>(DatabaseError::Connection(format!("refused on attempt {n}")))
            }
            .boxed()
        })
        .await;

        assert_eq!(attempts.load(Ordering::SeqCst), MAX_ATTEMPTS);
        match result {
            Err(DatabaseError::Connection(message)) => {
                assert_eq!(message, "refused on attempt 3");
            }
            other => panic!("expected connection error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn recovers_when_a_retry_succeeds() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let result = execute_with_repair(move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(DatabaseError::Connection("reset by peer".to_string()))
                } else {
                    Ok(42)
                }
            }
            .boxed()
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn query_rejections_are_not_retried() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let result = execute_with_repair(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(DatabaseError::Query("syntax error".to_string()))
            }
            .boxed()
        })
        .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(DatabaseError::Query(_))));
    }
}
