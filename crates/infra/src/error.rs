use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use warden_auth::AuthError;

/// Infrastructure operation error (stores, caches).
///
/// Cloneable so a single in-flight load can hand the same outcome to every
/// waiter.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InfraError {
    #[error("store error: {0}")]
    Store(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("unique constraint violated: {0}")]
    Conflict(String),

    #[error("{operation} timed out after {millis}ms")]
    Timeout { operation: &'static str, millis: u64 },
}

impl From<InfraError> for AuthError {
    fn from(value: InfraError) -> Self {
        AuthError::Infrastructure(value.to_string())
    }
}

/// Run a store/cache operation under a time budget.
pub async fn bounded<T, F>(operation: &'static str, limit: Duration, fut: F) -> Result<T, InfraError>
where
    F: Future<Output = Result<T, InfraError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(InfraError::Timeout {
            operation,
            millis: limit.as_millis() as u64,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn bounded_times_out_slow_operations() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, InfraError>(())
        };

        let err = bounded("slow.op", Duration::from_millis(100), slow).await.unwrap_err();
        assert_eq!(
            err,
            InfraError::Timeout {
                operation: "slow.op",
                millis: 100
            }
        );
    }

    #[tokio::test]
    async fn bounded_passes_results_through() {
        let value = bounded("fast.op", Duration::from_secs(1), async { Ok::<_, InfraError>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }
}
