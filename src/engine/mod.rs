pub mod dispatch;
pub mod notify;
pub mod onboarding;
pub mod planner;
pub mod pricing;

use std::future::Future;
use std::time::Duration;

use crate::error::AppError;

/// Runs a store call under `limit`, translating its typed failure.
pub async fn deadline<T, E, Fut>(limit: Duration, operation: &str, fut: Fut) -> Result<T, AppError>
where
    Fut: Future<Output = Result<T, E>>,
    E: Into<AppError>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err(AppError::Timeout(format!(
            "{operation} exceeded {}ms",
            limit.as_millis()
        ))),
    }
}

/// Like [`deadline`] for calls that cannot fail on their own.
pub async fn deadline_value<T, Fut>(limit: Duration, operation: &str, fut: Fut) -> Result<T, AppError>
where
    Fut: Future<Output = T>,
{
    tokio::time::timeout(limit, fut).await.map_err(|_| {
        AppError::Timeout(format!("{operation} exceeded {}ms", limit.as_millis()))
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{deadline, deadline_value};
    use crate::error::AppError;

    #[tokio::test]
    async fn slow_calls_become_timeouts() {
        let result = deadline_value(Duration::from_millis(10), "slow lookup", async {
            tokio::time::sleep(Duration::from_millis(200)).await;
        })
        .await;

        assert!(matches!(result, Err(AppError::Timeout(_))));
    }

    #[tokio::test]
    async fn typed_failures_are_translated() {
        let result: Result<(), AppError> = deadline(Duration::from_secs(1), "lookup", async {
            Err::<(), _>(AppError::NoFeasibleAssignment)
        })
        .await;

        assert!(matches!(result, Err(AppError::NoFeasibleAssignment)));
    }
}
