use crate::domain::ports::{ActivityEntry, SharedActivitySink};
use crate::error::{CommerceError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::warn;

/// Runs a collaborator call under `limit`. Elapsing maps to an
/// `ExternalService` error for `service`.
pub async fn bounded<T, F>(service: &'static str, limit: Duration, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(CommerceError::external(
            service,
            format!("timed out after {}ms", limit.as_millis()),
        )),
    }
}

/// A side effect that runs after state has been committed. Failures are
/// logged and reported as `false`, never propagated.
pub async fn best_effort<F>(what: &'static str, limit: Duration, call: F) -> bool
where
    F: Future<Output = Result<()>>,
{
    match bounded("messaging", limit, call).await {
        Ok(()) => true,
        Err(e) => {
            warn!(effect = what, error = %e, "side effect failed");
            false
        }
    }
}

pub async fn record_activity(sink: Option<&SharedActivitySink>, entry: ActivityEntry) {
    if let Some(sink) = sink
        && let Err(e) = sink.record(entry).await
    {
        warn!(error = %e, "failed to record activity");
    }
}
