use std::future::Future;

use crate::config::PollSpec;

/// Run `check` until it yields `Some`, sleeping `spec.interval()` between
/// attempts, at most `spec.attempts` times. Running out is not an error:
/// the caller gets `Ok(None)` and decides how to carry on.
pub async fn poll_until<T, E, F, Fut>(spec: PollSpec, mut check: F) -> Result<Option<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    for attempt in 1..=spec.attempts {
        if let Some(found) = check().await? {
            return Ok(Some(found));
        }
        if attempt < spec.attempts {
            tokio::time::sleep(spec.interval()).await;
        }
    }
    tracing::debug!(
        attempts = spec.attempts,
        interval_ms = spec.interval_ms,
        "Bounded poll exhausted"
    );
    Ok(None)
}
