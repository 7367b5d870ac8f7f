//! Retry with exponential backoff for transient store errors.

use crate::config::RetryConfig;
use crate::metrics::Metrics;
use crate::storage::StorageError;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Run `op` up to `policy.max_attempts` times, sleeping between attempts with
/// exponential backoff and full jitter. Only errors classified transient are
/// retried; the final failure is returned as-is.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryConfig,
    metrics: Option<&Arc<Metrics>>,
    op_name: &str,
    mut op: F,
) -> Result<T, StorageError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StorageError>>,
{
    let mut delay = policy.initial_delay;
    let mut attempt = 1u32;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                if let Some(m) = metrics {
                    m.store_retries_total.inc();
                    if matches!(err, StorageError::Unavailable(_)) {
                        m.store_connection_errors_total.inc();
                    }
                }
                let sleep_for = jittered(delay);
                warn!(
                    "{} failed (attempt {}/{}), retrying in {:?}: {}",
                    op_name, attempt, policy.max_attempts, sleep_for, err
                );
                tokio::time::sleep(sleep_for).await;
                delay = next_delay(delay, policy);
                attempt += 1;
            }
            Err(err) => {
                if let Some(m) = metrics {
                    if matches!(err, StorageError::Unavailable(_)) {
                        m.store_connection_errors_total.inc();
                    }
                }
                return Err(err);
            }
        }
    }
}

/// Full jitter: uniform in [delay/2, delay].
fn jittered(delay: Duration) -> Duration {
    let millis = delay.as_millis().max(1) as u64;
    let jittered = rand::thread_rng().gen_range(millis / 2..=millis);
    Duration::from_millis(jittered)
}

fn next_delay(current: Duration, policy: &RetryConfig) -> Duration {
    let scaled = current.mul_f64(policy.factor);
    scaled.min(policy.max_delay)
}
