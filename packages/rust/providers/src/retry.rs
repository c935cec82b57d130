//! Bounded retry with jittered exponential backoff for outbound calls.

use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;
use tokio_retry::RetryIf;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::warn;

use entitylens_shared::{EntityLensError, RetryConfig};

/// Longest single wait between attempts.
const MAX_DELAY: Duration = Duration::from_secs(10);

/// A failed attempt, tagged with whether trying again could help.
#[derive(Debug)]
pub struct AttemptError {
    pub error: EntityLensError,
    pub transient: bool,
}

impl AttemptError {
    pub fn transient(error: EntityLensError) -> Self {
        Self {
            error,
            transient: true,
        }
    }

    pub fn fatal(error: EntityLensError) -> Self {
        Self {
            error,
            transient: false,
        }
    }
}

/// 429 and 5xx are worth retrying; other statuses are final.
pub fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Connection failures and timeouts are worth retrying.
pub fn is_transient_transport(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

/// Run `action`, retrying transient failures up to `config.max_retries` times.
///
/// The first wait is about `base_delay_ms` and doubles after each attempt.
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    operation: &str,
    action: F,
) -> Result<T, EntityLensError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AttemptError>>,
{
    let strategy = ExponentialBackoff::from_millis(2)
        .factor(config.base_delay_ms / 2)
        .max_delay(MAX_DELAY)
        .map(jitter)
        .take(config.max_retries);

    RetryIf::spawn(strategy, action, |err: &AttemptError| {
        if err.transient {
            warn!(operation, error = %err.error, "transient failure, retrying");
        }
        err.transient
    })
    .await
    .map_err(|err| err.error)
}
