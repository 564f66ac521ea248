//! Retry classification and exponential backoff
//!
//! Failure kinds map onto the retry policy here: transfer I/O failures,
//! stalls, and transient discovery failures are retryable; validation,
//! database, permanent discovery, and cancellation are not. The attempt
//! budget itself is owned by each loader, not by this module.

use crate::config::RetryConfig;
use crate::error::Error;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (network timeouts, connection resets, stalls) return
/// `true`. Permanent failures (bad source, auth rejection, cancellation)
/// return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            // Timeouts and connection-level failures are worth another attempt
            Error::Network(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
            ),
            // FTP errors carry no structured cause; assume connection trouble
            Error::Ftp(_) => true,
            Error::Discovery { permanent, .. } => !permanent,
            Error::Transfer(_) => true,
            Error::Stalled { .. } => true,
            // Cancellation is a command outcome, not a failure
            Error::Cancelled => false,
            // Validation and persistence problems will not fix themselves
            Error::Task(_) => false,
            Error::Database(_) | Error::Sqlx(_) => false,
            Error::Serialization(_) => false,
            Error::ShuttingDown => false,
        }
    }
}

/// Compute the backoff delay before retry attempt `attempt` (1-based)
///
/// Exponential growth from `initial_delay` by `backoff_multiplier`, capped at
/// `max_delay`, with optional jitter of up to 25% to spread reconnect storms.
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let raw = config.initial_delay.as_secs_f64() * config.backoff_multiplier.powi(exp as i32);
    let capped = Duration::from_secs_f64(raw.min(config.max_delay.as_secs_f64()));

    if config.jitter {
        add_jitter(capped)
    } else {
        capped
    }
}

/// Add up to 25% random jitter to a delay
fn add_jitter(delay: Duration) -> Duration {
    let jitter_factor = rand::thread_rng().gen_range(0.0..0.25);
    delay + Duration::from_secs_f64(delay.as_secs_f64() * jitter_factor)
}

/// Execute an async operation, retrying transient failures with backoff
///
/// Used for the metadata-discovery phase, where retrying inline is simpler
/// than re-entering the scheduler. Transfer-phase retries instead re-enter
/// the waiting queue so a retry never holds a concurrency permit.
pub async fn with_backoff<F, Fut, T>(config: &RetryConfig, mut operation: F) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < config.max_attempts => {
                attempt += 1;
                let delay = backoff_delay(config, attempt);

                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis(),
                    "operation failed, retrying"
                );

                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
