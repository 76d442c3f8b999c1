//! Shared helpers used across registry clients

use crate::error::Result;
use std::future::Future;
use std::time::Duration;

/// Retry configuration for transient failures
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

/// Run `operation` up to `config.max_attempts` times, doubling the delay
/// between attempts. Only errors classified as retryable are retried;
/// everything else surfaces immediately.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = config.base_delay;
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < config.max_attempts => {
                tracing::debug!(attempt, error = %err, "retrying after transient failure");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(config.max_delay);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Shorten a `sha256:...` digest to the 12-hex-char form used for display
/// and for digest-only local tags.
pub fn short_digest(digest: &str) -> String {
    let hash = digest.strip_prefix("sha256:").unwrap_or(digest);
    hash.chars().take(12).collect()
}
