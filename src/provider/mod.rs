//! External collaborators: text-generation backend and the lookups built on it

mod claude;
mod json;
mod lookup;
mod retry;

pub use claude::ClaudeBackend;
pub use json::{extract_json, unwrap_envelope};
pub use lookup::{BackendLookup, Place, PlacesLookup, WeatherLookup, WeatherOutlook};
pub use retry::retry_with_backoff;

use crate::config::{BackendKind, Config, RetryConfig};
use crate::error::BackendError;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Opaque `(system prompt, user prompt) -> text` call
#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        timeout: Duration,
    ) -> Result<String, BackendError>;
}

/// Create the backend selected in config; `None` means offline
pub fn create_backend(config: &Config) -> Option<Arc<dyn Backend>> {
    match config.backend.kind {
        BackendKind::ClaudeCli => Some(Arc::new(ClaudeBackend {
            binary: config.backend.binary.clone(),
            model: config.backend.model.clone(),
        })),
        BackendKind::Offline => None,
    }
}

/// Share of `total` given to one backend attempt, so every retry fits
/// inside the caller's own timeout
fn attempt_timeout(total: Duration, retry: &RetryConfig) -> Duration {
    total / retry.max_attempts.max(1)
}

/// Call the backend with retries and pull the JSON object out of its reply.
/// `timeout` bounds the whole call; each attempt gets an equal share.
pub async fn complete_json(
    backend: &dyn Backend,
    retry: &RetryConfig,
    system_prompt: &str,
    user_prompt: &str,
    timeout: Duration,
) -> Result<Value, BackendError> {
    let per_attempt = attempt_timeout(timeout, retry);
    let raw = retry_with_backoff(retry, || {
        backend.complete(system_prompt, user_prompt, per_attempt)
    })
    .await?;

    debug!("{} returned {} bytes", backend.name(), raw.len());

    let text = unwrap_envelope(&raw);
    let json = extract_json(&text).ok_or_else(|| {
        BackendError::NoJson(text.chars().take(200).collect::<String>())
    })?;
    Ok(serde_json::from_str(&json)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Stalls for the whole budget it is handed on the first call
    struct StallOnceBackend {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Backend for StallOnceBackend {
        fn name(&self) -> &'static str {
            "stall_once"
        }

        async fn complete(
            &self,
            _system_prompt: &str,
            _user_prompt: &str,
            timeout: Duration,
        ) -> Result<String, BackendError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::time::sleep(timeout).await;
                return Err(BackendError::Timeout(timeout));
            }
            Ok(r#"{"ok": true}"#.to_string())
        }
    }

    #[test]
    fn test_attempt_timeout_splits_budget() {
        let retry = RetryConfig {
            max_attempts: 4,
            backoff_base_ms: 1,
        };
        assert_eq!(
            attempt_timeout(Duration::from_secs(120), &retry),
            Duration::from_secs(30)
        );

        let zero = RetryConfig {
            max_attempts: 0,
            backoff_base_ms: 1,
        };
        assert_eq!(
            attempt_timeout(Duration::from_secs(10), &zero),
            Duration::from_secs(10)
        );
    }

    #[tokio::test]
    async fn test_retry_after_stalled_attempt_fits_outer_timeout() {
        let backend = StallOnceBackend {
            calls: AtomicU32::new(0),
        };
        let retry = RetryConfig {
            max_attempts: 2,
            backoff_base_ms: 5,
        };
        let total = Duration::from_millis(400);

        let value = tokio::time::timeout(
            total,
            complete_json(&backend, &retry, "system", "user", total),
        )
        .await
        .expect("retry should finish inside the outer timeout")
        .unwrap();

        assert_eq!(value["ok"], true);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }
}
