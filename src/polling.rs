//! Bounded submit/poll loop for asynchronous backend operations.
//!
//! Some backends answer a submission with an operation handle instead of a
//! result. [`poll_until_terminal`] re-reads the operation status at a fixed
//! interval until it reports `succeeded` or `failed`, or the wall-clock budget
//! runs out. Running out of budget is a terminal outcome, not an error.

use std::future::Future;
use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;

use crate::error::Result;

pub const STATUS_SUCCEEDED: &str = "succeeded";
pub const STATUS_FAILED: &str = "failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Succeeded(serde_json::Value),
    Failed(serde_json::Value),
    /// The budget ran out. Carries the last status payload observed, if any.
    TimedOut { last: Option<serde_json::Value> },
}

impl PollOutcome {
    /// The payload handed back to the client for this outcome.
    #[must_use]
    pub fn into_body(self) -> serde_json::Value {
        match self {
            Self::Succeeded(payload) => payload
                .get("result")
                .cloned()
                .unwrap_or(payload),
            Self::Failed(payload) => payload,
            Self::TimedOut { last } => json!({
                "status": "timeout",
                "error": {
                    "code": "timeout",
                    "message": "Operation did not finish before the polling deadline",
                },
                "last": last,
            }),
        }
    }
}

/// Poll `fetch` until it reports a terminal status or `policy.timeout` elapses.
///
/// Each poll is preceded by one `policy.interval` sleep. A failed fetch is
/// logged and counts as a non-terminal poll.
pub async fn poll_until_terminal<F, Fut>(policy: PollPolicy, mut fetch: F) -> PollOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<serde_json::Value>>,
{
    let started = Instant::now();
    let mut last = None;
    let mut polls = 0u32;

    loop {
        tokio::time::sleep(policy.interval).await;
        polls += 1;

        match fetch().await {
            Ok(payload) => {
                let status = payload
                    .get("status")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                tracing::debug!(polls, status = %status, "Polled operation status");

                match status.as_str() {
                    STATUS_SUCCEEDED => return PollOutcome::Succeeded(payload),
                    STATUS_FAILED => return PollOutcome::Failed(payload),
                    _ => last = Some(payload),
                }
            }
            Err(e) => tracing::warn!(polls, error = %e, "Status poll failed"),
        }

        if started.elapsed() >= policy.timeout {
            tracing::warn!(polls, timeout_secs = policy.timeout.as_secs(), "Operation polling timed out");
            return PollOutcome::TimedOut { last };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_never_terminal_times_out_after_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let started = Instant::now();

        let outcome = poll_until_terminal(PollPolicy::default(), move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok(json!({"status": "running", "poll": n})) }
        })
        .await;

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(60), "returned early: {elapsed:?}");
        assert!(elapsed < Duration::from_secs(61), "returned late: {elapsed:?}");
        assert_eq!(calls.load(Ordering::SeqCst), 60);
        assert_eq!(
            outcome,
            PollOutcome::TimedOut {
                last: Some(json!({"status": "running", "poll": 59}))
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_poll() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let started = Instant::now();

        let outcome = poll_until_terminal(PollPolicy::default(), move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Ok(json!({"status": "notRunning"}))
                } else {
                    Ok(json!({"status": "succeeded", "result": {"data": [{"url": "u"}]}}))
                }
            }
        })
        .await;

        assert_eq!(started.elapsed(), Duration::from_secs(3));
        assert!(matches!(outcome, PollOutcome::Succeeded(_)));
        assert_eq!(outcome.into_body(), json!({"data": [{"url": "u"}]}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_is_terminal() {
        let outcome = poll_until_terminal(PollPolicy::default(), || async {
            Ok(json!({"status": "failed", "error": {"code": "contentFilter"}}))
        })
        .await;

        assert_eq!(
            outcome.into_body(),
            json!({"status": "failed", "error": {"code": "contentFilter"}})
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_errors_keep_polling_until_deadline() {
        let policy = PollPolicy {
            interval: Duration::from_millis(500),
            timeout: Duration::from_secs(2),
        };
        let outcome = poll_until_terminal(policy, || async {
            Err(GatewayError::provider("connection refused"))
        })
        .await;

        let body = outcome.clone().into_body();
        assert_eq!(outcome, PollOutcome::TimedOut { last: None });
        assert_eq!(body["status"], "timeout");
        assert!(body["last"].is_null());
    }
}
