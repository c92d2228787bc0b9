//! Rate-limit guard: classifies provider errors and retries throttled calls.
//!
//! Provider errors are not uniformly shaped, so classification looks at every
//! available signal (status code, reason phrase, message text). The backoff
//! delay prefers a structured `retryDelay` detail, then a "retry in N s" hint in
//! the message, then the configured default, and is never shorter than the
//! configured floor.

use std::future::Future;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{ChatError, ProviderError};

/// Default minimum wait between retries of a throttled call.
pub const DEFAULT_RATE_LIMIT_FLOOR_MS: u64 = 60_000;

/// Numeric `retryDelay` values at or below this are read as seconds.
const SECONDS_HEURISTIC_MAX: f64 = 600.0;

/// Rate-limit classification of a provider error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitInfo {
    pub is_rate_limit: bool,
    pub suggested_delay_ms: Option<u64>,
}

/// Notification emitted before every backoff sleep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitNotice {
    pub retry_in_seconds: u64,
    pub message: String,
    pub attempt: u32,
    pub context: String,
}

/// Callback receiving retry notifications.
pub type RateLimitObserver = Arc<dyn Fn(RateLimitNotice) + Send + Sync>;

/// Retry policy for throttled calls.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitPolicy {
    /// Lower bound on every computed delay.
    pub floor: Duration,
    /// Delay used when the provider gives no hint.
    pub default_delay: Duration,
    /// Total backoff budget; `None` retries forever.
    pub max_total_wait: Option<Duration>,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            floor: Duration::from_millis(DEFAULT_RATE_LIMIT_FLOOR_MS),
            default_delay: Duration::from_millis(DEFAULT_RATE_LIMIT_FLOOR_MS),
            max_total_wait: None,
        }
    }
}

impl RateLimitPolicy {
    /// Delay before the next attempt, clamped to the floor.
    pub fn compute_delay(&self, info: &RateLimitInfo) -> Duration {
        let suggested = info
            .suggested_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(self.default_delay);
        suggested.max(self.floor)
    }
}

/// Wraps model invocations and absorbs rate-limit failures.
#[derive(Clone, Default)]
pub struct RateLimitGuard {
    policy: RateLimitPolicy,
    observer: Option<RateLimitObserver>,
    cancel: Option<CancellationToken>,
}

impl std::fmt::Debug for RateLimitGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitGuard")
            .field("policy", &self.policy)
            .field("observer", &self.observer.as_ref().map(|_| ".."))
            .field("cancel", &self.cancel)
            .finish()
    }
}

impl RateLimitGuard {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            policy,
            observer: None,
            cancel: None,
        }
    }

    pub fn with_observer(mut self, observer: RateLimitObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Run `action` until it succeeds or fails with a non-rate-limit error.
    ///
    /// Rate-limit failures are never returned, except as
    /// [`ChatError::RateLimitBudgetExceeded`] when the policy has a budget.
    pub async fn invoke<F, Fut, T>(&self, context: &str, mut action: F) -> Result<T, ChatError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ChatError>>,
    {
        let mut attempt = 0u32;
        let mut waited = Duration::ZERO;

        loop {
            if self.is_canceled() {
                return Err(ChatError::Canceled);
            }

            let err = match action().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            let ChatError::Provider(provider_error) = &err else {
                return Err(err);
            };
            let info = classify(provider_error);
            if !info.is_rate_limit {
                return Err(err);
            }

            attempt += 1;
            let delay = self.policy.compute_delay(&info);
            if let Some(budget) = self.policy.max_total_wait {
                if waited + delay > budget {
                    tracing::warn!(
                        context,
                        attempt,
                        waited_ms = waited.as_millis() as u64,
                        budget_ms = budget.as_millis() as u64,
                        "Rate limit wait budget exhausted"
                    );
                    return Err(ChatError::RateLimitBudgetExceeded {
                        waited_ms: waited.as_millis() as u64,
                        budget_ms: budget.as_millis() as u64,
                    });
                }
            }

            tracing::warn!(
                context,
                attempt,
                delay_ms = delay.as_millis() as u64,
                suggested_ms = ?info.suggested_delay_ms,
                error = %provider_error,
                "Rate limited, backing off"
            );

            if let Some(observer) = &self.observer {
                observer(RateLimitNotice {
                    retry_in_seconds: delay.as_secs_f64().ceil() as u64,
                    message: provider_error.message.clone(),
                    attempt,
                    context: context.to_string(),
                });
            }

            self.sleep(delay).await?;
            waited += delay;
        }
    }

    fn is_canceled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    async fn sleep(&self, delay: Duration) -> Result<(), ChatError> {
        match &self.cancel {
            Some(token) => tokio::select! {
                _ = token.cancelled() => Err(ChatError::Canceled),
                _ = tokio::time::sleep(delay) => Ok(()),
            },
            None => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }
}

/// Classify a raw provider error.
pub fn classify(err: &ProviderError) -> RateLimitInfo {
    let message = err.message.to_ascii_lowercase();
    let status_text = err
        .status_text
        .as_deref()
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    let is_rate_limit = err.status == Some(429)
        || status_text.contains("too many requests")
        || ["429", "quota exceeded", "rate limit", "too many requests"]
            .iter()
            .any(|needle| message.contains(needle));

    let suggested_delay_ms = if is_rate_limit {
        structured_retry_delay_ms(&err.details).or_else(|| message_retry_delay_ms(&err.message))
    } else {
        None
    };

    RateLimitInfo {
        is_rate_limit,
        suggested_delay_ms,
    }
}

/// First `retryDelay` found in the provider's detail array.
fn structured_retry_delay_ms(details: &[serde_json::Value]) -> Option<u64> {
    details.iter().find_map(|detail| {
        let delay = detail.get("retryDelay").or_else(|| detail.get("retry_delay"))?;
        parse_retry_delay(delay)
    })
}

fn parse_retry_delay(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::Number(number) => number.as_f64().and_then(numeric_delay_ms),
        serde_json::Value::String(raw) => parse_duration_string(raw),
        serde_json::Value::Object(map) => {
            let seconds = map.get("seconds").and_then(json_f64).unwrap_or(0.0);
            let nanos = map.get("nanos").and_then(json_f64).unwrap_or(0.0);
            if !map.contains_key("seconds") && !map.contains_key("nanos") {
                return None;
            }
            Some((seconds * 1000.0 + nanos / 1_000_000.0).max(0.0).round() as u64)
        }
        _ => None,
    }
}

fn json_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(number) => number.as_f64(),
        serde_json::Value::String(raw) => raw.trim().parse().ok(),
        _ => None,
    }
}

/// Numeric delays are seconds when small, milliseconds otherwise.
fn numeric_delay_ms(value: f64) -> Option<u64> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    if value <= SECONDS_HEURISTIC_MAX {
        Some((value * 1000.0).round() as u64)
    } else {
        Some(value.round() as u64)
    }
}

/// Protobuf JSON duration ("37s", "1.5s") or a bare number.
fn parse_duration_string(raw: &str) -> Option<u64> {
    let trimmed = raw.trim();
    if let Some(seconds) = trimmed.strip_suffix("ms") {
        return seconds.trim().parse::<f64>().ok().map(|ms| ms.max(0.0).round() as u64);
    }
    if let Some(seconds) = trimmed.strip_suffix('s') {
        return seconds
            .trim()
            .parse::<f64>()
            .ok()
            .map(|s| (s.max(0.0) * 1000.0).round() as u64);
    }
    trimmed.parse::<f64>().ok().and_then(numeric_delay_ms)
}

static RETRY_HINT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)retry\s+(?:in|after)\s+(\d+(?:\.\d+)?)\s*(ms|milliseconds?|s|secs?|seconds?)?\b")
        .expect("retry hint regex must compile")
});

fn message_retry_delay_ms(message: &str) -> Option<u64> {
    let captures = RETRY_HINT_RE.captures(message)?;
    let amount: f64 = captures.get(1)?.as_str().parse().ok()?;
    let unit = captures
        .get(2)
        .map(|unit| unit.as_str().to_ascii_lowercase())
        .unwrap_or_default();
    if unit.starts_with("ms") || unit.starts_with("milli") {
        Some(amount.round() as u64)
    } else {
        Some((amount * 1000.0).round() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rate_limited(details: Vec<serde_json::Value>) -> ProviderError {
        ProviderError::new("Resource has been exhausted")
            .with_status(429)
            .with_details(details)
    }

    #[test]
    fn status_429_is_rate_limit() {
        assert!(classify(&ProviderError::new("nope").with_status(429)).is_rate_limit);
    }

    #[test]
    fn status_text_is_rate_limit_signal() {
        let err = ProviderError::new("request rejected").with_status_text("Too Many Requests");
        assert!(classify(&err).is_rate_limit);
    }

    #[test]
    fn message_signals_are_case_insensitive() {
        for message in [
            "HTTP 429 from upstream",
            "Quota Exceeded for metric",
            "RATE LIMIT reached",
            "too many requests, slow down",
        ] {
            assert!(classify(&ProviderError::new(message)).is_rate_limit, "{message}");
        }
    }

    #[test]
    fn unrelated_errors_are_not_rate_limits() {
        let info = classify(&ProviderError::new("invalid argument").with_status(400));
        assert_eq!(
            info,
            RateLimitInfo {
                is_rate_limit: false,
                suggested_delay_ms: None
            }
        );
    }

    #[test]
    fn numeric_retry_delay_small_values_are_seconds() {
        let info = classify(&rate_limited(vec![json!({"retryDelay": 3})]));
        assert_eq!(info.suggested_delay_ms, Some(3_000));
    }

    #[test]
    fn numeric_retry_delay_large_values_are_milliseconds() {
        let info = classify(&rate_limited(vec![json!({"retryDelay": 120_000})]));
        assert_eq!(info.suggested_delay_ms, Some(120_000));
    }

    #[test]
    fn seconds_nanos_pair_is_parsed() {
        let info = classify(&rate_limited(vec![
            json!({"@type": "type.googleapis.com/google.rpc.QuotaFailure"}),
            json!({"retryDelay": {"seconds": 2, "nanos": 500_000_000}}),
        ]));
        assert_eq!(info.suggested_delay_ms, Some(2_500));
    }

    #[test]
    fn duration_string_is_parsed() {
        let info = classify(&rate_limited(vec![json!({"retryDelay": "37s"})]));
        assert_eq!(info.suggested_delay_ms, Some(37_000));
    }

    #[test]
    fn message_hint_is_used_without_structured_detail() {
        let err = ProviderError::new("Quota exceeded. Please retry in 12.5s.");
        assert_eq!(classify(&err).suggested_delay_ms, Some(12_500));
        let err = ProviderError::new("rate limit: retry after 90 seconds");
        assert_eq!(classify(&err).suggested_delay_ms, Some(90_000));
    }

    #[test]
    fn structured_detail_wins_over_message_hint() {
        let err = ProviderError::new("rate limit, retry in 5s")
            .with_details(vec![json!({"retryDelay": "45s"})]);
        assert_eq!(classify(&err).suggested_delay_ms, Some(45_000));
    }

    #[test]
    fn delay_is_clamped_to_floor() {
        let policy = RateLimitPolicy::default();
        let short = RateLimitInfo {
            is_rate_limit: true,
            suggested_delay_ms: Some(3_000),
        };
        let long = RateLimitInfo {
            is_rate_limit: true,
            suggested_delay_ms: Some(120_000),
        };
        let none = RateLimitInfo {
            is_rate_limit: true,
            suggested_delay_ms: None,
        };
        assert_eq!(policy.compute_delay(&short), Duration::from_millis(60_000));
        assert_eq!(policy.compute_delay(&long), Duration::from_millis(120_000));
        assert_eq!(policy.compute_delay(&none), Duration::from_millis(60_000));
    }

    fn counting_observer() -> (RateLimitObserver, Arc<std::sync::Mutex<Vec<RateLimitNotice>>>) {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let observer: RateLimitObserver = Arc::new(move |notice| {
            sink.lock().unwrap().push(notice);
        });
        (observer, seen)
    }

    #[tokio::test(start_paused = true)]
    async fn invoke_retries_until_success_and_notifies() {
        let (observer, seen) = counting_observer();
        let guard = RateLimitGuard::new(RateLimitPolicy::default()).with_observer(observer);
        let mut calls = 0u32;
        let started = tokio::time::Instant::now();

        let value = guard
            .invoke("model", || {
                calls += 1;
                let attempt = calls;
                async move {
                    if attempt == 1 {
                        Err(ChatError::from(rate_limited(vec![json!({"retryDelay": 3})])))
                    } else {
                        Ok("answer")
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, "answer");
        assert_eq!(calls, 2);
        assert!(started.elapsed() >= Duration::from_secs(60));
        let notices = seen.lock().unwrap();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].retry_in_seconds, 60);
        assert_eq!(notices[0].attempt, 1);
        assert_eq!(notices[0].context, "model");
    }

    #[tokio::test(start_paused = true)]
    async fn invoke_honors_longer_provider_delay() {
        let (observer, seen) = counting_observer();
        let guard = RateLimitGuard::new(RateLimitPolicy::default()).with_observer(observer);
        let mut calls = 0u32;

        guard
            .invoke("model", || {
                calls += 1;
                let attempt = calls;
                async move {
                    if attempt == 1 {
                        Err(ChatError::from(rate_limited(vec![json!({"retryDelay": 120_000})])))
                    } else {
                        Ok(())
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(seen.lock().unwrap()[0].retry_in_seconds, 120);
    }

    #[tokio::test(start_paused = true)]
    async fn non_rate_limit_errors_pass_through_immediately() {
        let guard = RateLimitGuard::default();
        let mut calls = 0u32;
        let result: Result<(), ChatError> = guard
            .invoke("model", || {
                calls += 1;
                async { Err(ChatError::from(ProviderError::new("bad request").with_status(400))) }
            })
            .await;
        assert!(matches!(result, Err(ChatError::Provider(_))));
        assert_eq!(calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn budget_stops_retrying() {
        let policy = RateLimitPolicy {
            max_total_wait: Some(Duration::from_secs(90)),
            ..RateLimitPolicy::default()
        };
        let guard = RateLimitGuard::new(policy);
        let mut calls = 0u32;
        let result: Result<(), ChatError> = guard
            .invoke("model", || {
                calls += 1;
                async { Err(ChatError::from(rate_limited(Vec::new()))) }
            })
            .await;
        assert!(matches!(
            result,
            Err(ChatError::RateLimitBudgetExceeded {
                waited_ms: 60_000,
                budget_ms: 90_000
            })
        ));
        assert_eq!(calls, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff() {
        let token = CancellationToken::new();
        let guard = RateLimitGuard::default().with_cancellation(token.clone());
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            token.cancel();
        });
        let result: Result<(), ChatError> = guard
            .invoke("model", || async { Err(ChatError::from(rate_limited(Vec::new()))) })
            .await;
        canceller.await.unwrap();
        assert!(matches!(result, Err(ChatError::Canceled)));
    }
}
