use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

const MAX_ATTEMPTS: usize = 5;
const BASE_DELAY: Duration = Duration::from_secs(2);
const MAX_DELAY: Duration = Duration::from_secs(60);

/// Exponential backoff for one remote call, shared by the Gemini and
/// Clipdrop clients.
#[derive(Debug)]
pub(crate) struct Backoff {
    service: &'static str,
    attempt: usize,
    delay: Duration,
}

impl Backoff {
    pub(crate) fn new(service: &'static str) -> Self {
        Self {
            service,
            attempt: 0,
            delay: BASE_DELAY,
        }
    }

    /// Counts a failed attempt. When the failure looks transient and attempts
    /// remain, sleeps and returns `true`.
    pub(crate) async fn retry(
        &mut self,
        status: StatusCode,
        body: &str,
        retry_after: Option<Duration>,
    ) -> bool {
        self.attempt += 1;
        if !is_transient(status, body) || self.attempt >= MAX_ATTEMPTS {
            return false;
        }
        let wait = retry_after.map_or(self.delay, |hint| hint.max(self.delay));
        warn!(
            "{} is busy ({}); retrying in {:.1}s (attempt {}/{})",
            self.service,
            status,
            wait.as_secs_f32(),
            self.attempt,
            MAX_ATTEMPTS
        );
        sleep(wait).await;
        self.delay = next_delay(self.delay);
        true
    }
}

fn is_transient(status: StatusCode, body: &str) -> bool {
    if matches!(status.as_u16(), 429 | 503 | 529) {
        return true;
    }
    let lower = body.to_lowercase();
    [
        "rate limit",
        "rate_limit",
        "too many requests",
        "resource_exhausted",
        "quota",
        "overloaded",
    ]
    .iter()
    .any(|needle| lower.contains(needle))
}

pub(crate) fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get("retry-after")?.to_str().ok()?.trim();
    value.parse::<u64>().ok().map(Duration::from_secs)
}

fn next_delay(current: Duration) -> Duration {
    (current * 2).clamp(BASE_DELAY, MAX_DELAY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn recognizes_transient_failures() {
        assert!(is_transient(StatusCode::TOO_MANY_REQUESTS, ""));
        assert!(is_transient(StatusCode::SERVICE_UNAVAILABLE, ""));
        assert!(is_transient(
            StatusCode::BAD_REQUEST,
            r#"{"error":{"status":"RESOURCE_EXHAUSTED"}}"#
        ));
        assert!(!is_transient(StatusCode::UNAUTHORIZED, "invalid api key"));
    }

    #[test]
    fn delay_doubles_up_to_the_cap() {
        assert_eq!(next_delay(BASE_DELAY), Duration::from_secs(4));
        assert_eq!(next_delay(Duration::from_secs(40)), MAX_DELAY);
        assert_eq!(next_delay(Duration::ZERO), BASE_DELAY);
    }

    #[test]
    fn reads_retry_after_seconds() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), None);
        headers.insert("retry-after", HeaderValue::from_static(" 7 "));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(7)));
        headers.insert(
            "retry-after",
            HeaderValue::from_static("Wed, 21 Oct 2026 07:28:00 GMT"),
        );
        assert_eq!(retry_after(&headers), None);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let mut backoff = Backoff::new("Test");
        assert!(!backoff.retry(StatusCode::FORBIDDEN, "denied", None).await);
        assert_eq!(backoff.attempt, 1);
    }
}
