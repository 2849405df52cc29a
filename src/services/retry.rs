//! Failure classification and capped exponential backoff.

use std::fmt;
use std::time::Duration;

use strum::Display;

/// Transport failures. These win over permanent wording, since handshake
/// and resolver errors often say "invalid" or "not found".
const TRANSPORT_MARKERS: &[&str] = &[
    "dns",
    "ssl",
    "tls",
    "certificate",
    "handshake",
    "failed to lookup address",
];

const RETRYABLE_MARKERS: &[&str] = &[
    "timeout",
    "timed out",
    "connection",
    "reset by peer",
    "network",
    "temporary",
    "temporarily",
    "service unavailable",
    "rate limit",
    "too many requests",
];

const PERMANENT_MARKERS: &[&str] = &[
    "permission denied",
    "authentication failed",
    "unauthorized",
    "forbidden",
    "file not found",
    "no such file",
    "object not found",
    "does not exist",
    "invalid argument",
    "invalid input",
    "invalid request",
    "invalid video",
    "unsupported format",
    "malformed",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum FailureClass {
    Retryable,
    Permanent,
    /// Nothing matched; retried like a transient failure until the cap.
    Unknown,
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    Retry { delay: Duration, reason: String },
    GiveUp { reason: String },
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(300),
            max_retries: 3,
        }
    }
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, max_retries: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_retries,
        }
    }

    /// Classify an error by its rendered message. An HTTP status code
    /// decides on its own; otherwise transport markers, then permanent
    /// markers, then the remaining retryable markers are tried.
    pub fn classify(&self, error: &dyn fmt::Display) -> FailureClass {
        classify_message(&error.to_string())
    }

    /// `min(max_delay, base_delay * 2^attempt)`, non-decreasing in `attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Decide the follow-up for a failure on zero-based `attempt`.
    pub fn decide(&self, attempt: u32, class: FailureClass, error: &str) -> RetryDecision {
        match class {
            FailureClass::Permanent => RetryDecision::GiveUp {
                reason: format!("Analysis failed (permanent error): {error}"),
            },
            _ if attempt >= self.max_retries => RetryDecision::GiveUp {
                reason: format!("Analysis failed (max retries exceeded): {error}"),
            },
            _ => {
                let delay = self.backoff(attempt);
                RetryDecision::Retry {
                    delay,
                    reason: format!(
                        "{class} error on attempt {}/{}, retrying in {:?}: {error}",
                        attempt + 1,
                        self.max_retries + 1,
                        delay
                    ),
                }
            }
        }
    }
}

pub fn classify_message(message: &str) -> FailureClass {
    let lower = message.to_lowercase();
    if let Some(class) = status_class(&lower) {
        return class;
    }
    if TRANSPORT_MARKERS.iter().any(|m| lower.contains(m)) {
        return FailureClass::Retryable;
    }
    if PERMANENT_MARKERS.iter().any(|m| lower.contains(m)) {
        return FailureClass::Permanent;
    }
    if RETRYABLE_MARKERS.iter().any(|m| lower.contains(m)) {
        FailureClass::Retryable
    } else {
        FailureClass::Unknown
    }
}

/// Classify by the first standalone HTTP status code in the message.
fn status_class(message: &str) -> Option<FailureClass> {
    message
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| token.len() == 3)
        .filter_map(|token| token.parse::<u16>().ok())
        .find_map(|code| match code {
            408 | 425 | 429 | 500..=599 => Some(FailureClass::Retryable),
            400..=499 => Some(FailureClass::Permanent),
            _ => None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(classify_message("operation timed out"), FailureClass::Retryable);
        assert_eq!(classify_message("HTTP 503 Service Unavailable"), FailureClass::Retryable);
        assert_eq!(classify_message("Connection reset by peer"), FailureClass::Retryable);
        assert_eq!(classify_message("rate limit exceeded"), FailureClass::Retryable);
        assert_eq!(classify_message("dns lookup failed"), FailureClass::Retryable);
        assert_eq!(classify_message("HTTP 404: object not found"), FailureClass::Permanent);
        assert_eq!(classify_message("401 Unauthorized"), FailureClass::Permanent);
        assert_eq!(classify_message("malformed video uri"), FailureClass::Permanent);
        assert_eq!(classify_message("HTTP status 429"), FailureClass::Retryable);
        assert_eq!(classify_message("HTTP status 403"), FailureClass::Permanent);
        assert_eq!(classify_message("request timed out after 4000ms"), FailureClass::Retryable);
        assert_eq!(classify_message("model returned gibberish"), FailureClass::Unknown);
    }

    #[test]
    fn test_permanent_wins_over_retryable() {
        assert_eq!(
            classify_message("connection ok but authentication failed"),
            FailureClass::Permanent
        );
    }

    #[test]
    fn test_status_code_wins_over_body_keywords() {
        assert_eq!(
            classify_message(
                "Inference endpoint returned HTTP 503 Service Unavailable: upstream sent invalid response"
            ),
            FailureClass::Retryable
        );
        assert_eq!(
            classify_message("Inference endpoint returned HTTP 502 Bad Gateway: model backend not found"),
            FailureClass::Retryable
        );
        assert_eq!(
            classify_message("Inference endpoint returned HTTP 404 Not Found: please retry later"),
            FailureClass::Permanent
        );
        assert_eq!(
            classify_message("Inference endpoint returned HTTP 400 Bad Request: connection header missing"),
            FailureClass::Permanent
        );
    }

    #[test]
    fn test_transport_errors_are_retryable() {
        assert_eq!(
            classify_message("HTTP request failed: invalid peer certificate: UnknownIssuer"),
            FailureClass::Retryable
        );
        assert_eq!(
            classify_message("HTTP request failed: dns error: failed to lookup address information: host not found"),
            FailureClass::Retryable
        );
        assert_eq!(
            classify_message("tls handshake eof"),
            FailureClass::Retryable
        );
    }

    #[test]
    fn test_bare_wording_is_not_permanent() {
        assert_eq!(classify_message("upstream sent invalid response"), FailureClass::Unknown);
        assert_eq!(classify_message("model backend not found"), FailureClass::Unknown);
        assert_eq!(classify_message("invalid argument: video_uri"), FailureClass::Permanent);
        assert_eq!(classify_message("object not found in bucket"), FailureClass::Permanent);
    }

    #[test]
    fn test_inference_status_error_classification() {
        use crate::services::inference::InferenceError;
        use reqwest::StatusCode;

        let policy = RetryPolicy::default();
        let unavailable = InferenceError::Status {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: "invalid upstream response".into(),
        };
        assert_eq!(policy.classify(&unavailable), FailureClass::Retryable);

        let forbidden = InferenceError::Status {
            status: StatusCode::FORBIDDEN,
            body: "connection refused for this token".into(),
        };
        assert_eq!(policy.classify(&forbidden), FailureClass::Permanent);
    }

    #[test]
    fn test_backoff_doubles_then_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_secs(60));
        assert_eq!(policy.backoff(1), Duration::from_secs(120));
        assert_eq!(policy.backoff(2), Duration::from_secs(240));
        assert_eq!(policy.backoff(3), Duration::from_secs(300));
        assert_eq!(policy.backoff(64), Duration::from_secs(300));
    }

    #[test]
    fn test_backoff_non_decreasing_and_bounded() {
        let policy = RetryPolicy::new(Duration::from_millis(7), Duration::from_secs(2), 3);
        let mut previous = Duration::ZERO;
        for attempt in 0..100 {
            let delay = policy.backoff(attempt);
            assert!(delay >= previous);
            assert!(delay <= policy.max_delay);
            previous = delay;
        }
    }

    #[test]
    fn test_decide() {
        let policy = RetryPolicy::default();
        assert!(matches!(
            policy.decide(0, FailureClass::Retryable, "timeout"),
            RetryDecision::Retry { delay, .. } if delay == Duration::from_secs(60)
        ));
        assert!(matches!(
            policy.decide(2, FailureClass::Unknown, "weird"),
            RetryDecision::Retry { .. }
        ));
        match policy.decide(3, FailureClass::Retryable, "timeout") {
            RetryDecision::GiveUp { reason } => assert!(reason.contains("max retries exceeded")),
            other => panic!("unexpected decision: {other:?}"),
        }
        match policy.decide(0, FailureClass::Permanent, "404") {
            RetryDecision::GiveUp { reason } => assert!(reason.contains("permanent error")),
            other => panic!("unexpected decision: {other:?}"),
        }
    }
}
