use std::fmt;

/// Classified provider error — tells the caller *why* the LLM call failed
/// so it can pick the right recovery strategy.
#[derive(Debug)]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub status: Option<u16>,
    pub message: String,
    /// Seconds to wait before retrying (from 429 Retry-After header or body).
    pub retry_after_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// 401/403 — bad API key or permissions.
    Auth,
    /// 402 — billing/quota exhausted.
    Billing,
    /// 429 — rate limited; check retry_after_secs.
    RateLimit,
    /// 404 or "model not found" — bad model name.
    NotFound,
    /// 408, request timeout, or provider took too long.
    Timeout,
    /// Connection refused, DNS failure, reset, etc.
    Network,
    /// 500/502/503/504 — provider-side outage.
    ServerError,
    /// Anything else.
    Unknown,
}

impl ProviderError {
    pub fn from_status(status: u16, body: &str) -> Self {
        let kind = match status {
            401 | 403 => ProviderErrorKind::Auth,
            402 => ProviderErrorKind::Billing,
            404 => ProviderErrorKind::NotFound,
            408 => ProviderErrorKind::Timeout,
            429 => ProviderErrorKind::RateLimit,
            500 | 502 | 503 | 504 => ProviderErrorKind::ServerError,
            _ => ProviderErrorKind::Unknown,
        };

        // Try to extract retry_after from JSON body for 429s
        let retry_after_secs = if kind == ProviderErrorKind::RateLimit {
            extract_retry_after(body)
        } else {
            None
        };

        Self {
            kind,
            status: Some(status),
            message: truncate_body(body),
            retry_after_secs,
        }
    }

    pub fn network(err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            ProviderErrorKind::Timeout
        } else {
            ProviderErrorKind::Network
        };
        Self {
            kind,
            status: None,
            message: err.to_string(),
            retry_after_secs: None,
        }
    }

    /// User-facing summary suitable for a chat reply or error frame.
    pub fn user_message(&self) -> String {
        match self.kind {
            ProviderErrorKind::Auth => {
                "LLM API authentication failed. Check the configured API key.".to_string()
            }
            ProviderErrorKind::Billing => {
                "LLM API billing error — the account quota may be exhausted.".to_string()
            }
            ProviderErrorKind::RateLimit => {
                if let Some(secs) = self.retry_after_secs {
                    format!("Rate limited by the LLM provider. Try again in {}s.", secs)
                } else {
                    "Rate limited by the LLM provider. Try again shortly.".to_string()
                }
            }
            ProviderErrorKind::NotFound => {
                "The configured model was not found. Check the model name.".to_string()
            }
            ProviderErrorKind::Timeout => "The LLM request timed out. Try again.".to_string(),
            ProviderErrorKind::Network => {
                "Cannot reach the LLM provider (network error).".to_string()
            }
            ProviderErrorKind::ServerError => {
                "The LLM provider is experiencing issues (server error).".to_string()
            }
            ProviderErrorKind::Unknown => format!("LLM error: {}", self.message),
        }
    }

    /// Whether this error is worth retrying (same request, same model).
    #[allow(dead_code)] // Retry wiring lives with callers that back off.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ProviderErrorKind::RateLimit
                | ProviderErrorKind::Timeout
                | ProviderErrorKind::Network
                | ProviderErrorKind::ServerError
        )
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(status) = self.status {
            write!(f, "provider error ({}): {}", status, self.message)
        } else {
            write!(f, "provider error: {}", self.message)
        }
    }
}

impl std::error::Error for ProviderError {}

/// Pull a retry delay out of a 429 body. Providers phrase this a few ways:
/// a `retry_after` JSON field, or "try again in 20s" inside the message.
fn extract_retry_after(body: &str) -> Option<u64> {
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(secs) = json
            .get("error")
            .and_then(|e| e.get("retry_after"))
            .or_else(|| json.get("retry_after"))
            .and_then(|v| v.as_u64())
        {
            return Some(secs);
        }
        if let Some(msg) = json
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
        {
            return parse_retry_from_text(msg);
        }
    }
    parse_retry_from_text(body)
}

fn parse_retry_from_text(text: &str) -> Option<u64> {
    let lower = text.to_lowercase();
    let idx = lower.find("try again in ")?;
    let rest = &lower[idx + "try again in ".len()..];
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 500;
    if body.len() <= MAX {
        return body.to_string();
    }
    let mut end = MAX;
    while end > 0 && !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_status_codes() {
        assert_eq!(
            ProviderError::from_status(401, "").kind,
            ProviderErrorKind::Auth
        );
        assert_eq!(
            ProviderError::from_status(429, "").kind,
            ProviderErrorKind::RateLimit
        );
        assert_eq!(
            ProviderError::from_status(503, "").kind,
            ProviderErrorKind::ServerError
        );
        assert_eq!(
            ProviderError::from_status(418, "").kind,
            ProviderErrorKind::Unknown
        );
    }

    #[test]
    fn extracts_retry_after_from_json_field() {
        let body = r#"{"error": {"retry_after": 30, "message": "rate limited"}}"#;
        let err = ProviderError::from_status(429, body);
        assert_eq!(err.retry_after_secs, Some(30));
    }

    #[test]
    fn extracts_retry_after_from_message_text() {
        let body = r#"{"error": {"message": "Rate limit reached. Please try again in 20s."}}"#;
        let err = ProviderError::from_status(429, body);
        assert_eq!(err.retry_after_secs, Some(20));
    }

    #[test]
    fn retryable_kinds() {
        assert!(ProviderError::from_status(429, "").is_retryable());
        assert!(ProviderError::from_status(502, "").is_retryable());
        assert!(!ProviderError::from_status(401, "").is_retryable());
    }
}
