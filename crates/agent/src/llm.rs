use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Text returned by any provider, after the adapter has unwrapped its
/// response envelope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderResult {
    pub text: String,
}

impl ProviderResult {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("provider is overloaded: {0}")]
    Overloaded(String),
    #[error("provider returned HTTP {status}: {body}")]
    Api { status: u16, body: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),
    #[error("provider configuration error: {0}")]
    Configuration(String),
}

impl LlmError {
    /// Only capacity errors are retried; everything else fails fast.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Overloaded(_))
    }

    pub fn error_class(&self) -> &'static str {
        match self {
            Self::Overloaded(_) => "overloaded",
            Self::Api { .. } => "api",
            Self::Network(_) => "network",
            Self::InvalidResponse(_) => "invalid_response",
            Self::Timeout(_) => "timeout",
            Self::Configuration(_) => "configuration",
        }
    }

    /// Maps a non-success HTTP reply. 503 and bodies mentioning overload or
    /// `UNAVAILABLE` are capacity problems.
    pub fn from_status(status: u16, body: String) -> Self {
        let lowered = body.to_ascii_lowercase();
        if status == 503 || lowered.contains("overloaded") || body.contains("UNAVAILABLE") {
            Self::Overloaded(format!("HTTP {status}: {body}"))
        } else {
            Self::Api { status, body }
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Network(format!("request timed out: {error}"))
        } else if error.is_decode() {
            Self::InvalidResponse(error.to_string())
        } else {
            Self::Network(error.to_string())
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    fn name(&self) -> &'static str;
    async fn complete(&self, prompt: &str) -> Result<ProviderResult, LlmError>;
}

/// Runs one completion under its own deadline.
pub async fn complete_within(
    client: &dyn LlmClient,
    prompt: &str,
    budget: Duration,
) -> Result<ProviderResult, LlmError> {
    match tokio::time::timeout(budget, client.complete(prompt)).await {
        Ok(result) => result,
        Err(_) => Err(LlmError::Timeout(budget)),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::{complete_within, LlmClient, LlmError, ProviderResult};

    struct SlowClient;

    #[async_trait]
    impl LlmClient for SlowClient {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn complete(&self, _prompt: &str) -> Result<ProviderResult, LlmError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(ProviderResult::new("late"))
        }
    }

    #[test]
    fn capacity_errors_are_the_only_retryable_class() {
        assert!(LlmError::from_status(503, "busy".into()).is_retryable());
        assert!(LlmError::from_status(500, "The model is overloaded".into()).is_retryable());
        assert!(LlmError::from_status(500, "status: UNAVAILABLE".into()).is_retryable());
        assert!(!LlmError::from_status(401, "invalid key".into()).is_retryable());
        assert!(!LlmError::Timeout(Duration::from_secs(1)).is_retryable());
    }

    #[tokio::test]
    async fn deadline_turns_slow_calls_into_timeouts() {
        let result = complete_within(&SlowClient, "hi", Duration::from_millis(20)).await;
        assert!(matches!(result, Err(LlmError::Timeout(_))));
    }
}
