//! The completion capability every agent is driven by.

pub mod retry;
pub mod rig_backend;

use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

use crate::memory::Turn;

pub use retry::{RetryPolicy, RetryingGenerator};
pub use rig_backend::{BackendKind, RigGenerator};

// Status codes only count as whole tokens, so "4000ms" or "14000 tokens" stay transient.
static RE_RATE_LIMITED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b429\b|rate limit|too many requests").expect("valid regex")
});
static RE_INVALID_REQUEST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b400\b|invalid request|bad request|context length").expect("valid regex")
});

#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    /// The provider asked us to slow down
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Timeouts, dropped connections, 5xx and other retryable failures
    #[error("Transient failure: {0}")]
    Transient(String),

    /// The request itself was rejected (too long, bad parameters)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Box<GenerationError>,
    },
}

impl GenerationError {
    /// Map a provider error message onto the retry taxonomy.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if RE_RATE_LIMITED.is_match(&lower) {
            GenerationError::RateLimited(message)
        } else if RE_INVALID_REQUEST.is_match(&lower) {
            GenerationError::InvalidRequest(message)
        } else {
            GenerationError::Transient(message)
        }
    }
}

/// `respond(conversation) -> text` over any model backend.
#[async_trait]
pub trait GenerationPort: Send + Sync {
    /// Identifier of the backing model, persisted with results.
    fn model_name(&self) -> &str;

    async fn respond(&self, conversation: &[Turn]) -> Result<String, GenerationError>;
}
