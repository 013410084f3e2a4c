use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use super::{GenerationError, GenerationPort};
use crate::memory::Turn;

const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_RATE_LIMIT_DELAY_SECS: u64 = 10;
const DEFAULT_TRANSIENT_DELAY_SECS: u64 = 5;

/// How hard to try before a generation failure fails the patient.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub rate_limit_delay_secs: u64,
    pub transient_delay_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            rate_limit_delay_secs: DEFAULT_RATE_LIMIT_DELAY_SECS,
            transient_delay_secs: DEFAULT_TRANSIENT_DELAY_SECS,
        }
    }
}

impl RetryPolicy {
    /// Same attempt budget, no sleeping between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            rate_limit_delay_secs: 0,
            transient_delay_secs: 0,
        }
    }

    fn rate_limit_delay(&self) -> Duration {
        Duration::from_secs(self.rate_limit_delay_secs)
    }

    fn transient_delay(&self) -> Duration {
        Duration::from_secs(self.transient_delay_secs)
    }
}

/// Wraps a port with bounded retries and an optional one-time fallback model
/// used when the primary rejects a request as invalid.
pub struct RetryingGenerator {
    primary: Arc<dyn GenerationPort>,
    fallback: Option<Arc<dyn GenerationPort>>,
    policy: RetryPolicy,
}

impl RetryingGenerator {
    pub fn new(primary: Arc<dyn GenerationPort>, policy: RetryPolicy) -> Self {
        Self {
            primary,
            fallback: None,
            policy,
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn GenerationPort>) -> Self {
        self.fallback = Some(fallback);
        self
    }
}

#[async_trait]
impl GenerationPort for RetryingGenerator {
    fn model_name(&self) -> &str {
        self.primary.model_name()
    }

    /// Retryable failures consume attempts. Switching to the fallback does not,
    /// and no delay follows the final attempt.
    async fn respond(&self, conversation: &[Turn]) -> Result<String, GenerationError> {
        let mut current = self.primary.clone();
        let mut switched = false;
        let mut attempt = 0;
        let attempts = self.policy.max_attempts.max(1);

        loop {
            let err = match current.respond(conversation).await {
                Ok(text) => return Ok(text),
                Err(err) => err,
            };

            let delay = match &err {
                GenerationError::RateLimited(_) => self.policy.rate_limit_delay(),
                GenerationError::Transient(_) => self.policy.transient_delay(),
                GenerationError::InvalidRequest(msg) => match &self.fallback {
                    Some(fallback) if !switched => {
                        warn!(
                            model = %current.model_name(),
                            fallback = %fallback.model_name(),
                            error = %msg,
                            "Request rejected, switching to fallback model"
                        );
                        current = fallback.clone();
                        switched = true;
                        continue;
                    }
                    _ => return Err(err),
                },
                GenerationError::Exhausted { .. } => return Err(err),
            };

            attempt += 1;
            if attempt >= attempts {
                return Err(GenerationError::Exhausted {
                    attempts,
                    last: Box::new(err),
                });
            }
            warn!(
                model = %current.model_name(),
                attempt,
                error = %err,
                "Generation failed, retrying in {:?}",
                delay
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FlakyGenerator, ScriptedGenerator};

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let flaky = Arc::new(FlakyGenerator::new(
            "flaky",
            vec![
                GenerationError::RateLimited("429".to_string()),
                GenerationError::Transient("timeout".to_string()),
            ],
            "ok",
        ));
        let generator = RetryingGenerator::new(flaky.clone(), RetryPolicy::immediate(3));

        let reply = generator.respond(&[Turn::user("hi")]).await.unwrap();
        assert_eq!(reply, "ok");
        assert_eq!(flaky.calls(), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_is_reported() {
        let flaky = Arc::new(FlakyGenerator::new(
            "flaky",
            vec![GenerationError::Transient("down".to_string()); 4],
            "never",
        ));
        let generator = RetryingGenerator::new(flaky.clone(), RetryPolicy::immediate(2));

        let err = generator.respond(&[Turn::user("hi")]).await.unwrap_err();
        assert!(matches!(err, GenerationError::Exhausted { attempts: 2, .. }));
        assert_eq!(flaky.calls(), 2);
    }

    #[tokio::test]
    async fn test_invalid_request_switches_to_fallback_once() {
        let primary = Arc::new(FlakyGenerator::new(
            "small",
            vec![GenerationError::InvalidRequest("too long".to_string())],
            "unused",
        ));
        let fallback = Arc::new(ScriptedGenerator::new("large", ["from fallback"]));
        let generator = RetryingGenerator::new(primary.clone(), RetryPolicy::immediate(3))
            .with_fallback(fallback.clone());

        let reply = generator.respond(&[Turn::user("hi")]).await.unwrap();
        assert_eq!(reply, "from fallback");
        assert_eq!(primary.calls(), 1);
        assert_eq!(generator.model_name(), "small");
    }

    #[tokio::test]
    async fn test_invalid_request_without_fallback_fails_fast() {
        let primary = Arc::new(FlakyGenerator::new(
            "small",
            vec![GenerationError::InvalidRequest("bad".to_string())],
            "unused",
        ));
        let generator = RetryingGenerator::new(primary.clone(), RetryPolicy::immediate(5));

        let err = generator.respond(&[Turn::user("hi")]).await.unwrap_err();
        assert!(matches!(err, GenerationError::InvalidRequest(_)));
        assert_eq!(primary.calls(), 1);
    }

    #[tokio::test]
    async fn test_fallback_is_tried_even_on_single_attempt_budget() {
        let primary = Arc::new(FlakyGenerator::new(
            "small",
            vec![GenerationError::InvalidRequest("too long".to_string())],
            "unused",
        ));
        let fallback = Arc::new(ScriptedGenerator::new("large", ["from fallback"]));
        let generator = RetryingGenerator::new(primary.clone(), RetryPolicy::immediate(1))
            .with_fallback(fallback.clone());

        let reply = generator.respond(&[Turn::user("hi")]).await.unwrap();
        assert_eq!(reply, "from fallback");
        assert_eq!(fallback.conversations().len(), 1);
    }

    #[tokio::test]
    async fn test_no_delay_after_final_attempt() {
        let flaky = Arc::new(FlakyGenerator::new(
            "flaky",
            vec![GenerationError::RateLimited("slow down".to_string())],
            "never",
        ));
        let policy = RetryPolicy {
            max_attempts: 1,
            rate_limit_delay_secs: 3600,
            transient_delay_secs: 3600,
        };
        let generator = RetryingGenerator::new(flaky.clone(), policy);

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            generator.respond(&[Turn::user("hi")]),
        )
        .await
        .expect("gave up without sleeping");
        assert!(matches!(outcome, Err(GenerationError::Exhausted { attempts: 1, .. })));
        assert_eq!(flaky.calls(), 1);
    }
}
