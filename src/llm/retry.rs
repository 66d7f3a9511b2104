//! Rate-limit aware wrapper around a [`TextGenerator`].

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

use super::TextGenerator;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Wait after the n-th rate-limited attempt is `n * backoff_step`.
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_step: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff_step * attempt
    }
}

/// Shared by the reply and summary steps of a turn.
#[derive(Clone)]
pub struct GenerationClient {
    backend: Arc<dyn TextGenerator>,
    policy: RetryPolicy,
}

impl GenerationClient {
    pub fn new(backend: Arc<dyn TextGenerator>) -> Self {
        Self::with_policy(backend, RetryPolicy::default())
    }

    pub fn with_policy(backend: Arc<dyn TextGenerator>, policy: RetryPolicy) -> Self {
        Self { backend, policy }
    }

    /// `None` means generation is unavailable for this prompt: either the
    /// rate limit outlasted every attempt or the backend failed outright.
    pub async fn generate(&self, prompt: &str) -> Option<String> {
        for attempt in 1..=self.policy.max_attempts {
            match self.backend.generate(prompt).await {
                Ok(text) if !text.trim().is_empty() => return Some(text),
                Ok(_) => {
                    warn!("Generation returned empty text");
                    return None;
                }
                Err(e) if e.is_rate_limited() => {
                    let wait = self.policy.delay_for(attempt);
                    warn!(
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        "{}. Retrying in {:?}",
                        e,
                        wait
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(e) => {
                    error!("Generation failed: {}", e);
                    return None;
                }
            }
        }

        warn!(
            "Generation still rate limited after {} attempts",
            self.policy.max_attempts
        );
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GenerationError;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Replays scripted results and records when each call happened.
    struct ScriptedGenerator {
        script: Mutex<VecDeque<Result<String, GenerationError>>>,
        calls: Mutex<Vec<Instant>>,
    }

    impl ScriptedGenerator {
        fn new(script: Vec<Result<String, GenerationError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        async fn generate(&self, _prompt: &str) -> Result<String, GenerationError> {
            self.calls.lock().unwrap().push(Instant::now());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(GenerationError::Backend("script exhausted".into())))
        }
    }

    fn rate_limited() -> Result<String, GenerationError> {
        Err(GenerationError::RateLimited("quota".into()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_attempt() {
        let backend = ScriptedGenerator::new(vec![Ok("hi there".into())]);
        let client = GenerationClient::new(backend.clone());

        assert_eq!(client.generate("hello").await.as_deref(), Some("hi there"));
        assert_eq!(backend.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_rate_limit_with_linear_backoff() {
        let backend = ScriptedGenerator::new(vec![rate_limited(), rate_limited(), Ok("done".into())]);
        let client = GenerationClient::new(backend.clone());

        assert_eq!(client.generate("hello").await.as_deref(), Some("done"));

        let calls = backend.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1] - calls[0], Duration::from_secs(2));
        assert_eq!(calls[2] - calls[1], Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_three_rate_limits() {
        let backend = ScriptedGenerator::new(vec![
            rate_limited(),
            rate_limited(),
            rate_limited(),
            Ok("too late".into()),
        ]);
        let client = GenerationClient::new(backend.clone());

        let start = Instant::now();
        assert_eq!(client.generate("hello").await, None);

        let calls = backend.calls();
        assert_eq!(calls.len(), 3);
        // Waits of 2, 4 and 6 seconds follow the three attempts
        assert_eq!(start.elapsed(), Duration::from_secs(12));
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_errors_abort_immediately() {
        let backend = ScriptedGenerator::new(vec![
            Err(GenerationError::Api {
                status: 400,
                message: "bad request".into(),
            }),
            Ok("never reached".into()),
        ]);
        let client = GenerationClient::new(backend.clone());

        let start = Instant::now();
        assert_eq!(client.generate("hello").await, None);
        assert_eq!(backend.calls().len(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_then_hard_error() {
        let backend = ScriptedGenerator::new(vec![
            rate_limited(),
            Err(GenerationError::EmptyResponse),
        ]);
        let client = GenerationClient::new(backend.clone());

        assert_eq!(client.generate("hello").await, None);
        assert_eq!(backend.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blank_text_is_unavailable() {
        let backend = ScriptedGenerator::new(vec![Ok("   ".into())]);
        let client = GenerationClient::new(backend.clone());

        assert_eq!(client.generate("hello").await, None);
        assert_eq!(backend.calls().len(), 1);
    }

    #[test]
    fn test_policy_delays() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(6));
    }
}
