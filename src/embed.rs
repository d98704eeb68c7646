//! Embedding production.
//!
//! Wraps the provider's embedding call with the policies the pipeline
//! needs: bounded input length, a per-call deadline, and bounded retry with
//! exponential backoff for transient upstream failures.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::config::EmbedConfig;
use crate::errors::CoreError;
use crate::llm::LlmProvider;

pub struct Embedder {
    provider: Arc<dyn LlmProvider>,
    model: String,
    config: EmbedConfig,
    call_timeout: Duration,
}

impl Embedder {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        model: String,
        config: EmbedConfig,
        call_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            model,
            config,
            call_timeout,
        }
    }

    /// Embed one text into a fixed-length vector.
    ///
    /// Over-long input is truncated at a char boundary and logged; it is
    /// never silently mangled mid-codepoint or passed through to fail
    /// upstream.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, CoreError> {
        if text.trim().is_empty() {
            return Err(CoreError::Validation(
                "cannot embed empty text".to_string(),
            ));
        }

        let input = self.bounded_input(text);
        let inputs = vec![input];

        let mut last_err = None;
        for attempt in 1..=self.config.max_attempts.max(1) {
            match tokio::time::timeout(
                self.call_timeout,
                self.provider.embed(&inputs, &self.model),
            )
            .await
            {
                Ok(Ok(mut vectors)) => {
                    if vectors.len() != 1 || vectors[0].is_empty() {
                        return Err(CoreError::Upstream {
                            service: "embedding",
                            detail: format!(
                                "expected one non-empty vector, got {}",
                                vectors.len()
                            ),
                        });
                    }
                    return Ok(vectors.remove(0));
                }
                Ok(Err(err)) => {
                    tracing::warn!(attempt, "embedding call failed: {err}");
                    last_err = Some(err);
                }
                Err(_) => {
                    tracing::warn!(
                        attempt,
                        "embedding call exceeded {:?} deadline",
                        self.call_timeout
                    );
                    last_err = Some(CoreError::Upstream {
                        service: "embedding",
                        detail: format!("deadline of {:?} exceeded", self.call_timeout),
                    });
                }
            }

            if attempt < self.config.max_attempts {
                tokio::time::sleep(self.backoff_delay(attempt)).await;
            }
        }

        let err = last_err.unwrap_or(CoreError::Upstream {
            service: "embedding",
            detail: "no attempts were made".to_string(),
        });
        Err(err.annotate(&format!(
            "after {} attempts",
            self.config.max_attempts.max(1)
        )))
    }

    fn bounded_input(&self, text: &str) -> String {
        let max_chars = self.config.max_input_chars;
        if text.chars().count() <= max_chars {
            return text.to_string();
        }

        tracing::warn!(
            max_chars,
            "embedding input truncated from {} chars",
            text.chars().count()
        );
        text.chars().take(max_chars).collect()
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.backoff_base_ms.max(1);
        let exp = base.saturating_mul(1u64 << (attempt - 1).min(16));
        let jitter = rand::rng().random_range(0..base);
        Duration::from_millis(exp + jitter)
    }
}
