use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use super::{
    Capability, CapabilityError, CapabilityResult, Classification, ClassifyRequest,
    ClassifyTask, GenerateRequest, GenerateTask, match_category, prompt,
};
use crate::constants::{DEFAULT_BACKOFF_MS, DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT_SECS};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub timeout: Duration,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            backoff: Duration::from_millis(DEFAULT_BACKOFF_MS),
        }
    }
}

impl RetryPolicy {
    /// Same retry count, no waiting between attempts.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            backoff: Duration::ZERO,
        }
    }

    fn attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Linear backoff with up to 50% jitter.
    fn delay(&self, attempt: u32) -> Duration {
        if self.backoff.is_zero() {
            return Duration::ZERO;
        }
        let base = self.backoff.as_millis() as u64 * u64::from(attempt);
        let jitter = rand::rng().random_range(0..=base / 2);
        Duration::from_millis(base + jitter)
    }
}

/// Timeout + bounded retry wrapper. Exhausted retries yield `None`, never
/// an error; the caller substitutes its documented default.
#[derive(Clone)]
pub struct ReliableCapability {
    inner: Arc<dyn Capability>,
    policy: RetryPolicy,
}

impl ReliableCapability {
    pub fn new(inner: Arc<dyn Capability>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn supports(&self, task: GenerateTask) -> bool {
        self.inner.supports(task)
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    async fn timed<T>(
        &self,
        fut: impl Future<Output = CapabilityResult<T>>,
    ) -> CapabilityResult<T> {
        match tokio::time::timeout(self.policy.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(CapabilityError::Timeout(self.policy.timeout)),
        }
    }

    /// Classify `subject` into one of `categories`. An answer outside the set
    /// triggers a corrective re-prompt on the next attempt.
    pub async fn classify(
        &self,
        task: ClassifyTask,
        subject: &str,
        categories: &[&str],
    ) -> Option<Classification> {
        let categories: Vec<String> = categories.iter().map(|c| c.to_string()).collect();
        let mut correction: Option<String> = None;

        for attempt in 0..self.policy.attempts() {
            if attempt > 0 {
                tokio::time::sleep(self.policy.delay(attempt)).await;
            }
            let request = ClassifyRequest {
                task,
                subject: subject.to_string(),
                categories: categories.clone(),
                prompt: prompt::classify(task, subject, &categories, correction.as_deref()),
            };

            match self.timed(self.inner.classify(request)).await {
                Ok(Classification {
                    category: Some(answer),
                    confidence,
                }) => match match_category(&answer, &categories) {
                    Some(category) => {
                        return Some(Classification {
                            category: Some(category),
                            confidence,
                        });
                    }
                    None => {
                        tracing::debug!(task = task.as_str(), %answer, "answer outside categories");
                        correction = Some(answer);
                    }
                },
                Ok(Classification { category: None, .. }) => {
                    tracing::debug!(task = task.as_str(), "provider returned no category");
                    correction = Some(String::new());
                }
                Err(e) if e.is_permanent() => {
                    tracing::warn!(task = task.as_str(), "classification unavailable: {e}");
                    return None;
                }
                Err(e) => {
                    tracing::debug!(task = task.as_str(), attempt, "classification failed: {e}");
                }
            }
        }

        tracing::warn!(
            task = task.as_str(),
            attempts = self.policy.attempts(),
            "classification unavailable after retries"
        );
        None
    }

    /// Run a generation call, retrying until `parse` accepts the reply.
    pub async fn generate<T>(
        &self,
        task: GenerateTask,
        subjects: &[&str],
        rendered_prompt: String,
        parse: impl Fn(&str) -> Option<T>,
    ) -> Option<T> {
        for attempt in 0..self.policy.attempts() {
            if attempt > 0 {
                tokio::time::sleep(self.policy.delay(attempt)).await;
            }
            let request = GenerateRequest {
                task,
                subjects: subjects.iter().map(|s| s.to_string()).collect(),
                prompt: rendered_prompt.clone(),
            };

            match self.timed(self.inner.generate(request)).await {
                Ok(reply) => match parse(&reply) {
                    Some(value) => return Some(value),
                    None => {
                        tracing::debug!(task = task.as_str(), attempt, "unparseable reply: {reply:?}");
                    }
                },
                Err(e) if e.is_permanent() => {
                    tracing::warn!(task = task.as_str(), "generation unavailable: {e}");
                    return None;
                }
                Err(e) => {
                    tracing::debug!(task = task.as_str(), attempt, "generation failed: {e}");
                }
            }
        }

        tracing::warn!(
            task = task.as_str(),
            attempts = self.policy.attempts(),
            "generation unavailable after retries"
        );
        None
    }

    pub async fn compare(&self, a: &str, b: &str) -> Option<f64> {
        for attempt in 0..self.policy.attempts() {
            if attempt > 0 {
                tokio::time::sleep(self.policy.delay(attempt)).await;
            }
            match self.timed(self.inner.compare(a, b)).await {
                Ok(score) if score.is_finite() => return Some(score.clamp(0.0, 1.0)),
                Ok(score) => {
                    tracing::debug!(attempt, "non-finite similarity {score}");
                }
                Err(e) if e.is_permanent() => {
                    tracing::warn!("similarity unavailable: {e}");
                    return None;
                }
                Err(e) => {
                    tracing::debug!(attempt, "similarity failed: {e}");
                }
            }
        }

        tracing::warn!(
            attempts = self.policy.attempts(),
            "similarity unavailable after retries"
        );
        None
    }
}
