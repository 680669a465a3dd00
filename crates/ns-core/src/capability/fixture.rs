//! Recorded-answer provider for tests and offline demos.
//!
//! Answers are chosen by case-insensitive substring rules over the raw
//! subject text; the first matching rule wins. Every call is counted so tests
//! can assert how often the pipeline reached the capability.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{
    Capability, CapabilityError, CapabilityResult, Classification, ClassifyRequest,
    ClassifyTask, GenerateRequest, GenerateTask,
};
use crate::tokenizer::cosine_similarity;

type Generalizer = Box<dyn Fn(&str) -> String + Send + Sync>;

pub struct FixtureProvider {
    classify_rules: Vec<(ClassifyTask, String, String)>,
    classify_defaults: HashMap<ClassifyTask, String>,
    classify_failures: Vec<String>,
    fail_all_classify: bool,
    similarity_rules: Vec<(String, String, f64)>,
    fail_compare: bool,
    tension_rules: Vec<(String, String, String)>,
    canonical_reply: Option<String>,
    generalizer: Option<Generalizer>,
    latency: Option<Duration>,
    remaining_failures: AtomicUsize,
    classify_calls: AtomicUsize,
    generate_calls: AtomicUsize,
    compare_calls: AtomicUsize,
    classify_prompts: Mutex<Vec<String>>,
}

impl Default for FixtureProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl FixtureProvider {
    pub fn new() -> Self {
        let classify_defaults = HashMap::from([
            (ClassifyTask::IdentityBearing, "yes".to_string()),
            (ClassifyTask::Dimension, "identity-core".to_string()),
            (ClassifyTask::Stance, "assert".to_string()),
            (ClassifyTask::Importance, "supporting".to_string()),
        ]);
        Self {
            classify_rules: Vec::new(),
            classify_defaults,
            classify_failures: Vec::new(),
            fail_all_classify: false,
            similarity_rules: Vec::new(),
            fail_compare: false,
            tension_rules: Vec::new(),
            canonical_reply: None,
            generalizer: None,
            latency: None,
            remaining_failures: AtomicUsize::new(0),
            classify_calls: AtomicUsize::new(0),
            generate_calls: AtomicUsize::new(0),
            compare_calls: AtomicUsize::new(0),
            classify_prompts: Mutex::new(Vec::new()),
        }
    }

    /// Answer `category` for `task` when the subject contains `needle`.
    pub fn classify_when(mut self, task: ClassifyTask, needle: &str, category: &str) -> Self {
        self.classify_rules
            .push((task, needle.to_lowercase(), category.to_string()));
        self
    }

    pub fn classify_default(mut self, task: ClassifyTask, category: &str) -> Self {
        self.classify_defaults.insert(task, category.to_string());
        self
    }

    /// Every classification of a subject containing `needle` fails.
    pub fn fail_classify_when(mut self, needle: &str) -> Self {
        self.classify_failures.push(needle.to_lowercase());
        self
    }

    pub fn fail_all_classify(mut self) -> Self {
        self.fail_all_classify = true;
        self
    }

    /// The first `n` calls of any kind fail with a provider error.
    pub fn fail_first(self, n: usize) -> Self {
        self.remaining_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Score `score` when one text contains `a` and the other contains `b`.
    /// Unmatched pairs fall back to lexical cosine similarity.
    pub fn similarity(mut self, a: &str, b: &str, score: f64) -> Self {
        self.similarity_rules
            .push((a.to_lowercase(), b.to_lowercase(), score));
        self
    }

    pub fn fail_compare(mut self) -> Self {
        self.fail_compare = true;
        self
    }

    /// Tension reply for a pair of principles containing `a` and `b`.
    /// Pairs without a rule get "no".
    pub fn tension(mut self, a: &str, b: &str, reply: &str) -> Self {
        self.tension_rules
            .push((a.to_lowercase(), b.to_lowercase(), reply.to_string()));
        self
    }

    pub fn canonical_reply(mut self, reply: &str) -> Self {
        self.canonical_reply = Some(reply.to_string());
        self
    }

    pub fn generalize_with(mut self, f: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        self.generalizer = Some(Box::new(f));
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn classify_calls(&self) -> usize {
        self.classify_calls.load(Ordering::SeqCst)
    }

    pub fn generate_calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }

    pub fn compare_calls(&self) -> usize {
        self.compare_calls.load(Ordering::SeqCst)
    }

    pub fn classify_prompts(&self) -> Vec<String> {
        self.classify_prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    async fn before_call(&self) -> CapabilityResult<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let injected = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(CapabilityError::Provider("injected failure".into()));
        }
        Ok(())
    }
}

fn pair_matches(x: &str, y: &str, a: &str, b: &str) -> bool {
    (x.contains(a) && y.contains(b)) || (x.contains(b) && y.contains(a))
}

#[async_trait]
impl Capability for FixtureProvider {
    fn name(&self) -> &str {
        "fixture"
    }

    fn supports(&self, task: GenerateTask) -> bool {
        match task {
            GenerateTask::Generalize => self.generalizer.is_some(),
            GenerateTask::Tension => true,
            GenerateTask::CanonicalForms => self.canonical_reply.is_some(),
        }
    }

    async fn classify(&self, request: ClassifyRequest) -> CapabilityResult<Classification> {
        self.classify_calls.fetch_add(1, Ordering::SeqCst);
        self.classify_prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.prompt.clone());
        self.before_call().await?;

        let subject = request.subject.to_lowercase();
        if self.fail_all_classify || self.classify_failures.iter().any(|n| subject.contains(n)) {
            return Err(CapabilityError::Provider("scripted failure".into()));
        }

        let answer = self
            .classify_rules
            .iter()
            .find(|(task, needle, _)| *task == request.task && subject.contains(needle))
            .map(|(_, _, category)| category.clone())
            .or_else(|| self.classify_defaults.get(&request.task).cloned());

        Ok(match answer {
            Some(category) => Classification::new(category, 0.9),
            None => Classification::unmatched(),
        })
    }

    async fn generate(&self, request: GenerateRequest) -> CapabilityResult<String> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        self.before_call().await?;

        let subject = |i: usize| {
            request
                .subjects
                .get(i)
                .map(|s| s.to_lowercase())
                .unwrap_or_default()
        };

        match request.task {
            GenerateTask::Generalize => match &self.generalizer {
                Some(f) => Ok(f(request.subjects.first().map(String::as_str).unwrap_or(""))),
                None => Err(CapabilityError::Unsupported("generalize".into())),
            },
            GenerateTask::Tension => {
                let (x, y) = (subject(0), subject(1));
                Ok(self
                    .tension_rules
                    .iter()
                    .find(|(a, b, _)| pair_matches(&x, &y, a, b))
                    .map(|(_, _, reply)| reply.clone())
                    .unwrap_or_else(|| "no".to_string()))
            }
            GenerateTask::CanonicalForms => self
                .canonical_reply
                .clone()
                .ok_or_else(|| CapabilityError::Unsupported("canonical forms".into())),
        }
    }

    async fn compare(&self, a: &str, b: &str) -> CapabilityResult<f64> {
        self.compare_calls.fetch_add(1, Ordering::SeqCst);
        self.before_call().await?;
        if self.fail_compare {
            return Err(CapabilityError::Provider("scripted similarity failure".into()));
        }

        let (x, y) = (a.to_lowercase(), b.to_lowercase());
        Ok(self
            .similarity_rules
            .iter()
            .find(|(na, nb, _)| pair_matches(&x, &y, na, nb))
            .map(|(_, _, score)| *score)
            .unwrap_or_else(|| cosine_similarity(a, b)))
    }
}
