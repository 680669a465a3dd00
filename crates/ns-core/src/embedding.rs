//! Embedding-backed similarity.
//!
//! [`EmbeddingCache`] is an ordinary owned value: whoever builds a provider
//! creates one and hands it over. It is bound to a single model id; binding a
//! different model drops every vector. Failed embeddings are never stored, so
//! one provider outage cannot poison later lookups.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::capability::{CapabilityError, CapabilityResult};

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier; vectors from different models are not comparable.
    fn model(&self) -> &str;

    async fn embed(&self, text: &str) -> CapabilityResult<Vec<f32>>;
}

#[derive(Default)]
struct CacheInner {
    model: String,
    vectors: HashMap<String, Arc<[f32]>>,
}

#[derive(Default)]
pub struct EmbeddingCache {
    inner: Mutex<CacheInner>,
    capacity: Option<usize>,
}

impl EmbeddingCache {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                model: model.into(),
                vectors: HashMap::new(),
            }),
            capacity: None,
        }
    }

    /// Stop caching new vectors once `capacity` entries are held.
    pub fn with_capacity_limit(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner> {
        // A panic while holding the lock leaves a plain map behind; reuse it.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Switch to `model`, invalidating all vectors if it differs. Returns
    /// whether the cache was cleared.
    pub fn bind_model(&self, model: &str) -> bool {
        let mut inner = self.lock();
        if inner.model == model {
            return false;
        }
        tracing::debug!(from = %inner.model, to = model, "embedding model changed, clearing cache");
        inner.model = model.to_string();
        inner.vectors.clear();
        true
    }

    pub fn model(&self) -> String {
        self.lock().model.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, text: &str) -> Option<Arc<[f32]>> {
        self.lock().vectors.get(text).cloned()
    }

    /// Cached vector for `text`, computing it with `embedder` on a miss.
    pub async fn embed(&self, embedder: &dyn Embedder, text: &str) -> CapabilityResult<Arc<[f32]>> {
        self.bind_model(embedder.model());
        if let Some(hit) = self.get(text) {
            return Ok(hit);
        }

        let vector: Arc<[f32]> = embedder.embed(text).await?.into();
        if vector.is_empty() {
            return Err(CapabilityError::InvalidResponse("empty embedding".into()));
        }

        let mut inner = self.lock();
        // The model may have been rebound while the request was in flight.
        if inner.model == embedder.model()
            && self.capacity.is_none_or(|cap| inner.vectors.len() < cap)
        {
            inner.vectors.insert(text.to_string(), vector.clone());
        }
        Ok(vector)
    }

    pub async fn similarity(
        &self,
        embedder: &dyn Embedder,
        a: &str,
        b: &str,
    ) -> CapabilityResult<f64> {
        let va = self.embed(embedder, a).await?;
        let vb = self.embed(embedder, b).await?;
        cosine(&va, &vb).ok_or_else(|| {
            CapabilityError::InvalidResponse(format!(
                "embedding dimensions differ ({} vs {})",
                va.len(),
                vb.len()
            ))
        })
    }
}

/// Cosine similarity clamped to [0, 1]. `None` when dimensions differ.
pub fn cosine(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() {
        return None;
    }
    let (mut dot, mut na, mut nb) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return Some(0.0);
    }
    Some((dot / (na.sqrt() * nb.sqrt())).clamp(0.0, 1.0))
}
