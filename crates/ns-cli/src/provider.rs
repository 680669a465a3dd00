//! Remote capability over an OpenAI-compatible HTTP API.
//!
//! Classification and generation go to `POST {base}/chat/completions`;
//! similarity is the cosine of two vectors from `POST {base}/embeddings`,
//! cached per text in an [`EmbeddingCache`] bound to the embedding model.

use anyhow::{Result, bail};
use async_trait::async_trait;
use ns_core::capability::{
    CapabilityResult, Classification, ClassifyRequest, GenerateRequest, match_category,
};
use ns_core::{Capability, CapabilityError, Embedder, EmbeddingCache};
use reqwest::Client;
use serde_json::{Value, json};

pub const LLM_URL_ENV: &str = "NEON_SOUL_LLM_URL";
pub const LLM_MODEL_ENV: &str = "NEON_SOUL_LLM_MODEL";
pub const EMBED_MODEL_ENV: &str = "NEON_SOUL_EMBED_MODEL";
pub const API_KEY_ENV: &str = "NEON_SOUL_LLM_API_KEY";

/// Confidence reported for an answer that matched an allowed category.
const MATCHED_CONFIDENCE: f64 = 0.8;

#[derive(Debug, Clone, PartialEq)]
pub struct HttpConfig {
    pub base_url: String,
    pub model: String,
    pub embed_model: String,
    pub api_key: Option<String>,
}

impl HttpConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// `lookup` maps an environment variable name to its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let Some(base_url) = get(LLM_URL_ENV) else {
            bail!("{LLM_URL_ENV} must be set to use the http provider");
        };
        let Some(model) = get(LLM_MODEL_ENV) else {
            bail!("{LLM_MODEL_ENV} must be set to use the http provider");
        };
        let embed_model = get(EMBED_MODEL_ENV).unwrap_or_else(|| {
            tracing::debug!("{EMBED_MODEL_ENV} not set, embedding with {model}");
            model.clone()
        });
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            embed_model,
            api_key: get(API_KEY_ENV),
        })
    }
}

pub struct HttpProvider {
    client: Client,
    config: HttpConfig,
    cache: EmbeddingCache,
}

impl HttpProvider {
    pub fn new(config: HttpConfig) -> Self {
        let cache = EmbeddingCache::new(config.embed_model.clone());
        Self {
            client: Client::new(),
            config,
            cache,
        }
    }

    async fn post(&self, path: &str, body: Value) -> CapabilityResult<Value> {
        let url = format!("{}/{path}", self.config.base_url);
        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CapabilityError::Provider(format!("request to {url} failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CapabilityError::Provider(format!("{url} returned {status}: {text}")));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| CapabilityError::InvalidResponse(format!("{url}: {e}")))
    }

    async fn chat(&self, prompt: &str) -> CapabilityResult<String> {
        let body = json!({
            "model": self.config.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": 0,
        });
        let reply = self.post("chat/completions", body).await?;
        reply
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .ok_or_else(|| CapabilityError::InvalidResponse("no message content in reply".into()))
    }
}

#[async_trait]
impl Embedder for HttpProvider {
    fn model(&self) -> &str {
        &self.config.embed_model
    }

    async fn embed(&self, text: &str) -> CapabilityResult<Vec<f32>> {
        let body = json!({ "model": self.config.embed_model, "input": text });
        let reply = self.post("embeddings", body).await?;
        let values = reply
            .pointer("/data/0/embedding")
            .and_then(Value::as_array)
            .ok_or_else(|| CapabilityError::InvalidResponse("no embedding in reply".into()))?;
        values
            .iter()
            .map(|v| v.as_f64().map(|f| f as f32))
            .collect::<Option<Vec<f32>>>()
            .ok_or_else(|| CapabilityError::InvalidResponse("non-numeric embedding".into()))
    }
}

#[async_trait]
impl Capability for HttpProvider {
    fn name(&self) -> &str {
        "http"
    }

    async fn classify(&self, request: ClassifyRequest) -> CapabilityResult<Classification> {
        let answer = self.chat(&request.prompt).await?;
        tracing::debug!(task = request.task.as_str(), %answer, "classification reply");
        Ok(match match_category(&answer, &request.categories) {
            Some(category) => Classification::new(category, MATCHED_CONFIDENCE),
            None => Classification::unmatched(),
        })
    }

    async fn generate(&self, request: GenerateRequest) -> CapabilityResult<String> {
        self.chat(&request.prompt).await
    }

    async fn compare(&self, a: &str, b: &str) -> CapabilityResult<f64> {
        self.cache.similarity(self, a, b).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use ns_core::capability::{ClassifyTask, GenerateTask};

    use super::*;

    #[derive(Clone, Default)]
    struct Mock {
        reply: Arc<Mutex<String>>,
        requests: Arc<Mutex<Vec<(Option<String>, Value)>>>,
        embed_calls: Arc<Mutex<usize>>,
    }

    async fn chat(State(mock): State<Mock>, headers: HeaderMap, Json(body): Json<Value>) -> Json<Value> {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        mock.requests.lock().unwrap().push((auth, body));
        let reply = mock.reply.lock().unwrap().clone();
        Json(json!({"choices": [{"message": {"role": "assistant", "content": reply}}]}))
    }

    async fn embeddings(State(mock): State<Mock>, Json(body): Json<Value>) -> Json<Value> {
        *mock.embed_calls.lock().unwrap() += 1;
        let input = body["input"].as_str().unwrap_or_default();
        let vector = if input.contains("truth") {
            vec![1.0, 0.0]
        } else {
            vec![0.0, 1.0]
        };
        Json(json!({"data": [{"embedding": vector}]}))
    }

    async fn failing() -> (StatusCode, &'static str) {
        (StatusCode::INTERNAL_SERVER_ERROR, "model overloaded")
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/v1")
    }

    async fn mock_provider(reply: &str, api_key: Option<&str>) -> (Mock, HttpProvider) {
        let mock = Mock::default();
        *mock.reply.lock().unwrap() = reply.to_string();
        let router = Router::new()
            .route("/v1/chat/completions", post(chat))
            .route("/v1/embeddings", post(embeddings))
            .with_state(mock.clone());
        let base_url = serve(router).await;
        let provider = HttpProvider::new(HttpConfig {
            base_url,
            model: "chat-model".into(),
            embed_model: "embed-model".into(),
            api_key: api_key.map(str::to_string),
        });
        (mock, provider)
    }

    fn classify_request(task: ClassifyTask, categories: &[&str]) -> ClassifyRequest {
        ClassifyRequest {
            task,
            subject: "I always tell the truth".into(),
            categories: categories.iter().map(|c| c.to_string()).collect(),
            prompt: "Which dimension? <<<UNTRUSTED_TEXT>>>".into(),
        }
    }

    #[tokio::test]
    async fn test_classify_maps_reply_onto_categories() {
        let (mock, provider) = mock_provider("  Honesty-Framework.\n", Some("sk-test")).await;
        let c = provider
            .classify(classify_request(
                ClassifyTask::Dimension,
                &["identity-core", "honesty-framework"],
            ))
            .await
            .unwrap();
        assert_eq!(c.category.as_deref(), Some("honesty-framework"));

        let requests = mock.requests.lock().unwrap();
        let (auth, body) = &requests[0];
        assert_eq!(auth.as_deref(), Some("Bearer sk-test"));
        assert_eq!(body["model"], "chat-model");
        assert_eq!(body["messages"][0]["content"], "Which dimension? <<<UNTRUSTED_TEXT>>>");
    }

    #[tokio::test]
    async fn test_reply_outside_categories_is_unmatched() {
        let (mock, provider) = mock_provider("I think it is about kindness", None).await;
        let c = provider
            .classify(classify_request(ClassifyTask::Stance, &["assert", "deny"]))
            .await
            .unwrap();
        assert_eq!(c.category, None);
        assert_eq!(mock.requests.lock().unwrap()[0].0, None, "no key, no auth header");
    }

    #[tokio::test]
    async fn test_generate_returns_trimmed_text() {
        let (_mock, provider) = mock_provider("  yes, high: they conflict \n", None).await;
        let reply = provider
            .generate(GenerateRequest {
                task: GenerateTask::Tension,
                subjects: vec!["a".into(), "b".into()],
                prompt: "tension?".into(),
            })
            .await
            .unwrap();
        assert_eq!(reply, "yes, high: they conflict");
    }

    #[tokio::test]
    async fn test_compare_uses_cached_embeddings() {
        let (mock, provider) = mock_provider("", None).await;
        let same = provider
            .compare("the truth matters", "I tell the truth")
            .await
            .unwrap();
        assert!((same - 1.0).abs() < 1e-6);
        let different = provider.compare("the truth matters", "quiet mornings").await.unwrap();
        assert!(different.abs() < 1e-6);
        assert_eq!(*mock.embed_calls.lock().unwrap(), 3, "repeated text served from cache");
    }

    #[tokio::test]
    async fn test_server_error_is_a_provider_error() {
        let router = Router::new()
            .route("/v1/chat/completions", post(failing))
            .route("/v1/embeddings", post(failing));
        let base_url = serve(router).await;
        let provider = HttpProvider::new(HttpConfig {
            base_url,
            model: "m".into(),
            embed_model: "m".into(),
            api_key: None,
        });
        let err = provider
            .classify(classify_request(ClassifyTask::Stance, &["assert"]))
            .await
            .unwrap_err();
        assert!(matches!(&err, CapabilityError::Provider(msg) if msg.contains("500")), "{err}");
        assert!(provider.compare("a", "b").await.is_err());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_a_provider_error() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let provider = HttpProvider::new(HttpConfig {
            base_url: format!("http://127.0.0.1:{port}/v1"),
            model: "m".into(),
            embed_model: "m".into(),
            api_key: None,
        });
        let err = provider
            .generate(GenerateRequest {
                task: GenerateTask::Tension,
                subjects: vec![],
                prompt: "p".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CapabilityError::Provider(_)));
    }

    #[test]
    fn test_config_from_lookup() {
        let env: HashMap<&str, &str> = HashMap::from([
            (LLM_URL_ENV, "http://localhost:8080/v1/"),
            (LLM_MODEL_ENV, "chat-model"),
            (API_KEY_ENV, "  "),
        ]);
        let config = HttpConfig::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.base_url, "http://localhost:8080/v1");
        assert_eq!(config.embed_model, "chat-model", "falls back to the chat model");
        assert_eq!(config.api_key, None, "blank key is no key");
    }

    #[test]
    fn test_config_requires_url_and_model() {
        let err = HttpConfig::from_lookup(|_| None).unwrap_err();
        assert!(err.to_string().contains(LLM_URL_ENV));
        let err = HttpConfig::from_lookup(|k| (k == LLM_URL_ENV).then(|| "http://x".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains(LLM_MODEL_ENV));
    }
}
