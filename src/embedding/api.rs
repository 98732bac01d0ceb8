//! HTTP embedding provider.
//!
//! Request and response shapes per provider kind:
//!
//! | kind           | request body                     | response                               |
//! |----------------|----------------------------------|----------------------------------------|
//! | `hugging_face` | `{"inputs": text}`               | `[..]` or `[[..]]`                     |
//! | `openai`       | `{"input": text, "model": name}` | `{"data": [{"embedding": [..]}]}`      |
//! | `custom`       | `{"text": text}`                 | `{"embeddings": [[..]]}` or a bare array |

use super::EmbeddingProvider;
use super::retry::{RetryConfig, execute_with_retry_async};
use crate::distance::l2_normalize_in_place;
use crate::error::EmbeddingError;
use crate::types::Metadata;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiProviderKind {
    #[serde(alias = "hf", alias = "huggingface")]
    HuggingFace,
    #[serde(rename = "openai", alias = "gpt")]
    OpenAi,
    #[default]
    Custom,
}

impl ApiProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiProviderKind::HuggingFace => "hugging_face",
            ApiProviderKind::OpenAi => "openai",
            ApiProviderKind::Custom => "custom",
        }
    }
}

impl FromStr for ApiProviderKind {
    type Err = EmbeddingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hf" | "huggingface" | "hugging_face" => Ok(ApiProviderKind::HuggingFace),
            "openai" | "gpt" => Ok(ApiProviderKind::OpenAi),
            "custom" => Ok(ApiProviderKind::Custom),
            other => Err(EmbeddingError::InvalidConfig(format!(
                "unknown api provider `{other}`"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiConfig {
    pub url: String,
    pub kind: ApiProviderKind,
    /// Sent as `model` to OpenAI-compatible endpoints.
    pub model: Option<String>,
    /// Full `Authorization` header value, e.g. `Bearer sk-...`.
    pub auth_header: Option<String>,
    pub timeout: Duration,
    pub normalize: bool,
    pub retry: RetryConfig,
}

impl ApiConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            kind: ApiProviderKind::Custom,
            model: None,
            auth_header: None,
            timeout: Duration::from_secs(30),
            normalize: false,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_kind(mut self, kind: ApiProviderKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_auth_header(mut self, header: impl Into<String>) -> Self {
        self.auth_header = Some(header.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_normalize(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

pub struct ApiEmbedder {
    client: reqwest::Client,
    config: ApiConfig,
    dimension: usize,
    name: String,
}

impl ApiEmbedder {
    pub fn new(config: ApiConfig, dimension: usize) -> Result<Self, EmbeddingError> {
        if config.url.trim().is_empty() {
            return Err(EmbeddingError::InvalidConfig("url is required".into()));
        }
        if dimension == 0 {
            return Err(EmbeddingError::InvalidConfig(
                "dimension must be greater than zero".into(),
            ));
        }
        if config.kind == ApiProviderKind::OpenAi && config.model.is_none() {
            return Err(EmbeddingError::InvalidConfig(
                "model is required for openai endpoints".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout.min(Duration::from_secs(10)))
            .build()
            .map_err(|e| EmbeddingError::InvalidConfig(format!("http client: {e}")))?;
        let name = format!("api:{}", config.kind.as_str());
        Ok(Self {
            client,
            config,
            dimension,
            name,
        })
    }

    fn payload(&self, text: &str) -> Value {
        match self.config.kind {
            ApiProviderKind::HuggingFace => json!({ "inputs": text }),
            ApiProviderKind::OpenAi => json!({ "input": text, "model": self.config.model }),
            ApiProviderKind::Custom => json!({ "text": text }),
        }
    }

    async fn send(&self, payload: &Value) -> Result<Value, EmbeddingError> {
        let mut request = self.client.post(&self.config.url);
        if let Some(header) = self.config.auth_header.as_deref() {
            request = request.header("Authorization", header);
        }

        let response = request
            .json(payload)
            .send()
            .await
            .map_err(|e| EmbeddingError::Unavailable(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("HTTP error {status}: {body}");
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                EmbeddingError::Unavailable(message)
            } else {
                EmbeddingError::Rejected(message)
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(format!("invalid JSON body: {e}")))
    }
}

#[async_trait]
impl EmbeddingProvider for ApiEmbedder {
    async fn embed(&self, content: &str, _metadata: &Metadata) -> Result<Vec<f32>, EmbeddingError> {
        let payload = self.payload(content);
        let outcome = execute_with_retry_async(&self.config.retry, |_| self.send(&payload)).await;
        if outcome.attempts > 1 {
            debug!(
                provider = %self.name,
                attempts = outcome.attempts,
                elapsed_micros = outcome.total_duration.as_micros() as u64,
                "provider_attempts"
            );
        }
        let response = outcome.into_result()?;

        let mut vectors = parse_embeddings_from_value(response)?;
        if vectors.len() != 1 {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected one embedding, got {}",
                vectors.len()
            )));
        }
        let mut vector = vectors.swap_remove(0);
        if self.config.normalize {
            l2_normalize_in_place(&mut vector);
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn parse_embeddings_from_value(value: Value) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    match value {
        Value::Object(mut map) => {
            if let Some(embeddings) = map.remove("embeddings") {
                return parse_embedding_collection(embeddings);
            }
            if let Some(Value::Array(items)) = map.remove("data") {
                return items
                    .into_iter()
                    .map(|item| match item {
                        Value::Object(mut obj) => obj
                            .remove("embedding")
                            .ok_or_else(|| {
                                EmbeddingError::InvalidResponse(
                                    "missing `embedding` field in data item".into(),
                                )
                            })
                            .and_then(parse_embedding_vector),
                        _ => Err(EmbeddingError::InvalidResponse(
                            "unexpected entry inside `data` array".into(),
                        )),
                    })
                    .collect();
            }
            Err(EmbeddingError::InvalidResponse(
                "unsupported response shape".into(),
            ))
        }
        other => parse_embedding_collection(other),
    }
}

fn parse_embedding_collection(value: Value) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    match value {
        Value::Array(items) if items.is_empty() => Ok(Vec::new()),
        Value::Array(items) if items.iter().all(Value::is_array) => {
            items.into_iter().map(parse_embedding_vector).collect()
        }
        other => parse_embedding_vector(other).map(|v| vec![v]),
    }
}

fn parse_embedding_vector(value: Value) -> Result<Vec<f32>, EmbeddingError> {
    match value {
        Value::Array(values) => values
            .into_iter()
            .map(|entry| match entry {
                Value::Number(num) => num.as_f64().map(|f| f as f32).ok_or_else(|| {
                    EmbeddingError::InvalidResponse("non-finite embedding value".into())
                }),
                other => Err(EmbeddingError::InvalidResponse(format!(
                    "embedding entries must be numbers, got {other}"
                ))),
            })
            .collect(),
        other => Err(EmbeddingError::InvalidResponse(format!(
            "embedding vector must be an array, got {other}"
        ))),
    }
}
