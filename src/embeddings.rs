//! Client for an Ollama-compatible embedding service.
//!
//! The index consumes embeddings through the [`Embedder`] trait; the HTTP
//! implementation posts `{model, prompt}` to `{base_url}/api/embeddings` and
//! reads back `{embedding: [f32]}`.

use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::config::EmbeddingConfig;

/// Converts text into an embedding vector.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Error type for embedding operations
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("failed to build embedding client: {0}")]
    InitFailed(String),

    #[error("embedding request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("embedding service responded with {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("no embedding returned from model")]
    Missing,

    #[error("model returned {got} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// Blocking client for the `/api/embeddings` endpoint.
pub struct OllamaEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    max_retries: u32,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EmbeddingError::InitFailed(e.to_string()))?;

        let endpoint = format!("{}/api/embeddings", config.base_url.trim_end_matches('/'));

        Ok(Self {
            client,
            endpoint,
            model: config.model.clone(),
            max_retries: config.max_retries,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let body = EmbeddingRequest {
            model: &self.model,
            prompt: text,
        };

        let resp = self.client.post(&self.endpoint).json(&body).send()?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(EmbeddingError::Status { status, body });
        }

        let parsed: EmbeddingResponse = resp.json()?;
        parsed.into_vector()
    }

    fn should_retry(err: &EmbeddingError) -> bool {
        match err {
            EmbeddingError::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            EmbeddingError::Request(err) => err.is_timeout() || err.is_connect(),
            _ => false,
        }
    }

    fn retry_backoff(attempt: u32) -> Duration {
        Duration::from_millis(250 * (1 << attempt.min(4)))
    }
}

impl Embedder for OllamaEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut attempt = 0;
        loop {
            match self.request(text) {
                Ok(embedding) => return Ok(embedding),
                Err(err) if attempt < self.max_retries && Self::should_retry(&err) => {
                    attempt += 1;
                    log::warn!(
                        "embedding request failed ({err}), retrying {attempt}/{}",
                        self.max_retries
                    );
                    thread::sleep(Self::retry_backoff(attempt));
                }
                Err(err) => {
                    log::error!("error generating embedding: {err}");
                    return Err(err);
                }
            }
        }
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    embedding: Option<Vec<f32>>,
}

impl EmbeddingResponse {
    fn into_vector(self) -> Result<Vec<f32>, EmbeddingError> {
        match self.embedding {
            Some(embedding) if !embedding.is_empty() => Ok(embedding),
            _ => Err(EmbeddingError::Missing),
        }
    }
}

/// Deterministic in-process embedder for tests.
#[cfg(test)]
pub mod testing {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::{Embedder, EmbeddingError};

    /// Maps text to fixed vectors. Unknown text gets a vector derived from its
    /// bytes, so identical text always embeds identically.
    pub struct FakeEmbedder {
        dimensions: usize,
        fixed: Mutex<HashMap<String, Vec<f32>>>,
        fail_on: Mutex<Option<String>>,
        calls: AtomicUsize,
    }

    impl FakeEmbedder {
        pub fn new(dimensions: usize) -> Self {
            Self {
                dimensions,
                fixed: Mutex::new(HashMap::new()),
                fail_on: Mutex::new(None),
                calls: AtomicUsize::new(0),
            }
        }

        /// Pin the vector returned for `text`.
        pub fn with(self, text: &str, vector: Vec<f32>) -> Self {
            self.fixed.lock().unwrap().insert(text.to_string(), vector);
            self
        }

        /// Fail every embedding request whose text contains `needle`.
        pub fn fail_on(&self, needle: Option<&str>) {
            *self.fail_on.lock().unwrap() = needle.map(str::to_string);
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn vector_for(&self, text: &str) -> Vec<f32> {
            if let Some(vector) = self.fixed.lock().unwrap().get(text) {
                return vector.clone();
            }

            let mut vector = vec![0.0; self.dimensions];
            for (i, byte) in text.bytes().enumerate() {
                vector[i % self.dimensions] += byte as f32 / 255.0;
            }
            vector
        }
    }

    impl Embedder for FakeEmbedder {
        fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            if let Some(needle) = self.fail_on.lock().unwrap().as_deref() {
                if text.contains(needle) {
                    return Err(EmbeddingError::Status {
                        status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
                        body: format!("refusing to embed {text:?}"),
                    });
                }
            }

            Ok(self.vector_for(text))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(base_url: &str) -> EmbeddingConfig {
        EmbeddingConfig {
            base_url: base_url.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_endpoint_joins_base_url() {
        let embedder = OllamaEmbedder::new(&test_config("http://localhost:11434/")).unwrap();
        assert_eq!(embedder.endpoint(), "http://localhost:11434/api/embeddings");
    }

    #[test]
    fn test_response_without_embedding_is_missing() {
        let parsed: EmbeddingResponse = serde_json::from_str(r#"{"error": "nope"}"#).unwrap();
        assert!(matches!(parsed.into_vector(), Err(EmbeddingError::Missing)));

        let parsed: EmbeddingResponse = serde_json::from_str(r#"{"embedding": []}"#).unwrap();
        assert!(matches!(parsed.into_vector(), Err(EmbeddingError::Missing)));
    }

    #[test]
    fn test_response_with_embedding() {
        let parsed: EmbeddingResponse =
            serde_json::from_str(r#"{"embedding": [0.5, -1.25, 3]}"#).unwrap();
        assert_eq!(parsed.into_vector().unwrap(), vec![0.5, -1.25, 3.0]);
    }

    #[test]
    fn test_request_body_shape() {
        let body = EmbeddingRequest {
            model: "mxbai-embed-large",
            prompt: "hello there",
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({"model": "mxbai-embed-large", "prompt": "hello there"})
        );
    }

    #[test]
    fn test_retry_policy() {
        let server_error = EmbeddingError::Status {
            status: StatusCode::BAD_GATEWAY,
            body: String::new(),
        };
        let client_error = EmbeddingError::Status {
            status: StatusCode::NOT_FOUND,
            body: String::new(),
        };
        assert!(OllamaEmbedder::should_retry(&server_error));
        assert!(!OllamaEmbedder::should_retry(&client_error));
        assert!(!OllamaEmbedder::should_retry(&EmbeddingError::Missing));
    }

    #[test]
    fn test_unreachable_service_fails() {
        // nothing listens on port 9 (discard) on test machines
        let config = EmbeddingConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 2,
            max_retries: 0,
            ..Default::default()
        };
        let embedder = OllamaEmbedder::new(&config).unwrap();
        assert!(embedder.embed("some text to embed").is_err());
    }
}
