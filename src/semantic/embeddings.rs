//! Embedding providers.
//!
//! The matcher only sees [`EmbeddingProvider`]; callers construct a concrete
//! provider and inject it:
//! - [`OpenAiEmbedder`]: remote `/embeddings` endpoint (default)
//! - [`LocalEmbedder`](super::LocalEmbedder): fastembed model, no network at query time

use serde::{Deserialize, Serialize};

use crate::openai::{ApiError, OpenAiClient};

/// Default remote embedding model; the published catalog was embedded with it.
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-large";

/// Converts text into a fixed-length vector.
///
/// Implementations must be thread-safe: the matcher embeds distinct
/// descriptions concurrently.
pub trait EmbeddingProvider: Send + Sync {
    /// Model name, for logs.
    fn name(&self) -> &str;

    /// Generate an embedding for a single text.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Error type for embedding operations
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Embedding request failed: {0}")]
    Api(#[from] ApiError),

    #[error("Provider returned an empty embedding")]
    Empty,

    #[error("Provider returned {got} dimensions, expected {expected}")]
    Dimensions { expected: usize, got: usize },

    #[error("Provider returned a non-finite value")]
    NonFinite,

    #[cfg(feature = "local-embeddings")]
    #[error("Invalid model name: {0}")]
    InvalidModel(String),
}

/// Reject vectors no similarity can be computed against.
pub fn validate_embedding(embedding: &[f32]) -> Result<(), EmbeddingError> {
    if embedding.is_empty() {
        return Err(EmbeddingError::Empty);
    }
    if embedding.iter().any(|v| !v.is_finite()) {
        return Err(EmbeddingError::NonFinite);
    }
    Ok(())
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Embeddings from an OpenAI-compatible `/embeddings` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiEmbedder {
    client: OpenAiClient,
    model: String,
}

impl OpenAiEmbedder {
    pub fn new(client: OpenAiClient, model: &str) -> Self {
        Self {
            client,
            model: model.to_string(),
        }
    }
}

impl EmbeddingProvider for OpenAiEmbedder {
    fn name(&self) -> &str {
        &self.model
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: text,
        };

        let response: EmbeddingResponse = self.client.post_json("/embeddings", &request)?;
        let embedding = response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or(EmbeddingError::Empty)?;

        validate_embedding(&embedding)?;
        Ok(embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_validate_embedding() {
        assert!(validate_embedding(&[0.1, 0.2]).is_ok());
        assert!(matches!(validate_embedding(&[]), Err(EmbeddingError::Empty)));
        assert!(matches!(
            validate_embedding(&[0.1, f32::NAN]),
            Err(EmbeddingError::NonFinite)
        ));
        assert!(matches!(
            validate_embedding(&[f32::INFINITY]),
            Err(EmbeddingError::NonFinite)
        ));
    }

    #[test]
    fn test_request_shape() {
        let request = EmbeddingRequest {
            model: DEFAULT_EMBEDDING_MODEL,
            input: "white canvas sneakers",
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"model": "text-embedding-3-large", "input": "white canvas sneakers"})
        );
    }

    #[test]
    fn test_response_shape() {
        let body = r#"{"object":"list","data":[{"object":"embedding","index":0,"embedding":[0.5,-0.25]}],"model":"text-embedding-3-large"}"#;
        let response: EmbeddingResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.data[0].embedding, vec![0.5, -0.25]);
    }

    #[test]
    fn test_unreachable_endpoint_is_api_error() {
        let client =
            OpenAiClient::new("http://127.0.0.1:9", None, Duration::from_millis(500)).unwrap();
        let embedder = OpenAiEmbedder::new(client, DEFAULT_EMBEDDING_MODEL);
        assert_eq!(embedder.name(), DEFAULT_EMBEDDING_MODEL);
        assert!(matches!(
            embedder.embed("red shoes"),
            Err(EmbeddingError::Api(_))
        ));
    }

    #[test]
    #[ignore = "requires OPENAI_API_KEY and network"]
    fn test_remote_embedding() {
        let client =
            OpenAiClient::from_env("https://api.openai.com/v1", Duration::from_secs(30)).unwrap();
        let embedder = OpenAiEmbedder::new(client, DEFAULT_EMBEDDING_MODEL);
        let embedding = embedder.embed("Women's Black Skinny Jeans").unwrap();
        assert_eq!(embedding.len(), 3072);
    }
}
