//! Semantic retrieval over the garment catalog.
//!
//! # Architecture
//!
//! - `similarity`: cosine similarity over raw slices
//! - `embeddings`: the provider trait and the OpenAI-compatible provider
//! - `local`: fastembed-backed provider (feature `local-embeddings`)
//! - `cost`: token and cost estimation for embedding calls
//! - `matcher`: per-description ranking and cross-description merge

pub mod cost;
pub mod embeddings;
#[cfg(feature = "local-embeddings")]
mod local;
pub mod matcher;
pub mod similarity;

pub use cost::{CostModel, EmbeddingUsage};
pub use embeddings::{EmbeddingError, EmbeddingProvider, OpenAiEmbedder, DEFAULT_EMBEDDING_MODEL};
#[cfg(feature = "local-embeddings")]
pub use local::LocalEmbedder;
pub use matcher::{
    build_pool, CancelToken, MatchDiagnostic, MatchError, MatchReport, Matcher, DEFAULT_TOP_N,
};
