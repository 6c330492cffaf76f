use crate::catalog::LoadError;
use crate::openai::ApiError;
use crate::outfit::RecommendError;
use crate::semantic::{EmbeddingError, MatchError};

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("catalog unavailable: {0}")]
    Catalog(#[from] LoadError),

    #[error("embedding provider unavailable: {0}")]
    Provider(#[from] EmbeddingError),

    #[error("{0}")]
    Match(#[from] MatchError),

    #[error("recommendation failed: {0}")]
    Recommend(#[from] RecommendError),

    #[error("api client error: {0}")]
    Api(#[from] ApiError),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unexpected error: {0:?}")]
    Other(#[from] anyhow::Error),
}
