//! Text embedding collaborators

pub mod cache;
pub mod hashing;
pub mod http;

use async_trait::async_trait;

pub use cache::CachedEmbeddingProvider;
pub use hashing::HashingEmbedder;
pub use http::{HttpEmbeddingConfig, HttpEmbeddingProvider};

/// Maps text to a fixed-dimension vector
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Length of every vector this provider returns
    fn dimension(&self) -> usize;
}

/// Embedding errors
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Initialization error: {0}")]
    InitializationError(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}
