//! Vector similarity index collaborators

pub mod flat;
pub mod qdrant;

use crate::error::Result;
use async_trait::async_trait;
use uuid::Uuid;

pub use flat::FlatIndex;
pub use qdrant::{QdrantIndex, QdrantIndexConfig};

/// A k-NN hit: record id and its distance to the query (smaller is closer)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub id: Uuid,
    pub distance: f32,
}

/// Stores vectors under record ids, partitioned by session
#[async_trait]
pub trait SimilarityIndex: Send + Sync {
    async fn add(&self, session_id: &str, id: Uuid, vector: Vec<f32>) -> Result<()>;

    /// Up to `k` nearest records of the session, closest first
    async fn query(&self, session_id: &str, vector: &[f32], k: usize) -> Result<Vec<Neighbor>>;

    /// Drop every vector of the session
    async fn remove_session(&self, session_id: &str) -> Result<()>;
}
