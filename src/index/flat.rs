//! Exact L2 index held in memory

use super::{Neighbor, SimilarityIndex};
use crate::error::{ContextError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

/// Brute-force Euclidean index with one partition per session
#[derive(Debug, Default)]
pub struct FlatIndex {
    dimension: Option<usize>,
    partitions: DashMap<String, Vec<(Uuid, Vec<f32>)>>,
}

impl FlatIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject vectors whose length differs from `dimension`
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension: Some(dimension),
            partitions: DashMap::new(),
        }
    }

    pub fn len(&self, session_id: &str) -> usize {
        self.partitions.get(session_id).map(|p| p.len()).unwrap_or(0)
    }

    fn check_dimension(&self, len: usize) -> Result<()> {
        match self.dimension {
            Some(expected) if expected != len => Err(ContextError::Index(format!(
                "Vector dimension {} does not match index dimension {}",
                len, expected
            ))),
            _ => Ok(()),
        }
    }
}

pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

#[async_trait]
impl SimilarityIndex for FlatIndex {
    async fn add(&self, session_id: &str, id: Uuid, vector: Vec<f32>) -> Result<()> {
        self.check_dimension(vector.len())?;
        self.partitions
            .entry(session_id.to_string())
            .or_default()
            .push((id, vector));
        Ok(())
    }

    async fn query(&self, session_id: &str, vector: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        self.check_dimension(vector.len())?;
        let Some(partition) = self.partitions.get(session_id) else {
            return Ok(Vec::new());
        };

        let mut neighbors: Vec<Neighbor> = partition
            .iter()
            .map(|(id, stored)| Neighbor {
                id: *id,
                distance: l2_distance(stored, vector),
            })
            .collect();
        neighbors.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        neighbors.truncate(k);
        Ok(neighbors)
    }

    async fn remove_session(&self, session_id: &str) -> Result<()> {
        self.partitions.remove(session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_nearest_first_and_partitioned() {
        let index = FlatIndex::with_dimension(2);
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        index.add("s1", a, vec![0.0, 0.0]).await.unwrap();
        index.add("s1", b, vec![1.0, 1.0]).await.unwrap();
        index.add("s2", c, vec![0.9, 0.9]).await.unwrap();

        let hits = index.query("s1", &[0.9, 1.0], 5).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, b);
        assert_eq!(hits[1].id, a);
        assert!(hits[0].distance <= hits[1].distance);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_error() {
        let index = FlatIndex::with_dimension(3);
        assert!(index.add("s", Uuid::new_v4(), vec![1.0]).await.is_err());
    }

    #[tokio::test]
    async fn test_empty_session_returns_nothing() {
        let index = FlatIndex::new();
        assert!(index.query("none", &[1.0], 3).await.unwrap().is_empty());
    }
}
