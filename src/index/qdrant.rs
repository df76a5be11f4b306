//! Similarity index backed by Qdrant

use super::{Neighbor, SimilarityIndex};
use crate::error::{ContextError, Result};
use async_trait::async_trait;
use qdrant_client::{
    client::{Payload, QdrantClient},
    qdrant::{
        condition::ConditionOneOf, point_id::PointIdOptions, points_selector::PointsSelectorOneOf,
        r#match::MatchValue, vectors_config::Config as VectorsConfigKind, Condition,
        CreateCollection, Distance, FieldCondition, Filter, Match, PointStruct, PointsSelector,
        SearchPoints, VectorParams, VectorsConfig,
    },
};
use tracing::{debug, info};
use uuid::Uuid;

/// Qdrant index configuration
#[derive(Debug, Clone)]
pub struct QdrantIndexConfig {
    pub collection_name: String,
    pub vector_size: usize,
}

impl Default for QdrantIndexConfig {
    fn default() -> Self {
        Self {
            collection_name: "chat_memory".to_string(),
            vector_size: 384,
        }
    }
}

/// One collection, points partitioned by a `session_id` payload field
pub struct QdrantIndex {
    client: QdrantClient,
    config: QdrantIndexConfig,
}

impl QdrantIndex {
    /// Connect and make sure the collection exists
    pub async fn new(client: QdrantClient, config: QdrantIndexConfig) -> Result<Self> {
        let index = Self { client, config };
        index.ensure_collection().await?;
        Ok(index)
    }

    async fn ensure_collection(&self) -> Result<()> {
        let collections = self
            .client
            .list_collections()
            .await
            .map_err(|e| ContextError::Index(format!("Failed to list collections: {}", e)))?;

        let exists = collections
            .collections
            .iter()
            .any(|c| c.name == self.config.collection_name);

        if !exists {
            info!("Creating memory collection: {}", self.config.collection_name);

            self.client
                .create_collection(&CreateCollection {
                    collection_name: self.config.collection_name.clone(),
                    vectors_config: Some(VectorsConfig {
                        config: Some(VectorsConfigKind::Params(VectorParams {
                            size: self.config.vector_size as u64,
                            distance: Distance::Euclid.into(),
                            ..Default::default()
                        })),
                    }),
                    ..Default::default()
                })
                .await
                .map_err(|e| ContextError::Index(format!("Failed to create collection: {}", e)))?;
        }

        Ok(())
    }

    fn session_filter(session_id: &str) -> Filter {
        Filter {
            must: vec![Condition {
                condition_one_of: Some(ConditionOneOf::Field(FieldCondition {
                    key: "session_id".to_string(),
                    r#match: Some(Match {
                        match_value: Some(MatchValue::Keyword(session_id.to_string())),
                    }),
                    ..Default::default()
                })),
            }],
            ..Default::default()
        }
    }
}

#[async_trait]
impl SimilarityIndex for QdrantIndex {
    async fn add(&self, session_id: &str, id: Uuid, vector: Vec<f32>) -> Result<()> {
        let mut payload = Payload::new();
        payload.insert("session_id", session_id.to_string());

        let point = PointStruct::new(id.to_string(), vector, payload);

        self.client
            .upsert_points(&self.config.collection_name, None, vec![point], None)
            .await
            .map_err(|e| ContextError::Index(format!("Failed to upsert point: {}", e)))?;

        debug!("Indexed memory record {}", id);
        Ok(())
    }

    async fn query(&self, session_id: &str, vector: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        let result = self
            .client
            .search_points(&SearchPoints {
                collection_name: self.config.collection_name.clone(),
                vector: vector.to_vec(),
                filter: Some(Self::session_filter(session_id)),
                limit: k as u64,
                ..Default::default()
            })
            .await
            .map_err(|e| ContextError::Index(format!("Failed to search points: {}", e)))?;

        let neighbors = result
            .result
            .into_iter()
            .filter_map(|point| {
                let id = match point.id?.point_id_options? {
                    PointIdOptions::Uuid(raw) => Uuid::parse_str(&raw).ok()?,
                    PointIdOptions::Num(_) => return None,
                };
                Some(Neighbor {
                    id,
                    distance: point.score,
                })
            })
            .collect();

        Ok(neighbors)
    }

    async fn remove_session(&self, session_id: &str) -> Result<()> {
        let selector = PointsSelector {
            points_selector_one_of: Some(PointsSelectorOneOf::Filter(Self::session_filter(
                session_id,
            ))),
        };
        self.client
            .delete_points(&self.config.collection_name, None, &selector, None)
            .await
            .map_err(|e| ContextError::Index(format!("Failed to delete points: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Note: These tests require a running Qdrant instance
    // They are marked as ignored by default

    #[tokio::test]
    #[ignore]
    async fn test_qdrant_roundtrip() {
        let client = QdrantClient::from_url("http://localhost:6334").build().unwrap();
        let index = QdrantIndex::new(
            client,
            QdrantIndexConfig {
                collection_name: "chat_memory_test".to_string(),
                vector_size: 2,
            },
        )
        .await
        .unwrap();

        let id = Uuid::new_v4();
        index.add("s", id, vec![1.0, 0.0]).await.unwrap();
        let hits = index.query("s", &[1.0, 0.0], 1).await.unwrap();
        assert_eq!(hits[0].id, id);
        index.remove_session("s").await.unwrap();
    }
}
