//! Short-term FIFO plus embedding-based long-term recall
//!
//! Every message is embedded and indexed for the session. The short-term
//! memory keeps the newest messages within both a message cap and a token
//! cap. `get_context` appends to it the few long-term records nearest to the
//! latest short-term message, re-ranked newest first.

use super::session::SessionMap;
use super::{ContextStrategy, StrategyKind, StrategySnapshot};
use crate::context::{Context, ContextItem, Message, TokenCounter};
use crate::embedding::EmbeddingProvider;
use crate::error::{ContextError, Result};
use crate::index::SimilarityIndex;
use crate::metrics::METRICS;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct VectorRecallConfig {
    pub short_term_max_messages: usize,
    pub short_term_max_tokens: usize,
    /// Nearest neighbours fetched per query
    pub neighbors: usize,
    /// Long-term records kept after the recency re-rank
    pub recall_limit: usize,
}

impl Default for VectorRecallConfig {
    fn default() -> Self {
        Self {
            short_term_max_messages: 4,
            short_term_max_tokens: 800,
            neighbors: 5,
            recall_limit: 2,
        }
    }
}

/// A message committed to long-term memory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: Uuid,
    pub message: Message,
    #[serde(skip)]
    pub embedding: Vec<f32>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Memory {
    short_term: VecDeque<(Message, usize)>,
    short_term_tokens: usize,
    /// Embedding of the newest short-term message
    latest_embedding: Option<Vec<f32>>,
    records: IndexMap<Uuid, MemoryRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VectorRecallState {
    pub short_term: Vec<Message>,
    pub short_term_tokens: usize,
    pub long_term: Vec<MemoryRecord>,
}

pub struct VectorRecall {
    config: VectorRecallConfig,
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn SimilarityIndex>,
    counter: Arc<dyn TokenCounter>,
    sessions: SessionMap<Memory>,
}

impl VectorRecall {
    pub fn new(
        config: VectorRecallConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn SimilarityIndex>,
        counter: Arc<dyn TokenCounter>,
    ) -> Result<Self> {
        if config.short_term_max_messages == 0 || config.neighbors == 0 {
            return Err(ContextError::Configuration(
                "short-term capacity and neighbour count must be positive".to_string(),
            ));
        }
        Ok(Self {
            config,
            embedder,
            index,
            counter,
            sessions: SessionMap::new(),
        })
    }

    /// Long-term records nearest to the latest short-term message, newest first
    async fn recall(&self, session_id: &str, memory: &Memory) -> Result<Vec<MemoryRecord>> {
        let Some(query) = memory.latest_embedding.as_deref() else {
            return Ok(Vec::new());
        };
        if memory.short_term.is_empty() || memory.records.is_empty() {
            return Ok(Vec::new());
        }

        let k = self.config.neighbors.min(memory.records.len());
        let neighbors = self.index.query(session_id, query, k).await?;
        let mut recalled: Vec<MemoryRecord> = neighbors
            .iter()
            .filter_map(|n| memory.records.get(&n.id).cloned())
            .collect();
        recalled.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        recalled.truncate(self.config.recall_limit);
        Ok(recalled)
    }
}

#[async_trait]
impl ContextStrategy for VectorRecall {
    fn kind(&self) -> StrategyKind {
        StrategyKind::VectorRecall
    }

    async fn add_message(&self, session_id: &str, message: Message) -> Result<()> {
        let session = self.sessions.entry(session_id);
        let mut memory = session.lock().await;

        let stored = async {
            let embedding = self.embedder.embed(&message.content).await?;
            let id = Uuid::new_v4();
            self.index.add(session_id, id, embedding.clone()).await?;
            Ok::<_, ContextError>((id, embedding))
        }
        .await;
        let (id, embedding) = match stored {
            Ok(stored) => stored,
            Err(e) => {
                METRICS.record_add(self.kind().as_str(), false);
                return Err(e);
            }
        };

        memory.records.insert(
            id,
            MemoryRecord {
                id,
                message: message.clone(),
                embedding: embedding.clone(),
                timestamp: message.timestamp,
            },
        );

        let tokens = self.counter.count(&message.content);
        memory.short_term.push_back((message, tokens));
        memory.short_term_tokens += tokens;
        memory.latest_embedding = Some(embedding);
        while memory.short_term.len() > self.config.short_term_max_messages
            || memory.short_term_tokens > self.config.short_term_max_tokens
        {
            let Some((_, evicted)) = memory.short_term.pop_front() else {
                break;
            };
            memory.short_term_tokens -= evicted;
        }
        if memory.short_term.is_empty() {
            debug!("Short-term memory of session {} emptied by token cap", session_id);
        }

        METRICS.record_add(self.kind().as_str(), true);
        Ok(())
    }

    async fn get_context(&self, session_id: &str) -> Result<Context> {
        let Some(session) = self.sessions.get(session_id) else {
            METRICS.record_context(self.kind().as_str(), true);
            return Ok(Context::default());
        };
        let memory = session.lock().await;

        let recalled = match self.recall(session_id, &memory).await {
            Ok(recalled) => recalled,
            Err(e) => {
                METRICS.record_context(self.kind().as_str(), false);
                return Err(e);
            }
        };

        let mut items: Vec<ContextItem> = memory
            .short_term
            .iter()
            .map(|(m, _)| ContextItem::message(m))
            .collect();
        items.extend(recalled.iter().map(|r| ContextItem::recalled(&r.message)));

        METRICS.record_context(self.kind().as_str(), true);
        Ok(Context::new(items))
    }

    async fn get_internal_state(&self, session_id: &str) -> Result<StrategySnapshot> {
        let state = match self.sessions.get(session_id) {
            Some(session) => {
                let memory = session.lock().await;
                VectorRecallState {
                    short_term: memory.short_term.iter().map(|(m, _)| m.clone()).collect(),
                    short_term_tokens: memory.short_term_tokens,
                    long_term: memory.records.values().cloned().collect(),
                }
            }
            None => VectorRecallState::default(),
        };
        Ok(StrategySnapshot::VectorRecall(state))
    }

    async fn clear_session(&self, session_id: &str) -> Result<()> {
        let Some(session) = self.sessions.get(session_id) else {
            return self.index.remove_session(session_id).await;
        };
        let mut memory = session.lock().await;
        self.index.remove_session(session_id).await?;
        *memory = Memory::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextItemKind, WordCounter};
    use crate::embedding::{EmbeddingError, HashingEmbedder};
    use crate::index::FlatIndex;
    use chrono::Duration;

    /// Embeds a number written as text onto the x axis
    struct AxisEmbedder;

    #[async_trait]
    impl EmbeddingProvider for AxisEmbedder {
        async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
            let x: f32 = text
                .parse()
                .map_err(|_| EmbeddingError::ApiError(format!("not a number: {}", text)))?;
            Ok(vec![x, 0.0])
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    fn strategy(config: VectorRecallConfig, embedder: Arc<dyn EmbeddingProvider>) -> VectorRecall {
        VectorRecall::new(
            config,
            embedder,
            Arc::new(FlatIndex::new()),
            Arc::new(WordCounter::new(1.0)),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_nearest_and_newest_record_comes_first() {
        let strategy = strategy(VectorRecallConfig::default(), Arc::new(AxisEmbedder));
        let base = Utc::now() - Duration::days(2);
        let values = ["0", "10", "7.9", "20", "30", "40", "50", "8"];
        for (i, value) in values.iter().enumerate() {
            let timestamp = if i == 2 {
                base + Duration::days(1)
            } else {
                base + Duration::minutes(i as i64)
            };
            strategy
                .add_message("s", Message::user(*value).at(timestamp))
                .await
                .unwrap();
        }

        let context = strategy.get_context("s").await.unwrap();
        let recalled: Vec<&str> = context
            .items
            .iter()
            .filter(|i| i.kind == ContextItemKind::Recalled)
            .map(|i| i.content.as_str())
            .collect();
        assert_eq!(recalled, vec!["7.9", "8"]);

        let short_term: Vec<&str> = context
            .items
            .iter()
            .filter(|i| i.kind == ContextItemKind::Message)
            .map(|i| i.content.as_str())
            .collect();
        assert_eq!(short_term, vec!["30", "40", "50", "8"]);
    }

    #[derive(Default)]
    struct CountingEmbedder {
        inner: HashingEmbedder,
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for CountingEmbedder {
        async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.inner.embed(text).await
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }
    }

    #[tokio::test]
    async fn test_reads_reuse_stored_embedding() {
        let embedder = Arc::new(CountingEmbedder::default());
        let strategy = strategy(VectorRecallConfig::default(), embedder.clone());
        for text in ["apples", "pears", "plums"] {
            strategy.add_message("s", Message::user(text)).await.unwrap();
        }

        strategy.get_context("s").await.unwrap();
        strategy.get_context("s").await.unwrap();
        assert_eq!(embedder.calls.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_short_term_token_cap() {
        let strategy = strategy(
            VectorRecallConfig {
                short_term_max_tokens: 5,
                ..Default::default()
            },
            Arc::new(HashingEmbedder::default()),
        );
        strategy.add_message("s", Message::user("one two three")).await.unwrap();
        strategy.add_message("s", Message::user("four five six")).await.unwrap();

        match strategy.get_internal_state("s").await.unwrap() {
            StrategySnapshot::VectorRecall(state) => {
                assert_eq!(state.short_term.len(), 1);
                assert_eq!(state.short_term_tokens, 3);
                assert_eq!(state.long_term.len(), 2);
            }
            other => panic!("unexpected snapshot {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_single_message_recalls_itself() {
        let strategy = strategy(VectorRecallConfig::default(), Arc::new(HashingEmbedder::default()));
        strategy.add_message("s", Message::user("hello")).await.unwrap();
        let context = strategy.get_context("s").await.unwrap();
        assert_eq!(context.len(), 2);
        assert_eq!(context.items[1].kind, ContextItemKind::Recalled);
    }

    #[tokio::test]
    async fn test_embedding_failure_leaves_memory_untouched() {
        let strategy = strategy(VectorRecallConfig::default(), Arc::new(AxisEmbedder));
        strategy.add_message("s", Message::user("1")).await.unwrap();
        let err = strategy
            .add_message("s", Message::user("not a number"))
            .await
            .unwrap_err();
        assert!(err.is_collaborator_failure());

        match strategy.get_internal_state("s").await.unwrap() {
            StrategySnapshot::VectorRecall(state) => {
                assert_eq!(state.short_term.len(), 1);
                assert_eq!(state.long_term.len(), 1);
            }
            other => panic!("unexpected snapshot {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_clear_and_unknown_session() {
        let strategy = strategy(VectorRecallConfig::default(), Arc::new(HashingEmbedder::default()));
        assert!(strategy.get_context("s").await.unwrap().is_empty());
        strategy.add_message("s", Message::user("hello")).await.unwrap();
        strategy.clear_session("s").await.unwrap();
        assert!(strategy.get_context("s").await.unwrap().is_empty());
    }
}
