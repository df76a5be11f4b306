//! Deterministic collaborators shared by the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use chat_context::chat::{Responder, ResponderError};
use chat_context::context::{Summarizer, SummarizerError, TokenCounter, WordCounter};
use chat_context::embedding::HashingEmbedder;
use chat_context::index::FlatIndex;
use chat_context::store::{InMemoryMessageLog, InMemorySessionStore};
use chat_context::strategy::{
    BatchedSummary, BatchedSummaryConfig, HierarchicalConfig, HierarchicalSummary, KeywordConfig,
    KeywordImportance, SlidingWindow, StrategyKind, TopicCluster, TopicClusterConfig,
    VectorRecall, VectorRecallConfig,
};
use chat_context::{ContextManager, StrategySet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// `SUMMARY:<n>` for the n-th call, which is the batch id when one session
/// is summarized
#[derive(Default)]
pub struct SequenceSummarizer {
    pub calls: AtomicUsize,
}

#[async_trait]
impl Summarizer for SequenceSummarizer {
    async fn summarize(&self, _texts: &[String]) -> Result<String, SummarizerError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("SUMMARY:{}", n))
    }
}

/// Always answers with the same text
pub struct FixedResponder(pub String);

#[async_trait]
impl Responder for FixedResponder {
    async fn respond(&self, _prompt: &str) -> Result<String, ResponderError> {
        Ok(self.0.clone())
    }
}

pub struct DownResponder;

#[async_trait]
impl Responder for DownResponder {
    async fn respond(&self, _prompt: &str) -> Result<String, ResponderError> {
        Err(ResponderError::NetworkError("connection refused".to_string()))
    }
}

pub fn word_counter() -> Arc<dyn TokenCounter> {
    Arc::new(WordCounter::new(1.0))
}

/// Every strategy over in-memory collaborators
pub fn manager_with(
    default: StrategyKind,
    summarizer: Arc<dyn Summarizer>,
    batch_budget: Option<usize>,
) -> ContextManager {
    let counter = word_counter();
    let strategies = StrategySet {
        sliding_window: Arc::new(SlidingWindow::default()),
        batched_summary: Arc::new(
            BatchedSummary::new(
                BatchedSummaryConfig {
                    threshold: 5,
                    token_budget: batch_budget
                        .map(chat_context::context::TokenBudgetConfig::with_max),
                },
                Arc::new(InMemorySessionStore::new()),
                Arc::new(InMemoryMessageLog::new()),
                summarizer.clone(),
                counter.clone(),
            )
            .expect("batched summary"),
        ),
        hierarchical_summary: Arc::new(
            HierarchicalSummary::new(HierarchicalConfig::default(), summarizer.clone())
                .expect("hierarchical"),
        ),
        keyword_importance: Arc::new(KeywordImportance::new(KeywordConfig::default())),
        topic_cluster: Arc::new(
            TopicCluster::new(TopicClusterConfig::default(), summarizer, counter.clone())
                .expect("topic cluster"),
        ),
        vector_recall: Arc::new(
            VectorRecall::new(
                VectorRecallConfig::default(),
                Arc::new(HashingEmbedder::default()),
                Arc::new(FlatIndex::new()),
                counter,
            )
            .expect("vector recall"),
        ),
    };
    ContextManager::new(strategies, default)
}

pub fn manager(default: StrategyKind) -> ContextManager {
    manager_with(default, Arc::new(SequenceSummarizer::default()), None)
}
