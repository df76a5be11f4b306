//! Interchangeable context strategies
//!
//! Every strategy implements [`ContextStrategy`]: it consumes messages for a
//! session and renders the context to hand to the model. Strategies share no
//! state with each other.

pub mod batched_summary;
pub mod hierarchical;
pub mod keyword;
pub mod session;
pub mod sliding_window;
pub mod topic_cluster;
pub mod vector_recall;

use crate::context::{Context, Message};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use batched_summary::{BatchedSummary, BatchedSummaryConfig, BatchedSummaryState};
pub use hierarchical::{HierarchicalConfig, HierarchicalState, HierarchicalSummary};
pub use keyword::{KeywordConfig, KeywordImportance, KeywordState};
pub use session::SessionMap;
pub use sliding_window::{SlidingWindow, SlidingWindowState};
pub use topic_cluster::{TopicCluster, TopicClusterConfig, TopicClusterState};
pub use vector_recall::{VectorRecall, VectorRecallConfig, VectorRecallState};

/// Names of the available strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    SlidingWindow,
    BatchedSummary,
    HierarchicalSummary,
    KeywordImportance,
    TopicCluster,
    VectorRecall,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 6] = [
        StrategyKind::SlidingWindow,
        StrategyKind::BatchedSummary,
        StrategyKind::HierarchicalSummary,
        StrategyKind::KeywordImportance,
        StrategyKind::TopicCluster,
        StrategyKind::VectorRecall,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::SlidingWindow => "sliding_window",
            StrategyKind::BatchedSummary => "batched_summary",
            StrategyKind::HierarchicalSummary => "hierarchical_summary",
            StrategyKind::KeywordImportance => "keyword_importance",
            StrategyKind::TopicCluster => "topic_cluster",
            StrategyKind::VectorRecall => "vector_recall",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognised strategy name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown strategy: {0}")]
pub struct UnknownStrategy(pub String);

impl FromStr for StrategyKind {
    type Err = UnknownStrategy;

    /// Accepts the canonical snake_case names plus short aliases
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "sliding_window" | "window" => Ok(StrategyKind::SlidingWindow),
            "batched_summary" | "batched" | "summary" => Ok(StrategyKind::BatchedSummary),
            "hierarchical_summary" | "hierarchical" => Ok(StrategyKind::HierarchicalSummary),
            "keyword_importance" | "keyword" | "keywords" => Ok(StrategyKind::KeywordImportance),
            "topic_cluster" | "topic" | "topics" => Ok(StrategyKind::TopicCluster),
            "vector_recall" | "vector" | "recall" => Ok(StrategyKind::VectorRecall),
            _ => Err(UnknownStrategy(s.to_string())),
        }
    }
}

/// Diagnostic snapshot of one session's state inside a strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum StrategySnapshot {
    SlidingWindow(SlidingWindowState),
    BatchedSummary(BatchedSummaryState),
    HierarchicalSummary(HierarchicalState),
    KeywordImportance(KeywordState),
    TopicCluster(TopicClusterState),
    VectorRecall(VectorRecallState),
}

impl StrategySnapshot {
    pub fn kind(&self) -> StrategyKind {
        match self {
            StrategySnapshot::SlidingWindow(_) => StrategyKind::SlidingWindow,
            StrategySnapshot::BatchedSummary(_) => StrategyKind::BatchedSummary,
            StrategySnapshot::HierarchicalSummary(_) => StrategyKind::HierarchicalSummary,
            StrategySnapshot::KeywordImportance(_) => StrategyKind::KeywordImportance,
            StrategySnapshot::TopicCluster(_) => StrategyKind::TopicCluster,
            StrategySnapshot::VectorRecall(_) => StrategyKind::VectorRecall,
        }
    }
}

/// One context-management algorithm
#[async_trait]
pub trait ContextStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Record a message for the session, creating the session on first use
    async fn add_message(&self, session_id: &str, message: Message) -> Result<()>;

    /// Render the context for the session; empty for unknown sessions
    async fn get_context(&self, session_id: &str) -> Result<Context>;

    async fn get_internal_state(&self, session_id: &str) -> Result<StrategySnapshot>;

    /// Forget everything this strategy holds for the session
    async fn clear_session(&self, session_id: &str) -> Result<()>;
}
