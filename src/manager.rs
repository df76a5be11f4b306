//! Registry of live strategies with default and per-session selection
//!
//! Each strategy has exactly one instance. A session uses, in order of
//! precedence: the strategy named in the call, the strategy bound to the
//! session, then the process-wide default (last write wins).

use crate::context::{Context, Message};
use crate::error::Result;
use crate::metrics::METRICS;
use crate::strategy::{
    BatchedSummary, ContextStrategy, HierarchicalSummary, KeywordImportance, SlidingWindow,
    StrategyKind, StrategySnapshot, TopicCluster, VectorRecall,
};
use crate::time_operation;
use dashmap::DashMap;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

/// One instance of every strategy
pub struct StrategySet {
    pub sliding_window: Arc<SlidingWindow>,
    pub batched_summary: Arc<BatchedSummary>,
    pub hierarchical_summary: Arc<HierarchicalSummary>,
    pub keyword_importance: Arc<KeywordImportance>,
    pub topic_cluster: Arc<TopicCluster>,
    pub vector_recall: Arc<VectorRecall>,
}

pub struct ContextManager {
    strategies: StrategySet,
    default: RwLock<StrategyKind>,
    bindings: DashMap<String, StrategyKind>,
}

impl ContextManager {
    pub fn new(strategies: StrategySet, default: StrategyKind) -> Self {
        Self {
            strategies,
            default: RwLock::new(default),
            bindings: DashMap::new(),
        }
    }

    pub fn strategy(&self, kind: StrategyKind) -> Arc<dyn ContextStrategy> {
        match kind {
            StrategyKind::SlidingWindow => self.strategies.sliding_window.clone(),
            StrategyKind::BatchedSummary => self.strategies.batched_summary.clone(),
            StrategyKind::HierarchicalSummary => self.strategies.hierarchical_summary.clone(),
            StrategyKind::KeywordImportance => self.strategies.keyword_importance.clone(),
            StrategyKind::TopicCluster => self.strategies.topic_cluster.clone(),
            StrategyKind::VectorRecall => self.strategies.vector_recall.clone(),
        }
    }

    pub fn strategies(&self) -> &StrategySet {
        &self.strategies
    }

    pub fn available(&self) -> &'static [StrategyKind] {
        &StrategyKind::ALL
    }

    /// Default strategy for sessions without a binding
    pub fn active_strategy(&self) -> StrategyKind {
        *self.default.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Change the default strategy. Unrecognised names leave it unchanged;
    /// the return value tells whether the name was accepted.
    pub fn set_active_strategy(&self, name: &str) -> bool {
        match name.parse::<StrategyKind>() {
            Ok(kind) => {
                *self.default.write().unwrap_or_else(|e| e.into_inner()) = kind;
                info!("Default context strategy set to {}", kind);
                true
            }
            Err(e) => {
                warn!("{}, default strategy unchanged", e);
                false
            }
        }
    }

    /// Pin a session to a strategy. Unrecognised names are ignored.
    pub fn bind_session(&self, session_id: &str, name: &str) -> bool {
        match name.parse::<StrategyKind>() {
            Ok(kind) => {
                self.bindings.insert(session_id.to_string(), kind);
                info!("Session {} bound to {}", session_id, kind);
                true
            }
            Err(e) => {
                warn!("{}, session {} binding unchanged", e, session_id);
                false
            }
        }
    }

    pub fn unbind_session(&self, session_id: &str) {
        self.bindings.remove(session_id);
    }

    /// Strategy that serves the session when none is named in the call
    pub fn strategy_for(&self, session_id: &str) -> StrategyKind {
        self.bindings
            .get(session_id)
            .map(|k| *k.value())
            .unwrap_or_else(|| self.active_strategy())
    }

    pub async fn add_message(&self, session_id: &str, message: Message) -> Result<()> {
        self.add_message_with(self.strategy_for(session_id), session_id, message)
            .await
    }

    pub async fn add_message_with(
        &self,
        kind: StrategyKind,
        session_id: &str,
        message: Message,
    ) -> Result<()> {
        time_operation!(
            METRICS.operation_duration,
            &[kind.as_str(), "add_message"],
            self.strategy(kind).add_message(session_id, message).await
        )
    }

    pub async fn get_context(&self, session_id: &str) -> Result<Context> {
        self.get_context_with(self.strategy_for(session_id), session_id)
            .await
    }

    pub async fn get_context_with(&self, kind: StrategyKind, session_id: &str) -> Result<Context> {
        time_operation!(
            METRICS.operation_duration,
            &[kind.as_str(), "get_context"],
            self.strategy(kind).get_context(session_id).await
        )
    }

    pub async fn get_internal_state(&self, session_id: &str) -> Result<StrategySnapshot> {
        self.get_internal_state_with(self.strategy_for(session_id), session_id)
            .await
    }

    pub async fn get_internal_state_with(
        &self,
        kind: StrategyKind,
        session_id: &str,
    ) -> Result<StrategySnapshot> {
        self.strategy(kind).get_internal_state(session_id).await
    }

    /// Reset the session in every strategy and drop its binding
    pub async fn clear_session(&self, session_id: &str) -> Result<()> {
        for kind in StrategyKind::ALL {
            self.strategy(kind).clear_session(session_id).await?;
        }
        self.unbind_session(session_id);
        info!("Cleared session {}", session_id);
        Ok(())
    }

    /// Reload the newest `limit` logged messages into the batched summary stack
    pub async fn rehydrate(&self, session_id: &str, limit: usize) -> Result<usize> {
        self.strategies
            .batched_summary
            .rehydrate(session_id, limit)
            .await
    }

    pub async fn topic_messages(&self, session_id: &str, topic: usize) -> Vec<Message> {
        self.strategies
            .topic_cluster
            .topic_messages(session_id, topic)
            .await
    }
}
