//! TF-IDF importance ranking
//!
//! Scores are recomputed over the whole message set on every insertion.
//! `get_context` returns the `top_n` highest-scoring messages in ascending
//! score order, so the most important message comes last.

use super::session::SessionMap;
use super::{ContextStrategy, StrategyKind, StrategySnapshot};
use crate::analysis::importance_scores;
use crate::context::{Context, Message};
use crate::error::Result;
use crate::metrics::METRICS;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub const DEFAULT_TOP_N: usize = 10;

#[derive(Debug, Clone)]
pub struct KeywordConfig {
    pub top_n: usize,
}

impl Default for KeywordConfig {
    fn default() -> Self {
        Self { top_n: DEFAULT_TOP_N }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeywordState {
    pub messages: Vec<Message>,
    /// One score per message; empty while fewer than two messages exist
    pub importance_scores: Vec<f64>,
}

impl KeywordState {
    /// Indices of the `top_n` best messages, lowest score first
    pub fn ranked(&self, top_n: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.importance_scores.len()).collect();
        order.sort_by(|&a, &b| self.importance_scores[a].total_cmp(&self.importance_scores[b]));
        let skip = order.len().saturating_sub(top_n);
        order.split_off(skip)
    }
}

pub struct KeywordImportance {
    top_n: usize,
    sessions: SessionMap<KeywordState>,
}

impl KeywordImportance {
    pub fn new(config: KeywordConfig) -> Self {
        Self {
            top_n: config.top_n,
            sessions: SessionMap::new(),
        }
    }

    pub fn top_n(&self) -> usize {
        self.top_n
    }
}

impl Default for KeywordImportance {
    fn default() -> Self {
        Self::new(KeywordConfig::default())
    }
}

#[async_trait]
impl ContextStrategy for KeywordImportance {
    fn kind(&self) -> StrategyKind {
        StrategyKind::KeywordImportance
    }

    async fn add_message(&self, session_id: &str, message: Message) -> Result<()> {
        let session = self.sessions.entry(session_id);
        let mut state = session.lock().await;
        state.messages.push(message);

        let documents: Vec<&str> = state.messages.iter().map(|m| m.content.as_str()).collect();
        state.importance_scores = importance_scores(&documents);

        METRICS.record_add(self.kind().as_str(), true);
        Ok(())
    }

    async fn get_context(&self, session_id: &str) -> Result<Context> {
        let context = match self.sessions.get(session_id) {
            Some(session) => {
                let state = session.lock().await;
                if state.importance_scores.is_empty() {
                    Context::from_messages(state.messages.iter())
                } else {
                    Context::from_messages(
                        state.ranked(self.top_n).into_iter().map(|i| &state.messages[i]),
                    )
                }
            }
            None => Context::default(),
        };
        METRICS.record_context(self.kind().as_str(), true);
        Ok(context)
    }

    async fn get_internal_state(&self, session_id: &str) -> Result<StrategySnapshot> {
        let state = match self.sessions.get(session_id) {
            Some(session) => session.lock().await.clone(),
            None => KeywordState::default(),
        };
        Ok(StrategySnapshot::KeywordImportance(state))
    }

    async fn clear_session(&self, session_id: &str) -> Result<()> {
        self.sessions.reset(session_id).await;
        Ok(())
    }
}
