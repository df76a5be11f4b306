//! Topic clustering with budget-driven cluster eviction
//!
//! Once a session holds at least `max_clusters` messages, every insertion
//! refits k-means over the TF-IDF matrix of all messages, relabels them and
//! summarizes each non-empty cluster. Labels are not stable across refits.
//!
//! The rendered context is every topic summary followed by the most recent raw
//! messages. Over budget, the smallest topic is dropped first, then the oldest
//! raw message. When nothing is left to drop the result may stay over budget.

use super::session::SessionMap;
use super::{ContextStrategy, StrategyKind, StrategySnapshot};
use crate::analysis::{fit_predict, KMeansConfig, TfidfMatrix};
use crate::context::{Context, ContextItem, Message, Summarizer, TokenCounter};
use crate::error::{ContextError, Result};
use crate::metrics::METRICS;
use async_trait::async_trait;
use futures::future::try_join_all;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_CLUSTERS: usize = 5;
pub const DEFAULT_RECENT_MESSAGES: usize = 5;

#[derive(Debug, Clone)]
pub struct TopicClusterConfig {
    pub max_clusters: usize,
    pub recent_messages: usize,
    /// No eviction when unset
    pub max_context_tokens: Option<usize>,
    pub seed: u64,
}

impl Default for TopicClusterConfig {
    fn default() -> Self {
        Self {
            max_clusters: DEFAULT_MAX_CLUSTERS,
            recent_messages: DEFAULT_RECENT_MESSAGES,
            max_context_tokens: Some(2000),
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub summary: String,
    pub size: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopicClusterState {
    pub messages: Vec<Message>,
    /// One label per message once clustering has run; empty before
    pub labels: Vec<usize>,
    /// Non-empty topics keyed by label, in label order
    pub topics: IndexMap<usize, Topic>,
}

/// Token count of the rendered context before eviction and after each step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvictionTrace {
    pub tokens: Vec<usize>,
    pub evicted_topics: usize,
    pub evicted_messages: usize,
    pub over_budget: bool,
}

pub struct TopicCluster {
    config: TopicClusterConfig,
    summarizer: Arc<dyn Summarizer>,
    counter: Arc<dyn TokenCounter>,
    sessions: SessionMap<TopicClusterState>,
}

impl TopicCluster {
    pub fn new(
        config: TopicClusterConfig,
        summarizer: Arc<dyn Summarizer>,
        counter: Arc<dyn TokenCounter>,
    ) -> Result<Self> {
        if config.max_clusters == 0 {
            return Err(ContextError::Configuration(
                "max_clusters must be positive".to_string(),
            ));
        }
        Ok(Self {
            config,
            summarizer,
            counter,
            sessions: SessionMap::new(),
        })
    }

    /// Messages currently labelled `topic`; empty before the first clustering
    pub async fn topic_messages(&self, session_id: &str, topic: usize) -> Vec<Message> {
        let Some(session) = self.sessions.get(session_id) else {
            return Vec::new();
        };
        let state = session.lock().await;
        state
            .labels
            .iter()
            .zip(&state.messages)
            .filter(|(label, _)| **label == topic)
            .map(|(_, message)| message.clone())
            .collect()
    }

    /// Rendered context plus the token count after every eviction step
    pub async fn context_with_trace(&self, session_id: &str) -> Result<(Context, EvictionTrace)> {
        let (topics, recent) = match self.sessions.get(session_id) {
            Some(session) => {
                let state = session.lock().await;
                let tail = self.config.recent_messages.min(state.messages.len());
                (
                    state.topics.values().cloned().collect::<Vec<_>>(),
                    state.messages[state.messages.len() - tail..]
                        .iter()
                        .cloned()
                        .collect::<VecDeque<_>>(),
                )
            }
            None => (Vec::new(), VecDeque::new()),
        };
        Ok(self.evict_to_budget(topics, recent))
    }

    fn render(topics: &[Topic], recent: &VecDeque<Message>) -> Context {
        let mut items: Vec<ContextItem> = topics
            .iter()
            .map(|t| ContextItem::topic(t.summary.clone()))
            .collect();
        items.extend(recent.iter().map(ContextItem::message));
        Context::new(items)
    }

    fn evict_to_budget(
        &self,
        mut topics: Vec<Topic>,
        mut recent: VecDeque<Message>,
    ) -> (Context, EvictionTrace) {
        let mut context = Self::render(&topics, &recent);
        let mut tokens = self.counter.count(&context.render());
        let mut trace = EvictionTrace {
            tokens: vec![tokens],
            evicted_topics: 0,
            evicted_messages: 0,
            over_budget: false,
        };
        let Some(max) = self.config.max_context_tokens else {
            return (context, trace);
        };

        while tokens > max {
            let smallest = topics
                .iter()
                .enumerate()
                .min_by_key(|(_, t)| t.size)
                .map(|(i, _)| i);
            if let Some(idx) = smallest {
                topics.remove(idx);
                trace.evicted_topics += 1;
            } else if recent.pop_front().is_some() {
                trace.evicted_messages += 1;
            } else {
                trace.over_budget = true;
                warn!("Context still at {} tokens with nothing left to evict", tokens);
                break;
            }
            context = Self::render(&topics, &recent);
            tokens = self.counter.count(&context.render());
            trace.tokens.push(tokens);
        }

        let strategy = self.kind().as_str();
        METRICS.record_context_tokens(strategy, tokens);
        METRICS.record_evictions(strategy, "topic", trace.evicted_topics);
        METRICS.record_evictions(strategy, "message", trace.evicted_messages);
        if trace.evicted_topics + trace.evicted_messages > 0 {
            debug!(
                "Evicted {} topics and {} messages to fit {} tokens",
                trace.evicted_topics, trace.evicted_messages, max
            );
        }
        (context, trace)
    }

    /// Labels and per-topic summaries for `messages`
    async fn cluster(&self, messages: &[Message]) -> Result<(Vec<usize>, IndexMap<usize, Topic>)> {
        let documents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        let matrix = TfidfMatrix::fit(&documents);
        let config = KMeansConfig {
            seed: self.config.seed,
            ..KMeansConfig::new(self.config.max_clusters)
        };
        let labels = fit_predict(&matrix.rows, &config);

        let mut groups: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        for (label, message) in labels.iter().zip(messages) {
            groups.entry(*label).or_default().push(message.render());
        }

        let summaries = try_join_all(groups.values().map(|texts| self.summarizer.summarize(texts))).await?;
        let topics = groups
            .iter()
            .zip(summaries)
            .map(|((label, texts), summary)| {
                (
                    *label,
                    Topic {
                        summary,
                        size: texts.len(),
                    },
                )
            })
            .collect();
        Ok((labels, topics))
    }
}

#[async_trait]
impl ContextStrategy for TopicCluster {
    fn kind(&self) -> StrategyKind {
        StrategyKind::TopicCluster
    }

    async fn add_message(&self, session_id: &str, message: Message) -> Result<()> {
        let session = self.sessions.entry(session_id);
        let mut state = session.lock().await;

        let count = state.messages.len() + 1;
        if count < self.config.max_clusters {
            state.messages.push(message);
            METRICS.record_add(self.kind().as_str(), true);
            return Ok(());
        }

        let mut messages = state.messages.clone();
        messages.push(message);
        let (labels, topics) = match self.cluster(&messages).await {
            Ok(fitted) => fitted,
            Err(e) => {
                METRICS.record_add(self.kind().as_str(), false);
                return Err(e);
            }
        };

        info!(
            "Reclustered {} messages into {} topics for session {}",
            count,
            topics.len(),
            session_id
        );
        state.messages = messages;
        state.labels = labels;
        state.topics = topics;

        METRICS.record_reclustering(self.kind().as_str());
        METRICS.record_add(self.kind().as_str(), true);
        Ok(())
    }

    async fn get_context(&self, session_id: &str) -> Result<Context> {
        let (context, _) = self.context_with_trace(session_id).await?;
        METRICS.record_context(self.kind().as_str(), true);
        Ok(context)
    }

    async fn get_internal_state(&self, session_id: &str) -> Result<StrategySnapshot> {
        let state = match self.sessions.get(session_id) {
            Some(session) => session.lock().await.clone(),
            None => TopicClusterState::default(),
        };
        Ok(StrategySnapshot::TopicCluster(state))
    }

    async fn clear_session(&self, session_id: &str) -> Result<()> {
        self.sessions.reset(session_id).await;
        Ok(())
    }
}
