//! Multi-level summarization
//!
//! Tier 1 holds raw messages. Every `fanout`-th append to a tier summarizes the
//! last `fanout` entries of that tier into one entry of the tier above, up to
//! tier 4. Tiers are append-only.

use super::session::SessionMap;
use super::{ContextStrategy, StrategyKind, StrategySnapshot};
use crate::context::{Context, ContextItem, Message, Summarizer};
use crate::error::{ContextError, Result};
use crate::metrics::METRICS;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

pub const TIER_COUNT: usize = 4;
pub const DEFAULT_FANOUT: usize = 10;
pub const DEFAULT_RECENT_MESSAGES: usize = 10;

#[derive(Debug, Clone)]
pub struct HierarchicalConfig {
    pub fanout: usize,
    /// Tier-1 entries rendered by `get_context`
    pub recent_messages: usize,
    /// Entries rendered from tiers 2, 3 and 4
    pub summary_tails: [usize; TIER_COUNT - 1],
}

impl Default for HierarchicalConfig {
    fn default() -> Self {
        Self {
            fanout: DEFAULT_FANOUT,
            recent_messages: DEFAULT_RECENT_MESSAGES,
            summary_tails: [5, 3, 1],
        }
    }
}

#[derive(Debug, Default)]
struct Tiers {
    messages: Vec<Message>,
    summaries: [Vec<String>; TIER_COUNT - 1],
}

impl Tiers {
    fn counts(&self) -> [usize; TIER_COUNT] {
        [
            self.messages.len(),
            self.summaries[0].len(),
            self.summaries[1].len(),
            self.summaries[2].len(),
        ]
    }

    /// Each tier holds exactly one entry per `fanout` entries of the tier below
    fn check(&self, fanout: usize) -> Result<()> {
        let counts = self.counts();
        for tier in 1..TIER_COUNT {
            if counts[tier] != counts[tier - 1] / fanout {
                return Err(ContextError::invariant(format!(
                    "tier {} holds {} entries but tier {} holds {}",
                    tier + 1,
                    counts[tier],
                    tier,
                    counts[tier - 1]
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchicalState {
    pub fanout: usize,
    /// Entries per tier, tier 1 first
    pub tier_counts: [usize; TIER_COUNT],
    pub recent_messages: Vec<Message>,
    /// Summaries of tiers 2..=4
    pub summaries: Vec<Vec<String>>,
}

pub struct HierarchicalSummary {
    config: HierarchicalConfig,
    summarizer: Arc<dyn Summarizer>,
    sessions: SessionMap<Tiers>,
}

impl HierarchicalSummary {
    pub fn new(config: HierarchicalConfig, summarizer: Arc<dyn Summarizer>) -> Result<Self> {
        if config.fanout < 2 {
            return Err(ContextError::Configuration(format!(
                "hierarchy fanout must be at least 2, got {}",
                config.fanout
            )));
        }
        Ok(Self {
            config,
            summarizer,
            sessions: SessionMap::new(),
        })
    }

    /// Last `fanout - 1` entries of a tier plus the incoming one
    fn rollup_input(existing: impl DoubleEndedIterator<Item = String>, incoming: String, fanout: usize) -> Vec<String> {
        let mut texts: Vec<String> = existing.rev().take(fanout - 1).collect();
        texts.reverse();
        texts.push(incoming);
        texts
    }
}

#[async_trait]
impl ContextStrategy for HierarchicalSummary {
    fn kind(&self) -> StrategyKind {
        StrategyKind::HierarchicalSummary
    }

    async fn add_message(&self, session_id: &str, message: Message) -> Result<()> {
        let fanout = self.config.fanout;
        let session = self.sessions.entry(session_id);
        let mut tiers = session.lock().await;
        tiers.check(fanout)?;

        // Summaries produced by this append, tier 2 first. Nothing is
        // written until every summarizer call has succeeded.
        let mut rollups: Vec<String> = Vec::new();
        if (tiers.messages.len() + 1) % fanout == 0 {
            let texts = Self::rollup_input(
                tiers.messages.iter().map(Message::render),
                message.render(),
                fanout,
            );
            let mut summary = self.summarizer.summarize(&texts).await;
            for tier in 0..TIER_COUNT - 1 {
                let content = match summary {
                    Ok(content) => content,
                    Err(e) => {
                        METRICS.record_add(self.kind().as_str(), false);
                        return Err(e.into());
                    }
                };
                rollups.push(content.clone());
                if tier + 1 == TIER_COUNT - 1 || (tiers.summaries[tier].len() + 1) % fanout != 0 {
                    break;
                }
                let texts = Self::rollup_input(
                    tiers.summaries[tier].iter().cloned(),
                    content,
                    fanout,
                );
                summary = self.summarizer.summarize(&texts).await;
            }
        }

        tiers.messages.push(message);
        for (tier, content) in rollups.into_iter().enumerate() {
            tiers.summaries[tier].push(content);
            METRICS.record_summarization(self.kind().as_str());
            debug!("Rolled up tier {} for session {}", tier + 2, session_id);
        }
        METRICS.record_add(self.kind().as_str(), true);
        Ok(())
    }

    async fn get_context(&self, session_id: &str) -> Result<Context> {
        let Some(session) = self.sessions.get(session_id) else {
            METRICS.record_context(self.kind().as_str(), true);
            return Ok(Context::default());
        };
        let tiers = session.lock().await;

        let mut items = Vec::new();
        for tier in (0..TIER_COUNT - 1).rev() {
            let entries = &tiers.summaries[tier];
            let tail = self.config.summary_tails[tier].min(entries.len());
            items.extend(
                entries[entries.len() - tail..]
                    .iter()
                    .map(|s| ContextItem::summary(s.clone())),
            );
        }
        let tail = self.config.recent_messages.min(tiers.messages.len());
        items.extend(
            tiers.messages[tiers.messages.len() - tail..]
                .iter()
                .map(ContextItem::message),
        );

        METRICS.record_context(self.kind().as_str(), true);
        Ok(Context::new(items))
    }

    async fn get_internal_state(&self, session_id: &str) -> Result<StrategySnapshot> {
        let state = match self.sessions.get(session_id) {
            Some(session) => {
                let tiers = session.lock().await;
                let tail = self.config.recent_messages.min(tiers.messages.len());
                HierarchicalState {
                    fanout: self.config.fanout,
                    tier_counts: tiers.counts(),
                    recent_messages: tiers.messages[tiers.messages.len() - tail..].to_vec(),
                    summaries: tiers.summaries.to_vec(),
                }
            }
            None => HierarchicalState {
                fanout: self.config.fanout,
                tier_counts: [0; TIER_COUNT],
                recent_messages: Vec::new(),
                summaries: vec![Vec::new(); TIER_COUNT - 1],
            },
        };
        Ok(StrategySnapshot::HierarchicalSummary(state))
    }

    async fn clear_session(&self, session_id: &str) -> Result<()> {
        self.sessions.reset(session_id).await;
        Ok(())
    }
}
