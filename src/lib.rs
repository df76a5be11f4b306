//! Per-session chat context management
//!
//! A [`ContextManager`] holds one instance of each context strategy and routes
//! every message of a session to the strategy selected for it. Strategies
//! decide what to keep verbatim, what to summarize and what to recall when the
//! next prompt is assembled:
//!
//! - [`strategy::SlidingWindow`]: the last N messages
//! - [`strategy::BatchedSummary`]: rolling summaries of fixed-size batches,
//!   optionally fitted to a token budget
//! - [`strategy::HierarchicalSummary`]: summaries of summaries, four tiers deep
//! - [`strategy::KeywordImportance`]: TF-IDF ranked messages
//! - [`strategy::TopicCluster`]: per-topic summaries over k-means clusters
//! - [`strategy::VectorRecall`]: short-term FIFO plus similarity recall

pub mod analysis;
pub mod api;
pub mod chat;
pub mod config;
pub mod context;
pub mod embedding;
pub mod error;
pub mod evaluation;
pub mod index;
pub mod manager;
pub mod metrics;
pub mod store;
pub mod strategy;

pub use chat::{ChatReply, ChatService};
pub use context::{Context, ContextItem, Message, Role, Summary};
pub use error::{ContextError, Result};
pub use manager::{ContextManager, StrategySet};
pub use strategy::{ContextStrategy, StrategyKind, StrategySnapshot};

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
pub fn init_tracing(logging: &crate::config::LoggingConfig) -> std::result::Result<(), String> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .map_err(|e| format!("Invalid log filter {:?}: {}", logging.level, e))?;

    let builder = fmt().with_env_filter(filter).with_target(true);
    let result = if logging.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| format!("Log system initialization failed: {}", e))
}
