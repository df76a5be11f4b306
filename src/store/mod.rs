//! Session storage collaborators
//!
//! Two stores back the summarization strategies:
//! - a per-session key-value/list store (the active "stack", the batch counter
//!   and the summary blob)
//! - a durable append-only log of every message ever added

pub mod memory;

use crate::context::Message;
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

pub use memory::{InMemoryMessageLog, InMemorySessionStore};

/// Key of the ordered list of unsummarized messages
pub fn stack_key(session_id: &str) -> String {
    format!("{}:stack", session_id)
}

/// Key of the summary sequence blob
pub fn summary_key(session_id: &str) -> String {
    format!("{}:summary", session_id)
}

/// Key of the open batch counter
pub fn batch_id_key(session_id: &str) -> String {
    format!("{}:batch_id", session_id)
}

/// Encode a value for storage
pub fn encode<T: Serialize>(value: &T) -> Result<Bytes> {
    Ok(Bytes::from(rmp_serde::to_vec_named(value)?))
}

/// Decode a stored value
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(rmp_serde::from_slice(bytes)?)
}

/// A single write, grouped into a [`SessionStore::commit`]
#[derive(Debug, Clone)]
pub enum StoreOp {
    ListAppend { key: String, value: Bytes },
    ListDelete { key: String },
    ScalarSet { key: String, value: Bytes },
    ScalarDelete { key: String },
}

/// Per-session list and scalar storage
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn list_append(&self, key: &str, value: Bytes) -> Result<()>;

    /// Whole list, in insertion order
    async fn list_all(&self, key: &str) -> Result<Vec<Bytes>>;

    async fn list_delete(&self, key: &str) -> Result<()>;

    async fn scalar_get(&self, key: &str) -> Result<Option<Bytes>>;

    async fn scalar_set(&self, key: &str, value: Bytes) -> Result<()>;

    async fn scalar_delete(&self, key: &str) -> Result<()>;

    /// Apply a group of writes as one unit.
    ///
    /// The default applies them in order. Remote stores should override this
    /// with their transaction primitive so a failure leaves nothing applied.
    async fn commit(&self, ops: Vec<StoreOp>) -> Result<()> {
        for op in ops {
            match op {
                StoreOp::ListAppend { key, value } => self.list_append(&key, value).await?,
                StoreOp::ListDelete { key } => self.list_delete(&key).await?,
                StoreOp::ScalarSet { key, value } => self.scalar_set(&key, value).await?,
                StoreOp::ScalarDelete { key } => self.scalar_delete(&key).await?,
            }
        }
        Ok(())
    }
}

/// One durable log document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub message: Message,
    pub batch_id: u64,
}

/// Sort order for log queries, by timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogOrder {
    OldestFirst,
    NewestFirst,
}

/// Durable append-only message log
#[async_trait]
pub trait MessageLog: Send + Sync {
    async fn insert(&self, record: LogRecord) -> Result<()>;

    async fn query(
        &self,
        session_id: &str,
        order: LogOrder,
        limit: Option<usize>,
    ) -> Result<Vec<LogRecord>>;
}
