//! In-process implementations of the storage collaborators

use super::{LogOrder, LogRecord, MessageLog, SessionStore};
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

/// Key-value/list store held in memory
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    lists: DashMap<String, Vec<Bytes>>,
    scalars: DashMap<String, Bytes>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn list_append(&self, key: &str, value: Bytes) -> Result<()> {
        self.lists.entry(key.to_string()).or_default().push(value);
        Ok(())
    }

    async fn list_all(&self, key: &str) -> Result<Vec<Bytes>> {
        Ok(self
            .lists
            .get(key)
            .map(|list| list.value().clone())
            .unwrap_or_default())
    }

    async fn list_delete(&self, key: &str) -> Result<()> {
        self.lists.remove(key);
        Ok(())
    }

    async fn scalar_get(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.scalars.get(key).map(|v| v.value().clone()))
    }

    async fn scalar_set(&self, key: &str, value: Bytes) -> Result<()> {
        self.scalars.insert(key.to_string(), value);
        Ok(())
    }

    async fn scalar_delete(&self, key: &str) -> Result<()> {
        self.scalars.remove(key);
        Ok(())
    }
}

/// Message log held in memory, one vector per session
#[derive(Debug, Default)]
pub struct InMemoryMessageLog {
    records: DashMap<String, Vec<LogRecord>>,
}

impl InMemoryMessageLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageLog for InMemoryMessageLog {
    async fn insert(&self, record: LogRecord) -> Result<()> {
        self.records
            .entry(record.session_id.clone())
            .or_default()
            .push(record);
        Ok(())
    }

    async fn query(
        &self,
        session_id: &str,
        order: LogOrder,
        limit: Option<usize>,
    ) -> Result<Vec<LogRecord>> {
        let mut records = self
            .records
            .get(session_id)
            .map(|r| r.value().clone())
            .unwrap_or_default();

        // Stable sort keeps insertion order for equal timestamps
        records.sort_by_key(|r| r.timestamp);
        if order == LogOrder::NewestFirst {
            records.reverse();
        }
        if let Some(limit) = limit {
            records.truncate(limit);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Message;
    use crate::store::{StoreOp, stack_key};
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn test_list_roundtrip_and_delete() {
        let store = InMemorySessionStore::new();
        let key = stack_key("s");
        store.list_append(&key, Bytes::from_static(b"a")).await.unwrap();
        store.list_append(&key, Bytes::from_static(b"b")).await.unwrap();
        assert_eq!(store.list_all(&key).await.unwrap().len(), 2);

        store.list_delete(&key).await.unwrap();
        assert!(store.list_all(&key).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_commit_applies_in_order() {
        let store = InMemorySessionStore::new();
        store
            .commit(vec![
                StoreOp::ListAppend { key: "k".into(), value: Bytes::from_static(b"1") },
                StoreOp::ListDelete { key: "k".into() },
                StoreOp::ListAppend { key: "k".into(), value: Bytes::from_static(b"2") },
                StoreOp::ScalarSet { key: "n".into(), value: Bytes::from_static(b"7") },
            ])
            .await
            .unwrap();
        assert_eq!(store.list_all("k").await.unwrap(), vec![Bytes::from_static(b"2")]);
        assert_eq!(store.scalar_get("n").await.unwrap(), Some(Bytes::from_static(b"7")));
    }

    #[tokio::test]
    async fn test_log_query_order_and_limit() {
        let log = InMemoryMessageLog::new();
        let base = Utc::now();
        for i in 0..5 {
            let ts = base + Duration::seconds(i);
            log.insert(LogRecord {
                session_id: "s".into(),
                timestamp: ts,
                message: Message::user(format!("m{}", i)).at(ts),
                batch_id: 1,
            })
            .await
            .unwrap();
        }

        let newest = log.query("s", LogOrder::NewestFirst, Some(2)).await.unwrap();
        assert_eq!(newest[0].message.content, "m4");
        assert_eq!(newest[1].message.content, "m3");

        let all = log.query("s", LogOrder::OldestFirst, None).await.unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all[0].message.content, "m0");
        assert!(log.query("other", LogOrder::OldestFirst, None).await.unwrap().is_empty());
    }
}
