//! Batch-triggered rolling summarization
//!
//! Messages accumulate in a per-session stack tagged with the open batch id.
//! When the open batch reaches the threshold, its messages are summarized,
//! the summary is appended to the session's summary sequence, the batch is
//! removed from the stack and the batch id advances. All of that happens under
//! the session lock, and the summarizer is called before anything is written,
//! so a failed summarization leaves the session untouched.
//!
//! With a token budget configured, the rendered context is fitted to the
//! budget on every read. Stored state is never trimmed.

use super::session::SessionLocks;
use super::{ContextStrategy, StrategyKind, StrategySnapshot};
use crate::context::{
    Context, ContextItem, Message, Summarizer, Summary, TokenBudgetConfig, TokenBudgetManager,
    TokenCounter,
};
use crate::error::{ContextError, Result};
use crate::metrics::METRICS;
use crate::store::{
    batch_id_key, decode, encode, stack_key, summary_key, LogOrder, LogRecord, MessageLog,
    SessionStore, StoreOp,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_BATCH_THRESHOLD: usize = 5;
pub const DEFAULT_REHYDRATE_LIMIT: usize = 20;

#[derive(Debug, Clone)]
pub struct BatchedSummaryConfig {
    /// Messages per batch before it is summarized
    pub threshold: usize,
    /// Enables the token-budget variant
    pub token_budget: Option<TokenBudgetConfig>,
}

impl Default for BatchedSummaryConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_BATCH_THRESHOLD,
            token_budget: None,
        }
    }
}

/// A stack entry: the message plus the batch it was written into
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackEntry {
    pub batch_id: u64,
    pub message: Message,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchedSummaryState {
    pub batch_id: u64,
    pub threshold: usize,
    pub stack: Vec<StackEntry>,
    pub summaries: Vec<Summary>,
    pub log: Vec<LogRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_tokens: Option<usize>,
}

impl BatchedSummaryState {
    /// Messages of the open batch still on the stack
    pub fn open_batch_len(&self) -> usize {
        self.stack
            .iter()
            .filter(|e| e.batch_id == self.batch_id)
            .count()
    }

    /// Messages represented by summaries
    pub fn summarized_count(&self) -> usize {
        self.summaries.iter().map(|s| s.count).sum()
    }
}

pub struct BatchedSummary {
    threshold: usize,
    store: Arc<dyn SessionStore>,
    log: Arc<dyn MessageLog>,
    summarizer: Arc<dyn Summarizer>,
    budget: Option<TokenBudgetManager>,
    locks: SessionLocks,
}

impl BatchedSummary {
    pub fn new(
        config: BatchedSummaryConfig,
        store: Arc<dyn SessionStore>,
        log: Arc<dyn MessageLog>,
        summarizer: Arc<dyn Summarizer>,
        counter: Arc<dyn TokenCounter>,
    ) -> Result<Self> {
        if config.threshold == 0 {
            return Err(ContextError::Configuration(
                "batch threshold must be positive".to_string(),
            ));
        }
        let budget = config
            .token_budget
            .map(|b| TokenBudgetManager::new(b, counter))
            .transpose()
            .map_err(|e| ContextError::Configuration(e.to_string()))?;

        Ok(Self {
            threshold: config.threshold,
            store,
            log,
            summarizer,
            budget,
            locks: SessionLocks::new(),
        })
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    async fn current_batch(&self, session_id: &str) -> Result<u64> {
        match self.store.scalar_get(&batch_id_key(session_id)).await? {
            Some(bytes) => decode(&bytes),
            None => Ok(1),
        }
    }

    async fn load_stack(&self, session_id: &str) -> Result<Vec<StackEntry>> {
        self.store
            .list_all(&stack_key(session_id))
            .await?
            .iter()
            .map(|bytes| decode(bytes))
            .collect()
    }

    async fn load_summaries(&self, session_id: &str) -> Result<Vec<Summary>> {
        match self.store.scalar_get(&summary_key(session_id)).await? {
            Some(bytes) => decode(&bytes),
            None => Ok(Vec::new()),
        }
    }

    /// Summaries oldest first, then every message still on the stack
    async fn render(&self, session_id: &str) -> Result<Context> {
        let summaries = self.load_summaries(session_id).await?;
        let stack = self.load_stack(session_id).await?;

        let mut items: Vec<ContextItem> = summaries
            .iter()
            .map(|s| ContextItem::summary(s.content.clone()))
            .collect();
        items.extend(stack.iter().map(|e| ContextItem::message(&e.message)));
        Ok(Context::new(items))
    }

    fn fit_to_budget(&self, context: Context) -> Context {
        let Some(budget) = &self.budget else {
            return context;
        };
        let strategy = self.kind().as_str();
        let outcome = budget.enforce(context);
        METRICS.record_context_tokens(strategy, outcome.tokens_after);
        METRICS.record_evictions(strategy, "summary_fragment", outcome.dropped_summary_fragments);
        METRICS.record_evictions(strategy, "message_fragment", outcome.dropped_message_fragments);
        if outcome.hard_truncated {
            METRICS.record_hard_truncation(strategy);
        }
        if outcome.was_trimmed() {
            debug!(
                "Context trimmed from {} to {} tokens (budget {})",
                outcome.tokens_before,
                outcome.tokens_after,
                budget.max_tokens()
            );
        }
        outcome.context
    }

    async fn add_locked(&self, session_id: &str, message: Message) -> Result<()> {
        let batch_id = self.current_batch(session_id).await?;
        let stack = self.load_stack(session_id).await?;
        let in_batch = stack.iter().filter(|e| e.batch_id == batch_id).count() + 1;

        let record = LogRecord {
            session_id: session_id.to_string(),
            timestamp: message.timestamp,
            message: message.clone(),
            batch_id,
        };
        let entry = StackEntry { batch_id, message };

        if in_batch < self.threshold {
            self.store
                .list_append(&stack_key(session_id), encode(&entry)?)
                .await?;
            return self.log_or_restore(session_id, record, &stack, None).await;
        }

        // Close the batch: summarize first, then write everything in one commit.
        let texts: Vec<String> = stack
            .iter()
            .filter(|e| e.batch_id == batch_id)
            .chain(std::iter::once(&entry))
            .map(|e| e.message.render())
            .collect();
        let content = self.summarizer.summarize(&texts).await?;

        let previous = self.load_summaries(session_id).await?;
        let mut summaries = previous.clone();
        summaries.push(Summary {
            batch_id,
            content,
            count: texts.len(),
        });

        let key = stack_key(session_id);
        let mut ops = vec![StoreOp::ListDelete { key: key.clone() }];
        for remaining in stack.iter().filter(|e| e.batch_id != batch_id) {
            ops.push(StoreOp::ListAppend {
                key: key.clone(),
                value: encode(remaining)?,
            });
        }
        ops.push(StoreOp::ScalarSet {
            key: summary_key(session_id),
            value: encode(&summaries)?,
        });
        ops.push(StoreOp::ScalarSet {
            key: batch_id_key(session_id),
            value: encode(&(batch_id + 1))?,
        });

        self.store.commit(ops).await?;
        let closed = Some((previous.as_slice(), batch_id));
        self.log_or_restore(session_id, record, &stack, closed).await?;

        METRICS.record_summarization(self.kind().as_str());
        info!(
            "Summarized batch {} ({} messages) for session {}",
            batch_id,
            texts.len(),
            session_id
        );
        Ok(())
    }

    /// Append the log record after the store write. If the log rejects it,
    /// the stack (and, after a batch close, the summaries and batch counter)
    /// are written back as they were, so the store and the log never disagree.
    async fn log_or_restore(
        &self,
        session_id: &str,
        record: LogRecord,
        stack: &[StackEntry],
        closed: Option<(&[Summary], u64)>,
    ) -> Result<()> {
        let Err(e) = self.log.insert(record).await else {
            return Ok(());
        };

        let key = stack_key(session_id);
        let mut ops = vec![StoreOp::ListDelete { key: key.clone() }];
        for entry in stack {
            ops.push(StoreOp::ListAppend {
                key: key.clone(),
                value: encode(entry)?,
            });
        }
        if let Some((summaries, batch_id)) = closed {
            ops.push(StoreOp::ScalarSet {
                key: summary_key(session_id),
                value: encode(&summaries)?,
            });
            ops.push(StoreOp::ScalarSet {
                key: batch_id_key(session_id),
                value: encode(&batch_id)?,
            });
        }
        if let Err(restore) = self.store.commit(ops).await {
            return Err(ContextError::invariant(format!(
                "session {} store and log diverged: log insert failed ({}), restore failed ({})",
                session_id, e, restore
            )));
        }
        warn!("Message log rejected insert for session {}; store restored", session_id);
        Err(e)
    }

    /// Reset the stack and summaries, then reload the newest `limit` messages
    /// from the durable log (oldest first, original batch ids kept).
    pub async fn rehydrate(&self, session_id: &str, limit: usize) -> Result<usize> {
        let lock = self.locks.entry(session_id);
        let _guard = lock.lock().await;

        let mut records = self
            .log
            .query(session_id, LogOrder::NewestFirst, Some(limit))
            .await?;
        records.reverse();

        let key = stack_key(session_id);
        let mut ops = vec![
            StoreOp::ListDelete { key: key.clone() },
            StoreOp::ScalarDelete {
                key: summary_key(session_id),
            },
        ];
        for record in &records {
            ops.push(StoreOp::ListAppend {
                key: key.clone(),
                value: encode(&StackEntry {
                    batch_id: record.batch_id,
                    message: record.message.clone(),
                })?,
            });
        }
        self.store.commit(ops).await?;

        info!(
            "Rehydrated {} messages for session {}",
            records.len(),
            session_id
        );
        Ok(records.len())
    }
}

#[async_trait]
impl ContextStrategy for BatchedSummary {
    fn kind(&self) -> StrategyKind {
        StrategyKind::BatchedSummary
    }

    async fn add_message(&self, session_id: &str, message: Message) -> Result<()> {
        let lock = self.locks.entry(session_id);
        let _guard = lock.lock().await;

        let result = self.add_locked(session_id, message).await;
        METRICS.record_add(self.kind().as_str(), result.is_ok());
        result
    }

    async fn get_context(&self, session_id: &str) -> Result<Context> {
        let lock = self.locks.entry(session_id);
        let _guard = lock.lock().await;

        let result = self.render(session_id).await;
        METRICS.record_context(self.kind().as_str(), result.is_ok());
        Ok(self.fit_to_budget(result?))
    }

    async fn get_internal_state(&self, session_id: &str) -> Result<StrategySnapshot> {
        let lock = self.locks.entry(session_id);
        let _guard = lock.lock().await;

        let context_tokens = match &self.budget {
            Some(budget) => Some(budget.measure(&self.render(session_id).await?)),
            None => None,
        };

        Ok(StrategySnapshot::BatchedSummary(BatchedSummaryState {
            batch_id: self.current_batch(session_id).await?,
            threshold: self.threshold,
            stack: self.load_stack(session_id).await?,
            summaries: self.load_summaries(session_id).await?,
            log: self
                .log
                .query(session_id, LogOrder::OldestFirst, None)
                .await?,
            context_tokens,
        }))
    }

    /// Drops the stack and summaries. The batch counter and the durable log
    /// are kept so batch ids are never reused.
    async fn clear_session(&self, session_id: &str) -> Result<()> {
        let lock = self.locks.entry(session_id);
        let _guard = lock.lock().await;

        self.store
            .commit(vec![
                StoreOp::ListDelete {
                    key: stack_key(session_id),
                },
                StoreOp::ScalarDelete {
                    key: summary_key(session_id),
                },
            ])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{SummarizerError, WordCounter};
    use crate::store::{InMemoryMessageLog, InMemorySessionStore};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Returns `SUMMARY:<n>` where n counts calls, i.e. the batch id for a
    /// single session
    #[derive(Default)]
    struct BatchEcho {
        calls: AtomicUsize,
        fail: AtomicBool,
    }

    #[async_trait]
    impl Summarizer for BatchEcho {
        async fn summarize(&self, _texts: &[String]) -> std::result::Result<String, SummarizerError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(SummarizerError::NetworkError("offline".into()));
            }
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("SUMMARY:{}", n))
        }
    }

    fn strategy(threshold: usize, summarizer: Arc<BatchEcho>) -> BatchedSummary {
        BatchedSummary::new(
            BatchedSummaryConfig {
                threshold,
                token_budget: None,
            },
            Arc::new(InMemorySessionStore::new()),
            Arc::new(InMemoryMessageLog::new()),
            summarizer,
            Arc::new(WordCounter::default()),
        )
        .unwrap()
    }

    async fn state(strategy: &BatchedSummary, session: &str) -> BatchedSummaryState {
        match strategy.get_internal_state(session).await.unwrap() {
            StrategySnapshot::BatchedSummary(state) => state,
            other => panic!("unexpected snapshot {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fifth_message_closes_batch() {
        let strategy = strategy(5, Arc::new(BatchEcho::default()));
        for i in 0..5 {
            let msg = if i % 2 == 0 {
                Message::user(format!("question {}", i))
            } else {
                Message::assistant(format!("answer {}", i))
            };
            strategy.add_message("s", msg).await.unwrap();
        }

        let after_five = state(&strategy, "s").await;
        assert_eq!(
            after_five.summaries,
            vec![Summary {
                batch_id: 1,
                content: "SUMMARY:1".to_string(),
                count: 5
            }]
        );
        assert!(after_five.stack.is_empty());
        assert_eq!(after_five.batch_id, 2);
        assert_eq!(after_five.log.len(), 5);
        assert!(after_five.log.iter().all(|r| r.batch_id == 1));

        strategy.add_message("s", Message::user("sixth")).await.unwrap();
        let after_six = state(&strategy, "s").await;
        assert_eq!(after_six.stack.len(), 1);
        assert_eq!(after_six.stack[0].batch_id, 2);
        assert_eq!(after_six.stack[0].message.content, "sixth");
    }

    #[tokio::test]
    async fn test_accounting_invariant_holds() {
        let strategy = strategy(3, Arc::new(BatchEcho::default()));
        let mut last_batch = 1;
        for n in 1..=20usize {
            strategy
                .add_message("s", Message::user(format!("m{}", n)))
                .await
                .unwrap();
            let st = state(&strategy, "s").await;
            assert_eq!(st.open_batch_len() + st.summarized_count(), n);
            assert!(st.batch_id == last_batch || st.batch_id == last_batch + 1);
            last_batch = st.batch_id;
        }
        let st = state(&strategy, "s").await;
        let ids: Vec<u64> = st.summaries.iter().map(|s| s.batch_id).collect();
        assert_eq!(ids, (1..=6).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_context_renders_summaries_then_stack() {
        let strategy = strategy(2, Arc::new(BatchEcho::default()));
        strategy.add_message("s", Message::user("hi")).await.unwrap();
        strategy.add_message("s", Message::assistant("hello")).await.unwrap();
        strategy.add_message("s", Message::user("how are you")).await.unwrap();

        let context = strategy.get_context("s").await.unwrap();
        assert_eq!(context.render(), "summary: SUMMARY:1\nuser: how are you");
    }

    #[tokio::test]
    async fn test_failed_summary_leaves_state_untouched() {
        let summarizer = Arc::new(BatchEcho::default());
        let strategy = strategy(2, summarizer.clone());
        strategy.add_message("s", Message::user("one")).await.unwrap();
        let before = state(&strategy, "s").await;

        summarizer.fail.store(true, Ordering::SeqCst);
        let err = strategy
            .add_message("s", Message::user("two"))
            .await
            .unwrap_err();
        assert!(err.is_collaborator_failure());
        assert_eq!(state(&strategy, "s").await, before);

        summarizer.fail.store(false, Ordering::SeqCst);
        strategy.add_message("s", Message::user("two")).await.unwrap();
        assert_eq!(state(&strategy, "s").await.summaries.len(), 1);
    }

    /// In-memory store whose list appends can be switched off
    #[derive(Default)]
    struct FlakyStore {
        inner: InMemorySessionStore,
        fail_appends: AtomicBool,
    }

    #[async_trait]
    impl SessionStore for FlakyStore {
        async fn list_append(&self, key: &str, value: bytes::Bytes) -> Result<()> {
            if self.fail_appends.load(Ordering::SeqCst) {
                return Err(ContextError::Store("connection reset".into()));
            }
            self.inner.list_append(key, value).await
        }

        async fn list_all(&self, key: &str) -> Result<Vec<bytes::Bytes>> {
            self.inner.list_all(key).await
        }

        async fn list_delete(&self, key: &str) -> Result<()> {
            self.inner.list_delete(key).await
        }

        async fn scalar_get(&self, key: &str) -> Result<Option<bytes::Bytes>> {
            self.inner.scalar_get(key).await
        }

        async fn scalar_set(&self, key: &str, value: bytes::Bytes) -> Result<()> {
            self.inner.scalar_set(key, value).await
        }

        async fn scalar_delete(&self, key: &str) -> Result<()> {
            self.inner.scalar_delete(key).await
        }
    }

    #[derive(Default)]
    struct FlakyLog {
        inner: InMemoryMessageLog,
        fail: AtomicBool,
    }

    #[async_trait]
    impl MessageLog for FlakyLog {
        async fn insert(&self, record: LogRecord) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(ContextError::Store("log unavailable".into()));
            }
            self.inner.insert(record).await
        }

        async fn query(
            &self,
            session_id: &str,
            order: LogOrder,
            limit: Option<usize>,
        ) -> Result<Vec<LogRecord>> {
            self.inner.query(session_id, order, limit).await
        }
    }

    fn strategy_over(
        threshold: usize,
        store: Arc<dyn SessionStore>,
        log: Arc<dyn MessageLog>,
    ) -> BatchedSummary {
        BatchedSummary::new(
            BatchedSummaryConfig {
                threshold,
                token_budget: None,
            },
            store,
            log,
            Arc::new(BatchEcho::default()),
            Arc::new(WordCounter::default()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_failed_store_write_keeps_log_in_step() {
        let store = Arc::new(FlakyStore::default());
        let strategy = strategy_over(5, store.clone(), Arc::new(InMemoryMessageLog::new()));
        strategy.add_message("s", Message::user("one")).await.unwrap();
        let before = state(&strategy, "s").await;

        store.fail_appends.store(true, Ordering::SeqCst);
        let err = strategy
            .add_message("s", Message::user("two"))
            .await
            .unwrap_err();
        assert!(err.is_collaborator_failure());
        assert_eq!(state(&strategy, "s").await, before);

        store.fail_appends.store(false, Ordering::SeqCst);
        strategy.add_message("s", Message::user("two")).await.unwrap();
        let st = state(&strategy, "s").await;
        assert_eq!(st.log.len(), 2);
        assert_eq!(st.stack.len(), st.log.len());
    }

    #[tokio::test]
    async fn test_rejected_log_insert_restores_store() {
        let log = Arc::new(FlakyLog::default());
        let strategy = strategy_over(2, Arc::new(InMemorySessionStore::new()), log.clone());
        strategy.add_message("s", Message::user("one")).await.unwrap();
        let before = state(&strategy, "s").await;

        log.fail.store(true, Ordering::SeqCst);
        // closes the batch, so summaries and the batch counter are written first
        let err = strategy
            .add_message("s", Message::user("two"))
            .await
            .unwrap_err();
        assert!(err.is_collaborator_failure());
        assert_eq!(state(&strategy, "s").await, before);

        log.fail.store(false, Ordering::SeqCst);
        strategy.add_message("s", Message::user("two")).await.unwrap();
        strategy.add_message("s", Message::user("three")).await.unwrap();
        let st = state(&strategy, "s").await;
        assert_eq!(st.summaries.len(), 1);
        assert_eq!(st.open_batch_len() + st.summarized_count(), st.log.len());
        assert_eq!(st.log.len(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_adds_never_double_summarize() {
        let summarizer = Arc::new(BatchEcho::default());
        let strategy = Arc::new(strategy(5, summarizer.clone()));

        let handles: Vec<_> = (0..50)
            .map(|i| {
                let strategy = strategy.clone();
                tokio::spawn(async move {
                    strategy
                        .add_message("s", Message::user(format!("m{}", i)))
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let st = state(&strategy, "s").await;
        assert_eq!(st.summaries.len(), 10);
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 10);
        assert_eq!(st.open_batch_len() + st.summarized_count(), 50);
        assert_eq!(st.batch_id, 11);
    }

    #[tokio::test]
    async fn test_rehydrate_restores_recent_log() {
        let strategy = strategy(5, Arc::new(BatchEcho::default()));
        for i in 0..7 {
            strategy
                .add_message("s", Message::user(format!("m{}", i)))
                .await
                .unwrap();
        }

        let restored = strategy.rehydrate("s", 4).await.unwrap();
        assert_eq!(restored, 4);

        let st = state(&strategy, "s").await;
        assert!(st.summaries.is_empty());
        let contents: Vec<&str> = st.stack.iter().map(|e| e.message.content.as_str()).collect();
        assert_eq!(contents, vec!["m3", "m4", "m5", "m6"]);
        assert_eq!(st.stack[0].batch_id, 1);
        assert_eq!(st.stack[3].batch_id, 2);
        assert_eq!(st.batch_id, 2);
    }

    #[tokio::test]
    async fn test_budget_variant_fits_context() {
        let strategy = BatchedSummary::new(
            BatchedSummaryConfig {
                threshold: 100,
                token_budget: Some(TokenBudgetConfig::with_max(20)),
            },
            Arc::new(InMemorySessionStore::new()),
            Arc::new(InMemoryMessageLog::new()),
            Arc::new(BatchEcho::default()),
            Arc::new(WordCounter::new(1.0)),
        )
        .unwrap();

        for i in 0..10 {
            strategy
                .add_message("s", Message::user(format!("sentence number {}. More words here.", i)))
                .await
                .unwrap();
        }
        let context = strategy.get_context("s").await.unwrap();
        assert!(context.render().split_whitespace().count() <= 20);
        assert!(context.render().contains("sentence number 9."));

        // stored state is not trimmed
        assert_eq!(state(&strategy, "s").await.stack.len(), 10);
    }

    #[tokio::test]
    async fn test_empty_session_context() {
        let strategy = strategy(5, Arc::new(BatchEcho::default()));
        assert!(strategy.get_context("new").await.unwrap().is_empty());
        let st = state(&strategy, "new").await;
        assert_eq!(st.batch_id, 1);
        assert!(st.stack.is_empty() && st.summaries.is_empty() && st.log.is_empty());
    }
}
