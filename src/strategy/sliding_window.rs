//! Fixed-size FIFO of the most recent messages

use super::session::SessionMap;
use super::{ContextStrategy, StrategyKind, StrategySnapshot};
use crate::context::{Context, Message};
use crate::error::Result;
use crate::metrics::METRICS;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

pub const DEFAULT_WINDOW_SIZE: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlidingWindowState {
    pub window_size: usize,
    pub window: Vec<Message>,
}

/// Keeps the last `window_size` messages verbatim, oldest first
pub struct SlidingWindow {
    window_size: usize,
    sessions: SessionMap<VecDeque<Message>>,
}

impl SlidingWindow {
    /// A zero size is bumped to one so the window can hold the latest message
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size: window_size.max(1),
            sessions: SessionMap::new(),
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }
}

impl Default for SlidingWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}

#[async_trait]
impl ContextStrategy for SlidingWindow {
    fn kind(&self) -> StrategyKind {
        StrategyKind::SlidingWindow
    }

    async fn add_message(&self, session_id: &str, message: Message) -> Result<()> {
        let session = self.sessions.entry(session_id);
        let mut window = session.lock().await;
        window.push_back(message);
        while window.len() > self.window_size {
            window.pop_front();
        }
        METRICS.record_add(self.kind().as_str(), true);
        Ok(())
    }

    async fn get_context(&self, session_id: &str) -> Result<Context> {
        let context = match self.sessions.get(session_id) {
            Some(session) => Context::from_messages(session.lock().await.iter()),
            None => Context::default(),
        };
        METRICS.record_context(self.kind().as_str(), true);
        Ok(context)
    }

    async fn get_internal_state(&self, session_id: &str) -> Result<StrategySnapshot> {
        let window = match self.sessions.get(session_id) {
            Some(session) => session.lock().await.iter().cloned().collect(),
            None => Vec::new(),
        };
        Ok(StrategySnapshot::SlidingWindow(SlidingWindowState {
            window_size: self.window_size,
            window,
        }))
    }

    async fn clear_session(&self, session_id: &str) -> Result<()> {
        self.sessions.reset(session_id).await;
        Ok(())
    }
}
