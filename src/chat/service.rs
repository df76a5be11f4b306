//! One chat turn: render context, ask the model, record both sides

use super::responder::Responder;
use crate::context::{Message, TokenCounter};
use crate::error::Result;
use crate::manager::ContextManager;
use crate::metrics::METRICS;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub response: String,
    /// Tokens in the prompt sent to the model
    pub token_count: usize,
}

pub struct ChatService {
    manager: Arc<ContextManager>,
    responder: Arc<dyn Responder>,
    counter: Arc<dyn TokenCounter>,
}

impl ChatService {
    pub fn new(
        manager: Arc<ContextManager>,
        responder: Arc<dyn Responder>,
        counter: Arc<dyn TokenCounter>,
    ) -> Self {
        Self {
            manager,
            responder,
            counter,
        }
    }

    pub fn manager(&self) -> &Arc<ContextManager> {
        &self.manager
    }

    /// Answer `text` in the context of the session and store the exchange.
    ///
    /// The strategy is resolved once, so a concurrent change of the default
    /// cannot split the turn across two strategies. Nothing is stored when
    /// the model call fails.
    ///
    /// The two messages are stored one after the other. If storing the
    /// assistant reply fails, the user message stays recorded and the error
    /// is returned; the turn is then half-recorded, the same as a client that
    /// added only the user message.
    pub async fn handle_user_message(&self, session_id: &str, text: &str) -> Result<ChatReply> {
        let result = self.turn(session_id, text).await;
        METRICS.record_chat(result.is_ok());
        result
    }

    async fn turn(&self, session_id: &str, text: &str) -> Result<ChatReply> {
        let kind = self.manager.strategy_for(session_id);
        let context = self.manager.get_context_with(kind, session_id).await?;

        let prompt = build_prompt(&context.render(), text);
        let token_count = self.counter.count(&prompt);
        debug!(
            "Prompt for session {} via {}: {} context items, {} tokens",
            session_id,
            kind,
            context.len(),
            token_count
        );

        let raw = self.responder.respond(&prompt).await?;
        let response = unwrap_content(&raw);

        self.manager
            .add_message_with(kind, session_id, Message::user(text))
            .await?;
        self.manager
            .add_message_with(kind, session_id, Message::assistant(response.clone()))
            .await?;

        info!("Chat turn completed for session {}", session_id);
        Ok(ChatReply {
            response,
            token_count,
        })
    }
}

/// Continuation prompt over the rendered history
pub fn build_prompt(history: &str, text: &str) -> String {
    format!(
        "Given the following conversation history, continue the conversation appropriately. \
        Do not include any JSON formatting in your response.\n\n{}\nUser: {}\nAssistant:",
        history, text
    )
}

/// Models sometimes wrap the reply as `{"content": "..."}`; take the inner text
pub fn unwrap_content(raw: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Object(map)) => match map.get("content") {
            Some(serde_json::Value::String(inner)) => inner.clone(),
            _ => raw.to_string(),
        },
        _ => raw.to_string(),
    }
}
