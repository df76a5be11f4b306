//! Request and response bodies of the HTTP API

use crate::context::{ContextItem, Message, Role};
use crate::strategy::StrategyKind;
use serde::{Deserialize, Serialize};

/// Error body returned by every endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub session_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddMessageRequest {
    #[serde(default)]
    pub role: Role,
    pub content: String,
    /// Route this message to a specific strategy instead of the session's
    #[serde(default)]
    pub strategy: Option<String>,
}

impl AddMessageRequest {
    pub fn into_message(self) -> Message {
        Message::new(self.role, self.content)
    }
}

/// Optional `?strategy=` override for read endpoints
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StrategyQuery {
    pub strategy: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextResponse {
    pub session_id: String,
    pub strategy: StrategyKind,
    pub rendered: String,
    pub items: Vec<ContextItem>,
    pub token_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyRequest {
    pub strategy: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyResponse {
    /// Strategy in effect after the request
    pub strategy: StrategyKind,
    /// False when the requested name was not recognised
    pub applied: bool,
    pub available: Vec<StrategyKind>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RehydrateRequest {
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RehydrateResponse {
    pub session_id: String,
    pub restored: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluateRequest {
    pub conversation: Vec<Message>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub default_strategy: StrategyKind,
}

/// Error codes
pub mod error_codes {
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const UNKNOWN_STRATEGY: &str = "UNKNOWN_STRATEGY";
    pub const UPSTREAM_ERROR: &str = "UPSTREAM_ERROR";
    pub const INVARIANT_VIOLATION: &str = "INVARIANT_VIOLATION";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}
