//! Error types for context management

use crate::chat::responder::ResponderError;
use crate::context::summarizer::SummarizerError;
use crate::embedding::EmbeddingError;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, ContextError>;

/// Errors raised by strategies, collaborators and the service layer
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Summarizer failure: {0}")]
    Summarizer(#[from] SummarizerError),

    #[error("Embedding failure: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Responder failure: {0}")]
    Responder(#[from] ResponderError),

    #[error("Session store failure: {0}")]
    Store(String),

    #[error("Similarity index failure: {0}")]
    Index(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal bookkeeping desynchronised. Never recovered from.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ContextError {
    /// True when the failure originated in an external collaborator call
    /// (store, index, model). Session state is unchanged in that case.
    pub fn is_collaborator_failure(&self) -> bool {
        matches!(
            self,
            ContextError::Summarizer(_)
                | ContextError::Embedding(_)
                | ContextError::Responder(_)
                | ContextError::Store(_)
                | ContextError::Index(_)
        )
    }

    /// Build an invariant violation, logging it at error level
    pub fn invariant(message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::error!("Invariant violation: {}", message);
        ContextError::InvariantViolation(message)
    }
}

impl From<rmp_serde::encode::Error> for ContextError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        ContextError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for ContextError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        ContextError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for ContextError {
    fn from(e: serde_json::Error) -> Self {
        ContextError::Serialization(e.to_string())
    }
}

impl From<config::ConfigError> for ContextError {
    fn from(e: config::ConfigError) -> Self {
        ContextError::Configuration(e.to_string())
    }
}
