//! Conversation handling on top of the context manager

pub mod responder;
pub mod service;

pub use responder::{LlmResponder, Responder, ResponderConfig, ResponderError};
pub use service::{build_prompt, unwrap_content, ChatReply, ChatService};
