//! Context primitives shared by every strategy
//!
//! Message and context models, token counting, budget enforcement and the
//! summarizer collaborator.

pub mod models;
pub mod summarizer;
pub mod token_budget;
pub mod token_estimator;

pub use models::{Context, ContextItem, ContextItemKind, Message, Role, Summary};
pub use summarizer::{ConcatenationSummarizer, LlmSummarizer, Summarizer, SummarizerConfig, SummarizerError};
pub use token_budget::{split_sentences, BudgetError, BudgetOutcome, TokenBudgetConfig, TokenBudgetManager};
pub use token_estimator::{TiktokenCounter, TokenCounter, WordCounter};
