//! Token budget enforcement for rendered context
//!
//! Rendered context that exceeds the configured maximum is shrunk in a fixed
//! order:
//! - oldest summary sentence first, until no summary text remains
//! - then oldest message sentence
//! - once a single fragment is left, the text is hard-truncated to a fraction
//!   (default 90%) of the budget
//!
//! Every loop iteration removes exactly one fragment, so the loop runs at most
//! `fragments - 1` times before falling through to truncation.

use super::models::{Context, ContextItem, ContextItemKind};
use super::token_estimator::TokenCounter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Token budget configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBudgetConfig {
    pub max_context_tokens: usize,
    pub hard_truncate_ratio: f64,
}

impl Default for TokenBudgetConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: 2000,
            hard_truncate_ratio: 0.9,
        }
    }
}

impl TokenBudgetConfig {
    pub fn with_max(max_context_tokens: usize) -> Self {
        Self {
            max_context_tokens,
            ..Default::default()
        }
    }

    /// Validate that the budget configuration is usable
    pub fn validate(&self) -> Result<(), BudgetError> {
        if self.max_context_tokens == 0 {
            return Err(BudgetError::ConfigurationInvalid(
                "max_context_tokens must be positive".to_string(),
            ));
        }
        if !(self.hard_truncate_ratio > 0.0 && self.hard_truncate_ratio <= 1.0) {
            return Err(BudgetError::ConfigurationInvalid(format!(
                "hard_truncate_ratio must be in (0, 1], got {}",
                self.hard_truncate_ratio
            )));
        }
        Ok(())
    }

    /// Token target used by hard truncation
    pub fn truncation_target(&self) -> usize {
        (self.max_context_tokens as f64 * self.hard_truncate_ratio).floor() as usize
    }
}

/// Token budget errors
#[derive(Debug, Error)]
pub enum BudgetError {
    #[error("Budget exceeded: {used} tokens used, {max} tokens allowed")]
    BudgetExceeded { used: usize, max: usize },

    #[error("Configuration invalid: {0}")]
    ConfigurationInvalid(String),
}

/// Result of fitting a context into the budget
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetOutcome {
    pub context: Context,
    pub tokens_before: usize,
    pub tokens_after: usize,
    pub dropped_summary_fragments: usize,
    pub dropped_message_fragments: usize,
    pub hard_truncated: bool,
}

impl BudgetOutcome {
    pub fn was_trimmed(&self) -> bool {
        self.hard_truncated || self.dropped_summary_fragments + self.dropped_message_fragments > 0
    }
}

#[derive(Debug, Clone)]
struct Fragment {
    item: usize,
    summary: bool,
    text: String,
}

/// Token budget manager
pub struct TokenBudgetManager {
    config: TokenBudgetConfig,
    counter: Arc<dyn TokenCounter>,
}

impl TokenBudgetManager {
    /// Create a new token budget manager
    pub fn new(config: TokenBudgetConfig, counter: Arc<dyn TokenCounter>) -> Result<Self, BudgetError> {
        config.validate()?;
        Ok(Self { config, counter })
    }

    /// Token cost of the rendered context
    pub fn measure(&self, context: &Context) -> usize {
        self.counter.count(&context.render())
    }

    /// Check if a given token count fits within the budget
    pub fn check_budget(&self, tokens: usize) -> Result<(), BudgetError> {
        if tokens > self.config.max_context_tokens {
            return Err(BudgetError::BudgetExceeded {
                used: tokens,
                max: self.config.max_context_tokens,
            });
        }
        Ok(())
    }

    pub fn max_tokens(&self) -> usize {
        self.config.max_context_tokens
    }

    pub fn config(&self) -> &TokenBudgetConfig {
        &self.config
    }

    pub fn counter(&self) -> &Arc<dyn TokenCounter> {
        &self.counter
    }

    /// Shrink `context` until its rendering fits the budget.
    ///
    /// Never fails: when nothing structural is left to drop the remaining text
    /// is hard-truncated, which always fits.
    pub fn enforce(&self, context: Context) -> BudgetOutcome {
        let tokens_before = self.measure(&context);
        if self.check_budget(tokens_before).is_ok() {
            return BudgetOutcome {
                context,
                tokens_before,
                tokens_after: tokens_before,
                dropped_summary_fragments: 0,
                dropped_message_fragments: 0,
                hard_truncated: false,
            };
        }

        let mut fragments = fragment(&context);
        let mut dropped_summary = 0;
        let mut dropped_message = 0;
        let mut current = rebuild(&context, &fragments);
        let mut tokens = self.measure(&current);

        while tokens > self.config.max_context_tokens && fragments.len() > 1 {
            let victim = fragments
                .iter()
                .position(|f| f.summary)
                .unwrap_or(0);
            if fragments.remove(victim).summary {
                dropped_summary += 1;
            } else {
                dropped_message += 1;
            }
            current = rebuild(&context, &fragments);
            tokens = self.measure(&current);
        }

        let mut hard_truncated = false;
        if tokens > self.config.max_context_tokens {
            let target = self.config.truncation_target();
            let text = self.counter.truncate(&current.render(), target);
            debug!(
                "Hard-truncating context from {} tokens to target {}",
                tokens, target
            );
            current = Context::new(vec![ContextItem::truncated(text)]);
            tokens = self.measure(&current);
            hard_truncated = true;
        }

        debug!(
            "Budget enforcement: {} -> {} tokens (dropped {} summary, {} message fragments)",
            tokens_before, tokens, dropped_summary, dropped_message
        );

        BudgetOutcome {
            context: current,
            tokens_before,
            tokens_after: tokens,
            dropped_summary_fragments: dropped_summary,
            dropped_message_fragments: dropped_message,
            hard_truncated,
        }
    }
}

/// Split text after `.`, `!` or `?` followed by whitespace
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            if let Some(&(j, next)) = chars.peek() {
                if next.is_whitespace() {
                    let sentence = text[start..i + c.len_utf8()].trim();
                    if !sentence.is_empty() {
                        sentences.push(sentence.to_string());
                    }
                    start = j;
                }
            }
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }
    sentences
}

fn fragment(context: &Context) -> Vec<Fragment> {
    let mut fragments = Vec::new();
    for (idx, item) in context.items.iter().enumerate() {
        let summary = matches!(item.kind, ContextItemKind::Summary | ContextItemKind::Topic);
        let sentences = split_sentences(&item.content);
        if sentences.is_empty() {
            fragments.push(Fragment {
                item: idx,
                summary,
                text: item.content.clone(),
            });
        } else {
            fragments.extend(sentences.into_iter().map(|text| Fragment {
                item: idx,
                summary,
                text,
            }));
        }
    }
    fragments
}

fn rebuild(original: &Context, fragments: &[Fragment]) -> Context {
    let mut items = Vec::new();
    let mut iter = fragments.iter().peekable();
    while let Some(first) = iter.next() {
        let mut parts = vec![first.text.as_str()];
        while let Some(next) = iter.peek() {
            if next.item != first.item {
                break;
            }
            parts.push(next.text.as_str());
            iter.next();
        }
        let mut item = original.items[first.item].clone();
        item.content = parts.join(" ");
        items.push(item);
    }
    Context::new(items)
}
