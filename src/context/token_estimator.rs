//! Token counting using tiktoken

use crate::error::{ContextError, Result};
use std::sync::Arc;
use tiktoken_rs::{cl100k_base, CoreBPE};

/// Maps text to a token cost under a fixed tokenization scheme
pub trait TokenCounter: Send + Sync {
    /// Count the tokens in the given text
    fn count(&self, text: &str) -> usize;

    /// Count tokens for multiple texts
    fn count_batch(&self, texts: &[&str]) -> Vec<usize> {
        texts.iter().map(|t| self.count(t)).collect()
    }

    /// Longest prefix of `text` costing at most `max_tokens`.
    ///
    /// The default searches over char boundaries with `count`, which is
    /// monotone for any sane tokenizer.
    fn truncate(&self, text: &str, max_tokens: usize) -> String {
        if self.count(text) <= max_tokens {
            return text.to_string();
        }
        let boundaries: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();
        let (mut lo, mut hi) = (0usize, boundaries.len() - 1);
        while lo < hi {
            let mid = (lo + hi + 1) / 2;
            if self.count(&text[..boundaries[mid]]) <= max_tokens {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }
        text[..boundaries[lo]].to_string()
    }
}

/// Tiktoken-based counter using cl100k_base (GPT-4, GPT-3.5-turbo)
pub struct TiktokenCounter {
    bpe: Arc<CoreBPE>,
}

impl TiktokenCounter {
    /// Create a new tiktoken counter with cl100k_base encoding
    pub fn new() -> Result<Self> {
        let bpe = cl100k_base()
            .map_err(|e| ContextError::Configuration(format!("Failed to load tokenizer: {}", e)))?;
        Ok(Self { bpe: Arc::new(bpe) })
    }
}

impl TokenCounter for TiktokenCounter {
    fn count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }

    fn truncate(&self, text: &str, max_tokens: usize) -> String {
        let tokens = self.bpe.encode_with_special_tokens(text);
        if tokens.len() <= max_tokens {
            return text.to_string();
        }
        // Cutting a multi-byte sequence makes decode fail; back off until it succeeds.
        let mut end = max_tokens;
        loop {
            if end == 0 {
                return String::new();
            }
            if let Ok(decoded) = self.bpe.decode(tokens[..end].to_vec()) {
                return decoded;
            }
            end -= 1;
        }
    }
}

/// Word-based counter (fallback, ~1.3 tokens per word)
pub struct WordCounter {
    tokens_per_word: f64,
}

impl WordCounter {
    pub fn new(tokens_per_word: f64) -> Self {
        Self { tokens_per_word }
    }
}

impl Default for WordCounter {
    fn default() -> Self {
        Self::new(1.3)
    }
}

impl TokenCounter for WordCounter {
    fn count(&self, text: &str) -> usize {
        let word_count = text.split_whitespace().count();
        (word_count as f64 * self.tokens_per_word).ceil() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tiktoken_counter() {
        let counter = TiktokenCounter::new().unwrap();
        let tokens = counter.count("Hello, world! This is a test.");
        assert!(tokens > 0);
        assert!(tokens < 20);
    }

    #[test]
    fn test_word_counter() {
        let counter = WordCounter::default();
        assert_eq!(counter.count("Hello world test"), 4); // 3 * 1.3 = 3.9 -> 4
        assert_eq!(counter.count(""), 0);
    }

    #[test]
    fn test_tiktoken_truncate_respects_budget() {
        let counter = TiktokenCounter::new().unwrap();
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(20);
        let cut = counter.truncate(&text, 10);
        assert!(counter.count(&cut) <= 10);
        assert!(text.starts_with(&cut));
    }

    #[test]
    fn test_default_truncate_on_word_counter() {
        let counter = WordCounter::new(1.0);
        let cut = counter.truncate("one two three four five", 3);
        assert_eq!(counter.count(&cut), 3);
        assert!(cut.starts_with("one two three"));
    }

    #[test]
    fn test_truncate_to_zero() {
        let counter = WordCounter::new(1.0);
        assert_eq!(counter.truncate("alpha beta", 0), "");
    }
}
