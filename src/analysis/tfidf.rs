//! TF-IDF over a full document set
//!
//! Matches the common vectorizer defaults: lowercase word tokens of at least
//! two characters, raw term counts, smoothed idf `ln((1 + n) / (1 + df)) + 1`
//! and L2-normalised rows. The vocabulary is sorted, so columns are stable
//! for a given document set.

use std::collections::{BTreeMap, HashMap};

/// Lowercased runs of alphanumeric/underscore characters, two or more chars long
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| t.chars().count() >= 2)
        .map(|t| t.to_lowercase())
        .collect()
}

/// Dense TF-IDF matrix, one row per document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TfidfMatrix {
    pub vocabulary: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl TfidfMatrix {
    /// Fit over `documents` from scratch
    pub fn fit<S: AsRef<str>>(documents: &[S]) -> Self {
        let tokenized: Vec<Vec<String>> = documents.iter().map(|d| tokenize(d.as_ref())).collect();

        let mut document_frequency: BTreeMap<&str, usize> = BTreeMap::new();
        for tokens in &tokenized {
            let mut seen: Vec<&str> = tokens.iter().map(String::as_str).collect();
            seen.sort_unstable();
            seen.dedup();
            for term in seen {
                *document_frequency.entry(term).or_default() += 1;
            }
        }

        let vocabulary: Vec<String> = document_frequency.keys().map(|t| t.to_string()).collect();
        let column: HashMap<&str, usize> = document_frequency
            .keys()
            .enumerate()
            .map(|(i, t)| (*t, i))
            .collect();

        let n = documents.len() as f64;
        let idf: Vec<f64> = document_frequency
            .values()
            .map(|&df| ((1.0 + n) / (1.0 + df as f64)).ln() + 1.0)
            .collect();

        let rows = tokenized
            .iter()
            .map(|tokens| {
                let mut row = vec![0.0; vocabulary.len()];
                for token in tokens {
                    row[column[token.as_str()]] += 1.0;
                }
                for (value, weight) in row.iter_mut().zip(&idf) {
                    *value *= weight;
                }
                let norm = row.iter().map(|v| v * v).sum::<f64>().sqrt();
                if norm > 0.0 {
                    row.iter_mut().for_each(|v| *v /= norm);
                }
                row
            })
            .collect();

        Self { vocabulary, rows }
    }

    /// Mean of each row over the whole vocabulary; 0.0 when the vocabulary is empty
    pub fn row_means(&self) -> Vec<f64> {
        let width = self.vocabulary.len();
        self.rows
            .iter()
            .map(|row| {
                if width == 0 {
                    0.0
                } else {
                    row.iter().sum::<f64>() / width as f64
                }
            })
            .collect()
    }
}

/// Importance score per document: the mean of its TF-IDF row.
///
/// Fewer than two documents yield no scores.
pub fn importance_scores<S: AsRef<str>>(documents: &[S]) -> Vec<f64> {
    if documents.len() < 2 {
        return Vec::new();
    }
    TfidfMatrix::fit(documents).row_means()
}
