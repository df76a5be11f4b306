//! Text analysis used by the ranking and clustering strategies
//!
//! Both are pure functions recomputed over a session's full history; the
//! strategies never keep incremental model state.

pub mod kmeans;
pub mod tfidf;

pub use kmeans::{fit_predict, KMeansConfig};
pub use tfidf::{importance_scores, tokenize, TfidfMatrix};
