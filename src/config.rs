//! Service configuration
//!
//! Sources, later ones winning:
//! 1. `config/default.toml` (or the file named by `CONTEXT_CONFIG`), optional
//! 2. environment variables prefixed `CONTEXT`, nested with `__`,
//!    e.g. `CONTEXT__STRATEGIES__ACTIVE=topic_cluster`

use crate::chat::{LlmResponder, Responder, ResponderConfig};
use crate::context::{
    ConcatenationSummarizer, LlmSummarizer, Summarizer, SummarizerConfig, TiktokenCounter,
    TokenBudgetConfig, TokenCounter, WordCounter,
};
use crate::embedding::{
    CachedEmbeddingProvider, EmbeddingProvider, HashingEmbedder, HttpEmbeddingConfig,
    HttpEmbeddingProvider,
};
use crate::error::{ContextError, Result};
use crate::index::{FlatIndex, QdrantIndex, QdrantIndexConfig, SimilarityIndex};
use crate::manager::{ContextManager, StrategySet};
use crate::store::{InMemoryMessageLog, InMemorySessionStore};
use crate::strategy::{
    BatchedSummary, BatchedSummaryConfig, HierarchicalConfig, HierarchicalSummary, KeywordConfig,
    KeywordImportance, SlidingWindow, StrategyKind, TopicCluster, TopicClusterConfig,
    VectorRecall, VectorRecallConfig,
};
use ::config::{Environment, File, FileFormat};
use qdrant_client::client::QdrantClient;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub const CONFIG_PATH_ENV: &str = "CONTEXT_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/default";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub strategies: StrategiesConfig,
    #[serde(default)]
    pub summarizer: SummarizerSettings,
    #[serde(default)]
    pub responder: ResponderSettings,
    #[serde(default)]
    pub embedding: EmbeddingSettings,
    #[serde(default)]
    pub vector_db: VectorDbSettings,
    #[serde(default)]
    pub tokenizer: TokenizerSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive; `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StrategiesConfig {
    /// Default strategy name
    #[serde(default = "default_active_strategy")]
    pub active: String,
    #[serde(default)]
    pub sliding_window: SlidingWindowSettings,
    #[serde(default)]
    pub batched_summary: BatchedSummarySettings,
    #[serde(default)]
    pub hierarchical_summary: HierarchicalSettings,
    #[serde(default)]
    pub keyword_importance: KeywordSettings,
    #[serde(default)]
    pub topic_cluster: TopicClusterSettings,
    #[serde(default)]
    pub vector_recall: VectorRecallSettings,
}

fn default_active_strategy() -> String {
    StrategyKind::BatchedSummary.as_str().to_string()
}

impl Default for StrategiesConfig {
    fn default() -> Self {
        Self {
            active: default_active_strategy(),
            sliding_window: SlidingWindowSettings::default(),
            batched_summary: BatchedSummarySettings::default(),
            hierarchical_summary: HierarchicalSettings::default(),
            keyword_importance: KeywordSettings::default(),
            topic_cluster: TopicClusterSettings::default(),
            vector_recall: VectorRecallSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlidingWindowSettings {
    #[serde(default = "default_window_size")]
    pub window_size: usize,
}

fn default_window_size() -> usize {
    crate::strategy::sliding_window::DEFAULT_WINDOW_SIZE
}

impl Default for SlidingWindowSettings {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchedSummarySettings {
    #[serde(default = "default_batch_threshold")]
    pub threshold: usize,
    /// Enables budget enforcement; absent disables it
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: Option<usize>,
    #[serde(default = "default_hard_truncate_ratio")]
    pub hard_truncate_ratio: f64,
    #[serde(default = "default_rehydrate_limit")]
    pub rehydrate_limit: usize,
}

fn default_batch_threshold() -> usize {
    crate::strategy::batched_summary::DEFAULT_BATCH_THRESHOLD
}

fn default_max_context_tokens() -> Option<usize> {
    Some(2000)
}

fn default_hard_truncate_ratio() -> f64 {
    0.9
}

fn default_rehydrate_limit() -> usize {
    crate::strategy::batched_summary::DEFAULT_REHYDRATE_LIMIT
}

impl Default for BatchedSummarySettings {
    fn default() -> Self {
        Self {
            threshold: default_batch_threshold(),
            max_context_tokens: default_max_context_tokens(),
            hard_truncate_ratio: default_hard_truncate_ratio(),
            rehydrate_limit: default_rehydrate_limit(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HierarchicalSettings {
    #[serde(default = "default_fanout")]
    pub fanout: usize,
    #[serde(default = "default_hierarchy_recent")]
    pub recent_messages: usize,
}

fn default_fanout() -> usize {
    crate::strategy::hierarchical::DEFAULT_FANOUT
}

fn default_hierarchy_recent() -> usize {
    crate::strategy::hierarchical::DEFAULT_RECENT_MESSAGES
}

impl Default for HierarchicalSettings {
    fn default() -> Self {
        Self {
            fanout: default_fanout(),
            recent_messages: default_hierarchy_recent(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeywordSettings {
    #[serde(default = "default_top_n")]
    pub top_n: usize,
}

fn default_top_n() -> usize {
    crate::strategy::keyword::DEFAULT_TOP_N
}

impl Default for KeywordSettings {
    fn default() -> Self {
        Self {
            top_n: default_top_n(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TopicClusterSettings {
    #[serde(default = "default_max_clusters")]
    pub max_clusters: usize,
    #[serde(default = "default_topic_recent")]
    pub recent_messages: usize,
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: Option<usize>,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_max_clusters() -> usize {
    crate::strategy::topic_cluster::DEFAULT_MAX_CLUSTERS
}

fn default_topic_recent() -> usize {
    crate::strategy::topic_cluster::DEFAULT_RECENT_MESSAGES
}

fn default_seed() -> u64 {
    42
}

impl Default for TopicClusterSettings {
    fn default() -> Self {
        Self {
            max_clusters: default_max_clusters(),
            recent_messages: default_topic_recent(),
            max_context_tokens: default_max_context_tokens(),
            seed: default_seed(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VectorRecallSettings {
    #[serde(default = "default_short_term_messages")]
    pub short_term_max_messages: usize,
    #[serde(default = "default_short_term_tokens")]
    pub short_term_max_tokens: usize,
    #[serde(default = "default_neighbors")]
    pub neighbors: usize,
    #[serde(default = "default_recall_limit")]
    pub recall_limit: usize,
}

fn default_short_term_messages() -> usize {
    4
}

fn default_short_term_tokens() -> usize {
    800
}

fn default_neighbors() -> usize {
    5
}

fn default_recall_limit() -> usize {
    2
}

impl Default for VectorRecallSettings {
    fn default() -> Self {
        Self {
            short_term_max_messages: default_short_term_messages(),
            short_term_max_tokens: default_short_term_tokens(),
            neighbors: default_neighbors(),
            recall_limit: default_recall_limit(),
        }
    }
}

/// Summarization model; without an endpoint texts are concatenated
#[derive(Debug, Clone, Deserialize)]
pub struct SummarizerSettings {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub api_key: Option<SecretString>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_max_words")]
    pub max_words: usize,
}

fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> usize {
    3
}

fn default_max_words() -> usize {
    250
}

impl Default for SummarizerSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            model: default_model(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            max_words: default_max_words(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponderSettings {
    #[serde(default = "default_responder_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<SecretString>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_responder_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_responder_retries")]
    pub max_retries: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: Option<usize>,
}

fn default_responder_endpoint() -> String {
    "http://localhost:8080/v1/chat/completions".to_string()
}

fn default_responder_timeout() -> u64 {
    60
}

fn default_responder_retries() -> usize {
    2
}

fn default_temperature() -> f32 {
    0.7
}

impl Default for ResponderSettings {
    fn default() -> Self {
        Self {
            endpoint: default_responder_endpoint(),
            api_key: None,
            model: default_model(),
            timeout_secs: default_responder_timeout(),
            max_retries: default_responder_retries(),
            temperature: default_temperature(),
            max_tokens: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    Hashing,
    Http,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingSettings {
    #[serde(default = "default_embedding_backend")]
    pub backend: EmbeddingBackend,
    #[serde(default = "default_embedding_url")]
    pub api_url: String,
    #[serde(default)]
    pub api_token: Option<SecretString>,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
    /// Cached embeddings; 0 disables the cache
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,
}

fn default_embedding_backend() -> EmbeddingBackend {
    EmbeddingBackend::Hashing
}

fn default_embedding_url() -> String {
    "http://localhost:8080/v1/embeddings".to_string()
}

fn default_embedding_model() -> String {
    "sentence-transformers/all-MiniLM-L6-v2".to_string()
}

fn default_dimension() -> usize {
    crate::embedding::hashing::DEFAULT_DIMENSION
}

fn default_embedding_timeout() -> u64 {
    10
}

fn default_cache_capacity() -> u64 {
    10_000
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            backend: default_embedding_backend(),
            api_url: default_embedding_url(),
            api_token: None,
            model: default_embedding_model(),
            dimension: default_dimension(),
            timeout_secs: default_embedding_timeout(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    Memory,
    Qdrant,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VectorDbSettings {
    #[serde(default = "default_index_backend")]
    pub backend: IndexBackend,
    #[serde(default = "default_qdrant_url")]
    pub url: String,
    #[serde(default)]
    pub api_key: Option<SecretString>,
    #[serde(default = "default_collection_name")]
    pub collection_name: String,
}

fn default_index_backend() -> IndexBackend {
    IndexBackend::Memory
}

fn default_qdrant_url() -> String {
    "http://localhost:6334".to_string()
}

fn default_collection_name() -> String {
    "chat_memory".to_string()
}

impl Default for VectorDbSettings {
    fn default() -> Self {
        Self {
            backend: default_index_backend(),
            url: default_qdrant_url(),
            api_key: None,
            collection_name: default_collection_name(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenizerKind {
    Tiktoken,
    Words,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenizerSettings {
    #[serde(default = "default_tokenizer_kind")]
    pub kind: TokenizerKind,
    #[serde(default = "default_tokens_per_word")]
    pub tokens_per_word: f64,
}

fn default_tokenizer_kind() -> TokenizerKind {
    TokenizerKind::Tiktoken
}

fn default_tokens_per_word() -> f64 {
    1.3
}

impl Default for TokenizerSettings {
    fn default() -> Self {
        Self {
            kind: default_tokenizer_kind(),
            tokens_per_word: default_tokens_per_word(),
        }
    }
}

impl Config {
    /// Load from the config file (if present) and the environment
    pub fn load() -> Result<Self> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let config: Config = ::config::Config::builder()
            .add_source(File::with_name(&path).required(false))
            .add_source(Environment::with_prefix("CONTEXT").separator("__"))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document; missing keys take their defaults
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config: Config = ::config::Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let s = &self.strategies;
        let positive = [
            ("strategies.sliding_window.window_size", s.sliding_window.window_size),
            ("strategies.batched_summary.threshold", s.batched_summary.threshold),
            ("strategies.keyword_importance.top_n", s.keyword_importance.top_n),
            ("strategies.topic_cluster.max_clusters", s.topic_cluster.max_clusters),
            ("strategies.vector_recall.short_term_max_messages", s.vector_recall.short_term_max_messages),
            ("strategies.vector_recall.neighbors", s.vector_recall.neighbors),
            ("embedding.dimension", self.embedding.dimension),
            ("server.max_body_bytes", self.server.max_body_bytes),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ContextError::Configuration(format!("{} must be positive", name)));
            }
        }
        if s.hierarchical_summary.fanout < 2 {
            return Err(ContextError::Configuration(
                "strategies.hierarchical_summary.fanout must be at least 2".to_string(),
            ));
        }
        if let Some(budget) = self.batch_budget() {
            budget
                .validate()
                .map_err(|e| ContextError::Configuration(e.to_string()))?;
        }
        if s.active.parse::<StrategyKind>().is_err() {
            return Err(ContextError::Configuration(format!(
                "unknown default strategy: {}",
                s.active
            )));
        }
        Ok(())
    }

    pub fn active_strategy(&self) -> StrategyKind {
        self.strategies
            .active
            .parse()
            .unwrap_or(StrategyKind::BatchedSummary)
    }

    fn batch_budget(&self) -> Option<TokenBudgetConfig> {
        let b = &self.strategies.batched_summary;
        b.max_context_tokens.map(|max| TokenBudgetConfig {
            max_context_tokens: max,
            hard_truncate_ratio: b.hard_truncate_ratio,
        })
    }

    pub fn build_token_counter(&self) -> Result<Arc<dyn TokenCounter>> {
        Ok(match self.tokenizer.kind {
            TokenizerKind::Tiktoken => Arc::new(TiktokenCounter::new()?),
            TokenizerKind::Words => Arc::new(WordCounter::new(self.tokenizer.tokens_per_word)),
        })
    }

    pub fn build_summarizer(&self) -> Result<Arc<dyn Summarizer>> {
        let s = &self.summarizer;
        let Some(endpoint) = &s.endpoint else {
            info!("No summarizer endpoint configured, concatenating batches");
            return Ok(Arc::new(ConcatenationSummarizer));
        };
        Ok(Arc::new(LlmSummarizer::new(SummarizerConfig {
            endpoint: endpoint.clone(),
            api_key: s.api_key.clone(),
            model: s.model.clone(),
            timeout: Duration::from_secs(s.timeout_secs),
            max_retries: s.max_retries,
            max_words: s.max_words,
            ..Default::default()
        })?))
    }

    pub fn build_responder(&self) -> Result<Arc<dyn Responder>> {
        let r = &self.responder;
        Ok(Arc::new(LlmResponder::new(ResponderConfig {
            endpoint: r.endpoint.clone(),
            api_key: r.api_key.clone(),
            model: r.model.clone(),
            timeout: Duration::from_secs(r.timeout_secs),
            max_retries: r.max_retries,
            temperature: r.temperature,
            max_tokens: r.max_tokens,
        })?))
    }

    pub fn build_embedder(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        let e = &self.embedding;
        let provider: Arc<dyn EmbeddingProvider> = match e.backend {
            EmbeddingBackend::Hashing => Arc::new(HashingEmbedder::new(e.dimension)),
            EmbeddingBackend::Http => Arc::new(HttpEmbeddingProvider::new(HttpEmbeddingConfig {
                api_url: e.api_url.clone(),
                api_token: e.api_token.clone(),
                model: e.model.clone(),
                dimension: e.dimension,
                timeout: Duration::from_secs(e.timeout_secs),
            })?),
        };
        if e.cache_capacity == 0 {
            return Ok(provider);
        }
        Ok(Arc::new(CachedEmbeddingProvider::new(provider, e.cache_capacity)))
    }

    pub async fn build_index(&self) -> Result<Arc<dyn SimilarityIndex>> {
        let v = &self.vector_db;
        match v.backend {
            IndexBackend::Memory => Ok(Arc::new(FlatIndex::with_dimension(self.embedding.dimension))),
            IndexBackend::Qdrant => {
                let mut builder = QdrantClient::from_url(&v.url);
                if let Some(key) = &v.api_key {
                    builder = builder.with_api_key(key.expose_secret().as_str());
                }
                let client = builder
                    .build()
                    .map_err(|e| ContextError::Index(format!("Failed to connect to Qdrant: {}", e)))?;
                let index = QdrantIndex::new(
                    client,
                    QdrantIndexConfig {
                        collection_name: v.collection_name.clone(),
                        vector_size: self.embedding.dimension,
                    },
                )
                .await?;
                Ok(Arc::new(index))
            }
        }
    }

    /// Build every strategy over the configured collaborators
    pub async fn build_manager(&self) -> Result<ContextManager> {
        let counter = self.build_token_counter()?;
        let summarizer = self.build_summarizer()?;
        let embedder = self.build_embedder()?;
        let index = self.build_index().await?;
        let s = &self.strategies;

        let strategies = StrategySet {
            sliding_window: Arc::new(SlidingWindow::new(s.sliding_window.window_size)),
            batched_summary: Arc::new(BatchedSummary::new(
                BatchedSummaryConfig {
                    threshold: s.batched_summary.threshold,
                    token_budget: self.batch_budget(),
                },
                Arc::new(InMemorySessionStore::new()),
                Arc::new(InMemoryMessageLog::new()),
                summarizer.clone(),
                counter.clone(),
            )?),
            hierarchical_summary: Arc::new(HierarchicalSummary::new(
                HierarchicalConfig {
                    fanout: s.hierarchical_summary.fanout,
                    recent_messages: s.hierarchical_summary.recent_messages,
                    ..Default::default()
                },
                summarizer.clone(),
            )?),
            keyword_importance: Arc::new(KeywordImportance::new(KeywordConfig {
                top_n: s.keyword_importance.top_n,
            })),
            topic_cluster: Arc::new(TopicCluster::new(
                TopicClusterConfig {
                    max_clusters: s.topic_cluster.max_clusters,
                    recent_messages: s.topic_cluster.recent_messages,
                    max_context_tokens: s.topic_cluster.max_context_tokens,
                    seed: s.topic_cluster.seed,
                },
                summarizer,
                counter.clone(),
            )?),
            vector_recall: Arc::new(VectorRecall::new(
                VectorRecallConfig {
                    short_term_max_messages: s.vector_recall.short_term_max_messages,
                    short_term_max_tokens: s.vector_recall.short_term_max_tokens,
                    neighbors: s.vector_recall.neighbors,
                    recall_limit: s.vector_recall.recall_limit,
                },
                embedder,
                index,
                counter,
            )?),
        };

        Ok(ContextManager::new(strategies, self.active_strategy()))
    }
}
