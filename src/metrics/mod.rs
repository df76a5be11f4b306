//! Metrics collection for observability

use prometheus::{
    register_counter_vec_with_registry, register_histogram_vec_with_registry, CounterVec,
    HistogramOpts, HistogramVec, Opts, Registry,
};
use once_cell::sync::Lazy;
use std::sync::Arc;

/// Global metrics registry
pub static METRICS: Lazy<Arc<Metrics>> =
    Lazy::new(|| Arc::new(Metrics::new().expect("Failed to initialize metrics")));

/// Metrics collector
pub struct Metrics {
    registry: Registry,

    // Strategy operations
    pub messages_added: CounterVec,
    pub context_requests: CounterVec,
    pub operation_duration: HistogramVec,

    // Compression
    pub summarizations: CounterVec,
    pub reclusterings: CounterVec,

    // Token budget
    pub context_tokens: HistogramVec,
    pub budget_evictions: CounterVec,
    pub hard_truncations: CounterVec,

    // Service
    pub chat_requests: CounterVec,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let messages_added = register_counter_vec_with_registry!(
            Opts::new("context_messages_added_total", "Messages added per strategy"),
            &["strategy", "status"],
            registry
        )?;

        let context_requests = register_counter_vec_with_registry!(
            Opts::new("context_requests_total", "Context renderings per strategy"),
            &["strategy", "status"],
            registry
        )?;

        let operation_duration = register_histogram_vec_with_registry!(
            "context_operation_duration_seconds",
            "Strategy operation duration in seconds",
            &["strategy", "operation"],
            registry
        )?;

        let summarizations = register_counter_vec_with_registry!(
            Opts::new("context_summarizations_total", "Summaries produced"),
            &["strategy"],
            registry
        )?;

        let reclusterings = register_counter_vec_with_registry!(
            Opts::new("context_reclusterings_total", "Topic model refits"),
            &["strategy"],
            registry
        )?;

        let context_tokens = register_histogram_vec_with_registry!(
            HistogramOpts::new("context_rendered_tokens", "Tokens in rendered context")
                .buckets(vec![64.0, 128.0, 256.0, 512.0, 1024.0, 2048.0, 4096.0, 8192.0]),
            &["strategy"],
            registry
        )?;

        let budget_evictions = register_counter_vec_with_registry!(
            Opts::new("context_budget_evictions_total", "Items dropped to fit the token budget"),
            &["strategy", "kind"],
            registry
        )?;

        let hard_truncations = register_counter_vec_with_registry!(
            Opts::new("context_hard_truncations_total", "Contexts cut to the truncation target"),
            &["strategy"],
            registry
        )?;

        let chat_requests = register_counter_vec_with_registry!(
            Opts::new("chat_requests_total", "Chat turns handled"),
            &["status"],
            registry
        )?;

        Ok(Self {
            registry,
            messages_added,
            context_requests,
            operation_duration,
            summarizations,
            reclusterings,
            context_tokens,
            budget_evictions,
            hard_truncations,
            chat_requests,
        })
    }

    /// Get the metrics registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record an add-message outcome
    pub fn record_add(&self, strategy: &str, success: bool) {
        let status = if success { "success" } else { "error" };
        self.messages_added.with_label_values(&[strategy, status]).inc();
    }

    /// Record a context rendering outcome
    pub fn record_context(&self, strategy: &str, success: bool) {
        let status = if success { "success" } else { "error" };
        self.context_requests.with_label_values(&[strategy, status]).inc();
    }

    pub fn record_summarization(&self, strategy: &str) {
        self.summarizations.with_label_values(&[strategy]).inc();
    }

    pub fn record_reclustering(&self, strategy: &str) {
        self.reclusterings.with_label_values(&[strategy]).inc();
    }

    pub fn record_context_tokens(&self, strategy: &str, tokens: usize) {
        self.context_tokens
            .with_label_values(&[strategy])
            .observe(tokens as f64);
    }

    /// Record items evicted under budget pressure; `kind` names what was dropped
    pub fn record_evictions(&self, strategy: &str, kind: &str, count: usize) {
        if count > 0 {
            self.budget_evictions
                .with_label_values(&[strategy, kind])
                .inc_by(count as f64);
        }
    }

    pub fn record_hard_truncation(&self, strategy: &str) {
        self.hard_truncations.with_label_values(&[strategy]).inc();
    }

    pub fn record_chat(&self, success: bool) {
        let status = if success { "success" } else { "error" };
        self.chat_requests.with_label_values(&[status]).inc();
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap_or_default();

        String::from_utf8(buffer).unwrap_or_default()
    }
}

/// Helper macro to time operations
#[macro_export]
macro_rules! time_operation {
    ($histogram:expr, $labels:expr, $operation:expr) => {{
        let timer = $histogram.with_label_values($labels).start_timer();
        let result = $operation;
        timer.observe_duration();
        result
    }};
}
