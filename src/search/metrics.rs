//! Prometheus metrics for the search module

use lazy_static::lazy_static;
use prometheus::{register_counter_vec, register_histogram_vec, CounterVec, HistogramVec};

/// Search metrics collection
pub struct SearchMetrics {
    /// Documents written, by index and mode
    pub documents_indexed: CounterVec,

    /// Documents rejected during batch indexing
    pub documents_rejected: CounterVec,

    /// Documents deleted by id
    pub documents_deleted: CounterVec,

    /// Writer commits
    pub commits_total: CounterVec,

    /// Index rebuilds
    pub rebuilds_total: CounterVec,

    /// Change collector flushes, by outcome
    pub flushes_total: CounterVec,

    /// Searches executed
    pub searches_total: CounterVec,

    /// Search latency in seconds
    pub search_duration: HistogramVec,
}

impl SearchMetrics {
    /// Registers with the default registry, so only `SEARCH_METRICS` calls it
    fn new() -> Self {
        Self {
            documents_indexed: register_counter_vec!(
                "entity_search_documents_indexed_total",
                "Total number of documents written to an index",
                &["index", "mode"]
            )
            .unwrap(),

            documents_rejected: register_counter_vec!(
                "entity_search_documents_rejected_total",
                "Total number of documents rejected during indexing",
                &["index"]
            )
            .unwrap(),

            documents_deleted: register_counter_vec!(
                "entity_search_documents_deleted_total",
                "Total number of documents deleted by id",
                &["index"]
            )
            .unwrap(),

            commits_total: register_counter_vec!(
                "entity_search_commits_total",
                "Total number of index writer commits",
                &["index"]
            )
            .unwrap(),

            rebuilds_total: register_counter_vec!(
                "entity_search_rebuilds_total",
                "Total number of index rebuilds",
                &["index"]
            )
            .unwrap(),

            flushes_total: register_counter_vec!(
                "entity_search_flushes_total",
                "Total number of change collector flushes",
                &["outcome"]
            )
            .unwrap(),

            searches_total: register_counter_vec!(
                "entity_search_searches_total",
                "Total number of searches executed",
                &["index"]
            )
            .unwrap(),

            search_duration: register_histogram_vec!(
                "entity_search_search_duration_seconds",
                "Search execution duration in seconds",
                &["index"],
                vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
            )
            .unwrap(),
        }
    }

    pub fn record_indexed(&self, index: &str, mode: &str, count: usize) {
        self.documents_indexed
            .with_label_values(&[index, mode])
            .inc_by(count as f64);
    }

    pub fn record_rejected(&self, index: &str, count: usize) {
        self.documents_rejected
            .with_label_values(&[index])
            .inc_by(count as f64);
    }

    pub fn record_deleted(&self, index: &str, count: usize) {
        self.documents_deleted
            .with_label_values(&[index])
            .inc_by(count as f64);
    }

    pub fn record_commit(&self, index: &str) {
        self.commits_total.with_label_values(&[index]).inc();
    }

    pub fn record_rebuild(&self, index: &str) {
        self.rebuilds_total.with_label_values(&[index]).inc();
    }

    pub fn record_flush(&self, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.flushes_total.with_label_values(&[outcome]).inc();
    }

    pub fn record_search(&self, index: &str, duration_secs: f64) {
        self.searches_total.with_label_values(&[index]).inc();
        self.search_duration
            .with_label_values(&[index])
            .observe(duration_secs);
    }
}

lazy_static! {
    /// Global search metrics instance
    pub static ref SEARCH_METRICS: SearchMetrics = SearchMetrics::new();
}

/// Force registration of the search metrics
pub fn init_search_metrics() {
    lazy_static::initialize(&SEARCH_METRICS);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_registers_once() {
        init_search_metrics();
        init_search_metrics();
        SEARCH_METRICS.record_commit("metrics_test");

        let families = prometheus::gather();
        let commits = families
            .iter()
            .filter(|f| f.get_name() == "entity_search_commits_total")
            .count();
        assert_eq!(commits, 1);
    }
}
