//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the ledger.
//!
//! # Metrics
//!
//! - `ledger_transactions_total` - Transactions recorded (mints included)
//! - `ledger_blocks_total` - Blocks persisted
//! - `ledger_pending_transactions` - Transactions awaiting a block
//! - `ledger_mining_duration_seconds` - Histogram of proof-of-work search time
//! - `ledger_verify_duration_seconds` - Histogram of full chain verification time

use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Total transactions recorded
    pub transactions_total: IntCounter,

    /// Total blocks persisted
    pub blocks_total: IntCounter,

    /// Current pending set size
    pub pending_transactions: IntGauge,

    /// Proof-of-work search duration
    pub mining_duration: Histogram,

    /// Chain verification duration
    pub verify_duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let transactions_total = IntCounter::new(
            "ledger_transactions_total",
            "Total number of transactions recorded",
        )?;
        registry.register(Box::new(transactions_total.clone()))?;

        let blocks_total = IntCounter::new("ledger_blocks_total", "Total number of mined blocks")?;
        registry.register(Box::new(blocks_total.clone()))?;

        let pending_transactions = IntGauge::new(
            "ledger_pending_transactions",
            "Transactions waiting to be mined",
        )?;
        registry.register(Box::new(pending_transactions.clone()))?;

        let mining_duration = Histogram::with_opts(
            HistogramOpts::new(
                "ledger_mining_duration_seconds",
                "Histogram of proof-of-work search time",
            )
            .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]),
        )?;
        registry.register(Box::new(mining_duration.clone()))?;

        let verify_duration = Histogram::with_opts(
            HistogramOpts::new(
                "ledger_verify_duration_seconds",
                "Histogram of full chain verification time",
            )
            .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0]),
        )?;
        registry.register(Box::new(verify_duration.clone()))?;

        Ok(Self {
            transactions_total,
            blocks_total,
            pending_transactions,
            mining_duration,
            verify_duration,
            registry,
        })
    }

    /// Record a new transaction (pending or reward)
    pub fn record_transaction(&self) {
        self.transactions_total.inc();
    }

    /// Record a persisted block
    pub fn record_block(&self, mining_seconds: f64) {
        self.blocks_total.inc();
        self.mining_duration.observe(mining_seconds);
    }

    /// Record a completed verification pass
    pub fn record_verification(&self, duration_seconds: f64) {
        self.verify_duration.observe(duration_seconds);
    }

    /// Update pending set size
    pub fn set_pending(&self, pending: u64) {
        self.pending_transactions.set(pending as i64);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("transactions_total", &self.transactions_total.get())
            .field("blocks_total", &self.blocks_total.get())
            .field("pending_transactions", &self.pending_transactions.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.transactions_total.get(), 0);
        assert_eq!(metrics.blocks_total.get(), 0);
    }

    #[test]
    fn test_independent_registries() {
        let first = Metrics::new().unwrap();
        let second = Metrics::new().unwrap();

        first.record_transaction();
        assert_eq!(first.transactions_total.get(), 1);
        assert_eq!(second.transactions_total.get(), 0);
    }

    #[test]
    fn test_record_block_and_pending() {
        let metrics = Metrics::new().unwrap();
        metrics.record_block(0.25);
        metrics.set_pending(3);

        assert_eq!(metrics.blocks_total.get(), 1);
        assert_eq!(metrics.mining_duration.get_sample_count(), 1);
        assert_eq!(metrics.pending_transactions.get(), 3);
    }

    #[test]
    fn test_registry_gathers_all() {
        let metrics = Metrics::new().unwrap();
        metrics.record_verification(0.01);

        let names: Vec<String> = metrics
            .registry()
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(names.contains(&"ledger_verify_duration_seconds".to_string()));
        assert!(names.contains(&"ledger_pending_transactions".to_string()));
        assert_eq!(names.len(), 5);
    }
}
