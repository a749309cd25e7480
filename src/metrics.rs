//! Metrics collection and export module

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::time::Instant;

/// Checkout metrics registry
pub struct Metrics {
    registry: Registry,

    // Counters
    pub checkout_requests: IntCounter,
    pub transactions_built: IntCounter,
    pub checkout_failures: IntCounterVec,
    pub discounts_applied: IntCounter,
    pub setup_transactions: IntCounter,

    // Settlement watcher
    pub settlement_polls: IntCounter,
    pub settlement_transient_errors: IntCounter,
    pub settlement_mismatches: IntCounter,
    pub settlements_confirmed: IntCounter,

    // Gauges
    pub active_watchers: IntGauge,

    // Histograms
    pub build_latency: Histogram,
}

impl Metrics {
    /// Create new metrics instance
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let checkout_requests = IntCounter::with_opts(Opts::new(
            "checkout_requests_total",
            "Checkout transaction requests received",
        ))?;

        let transactions_built = IntCounter::with_opts(Opts::new(
            "checkout_transactions_built_total",
            "Checkout transactions built and co-signed",
        ))?;

        let checkout_failures = IntCounterVec::new(
            Opts::new("checkout_failures_total", "Failed checkout builds by category"),
            &["category"],
        )?;

        let discounts_applied = IntCounter::with_opts(Opts::new(
            "checkout_discounts_total",
            "Checkouts that spent coupons for the discount",
        ))?;

        let setup_transactions = IntCounter::with_opts(Opts::new(
            "checkout_setup_transactions_total",
            "Shop-funded token account setup transactions submitted",
        ))?;

        let settlement_polls = IntCounter::with_opts(Opts::new(
            "settlement_polls_total",
            "Ledger polls issued by settlement watchers",
        ))?;

        let settlement_transient_errors = IntCounter::with_opts(Opts::new(
            "settlement_transient_errors_total",
            "Settlement polls that failed transiently",
        ))?;

        let settlement_mismatches = IntCounter::with_opts(Opts::new(
            "settlement_mismatches_total",
            "Settled transactions rejected by validation",
        ))?;

        let settlements_confirmed = IntCounter::with_opts(Opts::new(
            "settlements_confirmed_total",
            "Payments confirmed on the ledger",
        ))?;

        let active_watchers = IntGauge::with_opts(Opts::new(
            "settlement_active_watchers",
            "Settlement watchers currently polling",
        ))?;

        let build_latency = Histogram::with_opts(
            HistogramOpts::new("checkout_build_latency_seconds", "Checkout transaction build latency")
                .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        )?;

        // Register all metrics
        registry.register(Box::new(checkout_requests.clone()))?;
        registry.register(Box::new(transactions_built.clone()))?;
        registry.register(Box::new(checkout_failures.clone()))?;
        registry.register(Box::new(discounts_applied.clone()))?;
        registry.register(Box::new(setup_transactions.clone()))?;
        registry.register(Box::new(settlement_polls.clone()))?;
        registry.register(Box::new(settlement_transient_errors.clone()))?;
        registry.register(Box::new(settlement_mismatches.clone()))?;
        registry.register(Box::new(settlements_confirmed.clone()))?;
        registry.register(Box::new(active_watchers.clone()))?;
        registry.register(Box::new(build_latency.clone()))?;

        Ok(Self {
            registry,
            checkout_requests,
            transactions_built,
            checkout_failures,
            discounts_applied,
            setup_transactions,
            settlement_polls,
            settlement_transient_errors,
            settlement_mismatches,
            settlements_confirmed,
            active_watchers,
            build_latency,
        })
    }

    /// Get the registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_failure(&self, category: &str) {
        self.checkout_failures.with_label_values(&[category]).inc();
    }

    /// Prometheus text exposition of every registered metric
    pub fn render(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Global metrics instance
pub fn metrics() -> &'static Metrics {
    static METRICS: once_cell::sync::Lazy<Metrics> =
        once_cell::sync::Lazy::new(|| Metrics::new().expect("Failed to initialize metrics"));
    &METRICS
}

/// Timer helper for measuring operation duration
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn observe_duration(&self, histogram: &Histogram) {
        histogram.observe(self.elapsed_secs());
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
