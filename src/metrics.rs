//! Prometheus metrics for the relay
//!
//! Counters are labelled by relay direction (`lock`/`unlock`); gauges by chain
//! side (`a`/`b`). All values are observational.

use prometheus::{GaugeVec, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry};

/// Prometheus metrics
pub struct Metrics {
    /// Events relayed with a confirmed destination transaction
    pub relayed_total: IntCounterVec,
    /// Destination "already processed" rejections treated as success
    pub benign_rejections_total: IntCounterVec,
    /// Per-event failures, by direction and error kind
    pub errors_total: IntCounterVec,
    /// Failures that crossed the repeated-failure alert threshold
    pub repeated_failures_total: IntCounter,
    /// Lock events dropped for targeting another chain
    pub dropped_events_total: IntCounterVec,
    /// Poll ticks that aborted without advancing the watermark
    pub tick_failures_total: IntCounterVec,
    pub checkpoint_save_failures_total: IntCounter,
    pub watermark: IntGaugeVec,
    pub chain_height: IntGaugeVec,
    pub lag_blocks: IntGaugeVec,
    /// Relayer native balance in wei (f64, may lose precision for huge values)
    pub balance_wei: GaugeVec,
    pub registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let relayed_total = IntCounterVec::new(
            Opts::new("relayer_events_relayed_total", "Events relayed to the destination chain"),
            &["direction"],
        )
        .expect("constant metric name is valid");

        let benign_rejections_total = IntCounterVec::new(
            Opts::new(
                "relayer_benign_rejections_total",
                "Destination rejections indicating the event was already processed",
            ),
            &["direction"],
        )
        .expect("constant metric name is valid");

        let errors_total = IntCounterVec::new(
            Opts::new("relayer_errors_total", "Per-event processing failures"),
            &["direction", "kind"],
        )
        .expect("constant metric name is valid");

        let repeated_failures_total = IntCounter::new(
            "relayer_repeated_failures_total",
            "Event failures at or above the alert threshold",
        )
        .expect("constant metric name is valid");

        let dropped_events_total = IntCounterVec::new(
            Opts::new(
                "relayer_dropped_events_total",
                "Events dropped because they target a different relay pair",
            ),
            &["direction"],
        )
        .expect("constant metric name is valid");

        let tick_failures_total = IntCounterVec::new(
            Opts::new("relayer_tick_failures_total", "Poll ticks aborted by an error"),
            &["chain"],
        )
        .expect("constant metric name is valid");

        let checkpoint_save_failures_total = IntCounter::new(
            "relayer_checkpoint_save_failures_total",
            "Failed checkpoint writes",
        )
        .expect("constant metric name is valid");

        let watermark = IntGaugeVec::new(
            Opts::new("relayer_watermark_block", "Last fully processed block"),
            &["chain"],
        )
        .expect("constant metric name is valid");

        let chain_height = IntGaugeVec::new(
            Opts::new("relayer_chain_height", "Last observed chain height"),
            &["chain"],
        )
        .expect("constant metric name is valid");

        let lag_blocks = IntGaugeVec::new(
            Opts::new("relayer_lag_blocks", "Chain height minus watermark"),
            &["chain"],
        )
        .expect("constant metric name is valid");

        let balance_wei = GaugeVec::new(
            Opts::new("relayer_balance_wei", "Relayer native balance"),
            &["chain"],
        )
        .expect("constant metric name is valid");

        // Names are unique constants and registration happens once per instance
        registry
            .register(Box::new(relayed_total.clone()))
            .expect("metric registration must not be called twice");
        registry
            .register(Box::new(benign_rejections_total.clone()))
            .expect("metric registration must not be called twice");
        registry
            .register(Box::new(errors_total.clone()))
            .expect("metric registration must not be called twice");
        registry
            .register(Box::new(repeated_failures_total.clone()))
            .expect("metric registration must not be called twice");
        registry
            .register(Box::new(dropped_events_total.clone()))
            .expect("metric registration must not be called twice");
        registry
            .register(Box::new(tick_failures_total.clone()))
            .expect("metric registration must not be called twice");
        registry
            .register(Box::new(checkpoint_save_failures_total.clone()))
            .expect("metric registration must not be called twice");
        registry
            .register(Box::new(watermark.clone()))
            .expect("metric registration must not be called twice");
        registry
            .register(Box::new(chain_height.clone()))
            .expect("metric registration must not be called twice");
        registry
            .register(Box::new(lag_blocks.clone()))
            .expect("metric registration must not be called twice");
        registry
            .register(Box::new(balance_wei.clone()))
            .expect("metric registration must not be called twice");

        Self {
            relayed_total,
            benign_rejections_total,
            errors_total,
            repeated_failures_total,
            dropped_events_total,
            tick_failures_total,
            checkpoint_save_failures_total,
            watermark,
            chain_height,
            lag_blocks,
            balance_wei,
            registry,
        }
    }
}
