/// Metrics Module - Prometheus Instrumentation
///
/// Process-wide counters/gauges/histograms for the chain indexer, registered
/// once with a single global registry and labelled by chain where relevant.

use prometheus::{
    Registry, IntCounterVec, IntGaugeVec, HistogramVec, HistogramOpts, Opts, Encoder, TextEncoder,
};
use lazy_static::lazy_static;
use std::time::Instant;

/// Standard latency buckets for histograms (seconds)
const LATENCY_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0];

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // ========================================================================
    // Tick / ingestion progress
    // ========================================================================

    /// Total ticks executed by the indexer loop, labelled by chain
    pub static ref TICKS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("indexer_ticks_total", "Total indexer loop ticks"),
        &["chain"]
    ).unwrap();

    /// Total decode failures, labelled by chain
    pub static ref DECODE_ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("indexer_decode_errors_total", "Total log decode failures"),
        &["chain"]
    ).unwrap();

    /// Total reorgs handled, labelled by chain
    pub static ref REORGS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("indexer_reorgs_total", "Total reorg rollbacks performed"),
        &["chain"]
    ).unwrap();

    /// Total consecutive-failure streaks where the log source was unavailable
    pub static ref SOURCE_FAILURES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("indexer_source_failures_total", "Total log source call failures"),
        &["chain"]
    ).unwrap();

    // ========================================================================
    // Gauges
    // ========================================================================

    /// Current persisted watermark height, labelled by chain
    pub static ref WATERMARK_HEIGHT: IntGaugeVec = IntGaugeVec::new(
        Opts::new("indexer_watermark_height", "Last processed block height"),
        &["chain"]
    ).unwrap();

    // ========================================================================
    // Latency histograms
    // ========================================================================

    /// Wall-clock duration of a single chunk's fetch+reconcile+persist cycle
    pub static ref CHUNK_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new("indexer_chunk_duration_seconds", "Chunk processing latency")
            .buckets(LATENCY_BUCKETS.to_vec()),
        &["chain"]
    ).unwrap();
}

/// Registers all metrics with the global registry. Call once at startup.
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    REGISTRY.register(Box::new(TICKS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DECODE_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REORGS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SOURCE_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(WATERMARK_HEIGHT.clone()))?;
    REGISTRY.register(Box::new(CHUNK_DURATION.clone()))?;
    Ok(())
}

/// Gather metrics in Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

// ============================================================================
// HELPER FUNCTIONS - clean API for instrumenting the indexer loop
// ============================================================================

/// Timer for measuring chunk durations
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self { start: Instant::now() }
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

pub fn record_tick(chain: &str) {
    TICKS_TOTAL.with_label_values(&[chain]).inc();
}

pub fn record_decode_error(chain: &str) {
    DECODE_ERRORS_TOTAL.with_label_values(&[chain]).inc();
}

pub fn record_reorg(chain: &str) {
    REORGS_TOTAL.with_label_values(&[chain]).inc();
}

pub fn record_source_failure(chain: &str) {
    SOURCE_FAILURES_TOTAL.with_label_values(&[chain]).inc();
}

pub fn set_watermark_height(chain: &str, height: u64) {
    WATERMARK_HEIGHT.with_label_values(&[chain]).set(height as i64);
}

pub fn record_chunk_duration(chain: &str, timer: &Timer) {
    CHUNK_DURATION.with_label_values(&[chain]).observe(timer.elapsed_secs());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_elapsed_nonnegative() {
        let t = Timer::new();
        assert!(t.elapsed_secs() >= 0.0);
    }

    #[test]
    fn test_record_helpers_do_not_panic() {
        record_tick("ethereum");
        record_decode_error("ethereum");
        record_reorg("ethereum");
        record_source_failure("ethereum");
        set_watermark_height("ethereum", 100);
        let timer = Timer::new();
        record_chunk_duration("ethereum", &timer);
    }

    #[test]
    fn test_gather_metrics_contains_registered_names() {
        // init_metrics is idempotent-unsafe across tests run in the same
        // process (double registration errors), so only call it once here
        // guarded by a static Once.
        use std::sync::Once;
        static INIT: Once = Once::new();
        INIT.call_once(|| {
            init_metrics().unwrap();
        });
        record_tick("base");
        let text = gather_metrics();
        assert!(text.contains("indexer_ticks_total"));
    }
}
