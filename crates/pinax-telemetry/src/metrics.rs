use once_cell::sync::OnceCell;
use prometheus::{register_histogram_vec, register_int_counter_vec, HistogramVec, IntCounterVec};

/// What the worker and dispatcher record. Call sites go through
/// [`metrics()`], which falls back to a no-op sink until [`install`] has run
/// — so unit tests and the synchronous `extract-metadata` path never need to
/// install telemetry just to exercise the rest of the pipeline.
pub trait MetricsSink: Send + Sync {
    fn record_chunk_phase(&self, phase: &str);
    fn record_pi_outcome(&self, outcome: &str);
    fn record_callback_attempt(&self, outcome: &str);
    fn observe_extraction_seconds(&self, seconds: f64);
    fn observe_publish_seconds(&self, seconds: f64);
}

pub struct NopSink;

impl MetricsSink for NopSink {
    fn record_chunk_phase(&self, _phase: &str) {}
    fn record_pi_outcome(&self, _outcome: &str) {}
    fn record_callback_attempt(&self, _outcome: &str) {}
    fn observe_extraction_seconds(&self, _seconds: f64) {}
    fn observe_publish_seconds(&self, _seconds: f64) {}
}

static NOP_SINK: NopSink = NopSink;
static SINK: OnceCell<&'static dyn MetricsSink> = OnceCell::new();

/// Installs the process-wide metrics sink. Call once at startup; later calls
/// are ignored.
pub fn install(sink: &'static dyn MetricsSink) {
    let _ = SINK.set(sink);
}

pub fn metrics() -> &'static dyn MetricsSink {
    *SINK.get().unwrap_or(&(&NOP_SINK as &dyn MetricsSink))
}

/// Prometheus-backed sink. Registers against the global default registry so
/// [`crate::http::serve`]'s `/metrics` handler can scrape it with the stock
/// `TextEncoder`.
pub struct PrometheusSink {
    chunk_phase_total: IntCounterVec,
    pi_outcome_total: IntCounterVec,
    callback_attempt_total: IntCounterVec,
    extraction_seconds: HistogramVec,
    publish_seconds: HistogramVec,
}

impl PrometheusSink {
    pub fn new() -> prometheus::Result<Self> {
        Ok(Self {
            chunk_phase_total: register_int_counter_vec!(
                "pinax_chunk_phase_total",
                "Chunk phase transitions observed by the worker",
                &["phase"]
            )?,
            pi_outcome_total: register_int_counter_vec!(
                "pinax_pi_outcome_total",
                "Per-PI terminal or retry outcomes",
                &["outcome"]
            )?,
            callback_attempt_total: register_int_counter_vec!(
                "pinax_callback_attempt_total",
                "Orchestrator callback attempts by outcome",
                &["outcome"]
            )?,
            extraction_seconds: register_histogram_vec!(
                "pinax_extraction_seconds",
                "Time spent in the fetch+extract pipeline per PI",
                &["stage"]
            )?,
            publish_seconds: register_histogram_vec!(
                "pinax_publish_seconds",
                "Time spent publishing a PI (upload + CAS append)",
                &["stage"]
            )?,
        })
    }
}

impl MetricsSink for PrometheusSink {
    fn record_chunk_phase(&self, phase: &str) {
        self.chunk_phase_total.with_label_values(&[phase]).inc();
    }

    fn record_pi_outcome(&self, outcome: &str) {
        self.pi_outcome_total.with_label_values(&[outcome]).inc();
    }

    fn record_callback_attempt(&self, outcome: &str) {
        self.callback_attempt_total
            .with_label_values(&[outcome])
            .inc();
    }

    fn observe_extraction_seconds(&self, seconds: f64) {
        self.extraction_seconds
            .with_label_values(&["total"])
            .observe(seconds);
    }

    fn observe_publish_seconds(&self, seconds: f64) {
        self.publish_seconds
            .with_label_values(&["total"])
            .observe(seconds);
    }
}
