//! Prometheus metrics for the ESDT relayer
//!
//! Registered in the default registry and exposed on the /metrics endpoint.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram_vec,
    Counter, CounterVec, Encoder, Gauge, HistogramVec, TextEncoder,
};

lazy_static! {
    // Block processing metrics
    pub static ref BLOCKS_PROCESSED: Counter = register_counter!(
        "esdt_relayer_blocks_processed_total",
        "Total number of finalized source blocks processed"
    ).unwrap();

    pub static ref LATEST_BLOCK: Gauge = register_gauge!(
        "esdt_relayer_latest_block",
        "Latest finalized source block dispatched"
    ).unwrap();

    pub static ref BLOCK_GAPS: Counter = register_counter!(
        "esdt_relayer_block_gaps_total",
        "Number of finalized block ranges skipped beyond the backfill window"
    ).unwrap();

    // Event metrics
    pub static ref TRANSFERS_DETECTED: Counter = register_counter!(
        "esdt_relayer_transfers_detected_total",
        "Total number of bridge transfer events decoded"
    ).unwrap();

    pub static ref MALFORMED_EVENTS: Counter = register_counter!(
        "esdt_relayer_malformed_events_total",
        "Total number of bridge events rejected by the decoder"
    ).unwrap();

    pub static ref DUPLICATES_SKIPPED: Counter = register_counter!(
        "esdt_relayer_duplicates_skipped_total",
        "Transfers skipped because an attempt already exists for the nonce"
    ).unwrap();

    // Transaction metrics
    pub static ref SUBMISSIONS: CounterVec = register_counter_vec!(
        "esdt_relayer_submissions_total",
        "Destination transaction submissions",
        &["result"]
    ).unwrap();

    pub static ref OUTCOMES: CounterVec = register_counter_vec!(
        "esdt_relayer_attempt_outcomes_total",
        "Relay attempts reaching a terminal status",
        &["status"]
    ).unwrap();

    pub static ref IN_FLIGHT: Gauge = register_gauge!(
        "esdt_relayer_in_flight_transfers",
        "Transfers currently being executed or confirmed"
    ).unwrap();

    pub static ref CUSTODY_NONCE: Gauge = register_gauge!(
        "esdt_relayer_custody_nonce",
        "Next custody account nonce the relayer will use"
    ).unwrap();

    // Latency
    pub static ref LATENCY: HistogramVec = register_histogram_vec!(
        "esdt_relayer_latency_seconds",
        "Time spent in a relay stage",
        &["stage"],
        vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
    ).unwrap();

    // Error metrics
    pub static ref ERRORS: CounterVec = register_counter_vec!(
        "esdt_relayer_errors_total",
        "Total number of errors",
        &["type"]
    ).unwrap();

    // Health metrics
    pub static ref UP: Gauge = register_gauge!(
        "esdt_relayer_up",
        "Whether the relayer is up and running"
    ).unwrap();
}

/// Record a block handed to the coordinator
pub fn record_block_processed(height: u64) {
    BLOCKS_PROCESSED.inc();
    LATEST_BLOCK.set(height as f64);
}

pub fn record_gap() {
    BLOCK_GAPS.inc();
}

pub fn record_transfer_detected() {
    TRANSFERS_DETECTED.inc();
}

pub fn record_malformed_event() {
    MALFORMED_EVENTS.inc();
}

pub fn record_duplicate() {
    DUPLICATES_SKIPPED.inc();
}

/// Record a submission outcome
pub fn record_submission(success: bool) {
    let result = if success { "accepted" } else { "failed" };
    SUBMISSIONS.with_label_values(&[result]).inc();
}

/// Record an attempt reaching a terminal status
pub fn record_outcome(status: &str) {
    OUTCOMES.with_label_values(&[status]).inc();
}

pub fn set_in_flight(count: usize) {
    IN_FLIGHT.set(count as f64);
}

pub fn set_custody_nonce(nonce: u64) {
    CUSTODY_NONCE.set(nonce as f64);
}

/// Record time spent in `stage` ("submission", "confirmation")
pub fn record_latency(stage: &str, seconds: f64) {
    LATENCY.with_label_values(&[stage]).observe(seconds);
}

/// Record an error by kind
pub fn record_error(error_type: &str) {
    ERRORS.with_label_values(&[error_type]).inc();
}

/// Encode the default registry in the Prometheus text format
pub fn gather_text() -> Result<(String, String), prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    let body = String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("metrics are not UTF-8: {}", e)))?;
    Ok((encoder.format_type().to_string(), body))
}
