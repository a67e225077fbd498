//! Metrics instrumentation
//!
//! Thin wrappers around the `metrics` facade so call sites stay one-liners
//! and metric names live in a single place. An application wires up an
//! exporter (Prometheus, statsd, ...) by installing a recorder; without one
//! these calls are no-ops.

/// Label values shared across metrics
pub mod labels {
    /// Connection served from the idle pool
    pub const SOURCE_IDLE: &str = "idle";
    /// Connection freshly dialed
    pub const SOURCE_DIAL: &str = "dial";
}

/// Counter metrics
pub mod counters {
    /// Connections successfully opened and authenticated
    pub fn connections_opened() {
        metrics::counter!("graphwire_connections_opened_total").increment(1);
    }

    /// Connections closed cleanly
    pub fn connections_closed() {
        metrics::counter!("graphwire_connections_closed_total").increment(1);
    }

    /// Connections discarded because they were broken
    pub fn connections_broken() {
        metrics::counter!("graphwire_connections_broken_total").increment(1);
    }

    /// Authentication attempts
    pub fn auth_attempted() {
        metrics::counter!("graphwire_auth_attempts_total").increment(1);
    }

    /// Successful authentications
    pub fn auth_successful() {
        metrics::counter!("graphwire_auth_success_total").increment(1);
    }

    /// Failed authentications
    pub fn auth_failed(code: &str) {
        metrics::counter!("graphwire_auth_failures_total", "code" => code.to_string())
            .increment(1);
    }

    /// Pool acquisitions, labelled by whether the connection was reused
    pub fn pool_acquired(source: &'static str) {
        metrics::counter!("graphwire_pool_acquisitions_total", "source" => source).increment(1);
    }

    /// Acquisition attempts that timed out waiting for a slot
    pub fn pool_exhausted() {
        metrics::counter!("graphwire_pool_exhausted_total").increment(1);
    }

    /// Transactions begun
    pub fn transactions_begun() {
        metrics::counter!("graphwire_transactions_begun_total").increment(1);
    }

    /// Transactions committed
    pub fn transactions_committed() {
        metrics::counter!("graphwire_transactions_committed_total").increment(1);
    }

    /// Transactions rolled back
    pub fn transactions_rolled_back() {
        metrics::counter!("graphwire_transactions_rolled_back_total").increment(1);
    }

    /// Transaction function retries after a transient failure
    pub fn retries_attempted() {
        metrics::counter!("graphwire_retries_total").increment(1);
    }

    /// Records pulled from result streams
    pub fn records_streamed(count: u64) {
        metrics::counter!("graphwire_records_streamed_total").increment(count);
    }
}

/// Histogram metrics
pub mod histograms {
    /// Time from HELLO to the server's authentication verdict
    pub fn auth_duration(millis: u64) {
        metrics::histogram!("graphwire_auth_duration_ms").record(millis as f64);
    }

    /// Time spent waiting for a pooled connection
    pub fn acquire_duration(millis: u64) {
        metrics::histogram!("graphwire_pool_acquire_duration_ms").record(millis as f64);
    }

    /// Backoff slept between transaction function attempts
    pub fn retry_backoff(millis: u64) {
        metrics::histogram!("graphwire_retry_backoff_ms").record(millis as f64);
    }
}

/// Gauge metrics
pub mod gauges {
    /// Idle connections currently parked in the pool
    pub fn pool_idle(count: usize) {
        metrics::gauge!("graphwire_pool_idle_connections").set(count as f64);
    }
}
