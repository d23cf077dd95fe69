//! The metrics capability (§10.4): the core only ever calls
//! [`Metrics::record`]; callers who want observability plug in a sink,
//! everyone else gets [`NullMetrics`] for free.

/// Minimum metric names emitted by the client, per spec §6.
pub mod names {
    pub const CONNECTION_ATTEMPTS: &str = "connection_attempts";
    pub const CONNECTION_SUCCESSES: &str = "connection_successes";
    pub const CONNECTION_FAILURES: &str = "connection_failures";
    pub const RECONNECTIONS: &str = "reconnections";
    pub const BYTES_SENT: &str = "bytes_sent";
    pub const BYTES_RECEIVED: &str = "bytes_received";
    pub const OPERATIONS: &str = "operations";
    pub const OPERATION_ERRORS: &str = "operation_errors";
    pub const HEALTH_CHECKS_STARTED: &str = "health_checks_started";
    pub const HEALTH_CHECKS_SUCCESS: &str = "health_checks_success";
    pub const HEALTH_CHECKS_FAILURE: &str = "health_checks_failure";
    /// A packet arrived whose invoke-ID matched no pending request (and
    /// wasn't a notification). Typically a response to a request that
    /// already timed out.
    pub const UNMATCHED_RESPONSES: &str = "unmatched_responses";
}

/// A capability for recording counters and histograms.
///
/// The core never assumes a particular metrics backend; it only calls
/// `record`. Labels are `(key, value)` pairs, e.g. `[("op", "read")]`.
pub trait Metrics: Send + Sync {
    fn record(&self, name: &str, value: u64, labels: &[(&str, &str)]);
}

/// A [`Metrics`] implementation that discards everything.
///
/// The default for [`crate::config::ClientConfig`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NullMetrics;

impl Metrics for NullMetrics {
    fn record(&self, _name: &str, _value: u64, _labels: &[(&str, &str)]) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_metrics_does_nothing_and_is_callable() {
        let m = NullMetrics;
        m.record(names::OPERATIONS, 1, &[("op", "read")]);
    }
}
