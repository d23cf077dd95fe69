//! Client configuration (§10.3).
//!
//! The teacher has no existing config module; `Client::connect`-style
//! constructors took loose parameters. This builder exposes exactly the
//! recognized options of the external-interface table, with sane defaults
//! and a fluent `with_*` API in the style of [`AmsAddr::new`](tcads_core::AmsAddr::new)
//! and [`AmsStream::connect`](tcads_core::io::tokio::AmsStream::connect).
//!
//! Building option *values* from environment or files is out of scope;
//! only the struct and its defaults live here.

use crate::manager::StateChange;
use crate::metrics::{Metrics, NullMetrics};
use std::sync::Arc;
use std::time::Duration;
use tcads_core::ams::{AmsNetId, AmsPort};

/// A state-change callback, fired `(old, new)` for every connection transition.
pub type StateCallback = Arc<dyn Fn(StateChange) + Send + Sync>;

/// Configuration for a [`crate::client::Client`].
#[derive(Clone)]
pub struct ClientConfig {
    /// `host:port` of the TwinCAT runtime. Default port is 48898.
    pub target_address: String,
    /// 6-byte destination NetId.
    pub target_net_id: AmsNetId,
    /// 6-byte source NetId. `None` asks the router to assign one.
    pub source_net_id: Option<AmsNetId>,
    /// Destination AMS port (e.g. 851 for the first PLC runtime).
    pub target_port: AmsPort,
    /// Per-request deadline and socket deadline base.
    pub timeout: Duration,
    /// Enables the C3 reconnect loop.
    pub auto_reconnect: bool,
    /// Cap for exponential backoff between reconnect attempts.
    pub max_reconnect_delay: Duration,
    /// Period for `ReadState` health-check probes. `Duration::ZERO` disables them.
    pub health_check_period: Duration,
    /// Invoked on every connection-state transition, serially and in order.
    pub state_callback: Option<StateCallback>,
    /// Capability for counters and histograms. Defaults to [`NullMetrics`].
    pub metrics: Arc<dyn Metrics>,
}

impl ClientConfig {
    /// Starts a configuration for the given target address and NetId, with
    /// every other option at its default.
    pub fn new(target_address: impl Into<String>, target_net_id: AmsNetId) -> Self {
        Self {
            target_address: target_address.into(),
            target_net_id,
            ..Self::default()
        }
    }

    pub fn with_source_net_id(mut self, source_net_id: AmsNetId) -> Self {
        self.source_net_id = Some(source_net_id);
        self
    }

    pub fn with_target_port(mut self, port: AmsPort) -> Self {
        self.target_port = port;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    pub fn with_max_reconnect_delay(mut self, delay: Duration) -> Self {
        self.max_reconnect_delay = delay;
        self
    }

    pub fn with_health_check_period(mut self, period: Duration) -> Self {
        self.health_check_period = period;
        self
    }

    pub fn with_state_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(StateChange) + Send + Sync + 'static,
    {
        self.state_callback = Some(Arc::new(callback));
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn Metrics>) -> Self {
        self.metrics = metrics;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            target_address: "127.0.0.1:48898".to_string(),
            target_net_id: AmsNetId::new(127, 0, 0, 1, 1, 1),
            source_net_id: None,
            target_port: 851,
            timeout: Duration::from_secs(5),
            auto_reconnect: true,
            max_reconnect_delay: Duration::from_secs(30),
            health_check_period: Duration::ZERO,
            state_callback: None,
            metrics: Arc::new(NullMetrics),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_target_port() {
        let cfg = ClientConfig::default();
        assert_eq!(cfg.target_port, 851);
        assert!(cfg.auto_reconnect);
        assert_eq!(cfg.health_check_period, Duration::ZERO);
    }

    #[test]
    fn builder_overrides_apply() {
        let cfg = ClientConfig::new("10.0.0.5:48898", AmsNetId::new(10, 0, 0, 5, 1, 1))
            .with_target_port(801)
            .with_timeout(Duration::from_secs(2))
            .with_auto_reconnect(false);

        assert_eq!(cfg.target_address, "10.0.0.5:48898");
        assert_eq!(cfg.target_port, 801);
        assert_eq!(cfg.timeout, Duration::from_secs(2));
        assert!(!cfg.auto_reconnect);
    }
}
