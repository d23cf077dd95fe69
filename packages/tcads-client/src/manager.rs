//! Connection Manager (C3): owns the current [`Transport`] and
//! re-establishes it under failure.
//!
//! ```text
//! Idle ──connect()──▶ Connecting ──ok──▶ Connected ──close()──▶ Disconnecting ──▶ Closed
//!                         │                 │
//!                         │ fail            │ fail / health-check-fail
//!                         ▼                 ▼
//!                     Backoff ◀─────────── Error
//!                         │
//!                         └─timer─▶ Connecting
//! ```
//!
//! Re-registration of live subscriptions on reconnect is the façade's (C5)
//! responsibility: it observes `Connected` transitions via the state
//! callback and reissues `AddDeviceNotification` against the fresh
//! [`Transport`] obtained from [`ConnectionManager::transport`]. This keeps
//! the manager ignorant of symbol/subscription bookkeeping, matching the
//! layering already visible in the teacher between `AmsStream` (transport)
//! and the higher-level `devices` API.

use crate::config::ClientConfig;
use crate::error::{ManagerError, TransportError};
use crate::metrics::names;
use crate::transport::Transport;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tcads_core::ads::{AdsCommand, AdsHeader, AdsReturnCode, StateFlag};
use tcads_core::ams::AmsAddr;
use tcads_core::packet::Packet;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// Where the manager currently sits in the state machine of §4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Disconnecting,
    Backoff,
    Error,
    Closed,
}

/// One `(old, new, error?)` transition, delivered to a [`crate::config::StateCallback`].
#[derive(Clone)]
pub struct StateChange {
    pub old: ConnectionState,
    pub new: ConnectionState,
    pub error: Option<Arc<ManagerError>>,
}

struct Inner {
    config: ClientConfig,
    transport: RwLock<Option<Arc<Transport>>>,
    state: Mutex<ConnectionState>,
    closing: AtomicBool,
    local_addr: AmsAddr,
    target_addr: AmsAddr,
}

impl Inner {
    fn set_state(&self, new: ConnectionState, error: Option<ManagerError>) {
        let old = {
            let mut state = self.state.lock().unwrap();
            let old = *state;
            *state = new;
            old
        };
        if old == new {
            return;
        }
        tracing::debug!(?old, ?new, "connection state transition");
        if let Some(callback) = &self.config.state_callback {
            callback(StateChange {
                old,
                new,
                error: error.map(Arc::new),
            });
        }
    }
}

/// Supervises one logical connection: dials, retries with backoff, and runs
/// health-check probes while `Connected`.
pub struct ConnectionManager {
    inner: Arc<Inner>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

fn jittered(delay: std::time::Duration) -> std::time::Duration {
    let factor = rand::thread_rng().gen_range(0.8..1.2);
    delay.mul_f64(factor)
}

impl ConnectionManager {
    /// Builds a manager for `config` and starts the connect/supervise loop.
    /// Does not block for the first connection attempt to complete; observe
    /// `Connected` via the state callback or poll [`ConnectionManager::state`].
    pub fn start(config: ClientConfig, local_addr: AmsAddr, target_addr: AmsAddr) -> Self {
        let inner = Arc::new(Inner {
            config,
            transport: RwLock::new(None),
            state: Mutex::new(ConnectionState::Idle),
            closing: AtomicBool::new(false),
            local_addr,
            target_addr,
        });

        let supervisor = tokio::spawn(supervise(inner.clone()));

        Self {
            inner,
            supervisor: Mutex::new(Some(supervisor)),
        }
    }

    /// Current state machine position.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock().unwrap()
    }

    /// A snapshot of the live transport, if currently connected.
    pub async fn transport(&self) -> Option<Arc<Transport>> {
        self.inner.transport.read().await.clone()
    }

    /// Transitions to `Disconnecting`, stops the supervisor, closes the
    /// underlying transport if any, and transitions to `Closed`. Idempotent.
    pub async fn close(&self, timeout: std::time::Duration) {
        if self.inner.closing.swap(true, Ordering::AcqRel) {
            return;
        }

        self.inner.set_state(ConnectionState::Disconnecting, None);

        let handle = self.supervisor.lock().unwrap().take();
        if let Some(handle) = handle {
            handle.abort();
        }

        if let Some(transport) = self.inner.transport.write().await.take() {
            transport.close(timeout).await;
        }

        self.inner.set_state(ConnectionState::Closed, None);
    }
}

async fn supervise(inner: Arc<Inner>) {
    let base = std::time::Duration::from_secs(1);
    let mut backoff = base;

    loop {
        if inner.closing.load(Ordering::Acquire) {
            break;
        }

        inner.set_state(ConnectionState::Connecting, None);
        inner
            .config
            .metrics
            .record(names::CONNECTION_ATTEMPTS, 1, &[]);

        match Transport::dial_with_metrics(
            &inner.config.target_address,
            inner.config.timeout,
            inner.config.metrics.clone(),
        )
        .await
        {
            Ok(transport) => {
                let transport = Arc::new(transport);
                *inner.transport.write().await = Some(transport.clone());
                backoff = base;
                inner
                    .config
                    .metrics
                    .record(names::CONNECTION_SUCCESSES, 1, &[]);
                inner.set_state(ConnectionState::Connected, None);

                run_until_failure(&inner, &transport).await;

                if inner.closing.load(Ordering::Acquire) {
                    break;
                }

                inner.transport.write().await.take();
                inner.set_state(ConnectionState::Error, None);

                // §6: `auto_reconnect(false)` disables the reconnect loop. The
                // manager stays in `Error` rather than looping back through
                // `Backoff`/`Connecting`; a fresh `ConnectionManager::start`
                // is required to connect again.
                if !inner.config.auto_reconnect {
                    break;
                }

                inner
                    .config
                    .metrics
                    .record(names::RECONNECTIONS, 1, &[]);
            }
            Err(e) => {
                inner
                    .config
                    .metrics
                    .record(names::CONNECTION_FAILURES, 1, &[]);
                inner.set_state(
                    ConnectionState::Backoff,
                    Some(ManagerError::Transport(e)),
                );

                if !inner.config.auto_reconnect {
                    inner.set_state(ConnectionState::Error, None);
                    break;
                }
            }
        }

        if inner.closing.load(Ordering::Acquire) {
            break;
        }

        inner.set_state(ConnectionState::Backoff, None);
        tokio::time::sleep(jittered(backoff)).await;
        backoff = (backoff * 2).min(inner.config.max_reconnect_delay);
    }
}

/// Runs while `Connected`: waits for the transport to die, or — if health
/// checks are enabled — probes it periodically and escalates after two
/// consecutive failures.
async fn run_until_failure(inner: &Arc<Inner>, transport: &Arc<Transport>) {
    if inner.config.health_check_period.is_zero() {
        transport.closed().await;
        return;
    }

    let mut consecutive_failures = 0u32;
    let mut ticker = tokio::time::interval(inner.config.health_check_period);
    ticker.tick().await; // first tick fires immediately; skip it

    loop {
        tokio::select! {
            _ = transport.closed() => return,
            _ = ticker.tick() => {
                inner.config.metrics.record(names::HEALTH_CHECKS_STARTED, 1, &[]);
                match probe(inner, transport).await {
                    Ok(()) => {
                        consecutive_failures = 0;
                        inner.config.metrics.record(names::HEALTH_CHECKS_SUCCESS, 1, &[]);
                    }
                    Err(e) => {
                        consecutive_failures += 1;
                        inner.config.metrics.record(names::HEALTH_CHECKS_FAILURE, 1, &[]);
                        tracing::warn!(error = %e, consecutive_failures, "health check probe failed");
                        if consecutive_failures >= 2 {
                            return;
                        }
                    }
                }
            }
        }
    }
}

async fn probe(inner: &Arc<Inner>, transport: &Arc<Transport>) -> Result<(), TransportError> {
    let invoke_id = transport.next_invoke_id();
    let header = AdsHeader::new(
        inner.target_addr.clone(),
        inner.local_addr.clone(),
        AdsCommand::AdsReadState,
        StateFlag::tcp_ads_request(),
        0,
        AdsReturnCode::Ok,
        invoke_id,
    );
    let request = Packet::new(header, Vec::new());

    let probe_timeout = (inner.config.health_check_period / 2).max(std::time::Duration::from_millis(200));
    transport.send_request(request, Some(probe_timeout)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::NullMetrics;
    use tcads_core::ams::AmsNetId;
    use tokio::net::TcpListener;

    fn test_config(address: String) -> ClientConfig {
        ClientConfig::new(address, AmsNetId::new(127, 0, 0, 1, 1, 1))
            .with_timeout(std::time::Duration::from_millis(200))
            .with_max_reconnect_delay(std::time::Duration::from_millis(50))
    }

    #[tokio::test]
    async fn connects_and_reports_connected_state() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        });

        let local = AmsAddr::new(AmsNetId::new(127, 0, 0, 1, 1, 1), 32000);
        let target = AmsAddr::new(AmsNetId::new(127, 0, 0, 1, 1, 1), 851);
        let manager = ConnectionManager::start(test_config(addr.to_string()), local, target);

        let mut state = manager.state();
        for _ in 0..50 {
            state = manager.state();
            if state == ConnectionState::Connected {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(state, ConnectionState::Connected);
        assert!(manager.transport().await.is_some());

        manager.close(std::time::Duration::from_millis(200)).await;
        assert_eq!(manager.state(), ConnectionState::Closed);
        server.abort();
    }

    #[tokio::test]
    async fn backoff_retries_when_nothing_is_listening() {
        // Reserve a port, then drop the listener so connect() fails fast.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let local = AmsAddr::new(AmsNetId::new(127, 0, 0, 1, 1, 1), 32000);
        let target = AmsAddr::new(AmsNetId::new(127, 0, 0, 1, 1, 1), 851);
        let manager = ConnectionManager::start(
            ClientConfig::new(addr.to_string(), AmsNetId::new(127, 0, 0, 1, 1, 1))
                .with_timeout(std::time::Duration::from_millis(50))
                .with_max_reconnect_delay(std::time::Duration::from_millis(20)),
            local,
            target,
        );

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(matches!(
            manager.state(),
            ConnectionState::Backoff | ConnectionState::Connecting
        ));

        manager.close(std::time::Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn auto_reconnect_false_stops_retrying_after_a_failed_dial() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let local = AmsAddr::new(AmsNetId::new(127, 0, 0, 1, 1, 1), 32000);
        let target = AmsAddr::new(AmsNetId::new(127, 0, 0, 1, 1, 1), 851);
        let manager = ConnectionManager::start(
            ClientConfig::new(addr.to_string(), AmsNetId::new(127, 0, 0, 1, 1, 1))
                .with_timeout(std::time::Duration::from_millis(50))
                .with_max_reconnect_delay(std::time::Duration::from_millis(20))
                .with_auto_reconnect(false),
            local,
            target,
        );

        let mut state = manager.state();
        for _ in 0..50 {
            state = manager.state();
            if state == ConnectionState::Error {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(state, ConnectionState::Error);

        // Stays put; a disabled auto_reconnect never cycles back to Connecting.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(manager.state(), ConnectionState::Error);

        manager.close(std::time::Duration::from_millis(50)).await;
    }

    #[test]
    fn null_metrics_config_builds() {
        let cfg = ClientConfig::new("127.0.0.1:48898", AmsNetId::new(127, 0, 0, 1, 1, 1))
            .with_metrics(Arc::new(NullMetrics));
        assert_eq!(cfg.target_port, 851);
    }
}
