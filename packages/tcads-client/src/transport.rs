//! Transport (C2): one TCP connection multiplexing many concurrent
//! requests by invoke-ID, with an out-of-band notification stream.
//!
//! One reader task continuously parses packets off the socket and pushes
//! them into a channel; one dispatcher task drains that channel and routes
//! each packet to either a pending-request slot or the notification handler.
//! Writes are serialized by a mutex, matching the teacher's `AmsWriter`
//! buffering/flush discipline in [`tcads_core::io::tokio`].

use crate::error::TransportError;
use crate::metrics::{self, Metrics, NullMetrics};
use socket2::SockRef;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tcads_core::ads::AdsCommand;
use tcads_core::io::tokio::{AmsReader, AmsStream, AmsWriter};
use tcads_core::packet::{self, Packet};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::task::JoinHandle;

/// Invoked off the dispatcher task for every `AdsDeviceNotification` (0x0008)
/// packet, to avoid head-of-line blocking on notification fan-out.
pub type NotificationHandler = Arc<dyn Fn(Packet) + Send + Sync>;

type PendingMap = Arc<Mutex<HashMap<u32, oneshot::Sender<Packet>>>>;
type HandlerSlot = Arc<Mutex<Option<NotificationHandler>>>;

/// A single multiplexed AMS/TCP connection.
pub struct Transport {
    writer: tokio::sync::Mutex<AmsWriter<OwnedWriteHalf>>,
    pending: PendingMap,
    next_invoke_id: AtomicU32,
    notification_handler: HandlerSlot,
    reader_task: JoinHandle<()>,
    dispatch_task: JoinHandle<()>,
    default_timeout: Duration,
    dead: Arc<AtomicBool>,
    dead_notify: Arc<Notify>,
    metrics: Arc<dyn Metrics>,
}

/// Sets OS keepalive (30s period), disables Nagle, and zero-lingers on close.
///
/// [`AmsStream::connect`] only sets `TCP_NODELAY`; the remaining socket
/// options are applied here via `socket2` since `tokio::net::TcpStream`
/// does not expose them directly.
fn configure_socket(stream: &TcpStream) -> std::io::Result<()> {
    let sock = SockRef::from(stream);
    sock.set_keepalive(true)?;
    sock.set_tcp_keepalive(&socket2::TcpKeepalive::new().with_time(Duration::from_secs(30)))?;
    sock.set_linger(Some(Duration::ZERO))?;
    Ok(())
}

impl Transport {
    /// Establishes a TCP connection to `address` within `timeout`, configures
    /// the socket per §4.2, and spawns the reader/dispatcher tasks.
    ///
    /// Equivalent to [`dial_with_metrics`](Transport::dial_with_metrics) with
    /// [`NullMetrics`].
    #[tracing::instrument(skip(timeout))]
    pub async fn dial(address: &str, timeout: Duration) -> Result<Self, TransportError> {
        Self::dial_with_metrics(address, timeout, Arc::new(NullMetrics)).await
    }

    /// Like [`dial`](Transport::dial), recording connection-level counters
    /// (bytes transferred, dropped unmatched responses) through `metrics`.
    #[tracing::instrument(skip(timeout, metrics))]
    pub async fn dial_with_metrics(
        address: &str,
        timeout: Duration,
        metrics: Arc<dyn Metrics>,
    ) -> Result<Self, TransportError> {
        let tcp = tokio::time::timeout(timeout, TcpStream::connect(address))
            .await
            .map_err(|_| {
                TransportError::ConnectFailed(std::io::Error::from(std::io::ErrorKind::TimedOut))
            })?
            .map_err(TransportError::ConnectFailed)?;

        configure_socket(&tcp).map_err(TransportError::ConnectFailed)?;
        tcp.set_nodelay(true).map_err(TransportError::ConnectFailed)?;

        let stream = AmsStream::new(tcp);
        let (reader, writer) = stream.into_split();

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let notification_handler: HandlerSlot = Arc::new(Mutex::new(None));
        let dead = Arc::new(AtomicBool::new(false));
        let dead_notify = Arc::new(Notify::new());

        // §4.2's read-deadline Open Question (see DESIGN.md): the deadline only
        // applies while at least one request is outstanding. A read that is
        // purely waiting on the next notification is left unbounded, since a
        // quiet PLC with nothing to report is indistinguishable from a
        // stalled socket by elapsed time alone.
        let read_deadline = timeout * 2;

        let (tx, rx) = mpsc::channel(64);
        let reader_task = tokio::spawn(reader_loop(
            reader,
            tx,
            dead.clone(),
            dead_notify.clone(),
            pending.clone(),
            read_deadline,
        ));
        let dispatch_task = tokio::spawn(dispatch_loop(
            rx,
            pending.clone(),
            notification_handler.clone(),
            metrics.clone(),
        ));

        tracing::debug!(address, "transport connected");

        Ok(Self {
            writer: tokio::sync::Mutex::new(writer),
            pending,
            next_invoke_id: AtomicU32::new(1),
            notification_handler,
            reader_task,
            dispatch_task,
            default_timeout: timeout,
            dead,
            dead_notify,
            metrics,
        })
    }

    /// Resolves once the connection has been observed to fail (read error,
    /// EOF, or explicit [`close`](Transport::close)). Safe to call before or
    /// after the failure occurs.
    pub async fn closed(&self) {
        loop {
            if self.dead.load(Ordering::Acquire) {
                return;
            }
            let notified = self.dead_notify.notified();
            if self.dead.load(Ordering::Acquire) {
                return;
            }
            notified.await;
        }
    }

    /// Returns the next invoke-ID, monotonically increasing and wrapping at 2^32.
    ///
    /// Uniqueness is only required across the set of currently outstanding
    /// requests, which this sequence trivially satisfies barring 2^32
    /// simultaneously in-flight requests.
    pub fn next_invoke_id(&self) -> u32 {
        self.next_invoke_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Installs the sink for command-ID-0x0008 packets.
    pub fn set_notification_handler(&self, handler: NotificationHandler) {
        *self.notification_handler.lock().unwrap() = Some(handler);
    }

    /// Writes `packet` and awaits the response matching its invoke-ID,
    /// bounded by `timeout` (falls back to the transport's default).
    #[tracing::instrument(skip(self, packet), fields(invoke_id = packet.header().invoke_id()))]
    pub async fn send_request(
        &self,
        packet: Packet,
        timeout: Option<Duration>,
    ) -> Result<Packet, TransportError> {
        let invoke_id = packet.header().invoke_id();
        let wire_len = packet.data().len() as u64;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(invoke_id, tx);

        let write_result = {
            let mut writer = self.writer.lock().await;
            packet::write_packet(&mut writer, &packet).await
        };

        if let Err(e) = write_result {
            self.pending.lock().unwrap().remove(&invoke_id);
            return Err(TransportError::Io(e));
        }
        self.metrics.record(metrics::names::BYTES_SENT, wire_len, &[]);

        match tokio::time::timeout(timeout.unwrap_or(self.default_timeout), rx).await {
            Ok(Ok(response)) => Ok(response),
            // Sender dropped: dispatcher shut down or close() drained waiters.
            Ok(Err(_)) => Err(TransportError::ConnectionClosed),
            Err(_) => {
                self.pending.lock().unwrap().remove(&invoke_id);
                Err(TransportError::Timeout)
            }
        }
    }

    /// Cancels all pending requests with `ConnectionClosed`, aborts the
    /// reader/dispatcher tasks, and closes the socket. Idempotent.
    pub async fn close(&self, timeout: Duration) {
        for (_, tx) in self.pending.lock().unwrap().drain() {
            drop(tx); // dropping the sender fails the waiter's `rx.await`
        }

        self.reader_task.abort();
        self.dead.store(true, Ordering::Release);
        self.dead_notify.notify_waiters();

        if tokio::time::timeout(timeout, &mut (&self.dispatch_task))
            .await
            .is_err()
        {
            self.dispatch_task.abort();
        }
    }
}

/// Reads packets off the socket until EOF, a read error, or a read deadline
/// is exceeded while a request is outstanding (see the read-deadline note in
/// [`Transport::dial_with_metrics`] and DESIGN.md).
async fn reader_loop(
    mut reader: AmsReader<OwnedReadHalf>,
    tx: mpsc::Sender<Packet>,
    dead: Arc<AtomicBool>,
    dead_notify: Arc<Notify>,
    pending: PendingMap,
    read_deadline: Duration,
) {
    loop {
        let awaiting_response = !pending.lock().unwrap().is_empty();
        let read_result = if awaiting_response {
            match tokio::time::timeout(read_deadline, packet::read_packet(&mut reader)).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(
                        ?read_deadline,
                        "read deadline exceeded with a request outstanding, closing reader loop"
                    );
                    break;
                }
            }
        } else {
            packet::read_packet(&mut reader).await
        };

        match read_result {
            Ok(packet) => {
                if tx.send(packet).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "transport read failed, closing reader loop");
                break;
            }
        }
    }
    dead.store(true, Ordering::Release);
    dead_notify.notify_waiters();
}

async fn dispatch_loop(
    mut rx: mpsc::Receiver<Packet>,
    pending: PendingMap,
    handler: HandlerSlot,
    metrics: Arc<dyn Metrics>,
) {
    while let Some(packet) = rx.recv().await {
        metrics.record(
            metrics::names::BYTES_RECEIVED,
            packet.data().len() as u64,
            &[],
        );

        if packet.header().command_id() == AdsCommand::AdsDeviceNotification {
            let sink = handler.lock().unwrap().clone();
            if let Some(sink) = sink {
                let packet = packet.clone();
                tokio::spawn(async move { sink(packet) });
            }
            continue;
        }

        let invoke_id = packet.header().invoke_id();
        match pending.lock().unwrap().remove(&invoke_id) {
            Some(tx) => {
                let _ = tx.send(packet);
            }
            None => {
                tracing::debug!(invoke_id, "dropping response with no pending waiter");
                metrics.record(metrics::names::UNMATCHED_RESPONSES, 1, &[]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tcads_core::ads::{AdsHeader, AdsReturnCode, StateFlag};
    use tcads_core::ams::{AmsAddr, AmsNetId};
    use tokio::net::TcpListener;

    fn header(command: AdsCommand, invoke_id: u32, flags: StateFlag, length: u32) -> AdsHeader {
        AdsHeader::new(
            AmsAddr::new(AmsNetId::new(127, 0, 0, 1, 1, 1), 851),
            AmsAddr::new(AmsNetId::new(127, 0, 0, 1, 1, 1), 32000),
            command,
            flags,
            length,
            AdsReturnCode::Ok,
            invoke_id,
        )
    }

    #[tokio::test]
    async fn send_request_matches_response_by_invoke_id() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let stream = AmsStream::new(socket);
            let (mut reader, mut writer) = stream.into_split();

            let request = packet::read_packet(&mut reader).await.unwrap();
            let invoke_id = request.header().invoke_id();

            let response = Packet::new(
                header(
                    AdsCommand::AdsReadState,
                    invoke_id,
                    StateFlag::tcp_ads_response(),
                    4,
                ),
                vec![0, 0, 0, 0],
            );
            packet::write_packet(&mut writer, &response).await.unwrap();
        });

        let transport = Transport::dial(&addr.to_string(), Duration::from_secs(1))
            .await
            .unwrap();

        let invoke_id = transport.next_invoke_id();
        let request = Packet::new(
            header(
                AdsCommand::AdsReadState,
                invoke_id,
                StateFlag::tcp_ads_request(),
                0,
            ),
            Vec::new(),
        );

        let response = transport.send_request(request, None).await.unwrap();
        assert_eq!(response.header().invoke_id(), invoke_id);

        server.await.unwrap();
    }

    #[tokio::test]
    async fn notifications_are_routed_to_the_handler_not_pending_map() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let stream = AmsStream::new(socket);
            let (_reader, mut writer) = stream.into_split();

            let notification = Packet::new(
                header(
                    AdsCommand::AdsDeviceNotification,
                    0,
                    StateFlag::tcp_ads_request(),
                    4,
                ),
                vec![1, 2, 3, 4],
            );
            packet::write_packet(&mut writer, &notification)
                .await
                .unwrap();

            tokio::time::sleep(Duration::from_millis(50)).await;
        });

        let transport = Transport::dial(&addr.to_string(), Duration::from_secs(1))
            .await
            .unwrap();

        let (tx, rx) = oneshot::channel();
        let tx = Arc::new(Mutex::new(Some(tx)));
        transport.set_notification_handler(Arc::new(move |packet| {
            if let Some(tx) = tx.lock().unwrap().take() {
                let _ = tx.send(packet);
            }
        }));

        let received = tokio::time::timeout(Duration::from_secs(1), rx)
            .await
            .expect("handler should fire")
            .unwrap();
        assert_eq!(
            received.header().command_id(),
            AdsCommand::AdsDeviceNotification
        );

        server.await.unwrap();
    }

    #[tokio::test]
    async fn close_releases_pending_waiters_with_connection_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            // Never responds; the client's `close()` must still release the waiter.
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let transport = Arc::new(
            Transport::dial(&addr.to_string(), Duration::from_secs(5))
                .await
                .unwrap(),
        );

        let invoke_id = transport.next_invoke_id();
        let request = Packet::new(
            header(
                AdsCommand::AdsReadState,
                invoke_id,
                StateFlag::tcp_ads_request(),
                0,
            ),
            Vec::new(),
        );

        let t2 = transport.clone();
        let waiter = tokio::spawn(async move { t2.send_request(request, None).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        transport.close(Duration::from_millis(200)).await;

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(TransportError::ConnectionClosed)));

        server.abort();
    }
}
