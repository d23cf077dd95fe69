//! Client Façade (C5): ties the transport, connection manager, and symbol
//! registry together behind the operations applications actually call.

pub mod blocking;

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::manager::{ConnectionManager, ConnectionState};
use crate::registry::{self, Symbol, SymbolRegistry, TypeInfo, Value, index_group};
use crate::transport::Transport;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tcads_core::ads::{AdsCommand, AdsHeader, AdsReturnCode, AdsState, DeviceState, StateFlag};
use tcads_core::ams::AmsAddr;
use tcads_core::packet::Packet;
use tokio::sync::mpsc;

/// Result of [`Client::read_device_info`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub major: u8,
    pub minor: u8,
    pub build: u16,
    pub name: String,
}

/// Result of [`Client::read_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceStatus {
    pub ads_state: AdsState,
    pub device_state: DeviceState,
}

/// Transmission mode for [`SubscriptionOptions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmissionMode {
    OnChange,
    Cyclic,
}

/// Parameters for [`Client::subscribe`].
#[derive(Debug, Clone, Copy)]
pub struct SubscriptionOptions {
    pub transmission_mode: TransmissionMode,
    pub max_delay_ms: u32,
    pub cycle_time_ms: u32,
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        Self {
            transmission_mode: TransmissionMode::OnChange,
            max_delay_ms: 0,
            cycle_time_ms: 0,
        }
    }
}

/// A live notification subscription. Drop does not unsubscribe; call
/// [`Client::unsubscribe`] explicitly to release the PLC-side handle.
pub struct Subscription {
    pub handle: u32,
    receiver: mpsc::Receiver<(tcads_core::ads::WindowsFileTime, Vec<u8>)>,
}

impl Subscription {
    /// Awaits the next `(timestamp, data)` sample. Returns `None` once the
    /// connection that created it has been closed.
    pub async fn recv(&mut self) -> Option<(tcads_core::ads::WindowsFileTime, Vec<u8>)> {
        self.receiver.recv().await
    }
}

struct SubscriptionEntry {
    index_group: u32,
    index_offset: u32,
    length: u32,
    options: SubscriptionOptions,
    sender: mpsc::Sender<(tcads_core::ads::WindowsFileTime, Vec<u8>)>,
}

/// The async AMS/ADS client. Cheaply `Clone`-able; all clones share one
/// connection manager and symbol cache.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

struct Inner {
    manager: ConnectionManager,
    config: ClientConfig,
    local_addr: AmsAddr,
    target_addr: AmsAddr,
    registry: Mutex<SymbolRegistry>,
    subscriptions: Mutex<HashMap<u32, SubscriptionEntry>>,
    local_port_counter: AtomicU32,
}

impl Client {
    /// Starts connecting per `config`. Does not block for the first
    /// connection to succeed; operations issued before it does fail with
    /// `ConnectionClosed` and the caller may retry.
    pub fn connect(config: ClientConfig) -> Self {
        let source_net_id = config
            .source_net_id
            .unwrap_or_else(|| tcads_core::ams::AmsNetId::new(127, 0, 0, 1, 1, 1));
        let local_addr = AmsAddr::new(source_net_id, 32000);
        let target_addr = AmsAddr::new(config.target_net_id, config.target_port);

        let inner = Arc::new(Inner {
            manager: ConnectionManager::start(config.clone(), local_addr, target_addr),
            config,
            local_addr,
            target_addr,
            registry: Mutex::new(SymbolRegistry::new()),
            subscriptions: Mutex::new(HashMap::new()),
            local_port_counter: AtomicU32::new(1),
        });

        let client = Self { inner };
        client.install_resubscribe_hook();
        client.install_notification_sink();
        client
    }

    /// Re-issues `AddDeviceNotification` for every live subscription whenever
    /// the manager announces a fresh `Connected` transport, per §4.3's
    /// "subscription re-registration" behavior.
    fn install_resubscribe_hook(&self) {
        // The state callback itself must stay synchronous and non-blocking
        // (§4.3: "ordered and serialized so an observer sees a linear
        // history"); the actual resubscription work is spawned off it.
        let weak = Arc::downgrade(&self.inner);
        if self.inner.config.state_callback.is_some() {
            tracing::debug!(
                "a state_callback is already configured; resubscription still runs independently"
            );
        }
        let client = self.clone();
        tokio::spawn(async move {
            let mut last = ConnectionState::Idle;
            loop {
                let Some(inner) = weak.upgrade() else { return };
                let current = inner.manager.state();
                if current == ConnectionState::Connected && last != ConnectionState::Connected {
                    client.resubscribe_all().await;
                }
                last = current;
                if current == ConnectionState::Closed {
                    return;
                }
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }
        });
    }

    async fn resubscribe_all(&self) {
        let entries: Vec<(u32, u32, u32, u32, SubscriptionOptions)> = {
            let subs = self.inner.subscriptions.lock().unwrap();
            subs.iter()
                .map(|(&old_handle, e)| (old_handle, e.index_group, e.index_offset, e.length, e.options))
                .collect()
        };

        for (old_handle, index_group, index_offset, length, options) in entries {
            match self
                .add_device_notification(index_group, index_offset, length, options)
                .await
            {
                Ok(new_handle) => {
                    let mut subs = self.inner.subscriptions.lock().unwrap();
                    if let Some(entry) = subs.remove(&old_handle) {
                        subs.insert(new_handle, entry);
                    }
                    tracing::debug!(old_handle, new_handle, "resubscribed after reconnect");
                }
                Err(e) => {
                    tracing::warn!(error = %e, old_handle, "failed to resubscribe after reconnect");
                }
            }
        }
    }

    /// Installs the transport-level notification sink whenever a fresh
    /// transport becomes available, demultiplexing into per-subscription
    /// delivery queues (§4.5).
    fn install_notification_sink(&self) {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut seen: Option<*const ()> = None;
            loop {
                let Some(inner) = weak.upgrade() else { return };
                if let Some(transport) = inner.manager.transport().await {
                    let ptr = Arc::as_ptr(&transport) as *const ();
                    if seen != Some(ptr) {
                        seen = Some(ptr);
                        let inner_for_handler = Arc::downgrade(&inner);
                        transport.set_notification_handler(Arc::new(move |packet: Packet| {
                            if let Some(inner) = inner_for_handler.upgrade() {
                                dispatch_notification(&inner, packet);
                            }
                        }));
                    }
                }
                if inner.manager.state() == ConnectionState::Closed {
                    return;
                }
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }
        });
    }

    async fn transport(&self) -> Result<Arc<Transport>> {
        self.inner
            .manager
            .transport()
            .await
            .ok_or(ClientError::ConnectionClosed)
    }

    fn next_invoke_id(&self, transport: &Transport) -> u32 {
        transport.next_invoke_id()
    }

    fn next_local_port(&self) -> u16 {
        // Mirrors source_port selection for multiple logical clients sharing
        // one NetId; not a router-assigned port (router registration is
        // out of scope, see DESIGN.md).
        (32000 + self.inner.local_port_counter.fetch_add(1, Ordering::Relaxed) % 1000) as u16
    }

    /// Issues `command` with `payload`, strips the leading 4-byte ADS
    /// result code, and returns the remaining command-specific bytes.
    async fn call(&self, command: AdsCommand, payload: Vec<u8>) -> Result<Vec<u8>> {
        let transport = self.transport().await?;
        let invoke_id = self.next_invoke_id(&transport);

        let header = AdsHeader::new(
            self.inner.target_addr,
            self.inner.local_addr,
            command,
            StateFlag::tcp_ads_request(),
            payload.len() as u32,
            AdsReturnCode::Ok,
            invoke_id,
        );
        let request = Packet::new(header, payload);

        self.inner
            .config
            .metrics
            .record(crate::metrics::names::OPERATIONS, 1, &[("op", command_name(command))]);

        let response = match transport
            .send_request(request, Some(self.inner.config.timeout))
            .await
        {
            Ok(response) => response,
            Err(e) => {
                self.inner.config.metrics.record(
                    crate::metrics::names::OPERATION_ERRORS,
                    1,
                    &[("op", command_name(command))],
                );
                return Err(e.into());
            }
        };

        if response.header().error_code() != AdsReturnCode::Ok {
            return Err(ClientError::Ads(response.header().error_code()));
        }

        let data = response.data();
        if data.len() < 4 {
            return Err(ClientError::UnexpectedResponse);
        }
        let result = AdsReturnCode::from_bytes(data[0..4].try_into().unwrap());
        if result != AdsReturnCode::Ok {
            return Err(ClientError::Ads(result));
        }
        Ok(data[4..].to_vec())
    }

    /// `ReadDeviceInfo` (0x0001).
    pub async fn read_device_info(&self) -> Result<DeviceInfo> {
        let body = self.call(AdsCommand::AdsReadDeviceInfo, Vec::new()).await?;
        if body.len() < 20 {
            return Err(ClientError::UnexpectedResponse);
        }
        let major = body[0];
        let minor = body[1];
        let build = u16::from_le_bytes([body[2], body[3]]);
        let name_end = body[4..20].iter().position(|&b| b == 0).unwrap_or(16);
        let name = String::from_utf8_lossy(&body[4..4 + name_end]).into_owned();
        Ok(DeviceInfo {
            major,
            minor,
            build,
            name,
        })
    }

    /// `ReadState` (0x0004).
    pub async fn read_state(&self) -> Result<DeviceStatus> {
        let body = self.call(AdsCommand::AdsReadState, Vec::new()).await?;
        if body.len() < 4 {
            return Err(ClientError::UnexpectedResponse);
        }
        Ok(DeviceStatus {
            ads_state: AdsState::from_bytes([body[0], body[1]]),
            device_state: u16::from_le_bytes([body[2], body[3]]),
        })
    }

    /// `WriteControl` (0x0005).
    pub async fn write_control(&self, ads_state: AdsState, device_state: u16, data: &[u8]) -> Result<()> {
        let mut payload = Vec::with_capacity(8 + data.len());
        payload.extend_from_slice(&ads_state.to_bytes());
        payload.extend_from_slice(&device_state.to_le_bytes());
        payload.extend_from_slice(&(data.len() as u32).to_le_bytes());
        payload.extend_from_slice(data);
        self.call(AdsCommand::AdsWriteControl, payload).await?;
        Ok(())
    }

    /// `Read` (0x0002).
    pub async fn read(&self, index_group: u32, index_offset: u32, length: u32) -> Result<Vec<u8>> {
        let mut payload = Vec::with_capacity(12);
        payload.extend_from_slice(&index_group.to_le_bytes());
        payload.extend_from_slice(&index_offset.to_le_bytes());
        payload.extend_from_slice(&length.to_le_bytes());
        let body = self.call(AdsCommand::AdsRead, payload).await?;
        if body.len() < 4 {
            return Err(ClientError::UnexpectedResponse);
        }
        let returned_len = u32::from_le_bytes(body[0..4].try_into().unwrap()) as usize;
        let data = &body[4..];
        if data.len() < returned_len {
            return Err(ClientError::UnexpectedResponse);
        }
        Ok(data[..returned_len].to_vec())
    }

    /// `Write` (0x0003).
    pub async fn write(&self, index_group: u32, index_offset: u32, bytes: &[u8]) -> Result<()> {
        let mut payload = Vec::with_capacity(12 + bytes.len());
        payload.extend_from_slice(&index_group.to_le_bytes());
        payload.extend_from_slice(&index_offset.to_le_bytes());
        payload.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        payload.extend_from_slice(bytes);
        self.call(AdsCommand::AdsWrite, payload).await?;
        Ok(())
    }

    /// `ReadWrite` (0x0009).
    pub async fn read_write(
        &self,
        index_group: u32,
        index_offset: u32,
        read_length: u32,
        bytes: &[u8],
    ) -> Result<Vec<u8>> {
        let mut payload = Vec::with_capacity(16 + bytes.len());
        payload.extend_from_slice(&index_group.to_le_bytes());
        payload.extend_from_slice(&index_offset.to_le_bytes());
        payload.extend_from_slice(&read_length.to_le_bytes());
        payload.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        payload.extend_from_slice(bytes);
        let body = self.call(AdsCommand::AdsReadWrite, payload).await?;
        if body.len() < 4 {
            return Err(ClientError::UnexpectedResponse);
        }
        let returned_len = u32::from_le_bytes(body[0..4].try_into().unwrap()) as usize;
        let data = &body[4..];
        if data.len() < returned_len {
            return Err(ClientError::UnexpectedResponse);
        }
        Ok(data[..returned_len].to_vec())
    }

    /// Acquires a short-lived symbol handle for `name` via `0xF003`.
    pub async fn get_symbol_handle(&self, name: &str) -> Result<u32> {
        let mut name_bytes = name.as_bytes().to_vec();
        name_bytes.push(0);
        let response = self
            .read_write(index_group::SYMBOL_HANDLE_BY_NAME, 0, 4, &name_bytes)
            .await?;
        if response.len() < 4 {
            return Err(ClientError::UnexpectedResponse);
        }
        Ok(u32::from_le_bytes(response[0..4].try_into().unwrap()))
    }

    /// Releases a handle previously obtained from [`Client::get_symbol_handle`].
    pub async fn release_symbol_handle(&self, handle: u32) -> Result<()> {
        self.write(index_group::RELEASE_SYMBOL_HANDLE, 0, &handle.to_le_bytes())
            .await
    }

    /// Loads the registry's symbol cache, e.g. from a prior `UploadSymbols`.
    /// Exposed for callers that populate the cache explicitly rather than
    /// via [`Client::upload_symbols`].
    pub fn load_symbols(&self, symbols: Vec<Symbol>) {
        self.inner.registry.lock().unwrap().load(symbols);
    }

    /// Runs the full symbol/type acquisition protocol of §4.4:
    /// `GetSymbolUploadInfo` (`0xF00F`) to size the upload, then
    /// `UploadTypes` (`0xF00E`) and `UploadSymbols` (`0xF00B`), and loads the
    /// result into the registry. Types are uploaded first so symbols can be
    /// cross-referenced against them in one pass.
    pub async fn upload_symbols(&self) -> Result<()> {
        let info_bytes = self
            .read(index_group::SYMBOL_UPLOAD_INFO, 0, 24)
            .await?;
        let info = registry::parse_symbol_upload_info(&info_bytes)?;

        let type_bytes = self
            .read(index_group::TYPE_UPLOAD, 0, info.type_data_length)
            .await?;
        let types = registry::parse_type_table(&type_bytes)?;

        let symbol_bytes = self
            .read(index_group::SYMBOL_UPLOAD, 0, info.symbol_data_length)
            .await?;
        let symbols = registry::parse_symbol_table(&symbol_bytes, &types)?;

        self.inner.registry.lock().unwrap().load(symbols);
        Ok(())
    }

    /// Resolves `path` against the registry, falling back to handle mode
    /// (`0xF005` + a freshly acquired symbol handle) for symbols reporting
    /// [`registry::index_group::HANDLE_ONLY_SENTINEL`] — those with no raw
    /// `(group, offset)` address (§4.4). The handle, if any was acquired, is
    /// returned alongside so callers can release it after use.
    async fn resolve(&self, path: &str) -> Result<(u32, u32, u32, TypeInfo, Option<u32>)> {
        let (group, offset, size, type_info) = self.inner.registry.lock().unwrap().resolve(path)?;
        if group == registry::index_group::HANDLE_ONLY_SENTINEL {
            let handle = self.get_symbol_handle(path).await?;
            return Ok((
                registry::index_group::READ_WRITE_SYMBOL_VALUE_BY_HANDLE,
                handle,
                size,
                type_info,
                Some(handle),
            ));
        }
        Ok((group, offset, size, type_info, None))
    }

    /// Best-effort release of a handle acquired by [`Client::resolve`]'s
    /// handle-mode fallback; errors are logged, not propagated, since the
    /// caller's own result (read/write success or failure) already happened.
    async fn release_resolved_handle(&self, handle: Option<u32>) {
        if let Some(handle) = handle {
            if let Err(e) = self.release_symbol_handle(handle).await {
                tracing::debug!(handle, error = %e, "failed to release handle-mode symbol handle");
            }
        }
    }

    /// Resolves `name` via the registry and issues a raw `read`.
    pub async fn read_symbol(&self, name: &str) -> Result<Vec<u8>> {
        let (group, offset, size, _, handle) = self.resolve(name).await?;
        let result = self.read(group, offset, size).await;
        self.release_resolved_handle(handle).await;
        result
    }

    /// Resolves `name` via the registry and issues a raw `write`.
    pub async fn write_symbol(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let (group, offset, _, _, handle) = self.resolve(name).await?;
        let result = self.write(group, offset, bytes).await;
        self.release_resolved_handle(handle).await;
        result
    }

    /// Resolves, reads, and parses `name` into a dynamic [`Value`].
    pub async fn read_symbol_value(&self, name: &str) -> Result<Value> {
        let (group, offset, size, type_info, handle) = self.resolve(name).await?;
        let result = self.read(group, offset, size).await;
        self.release_resolved_handle(handle).await;
        Ok(registry::parse(&result?, &type_info)?)
    }

    /// Resolves, encodes, and writes `value` to `name`.
    pub async fn write_symbol_value(&self, name: &str, value: &Value) -> Result<()> {
        let (group, offset, _, type_info, handle) = self.resolve(name).await?;
        let bytes = registry::encode(value, &type_info)?;
        let result = self.write(group, offset, &bytes).await;
        self.release_resolved_handle(handle).await;
        result
    }

    /// Read-modify-write of a subset of a struct symbol's fields. An empty
    /// `fields` map performs no network I/O (§8 boundary behavior).
    ///
    /// Not internally synchronized against concurrent writers to the same
    /// struct; callers issuing concurrent `write_struct_fields` against the
    /// same symbol must serialize externally.
    pub async fn write_struct_fields(&self, name: &str, fields: HashMap<String, Value>) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }

        let (group, offset, size, type_info, handle) = self.resolve(name).await?;
        let outcome = self
            .write_struct_fields_at(group, offset, size, &type_info, fields)
            .await;
        self.release_resolved_handle(handle).await;
        outcome
    }

    async fn write_struct_fields_at(
        &self,
        group: u32,
        offset: u32,
        size: u32,
        type_info: &TypeInfo,
        fields: HashMap<String, Value>,
    ) -> Result<()> {
        let current = self.read(group, offset, size).await?;
        let mut value = registry::parse(&current, type_info)?;

        let Value::Struct(struct_fields) = &mut value else {
            return Err(crate::error::ResolveError::NotAStruct {
                type_name: type_info.name.clone(),
            }
            .into());
        };

        for (field_name, new_value) in fields {
            match struct_fields.iter_mut().find(|(n, _)| *n == field_name) {
                Some((_, slot)) => *slot = new_value,
                None => {
                    return Err(crate::error::ResolveError::FieldNotFound {
                        type_name: type_info.name.clone(),
                        field: field_name,
                    }
                    .into());
                }
            }
        }

        let encoded = registry::encode(&value, type_info)?;
        self.write(group, offset, &encoded).await
    }

    async fn add_device_notification(
        &self,
        index_group: u32,
        index_offset: u32,
        length: u32,
        options: SubscriptionOptions,
    ) -> Result<u32> {
        let mut payload = Vec::with_capacity(40);
        payload.extend_from_slice(&index_group.to_le_bytes());
        payload.extend_from_slice(&index_offset.to_le_bytes());
        payload.extend_from_slice(&length.to_le_bytes());
        payload.extend_from_slice(&(options.transmission_mode as u32).to_le_bytes());
        payload.extend_from_slice(&options.max_delay_ms.to_le_bytes());
        payload.extend_from_slice(&options.cycle_time_ms.to_le_bytes());
        payload.extend_from_slice(&[0u8; 16]);

        let body = self
            .call(AdsCommand::AdsAddDeviceNotification, payload)
            .await?;
        if body.len() < 4 {
            return Err(ClientError::UnexpectedResponse);
        }
        Ok(u32::from_le_bytes(body[0..4].try_into().unwrap()))
    }

    /// `AddDeviceNotification` (0x0006). Returns a [`Subscription`] whose
    /// `recv` yields `(timestamp, data)` samples until the connection closes.
    pub async fn subscribe(
        &self,
        index_group: u32,
        index_offset: u32,
        length: u32,
        options: SubscriptionOptions,
    ) -> Result<Subscription> {
        let handle = self
            .add_device_notification(index_group, index_offset, length, options)
            .await?;

        let (sender, receiver) = mpsc::channel(64);
        self.inner.subscriptions.lock().unwrap().insert(
            handle,
            SubscriptionEntry {
                index_group,
                index_offset,
                length,
                options,
                sender,
            },
        );

        Ok(Subscription { handle, receiver })
    }

    /// `DeleteDeviceNotification` (0x0007).
    pub async fn unsubscribe(&self, sub: Subscription) -> Result<()> {
        self.inner.subscriptions.lock().unwrap().remove(&sub.handle);
        self.call(
            AdsCommand::AdsDeleteDeviceNotification,
            sub.handle.to_le_bytes().to_vec(),
        )
        .await?;
        Ok(())
    }

    /// Current connection-manager state.
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.manager.state()
    }

    /// Closes the connection manager and its transport.
    pub async fn close(&self, timeout: std::time::Duration) {
        self.inner.manager.close(timeout).await;
    }
}

fn command_name(command: AdsCommand) -> &'static str {
    match command {
        AdsCommand::AdsReadDeviceInfo => "read_device_info",
        AdsCommand::AdsRead => "read",
        AdsCommand::AdsWrite => "write",
        AdsCommand::AdsReadState => "read_state",
        AdsCommand::AdsWriteControl => "write_control",
        AdsCommand::AdsAddDeviceNotification => "subscribe",
        AdsCommand::AdsDeleteDeviceNotification => "unsubscribe",
        AdsCommand::AdsDeviceNotification => "notification",
        AdsCommand::AdsReadWrite => "read_write",
        AdsCommand::Invalid | AdsCommand::Unknown(_) => "unknown",
    }
}

/// Splits a notification packet's payload per §4.5's layout and routes each
/// sample to its subscription's delivery queue.
fn dispatch_notification(inner: &Inner, packet: Packet) {
    let data = packet.data();
    if data.len() < 4 {
        tracing::warn!("truncated notification payload");
        return;
    }
    let stamp_count = u32::from_le_bytes(data[0..4].try_into().unwrap()) as usize;
    let mut cursor = 4;
    let subs = inner.subscriptions.lock().unwrap();

    for _ in 0..stamp_count {
        if cursor + 12 > data.len() {
            tracing::warn!("truncated notification stamp header");
            return;
        }
        let timestamp = tcads_core::ads::WindowsFileTime::from_bytes(
            data[cursor..cursor + 8].try_into().unwrap(),
        );
        let sample_count = u32::from_le_bytes(data[cursor + 8..cursor + 12].try_into().unwrap()) as usize;
        cursor += 12;

        for _ in 0..sample_count {
            if cursor + 8 > data.len() {
                tracing::warn!("truncated notification sample header");
                return;
            }
            let handle = u32::from_le_bytes(data[cursor..cursor + 4].try_into().unwrap());
            let size = u32::from_le_bytes(data[cursor + 4..cursor + 8].try_into().unwrap()) as usize;
            cursor += 8;
            if cursor + size > data.len() {
                tracing::warn!("truncated notification sample data");
                return;
            }
            let sample = data[cursor..cursor + size].to_vec();
            cursor += size;

            if let Some(entry) = subs.get(&handle) {
                let _ = entry.sender.try_send((timestamp, sample));
            } else {
                tracing::debug!(handle, "notification for unknown subscription handle");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{DataTypeTag, FieldInfo};
    use tcads_core::ads::{AdsReturnCode, StateFlag};
    use tcads_core::ams::AmsNetId;
    use tcads_core::io::tokio::AmsStream;
    use tokio::net::TcpListener;

    fn reply_header(request: &AdsHeader, length: u32) -> AdsHeader {
        AdsHeader::new(
            *request.source(),
            *request.target(),
            request.command_id(),
            StateFlag::tcp_ads_response(),
            length,
            AdsReturnCode::Ok,
            request.invoke_id(),
        )
    }

    #[tokio::test]
    async fn echo_read_state_returns_decoded_status() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let stream = AmsStream::new(socket);
            let (mut reader, mut writer) = stream.into_split();

            let request = tcads_core::packet::read_packet(&mut reader).await.unwrap();
            let mut body = vec![0u8; 4];
            body.extend_from_slice(&5u16.to_le_bytes());
            body.extend_from_slice(&0u16.to_le_bytes());
            let response = Packet::new(reply_header(request.header(), body.len() as u32), body);
            tcads_core::packet::write_packet(&mut writer, &response)
                .await
                .unwrap();
        });

        let config = ClientConfig::new(addr.to_string(), AmsNetId::new(127, 0, 0, 1, 1, 1))
            .with_timeout(std::time::Duration::from_secs(1));
        let client = Client::connect(config);

        let status = client.read_state().await.unwrap();
        assert_eq!(status.ads_state, AdsState::Run);
        assert_eq!(status.device_state, 0);

        server.await.unwrap();
        client.close(std::time::Duration::from_millis(100)).await;
    }

    #[tokio::test]
    async fn write_struct_fields_is_a_noop_for_empty_map() {
        // No server listening at all; a real I/O attempt would hang/fail.
        let config = ClientConfig::new("127.0.0.1:1", AmsNetId::new(127, 0, 0, 1, 1, 1))
            .with_timeout(std::time::Duration::from_millis(50));
        let client = Client::connect(config);

        let result = client
            .write_struct_fields("MAIN.aStruct", HashMap::new())
            .await;
        assert!(result.is_ok());
    }

    /// Builds one `UploadSymbols` entry for a primitive `UINT` symbol, per
    /// the layout parsed by [`crate::registry::parse_symbol_table`].
    fn uint_symbol_entry_bytes(name: &str, index_group: u32, index_offset: u32) -> Vec<u8> {
        let type_name = "UINT";
        let mut body = Vec::new();
        body.extend_from_slice(&index_group.to_le_bytes());
        body.extend_from_slice(&index_offset.to_le_bytes());
        body.extend_from_slice(&2u32.to_le_bytes()); // size
        body.extend_from_slice(&6u32.to_le_bytes()); // DataTypeTag::UInt16
        body.extend_from_slice(&0u32.to_le_bytes()); // flags
        body.extend_from_slice(&(name.len() as u16).to_le_bytes());
        body.extend_from_slice(&(type_name.len() as u16).to_le_bytes());
        body.extend_from_slice(&0u16.to_le_bytes()); // comment_len
        body.extend_from_slice(name.as_bytes());
        body.push(0);
        body.extend_from_slice(type_name.as_bytes());
        body.push(0);
        body.push(0); // empty comment terminator

        let mut entry = ((4 + body.len()) as u32).to_le_bytes().to_vec();
        entry.extend_from_slice(&body);
        entry
    }

    /// Wraps `data` as a successful `Read` response body: ADS result code,
    /// returned length, then the bytes themselves.
    fn read_response_body(data: &[u8]) -> Vec<u8> {
        let mut body = vec![0u8; 4];
        body.extend_from_slice(&(data.len() as u32).to_le_bytes());
        body.extend_from_slice(data);
        body
    }

    #[tokio::test]
    async fn upload_symbols_populates_the_registry_from_the_wire() {
        let symbol_bytes = uint_symbol_entry_bytes("MAIN.uTest", 0x4020, 100);
        let mut info_bytes = Vec::new();
        info_bytes.extend_from_slice(&1u32.to_le_bytes()); // symbol_count
        info_bytes.extend_from_slice(&(symbol_bytes.len() as u32).to_le_bytes());
        info_bytes.extend_from_slice(&0u32.to_le_bytes()); // type_count
        info_bytes.extend_from_slice(&0u32.to_le_bytes()); // type_data_length
        info_bytes.extend_from_slice(&[0u8; 8]);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let stream = AmsStream::new(socket);
            let (mut reader, mut writer) = stream.into_split();

            // GetSymbolUploadInfo
            let request = tcads_core::packet::read_packet(&mut reader).await.unwrap();
            let response = Packet::new(
                reply_header(request.header(), 0),
                read_response_body(&info_bytes),
            );
            tcads_core::packet::write_packet(&mut writer, &response)
                .await
                .unwrap();

            // UploadTypes (empty)
            let request = tcads_core::packet::read_packet(&mut reader).await.unwrap();
            let response = Packet::new(
                reply_header(request.header(), 0),
                read_response_body(&[]),
            );
            tcads_core::packet::write_packet(&mut writer, &response)
                .await
                .unwrap();

            // UploadSymbols
            let request = tcads_core::packet::read_packet(&mut reader).await.unwrap();
            let response = Packet::new(
                reply_header(request.header(), 0),
                read_response_body(&symbol_bytes),
            );
            tcads_core::packet::write_packet(&mut writer, &response)
                .await
                .unwrap();

            // Read of MAIN.uTest's value
            let request = tcads_core::packet::read_packet(&mut reader).await.unwrap();
            let response = Packet::new(
                reply_header(request.header(), 0),
                read_response_body(&7u16.to_le_bytes()),
            );
            tcads_core::packet::write_packet(&mut writer, &response)
                .await
                .unwrap();
        });

        let config = ClientConfig::new(addr.to_string(), AmsNetId::new(127, 0, 0, 1, 1, 1))
            .with_timeout(std::time::Duration::from_secs(1));
        let client = Client::connect(config);

        client.upload_symbols().await.unwrap();
        let value = client.read_symbol_value("MAIN.uTest").await.unwrap();
        assert_eq!(value, crate::registry::Value::UInt16(7));

        server.await.unwrap();
        client.close(std::time::Duration::from_millis(100)).await;
    }

    #[test]
    fn struct_field_type_info_constructs() {
        let type_info = TypeInfo {
            name: "ST_Test".to_string(),
            base_type: DataTypeTag::Struct,
            size: 2,
            element_type: None,
            array_bounds: Vec::new(),
            fields: vec![FieldInfo {
                name: "iTest".to_string(),
                offset: 0,
                type_info: TypeInfo::int16(),
            }],
        };
        assert!(type_info.is_struct());
    }
}
