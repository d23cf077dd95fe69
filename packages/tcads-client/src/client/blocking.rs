//! A synchronous wrapper around [`crate::client::Client`] for callers that
//! don't want to pull in an async runtime themselves.
//!
//! Owns a dedicated multi-threaded [`tokio::runtime::Runtime`] and blocks the
//! calling thread on each operation via [`Runtime::block_on`](tokio::runtime::Runtime::block_on).
//! Matches the async API one-for-one; see [`crate::client::Client`] for the
//! semantics of each operation.

use crate::client::{
    Client as AsyncClient, DeviceInfo, DeviceStatus, Subscription as AsyncSubscription,
    SubscriptionOptions,
};
use crate::config::ClientConfig;
use crate::error::Result;
use crate::manager::ConnectionState;
use crate::registry::{Symbol, Value};
use std::collections::HashMap;
use tcads_core::ads::{AdsState, WindowsFileTime};

/// Blocking handle onto an async [`AsyncClient`].
pub struct Client {
    inner: AsyncClient,
    runtime: tokio::runtime::Runtime,
}

impl Client {
    /// Builds a private runtime and starts connecting per `config`.
    pub fn connect(config: ClientConfig) -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        // `Client::connect` spawns background tasks, which requires an
        // active Tokio reactor context; `block_on` provides one even though
        // `connect` itself never awaits.
        let inner = runtime.block_on(async { AsyncClient::connect(config) });
        Ok(Self { inner, runtime })
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.connection_state()
    }

    pub fn load_symbols(&self, symbols: Vec<Symbol>) {
        self.inner.load_symbols(symbols);
    }

    /// Runs the `GetSymbolUploadInfo`/`UploadTypes`/`UploadSymbols`
    /// acquisition protocol and populates the registry from it.
    pub fn upload_symbols(&self) -> Result<()> {
        self.runtime.block_on(self.inner.upload_symbols())
    }

    pub fn read_device_info(&self) -> Result<DeviceInfo> {
        self.runtime.block_on(self.inner.read_device_info())
    }

    pub fn read_state(&self) -> Result<DeviceStatus> {
        self.runtime.block_on(self.inner.read_state())
    }

    pub fn write_control(&self, ads_state: AdsState, device_state: u16, data: &[u8]) -> Result<()> {
        self.runtime
            .block_on(self.inner.write_control(ads_state, device_state, data))
    }

    pub fn read(&self, index_group: u32, index_offset: u32, length: u32) -> Result<Vec<u8>> {
        self.runtime
            .block_on(self.inner.read(index_group, index_offset, length))
    }

    pub fn write(&self, index_group: u32, index_offset: u32, bytes: &[u8]) -> Result<()> {
        self.runtime
            .block_on(self.inner.write(index_group, index_offset, bytes))
    }

    pub fn read_write(
        &self,
        index_group: u32,
        index_offset: u32,
        read_length: u32,
        bytes: &[u8],
    ) -> Result<Vec<u8>> {
        self.runtime.block_on(
            self.inner
                .read_write(index_group, index_offset, read_length, bytes),
        )
    }

    pub fn get_symbol_handle(&self, name: &str) -> Result<u32> {
        self.runtime.block_on(self.inner.get_symbol_handle(name))
    }

    pub fn release_symbol_handle(&self, handle: u32) -> Result<()> {
        self.runtime.block_on(self.inner.release_symbol_handle(handle))
    }

    pub fn read_symbol(&self, name: &str) -> Result<Vec<u8>> {
        self.runtime.block_on(self.inner.read_symbol(name))
    }

    pub fn write_symbol(&self, name: &str, bytes: &[u8]) -> Result<()> {
        self.runtime.block_on(self.inner.write_symbol(name, bytes))
    }

    pub fn read_symbol_value(&self, name: &str) -> Result<Value> {
        self.runtime.block_on(self.inner.read_symbol_value(name))
    }

    pub fn write_symbol_value(&self, name: &str, value: &Value) -> Result<()> {
        self.runtime
            .block_on(self.inner.write_symbol_value(name, value))
    }

    pub fn write_struct_fields(&self, name: &str, fields: HashMap<String, Value>) -> Result<()> {
        self.runtime
            .block_on(self.inner.write_struct_fields(name, fields))
    }

    pub fn subscribe(
        &self,
        index_group: u32,
        index_offset: u32,
        length: u32,
        options: SubscriptionOptions,
    ) -> Result<Subscription<'_>> {
        let inner = self
            .runtime
            .block_on(self.inner.subscribe(index_group, index_offset, length, options))?;
        Ok(Subscription {
            inner,
            runtime: &self.runtime,
        })
    }

    pub fn unsubscribe(&self, sub: Subscription<'_>) -> Result<()> {
        self.runtime.block_on(self.inner.unsubscribe(sub.inner))
    }

    /// Closes the connection, blocking up to `timeout` for a clean shutdown.
    pub fn close(&self, timeout: std::time::Duration) {
        self.runtime.block_on(self.inner.close(timeout));
    }
}

/// Blocking handle onto a live [`AsyncSubscription`].
pub struct Subscription<'a> {
    inner: AsyncSubscription,
    runtime: &'a tokio::runtime::Runtime,
}

impl Subscription<'_> {
    pub fn handle(&self) -> u32 {
        self.inner.handle
    }

    /// Blocks for the next `(timestamp, data)` sample. Returns `None` once
    /// the connection that created it has been closed.
    pub fn recv(&mut self) -> Option<(WindowsFileTime, Vec<u8>)> {
        self.runtime.block_on(self.inner.recv())
    }
}
