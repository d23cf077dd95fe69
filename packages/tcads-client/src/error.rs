//! Error types for the client, connection manager, transport, and symbol
//! registry, plus the classification scheme of §4.5/§7: every error carries
//! a [`Category`] and an [`is_retryable`](ClientError::is_retryable) bit.

use tcads_core::ads::AdsReturnCode;
use thiserror::Error;

/// The broad classification an error falls under, per the error-handling design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Connect refused/reset, read/write I/O failures.
    Network,
    /// Context deadline or per-request timeout elapsed.
    Timeout,
    /// Malformed packet, unexpected command, length mismatch.
    Protocol,
    /// Non-zero ADS result code.
    Ads,
    /// Symbol/type resolution failures.
    Resolution,
    /// Explicit cancellation.
    Cancelled,
}

/// Errors raised by [`crate::transport::Transport`].
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    ConnectFailed(#[source] std::io::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Format(#[from] tcads_core::FormatError),

    #[error("request timed out")]
    Timeout,

    #[error("connection closed")]
    ConnectionClosed,
}

/// Errors raised by [`crate::manager::ConnectionManager`].
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("manager is closed")]
    Closed,

    #[error("health check failed after {0} consecutive probes")]
    HealthCheckFailed(u32),
}

/// Errors raised while resolving symbol paths or parsing/encoding values (C4).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("field `{field}` not found on type `{type_name}`")]
    FieldNotFound { type_name: String, field: String },

    #[error("index {index} out of range [{lo}, {hi}] for dimension {dimension}")]
    IndexOutOfRange {
        dimension: usize,
        index: i32,
        lo: i32,
        hi: i32,
    },

    #[error("expected a struct type, found `{type_name}`")]
    NotAStruct { type_name: String },

    #[error("expected an array type, found `{type_name}`")]
    NotAnArray { type_name: String },

    #[error("expected {expected} array indices, got {got}")]
    WrongIndexCount { expected: usize, got: usize },
}

/// Errors raised while parsing/encoding dynamic [`crate::registry::Value`]s.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValueError {
    #[error("buffer too short: expected at least {expected} bytes, got {got}")]
    ShortBuffer { expected: usize, got: usize },

    #[error("value does not match type `{type_name}`")]
    TypeMismatch { type_name: String },

    #[error("string is not valid for its declared encoding")]
    InvalidEncoding,
}

/// Top-level error returned by the client façade (C5).
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Manager(#[from] ManagerError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Value(#[from] ValueError),

    #[error("target returned ADS error {0:?}")]
    Ads(AdsReturnCode),

    #[error("operation timed out")]
    Timeout,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("operation cancelled")]
    Cancelled,

    #[error("unexpected response type")]
    UnexpectedResponse,
}

impl ClientError {
    /// The broad category this error falls under.
    pub fn category(&self) -> Category {
        match self {
            ClientError::Transport(TransportError::ConnectFailed(_))
            | ClientError::Transport(TransportError::Io(_))
            | ClientError::ConnectionClosed
            | ClientError::Transport(TransportError::ConnectionClosed) => Category::Network,

            ClientError::Transport(TransportError::Timeout) | ClientError::Timeout => {
                Category::Timeout
            }

            ClientError::Transport(TransportError::Format(_)) | ClientError::UnexpectedResponse => {
                Category::Protocol
            }

            ClientError::Manager(_) => Category::Network,

            ClientError::Ads(_) => Category::Ads,

            ClientError::Resolve(_) | ClientError::Value(_) => Category::Resolution,

            ClientError::Cancelled => Category::Cancelled,
        }
    }

    /// Whether a caller can reasonably retry this operation.
    ///
    /// `Ads` errors are retryable only for a handful of transient codes
    /// (e.g. device busy); everything else in that category is terminal.
    pub fn is_retryable(&self) -> bool {
        match self.category() {
            Category::Network | Category::Timeout => true,
            Category::Protocol | Category::Resolution | Category::Cancelled => false,
            Category::Ads => matches!(
                self,
                ClientError::Ads(
                    AdsReturnCode::AdsErrDeviceBusy | AdsReturnCode::AdsErrDeviceTimeout
                )
            ),
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
