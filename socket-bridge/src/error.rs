//! Error taxonomy.
//!
//! Three families of failure reach the application, and each travels a
//! different way:
//! - [`SocketError`]: synchronous, returned directly from a caller-facing
//!   call (`send`, `recv`, `bind`, ...).  Covers state errors, flow-control
//!   errors (`WouldBlock`) and stale handles.
//! - [`TransportError`]: asynchronous, reported by the native transport and
//!   delivered only through the error callback or a per-call completion.
//!   Never closes the socket on its own.
//! - [`DispatchError`]: a programming error detected while routing an inbound
//!   event (e.g. a completion for a call that was never issued).  Returned from
//!   [`crate::network::Network::dispatch`] and never swallowed.

use thiserror::Error;

use crate::pending::CallId;
use crate::registry::Handle;
use crate::state::{Operation, SocketState};

/// Error codes carried on the wire by transport events.
///
/// The numeric values are stable; they are what the native side sends.
#[repr(u32)]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    #[error("unknown error")]
    Unknown = 1,
    #[error("invalid argument")]
    Invalid = 2,
    #[error("operation not supported")]
    NotSupported = 3,
    #[error("operation would block, try again")]
    WouldBlock = 4,
    #[error("address already in use")]
    AddrInUse = 5,
    #[error("out of memory")]
    NoMemory = 6,
    #[error("socket is not connected")]
    NotConnected = 7,
    #[error("connection timed out")]
    ConnectionTimeout = 8,
    #[error("shutdown timed out")]
    ShutdownTimeout = 9,
    #[error("TLS failure")]
    TlsError = 10,
    #[error("destination unreachable")]
    Unreachable = 11,
    #[error("connection refused")]
    ConnectionRefused = 12,
}

impl ErrorCode {
    /// Map a raw wire value back to a code.  Unrecognised values become
    /// [`ErrorCode::Unknown`].
    pub fn from_code(code: u32) -> Self {
        match code {
            2 => Self::Invalid,
            3 => Self::NotSupported,
            4 => Self::WouldBlock,
            5 => Self::AddrInUse,
            6 => Self::NoMemory,
            7 => Self::NotConnected,
            8 => Self::ConnectionTimeout,
            9 => Self::ShutdownTimeout,
            10 => Self::TlsError,
            11 => Self::Unreachable,
            12 => Self::ConnectionRefused,
            _ => Self::Unknown,
        }
    }

    pub fn code(self) -> u32 {
        self as u32
    }
}

/// A failure reported asynchronously by the transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {description}")]
pub struct TransportError {
    pub code: ErrorCode,
    pub description: String,
}

impl TransportError {
    pub fn new(code: ErrorCode, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
        }
    }
}

/// Synchronous errors returned by caller-facing socket operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SocketError {
    /// No data / no credit right now; retry after the readable or writable
    /// callback fires.
    #[error("operation would block")]
    WouldBlock,
    /// The operation is not legal in the socket's current state.  Nothing was
    /// changed.
    #[error("{op} is not valid while the socket is {state}")]
    InvalidState { op: Operation, state: SocketState },
    /// The socket's protocol or security mode can never perform this.
    #[error("not supported: {0}")]
    NotSupported(&'static str),
    /// A destination is required but the socket has no peer.
    #[error("socket is not connected and no destination was given")]
    NotConnected,
    /// The handle was closed (or never issued by this registry).
    #[error("stale or unknown socket handle {0}")]
    InvalidHandle(Handle),
    /// Malformed argument.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
}

/// Programming errors detected while dispatching inbound events.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// A completion arrived for a correlation id that is neither outstanding
    /// nor retired by `close()`.  Indicates a double completion upstream.
    #[error("completion for unknown call {call} on {handle}")]
    UnknownCall { handle: Handle, call: CallId },
    /// An inbound connection was announced on a socket that is not listening.
    #[error("accepted connection delivered to {handle}, which is {state}")]
    NotListening { handle: Handle, state: SocketState },
}
