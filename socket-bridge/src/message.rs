//! Messages exchanged with the native transport.
//!
//! Every message is addressed by the [`crate::registry::Handle`] of the
//! socket it concerns; the channel guarantees in-order delivery per handle.
//! - [`Command`] flows outbound (socket layer → transport), fire-and-forget.
//! - [`Event`] flows inbound (transport → socket layer) as an upcall.
//!
//! How these are marshalled across the process boundary is the channel's
//! business; this module only fixes their shape.

use std::fmt;
use std::str::FromStr;

use crate::error::TransportError;
use crate::options::SocketOption;
use crate::pending::CallId;
use crate::state::{Protocol, Security};

/// A `(host, port)` pair.  Hosts are passed through unresolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Error returned when parsing an [`Endpoint`] from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("expected host:port, got {0:?}")]
pub struct ParseEndpointError(String);

impl FromStr for Endpoint {
    type Err = ParseEndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseEndpointError(s.to_string());
        let (host, port) = s.rsplit_once(':').ok_or_else(err)?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return Err(err());
        }
        let port = port.parse().map_err(|_| err())?;
        Ok(Self::new(host, port))
    }
}

/// Options for joining a multicast group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MembershipOptions {
    /// Receive our own multicast traffic.
    pub loopback: bool,
    /// Multicast time-to-live for outbound datagrams.
    pub ttl: Option<u8>,
}

impl Default for MembershipOptions {
    fn default() -> Self {
        Self {
            loopback: true,
            ttl: None,
        }
    }
}

/// Outbound messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Open a native socket for this handle.
    Create { protocol: Protocol, security: Security },
    /// Route the pending inbound connection `token` to this handle.
    Attach { token: u64 },
    Bind { call: CallId, port: u16 },
    Connect { peer: Endpoint },
    Listen,
    /// Transmit `payload`.  `destination` is only set for datagrams.
    Send {
        payload: Vec<u8>,
        destination: Option<Endpoint>,
    },
    /// The application consumed `bytes` of received stream data.
    Consumed { bytes: usize },
    Shutdown,
    Close,
    SetOption {
        call: CallId,
        option: SocketOption,
        value: i64,
    },
    GetOption { call: CallId, option: SocketOption },
    AddMembership {
        call: CallId,
        group: String,
        options: MembershipOptions,
    },
    DropMembership { call: CallId, group: String },
}

/// Successful result of a correlated call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// The call succeeded and returns nothing.
    Done,
    /// A bind completed on this local address.
    Bound(Endpoint),
    /// The value of a queried option.
    OptionValue(i64),
}

/// Inbound messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// An outbound connect finished.
    Connected { local: Endpoint, peer: Endpoint },
    /// Data arrived.  An empty stream payload means the peer closed.
    /// `source` is always set for datagrams.
    Data {
        payload: Vec<u8>,
        source: Option<Endpoint>,
    },
    /// A listener received a connection, identified by `token` until a handle
    /// is attached to it.
    Accepted { peer: Endpoint, token: u64 },
    /// The transport flushed `flushed` bytes; that much credit is returned.
    Credit { flushed: usize },
    Error(TransportError),
    CallComplete {
        call: CallId,
        result: Result<Completion, TransportError>,
    },
}
