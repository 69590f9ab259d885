//! Connection finite-state machine (FSM) types and the legality table.
//!
//! Every caller-facing operation is checked against [`check`] before it
//! touches buffers, credit or the message channel.  Transitions driven by the
//! transport (connect/bind completion) go through [`on_event`].  Keeping both
//! tables here, away from socket plumbing, means the whole state diagram can
//! be read and tested in one place.
//!
//! ```text
//!            connect                 Connected
//!  CLOSED ─────────────▶ CONNECTING ───────────▶ READY ──shutdown──▶ CLOSING
//!    │  │                                          ▲      (TCP only)
//!    │  └── send / Bound (UDP only) ───────────────┘
//!    │
//!    └── listen (TCP only) ──▶ LISTENING ◀─┐
//!                                  └───────┘ Accepted (queued for accept)
//!
//!  any ──close──▶ CLOSED (terminal; the handle is released)
//! ```

use std::fmt;

use crate::error::SocketError;

/// Transport protocol; fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// Stream oriented.
    Tcp,
    /// Message oriented.
    Udp,
}

impl Protocol {
    pub fn is_stream(self) -> bool {
        matches!(self, Self::Tcp)
    }
}

/// Transport security; fixed at creation and only meaningful for TCP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Security {
    #[default]
    None,
    Tls,
}

/// How the socket came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    /// Created by the application.
    #[default]
    Client,
    /// Produced by accepting an inbound connection on a listener.
    ServerAccepted,
}

/// All possible states of the socket FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SocketState {
    /// Initial state; also what a released handle reports.
    #[default]
    Closed,
    /// Connect requested; waiting for the transport.
    Connecting,
    /// Accepting inbound connections (TCP).
    Listening,
    /// Data may flow.
    Ready,
    /// Local side shut down; reads drain until end of stream (TCP).
    Closing,
}

impl fmt::Display for SocketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Closed => "closed",
            Self::Connecting => "connecting",
            Self::Listening => "listening",
            Self::Ready => "ready",
            Self::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// Caller-initiated operations subject to the legality table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Bind,
    Connect,
    Listen,
    Accept,
    Send,
    Recv,
    Shutdown,
    Close,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bind => "bind",
            Self::Connect => "connect",
            Self::Listen => "listen",
            Self::Accept => "accept",
            Self::Send => "send",
            Self::Recv => "recv",
            Self::Shutdown => "shutdown",
            Self::Close => "close",
        };
        f.write_str(name)
    }
}

/// Transport-driven transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    /// The transport finished an outbound connect.
    Connected,
    /// A bind call completed successfully.
    Bound,
}

/// Look up `op` in the legality table.
///
/// Returns the state the socket moves to, or the error to hand back to the
/// caller.  Operations the protocol can never perform yield
/// [`SocketError::NotSupported`]; operations that are merely out of order
/// yield [`SocketError::InvalidState`].
pub fn check(protocol: Protocol, state: SocketState, op: Operation) -> Result<SocketState, SocketError> {
    use Operation as Op;
    use Protocol::{Tcp, Udp};
    use SocketState as S;

    let next = match (protocol, op, state) {
        (_, Op::Close, _) => Some(S::Closed),

        (_, Op::Bind, S::Closed) => Some(S::Closed),
        (_, Op::Connect, S::Closed) => Some(S::Connecting),

        (Tcp, Op::Listen, S::Closed) => Some(S::Listening),
        (Udp, Op::Listen, _) => return Err(SocketError::NotSupported("listen on a datagram socket")),

        (Tcp, Op::Accept, S::Listening) => Some(S::Listening),
        (Udp, Op::Accept, _) => return Err(SocketError::NotSupported("accept on a datagram socket")),

        (Tcp, Op::Send, S::Ready) => Some(S::Ready),
        // Connectionless sockets begin life ready to send.
        (Udp, Op::Send, S::Closed | S::Ready) => Some(S::Ready),

        (Tcp, Op::Recv, S::Ready) => Some(S::Ready),
        (Tcp, Op::Recv, S::Closing) => Some(S::Closing),
        (Udp, Op::Recv, S::Ready) => Some(S::Ready),

        (Tcp, Op::Shutdown, S::Ready) => Some(S::Closing),
        (Udp, Op::Shutdown, _) => return Err(SocketError::NotSupported("shutdown on a datagram socket")),

        _ => None,
    };

    next.ok_or(SocketError::InvalidState { op, state })
}

/// Apply a transport-driven transition.
///
/// Returns `None` when the event does not move the socket from `state`
/// (e.g. a late `Connected` after `shutdown()`).
pub fn on_event(protocol: Protocol, state: SocketState, event: TransportEvent) -> Option<SocketState> {
    match (protocol, event, state) {
        (_, TransportEvent::Connected, SocketState::Connecting) => Some(SocketState::Ready),
        (Protocol::Udp, TransportEvent::Bound, SocketState::Closed) => Some(SocketState::Ready),
        _ => None,
    }
}
