//! Per-socket lifecycle and buffering.
//!
//! A [`Socket`] owns the complete state for one socket: its FSM state (see
//! [`crate::state`]), its [`BufferedIo`], the addresses learned so far, the
//! queue of accepted-but-unclaimed connections, the outstanding correlated
//! calls and the registered callbacks.
//!
//! Methods here never touch the channel.  Each caller-facing operation
//! validates legality first (illegal calls change nothing) and hands back the
//! [`Command`] to forward, if any.  [`crate::network::Network`] does the
//! forwarding and invokes callbacks.
//!
//! Sockets are created either by the application (role
//! [`Role::Client`], state `Closed`) or from an accepted connection (role
//! [`Role::ServerAccepted`], state `Ready`) via [`Socket::accepted`].

use std::collections::VecDeque;
use std::fmt;

use crate::buffered_io::BufferedIo;
use crate::error::{SocketError, TransportError};
use crate::message::{Command, Completion, Endpoint};
use crate::network::Network;
use crate::options::SocketOption;
use crate::pending::PendingCalls;
use crate::registry::Handle;
use crate::state::{self, Operation, Protocol, Role, Security, SocketState, TransportEvent};

/// Readable / writable notification.
pub type EventCallback = Box<dyn FnMut(&mut Network, Handle)>;
/// Asynchronous transport error notification.
pub type ErrorCallback = Box<dyn FnMut(&mut Network, Handle, &TransportError)>;
/// Continuation for one correlated call.
pub type CompletionCallback = Box<dyn FnOnce(&mut Network, Handle, Result<Completion, TransportError>)>;

/// Callbacks registered on a socket.
#[derive(Default)]
pub struct Callbacks {
    pub(crate) on_readable: Option<EventCallback>,
    pub(crate) on_writable: Option<EventCallback>,
    pub(crate) on_error: Option<ErrorCallback>,
    /// Per-slot registration counters, bumped whenever that slot is set or
    /// cleared, so a callback that replaces itself while running is not
    /// overwritten when it returns.
    pub(crate) readable_epoch: u64,
    pub(crate) writable_epoch: u64,
    pub(crate) error_epoch: u64,
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_readable", &self.on_readable.is_some())
            .field("on_writable", &self.on_writable.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// What a successful `recv` produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    /// Bytes appended to the caller's buffer.  `0` only at TCP end of stream.
    pub len: usize,
    /// Sender of a datagram, or the last known peer of a stream.
    pub source: Option<Endpoint>,
}

/// One socket.
#[derive(Debug)]
pub struct Socket {
    protocol: Protocol,
    security: Security,
    role: Role,
    state: SocketState,
    io: BufferedIo,
    local_addr: Option<Endpoint>,
    peer_addr: Option<Endpoint>,
    /// Accepted connections awaiting `accept()`, oldest first.
    accept_queue: VecDeque<(Endpoint, Handle)>,
    /// A bind is in flight or has completed.
    bind_requested: bool,
    pub(crate) pending: PendingCalls<CompletionCallback>,
    pub(crate) callbacks: Callbacks,
}

impl Socket {
    /// A fresh application-created socket in state `Closed`.
    pub fn new(protocol: Protocol, security: Security, max_send_credit: usize) -> Result<Self, SocketError> {
        if security == Security::Tls && !protocol.is_stream() {
            return Err(SocketError::NotSupported("TLS on a datagram socket"));
        }
        Ok(Self {
            protocol,
            security,
            role: Role::Client,
            state: SocketState::Closed,
            io: BufferedIo::new(protocol, max_send_credit),
            local_addr: None,
            peer_addr: None,
            accept_queue: VecDeque::new(),
            bind_requested: false,
            pending: PendingCalls::new(),
            callbacks: Callbacks::default(),
        })
    }

    /// A socket for a connection accepted by a listener.  Starts `Ready`
    /// with the peer already known.
    pub fn accepted(
        security: Security,
        local_addr: Option<Endpoint>,
        peer: Endpoint,
        max_send_credit: usize,
    ) -> Self {
        Self {
            protocol: Protocol::Tcp,
            security,
            role: Role::ServerAccepted,
            state: SocketState::Ready,
            io: BufferedIo::new(Protocol::Tcp, max_send_credit),
            local_addr,
            peer_addr: Some(peer),
            accept_queue: VecDeque::new(),
            bind_requested: false,
            pending: PendingCalls::new(),
            callbacks: Callbacks::default(),
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn security(&self) -> Security {
        self.security
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_server(&self) -> bool {
        self.role == Role::ServerAccepted
    }

    pub fn state(&self) -> SocketState {
        self.state
    }

    pub fn local_addr(&self) -> Option<&Endpoint> {
        self.local_addr.as_ref()
    }

    pub fn peer_addr(&self) -> Option<&Endpoint> {
        self.peer_addr.as_ref()
    }

    pub fn writable_len(&self) -> usize {
        self.io.writable_len()
    }

    pub fn readable_len(&self) -> usize {
        self.io.readable_len()
    }

    pub fn end_of_stream(&self) -> bool {
        self.io.queue.end_of_stream()
    }

    /// Connections waiting in the accept queue.
    pub fn pending_accepts(&self) -> usize {
        self.accept_queue.len()
    }

    /// Correlated calls still awaiting completion.
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    fn transition(&mut self, op: Operation) -> Result<SocketState, SocketError> {
        state::check(self.protocol, self.state, op)
    }

    fn set_state(&mut self, next: SocketState) {
        if next != self.state {
            log::debug!("[socket] {:?} {} → {}", self.protocol, self.state, next);
            self.state = next;
        }
    }

    // -----------------------------------------------------------------------
    // Caller-facing operations
    // -----------------------------------------------------------------------

    /// Validate a bind.  The state only moves when the bind completes.
    ///
    /// A socket binds once: a second bind while the first is in flight or
    /// after it succeeded is an [`SocketError::InvalidState`].
    pub fn bind(&mut self) -> Result<(), SocketError> {
        state::check(self.protocol, self.state, Operation::Bind)?;
        if self.bind_requested {
            return Err(SocketError::InvalidState {
                op: Operation::Bind,
                state: self.state,
            });
        }
        self.bind_requested = true;
        Ok(())
    }

    /// The transport rejected the bind; another may be attempted.
    pub fn on_bind_failed(&mut self) {
        self.bind_requested = false;
    }

    pub fn connect(&mut self, peer: Endpoint) -> Result<Command, SocketError> {
        let next = self.transition(Operation::Connect)?;
        self.set_state(next);
        self.peer_addr = Some(peer.clone());
        Ok(Command::Connect { peer })
    }

    pub fn listen(&mut self) -> Result<Command, SocketError> {
        let next = self.transition(Operation::Listen)?;
        self.set_state(next);
        Ok(Command::Listen)
    }

    /// Claim the oldest accepted connection.  `Ok(None)` when none is queued.
    pub fn accept(&mut self) -> Result<Option<(Endpoint, Handle)>, SocketError> {
        self.transition(Operation::Accept)?;
        Ok(self.accept_queue.pop_front())
    }

    /// Send from the front of `buf`.
    ///
    /// Returns the number of bytes consumed and the message to forward.
    /// `destination` is required for a datagram socket without a peer and
    /// ignored for streams.
    pub fn send(
        &mut self,
        buf: &mut Vec<u8>,
        max_len: Option<usize>,
        destination: Option<&Endpoint>,
    ) -> Result<(usize, Option<Command>), SocketError> {
        let next = self.transition(Operation::Send)?;
        let destination = match self.protocol {
            Protocol::Tcp => None,
            Protocol::Udp => Some(
                destination
                    .or(self.peer_addr.as_ref())
                    .cloned()
                    .ok_or(SocketError::NotConnected)?,
            ),
        };

        let payload = self.io.send(buf, max_len)?;
        if next != self.state {
            log::debug!("[socket] implicit transition on first datagram send");
        }
        self.set_state(next);

        Ok(match payload {
            Some(payload) => (
                payload.len(),
                Some(Command::Send {
                    payload,
                    destination,
                }),
            ),
            None => (0, None),
        })
    }

    /// Receive into the end of `buf`.
    ///
    /// For a stream, consuming bytes yields a [`Command::Consumed`] credit
    /// notification for the transport.
    pub fn recv(&mut self, buf: &mut Vec<u8>, max_len: Option<usize>) -> Result<(Received, Option<Command>), SocketError> {
        self.transition(Operation::Recv)?;
        match self.protocol {
            Protocol::Tcp => {
                let len = self.io.recv_stream(buf, max_len)?;
                let consumed = (len > 0).then_some(Command::Consumed { bytes: len });
                Ok((
                    Received {
                        len,
                        source: self.peer_addr.clone(),
                    },
                    consumed,
                ))
            }
            Protocol::Udp => {
                let (len, source) = self.io.recv_datagram(buf)?;
                Ok((
                    Received {
                        len,
                        source: Some(source),
                    },
                    None,
                ))
            }
        }
    }

    /// Half-close the stream.  Many platforms cannot guarantee the shutdown
    /// completes; callers are expected to `close()` after end of stream.
    pub fn shutdown(&mut self) -> Result<Command, SocketError> {
        let next = self.transition(Operation::Shutdown)?;
        self.set_state(next);
        Ok(Command::Shutdown)
    }

    pub fn check_option(&self, option: SocketOption) -> Result<(), SocketError> {
        if option.applies_to(self.protocol) {
            Ok(())
        } else {
            Err(SocketError::NotSupported("stream-only option on a datagram socket"))
        }
    }

    pub fn check_multicast(&self) -> Result<(), SocketError> {
        if self.protocol.is_stream() {
            Err(SocketError::NotSupported("multicast on a stream socket"))
        } else {
            Ok(())
        }
    }

    /// Take every queued accepted connection (used when the listener closes).
    pub(crate) fn drain_accept_queue(&mut self) -> Vec<Handle> {
        self.accept_queue.drain(..).map(|(_, h)| h).collect()
    }

    // -----------------------------------------------------------------------
    // Transport events
    // -----------------------------------------------------------------------

    /// Returns `true` when the socket just became `Ready`.
    pub fn on_connected(&mut self, local: Endpoint, peer: Endpoint) -> bool {
        match state::on_event(self.protocol, self.state, TransportEvent::Connected) {
            Some(next) => {
                self.local_addr = Some(local);
                self.peer_addr = Some(peer);
                self.set_state(next);
                true
            }
            None => {
                log::warn!("[socket] connect completion ignored while {}", self.state);
                false
            }
        }
    }

    pub fn on_bound(&mut self, local: Endpoint) {
        self.local_addr = Some(local);
        if let Some(next) = state::on_event(self.protocol, self.state, TransportEvent::Bound) {
            self.set_state(next);
        }
    }

    /// Returns `true` when the readable callback should fire.
    pub fn on_data(&mut self, payload: Vec<u8>, source: Option<Endpoint>) -> bool {
        self.io.on_data(payload, source)
    }

    /// Returns `true` when the writable callback should fire.
    pub fn on_credit(&mut self, flushed: usize) -> bool {
        self.io.on_credit(flushed) && self.state == SocketState::Ready
    }

    pub fn on_accepted(&mut self, peer: Endpoint, child: Handle) {
        self.accept_queue.push_back((peer, child));
    }
}
