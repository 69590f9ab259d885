//! In-process stand-in for the native transport.
//!
//! The real transport lives on the other side of a process boundary and
//! opens OS sockets.  To exercise the socket layer end to end without one,
//! [`Loopback`] consumes the same [`Command`] stream and answers with the
//! same [`Event`]s a native transport would, wiring sockets created on this
//! loopback to each other:
//!
//! | Command        | Behaviour                                                   |
//! |----------------|-------------------------------------------------------------|
//! | `Bind`         | Reserve the port (random ephemeral for 0); `AddrInUse` if taken without `ReuseAddress` on both |
//! | `Connect` TCP  | `Accepted` on the listener at that port, else `ConnectionRefused` |
//! | `Attach`       | Pair the accepted socket with its client; client gets `Connected` |
//! | `Connect` UDP  | Remember the default peer; `Connected` immediately          |
//! | `Send` TCP     | `Data` to the paired socket, `Credit` back to the sender     |
//! | `Send` UDP     | `Data` to the socket bound at the port or to group members  |
//! | `Shutdown`/`Close` | End of stream (empty `Data`) to the paired socket       |
//!
//! Host names are not resolved: every endpoint is this loopback, only the
//! port matters.

use std::collections::HashMap;
use std::ops::RangeInclusive;

use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::channel::{Inbound, MpscChannel, Outbound};
use crate::config::SocketConfig;
use crate::driver::Driver;
use crate::error::{ErrorCode, TransportError};
use crate::message::{Command, Completion, Endpoint, Event, MembershipOptions};
use crate::network::Network;
use crate::options::SocketOption;
use crate::pending::CallId;
use crate::registry::Handle;
use crate::state::Protocol;

/// Parameters of the simulated host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopbackConfig {
    /// Host reported in every local endpoint.
    pub host: String,
    /// Ports handed out for bind(0) and implicit binds.
    pub ephemeral_ports: RangeInclusive<u16>,
    /// Value reported for buffer-size options never set explicitly.
    pub default_buffer_size: i64,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            ephemeral_ports: 49_152..=65_535,
            default_buffer_size: 65_536,
        }
    }
}

/// Native-side state of one socket.
#[derive(Debug)]
struct Native {
    protocol: Protocol,
    port: Option<u16>,
    listening: bool,
    /// TCP: the socket at the other end of the connection.
    paired: Option<Handle>,
    /// UDP: default destination set by connect.
    default_peer: Option<Endpoint>,
    /// Multicast groups joined, with their loop flag.
    groups: HashMap<String, MembershipOptions>,
    options: HashMap<SocketOption, i64>,
}

impl Native {
    fn new(protocol: Protocol) -> Self {
        Self {
            protocol,
            port: None,
            listening: false,
            paired: None,
            default_peer: None,
            groups: HashMap::new(),
            options: HashMap::new(),
        }
    }
}

/// A connection announced to a listener but not yet attached.
#[derive(Debug)]
struct PendingConnection {
    listener: Handle,
    client: Handle,
}

/// Simulated native transport.
#[derive(Debug, Default)]
pub struct Loopback {
    config: LoopbackConfig,
    sockets: HashMap<Handle, Native>,
    ports: HashMap<(Protocol, u16), Handle>,
    pending: HashMap<u64, PendingConnection>,
    next_token: u64,
}

impl Loopback {
    pub fn new(config: LoopbackConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    fn endpoint(&self, port: u16) -> Endpoint {
        Endpoint::new(self.config.host.clone(), port)
    }

    fn local_endpoint(&self, handle: Handle) -> Option<Endpoint> {
        let port = self.sockets.get(&handle)?.port?;
        Some(self.endpoint(port))
    }

    /// Number of native sockets currently open.
    pub fn open_sockets(&self) -> usize {
        self.sockets.len()
    }

    /// Reserve `port`, or an ephemeral one when 0.
    fn reserve(&mut self, handle: Handle, protocol: Protocol, port: u16) -> Result<u16, TransportError> {
        let port = if port == 0 {
            self.ephemeral(protocol)?
        } else {
            match self.ports.get(&(protocol, port)) {
                Some(&holder) if !(self.reuses_address(handle) && self.reuses_address(holder)) => {
                    return Err(TransportError::new(ErrorCode::AddrInUse, format!("port {port} in use")));
                }
                _ => port,
            }
        };
        if let Some(old) = self.sockets.get(&handle).and_then(|n| n.port) {
            if old != port {
                self.release_port(handle, protocol, old);
            }
        }
        self.ports.entry((protocol, port)).or_insert(handle);
        if let Some(native) = self.sockets.get_mut(&handle) {
            native.port = Some(port);
        }
        Ok(port)
    }

    /// Drop `handle`'s claim on `port`.  A shared datagram port passes to
    /// another socket still bound to it.
    fn release_port(&mut self, handle: Handle, protocol: Protocol, port: u16) {
        let key = (protocol, port);
        if self.ports.get(&key) != Some(&handle) {
            return;
        }
        let heir = self
            .sockets
            .iter()
            .find(|(h, n)| **h != handle && n.protocol == protocol && n.port == Some(port) && !n.listening)
            .map(|(h, _)| *h);
        match heir {
            Some(h) if protocol == Protocol::Udp => {
                self.ports.insert(key, h);
            }
            _ => {
                self.ports.remove(&key);
            }
        }
    }

    fn reuses_address(&self, handle: Handle) -> bool {
        self.sockets
            .get(&handle)
            .and_then(|n| n.options.get(&SocketOption::ReuseAddress))
            .is_some_and(|v| *v != 0)
    }

    fn ephemeral(&self, protocol: Protocol) -> Result<u16, TransportError> {
        let range = self.config.ephemeral_ports.clone();
        let mut rng = rand::rng();
        // Random picks first, then a linear scan so a nearly full range
        // still finds the last free port.
        for _ in 0..64 {
            let port = rng.random_range(range.clone());
            if port != 0 && !self.ports.contains_key(&(protocol, port)) {
                return Ok(port);
            }
        }
        range
            .filter(|p| *p != 0)
            .find(|p| !self.ports.contains_key(&(protocol, *p)))
            .ok_or_else(|| TransportError::new(ErrorCode::AddrInUse, "no ephemeral port free"))
    }

    /// Make sure `handle` has a local port, binding an ephemeral one if not.
    fn ensure_bound(&mut self, handle: Handle, protocol: Protocol) -> Result<u16, TransportError> {
        match self.sockets.get(&handle).and_then(|n| n.port) {
            Some(port) => Ok(port),
            None => self.reserve(handle, protocol, 0),
        }
    }

    fn complete(handle: Handle, call: CallId, result: Result<Completion, TransportError>) -> Inbound {
        (handle, Event::CallComplete { call, result })
    }

    /// Process one command, returning the events it produces in order.
    pub fn handle(&mut self, handle: Handle, command: Command) -> Vec<Inbound> {
        log::trace!("[loopback] {handle} {command:?}");

        if let Command::Create { protocol, .. } = command {
            self.sockets.insert(handle, Native::new(protocol));
            return Vec::new();
        }
        if let Command::Attach { token } = command {
            return self.attach(handle, token);
        }
        let Some(protocol) = self.sockets.get(&handle).map(|n| n.protocol) else {
            log::warn!("[loopback] command for unknown socket {handle}: {command:?}");
            return Vec::new();
        };

        match command {
            Command::Create { .. } | Command::Attach { .. } => Vec::new(),
            Command::Bind { call, port } => {
                let result = self
                    .reserve(handle, protocol, port)
                    .map(|port| Completion::Bound(self.endpoint(port)));
                vec![Self::complete(handle, call, result)]
            }
            Command::Listen => match self.ensure_bound(handle, protocol) {
                Ok(_) => {
                    if let Some(native) = self.sockets.get_mut(&handle) {
                        native.listening = true;
                    }
                    Vec::new()
                }
                Err(e) => vec![(handle, Event::Error(e))],
            },
            Command::Connect { peer } => self.connect(handle, protocol, peer),
            Command::Send {
                payload,
                destination,
            } => self.send(handle, protocol, payload, destination),
            Command::Consumed { .. } => Vec::new(),
            Command::Shutdown => self.end_stream(handle),
            Command::Close => self.close(handle),
            Command::SetOption { call, option, value } => {
                if let Some(native) = self.sockets.get_mut(&handle) {
                    native.options.insert(option, value);
                }
                vec![Self::complete(handle, call, Ok(Completion::Done))]
            }
            Command::GetOption { call, option } => {
                let value = self
                    .sockets
                    .get(&handle)
                    .and_then(|n| n.options.get(&option).copied())
                    .unwrap_or(match option {
                        SocketOption::SendBufferSize | SocketOption::ReceiveBufferSize => {
                            self.config.default_buffer_size
                        }
                        _ => 0,
                    });
                vec![Self::complete(handle, call, Ok(Completion::OptionValue(value)))]
            }
            Command::AddMembership {
                call,
                group,
                options,
            } => {
                if let Some(native) = self.sockets.get_mut(&handle) {
                    native.groups.insert(group, options);
                }
                vec![Self::complete(handle, call, Ok(Completion::Done))]
            }
            Command::DropMembership { call, group } => {
                let removed = self
                    .sockets
                    .get_mut(&handle)
                    .is_some_and(|n| n.groups.remove(&group).is_some());
                let result = if removed {
                    Ok(Completion::Done)
                } else {
                    Err(TransportError::new(ErrorCode::Invalid, format!("not a member of {group}")))
                };
                vec![Self::complete(handle, call, result)]
            }
        }
    }

    fn connect(&mut self, handle: Handle, protocol: Protocol, peer: Endpoint) -> Vec<Inbound> {
        let local = match self.ensure_bound(handle, protocol) {
            Ok(port) => self.endpoint(port),
            Err(e) => return vec![(handle, Event::Error(e))],
        };

        if protocol == Protocol::Udp {
            if let Some(native) = self.sockets.get_mut(&handle) {
                native.default_peer = Some(peer.clone());
            }
            return vec![(handle, Event::Connected { local, peer })];
        }

        let listener = self
            .ports
            .get(&(Protocol::Tcp, peer.port))
            .copied()
            .filter(|l| self.sockets.get(l).is_some_and(|n| n.listening));
        let Some(listener) = listener else {
            log::debug!("[loopback] nothing listening on {peer}");
            return vec![(
                handle,
                Event::Error(TransportError::new(
                    ErrorCode::ConnectionRefused,
                    format!("nothing listening on {peer}"),
                )),
            )];
        };

        self.next_token += 1;
        let token = self.next_token;
        self.pending.insert(
            token,
            PendingConnection {
                listener,
                client: handle,
            },
        );
        vec![(listener, Event::Accepted { peer: local, token })]
    }

    fn attach(&mut self, child: Handle, token: u64) -> Vec<Inbound> {
        let connection = self
            .pending
            .remove(&token)
            .filter(|p| self.sockets.contains_key(&p.client));
        let Some(PendingConnection { listener, client }) = connection else {
            // The client gave up while the connection was queued.
            log::debug!("[loopback] {child} attached to a connection already closed");
            self.sockets.insert(child, Native::new(Protocol::Tcp));
            return vec![(child, end_of_stream())];
        };
        let listen_port = self.sockets.get(&listener).and_then(|n| n.port);
        let mut native = Native::new(Protocol::Tcp);
        native.port = listen_port;
        native.paired = Some(client);
        self.sockets.insert(child, native);
        if let Some(client_native) = self.sockets.get_mut(&client) {
            client_native.paired = Some(child);
        }

        match (self.local_endpoint(client), listen_port) {
            (Some(local), Some(port)) => vec![(
                client,
                Event::Connected {
                    local,
                    peer: self.endpoint(port),
                },
            )],
            _ => Vec::new(),
        }
    }

    fn send(&mut self, handle: Handle, protocol: Protocol, payload: Vec<u8>, destination: Option<Endpoint>) -> Vec<Inbound> {
        let flushed = payload.len();
        let mut events = Vec::new();

        match protocol {
            Protocol::Tcp => match self.sockets.get(&handle).and_then(|n| n.paired) {
                Some(peer) if !payload.is_empty() => events.push((
                    peer,
                    Event::Data {
                        payload,
                        source: None,
                    },
                )),
                Some(_) => {}
                None => events.push((
                    handle,
                    Event::Error(TransportError::new(ErrorCode::NotConnected, "peer has gone")),
                )),
            },
            Protocol::Udp => {
                let source = match self.ensure_bound(handle, protocol) {
                    Ok(port) => self.endpoint(port),
                    Err(e) => return vec![(handle, Event::Error(e))],
                };
                let destination = destination.or_else(|| self.sockets.get(&handle).and_then(|n| n.default_peer.clone()));
                match destination {
                    Some(dest) => events.extend(self.deliver_datagram(handle, &source, &dest, payload)),
                    None => events.push((
                        handle,
                        Event::Error(TransportError::new(ErrorCode::NotConnected, "no destination")),
                    )),
                }
            }
        }

        events.push((handle, Event::Credit { flushed }));
        events
    }

    fn deliver_datagram(&self, sender: Handle, source: &Endpoint, dest: &Endpoint, payload: Vec<u8>) -> Vec<Inbound> {
        let members: Vec<Handle> = self
            .sockets
            .iter()
            .filter(|(h, n)| {
                n.groups
                    .get(&dest.host)
                    .is_some_and(|opts| **h != sender || opts.loopback)
                    && n.port == Some(dest.port)
            })
            .map(|(h, _)| *h)
            .collect();
        let is_group = self.sockets.values().any(|n| n.groups.contains_key(&dest.host));

        if is_group {
            return members
                .into_iter()
                .map(|h| {
                    (
                        h,
                        Event::Data {
                            payload: payload.clone(),
                            source: Some(source.clone()),
                        },
                    )
                })
                .collect();
        }

        match self.ports.get(&(Protocol::Udp, dest.port)) {
            Some(&target) => vec![(
                target,
                Event::Data {
                    payload,
                    source: Some(source.clone()),
                },
            )],
            None => {
                log::debug!("[loopback] datagram to {dest} dropped: no receiver");
                Vec::new()
            }
        }
    }

    /// Signal end of stream to the paired socket, once.
    fn end_stream(&mut self, handle: Handle) -> Vec<Inbound> {
        let Some(peer) = self.sockets.get_mut(&handle).and_then(|n| n.paired.take()) else {
            return Vec::new();
        };
        if let Some(peer_native) = self.sockets.get_mut(&peer) {
            peer_native.paired = None;
        }
        vec![(peer, end_of_stream())]
    }

    fn close(&mut self, handle: Handle) -> Vec<Inbound> {
        let mut events = self.end_stream(handle);

        // Clients still waiting on this listener are refused.
        let refused: Vec<u64> = self
            .pending
            .iter()
            .filter(|(_, p)| p.listener == handle)
            .map(|(t, _)| *t)
            .collect();
        for token in refused {
            if let Some(p) = self.pending.remove(&token) {
                events.push((
                    p.client,
                    Event::Error(TransportError::new(ErrorCode::ConnectionRefused, "listener closed")),
                ));
            }
        }

        // Connections this socket started that no listener attached yet.
        self.pending.retain(|_, p| p.client != handle);

        if let Some(native) = self.sockets.remove(&handle) {
            if let Some(port) = native.port {
                self.release_port(handle, native.protocol, port);
            }
        }
        events
    }

    /// Serve commands until the socket layer drops its channel.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Outbound>, events: mpsc::UnboundedSender<Inbound>) {
        while let Some((handle, command)) = commands.recv().await {
            for event in self.handle(handle, command) {
                if events.send(event).is_err() {
                    log::debug!("[loopback] socket layer gone; stopping");
                    return;
                }
            }
        }
        log::debug!("[loopback] command stream closed");
    }
}

fn end_of_stream() -> Event {
    Event::Data {
        payload: Vec::new(),
        source: None,
    }
}

/// Wire a [`Network`] to a [`Loopback`] running on its own tokio task.
///
/// Must be called from within a tokio runtime.
pub fn spawn(config: SocketConfig, loopback: Loopback) -> (Driver, JoinHandle<()>) {
    let (channel, commands) = MpscChannel::new();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(loopback.run(commands, events_tx));
    (Driver::new(Network::new(channel, config), events_rx), task)
}
