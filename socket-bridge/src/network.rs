//! The socket registry and caller-facing API.
//!
//! [`Network`] owns every live [`Socket`] behind a generational [`Handle`],
//! forwards the commands produced by socket operations to the [`Channel`],
//! and routes inbound transport events back to the right socket through
//! [`Network::dispatch`].
//!
//! # Threading model
//!
//! Single-threaded and cooperative.  Nothing here blocks: `send`, `recv` and
//! `accept` only consult local buffers.  Callbacks run synchronously inside
//! `dispatch`, in event order, and receive `&mut Network` so they can call
//! straight back into the API (read on readable, write on writable, close on
//! error...).
//!
//! # Closing
//!
//! `close()` releases the handle immediately.  Events still in flight for it
//! are dropped; completions for calls it left outstanding are discarded once
//! each.  Using the handle afterwards yields [`SocketError::InvalidHandle`].

use std::collections::{HashSet, VecDeque};

use crate::channel::Channel;
use crate::config::SocketConfig;
use crate::error::{DispatchError, ErrorCode, SocketError, TransportError};
use crate::message::{Command, Completion, Endpoint, Event, MembershipOptions};
use crate::options::SocketOption;
use crate::pending::{CallId, CallIds};
use crate::registry::{Handle, Registry};
use crate::socket::{Callbacks, CompletionCallback, EventCallback, Socket};
use crate::state::{Protocol, Security, SocketState};

#[derive(Debug, Clone, Copy)]
enum Notify {
    Readable,
    Writable,
}

fn slot(callbacks: &mut Callbacks, which: Notify) -> (&mut Option<EventCallback>, &mut u64) {
    match which {
        Notify::Readable => (&mut callbacks.on_readable, &mut callbacks.readable_epoch),
        Notify::Writable => (&mut callbacks.on_writable, &mut callbacks.writable_epoch),
    }
}

fn unexpected(completion: &Completion) -> TransportError {
    TransportError::new(ErrorCode::Invalid, format!("unexpected completion {completion:?}"))
}

/// Registry of sockets bridged to one transport.
pub struct Network {
    sockets: Registry<Socket>,
    channel: Box<dyn Channel>,
    config: SocketConfig,
    call_ids: CallIds,
    /// Ids left outstanding by `close()`; their completions are dropped.
    retired: HashSet<CallId>,
    /// Retirement order, oldest first, bounded by `max_retired_calls`.
    retired_order: VecDeque<CallId>,
}

impl std::fmt::Debug for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Network")
            .field("sockets", &self.sockets)
            .field("config", &self.config)
            .field("retired", &self.retired.len())
            .finish_non_exhaustive()
    }
}

impl Network {
    pub fn new(channel: impl Channel + 'static, config: SocketConfig) -> Self {
        Self {
            sockets: Registry::new(),
            channel: Box::new(channel),
            config,
            call_ids: CallIds::default(),
            retired: HashSet::new(),
            retired_order: VecDeque::new(),
        }
    }

    pub fn config(&self) -> &SocketConfig {
        &self.config
    }

    /// Number of live sockets.
    pub fn len(&self) -> usize {
        self.sockets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sockets.is_empty()
    }

    /// Read-only view of a live socket.
    pub fn socket(&self, handle: Handle) -> Option<&Socket> {
        self.sockets.get(handle)
    }

    fn get_mut(&mut self, handle: Handle) -> Result<&mut Socket, SocketError> {
        self.sockets
            .get_mut(handle)
            .ok_or(SocketError::InvalidHandle(handle))
    }

    fn get(&self, handle: Handle) -> Result<&Socket, SocketError> {
        self.sockets.get(handle).ok_or(SocketError::InvalidHandle(handle))
    }

    fn send_message(&self, handle: Handle, command: Command) {
        self.channel.send_message(handle, command);
    }

    /// Issue a correlated call on `handle`.
    fn call(
        &mut self,
        handle: Handle,
        continuation: Option<CompletionCallback>,
        build: impl FnOnce(CallId) -> Command,
    ) -> Result<CallId, SocketError> {
        let id = self.call_ids.next_id();
        self.get_mut(handle)?.pending.register(id, continuation);
        self.send_message(handle, build(id));
        Ok(id)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Create a socket.  It starts `Closed`.
    pub fn create(&mut self, protocol: Protocol, security: Security) -> Result<Handle, SocketError> {
        let socket = Socket::new(protocol, security, self.config.max_send_credit)?;
        let handle = self.sockets.insert(socket);
        self.send_message(handle, Command::Create { protocol, security });
        log::debug!("[net] created {protocol:?} socket {handle}");

        if protocol.is_stream() {
            let defaults = [
                (SocketOption::ConnectionTimeout, self.config.connection_timeout),
                (SocketOption::ShutdownTimeout, self.config.shutdown_timeout),
            ];
            for (option, timeout) in defaults {
                if let Some(timeout) = timeout {
                    let value = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);
                    self.call(handle, None, |call| Command::SetOption { call, option, value })?;
                }
            }
        }
        Ok(handle)
    }

    /// Release `handle`.  Always legal on a live handle; a second close is
    /// [`SocketError::InvalidHandle`].
    ///
    /// Connections still waiting in a listener's accept queue are closed too.
    pub fn close(&mut self, handle: Handle) -> Result<(), SocketError> {
        let mut socket = self
            .sockets
            .remove(handle)
            .ok_or(SocketError::InvalidHandle(handle))?;
        for id in socket.pending.drain_ids() {
            self.retire(id);
        }
        self.send_message(handle, Command::Close);
        log::debug!("[net] closed {handle} (was {})", socket.state());

        for child in socket.drain_accept_queue() {
            if self.close(child).is_err() {
                log::debug!("[net] queued connection {child} already released");
            }
        }
        Ok(())
    }

    fn retire(&mut self, id: CallId) {
        let limit = self.config.max_retired_calls;
        if limit == 0 {
            return;
        }
        while self.retired_order.len() >= limit {
            let Some(oldest) = self.retired_order.pop_front() else {
                break;
            };
            if self.retired.remove(&oldest) {
                log::debug!("[net] forgetting retired {oldest}");
            }
        }
        self.retired.insert(id);
        self.retired_order.push_back(id);
    }

    /// Bind to a local `port` (0 lets the transport choose).
    ///
    /// `on_complete` receives the bound address.  A datagram socket becomes
    /// `Ready` once the bind succeeds.
    pub fn bind<F>(&mut self, handle: Handle, port: u16, on_complete: F) -> Result<(), SocketError>
    where
        F: FnOnce(&mut Network, Handle, Result<Endpoint, TransportError>) + 'static,
    {
        self.get_mut(handle)?.bind()?;
        let continuation: CompletionCallback = Box::new(move |net, h, result| {
            let result = result.and_then(|c| match c {
                Completion::Bound(local) => Ok(local),
                other => Err(unexpected(&other)),
            });
            if result.is_err() {
                if let Some(socket) = net.sockets.get_mut(h) {
                    socket.on_bind_failed();
                }
            }
            on_complete(net, h, result);
        });
        self.call(handle, Some(continuation), |call| Command::Bind { call, port })?;
        Ok(())
    }

    pub fn connect(&mut self, handle: Handle, peer: Endpoint) -> Result<(), SocketError> {
        let command = self.get_mut(handle)?.connect(peer)?;
        self.send_message(handle, command);
        Ok(())
    }

    pub fn listen(&mut self, handle: Handle) -> Result<(), SocketError> {
        let command = self.get_mut(handle)?.listen()?;
        self.send_message(handle, command);
        Ok(())
    }

    /// Claim the oldest pending inbound connection.  Never waits: `Ok(None)`
    /// when nothing is queued.
    pub fn accept(&mut self, handle: Handle) -> Result<Option<Handle>, SocketError> {
        Ok(self.get_mut(handle)?.accept()?.map(|(peer, child)| {
            log::debug!("[net] {handle} accepted {child} from {peer}");
            child
        }))
    }

    /// Half-close a stream socket.
    pub fn shutdown(&mut self, handle: Handle) -> Result<(), SocketError> {
        let command = self.get_mut(handle)?.shutdown()?;
        self.send_message(handle, command);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Data transfer
    // -----------------------------------------------------------------------

    /// Send from the front of `buf`, removing what was sent.
    ///
    /// Streams may send a prefix (0 when out of credit); datagrams go whole
    /// or fail with [`SocketError::WouldBlock`].  `destination` is required
    /// for an unconnected datagram socket and ignored for streams.
    pub fn send(
        &mut self,
        handle: Handle,
        buf: &mut Vec<u8>,
        max_len: Option<usize>,
        destination: Option<&Endpoint>,
    ) -> Result<usize, SocketError> {
        let (n, command) = self.get_mut(handle)?.send(buf, max_len, destination)?;
        if let Some(command) = command {
            self.send_message(handle, command);
        }
        Ok(n)
    }

    /// Receive onto the end of `buf`.  `Ok(0)` is end of stream.
    pub fn recv(&mut self, handle: Handle, buf: &mut Vec<u8>, max_len: Option<usize>) -> Result<usize, SocketError> {
        self.recv_from(handle, buf, max_len).map(|(n, _)| n)
    }

    /// Like [`recv`](Self::recv), also reporting who sent the data.
    pub fn recv_from(
        &mut self,
        handle: Handle,
        buf: &mut Vec<u8>,
        max_len: Option<usize>,
    ) -> Result<(usize, Option<Endpoint>), SocketError> {
        let (received, command) = self.get_mut(handle)?.recv(buf, max_len)?;
        if let Some(command) = command {
            self.send_message(handle, command);
        }
        Ok((received.len, received.source))
    }

    // -----------------------------------------------------------------------
    // Options and multicast
    // -----------------------------------------------------------------------

    pub fn set_option<F>(&mut self, handle: Handle, option: SocketOption, value: i64, on_complete: F) -> Result<(), SocketError>
    where
        F: FnOnce(&mut Network, Handle, Result<(), TransportError>) + 'static,
    {
        self.get(handle)?.check_option(option)?;
        self.call(handle, Some(done_continuation(on_complete)), |call| Command::SetOption {
            call,
            option,
            value,
        })?;
        Ok(())
    }

    pub fn get_option<F>(&mut self, handle: Handle, option: SocketOption, on_complete: F) -> Result<(), SocketError>
    where
        F: FnOnce(&mut Network, Handle, Result<i64, TransportError>) + 'static,
    {
        self.get(handle)?.check_option(option)?;
        let continuation: CompletionCallback = Box::new(move |net, h, result| {
            let result = result.and_then(|c| match c {
                Completion::OptionValue(v) => Ok(v),
                other => Err(unexpected(&other)),
            });
            on_complete(net, h, result);
        });
        self.call(handle, Some(continuation), |call| Command::GetOption { call, option })?;
        Ok(())
    }

    /// Join multicast `group` (datagram sockets only).
    pub fn add_membership<F>(
        &mut self,
        handle: Handle,
        group: &str,
        options: MembershipOptions,
        on_complete: F,
    ) -> Result<(), SocketError>
    where
        F: FnOnce(&mut Network, Handle, Result<(), TransportError>) + 'static,
    {
        self.get(handle)?.check_multicast()?;
        if group.is_empty() {
            return Err(SocketError::Invalid("empty multicast group"));
        }
        let group = group.to_string();
        self.call(handle, Some(done_continuation(on_complete)), |call| Command::AddMembership {
            call,
            group,
            options,
        })?;
        Ok(())
    }

    /// Leave multicast `group` (datagram sockets only).
    pub fn drop_membership<F>(&mut self, handle: Handle, group: &str, on_complete: F) -> Result<(), SocketError>
    where
        F: FnOnce(&mut Network, Handle, Result<(), TransportError>) + 'static,
    {
        self.get(handle)?.check_multicast()?;
        if group.is_empty() {
            return Err(SocketError::Invalid("empty multicast group"));
        }
        let group = group.to_string();
        self.call(handle, Some(done_continuation(on_complete)), |call| Command::DropMembership {
            call,
            group,
        })?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Callbacks
    // -----------------------------------------------------------------------

    pub fn set_on_readable(&mut self, handle: Handle, cb: impl FnMut(&mut Network, Handle) + 'static) -> Result<(), SocketError> {
        let (current, epoch) = slot(&mut self.get_mut(handle)?.callbacks, Notify::Readable);
        *current = Some(Box::new(cb));
        *epoch += 1;
        Ok(())
    }

    pub fn set_on_writable(&mut self, handle: Handle, cb: impl FnMut(&mut Network, Handle) + 'static) -> Result<(), SocketError> {
        let (current, epoch) = slot(&mut self.get_mut(handle)?.callbacks, Notify::Writable);
        *current = Some(Box::new(cb));
        *epoch += 1;
        Ok(())
    }

    pub fn set_on_error(
        &mut self,
        handle: Handle,
        cb: impl FnMut(&mut Network, Handle, &TransportError) + 'static,
    ) -> Result<(), SocketError> {
        let callbacks = &mut self.get_mut(handle)?.callbacks;
        callbacks.on_error = Some(Box::new(cb));
        callbacks.error_epoch += 1;
        Ok(())
    }

    /// Remove every callback registered on `handle`.
    pub fn clear_callbacks(&mut self, handle: Handle) -> Result<(), SocketError> {
        let callbacks = &mut self.get_mut(handle)?.callbacks;
        callbacks.on_readable = None;
        callbacks.on_writable = None;
        callbacks.on_error = None;
        callbacks.readable_epoch += 1;
        callbacks.writable_epoch += 1;
        callbacks.error_epoch += 1;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Current state; a released handle reports `Closed`.
    pub fn state(&self, handle: Handle) -> SocketState {
        self.sockets
            .get(handle)
            .map_or(SocketState::Closed, Socket::state)
    }

    pub fn peer_addr(&self, handle: Handle) -> Result<Option<Endpoint>, SocketError> {
        Ok(self.get(handle)?.peer_addr().cloned())
    }

    pub fn local_addr(&self, handle: Handle) -> Result<Option<Endpoint>, SocketError> {
        Ok(self.get(handle)?.local_addr().cloned())
    }

    /// Current send credit.
    pub fn writable_len(&self, handle: Handle) -> Result<usize, SocketError> {
        Ok(self.get(handle)?.writable_len())
    }

    /// Bytes the next `recv` can return.
    pub fn readable_len(&self, handle: Handle) -> Result<usize, SocketError> {
        Ok(self.get(handle)?.readable_len())
    }

    // -----------------------------------------------------------------------
    // Inbound events
    // -----------------------------------------------------------------------

    /// Route one inbound event to its socket.
    ///
    /// Events for released handles are dropped.  A completion whose id was
    /// never issued, or was already completed, is a [`DispatchError`].
    pub fn dispatch(&mut self, handle: Handle, event: Event) -> Result<(), DispatchError> {
        if !self.sockets.contains(handle) {
            return self.dispatch_released(handle, event);
        }

        match event {
            Event::Connected { local, peer } => {
                log::debug!("[net] {handle} connected {local} → {peer}");
                let ready = self.sockets.get_mut(handle).is_some_and(|s| s.on_connected(local, peer));
                if ready {
                    self.notify(handle, Notify::Writable);
                }
            }
            Event::Data { payload, source } => {
                log::trace!("[net] {handle} ← {} bytes", payload.len());
                let readable = self
                    .sockets
                    .get_mut(handle)
                    .is_some_and(|s| s.on_data(payload, source));
                if readable {
                    self.notify(handle, Notify::Readable);
                }
            }
            Event::Accepted { peer, token } => self.on_accepted(handle, peer, token)?,
            Event::Credit { flushed } => {
                let writable = self.sockets.get_mut(handle).is_some_and(|s| s.on_credit(flushed));
                if writable {
                    self.notify(handle, Notify::Writable);
                }
            }
            Event::Error(error) => {
                log::debug!("[net] {handle} transport error: {error}");
                self.notify_error(handle, &error);
            }
            Event::CallComplete { call, result } => self.on_call_complete(handle, call, result)?,
        }
        Ok(())
    }

    fn dispatch_released(&mut self, handle: Handle, event: Event) -> Result<(), DispatchError> {
        match event {
            Event::CallComplete { call, .. } => {
                if self.retired.remove(&call) {
                    log::debug!("[net] late completion {call} for released {handle} dropped");
                    Ok(())
                } else {
                    log::error!("[net] completion {call} for released {handle} was never outstanding");
                    Err(DispatchError::UnknownCall { handle, call })
                }
            }
            Event::Accepted { peer, token } => {
                // Nobody will ever accept it; give it a handle just long
                // enough to close the native side.
                let child = self.sockets.insert(Socket::accepted(Security::None, None, peer, 0));
                self.send_message(child, Command::Attach { token });
                self.sockets.remove(child);
                self.send_message(child, Command::Close);
                log::debug!("[net] connection for released listener {handle} refused");
                Ok(())
            }
            other => {
                log::debug!("[net] event for released {handle} dropped: {other:?}");
                Ok(())
            }
        }
    }

    fn on_accepted(&mut self, handle: Handle, peer: Endpoint, token: u64) -> Result<(), DispatchError> {
        let max_credit = self.config.max_send_credit;
        let Some(listener) = self.sockets.get(handle) else {
            return Ok(());
        };
        if listener.state() != SocketState::Listening {
            let state = listener.state();
            log::error!("[net] accepted connection for {handle}, which is {state}");
            return Err(DispatchError::NotListening { handle, state });
        }
        let child = Socket::accepted(listener.security(), listener.local_addr().cloned(), peer.clone(), max_credit);
        let child = self.sockets.insert(child);
        self.send_message(child, Command::Attach { token });
        if let Some(listener) = self.sockets.get_mut(handle) {
            listener.on_accepted(peer.clone(), child);
        }
        log::debug!("[net] {handle} queued connection {child} from {peer}");
        self.notify(handle, Notify::Readable);
        Ok(())
    }

    fn on_call_complete(
        &mut self,
        handle: Handle,
        call: CallId,
        result: Result<Completion, TransportError>,
    ) -> Result<(), DispatchError> {
        let Some(socket) = self.sockets.get_mut(handle) else {
            return Ok(());
        };
        let Some(continuation) = socket.pending.complete(call) else {
            log::error!("[net] completion {call} on {handle} was never outstanding");
            return Err(DispatchError::UnknownCall { handle, call });
        };
        if let Ok(Completion::Bound(local)) = &result {
            socket.on_bound(local.clone());
        }

        match continuation {
            Some(continuation) => continuation(self, handle, result),
            None => {
                if let Err(e) = result {
                    log::warn!("[net] internal {call} on {handle} failed: {e}");
                }
            }
        }
        Ok(())
    }

    /// Run a readable/writable callback, putting it back afterwards unless it
    /// replaced itself or the socket was closed meanwhile.
    fn notify(&mut self, handle: Handle, which: Notify) {
        let Some(socket) = self.sockets.get_mut(handle) else {
            return;
        };
        let (current, epoch) = slot(&mut socket.callbacks, which);
        let epoch = *epoch;
        let Some(mut cb) = current.take() else {
            return;
        };
        cb(self, handle);
        if let Some(socket) = self.sockets.get_mut(handle) {
            let (current, now) = slot(&mut socket.callbacks, which);
            if *now == epoch {
                *current = Some(cb);
            }
        }
    }

    fn notify_error(&mut self, handle: Handle, error: &TransportError) {
        let Some(socket) = self.sockets.get_mut(handle) else {
            return;
        };
        let epoch = socket.callbacks.error_epoch;
        let Some(mut cb) = socket.callbacks.on_error.take() else {
            log::warn!("[net] unhandled transport error on {handle}: {error}");
            return;
        };
        cb(self, handle, error);
        if let Some(socket) = self.sockets.get_mut(handle) {
            if socket.callbacks.error_epoch == epoch {
                socket.callbacks.on_error = Some(cb);
            }
        }
    }
}

fn done_continuation<F>(on_complete: F) -> CompletionCallback
where
    F: FnOnce(&mut Network, Handle, Result<(), TransportError>) + 'static,
{
    Box::new(move |net, h, result| {
        let result = result.and_then(|c| match c {
            Completion::Done => Ok(()),
            other => Err(unexpected(&other)),
        });
        on_complete(net, h, result);
    })
}
