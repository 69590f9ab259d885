//! The outbound half of the async message channel.
//!
//! [`Channel`] is the only thing the socket layer needs from whatever carries
//! messages across the process boundary: an ordered, fire-and-forget
//! `send_message`.  The inbound half is an upcall,
//! [`crate::network::Network::dispatch`], usually driven by
//! [`crate::driver::Driver`].
//!
//! [`MpscChannel`] is the in-process implementation backed by a tokio
//! unbounded mpsc queue; the receiving end is handed to the transport.

use tokio::sync::mpsc;

use crate::message::{Command, Event};
use crate::registry::Handle;

/// Outbound message, addressed by socket handle.
pub type Outbound = (Handle, Command);
/// Inbound message, addressed by socket handle.
pub type Inbound = (Handle, Event);

/// Ordered, fire-and-forget delivery of commands to the transport.
pub trait Channel {
    fn send_message(&self, handle: Handle, command: Command);
}

/// [`Channel`] over a tokio unbounded mpsc queue.
#[derive(Debug, Clone)]
pub struct MpscChannel {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl MpscChannel {
    /// Create a channel and the receiver the transport reads commands from.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Channel for MpscChannel {
    fn send_message(&self, handle: Handle, command: Command) {
        log::trace!("[channel] → {handle} {command:?}");
        if self.tx.send((handle, command)).is_err() {
            // Fire-and-forget: a vanished transport surfaces through its own
            // error events, not here.
            log::warn!("[channel] transport gone; command for {handle} dropped");
        }
    }
}
