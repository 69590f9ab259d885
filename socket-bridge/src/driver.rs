//! Inbound event pump.
//!
//! The socket layer never polls the transport; it is driven by upcalls.
//! [`Driver`] is the piece that turns the inbound half of the channel (a
//! tokio mpsc receiver of `(Handle, Event)`) into those upcalls, one
//! [`Network::dispatch`] per event, in arrival order, on the caller's task.
//!
//! ```ignore
//! let mut driver = Driver::new(network, events_rx);
//! let h = driver.network_mut().create(Protocol::Tcp, Security::None)?;
//! driver.network_mut().connect(h, "10.0.0.1:9000".parse()?)?;
//! driver.run_until(|net| net.state(h) == SocketState::Ready).await?;
//! ```

use tokio::sync::mpsc;

use crate::channel::Inbound;
use crate::error::DispatchError;
use crate::network::Network;

/// Owns a [`Network`] and the stream of events that drives it.
#[derive(Debug)]
pub struct Driver {
    network: Network,
    events: mpsc::UnboundedReceiver<Inbound>,
}

impl Driver {
    pub fn new(network: Network, events: mpsc::UnboundedReceiver<Inbound>) -> Self {
        Self { network, events }
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn network_mut(&mut self) -> &mut Network {
        &mut self.network
    }

    pub fn into_network(self) -> Network {
        self.network
    }

    /// Dispatch every event already queued, without waiting.
    ///
    /// Returns how many were dispatched.
    pub fn pump(&mut self) -> Result<usize, DispatchError> {
        let mut n = 0;
        while let Ok((handle, event)) = self.events.try_recv() {
            self.network.dispatch(handle, event)?;
            n += 1;
        }
        if n > 0 {
            log::trace!("[driver] pumped {n} event(s)");
        }
        Ok(n)
    }

    /// Wait for one event and dispatch it.
    ///
    /// Returns `Ok(false)` once the transport has gone away and no event
    /// will ever arrive again.
    pub async fn turn(&mut self) -> Result<bool, DispatchError> {
        match self.events.recv().await {
            Some((handle, event)) => {
                self.network.dispatch(handle, event)?;
                Ok(true)
            }
            None => {
                log::debug!("[driver] event stream closed");
                Ok(false)
            }
        }
    }

    /// Dispatch events until `done` holds.
    ///
    /// `done` is checked before waiting for each event.  Returns `Ok(false)`
    /// if the event stream closed first.
    pub async fn run_until<F>(&mut self, mut done: F) -> Result<bool, DispatchError>
    where
        F: FnMut(&Network) -> bool,
    {
        loop {
            if done(&self.network) {
                return Ok(true);
            }
            if !self.turn().await? {
                return Ok(done(&self.network));
            }
        }
    }

    /// Dispatch events until the transport closes the stream.
    pub async fn run(&mut self) -> Result<(), DispatchError> {
        while self.turn().await? {}
        Ok(())
    }
}
