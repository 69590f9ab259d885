//! Send-side flow-control accounting.
//!
//! [`SendCredit`] tracks how many bytes may be handed to the transport before
//! the caller has to wait.  It does **not** touch the channel;
//! [`crate::buffered_io::BufferedIo`] calls these methods and forwards the
//! bytes.
//!
//! # Credit contract
//! - `0 ≤ available ≤ max` at all times.
//! - [`consume`](SendCredit::consume) decreases credit by exactly the number
//!   of bytes forwarded.
//! - [`replenish`](SendCredit::replenish) increases credit by the number of
//!   bytes the transport reports flushed, clamped to `max`.

/// Send credit for one socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendCredit {
    /// Bytes that may be queued right now.
    available: usize,
    /// Fixed capacity.
    max: usize,
}

impl SendCredit {
    /// Create a full credit counter with capacity `max`.
    pub fn new(max: usize) -> Self {
        Self { available: max, max }
    }

    pub fn available(&self) -> usize {
        self.available
    }

    pub fn max(&self) -> usize {
        self.max
    }

    /// `true` when nothing more may be sent.
    pub fn is_exhausted(&self) -> bool {
        self.available == 0
    }

    /// Take `n` bytes of credit.
    ///
    /// # Panics
    ///
    /// Panics in debug mode if `n` exceeds the available credit; callers
    /// clamp or reject first.
    pub fn consume(&mut self, n: usize) {
        debug_assert!(
            n <= self.available,
            "consume({n}) with only {} bytes of credit",
            self.available
        );
        self.available = self.available.saturating_sub(n);
    }

    /// Return `flushed` bytes of credit.
    ///
    /// Returns `true` if credit went from exhausted to available, which is
    /// the edge the writable callback fires on.
    pub fn replenish(&mut self, flushed: usize) -> bool {
        let was_exhausted = self.is_exhausted();
        self.available = self.available.saturating_add(flushed).min(self.max);
        was_exhausted && !self.is_exhausted()
    }
}
