//! Buffered I/O: flow-controlled send and queued receive for one socket.
//!
//! [`BufferedIo`] decouples the application's buffers from the timing of the
//! transport.  It owns the [`SendCredit`] and the [`ReceiveQueue`] and
//! implements the send/recv algorithms on top of them.  It does not talk to
//! the channel: `send` hands back the bytes to forward, `recv` reports how
//! many stream bytes were consumed, and the caller turns those into
//! messages.
//!
//! # Send
//! `len = min(max_len, buf.len())`.  A datagram larger than the available
//! credit is rejected whole ([`SocketError::WouldBlock`]); a stream send is
//! clamped to the credit and may be partial (0 when credit is exhausted).
//! The sent bytes are drained from the front of the caller's buffer; the rest
//! stays there untouched.  Datagrams are never empty: a zero-length
//! datagram send is [`SocketError::Invalid`] and an inbound one is dropped,
//! so a datagram read never returns 0.
//!
//! # Receive
//! Stream reads take any prefix of the queued bytes; an empty drained queue
//! reads as `0` after end of stream and `WouldBlock` before.  Datagram reads
//! pop exactly one whole datagram.

use crate::credit::SendCredit;
use crate::error::SocketError;
use crate::message::Endpoint;
use crate::recv_queue::{Datagram, ReceiveQueue, StreamRead};
use crate::state::Protocol;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferedIo {
    protocol: Protocol,
    pub credit: SendCredit,
    pub queue: ReceiveQueue,
}

impl BufferedIo {
    pub fn new(protocol: Protocol, max_send_credit: usize) -> Self {
        Self {
            protocol,
            credit: SendCredit::new(max_send_credit),
            queue: ReceiveQueue::new(protocol),
        }
    }

    /// Take up to `max_len` bytes from the front of `buf` within the
    /// available credit.
    ///
    /// Returns the payload to forward.  `None` means nothing is to be sent
    /// (a stream send with no credit or nothing to send); the caller reports
    /// 0 bytes.
    pub fn send(&mut self, buf: &mut Vec<u8>, max_len: Option<usize>) -> Result<Option<Vec<u8>>, SocketError> {
        let mut len = max_len.map_or(buf.len(), |m| m.min(buf.len()));
        if len == 0 && !self.protocol.is_stream() {
            return Err(SocketError::Invalid("empty datagram"));
        }
        let available = self.credit.available();

        if len > available {
            match self.protocol {
                // Datagrams are all-or-nothing.
                Protocol::Udp => return Err(SocketError::WouldBlock),
                Protocol::Tcp => len = available,
            }
        }
        if len == 0 && self.protocol.is_stream() {
            return Ok(None);
        }

        let payload: Vec<u8> = buf.drain(..len).collect();
        self.credit.consume(len);
        Ok(Some(payload))
    }

    /// Read queued stream bytes onto the end of `buf`.
    ///
    /// `Ok(0)` is end of stream; `Ok(n)` means `n` bytes were consumed and
    /// should be reported upstream.
    pub fn recv_stream(&mut self, buf: &mut Vec<u8>, max_len: Option<usize>) -> Result<usize, SocketError> {
        match self.queue.read_stream(buf, max_len) {
            StreamRead::Data(n) => Ok(n),
            StreamRead::EndOfStream => Ok(0),
            StreamRead::Empty => Err(SocketError::WouldBlock),
        }
    }

    /// Pop one datagram, appending its whole payload to `buf`.
    pub fn recv_datagram(&mut self, buf: &mut Vec<u8>) -> Result<(usize, Endpoint), SocketError> {
        let Datagram { source, payload } = self.queue.pop_datagram().ok_or(SocketError::WouldBlock)?;
        let n = payload.len();
        buf.extend_from_slice(&payload);
        Ok((n, source))
    }

    /// Queue inbound data.  Returns `true` when the readable callback should
    /// fire for this event.
    pub fn on_data(&mut self, payload: Vec<u8>, source: Option<Endpoint>) -> bool {
        match self.protocol {
            Protocol::Tcp => self.queue.push_stream(&payload),
            Protocol::Udp if payload.is_empty() => {
                log::debug!("[socket] empty datagram dropped");
                false
            }
            Protocol::Udp => match source {
                Some(source) => {
                    self.queue.push_datagram(Datagram { source, payload });
                    true
                }
                None => {
                    log::warn!("[socket] datagram without a source address dropped");
                    false
                }
            },
        }
    }

    /// Return flushed credit.  `true` on the exhausted → available edge.
    pub fn on_credit(&mut self, flushed: usize) -> bool {
        self.credit.replenish(flushed)
    }

    pub fn writable_len(&self) -> usize {
        self.credit.available()
    }

    pub fn readable_len(&self) -> usize {
        self.queue.readable_len()
    }
}
