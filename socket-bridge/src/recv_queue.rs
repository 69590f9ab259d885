//! Inbound buffering.
//!
//! The [`ReceiveQueue`] holds everything the transport delivered that the
//! application has not read yet:
//! - For a stream socket, one ordered byte FIFO plus an end-of-stream flag.
//!   Reads may take any prefix; the remainder stays queued.
//! - For a datagram socket, a FIFO of whole [`Datagram`]s.  Each read pops
//!   exactly one; datagrams are never split or merged.
//!
//! The queue does not fire callbacks or send credit notifications; the
//! caller does that based on the return values.

use std::collections::VecDeque;

use crate::message::Endpoint;
use crate::state::Protocol;

/// One received datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub source: Endpoint,
    pub payload: Vec<u8>,
}

/// Result of reading from a stream queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamRead {
    /// This many bytes were appended to the caller's buffer (never 0).
    Data(usize),
    /// The queue is drained and the peer closed the stream.
    EndOfStream,
    /// The queue is drained and the stream is still open.
    Empty,
}

/// Receive buffer for one socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveQueue {
    Stream {
        /// In-order bytes not yet read.
        bytes: VecDeque<u8>,
        /// Set once the peer closed its side.  Never cleared.
        end_of_stream: bool,
    },
    Datagrams(VecDeque<Datagram>),
}

impl ReceiveQueue {
    pub fn new(protocol: Protocol) -> Self {
        match protocol {
            Protocol::Tcp => Self::Stream {
                bytes: VecDeque::new(),
                end_of_stream: false,
            },
            Protocol::Udp => Self::Datagrams(VecDeque::new()),
        }
    }

    /// Append stream bytes.  An empty `payload` marks end of stream.
    ///
    /// Data arriving after end of stream is discarded and `false` returned.
    pub fn push_stream(&mut self, payload: &[u8]) -> bool {
        let Self::Stream {
            bytes,
            end_of_stream,
        } = self
        else {
            debug_assert!(false, "push_stream on a datagram queue");
            return false;
        };
        if *end_of_stream {
            return false;
        }
        if payload.is_empty() {
            *end_of_stream = true;
        } else {
            bytes.extend(payload.iter().copied());
        }
        true
    }

    /// Append one datagram.
    pub fn push_datagram(&mut self, datagram: Datagram) {
        match self {
            Self::Datagrams(queue) => queue.push_back(datagram),
            Self::Stream { .. } => debug_assert!(false, "push_datagram on a stream queue"),
        }
    }

    /// Move up to `max_len` queued bytes (all of them when `None`) onto the
    /// end of `buf`.
    pub fn read_stream(&mut self, buf: &mut Vec<u8>, max_len: Option<usize>) -> StreamRead {
        let Self::Stream {
            bytes,
            end_of_stream,
        } = self
        else {
            return StreamRead::Empty;
        };
        if bytes.is_empty() {
            return if *end_of_stream {
                StreamRead::EndOfStream
            } else {
                StreamRead::Empty
            };
        }
        let n = max_len.map_or(bytes.len(), |m| m.min(bytes.len()));
        if n == 0 {
            return StreamRead::Empty;
        }
        buf.extend(bytes.drain(..n));
        StreamRead::Data(n)
    }

    /// Pop the oldest datagram, if any.
    pub fn pop_datagram(&mut self) -> Option<Datagram> {
        match self {
            Self::Datagrams(queue) => queue.pop_front(),
            Self::Stream { .. } => None,
        }
    }

    /// Bytes the next read could produce: every queued byte for a stream, the
    /// front datagram's length for a datagram socket.
    pub fn readable_len(&self) -> usize {
        match self {
            Self::Stream { bytes, .. } => bytes.len(),
            Self::Datagrams(queue) => queue.front().map_or(0, |d| d.payload.len()),
        }
    }

    /// Number of queued datagrams (0 for a stream).
    pub fn datagram_count(&self) -> usize {
        match self {
            Self::Datagrams(queue) => queue.len(),
            Self::Stream { .. } => 0,
        }
    }

    pub fn end_of_stream(&self) -> bool {
        matches!(
            self,
            Self::Stream {
                end_of_stream: true,
                ..
            }
        )
    }
}
