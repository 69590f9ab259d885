//! Socket option identifiers.
//!
//! The values are opaque to the socket layer; their meaning is defined by the
//! native transport.  The only thing checked locally is whether the
//! protocol can carry the option at all.

use crate::state::Protocol;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketOption {
    /// Native send-buffer size in bytes.
    SendBufferSize,
    /// Native receive-buffer size in bytes.
    ReceiveBufferSize,
    /// Disable Nagle's algorithm (TCP).
    NoDelay,
    /// Connect timeout in milliseconds (TCP).
    ConnectionTimeout,
    /// Graceful-shutdown timeout in milliseconds (TCP).
    ShutdownTimeout,
    /// Allow rebinding an address in use.
    ReuseAddress,
}

impl SocketOption {
    pub const ALL: [SocketOption; 6] = [
        Self::SendBufferSize,
        Self::ReceiveBufferSize,
        Self::NoDelay,
        Self::ConnectionTimeout,
        Self::ShutdownTimeout,
        Self::ReuseAddress,
    ];

    /// Wire identifier.
    pub fn id(self) -> u32 {
        match self {
            Self::SendBufferSize => 1,
            Self::ReceiveBufferSize => 2,
            Self::NoDelay => 3,
            Self::ConnectionTimeout => 4,
            Self::ShutdownTimeout => 5,
            Self::ReuseAddress => 6,
        }
    }

    pub fn from_id(id: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|o| o.id() == id)
    }

    pub fn applies_to(self, protocol: Protocol) -> bool {
        match self {
            Self::NoDelay | Self::ConnectionTimeout | Self::ShutdownTimeout => protocol.is_stream(),
            Self::SendBufferSize | Self::ReceiveBufferSize | Self::ReuseAddress => true,
        }
    }
}
