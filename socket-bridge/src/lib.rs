//! `socket-bridge`: TCP and UDP sockets whose native side lives behind an
//! asynchronous message channel.
//!
//! # Architecture
//!
//! ```text
//!   caller ──── create/connect/send/recv ────▶ ┌──────────────────────┐
//!     ▲                                        │       Network        │
//!     │ on_readable / on_writable / on_error   │  Registry<Socket>    │
//!     └────────────────────────────────────────│  handle → Socket     │
//!                                              └───┬──────────────▲───┘
//!                                        Command   │              │  Event
//!                                  (Handle, ...)   │              │  (Handle, ...)
//!                                              ┌───▼────┐    ┌────┴─────┐
//!                                              │Channel │    │  Driver  │
//!                                              └───┬────┘    └────▲─────┘
//!                                                  │  native      │
//!                                              ┌───▼──────────────┴───┐
//!                                              │ transport (Loopback) │
//!                                              └──────────────────────┘
//! ```
//!
//! Every socket is a small state machine ([`state`]) wrapped around a
//! [`buffered_io::BufferedIo`]: a send-credit counter ([`credit`]) and a
//! receive queue ([`recv_queue`]).  Nothing blocks.  Sends consume credit
//! the transport later returns; receives drain bytes the transport already
//! delivered.  Calls that expect an answer (bind, options, multicast) carry
//! a [`pending::CallId`] and complete through a one-shot continuation.
//!
//! Modules:
//! - [`state`]       socket states, protocols and the legality table
//! - [`credit`]      send credit accounting
//! - [`recv_queue`]  byte stream / datagram receive queue
//! - [`buffered_io`] credit + queue, per protocol
//! - [`socket`]      one socket: state machine, buffers, callbacks
//! - [`pending`]     correlation ids for in-flight calls
//! - [`registry`]    generational handles
//! - [`network`]     the caller-facing API and event dispatch
//! - [`message`]     command and event vocabulary
//! - [`channel`]     outbound channel trait and its mpsc implementation
//! - [`driver`]      pumps inbound events into the network
//! - [`loopback`]    in-process transport for tests and the demo
//! - [`options`]     socket option ids
//! - [`config`]      per-network settings
//! - [`error`]       error codes and error types

pub mod buffered_io;
pub mod channel;
pub mod config;
pub mod credit;
pub mod driver;
pub mod error;
pub mod loopback;
pub mod message;
pub mod network;
pub mod options;
pub mod pending;
pub mod recv_queue;
pub mod registry;
pub mod socket;
pub mod state;

pub use channel::{Channel, MpscChannel};
pub use config::SocketConfig;
pub use driver::Driver;
pub use error::{DispatchError, ErrorCode, SocketError, TransportError};
pub use message::{Command, Completion, Endpoint, Event, MembershipOptions};
pub use network::Network;
pub use options::SocketOption;
pub use registry::Handle;
pub use state::{Protocol, Security, SocketState};
