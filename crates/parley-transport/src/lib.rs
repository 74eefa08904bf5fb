//! # Parley Transport
//!
//! Stream transport substrate for the Parley messaging node.
//!
//! This crate provides:
//! - The [`Transport`] trait: dial a peer address on a named protocol and
//!   register handlers for inbound streams on a named protocol
//! - [`TcpTransport`], a plain TCP implementation with a one-byte-length
//!   protocol preamble
//! - Length-prefixed framing shared by the message channel and the DHT RPCs
//!
//! The transport carries no encryption of its own; confidentiality and
//! integrity are applied above it.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod framing;
pub mod tcp;
pub mod transport;

pub use framing::{DEFAULT_MAX_FRAME_SIZE, FrameError, LENGTH_PREFIX_SIZE, read_frame, write_frame};
pub use tcp::{TcpTransport, TcpTransportConfig};
pub use transport::{
    BoxedStream, ByteStream, InboundStream, Transport, TransportError, TransportResult,
    TransportStats,
};

/// Longest protocol identifier the preamble can carry.
pub const MAX_PROTOCOL_ID_LEN: usize = u8::MAX as usize;
