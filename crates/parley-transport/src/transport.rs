//! Transport trait abstraction.
//!
//! The messaging core only needs two things from the network: open an ordered,
//! reliable byte stream to an address on a named protocol, and receive the
//! streams other peers open to us on a named protocol. This module defines
//! that contract so the core can run over TCP today and another substrate
//! later without changing application code.

use crate::MAX_PROTOCOL_ID_LEN;
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

/// Transport layer errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// I/O error from underlying transport
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Transport is closed
    #[error("Transport is closed")]
    Closed,

    /// Address binding failed
    #[error("Failed to bind to address: {0}")]
    BindFailed(String),

    /// Connection failed
    #[error("Connection to {addr} failed: {reason}")]
    ConnectionFailed {
        /// Remote address
        addr: SocketAddr,
        /// Failure description
        reason: String,
    },

    /// Dial did not complete in time
    #[error("Connection to {0} timed out")]
    Timeout(SocketAddr),

    /// A handler is already registered for the protocol
    #[error("Already listening on protocol {0}")]
    AlreadyListening(String),

    /// Protocol identifier is empty or too long for the preamble
    #[error("Invalid protocol identifier: {0:?}")]
    InvalidProtocol(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl TransportError {
    /// Returns true if retrying the operation (possibly on another address)
    /// may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::ConnectionFailed { .. } | Self::Timeout(_)
        )
    }
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// An ordered, reliable, bidirectional byte stream.
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> ByteStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Type-erased byte stream handed out by a [`Transport`].
pub type BoxedStream = Box<dyn ByteStream>;

/// A stream opened to us by a remote peer.
pub struct InboundStream {
    /// Address the connection came from
    pub remote_addr: SocketAddr,
    /// Protocol the remote asked for
    pub protocol: String,
    /// The stream, positioned after the protocol preamble
    pub stream: BoxedStream,
}

impl std::fmt::Debug for InboundStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundStream")
            .field("remote_addr", &self.remote_addr)
            .field("protocol", &self.protocol)
            .finish_non_exhaustive()
    }
}

/// Check a protocol identifier fits the preamble.
///
/// # Errors
///
/// Returns [`TransportError::InvalidProtocol`] if the identifier is empty or
/// longer than [`MAX_PROTOCOL_ID_LEN`] bytes.
pub fn validate_protocol(protocol: &str) -> TransportResult<()> {
    if protocol.is_empty() || protocol.len() > MAX_PROTOCOL_ID_LEN {
        return Err(TransportError::InvalidProtocol(protocol.to_string()));
    }
    Ok(())
}

/// Async stream transport.
///
/// # Examples
///
/// ```no_run
/// use parley_transport::{TcpTransport, TcpTransportConfig, Transport};
/// use tokio::io::AsyncWriteExt;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let transport = TcpTransport::bind(&["127.0.0.1:0".parse()?], TcpTransportConfig::default()).await?;
/// let mut inbound = transport.listen("/echo/1.0.0")?;
///
/// let mut stream = transport.dial("127.0.0.1:9000".parse()?, "/echo/1.0.0").await?;
/// stream.write_all(b"ping").await?;
///
/// while let Some(incoming) = inbound.recv().await {
///     println!("stream from {}", incoming.remote_addr);
/// }
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a stream to `addr` speaking `protocol`.
    ///
    /// # Errors
    /// Returns `TransportError` if the connection cannot be established
    async fn dial(&self, addr: SocketAddr, protocol: &str) -> TransportResult<BoxedStream>;

    /// Register the handler for inbound streams on `protocol`.
    ///
    /// Streams arrive on the returned receiver in accept order. The receiver
    /// yields `None` once the transport is closed.
    ///
    /// # Errors
    /// Returns `TransportError::AlreadyListening` if a handler exists
    fn listen(&self, protocol: &str) -> TransportResult<mpsc::Receiver<InboundStream>>;

    /// Addresses this transport accepts connections on.
    fn local_addrs(&self) -> Vec<SocketAddr>;

    /// Close the transport and release resources.
    ///
    /// After calling this method, all subsequent operations should
    /// return `TransportError::Closed`.
    ///
    /// # Errors
    /// Returns `TransportError` if closing fails
    async fn close(&self) -> TransportResult<()>;

    /// Check if the transport is closed.
    fn is_closed(&self) -> bool;

    /// Get transport statistics (optional).
    fn stats(&self) -> TransportStats {
        TransportStats::default()
    }
}

/// Transport statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Outbound streams opened
    pub dialed: u64,
    /// Outbound dial failures
    pub dial_errors: u64,
    /// Inbound streams routed to a handler
    pub accepted: u64,
    /// Inbound connections dropped (bad preamble or unknown protocol)
    pub rejected: u64,
}

impl TransportStats {
    /// Create new empty statistics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}
