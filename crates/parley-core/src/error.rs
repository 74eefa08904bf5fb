//! Error types for the node API
//!
//! Errors are categorized to support retry logic and security accounting.
//!
//! # Error Categories
//!
//! - **Transient**: may succeed on retry (timeouts, unreachable peers, broken channels)
//! - **Permanent**: will not succeed without intervention (bad config, bad key material)
//! - **Security**: caused by a misbehaving or malicious peer; never swallowed
//!
//! # Example
//!
//! ```no_run
//! use parley_core::NodeError;
//!
//! fn handle_error(err: NodeError) {
//!     if err.is_security() {
//!         eprintln!("peer misbehaved: {err}");
//!     } else if err.should_retry() {
//!         eprintln!("retrying: {err}");
//!     }
//! }
//! ```

use crate::PeerId;
use parley_crypto::CryptoError;
use parley_discovery::DirectoryError;
use parley_transport::{FrameError, TransportError};
use std::borrow::Cow;
use thiserror::Error;

/// Errors that can occur in node operations
#[derive(Debug, Error, Clone)]
pub enum NodeError {
    // ============ Transport Errors ============
    /// Failed to initialize transport layer
    #[error("Transport initialization failed: {0}")]
    TransportInit(Cow<'static, str>),

    /// Transport operation failed
    #[error("Transport error: {0}")]
    Transport(Cow<'static, str>),

    // ============ Cryptographic Errors ============
    /// Cryptographic operation failed
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Hello exchange failed or the peer presented the wrong identity
    #[error("Handshake failed: {0}")]
    Handshake(Cow<'static, str>),

    // ============ Session Errors ============
    /// No secure session with the peer
    #[error("No session for peer {0}")]
    NoSession(PeerId),

    // ============ Discovery Errors ============
    /// No bootstrap seed was reachable
    #[error("Bootstrap failed: {0}")]
    Bootstrap(Cow<'static, str>),

    /// Record absent or expired in the directory
    #[error("Record not found")]
    RecordNotFound,

    /// Directory lookup could not locate the peer
    #[error("Peer not found in directory: {0}")]
    PeerUnreachable(PeerId),

    /// Other directory failure
    #[error("Discovery error: {0}")]
    Discovery(Cow<'static, str>),

    // ============ Channel Errors ============
    /// Every known address of the peer failed to dial or handshake
    #[error("Peer {peer} unreachable: all {attempts} address(es) failed")]
    Unreachable {
        /// Peer that was dialed
        peer: PeerId,
        /// Addresses tried
        attempts: usize,
    },

    /// Writing a frame failed or timed out; the channel is broken
    #[error("Channel write failed: {0}")]
    ChannelWrite(Cow<'static, str>),

    /// Channel already closed or broken
    #[error("Channel closed")]
    ChannelClosed,

    /// Inbound frame declared a length above the limit
    #[error("Frame of {declared} bytes exceeds the {max} byte limit")]
    FrameTooLarge {
        /// Declared length
        declared: usize,
        /// Configured limit
        max: usize,
    },

    /// Outbound message does not fit in one frame
    #[error("Message of {size} bytes exceeds the {max} byte frame limit")]
    MessageTooLarge {
        /// Encoded envelope size
        size: usize,
        /// Configured limit
        max: usize,
    },

    // ============ I/O Errors ============
    /// I/O error
    #[error("I/O error: {0}")]
    Io(String),

    // ============ Configuration & State Errors ============
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(Cow<'static, str>),

    /// Invalid state for the requested operation
    #[error("Invalid state: {0}")]
    InvalidState(Cow<'static, str>),

    // ============ Operational Errors ============
    /// Operation timed out
    #[error("Operation timed out: {0}")]
    Timeout(Cow<'static, str>),
}

impl NodeError {
    /// Returns true if this error is transient and may succeed on retry
    ///
    /// Transient errors include:
    /// - Network timeouts and transport failures
    /// - Bootstrap, lookup and dial failures (peers come and go)
    /// - Broken channels (a new one can be opened)
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            NodeError::Transport(_)
                | NodeError::Bootstrap(_)
                | NodeError::RecordNotFound
                | NodeError::PeerUnreachable(_)
                | NodeError::Discovery(_)
                | NodeError::Unreachable { .. }
                | NodeError::ChannelWrite(_)
                | NodeError::ChannelClosed
                | NodeError::Io(_)
                | NodeError::Timeout(_)
        )
    }

    /// Returns true if this error is permanent and will not succeed on retry
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        match self {
            NodeError::TransportInit(_)
            | NodeError::NoSession(_)
            | NodeError::MessageTooLarge { .. }
            | NodeError::InvalidConfig(_)
            | NodeError::InvalidState(_) => true,
            NodeError::Crypto(e) => !e.is_security(),
            _ => false,
        }
    }

    /// Returns true for errors caused by a misbehaving or malicious peer
    ///
    /// These are logged on the `parley::security` target and counted; the
    /// offending message is dropped or the channel closed.
    #[must_use]
    pub fn is_security(&self) -> bool {
        match self {
            NodeError::Crypto(e) => e.is_security(),
            NodeError::Handshake(_) | NodeError::FrameTooLarge { .. } => true,
            _ => false,
        }
    }

    /// Returns true if this error should trigger a retry
    #[must_use]
    pub fn should_retry(&self) -> bool {
        self.is_transient() && !matches!(self, NodeError::Timeout(_))
    }

    /// Create a transport error with static context (zero allocation)
    #[must_use]
    pub const fn transport(context: &'static str) -> Self {
        NodeError::Transport(Cow::Borrowed(context))
    }

    /// Create a timeout error with static context (zero allocation)
    #[must_use]
    pub const fn timeout(context: &'static str) -> Self {
        NodeError::Timeout(Cow::Borrowed(context))
    }

    /// Create a handshake error with static context (zero allocation)
    #[must_use]
    pub const fn handshake(context: &'static str) -> Self {
        NodeError::Handshake(Cow::Borrowed(context))
    }

    /// Create an invalid state error with static context (zero allocation)
    #[must_use]
    pub const fn invalid_state(context: &'static str) -> Self {
        NodeError::InvalidState(Cow::Borrowed(context))
    }

    /// Create an invalid configuration error with static context (zero allocation)
    #[must_use]
    pub const fn invalid_config(context: &'static str) -> Self {
        NodeError::InvalidConfig(Cow::Borrowed(context))
    }
}

impl From<TransportError> for NodeError {
    fn from(err: TransportError) -> Self {
        NodeError::Transport(Cow::Owned(err.to_string()))
    }
}

impl From<FrameError> for NodeError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::TooLarge { declared, max } => NodeError::FrameTooLarge { declared, max },
            FrameError::Truncated { .. } => NodeError::Transport(Cow::Owned(err.to_string())),
            FrameError::Io(e) => NodeError::Io(e.to_string()),
        }
    }
}

impl From<DirectoryError> for NodeError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::Bootstrap(reason) => NodeError::Bootstrap(Cow::Owned(reason)),
            DirectoryError::NotFound => NodeError::RecordNotFound,
            DirectoryError::PeerUnreachable(peer) => NodeError::PeerUnreachable(peer),
            DirectoryError::Timeout(addr) => NodeError::Timeout(Cow::Owned(format!("RPC to {addr}"))),
            DirectoryError::Shutdown => NodeError::invalid_state("directory is shut down"),
            DirectoryError::Transport(e) => e.into(),
            other => NodeError::Discovery(Cow::Owned(other.to_string())),
        }
    }
}

impl From<std::io::Error> for NodeError {
    fn from(err: std::io::Error) -> Self {
        NodeError::Io(err.to_string())
    }
}

/// Result type for node operations
pub type Result<T> = std::result::Result<T, NodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        assert!(NodeError::Timeout(Cow::Borrowed("test")).is_transient());
        assert!(NodeError::transport("reset").is_transient());
        assert!(NodeError::Bootstrap(Cow::Borrowed("no seeds")).is_transient());
        assert!(NodeError::RecordNotFound.is_transient());
        assert!(NodeError::PeerUnreachable(PeerId::random()).is_transient());
        assert!(NodeError::ChannelWrite(Cow::Borrowed("broken pipe")).is_transient());
        assert!(
            NodeError::Unreachable {
                peer: PeerId::random(),
                attempts: 2
            }
            .is_transient()
        );
    }

    #[test]
    fn test_permanent_errors() {
        assert!(NodeError::invalid_config("no listen address").is_permanent());
        assert!(NodeError::NoSession(PeerId::random()).is_permanent());
        assert!(NodeError::Crypto(CryptoError::RandomSource("no entropy".into())).is_permanent());
        assert!(
            NodeError::Crypto(CryptoError::InvalidKeyLength {
                expected: 32,
                actual: 16
            })
            .is_permanent()
        );
    }

    #[test]
    fn test_security_errors() {
        assert!(NodeError::Crypto(CryptoError::AuthenticationFailed).is_security());
        assert!(NodeError::Crypto(CryptoError::InvalidCurvePoint).is_security());
        assert!(
            NodeError::Crypto(CryptoError::MalformedCiphertext { len: 3, min: 28 }).is_security()
        );
        assert!(NodeError::handshake("identity mismatch").is_security());
        assert!(
            NodeError::FrameTooLarge {
                declared: 2_000_000,
                max: 1 << 20
            }
            .is_security()
        );
        assert!(!NodeError::RecordNotFound.is_security());
    }

    #[test]
    fn test_should_retry() {
        assert!(NodeError::transport("test").should_retry());
        assert!(NodeError::ChannelClosed.should_retry());

        // Timeouts should not auto-retry (caller decides)
        assert!(!NodeError::timeout("hello").should_retry());

        assert!(!NodeError::invalid_config("test").should_retry());
        assert!(!NodeError::Crypto(CryptoError::AuthenticationFailed).should_retry());
    }

    #[test]
    fn test_mutual_exclusivity() {
        let errors = [
            NodeError::timeout("t"),
            NodeError::transport("t"),
            NodeError::RecordNotFound,
            NodeError::invalid_config("t"),
            NodeError::NoSession(PeerId::random()),
            NodeError::Crypto(CryptoError::AuthenticationFailed),
            NodeError::Crypto(CryptoError::EncryptionFailed),
            NodeError::handshake("t"),
        ];

        for err in &errors {
            let categories =
                [err.is_transient(), err.is_permanent(), err.is_security()];
            assert_eq!(categories.iter().filter(|c| **c).count(), 1, "{err}");
        }
    }

    #[test]
    fn test_frame_error_conversion() {
        let err: NodeError = FrameError::TooLarge {
            declared: 2_000_000,
            max: 1_048_576,
        }
        .into();
        assert!(matches!(
            err,
            NodeError::FrameTooLarge {
                declared: 2_000_000,
                max: 1_048_576
            }
        ));
    }

    #[test]
    fn test_directory_error_conversion() {
        let peer = PeerId::random();
        assert!(matches!(
            NodeError::from(DirectoryError::NotFound),
            NodeError::RecordNotFound
        ));
        assert!(matches!(
            NodeError::from(DirectoryError::PeerUnreachable(peer)),
            NodeError::PeerUnreachable(p) if p == peer
        ));
        assert!(matches!(
            NodeError::from(DirectoryError::Bootstrap("none".into())),
            NodeError::Bootstrap(_)
        ));
    }

    #[test]
    fn test_error_display() {
        let err = NodeError::Unreachable {
            peer: PeerId::from_bytes([0xab; 32]),
            attempts: 3,
        };
        let text = err.to_string();
        assert!(text.contains("abababab"));
        assert!(text.contains('3'));
    }
}
