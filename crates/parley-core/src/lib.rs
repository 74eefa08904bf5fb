//! # Parley Core
//!
//! Messaging core of the Parley peer-to-peer node.
//!
//! This crate provides:
//! - Node identity (X25519 keypair and self-certifying peer ID)
//! - Secure sessions with per-peer derived AES-256-GCM keys
//! - Message channels: identity hello plus length-prefixed sealed envelopes
//! - The [`Node`] orchestrator tying the overlay directory, sessions and
//!   channels together
//! - Security event accounting
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                           Node                                   │
//! │   (resolve peer, open channel, seal, send; inbound gateway)     │
//! ├────────────────────────────────┬────────────────────────────────┤
//! │        SessionManager          │          Channels              │
//! │  (one derived key per peer)    │  (hello + framed envelopes)    │
//! ├────────────────────────────────┴────────────────────────────────┤
//! │              Overlay directory  /  Stream transport              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod config;
pub mod error;
pub mod identity;
pub mod node;
pub mod security;
pub mod session;
pub mod session_manager;

pub use channel::{CHAT_PROTOCOL, Channel, ChannelListener, PendingChannel};
pub use config::{ChannelConfig, DEFAULT_PORT, DiscoveryConfig, NodeConfig};
pub use error::{NodeError, Result};
pub use identity::Identity;
pub use node::{InboundMessage, Node};
pub use security::{SecurityEvent, SecurityMetrics, SecurityStats};
pub use session::SecureSession;
pub use session_manager::SessionManager;

/// Peer identifier: the BLAKE3 digest of a peer's X25519 public key.
///
/// Shared with the overlay directory, where it doubles as the node ID.
pub type PeerId = parley_discovery::NodeId;
