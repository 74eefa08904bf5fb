//! Overlay identifiers and the XOR distance metric.
//!
//! A [`NodeId`] names both a DHT participant and a messaging peer: it is the
//! domain-separated BLAKE3 digest of the peer's X25519 public key. Because the
//! identifier commits to the key, anyone holding a key and an identifier can
//! check they belong together without trusting the source of either.
//!
//! Record keys live in the same 256-bit space so values are stored on the
//! nodes whose identifiers are closest to them.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Domain tag for deriving a peer identifier from a public key.
const PEER_ID_CONTEXT: &str = "parley 2024 peer id v1";

/// Domain tag for mapping application record keys into the DHT key space.
const RECORD_KEY_CONTEXT: &str = "parley 2024 dht record key v1";

/// 256-bit overlay identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId([u8; 32]);

/// Error parsing a [`NodeId`] from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid node id: {0}")]
pub struct ParseNodeIdError(String);

impl NodeId {
    /// Number of bits in a NodeId
    pub const BITS: usize = 256;

    /// Generate a random NodeId.
    ///
    /// Used for bucket refresh targets and tests; peers derive their own
    /// identifier with [`NodeId::from_public_key`].
    #[must_use]
    pub fn random() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill(&mut bytes[..]);
        Self(bytes)
    }

    /// Derive the identifier for an X25519 public key.
    ///
    /// # Examples
    ///
    /// ```
    /// use parley_discovery::dht::NodeId;
    ///
    /// let pubkey = [42u8; 32];
    /// assert_eq!(NodeId::from_public_key(&pubkey), NodeId::from_public_key(&pubkey));
    /// ```
    #[must_use]
    pub fn from_public_key(public_key: &[u8; 32]) -> Self {
        Self(blake3::derive_key(PEER_ID_CONTEXT, public_key))
    }

    /// Map an arbitrary application key into the DHT key space.
    #[must_use]
    pub fn for_record_key(key: &[u8]) -> Self {
        Self(blake3::derive_key(RECORD_KEY_CONTEXT, key))
    }

    /// Check that `public_key` is the key this identifier was derived from.
    #[must_use]
    pub fn matches_public_key(&self, public_key: &[u8; 32]) -> bool {
        *self == Self::from_public_key(public_key)
    }

    /// XOR distance to another NodeId.
    ///
    /// ```
    /// use parley_discovery::dht::NodeId;
    ///
    /// let id1 = NodeId::from_bytes([1u8; 32]);
    /// let id2 = NodeId::from_bytes([2u8; 32]);
    /// assert_eq!(id1.distance(&id2).as_bytes()[0], 3);
    /// ```
    #[must_use]
    pub fn distance(&self, other: &NodeId) -> NodeId {
        let mut result = [0u8; 32];
        for (out, (a, b)) in result.iter_mut().zip(self.0.iter().zip(other.0.iter())) {
            *out = a ^ b;
        }
        NodeId(result)
    }

    /// Count leading zero bits (0-256).
    #[must_use]
    pub fn leading_zeros(&self) -> usize {
        let mut count = 0;
        for byte in &self.0 {
            if *byte == 0 {
                count += 8;
            } else {
                count += byte.leading_zeros() as usize;
                break;
            }
        }
        count
    }

    /// Bucket index of this id relative to `local_id`.
    ///
    /// Index 255 holds the farthest half of the id space. Returns `None` for
    /// the local id itself.
    #[must_use]
    pub fn bucket_index(&self, local_id: &NodeId) -> Option<usize> {
        let leading = self.distance(local_id).leading_zeros();
        if leading == Self::BITS {
            None
        } else {
            Some(Self::BITS - 1 - leading)
        }
    }

    /// Get the raw bytes of the NodeId
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Create NodeId from raw bytes
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Full 64-character lowercase hex form.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 8 bytes as hex, for log lines.
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl FromStr for NodeId {
    type Err = ParseNodeIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|e| ParseNodeIdError(format!("{s:?}: {e}")))?;
        Ok(Self(bytes))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.short())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short())
    }
}

impl PartialOrd for NodeId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NodeId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}
