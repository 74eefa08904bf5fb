//! Security event accounting
//!
//! Every security-relevant failure (tampered envelope, degenerate key,
//! oversized frame, identity mismatch, failed key confirmation) is logged at `warn` on the
//! `parley::security` target and counted here. Counters are lock-free and
//! shared by the session manager, channels and node.

use parley_crypto::CryptoError;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Security event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecurityEvent {
    /// AEAD tag verification failed
    AuthenticationFailed,
    /// Peer key is all-zero or low-order
    InvalidCurvePoint,
    /// Inbound frame declared a length above the limit
    OversizedFrame,
    /// Envelope shorter than nonce and tag
    MalformedEnvelope,
    /// Peer presented a key that does not hash to its identifier
    IdentityMismatch,
    /// Hello frame was not a single 32-byte public key
    MalformedHello,
    /// Opener could not prove possession of its hello key
    KeyConfirmationFailed,
}

impl SecurityEvent {
    /// Stable name for log fields.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed => "authentication_failed",
            Self::InvalidCurvePoint => "invalid_curve_point",
            Self::OversizedFrame => "oversized_frame",
            Self::MalformedEnvelope => "malformed_envelope",
            Self::IdentityMismatch => "identity_mismatch",
            Self::MalformedHello => "malformed_hello",
            Self::KeyConfirmationFailed => "key_confirmation_failed",
        }
    }

    /// The event a cryptographic failure represents, if it is one.
    #[must_use]
    pub fn from_crypto_error(err: &CryptoError) -> Option<Self> {
        match err {
            CryptoError::AuthenticationFailed => Some(Self::AuthenticationFailed),
            CryptoError::InvalidCurvePoint => Some(Self::InvalidCurvePoint),
            CryptoError::MalformedCiphertext { .. } => Some(Self::MalformedEnvelope),
            _ => None,
        }
    }
}

impl fmt::Display for SecurityEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Security metrics
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SecurityMetrics {
    /// Envelopes that failed authentication
    pub authentication_failures: u64,
    /// Degenerate peer keys rejected
    pub invalid_curve_points: u64,
    /// Oversized inbound frames
    pub oversized_frames: u64,
    /// Envelopes too short to decode
    pub malformed_envelopes: u64,
    /// Hello keys that did not match the expected peer
    pub identity_mismatches: u64,
    /// Hello frames of the wrong size
    pub malformed_hellos: u64,
    /// Hello keys whose owner failed the challenge
    pub key_confirmation_failures: u64,
}

impl SecurityMetrics {
    /// Sum of all counters.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.authentication_failures
            + self.invalid_curve_points
            + self.oversized_frames
            + self.malformed_envelopes
            + self.identity_mismatches
            + self.malformed_hellos
            + self.key_confirmation_failures
    }
}

/// Shared security counters.
#[derive(Debug, Default)]
pub struct SecurityStats {
    authentication_failures: AtomicU64,
    invalid_curve_points: AtomicU64,
    oversized_frames: AtomicU64,
    malformed_envelopes: AtomicU64,
    identity_mismatches: AtomicU64,
    malformed_hellos: AtomicU64,
    key_confirmation_failures: AtomicU64,
}

impl SecurityStats {
    /// Create zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Log and count one event. `source` names the peer or address involved.
    pub fn record(&self, event: SecurityEvent, source: impl fmt::Display) {
        let counter = match event {
            SecurityEvent::AuthenticationFailed => &self.authentication_failures,
            SecurityEvent::InvalidCurvePoint => &self.invalid_curve_points,
            SecurityEvent::OversizedFrame => &self.oversized_frames,
            SecurityEvent::MalformedEnvelope => &self.malformed_envelopes,
            SecurityEvent::IdentityMismatch => &self.identity_mismatches,
            SecurityEvent::MalformedHello => &self.malformed_hellos,
            SecurityEvent::KeyConfirmationFailed => &self.key_confirmation_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        tracing::warn!(
            target: "parley::security",
            event = event.as_str(),
            source = %source,
            "Security event"
        );
    }

    /// Current counter values.
    #[must_use]
    pub fn snapshot(&self) -> SecurityMetrics {
        SecurityMetrics {
            authentication_failures: self.authentication_failures.load(Ordering::Relaxed),
            invalid_curve_points: self.invalid_curve_points.load(Ordering::Relaxed),
            oversized_frames: self.oversized_frames.load(Ordering::Relaxed),
            malformed_envelopes: self.malformed_envelopes.load(Ordering::Relaxed),
            identity_mismatches: self.identity_mismatches.load(Ordering::Relaxed),
            malformed_hellos: self.malformed_hellos.load(Ordering::Relaxed),
            key_confirmation_failures: self.key_confirmation_failures.load(Ordering::Relaxed),
        }
    }
}
