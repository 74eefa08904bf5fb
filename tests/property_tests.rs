//! Property-based tests for Parley
//!
//! Uses proptest to verify cross-crate invariants across large input spaces.

use proptest::prelude::*;

// ============================================================================
// Identity and Session Properties
// ============================================================================

mod session_properties {
    use super::*;
    use parley_core::{Identity, PeerId, SecureSession};

    fn session(local: &Identity, remote: &Identity) -> SecureSession {
        SecureSession::new(
            remote.peer_id(),
            *remote.public_key(),
            local.session_key(remote.public_key()).unwrap(),
        )
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Both ends of a pair derive the same session and can read each other
        #[test]
        fn sessions_interoperate(
            a in any::<[u8; 32]>(),
            b in any::<[u8; 32]>(),
            payload in proptest::collection::vec(any::<u8>(), 0..1024),
        ) {
            let alice = Identity::from_secret_bytes(a);
            let bob = Identity::from_secret_bytes(b);
            prop_assume!(alice.peer_id() != bob.peer_id());

            let at_alice = session(&alice, &bob);
            let at_bob = session(&bob, &alice);

            let envelope = at_alice.encrypt(&payload).unwrap();
            prop_assert_eq!(at_bob.decrypt(&envelope).unwrap(), payload.clone());

            let reply = at_bob.encrypt(&payload).unwrap();
            prop_assert_eq!(at_alice.decrypt(&reply).unwrap(), payload);
        }

        /// A third party's session never opens the pair's traffic
        #[test]
        fn outsider_cannot_decrypt(
            a in any::<[u8; 32]>(),
            b in any::<[u8; 32]>(),
            c in any::<[u8; 32]>(),
        ) {
            let alice = Identity::from_secret_bytes(a);
            let bob = Identity::from_secret_bytes(b);
            let eve = Identity::from_secret_bytes(c);
            prop_assume!(eve.peer_id() != bob.peer_id() && eve.peer_id() != alice.peer_id());
            prop_assume!(alice.peer_id() != bob.peer_id());

            let envelope = session(&alice, &bob).encrypt(b"secret").unwrap();
            prop_assert!(session(&eve, &alice).decrypt(&envelope).is_err());
        }

        /// Peer IDs certify exactly their own key
        #[test]
        fn peer_id_binds_key(a in any::<[u8; 32]>(), b in any::<[u8; 32]>()) {
            let alice = Identity::from_secret_bytes(a);
            let bob = Identity::from_secret_bytes(b);
            prop_assume!(alice.public_key() != bob.public_key());

            prop_assert!(alice.peer_id().matches_public_key(alice.public_key().as_bytes()));
            prop_assert!(!alice.peer_id().matches_public_key(bob.public_key().as_bytes()));
            prop_assert_eq!(alice.peer_id(), PeerId::from_public_key(alice.public_key().as_bytes()));
        }
    }
}

// ============================================================================
// Wire Properties
// ============================================================================

mod wire_properties {
    use super::*;
    use parley_crypto::aead::{AeadKey, Envelope};
    use parley_transport::framing::encode_frame;
    use parley_transport::{FrameError, read_frame};

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(future)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// A sealed envelope survives framing and opens on the far side
        #[test]
        fn framed_envelope_opens(
            key in any::<[u8; 32]>(),
            payload in proptest::collection::vec(any::<u8>(), 0..4096),
        ) {
            let key = AeadKey::new(key);
            let frame = encode_frame(&key.seal(&payload).unwrap().to_bytes(), 1 << 20).unwrap();

            let mut reader = frame.as_slice();
            let body = block_on(read_frame(&mut reader, 1 << 20)).unwrap().unwrap();
            let envelope = Envelope::from_bytes(&body).unwrap();

            prop_assert_eq!(key.open(&envelope).unwrap(), payload);
        }

        /// Declared lengths above the limit are refused before any body is read
        #[test]
        fn oversized_declaration_rejected(max in 28usize..4096, excess in 1u32..1_000_000) {
            let declared = max as u32 + excess;
            let header = declared.to_be_bytes();

            let mut reader = &header[..];
            let result = block_on(read_frame(&mut reader, max));
            let is_too_large = matches!(result, Err(FrameError::TooLarge { .. }));
            prop_assert!(is_too_large);
        }

        /// Frames split at any point leave a truncation error, never a short payload
        #[test]
        fn truncated_frame_detected(
            payload in proptest::collection::vec(any::<u8>(), 1..512),
            cut in any::<prop::sample::Index>(),
        ) {
            let frame = encode_frame(&payload, 1 << 20).unwrap();
            // Keep at least one byte so the stream is not a clean EOF
            let cut = 1 + cut.index(frame.len() - 1);

            let mut reader = &frame[..cut];
            let result = block_on(read_frame(&mut reader, 1 << 20));
            prop_assert!(result.is_err());
        }
    }
}

// ============================================================================
// Overlay Properties
// ============================================================================

mod overlay_properties {
    use super::*;
    use parley_discovery::NodeId;

    proptest! {
        /// XOR distance is a metric on identifiers
        #[test]
        fn distance_is_symmetric_and_zero_on_self(a in any::<[u8; 32]>(), b in any::<[u8; 32]>()) {
            let a = NodeId::from_bytes(a);
            let b = NodeId::from_bytes(b);

            prop_assert_eq!(a.distance(&b), b.distance(&a));
            prop_assert_eq!(a.distance(&a), NodeId::from_bytes([0u8; 32]));
            if a != b {
                prop_assert!(a.distance(&b) != NodeId::from_bytes([0u8; 32]));
            }
        }

        /// Record keys land in a different place than peer IDs for the same bytes
        #[test]
        fn record_keys_domain_separated(key in any::<[u8; 32]>()) {
            prop_assert_ne!(NodeId::for_record_key(&key), NodeId::from_public_key(&key));
        }

        /// Every distinct peer falls in exactly one bucket
        #[test]
        fn bucket_index_matches_distance(a in any::<[u8; 32]>(), b in any::<[u8; 32]>()) {
            let local = NodeId::from_bytes(a);
            let other = NodeId::from_bytes(b);

            match other.bucket_index(&local) {
                None => prop_assert_eq!(local, other),
                Some(index) => {
                    prop_assert!(index < NodeId::BITS);
                    prop_assert_eq!(index, NodeId::BITS - 1 - local.distance(&other).leading_zeros());
                }
            }
        }
    }
}
