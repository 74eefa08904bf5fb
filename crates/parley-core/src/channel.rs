//! Message channels
//!
//! A channel is one transport stream to a peer on [`CHAT_PROTOCOL`], opened
//! after a hello exchange that binds the stream to both identities:
//!
//! ```text
//! Opener                                   Acceptor
//!    |------ hello: pubkey (32) ---------------->|
//!    |<----- hello: pubkey (32) || challenge (32) |  opener checks H(key) == expected id
//!    |------ confirm: seal(k, challenge) -------->|  acceptor checks the opener holds its key
//!    |                                            |
//!    |== frame: len:u32 || envelope ============>|
//!    |<= frame: len:u32 || envelope =============|
//! ```
//!
//! `k` is the session key both sides derive from the two hello keys. An
//! acceptor yields no channel until the confirmation opens to its challenge,
//! so a peer that only knows someone else's public key never gets one.
//!
//! Hello and message frames share the length-prefixed framing. A send
//! writes the complete frame from one buffer under the channel's writer
//! lock; if it fails, times out or is cancelled part way, the channel is
//! marked broken and never written again.

use crate::PeerId;
use crate::config::ChannelConfig;
use crate::error::{NodeError, Result};
use crate::identity::Identity;
use crate::security::{SecurityEvent, SecurityStats};
use parley_crypto::X25519_PUBLIC_KEY_SIZE;
use parley_crypto::aead::{AeadKey, Envelope, NONCE_SIZE, TAG_SIZE};
use parley_crypto::constant_time::{ct_eq, ct_is_zero};
use parley_crypto::random::random_32;
use parley_crypto::x25519::PublicKey;
use parley_discovery::PeerRecord;
use parley_transport::framing::encode_frame;
use parley_transport::{BoxedStream, FrameError, InboundStream, Transport, read_frame, write_frame};
use std::borrow::Cow;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{Mutex, mpsc};
use tokio::time::timeout;

/// Protocol identifier for message channels.
pub const CHAT_PROTOCOL: &str = "/chat/1.0.0";

/// Size of the opener's hello: its public key.
const HELLO_SIZE: usize = X25519_PUBLIC_KEY_SIZE;

/// Size of the acceptor's challenge.
const CHALLENGE_SIZE: usize = 32;

/// Size of the acceptor's hello: public key then challenge.
const ACCEPT_HELLO_SIZE: usize = HELLO_SIZE + CHALLENGE_SIZE;

/// Size of the opener's confirmation envelope.
const CONFIRM_SIZE: usize = NONCE_SIZE + CHALLENGE_SIZE + TAG_SIZE;

/// Marks the channel broken unless disarmed, so a send dropped mid-write
/// leaves no reusable half-written stream behind.
struct BrokenOnDrop<'a> {
    flag: &'a AtomicBool,
    armed: bool,
}

impl<'a> BrokenOnDrop<'a> {
    fn new(flag: &'a AtomicBool) -> Self {
        Self { flag, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for BrokenOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.flag.store(true, Ordering::SeqCst);
        }
    }
}

/// Read one handshake frame of at most `max` bytes.
async fn read_handshake_frame(
    stream: &mut BoxedStream,
    max: usize,
    remote_addr: SocketAddr,
    security: &SecurityStats,
    oversized: SecurityEvent,
) -> Result<Vec<u8>> {
    match read_frame(stream, max).await {
        Ok(Some(frame)) => Ok(frame),
        Ok(None) => Err(NodeError::transport("stream closed during hello")),
        Err(FrameError::TooLarge { .. }) => {
            security.record(oversized, remote_addr);
            Err(NodeError::handshake("oversized hello"))
        }
        Err(e) => Err(e.into()),
    }
}

fn parse_hello_key(
    bytes: &[u8],
    remote_addr: SocketAddr,
    security: &SecurityStats,
) -> Result<PublicKey> {
    let Ok(remote) = PublicKey::from_slice(bytes) else {
        security.record(SecurityEvent::MalformedHello, remote_addr);
        return Err(NodeError::handshake("hello is not a public key"));
    };
    if ct_is_zero(remote.as_bytes()) {
        security.record(SecurityEvent::InvalidCurvePoint, remote_addr);
        return Err(NodeError::handshake("hello carries the zero key"));
    }
    Ok(remote)
}

fn hello_session_key(
    identity: &Identity,
    remote: &PublicKey,
    remote_addr: SocketAddr,
    security: &SecurityStats,
) -> Result<AeadKey> {
    identity.session_key(remote).inspect_err(|e| {
        if let NodeError::Crypto(err) = e {
            if let Some(event) = SecurityEvent::from_crypto_error(err) {
                security.record(event, remote_addr);
            }
        }
    })
}

/// Opener side of the hello.
///
/// Sends our key, checks the acceptor's key against `record`, then proves
/// possession of our key by sealing the acceptor's challenge.
async fn hello_as_opener(
    stream: &mut BoxedStream,
    identity: &Identity,
    record: &PeerRecord,
    remote_addr: SocketAddr,
    security: &SecurityStats,
) -> Result<PublicKey> {
    write_frame(stream, identity.public_key().as_bytes(), HELLO_SIZE).await?;

    let frame = read_handshake_frame(
        stream,
        ACCEPT_HELLO_SIZE,
        remote_addr,
        security,
        SecurityEvent::MalformedHello,
    )
    .await?;
    if frame.len() != ACCEPT_HELLO_SIZE {
        security.record(SecurityEvent::MalformedHello, remote_addr);
        return Err(NodeError::handshake("hello has the wrong size"));
    }
    let (key_bytes, challenge) = frame.split_at(HELLO_SIZE);
    let remote = parse_hello_key(key_bytes, remote_addr, security)?;

    // A key learned from the directory must be the one presented
    let published_differs = record
        .public_key
        .is_some_and(|published| !ct_eq(&published, remote.as_bytes()));
    if published_differs || !record.peer_id.matches_public_key(remote.as_bytes()) {
        security.record(SecurityEvent::IdentityMismatch, remote_addr);
        return Err(NodeError::handshake("hello key does not match the expected peer"));
    }

    let key = hello_session_key(identity, &remote, remote_addr, security)?;
    let confirm = key.seal(challenge)?;
    write_frame(stream, &confirm.to_bytes(), CONFIRM_SIZE).await?;
    Ok(remote)
}

/// Acceptor side of the hello.
///
/// Reads the opener's key, answers with ours and a fresh challenge, and
/// accepts the key only once the opener returns the challenge sealed under
/// the session key.
async fn hello_as_acceptor(
    stream: &mut BoxedStream,
    identity: &Identity,
    remote_addr: SocketAddr,
    security: &SecurityStats,
) -> Result<PublicKey> {
    let frame = read_handshake_frame(
        stream,
        HELLO_SIZE,
        remote_addr,
        security,
        SecurityEvent::MalformedHello,
    )
    .await?;
    let remote = parse_hello_key(&frame, remote_addr, security)?;
    let key = hello_session_key(identity, &remote, remote_addr, security)?;

    let challenge = random_32()?;
    let mut hello = Vec::with_capacity(ACCEPT_HELLO_SIZE);
    hello.extend_from_slice(identity.public_key().as_bytes());
    hello.extend_from_slice(&challenge);
    write_frame(stream, &hello, ACCEPT_HELLO_SIZE).await?;

    let frame = read_handshake_frame(
        stream,
        CONFIRM_SIZE,
        remote_addr,
        security,
        SecurityEvent::KeyConfirmationFailed,
    )
    .await?;
    let confirmed = Envelope::from_bytes(&frame)
        .and_then(|envelope| key.open(&envelope))
        .is_ok_and(|opened| ct_eq(&opened, &challenge));
    if !confirmed {
        security.record(SecurityEvent::KeyConfirmationFailed, remote_addr);
        return Err(NodeError::handshake("hello key was not confirmed"));
    }
    Ok(remote)
}

/// An authenticated-identity stream to one peer.
pub struct Channel {
    peer_id: PeerId,
    peer_public_key: PublicKey,
    remote_addr: SocketAddr,
    reader: Mutex<ReadHalf<BoxedStream>>,
    writer: Mutex<WriteHalf<BoxedStream>>,
    broken: AtomicBool,
    max_frame_size: usize,
    write_timeout: Duration,
    security: Arc<SecurityStats>,
}

impl Channel {
    fn from_stream(
        peer_public_key: PublicKey,
        remote_addr: SocketAddr,
        stream: BoxedStream,
        config: &ChannelConfig,
        security: Arc<SecurityStats>,
    ) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            peer_id: PeerId::from_public_key(peer_public_key.as_bytes()),
            peer_public_key,
            remote_addr,
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            broken: AtomicBool::new(false),
            max_frame_size: config.max_frame_size,
            write_timeout: config.write_timeout,
            security,
        }
    }

    /// Open a channel to `record`, trying its addresses in order.
    ///
    /// An address counts as failed if dialing fails or times out, or if the
    /// hello does not carry a key hashing to `record.peer_id` (and equal to
    /// `record.public_key` when that is known).
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Unreachable`] once every address has failed.
    pub async fn open(
        transport: &dyn Transport,
        identity: &Identity,
        record: &PeerRecord,
        config: &ChannelConfig,
        security: Arc<SecurityStats>,
    ) -> Result<Self> {
        for addr in &record.addrs {
            match Self::open_addr(transport, identity, record, *addr, config, &security).await {
                Ok((remote, stream)) => {
                    tracing::debug!(peer = %record.peer_id, %addr, "Channel opened");
                    return Ok(Self::from_stream(remote, *addr, stream, config, security));
                }
                Err(e) => {
                    tracing::debug!(
                        peer = %record.peer_id,
                        %addr,
                        error = %e,
                        "Channel open failed, trying next address"
                    );
                }
            }
        }

        Err(NodeError::Unreachable {
            peer: record.peer_id,
            attempts: record.addrs.len(),
        })
    }

    async fn open_addr(
        transport: &dyn Transport,
        identity: &Identity,
        record: &PeerRecord,
        addr: SocketAddr,
        config: &ChannelConfig,
        security: &SecurityStats,
    ) -> Result<(PublicKey, BoxedStream)> {
        let mut stream = timeout(config.dial_timeout, transport.dial(addr, CHAT_PROTOCOL))
            .await
            .map_err(|_| NodeError::timeout("dial"))??;

        let hello = match timeout(
            config.hello_timeout,
            hello_as_opener(&mut stream, identity, record, addr, security),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(NodeError::timeout("hello")),
        };

        match hello {
            Ok(remote) => Ok((remote, stream)),
            Err(e) => {
                let _ = stream.shutdown().await;
                Err(e)
            }
        }
    }

    /// Remote peer.
    #[must_use]
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Remote public key from the hello.
    #[must_use]
    pub fn peer_public_key(&self) -> &PublicKey {
        &self.peer_public_key
    }

    /// Remote transport address.
    #[must_use]
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// True once a send failed or was interrupted, or the channel was closed.
    #[must_use]
    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::SeqCst)
    }

    /// Write one envelope as a single frame.
    ///
    /// # Errors
    ///
    /// - [`NodeError::ChannelClosed`] if the channel is already broken
    /// - [`NodeError::MessageTooLarge`] if the envelope exceeds the frame limit
    /// - [`NodeError::ChannelWrite`] on I/O failure or timeout (the channel
    ///   is broken afterwards)
    pub async fn send(&self, envelope: &Envelope) -> Result<()> {
        let payload = envelope.to_bytes();
        let frame = encode_frame(&payload, self.max_frame_size).map_err(|_| {
            NodeError::MessageTooLarge {
                size: payload.len(),
                max: self.max_frame_size,
            }
        })?;

        let mut writer = self.writer.lock().await;
        if self.is_broken() {
            let _ = writer.shutdown().await;
            return Err(NodeError::ChannelClosed);
        }

        let guard = BrokenOnDrop::new(&self.broken);
        let result = timeout(self.write_timeout, async {
            writer.write_all(&frame).await?;
            writer.flush().await
        })
        .await;

        let err = match result {
            Ok(Ok(())) => {
                guard.disarm();
                return Ok(());
            }
            Ok(Err(e)) => NodeError::ChannelWrite(Cow::Owned(e.to_string())),
            Err(_) => NodeError::ChannelWrite(Cow::Borrowed("write timed out")),
        };

        drop(guard);
        let _ = writer.shutdown().await;
        tracing::debug!(peer = %self.peer_id, error = %err, "Channel broken on send");
        Err(err)
    }

    /// Read the next envelope.
    ///
    /// Returns `Ok(None)` when the peer closes the stream cleanly.
    ///
    /// # Errors
    ///
    /// - [`NodeError::FrameTooLarge`] if the peer declares an oversized frame
    ///   (the channel is closed)
    /// - [`NodeError::Crypto`] if the frame is too short to be an envelope
    ///   (the channel is closed)
    /// - [`NodeError::Io`] / [`NodeError::Transport`] on read failure
    pub async fn recv(&self) -> Result<Option<Envelope>> {
        let mut reader = self.reader.lock().await;
        match read_frame(&mut *reader, self.max_frame_size).await {
            Ok(Some(frame)) => match Envelope::from_bytes(&frame) {
                Ok(envelope) => Ok(Some(envelope)),
                Err(e) => {
                    self.security
                        .record(SecurityEvent::MalformedEnvelope, self.peer_id);
                    self.close().await;
                    Err(e.into())
                }
            },
            Ok(None) => Ok(None),
            Err(FrameError::TooLarge { declared, max }) => {
                self.security.record(SecurityEvent::OversizedFrame, self.peer_id);
                self.close().await;
                Err(NodeError::FrameTooLarge { declared, max })
            }
            Err(e) => {
                self.broken.store(true, Ordering::SeqCst);
                Err(e.into())
            }
        }
    }

    /// Close the channel. Further sends fail with [`NodeError::ChannelClosed`].
    pub async fn close(&self) {
        self.broken.store(true, Ordering::SeqCst);
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("peer_id", &self.peer_id)
            .field("remote_addr", &self.remote_addr)
            .field("broken", &self.is_broken())
            .finish_non_exhaustive()
    }
}

/// Inbound channels on [`CHAT_PROTOCOL`].
///
/// Streams are yielded lazily; each completes its hello in whichever task
/// calls [`PendingChannel::complete`].
pub struct ChannelListener {
    inbound: mpsc::Receiver<InboundStream>,
    identity: Arc<Identity>,
    config: ChannelConfig,
    security: Arc<SecurityStats>,
}

impl ChannelListener {
    /// Register the channel handler on `transport`.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Transport`] if the protocol already has a handler.
    pub fn bind(
        transport: &dyn Transport,
        identity: Arc<Identity>,
        config: ChannelConfig,
        security: Arc<SecurityStats>,
    ) -> Result<Self> {
        Ok(Self {
            inbound: transport.listen(CHAT_PROTOCOL)?,
            identity,
            config,
            security,
        })
    }

    /// Next inbound stream, before its hello. `None` once the transport closes.
    pub async fn next_pending(&mut self) -> Option<PendingChannel> {
        let stream = self.inbound.recv().await?;
        Some(PendingChannel {
            stream,
            identity: Arc::clone(&self.identity),
            config: self.config.clone(),
            security: Arc::clone(&self.security),
        })
    }

    /// Next inbound channel with its hello completed.
    pub async fn accept(&mut self) -> Option<Result<Channel>> {
        let pending = self.next_pending().await?;
        Some(pending.complete().await)
    }
}

/// An inbound stream whose hello has not run yet.
pub struct PendingChannel {
    stream: InboundStream,
    identity: Arc<Identity>,
    config: ChannelConfig,
    security: Arc<SecurityStats>,
}

impl PendingChannel {
    /// Remote transport address.
    #[must_use]
    pub fn remote_addr(&self) -> SocketAddr {
        self.stream.remote_addr
    }

    /// Run the hello and derive the remote peer id from its confirmed key.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Timeout`] if the opener is too slow, or
    /// [`NodeError::Handshake`] for a malformed hello or a failed key
    /// confirmation.
    pub async fn complete(self) -> Result<Channel> {
        let InboundStream {
            remote_addr,
            mut stream,
            ..
        } = self.stream;

        let remote = timeout(
            self.config.hello_timeout,
            hello_as_acceptor(&mut stream, &self.identity, remote_addr, &self.security),
        )
        .await
        .map_err(|_| NodeError::timeout("hello"))??;

        let channel = Channel::from_stream(remote, remote_addr, stream, &self.config, self.security);
        tracing::debug!(peer = %channel.peer_id(), %remote_addr, "Channel accepted");
        Ok(channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_transport::{TcpTransport, TcpTransportConfig};
    use tokio::io::AsyncWriteExt;

    struct Side {
        transport: TcpTransport,
        identity: Arc<Identity>,
        security: Arc<SecurityStats>,
    }

    impl Side {
        async fn new() -> Self {
            let transport = TcpTransport::bind(
                &["127.0.0.1:0".parse().unwrap()],
                TcpTransportConfig::default(),
            )
            .await
            .unwrap();
            Self {
                transport,
                identity: Arc::new(Identity::generate().unwrap()),
                security: Arc::new(SecurityStats::new()),
            }
        }

        fn listener(&self, config: ChannelConfig) -> ChannelListener {
            ChannelListener::bind(
                &self.transport,
                Arc::clone(&self.identity),
                config,
                Arc::clone(&self.security),
            )
            .unwrap()
        }

        fn record(&self) -> PeerRecord {
            PeerRecord::new(self.identity.peer_id(), self.transport.local_addrs())
        }

        async fn dial_raw(&self, target: &Side) -> BoxedStream {
            self.transport
                .dial(target.transport.local_addrs()[0], CHAT_PROTOCOL)
                .await
                .unwrap()
        }

        async fn open(&self, record: &PeerRecord, config: &ChannelConfig) -> Result<Channel> {
            Channel::open(
                &self.transport,
                &self.identity,
                record,
                config,
                Arc::clone(&self.security),
            )
            .await
        }
    }

    fn dead_addr() -> SocketAddr {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    }

    #[tokio::test]
    async fn test_open_accept_and_exchange() {
        let config = ChannelConfig::default();
        let (alice, bob) = (Side::new().await, Side::new().await);
        let mut listener = bob.listener(config.clone());

        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });
        let outbound = alice.open(&bob.record(), &config).await.unwrap();
        let inbound = accept.await.unwrap().unwrap();

        assert_eq!(outbound.peer_id(), bob.identity.peer_id());
        assert_eq!(inbound.peer_id(), alice.identity.peer_id());
        assert_eq!(inbound.peer_public_key(), alice.identity.public_key());

        let key = AeadKey::generate().unwrap();
        let envelope = key.seal(b"hello").unwrap();
        outbound.send(&envelope).await.unwrap();
        let received = inbound.recv().await.unwrap().unwrap();
        assert_eq!(key.open(&received).unwrap(), b"hello");

        // Reverse direction on the same stream
        let reply = key.seal(b"hi back").unwrap();
        inbound.send(&reply).await.unwrap();
        assert_eq!(outbound.recv().await.unwrap().unwrap(), reply);

        outbound.close().await;
        assert!(inbound.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_open_fails_over_to_next_address() {
        let config = ChannelConfig::default();
        let (alice, bob) = (Side::new().await, Side::new().await);
        let mut listener = bob.listener(config.clone());
        tokio::spawn(async move { while listener.accept().await.is_some() {} });

        let mut record = bob.record();
        record.addrs.insert(0, dead_addr());

        let channel = alice.open(&record, &config).await.unwrap();
        assert_eq!(channel.remote_addr(), bob.transport.local_addrs()[0]);
    }

    #[tokio::test]
    async fn test_open_all_addresses_fail() {
        let config = ChannelConfig::default();
        let alice = Side::new().await;
        let target = Identity::generate().unwrap();
        let record = PeerRecord::new(target.peer_id(), vec![dead_addr(), dead_addr()]);

        let err = alice.open(&record, &config).await.unwrap_err();
        assert!(matches!(err, NodeError::Unreachable { attempts: 2, .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_open_rejects_wrong_identity() {
        let config = ChannelConfig::default();
        let (alice, bob) = (Side::new().await, Side::new().await);
        let mut listener = bob.listener(config.clone());
        tokio::spawn(async move { while listener.accept().await.is_some() {} });

        // Bob's address, but someone else's identity
        let impostor = Identity::generate().unwrap();
        let record = PeerRecord::new(impostor.peer_id(), bob.transport.local_addrs());

        let err = alice.open(&record, &config).await.unwrap_err();
        assert!(matches!(err, NodeError::Unreachable { attempts: 1, .. }));
        assert_eq!(alice.security.snapshot().identity_mismatches, 1);
    }

    #[tokio::test]
    async fn test_oversized_frame_closes_channel() {
        let config = ChannelConfig::default();
        let bob = Side::new().await;
        let mut listener = bob.listener(config.clone());
        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });

        let client = Side::new().await;
        let mut raw = client.dial_raw(&bob).await;
        let remote = hello_as_opener(
            &mut raw,
            &client.identity,
            &bob.record(),
            bob.transport.local_addrs()[0],
            &client.security,
        )
        .await
        .unwrap();
        assert_eq!(&remote, bob.identity.public_key());

        raw.write_all(&2_000_000u32.to_be_bytes()).await.unwrap();
        raw.flush().await.unwrap();

        let channel = accept.await.unwrap().unwrap();
        let err = channel.recv().await.unwrap_err();
        assert!(matches!(
            err,
            NodeError::FrameTooLarge {
                declared: 2_000_000,
                max: 1_048_576
            }
        ));
        assert!(channel.is_broken());
        assert_eq!(bob.security.snapshot().oversized_frames, 1);
    }

    #[tokio::test]
    async fn test_malformed_hello_rejected() {
        let config = ChannelConfig::default();
        let bob = Side::new().await;
        let mut listener = bob.listener(config);
        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });

        let client = Side::new().await;
        let mut raw = client.dial_raw(&bob).await;
        write_frame(&mut raw, &[1u8; 16], HELLO_SIZE).await.unwrap();

        let err = accept.await.unwrap().unwrap_err();
        assert!(err.is_security());
        assert_eq!(bob.security.snapshot().malformed_hellos, 1);
    }

    #[tokio::test]
    async fn test_hello_with_borrowed_key_rejected() {
        let config = ChannelConfig::default();
        let (alice, bob) = (Side::new().await, Side::new().await);
        let mut listener = bob.listener(config);
        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });

        // Mallory presents Alice's public key without holding her private key
        let mallory = Side::new().await;
        let mut raw = mallory.dial_raw(&bob).await;
        write_frame(&mut raw, alice.identity.public_key().as_bytes(), HELLO_SIZE)
            .await
            .unwrap();
        let hello = read_frame(&mut raw, ACCEPT_HELLO_SIZE)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&hello[..HELLO_SIZE], bob.identity.public_key().as_bytes());

        // Best effort: her own session key with Bob
        let guess = mallory
            .identity
            .session_key(bob.identity.public_key())
            .unwrap();
        let confirm = guess.seal(&hello[HELLO_SIZE..]).unwrap();
        write_frame(&mut raw, &confirm.to_bytes(), CONFIRM_SIZE)
            .await
            .unwrap();

        let err = accept.await.unwrap().unwrap_err();
        assert!(err.is_security());
        assert_eq!(bob.security.snapshot().key_confirmation_failures, 1);
    }

    #[tokio::test]
    async fn test_hello_confirmation_replay_rejected() {
        let config = ChannelConfig::default();
        let (alice, bob) = (Side::new().await, Side::new().await);
        let mut listener = bob.listener(config.clone());
        let accept = tokio::spawn(async move {
            let first = listener.accept().await.unwrap();
            let second = listener.accept().await.unwrap();
            (first, second)
        });

        // A genuine confirmation answers one challenge only
        let mut raw = alice.dial_raw(&bob).await;
        write_frame(&mut raw, alice.identity.public_key().as_bytes(), HELLO_SIZE)
            .await
            .unwrap();
        let hello = read_frame(&mut raw, ACCEPT_HELLO_SIZE)
            .await
            .unwrap()
            .unwrap();
        let key = alice
            .identity
            .session_key(bob.identity.public_key())
            .unwrap();
        let confirm = key.seal(&hello[HELLO_SIZE..]).unwrap().to_bytes();
        write_frame(&mut raw, &confirm, CONFIRM_SIZE).await.unwrap();

        let mut replay = alice.dial_raw(&bob).await;
        write_frame(&mut replay, alice.identity.public_key().as_bytes(), HELLO_SIZE)
            .await
            .unwrap();
        let fresh = read_frame(&mut replay, ACCEPT_HELLO_SIZE)
            .await
            .unwrap()
            .unwrap();
        assert_ne!(fresh[HELLO_SIZE..], hello[HELLO_SIZE..]);
        write_frame(&mut replay, &confirm, CONFIRM_SIZE).await.unwrap();

        let (first, second) = accept.await.unwrap();
        assert_eq!(first.unwrap().peer_id(), alice.identity.peer_id());
        assert!(second.is_err());
        assert_eq!(bob.security.snapshot().key_confirmation_failures, 1);
    }

    #[tokio::test]
    async fn test_open_checks_published_key() {
        let config = ChannelConfig::default();
        let (alice, bob) = (Side::new().await, Side::new().await);
        let mut listener = bob.listener(config.clone());
        tokio::spawn(async move { while listener.accept().await.is_some() {} });

        let published = bob.record().with_public_key(bob.identity.public_key().to_bytes());
        assert!(published.public_key.is_some());
        let channel = alice.open(&published, &config).await.unwrap();
        assert_eq!(channel.peer_public_key(), bob.identity.public_key());

        // A record carrying a different key than Bob presents
        let mut stale = bob.record();
        stale.public_key = Some(Identity::generate().unwrap().public_key().to_bytes());
        let err = alice.open(&stale, &config).await.unwrap_err();
        assert!(matches!(err, NodeError::Unreachable { attempts: 1, .. }));
        assert_eq!(alice.security.snapshot().identity_mismatches, 1);
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let config = ChannelConfig::default();
        let (alice, bob) = (Side::new().await, Side::new().await);
        let mut listener = bob.listener(config.clone());
        tokio::spawn(async move { while listener.accept().await.is_some() {} });

        let channel = alice.open(&bob.record(), &config).await.unwrap();
        channel.close().await;

        let envelope = AeadKey::generate().unwrap().seal(b"late").unwrap();
        assert!(matches!(
            channel.send(&envelope).await,
            Err(NodeError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn test_send_rejects_oversized_message() {
        let config = ChannelConfig {
            max_frame_size: 64,
            ..ChannelConfig::default()
        };
        let (alice, bob) = (Side::new().await, Side::new().await);
        let mut listener = bob.listener(config.clone());
        tokio::spawn(async move { while listener.accept().await.is_some() {} });

        let channel = alice.open(&bob.record(), &config).await.unwrap();
        let envelope = AeadKey::generate().unwrap().seal(&[0u8; 100]).unwrap();

        assert!(matches!(
            channel.send(&envelope).await,
            Err(NodeError::MessageTooLarge { size: 128, max: 64 })
        ));
        assert!(!channel.is_broken());
    }
}
