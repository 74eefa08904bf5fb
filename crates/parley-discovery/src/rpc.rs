//! DHT RPC over the stream transport.
//!
//! The client opens one stream per request on [`KAD_PROTOCOL`], writes the
//! request frame and reads a single reply frame. The server side reads
//! request frames from each inbound stream until it closes, answering each
//! one from the locked [`DhtNode`].

use crate::dht::{DhtMessage, DhtNode, DhtPeer, MAX_MESSAGE_SIZE};
use crate::error::DirectoryError;
use parley_transport::{FrameError, InboundStream, Transport, read_frame, write_frame};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::{RwLock, mpsc, watch};
use tokio::time::timeout;

/// Protocol identifier for DHT RPC streams.
pub const KAD_PROTOCOL: &str = "/parley/kad/1.0.0";

/// Idle time after which the server closes an inbound RPC stream.
const SERVER_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Request/response client for DHT RPCs.
#[derive(Clone)]
pub struct RpcClient {
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

impl RpcClient {
    /// Create a client with a per-RPC timeout.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    /// Send `request` to `addr` and wait for one reply.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::Timeout`] if the round trip exceeds the
    /// configured timeout, or the transport/framing/decoding error.
    pub async fn request(
        &self,
        addr: SocketAddr,
        request: &DhtMessage,
    ) -> Result<DhtMessage, DirectoryError> {
        let payload = request.to_bytes()?;

        let exchange = async {
            let mut stream = self.transport.dial(addr, KAD_PROTOCOL).await?;
            write_frame(&mut stream, &payload, MAX_MESSAGE_SIZE).await?;
            let reply = read_frame(&mut stream, MAX_MESSAGE_SIZE)
                .await?
                .ok_or_else(|| DirectoryError::Rpc {
                    addr,
                    reason: "stream closed before reply".into(),
                })?;
            let _ = stream.shutdown().await;
            Ok::<_, DirectoryError>(DhtMessage::from_bytes(&reply)?)
        };

        let reply = timeout(self.timeout, exchange)
            .await
            .map_err(|_| DirectoryError::Timeout(addr))??;

        if reply.is_request() {
            return Err(DirectoryError::Rpc {
                addr,
                reason: format!("unexpected {} in reply to {}", reply.kind(), request.kind()),
            });
        }
        Ok(reply)
    }

    /// Send `request` to a contact, trying its addresses in order.
    ///
    /// # Errors
    ///
    /// Returns the last address's error if none answered.
    pub async fn request_peer(
        &self,
        peer: &DhtPeer,
        request: &DhtMessage,
    ) -> Result<DhtMessage, DirectoryError> {
        let mut last_err = DirectoryError::PeerUnreachable(peer.id);
        for addr in &peer.addrs {
            match self.request(*addr, request).await {
                Ok(reply) => return Ok(reply),
                Err(e) => {
                    tracing::trace!(peer = %peer.id, %addr, error = %e, "DHT RPC failed");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }
}

/// Serve inbound DHT streams until shutdown.
pub async fn serve(
    node: Arc<RwLock<DhtNode>>,
    mut inbound: mpsc::Receiver<InboundStream>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            next = inbound.recv() => match next {
                Some(stream) => {
                    tokio::spawn(serve_stream(Arc::clone(&node), stream));
                }
                None => break,
            },
        }
    }
    tracing::debug!("DHT RPC server stopped");
}

async fn serve_stream(node: Arc<RwLock<DhtNode>>, inbound: InboundStream) {
    let InboundStream {
        remote_addr,
        mut stream,
        ..
    } = inbound;

    loop {
        let frame = match timeout(SERVER_IDLE_TIMEOUT, read_frame(&mut stream, MAX_MESSAGE_SIZE)).await
        {
            Ok(Ok(Some(frame))) => frame,
            Ok(Ok(None)) | Err(_) => break,
            Ok(Err(FrameError::TooLarge { declared, max })) => {
                tracing::warn!(
                    target: "parley::security",
                    %remote_addr,
                    declared,
                    max,
                    "Oversized DHT frame, closing stream"
                );
                break;
            }
            Ok(Err(e)) => {
                tracing::debug!(%remote_addr, error = %e, "DHT stream read failed");
                break;
            }
        };

        let request = match DhtMessage::from_bytes(&frame) {
            Ok(request) if request.is_request() => request,
            Ok(other) => {
                tracing::debug!(%remote_addr, kind = other.kind(), "Unsolicited DHT response");
                break;
            }
            Err(e) => {
                tracing::debug!(%remote_addr, error = %e, "Malformed DHT request");
                break;
            }
        };

        let kind = request.kind();
        let reply = node.write().await.handle_message(request, remote_addr);
        let Some(reply) = reply else { break };

        let bytes = match reply.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(%remote_addr, error = %e, "Failed to encode DHT reply");
                break;
            }
        };
        if let Err(e) = write_frame(&mut stream, &bytes, MAX_MESSAGE_SIZE).await {
            tracing::debug!(%remote_addr, error = %e, "DHT reply write failed");
            break;
        }
        tracing::trace!(%remote_addr, kind, "Answered DHT request");
    }

    let _ = stream.shutdown().await;
}
