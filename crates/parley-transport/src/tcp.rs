//! TCP transport implementation.
//!
//! Every connection starts with a protocol preamble written by the dialer:
//!
//! ```text
//! preamble := len:u8 || protocol-id (len bytes, UTF-8)
//! ```
//!
//! The listening side reads the preamble, looks up the handler registered
//! for that protocol and hands the rest of the stream over. Connections for
//! unknown protocols, or that do not send a preamble in time, are dropped.

use crate::transport::{
    BoxedStream, InboundStream, Transport, TransportError, TransportResult, TransportStats,
    validate_protocol,
};
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

/// TCP transport configuration
#[derive(Debug, Clone)]
pub struct TcpTransportConfig {
    /// Time allowed for an outbound connect
    pub connect_timeout: Duration,
    /// Time an inbound connection has to send its preamble
    pub preamble_timeout: Duration,
    /// Queued inbound streams per protocol before accept backpressure
    pub inbound_queue: usize,
}

impl Default for TcpTransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            preamble_timeout: Duration::from_secs(5),
            inbound_queue: 64,
        }
    }
}

struct TcpInner {
    config: TcpTransportConfig,
    local_addrs: Vec<SocketAddr>,
    handlers: DashMap<String, mpsc::Sender<InboundStream>>,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
    dialed: AtomicU64,
    dial_errors: AtomicU64,
    accepted: AtomicU64,
    rejected: AtomicU64,
}

/// TCP stream transport.
///
/// Cloning is cheap; all clones share the listeners and handler table.
/// Accept loops stop when the transport is closed or the last clone is
/// dropped.
#[derive(Clone)]
pub struct TcpTransport {
    inner: Arc<TcpInner>,
}

impl TcpTransport {
    /// Bind listeners on every address in `addrs` and start accepting.
    ///
    /// Use port 0 for automatic port selection; [`Transport::local_addrs`]
    /// reports the ports actually bound.
    ///
    /// # Errors
    /// Returns `TransportError::BindFailed` if any address cannot be bound,
    /// or `TransportError::InvalidConfig` if `addrs` is empty
    pub async fn bind(addrs: &[SocketAddr], config: TcpTransportConfig) -> TransportResult<Self> {
        if addrs.is_empty() {
            return Err(TransportError::InvalidConfig(
                "at least one listen address is required".into(),
            ));
        }
        if config.inbound_queue == 0 {
            return Err(TransportError::InvalidConfig(
                "inbound_queue must be non-zero".into(),
            ));
        }

        let mut listeners = Vec::with_capacity(addrs.len());
        let mut local_addrs = Vec::with_capacity(addrs.len());
        for addr in addrs {
            let listener = TcpListener::bind(addr)
                .await
                .map_err(|e| TransportError::BindFailed(format!("{addr}: {e}")))?;
            local_addrs.push(listener.local_addr()?);
            listeners.push(listener);
        }

        let (shutdown, _) = watch::channel(false);
        let inner = Arc::new(TcpInner {
            config,
            local_addrs,
            handlers: DashMap::new(),
            closed: AtomicBool::new(false),
            shutdown,
            dialed: AtomicU64::new(0),
            dial_errors: AtomicU64::new(0),
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        });

        for listener in listeners {
            let weak = Arc::downgrade(&inner);
            let shutdown_rx = inner.shutdown.subscribe();
            tokio::spawn(accept_loop(listener, weak, shutdown_rx));
        }

        tracing::info!(addrs = ?inner.local_addrs, "TCP transport listening");

        Ok(Self { inner })
    }
}

async fn accept_loop(
    listener: TcpListener,
    inner: Weak<TcpInner>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, remote_addr)) => {
                    let Some(inner) = inner.upgrade() else { break };
                    tokio::spawn(route_inbound(inner, stream, remote_addr));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "TCP accept failed");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            },
        }
    }

    tracing::debug!(addr = ?listener.local_addr().ok(), "TCP accept loop stopped");
}

async fn read_preamble(stream: &mut TcpStream) -> std::io::Result<String> {
    let len = stream.read_u8().await? as usize;
    if len == 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "empty protocol id",
        ));
    }
    let mut name = vec![0u8; len];
    stream.read_exact(&mut name).await?;
    String::from_utf8(name)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "protocol id not UTF-8"))
}

async fn route_inbound(inner: Arc<TcpInner>, mut stream: TcpStream, remote_addr: SocketAddr) {
    let _ = stream.set_nodelay(true);

    let protocol = match timeout(inner.config.preamble_timeout, read_preamble(&mut stream)).await
    {
        Ok(Ok(protocol)) => protocol,
        Ok(Err(e)) => {
            inner.rejected.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(%remote_addr, error = %e, "Dropping connection with bad preamble");
            return;
        }
        Err(_) => {
            inner.rejected.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(%remote_addr, "Dropping connection: preamble timeout");
            return;
        }
    };

    let Some(handler) = inner.handlers.get(&protocol).map(|h| h.clone()) else {
        inner.rejected.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(%remote_addr, %protocol, "Dropping connection for unknown protocol");
        return;
    };

    let inbound = InboundStream {
        remote_addr,
        protocol: protocol.clone(),
        stream: Box::new(stream),
    };

    if handler.send(inbound).await.is_err() {
        // Receiver dropped: nobody is serving this protocol any more
        inner.handlers.remove(&protocol);
        inner.rejected.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(%protocol, "Handler gone, unregistered protocol");
        return;
    }

    inner.accepted.fetch_add(1, Ordering::Relaxed);
}

#[async_trait]
impl Transport for TcpTransport {
    async fn dial(&self, addr: SocketAddr, protocol: &str) -> TransportResult<BoxedStream> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        validate_protocol(protocol)?;

        let result = async {
            let mut stream = timeout(self.inner.config.connect_timeout, TcpStream::connect(addr))
                .await
                .map_err(|_| TransportError::Timeout(addr))?
                .map_err(|e| TransportError::ConnectionFailed {
                    addr,
                    reason: e.to_string(),
                })?;
            stream.set_nodelay(true)?;

            let mut preamble = Vec::with_capacity(1 + protocol.len());
            preamble.push(protocol.len() as u8);
            preamble.extend_from_slice(protocol.as_bytes());
            stream.write_all(&preamble).await?;

            Ok::<_, TransportError>(stream)
        }
        .await;

        match result {
            Ok(stream) => {
                self.inner.dialed.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(%addr, %protocol, "Dialed");
                Ok(Box::new(stream))
            }
            Err(e) => {
                self.inner.dial_errors.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(%addr, %protocol, error = %e, "Dial failed");
                Err(e)
            }
        }
    }

    fn listen(&self, protocol: &str) -> TransportResult<mpsc::Receiver<InboundStream>> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        validate_protocol(protocol)?;

        match self.inner.handlers.entry(protocol.to_string()) {
            Entry::Occupied(existing) if !existing.get().is_closed() => {
                Err(TransportError::AlreadyListening(protocol.to_string()))
            }
            Entry::Occupied(mut stale) => {
                let (tx, rx) = mpsc::channel(self.inner.config.inbound_queue);
                stale.insert(tx);
                Ok(rx)
            }
            Entry::Vacant(slot) => {
                let (tx, rx) = mpsc::channel(self.inner.config.inbound_queue);
                slot.insert(tx);
                Ok(rx)
            }
        }
    }

    fn local_addrs(&self) -> Vec<SocketAddr> {
        self.inner.local_addrs.clone()
    }

    async fn close(&self) -> TransportResult<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let _ = self.inner.shutdown.send(true);
        self.inner.handlers.clear();
        tracing::info!(addrs = ?self.inner.local_addrs, "TCP transport closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn stats(&self) -> TransportStats {
        TransportStats {
            dialed: self.inner.dialed.load(Ordering::Relaxed),
            dial_errors: self.inner.dial_errors.load(Ordering::Relaxed),
            accepted: self.inner.accepted.load(Ordering::Relaxed),
            rejected: self.inner.rejected.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn loopback() -> TcpTransport {
        TcpTransport::bind(&["127.0.0.1:0".parse().unwrap()], TcpTransportConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_bind_reports_port() {
        let transport = loopback().await;
        let addrs = transport.local_addrs();
        assert_eq!(addrs.len(), 1);
        assert_ne!(addrs[0].port(), 0);
    }

    #[tokio::test]
    async fn test_bind_requires_address() {
        let result = TcpTransport::bind(&[], TcpTransportConfig::default()).await;
        assert!(matches!(result, Err(TransportError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_dial_routes_to_protocol_handler() {
        let server = loopback().await;
        let client = loopback().await;
        let mut inbound = server.listen("/echo/1.0.0").unwrap();

        let mut stream = client
            .dial(server.local_addrs()[0], "/echo/1.0.0")
            .await
            .unwrap();
        stream.write_all(b"ping").await.unwrap();

        let mut incoming = inbound.recv().await.unwrap();
        assert_eq!(incoming.protocol, "/echo/1.0.0");

        let mut buf = [0u8; 4];
        incoming.stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        assert_eq!(client.stats().dialed, 1);
    }

    #[tokio::test]
    async fn test_duplicate_listen_rejected() {
        let transport = loopback().await;
        let _rx = transport.listen("/chat/1.0.0").unwrap();

        assert!(matches!(
            transport.listen("/chat/1.0.0"),
            Err(TransportError::AlreadyListening(_))
        ));
    }

    #[tokio::test]
    async fn test_listen_again_after_receiver_dropped() {
        let transport = loopback().await;
        drop(transport.listen("/chat/1.0.0").unwrap());
        assert!(transport.listen("/chat/1.0.0").is_ok());
    }

    #[tokio::test]
    async fn test_unknown_protocol_dropped() {
        let server = loopback().await;
        let client = loopback().await;
        let _rx = server.listen("/chat/1.0.0").unwrap();

        let mut stream = client
            .dial(server.local_addrs()[0], "/other/1.0.0")
            .await
            .unwrap();

        // Server closes the connection without routing it
        let mut buf = [0u8; 1];
        let n = stream.read(&mut buf).await.unwrap_or(0);
        assert_eq!(n, 0);
        assert_eq!(server.stats().rejected, 1);
        assert_eq!(server.stats().accepted, 0);
    }

    #[tokio::test]
    async fn test_dial_refused() {
        // Bind then close to find a port with no listener
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = probe.local_addr().unwrap();
        drop(probe);

        let client = loopback().await;
        let err = client.dial(addr, "/chat/1.0.0").await.err().unwrap();
        assert!(err.is_transient());
        assert_eq!(client.stats().dial_errors, 1);
    }

    #[tokio::test]
    async fn test_close_ends_handlers() {
        let transport = loopback().await;
        let mut rx = transport.listen("/chat/1.0.0").unwrap();

        transport.close().await.unwrap();
        assert!(transport.is_closed());
        assert!(rx.recv().await.is_none());
        assert!(matches!(
            transport.dial("127.0.0.1:1".parse().unwrap(), "/chat/1.0.0").await,
            Err(TransportError::Closed)
        ));
    }
}
