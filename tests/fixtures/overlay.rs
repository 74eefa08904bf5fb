//! Loopback overlay fixture for end-to-end testing
//!
//! Spawns N nodes on 127.0.0.1 with OS-assigned ports. The first node is the
//! seed; every other node bootstraps from it and publishes its key.
//!
//! # Example
//!
//! ```no_run
//! use parley_integration_tests::fixtures::OverlayFixture;
//!
//! #[tokio::test]
//! async fn test_send() {
//!     let mut overlay = OverlayFixture::spawn(3).await.unwrap();
//!     let bob = overlay.nodes[1].node.peer_id();
//!     overlay.nodes[0].node.send_message(bob, b"hi").await.unwrap();
//!     let message = overlay.nodes[1].recv().await.unwrap();
//!     assert_eq!(message.payload, b"hi");
//!     overlay.shutdown().await;
//! }
//! ```

use parley_core::{InboundMessage, Node, NodeConfig, NodeError};
use std::time::Duration;
use tokio::sync::mpsc;

/// How long a test waits for a delivery before giving up
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Loopback node configuration with test-friendly timeouts.
#[must_use]
pub fn test_config() -> NodeConfig {
    let mut config = NodeConfig::loopback();
    config.discovery.rpc_timeout = Duration::from_secs(1);
    config.discovery.lookup_timeout = Duration::from_secs(3);
    config.channel.dial_timeout = Duration::from_secs(1);
    config.channel.hello_timeout = Duration::from_secs(1);
    config
}

/// A started node and its gateway receiver
pub struct TestNode {
    /// The node
    pub node: Node,
    /// Gateway receiver
    pub inbound: mpsc::Receiver<InboundMessage>,
}

impl TestNode {
    /// Create and start a node with `config`.
    ///
    /// # Errors
    ///
    /// Returns any error from node creation or start.
    pub async fn start(config: NodeConfig) -> Result<Self, NodeError> {
        let node = Node::new_random(config).await?;
        let inbound = node.start().await?;
        Ok(Self { node, inbound })
    }

    /// Wait for the next inbound message.
    pub async fn recv(&mut self) -> Option<InboundMessage> {
        tokio::time::timeout(DELIVERY_TIMEOUT, self.inbound.recv())
            .await
            .ok()
            .flatten()
    }

    /// Wait briefly and report whether anything else arrived.
    pub async fn is_quiet(&mut self, wait: Duration) -> bool {
        tokio::time::timeout(wait, self.inbound.recv()).await.is_err()
    }
}

/// N joined nodes
pub struct OverlayFixture {
    /// Nodes in spawn order; index 0 is the seed
    pub nodes: Vec<TestNode>,
}

impl OverlayFixture {
    /// Spawn `count` nodes, bootstrap them through the first and publish keys.
    ///
    /// # Errors
    ///
    /// Returns the first node, bootstrap or publish failure.
    pub async fn spawn(count: usize) -> Result<Self, NodeError> {
        let seed = TestNode::start(test_config()).await?;
        seed.node.join().await?;
        let seed_addrs = seed.node.local_addrs();

        let mut nodes = vec![seed];
        for _ in 1..count {
            let mut config = test_config();
            config.bootstrap_nodes = seed_addrs.clone();
            let node = TestNode::start(config).await?;
            node.node.join().await?;
            nodes.push(node);
        }

        // The seed learned about later nodes after publishing; publish again
        // so its key replicates too.
        nodes[0].node.publish_identity().await?;

        tracing::debug!(count, "Overlay fixture ready");
        Ok(Self { nodes })
    }

    /// Stop every node.
    pub async fn shutdown(self) {
        for node in self.nodes {
            let _ = node.node.stop().await;
        }
    }
}
