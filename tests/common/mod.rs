//! Shared helpers for multi-node integration tests
#![allow(dead_code)]

use std::time::Duration;

use vanishdht::{Node, NodeConfig};

/// Ephemeral-port loopback configuration with short timeouts
pub fn test_config() -> NodeConfig {
    NodeConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        rpc_timeout: Duration::from_secs(2),
        probe_timeout: Duration::from_millis(500),
        ..NodeConfig::default()
    }
}

/// Spawn `count` nodes and wire a sparse topology: each node pings the
/// `window` nodes after it on the ring, so lookups must snowball through
/// intermediate routing tables.
pub async fn spawn_ring(count: usize, window: usize) -> Vec<Node> {
    let mut nodes = Vec::with_capacity(count);
    for _ in 0..count {
        nodes.push(Node::spawn(test_config()).await.expect("spawn node"));
    }

    for i in 0..count {
        for step in 1..=window {
            let peer = nodes[(i + step) % count].local_addr();
            nodes[i].ping(peer).await.expect("bootstrap ping");
        }
    }

    // Let queued observes drain before the topology is used
    tokio::time::sleep(Duration::from_millis(300)).await;
    nodes
}
