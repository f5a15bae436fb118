//! Iterative lookup, store, and find over a sparse multi-node topology

mod common;

use common::spawn_ring;
use vanishdht::{NodeId, K};

const NODES: usize = 40;
const WINDOW: usize = 5;

#[tokio::test]
async fn iterative_store_then_find_value() {
    let nodes = spawn_ring(NODES, WINDOW).await;

    let key = NodeId::random();
    let acked = nodes[0].iterative_store(key, b"answer".to_vec()).await;
    assert!(acked > 0, "no peer acknowledged the store");

    let result = nodes[0].iterative_find_value(key).await;
    assert_eq!(result.value.as_deref(), Some(b"answer".as_slice()));

    // A node far from the publisher converges on the same replicas
    let result = nodes[NODES / 2].iterative_find_value(key).await;
    assert_eq!(result.value.as_deref(), Some(b"answer".as_slice()));
}

#[tokio::test]
async fn iterative_find_value_without_store_reports_nothing() {
    let nodes = spawn_ring(12, 3).await;
    let result = nodes[0].iterative_find_value(NodeId::random()).await;
    assert!(result.value.is_none());
    assert!(!result.contacts.is_empty());
}

#[tokio::test]
async fn iterative_find_node_converges_on_the_target() {
    let nodes = spawn_ring(NODES, WINDOW).await;

    let target = nodes[17].id();
    let contacts = nodes[0].iterative_find_node(target).await;

    assert!(!contacts.is_empty());
    assert!(contacts.len() <= K);
    assert_eq!(contacts[0].id, target, "target node should head the result");

    for pair in contacts.windows(2) {
        assert!(pair[0].distance_to(&target) <= pair[1].distance_to(&target));
        assert_ne!(pair[0].id, pair[1].id);
    }
}

#[tokio::test]
async fn lookup_with_empty_table_terminates_empty() {
    let nodes = spawn_ring(1, 0).await;
    let contacts = nodes[0].iterative_find_node(NodeId::random()).await;
    assert!(contacts.is_empty());
}
