//! Two-node connectivity: one ping populates both routing tables

mod common;

use std::time::Duration;

use common::test_config;
use vanishdht::Node;

#[tokio::test]
async fn ping_registers_both_contacts() {
    let a = Node::spawn(test_config()).await.unwrap();
    let b = Node::spawn(test_config()).await.unwrap();

    let pong = a.ping(b.local_addr()).await.unwrap();
    assert_eq!(pong.id, b.id());

    // Both serializers need a moment to apply the observed contacts
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(a.find_contact(b.id()).await.unwrap().id, b.id());
    assert_eq!(b.find_contact(a.id()).await.unwrap().id, a.id());
}

#[tokio::test]
async fn a_node_always_finds_itself() {
    let a = Node::spawn(test_config()).await.unwrap();
    let me = a.find_contact(a.id()).await.unwrap();
    assert_eq!(me.id, a.id());
    assert_eq!(me.addr, a.local_addr());
}

#[tokio::test]
async fn unreachable_peer_surfaces_a_transport_error() {
    let a = Node::spawn(test_config()).await.unwrap();

    // Nothing listens here; the dial must fail without taking the node down
    let result = a.ping("127.0.0.1:1".parse().unwrap()).await;
    assert!(result.is_err());

    // The node is still serving afterwards
    let b = Node::spawn(test_config()).await.unwrap();
    assert!(a.ping(b.local_addr()).await.is_ok());
}

#[tokio::test]
async fn unknown_contact_is_not_found() {
    let a = Node::spawn(test_config()).await.unwrap();
    assert!(a.find_contact(vanishdht::NodeId::random()).await.is_err());
}
