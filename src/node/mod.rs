//! Node state machine and public operations
//!
//! A node owns the routing table, the local key/value store, and the VDO map.
//! Routing-table and store mutations are funneled through a single-writer
//! task that drains a command channel; readers that need a consistent scan
//! (find_closest) take the shared lock directly. The VDO map has its own
//! reader/writer exclusion since refresh traffic is heavier.
//!
//! The RPC server never sees the whole node: it gets a narrow `NodeHandle`
//! exposing exactly the five capabilities the handlers need.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, info, warn};

use crate::config::NodeConfig;
use crate::error::{Error, Result};
use crate::lookup::{self, LookupResult};
use crate::protocol::message::{
    FindNodeRequest, FindValueRequest, GetVdoRequest, PingRequest, StoreRequest,
};
use crate::protocol::{Contact, NodeId};
use crate::routing::{RoutingTable, UpdateOutcome};
use crate::transport::{RpcClient, RpcServer};
use crate::vanish::{self, Vdo};

/// Commands consumed by the single-writer state task
enum StateCommand {
    Observe(Contact),
    ReadBucket(usize, oneshot::Sender<Vec<Contact>>),
    PutValue(NodeId, Vec<u8>),
    GetValue(NodeId, oneshot::Sender<Option<Vec<u8>>>),
}

/// Capabilities the RPC handlers are allowed to use
#[async_trait]
pub trait NodeHandle: Send + Sync {
    fn self_contact(&self) -> Contact;
    async fn observe(&self, contact: Contact);
    async fn put(&self, key: NodeId, value: Vec<u8>);
    async fn lookup(&self, key: NodeId) -> Option<Vec<u8>>;
    async fn find_closest(&self, target: NodeId, count: usize) -> Vec<Contact>;
    async fn vdo_get(&self, vdo_id: NodeId) -> Option<Vdo>;
}

struct NodeInner {
    self_contact: Contact,
    routes: Arc<RwLock<RoutingTable>>,
    state_tx: mpsc::Sender<StateCommand>,
    vdo_map: Arc<RwLock<HashMap<NodeId, Vdo>>>,
    client: RpcClient,
    config: NodeConfig,
}

/// One DHT node. Clones share the same underlying state.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl Node {
    /// Bind the listener, start the state task and the RPC server, and
    /// return the running node.
    pub async fn spawn(config: NodeConfig) -> Result<Node> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        let advertised = SocketAddr::new(advertised_ip(&config, local_addr), local_addr.port());

        let id = NodeId::random();
        let self_contact = Contact::new(id, advertised);
        let routes = Arc::new(RwLock::new(RoutingTable::new(self_contact)));
        let client = RpcClient::new(config.rpc_timeout);

        let (state_tx, state_rx) = mpsc::channel(256);
        let _state_task = tokio::spawn(run_state(
            state_rx,
            routes.clone(),
            RpcClient::new(config.probe_timeout),
            self_contact,
        ));

        let inner = Arc::new(NodeInner {
            self_contact,
            routes,
            state_tx,
            vdo_map: Arc::new(RwLock::new(HashMap::new())),
            client,
            config,
        });

        let handle: Arc<dyn NodeHandle> = Arc::new(StateHandle {
            inner: inner.clone(),
        });
        let _server_task = RpcServer::spawn(listener, handle);

        info!(id = %id, addr = %advertised, "node started");
        Ok(Node { inner })
    }

    pub fn id(&self) -> NodeId {
        self.inner.self_contact.id
    }

    pub fn self_contact(&self) -> Contact {
        self.inner.self_contact
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.self_contact.addr
    }

    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    pub(crate) fn vdo_map(&self) -> &Arc<RwLock<HashMap<NodeId, Vdo>>> {
        &self.inner.vdo_map
    }

    /// Feed an observed contact through the serializer
    pub(crate) async fn observe(&self, contact: Contact) {
        let _ = self.inner.state_tx.send(StateCommand::Observe(contact)).await;
    }

    /// Consistent closest-contact scan under the shared lock
    pub(crate) async fn find_closest_local(&self, target: &NodeId, count: usize) -> Vec<Contact> {
        self.inner.routes.read().await.find_closest(target, count)
    }

    fn fresh_msg_id(&self) -> NodeId {
        NodeId::random()
    }

    /// Ping a peer by address; on success its contact enters the table.
    /// This is also the bootstrap entry point.
    pub async fn ping(&self, addr: SocketAddr) -> Result<Contact> {
        let req = PingRequest {
            sender: self.inner.self_contact,
            msg_id: self.fresh_msg_id(),
        };
        let pong = self.inner.client.ping(addr, req).await?;
        self.observe(pong.sender).await;
        Ok(pong.sender)
    }

    /// STORE a key/value pair on one peer
    pub async fn store(&self, contact: &Contact, key: NodeId, value: Vec<u8>) -> Result<()> {
        let req = StoreRequest {
            sender: self.inner.self_contact,
            msg_id: self.fresh_msg_id(),
            key,
            value,
        };
        self.inner.client.store(contact.addr, req).await?;
        Ok(())
    }

    /// FIND_NODE on one peer
    pub async fn find_node(&self, contact: &Contact, target: NodeId) -> Result<Vec<Contact>> {
        let req = FindNodeRequest {
            sender: self.inner.self_contact,
            msg_id: self.fresh_msg_id(),
            target,
        };
        let reply = self.inner.client.find_node(contact.addr, req).await?;
        Ok(reply.nodes)
    }

    /// FIND_VALUE on one peer; returns the value or the closer contacts
    pub async fn find_value(
        &self,
        contact: &Contact,
        key: NodeId,
    ) -> Result<(Option<Vec<u8>>, Vec<Contact>)> {
        let req = FindValueRequest {
            sender: self.inner.self_contact,
            msg_id: self.fresh_msg_id(),
            key,
        };
        let reply = self.inner.client.find_value(contact.addr, req).await?;
        Ok((reply.value, reply.nodes))
    }

    /// Read a key from the local store only
    pub async fn local_find_value(&self, key: NodeId) -> Option<Vec<u8>> {
        let (tx, rx) = oneshot::channel();
        if self
            .inner
            .state_tx
            .send(StateCommand::GetValue(key, tx))
            .await
            .is_err()
        {
            return None;
        }
        rx.await.unwrap_or(None)
    }

    /// Look a node id up in the local routing table
    pub async fn find_contact(&self, id: NodeId) -> Result<Contact> {
        if id == self.inner.self_contact.id {
            return Ok(self.inner.self_contact);
        }
        let index = id.prefix_len(&self.inner.self_contact.id);
        let (tx, rx) = oneshot::channel();
        self.inner
            .state_tx
            .send(StateCommand::ReadBucket(index, tx))
            .await
            .map_err(|_| Error::Transport("node state task stopped".into()))?;
        let bucket = rx
            .await
            .map_err(|_| Error::Transport("node state task stopped".into()))?;

        match bucket.into_iter().find(|c| c.id == id) {
            Some(contact) => {
                self.observe(contact).await;
                Ok(contact)
            }
            None => Err(Error::NotFound(format!("no contact {}", id))),
        }
    }

    /// Iterative FIND_NODE: the K closest contacts the network knows
    pub async fn iterative_find_node(&self, target: NodeId) -> Vec<Contact> {
        lookup::iterative_find(self, target, false).await.contacts
    }

    /// Iterative FIND_VALUE
    pub async fn iterative_find_value(&self, key: NodeId) -> LookupResult {
        lookup::iterative_find(self, key, true).await
    }

    /// Locate the K closest nodes to `key` and fan a STORE out to each.
    /// Returns how many stores were acknowledged.
    pub async fn iterative_store(&self, key: NodeId, value: Vec<u8>) -> usize {
        let contacts = self.iterative_find_node(key).await;
        let stores = contacts
            .iter()
            .map(|contact| self.store(contact, key, value.clone()));
        join_all(stores)
            .await
            .into_iter()
            .filter(|outcome| match outcome {
                Ok(()) => true,
                Err(e) => {
                    debug!(error = %e, "store fan-out failed for one peer");
                    false
                }
            })
            .count()
    }

    /// Encrypt `data`, shard the key across the DHT, and return the VDO
    pub async fn vanish(&self, vdo_id: NodeId, data: &[u8], shares: u8, threshold: u8) -> Result<Vdo> {
        vanish::vanish_data(self, vdo_id, data, shares, threshold).await
    }

    /// Take custody of a VDO and keep its shares alive across epochs
    pub async fn store_vdo(&self, vdo: Vdo, refresh_interval: Duration) -> Result<()> {
        if vdo.access_key == 0 {
            return Err(Error::InvalidData(
                "vdo access key not initialized".into(),
            ));
        }
        let vdo_id = vdo.vdo_id;
        self.inner.vdo_map.write().await.insert(vdo_id, vdo);
        let _refresher = vanish::spawn_refresh(self.clone(), vdo_id, refresh_interval);
        Ok(())
    }

    /// Fetch a VDO from its custodian node
    pub async fn get_vdo(&self, node_id: NodeId, vdo_id: NodeId) -> Result<Vdo> {
        if node_id == self.inner.self_contact.id {
            return self
                .inner
                .vdo_map
                .read()
                .await
                .get(&vdo_id)
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("no vdo {}", vdo_id)));
        }

        let custodian = self.resolve_custodian(node_id).await?;
        let req = GetVdoRequest {
            sender: self.inner.self_contact,
            msg_id: self.fresh_msg_id(),
            vdo_id,
        };
        let reply = self.inner.client.get_vdo(custodian.addr, req).await?;
        reply
            .vdo
            .ok_or_else(|| Error::NotFound(format!("no vdo {} at {}", vdo_id, custodian.id)))
    }

    /// Fetch a VDO from its custodian and reconstruct the plaintext
    pub async fn unvanish(&self, node_id: NodeId, vdo_id: NodeId) -> Result<Vec<u8>> {
        let vdo = self.get_vdo(node_id, vdo_id).await?;
        vanish::unvanish(self, &vdo).await
    }

    /// Find the contact for a custodian node id: iterative lookup first,
    /// then the local table, then the closest contact the lookup produced.
    async fn resolve_custodian(&self, node_id: NodeId) -> Result<Contact> {
        let contacts = self.iterative_find_node(node_id).await;
        if let Some(exact) = contacts.iter().find(|c| c.id == node_id) {
            return Ok(*exact);
        }
        if let Ok(contact) = self.find_contact(node_id).await {
            return Ok(contact);
        }
        contacts
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound(format!("no route to custodian {}", node_id)))
    }
}

/// Narrow handle implementation backing the RPC server
struct StateHandle {
    inner: Arc<NodeInner>,
}

#[async_trait]
impl NodeHandle for StateHandle {
    fn self_contact(&self) -> Contact {
        self.inner.self_contact
    }

    async fn observe(&self, contact: Contact) {
        let _ = self.inner.state_tx.send(StateCommand::Observe(contact)).await;
    }

    async fn put(&self, key: NodeId, value: Vec<u8>) {
        let _ = self
            .inner
            .state_tx
            .send(StateCommand::PutValue(key, value))
            .await;
    }

    async fn lookup(&self, key: NodeId) -> Option<Vec<u8>> {
        let (tx, rx) = oneshot::channel();
        if self
            .inner
            .state_tx
            .send(StateCommand::GetValue(key, tx))
            .await
            .is_err()
        {
            return None;
        }
        rx.await.unwrap_or(None)
    }

    async fn find_closest(&self, target: NodeId, count: usize) -> Vec<Contact> {
        self.inner.routes.read().await.find_closest(&target, count)
    }

    async fn vdo_get(&self, vdo_id: NodeId) -> Option<Vdo> {
        self.inner.vdo_map.read().await.get(&vdo_id).cloned()
    }
}

/// Single-writer task: owns the key/value store and applies every routing
/// or store mutation in arrival order. A full bucket's liveness probe runs
/// with no lock held; the verdict is committed afterwards.
async fn run_state(
    mut rx: mpsc::Receiver<StateCommand>,
    routes: Arc<RwLock<RoutingTable>>,
    probe_client: RpcClient,
    self_contact: Contact,
) {
    let mut store: HashMap<NodeId, Vec<u8>> = HashMap::new();

    while let Some(command) = rx.recv().await {
        match command {
            StateCommand::Observe(contact) => {
                let outcome = routes.write().await.update(&contact);
                if let UpdateOutcome::Full { bucket, lru } = outcome {
                    let alive = probe_alive(&probe_client, self_contact, &lru).await;
                    routes
                        .write()
                        .await
                        .resolve_full(bucket, &lru, &contact, alive);
                }
            }
            StateCommand::ReadBucket(index, reply) => {
                let snapshot = routes.read().await.bucket(index).to_vec();
                let _ = reply.send(snapshot);
            }
            StateCommand::PutValue(key, value) => {
                store.insert(key, value);
            }
            StateCommand::GetValue(key, reply) => {
                let _ = reply.send(store.get(&key).cloned());
            }
        }
    }
}

async fn probe_alive(client: &RpcClient, self_contact: Contact, lru: &Contact) -> bool {
    let req = PingRequest {
        sender: self_contact,
        msg_id: NodeId::random(),
    };
    match client.ping(lru.addr, req).await {
        Ok(_) => true,
        Err(e) => {
            warn!(peer = %lru.id, error = %e, "bucket head failed liveness probe");
            false
        }
    }
}

/// Prefer an explicitly configured advertise address; otherwise use the
/// listener's address, falling back to loopback when bound to a wildcard.
fn advertised_ip(config: &NodeConfig, local_addr: SocketAddr) -> IpAddr {
    if let Some(ip) = config.advertise_ip {
        return ip;
    }
    if local_addr.ip().is_unspecified() {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    } else {
        local_addr.ip()
    }
}
