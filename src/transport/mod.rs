//! RPC transport: TCP request/response exchanges with bounded timeouts
//!
//! One TCP connection carries exactly one request/response pair. The server
//! accepts connections forever and spawns a task per exchange; every handler
//! feeds the request's sender through the node's serializer before replying.
//! The client dials per call and turns connect failures, timeouts, and short
//! reads into `Error::Transport` so callers can demote the peer and move on.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::node::NodeHandle;
use crate::protocol::message::{
    read_frame, write_frame, FindNodeReply, FindNodeRequest, FindValueReply, FindValueRequest,
    GetVdoReply, GetVdoRequest, PingRequest, PongReply, Request, Response, StoreReply,
    StoreRequest,
};
use crate::protocol::{NodeId, K};

/// Budget for one complete inbound exchange, request read through reply write
const INBOUND_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(30);

/// Inbound RPC listener
pub struct RpcServer;

impl RpcServer {
    /// Run the accept loop on `listener`, dispatching against `handle`.
    pub fn spawn(listener: TcpListener, handle: Arc<dyn NodeHandle>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer_addr)) => {
                        let handle = handle.clone();
                        tokio::spawn(async move {
                            // An exchange that stalls must not pin a task forever
                            let bounded =
                                timeout(INBOUND_EXCHANGE_TIMEOUT, serve_connection(stream, handle));
                            match bounded.await {
                                Ok(Ok(())) => {}
                                Ok(Err(e)) => {
                                    debug!(peer = %peer_addr, error = %e, "rpc exchange failed")
                                }
                                Err(_) => {
                                    debug!(peer = %peer_addr, "rpc exchange timed out")
                                }
                            }
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        })
    }
}

async fn serve_connection(mut stream: TcpStream, handle: Arc<dyn NodeHandle>) -> Result<()> {
    let request: Request = read_frame(&mut stream).await?;
    let response = dispatch(request, handle.as_ref()).await;
    write_frame(&mut stream, &response).await
}

/// Apply one handler contract. All five handlers observe the sender.
async fn dispatch(request: Request, handle: &dyn NodeHandle) -> Response {
    handle.observe(request.sender()).await;

    match request {
        Request::Ping(req) => Response::Pong(PongReply {
            msg_id: req.msg_id,
            sender: handle.self_contact(),
        }),
        Request::Store(req) => {
            handle.put(req.key, req.value).await;
            Response::Store(StoreReply { msg_id: req.msg_id })
        }
        Request::FindNode(req) => Response::FindNode(FindNodeReply {
            msg_id: req.msg_id,
            nodes: handle.find_closest(req.target, K).await,
        }),
        Request::FindValue(req) => {
            let value = handle.lookup(req.key).await;
            let nodes = if value.is_some() {
                Vec::new()
            } else {
                handle.find_closest(req.key, K).await
            };
            Response::FindValue(FindValueReply {
                msg_id: req.msg_id,
                value,
                nodes,
            })
        }
        Request::GetVdo(req) => Response::GetVdo(GetVdoReply {
            msg_id: req.msg_id,
            vdo: handle.vdo_get(req.vdo_id).await,
        }),
    }
}

/// Outbound dialer. Cheap to clone; carries only the call timeout.
#[derive(Debug, Clone)]
pub struct RpcClient {
    call_timeout: Duration,
}

impl RpcClient {
    pub fn new(call_timeout: Duration) -> Self {
        RpcClient { call_timeout }
    }

    /// Dial, send one request, read one response. The whole exchange runs
    /// under the call timeout.
    async fn call(&self, addr: SocketAddr, request: &Request) -> Result<Response> {
        timeout(self.call_timeout, self.exchange(addr, request))
            .await
            .map_err(|_| Error::Transport(format!("rpc to {} timed out", addr)))?
    }

    async fn exchange(&self, addr: SocketAddr, request: &Request) -> Result<Response> {
        let mut stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::Transport(format!("dial {} failed: {}", addr, e)))?;
        write_frame(&mut stream, request).await?;
        read_frame(&mut stream).await
    }

    pub async fn ping(&self, addr: SocketAddr, req: PingRequest) -> Result<PongReply> {
        let msg_id = req.msg_id;
        match self.call(addr, &Request::Ping(req)).await? {
            Response::Pong(reply) => check_echo(msg_id, reply.msg_id).map(|_| reply),
            other => Err(unexpected_arm("pong", &other)),
        }
    }

    pub async fn store(&self, addr: SocketAddr, req: StoreRequest) -> Result<StoreReply> {
        let msg_id = req.msg_id;
        match self.call(addr, &Request::Store(req)).await? {
            Response::Store(reply) => check_echo(msg_id, reply.msg_id).map(|_| reply),
            other => Err(unexpected_arm("store", &other)),
        }
    }

    pub async fn find_node(
        &self,
        addr: SocketAddr,
        req: FindNodeRequest,
    ) -> Result<FindNodeReply> {
        let msg_id = req.msg_id;
        match self.call(addr, &Request::FindNode(req)).await? {
            Response::FindNode(reply) => check_echo(msg_id, reply.msg_id).map(|_| reply),
            other => Err(unexpected_arm("find_node", &other)),
        }
    }

    pub async fn find_value(
        &self,
        addr: SocketAddr,
        req: FindValueRequest,
    ) -> Result<FindValueReply> {
        let msg_id = req.msg_id;
        match self.call(addr, &Request::FindValue(req)).await? {
            Response::FindValue(reply) => check_echo(msg_id, reply.msg_id).map(|_| reply),
            other => Err(unexpected_arm("find_value", &other)),
        }
    }

    pub async fn get_vdo(&self, addr: SocketAddr, req: GetVdoRequest) -> Result<GetVdoReply> {
        let msg_id = req.msg_id;
        match self.call(addr, &Request::GetVdo(req)).await? {
            Response::GetVdo(reply) => check_echo(msg_id, reply.msg_id).map(|_| reply),
            other => Err(unexpected_arm("get_vdo", &other)),
        }
    }
}

fn check_echo(sent: NodeId, echoed: NodeId) -> Result<()> {
    if sent == echoed {
        Ok(())
    } else {
        Err(Error::Protocol(format!(
            "message id mismatch: sent {}, got {}",
            sent, echoed
        )))
    }
}

fn unexpected_arm(expected: &str, got: &Response) -> Error {
    Error::Protocol(format!("expected {} reply, got {:?}", expected, got))
}
