//! Wire messages and frame codec
//!
//! Every request carries the sender's contact and a fresh random message id;
//! every response echoes that id so callers can reject mismatched replies.
//! Frames on the wire are a u32 big-endian length prefix followed by the
//! bincode body.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::protocol::{Contact, NodeId};
use crate::vanish::Vdo;

/// Upper bound on a single frame; a VDO ciphertext rides inside one response
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingRequest {
    pub sender: Contact,
    pub msg_id: NodeId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PongReply {
    pub msg_id: NodeId,
    pub sender: Contact,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreRequest {
    pub sender: Contact,
    pub msg_id: NodeId,
    pub key: NodeId,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreReply {
    pub msg_id: NodeId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindNodeRequest {
    pub sender: Contact,
    pub msg_id: NodeId,
    pub target: NodeId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindNodeReply {
    pub msg_id: NodeId,
    pub nodes: Vec<Contact>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindValueRequest {
    pub sender: Contact,
    pub msg_id: NodeId,
    pub key: NodeId,
}

/// When `value` is set, `nodes` is empty; otherwise `nodes` carries the
/// closest contacts the responder knows, as in a find-node reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindValueReply {
    pub msg_id: NodeId,
    pub value: Option<Vec<u8>>,
    pub nodes: Vec<Contact>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetVdoRequest {
    pub sender: Contact,
    pub msg_id: NodeId,
    pub vdo_id: NodeId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetVdoReply {
    pub msg_id: NodeId,
    pub vdo: Option<Vdo>,
}

/// One inbound RPC
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    Ping(PingRequest),
    Store(StoreRequest),
    FindNode(FindNodeRequest),
    FindValue(FindValueRequest),
    GetVdo(GetVdoRequest),
}

impl Request {
    /// The observed contact every handler feeds through the serializer
    pub fn sender(&self) -> Contact {
        match self {
            Request::Ping(r) => r.sender,
            Request::Store(r) => r.sender,
            Request::FindNode(r) => r.sender,
            Request::FindValue(r) => r.sender,
            Request::GetVdo(r) => r.sender,
        }
    }
}

/// One RPC response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    Pong(PongReply),
    Store(StoreReply),
    FindNode(FindNodeReply),
    FindValue(FindValueReply),
    GetVdo(GetVdoReply),
}

/// Write one length-prefixed bincode frame
pub async fn write_frame<W, T>(writer: &mut W, msg: &T) -> Result<()>
where
    W: AsyncWriteExt + Unpin,
    T: Serialize,
{
    let body = bincode::serialize(msg)?;
    if body.len() > MAX_FRAME_BYTES {
        return Err(Error::Protocol(format!(
            "frame too large: {} bytes (max {})",
            body.len(),
            MAX_FRAME_BYTES
        )));
    }
    writer.write_all(&(body.len() as u32).to_be_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed bincode frame
pub async fn read_frame<R, T>(reader: &mut R) -> Result<T>
where
    R: AsyncReadExt + Unpin,
    T: serde::de::DeserializeOwned,
{
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes).await?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(Error::Protocol(format!(
            "frame too large: {} bytes (max {})",
            len, MAX_FRAME_BYTES
        )));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(bincode::deserialize(&body)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact() -> Contact {
        Contact::new(NodeId::random(), "127.0.0.1:7890".parse().unwrap())
    }

    #[tokio::test]
    async fn frame_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);
        let req = Request::FindNode(FindNodeRequest {
            sender: contact(),
            msg_id: NodeId::random(),
            target: NodeId::random(),
        });

        write_frame(&mut client, &req).await.unwrap();
        let decoded: Request = read_frame(&mut server).await.unwrap();

        match (req, decoded) {
            (Request::FindNode(a), Request::FindNode(b)) => {
                assert_eq!(a.msg_id, b.msg_id);
                assert_eq!(a.target, b.target);
                assert_eq!(a.sender, b.sender);
            }
            _ => panic!("frame decoded to a different arm"),
        }
    }

    #[tokio::test]
    async fn oversized_frame_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client
            .write_all(&((MAX_FRAME_BYTES as u32 + 1).to_be_bytes()))
            .await
            .unwrap();
        let err = read_frame::<_, Request>(&mut server).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }
}
