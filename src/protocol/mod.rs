//! Core protocol types: 160-bit node identifiers, XOR distance, contacts
//!
//! Every node, key, and message id in the overlay is a 160-bit identifier.
//! Distance between identifiers is their bytewise XOR interpreted as an
//! unsigned big-endian integer; the number of leading zero bits of that XOR
//! selects the k-bucket a peer lives in.

pub mod message;

use std::fmt;
use std::net::SocketAddr;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Identifier width in bytes
pub const ID_BYTES: usize = 20;
/// Identifier width in bits
pub const ID_BITS: usize = 160;
/// Bucket size and result-set cardinality
pub const K: usize = 20;
/// Iterative lookup concurrency
pub const ALPHA: usize = 3;

/// 160-bit overlay identifier
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId([u8; ID_BYTES]);

impl NodeId {
    /// Draw a uniformly random identifier
    pub fn random() -> Self {
        let mut bytes = [0u8; ID_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        NodeId(bytes)
    }

    pub fn from_bytes(bytes: [u8; ID_BYTES]) -> Self {
        NodeId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ID_BYTES] {
        &self.0
    }

    /// Derive an identifier from arbitrary bytes (SHA-256 truncated)
    pub fn digest(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        let mut bytes = [0u8; ID_BYTES];
        bytes.copy_from_slice(&hash[..ID_BYTES]);
        NodeId(bytes)
    }

    /// Bytewise XOR with another identifier
    pub fn xor(&self, other: &NodeId) -> Distance {
        let mut result = [0u8; ID_BYTES];
        for (i, byte) in result.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }
        Distance(result)
    }

    /// Number of leading zero bits of the XOR with `other`, in 0..=160.
    /// 160 means the identifiers are equal.
    pub fn prefix_len(&self, other: &NodeId) -> usize {
        self.xor(other).leading_zeros()
    }

    /// Parse the 40-character lowercase hex text form
    pub fn from_hex(s: &str) -> Result<Self> {
        let raw = hex::decode(s).map_err(|e| Error::InvalidId(format!("bad hex id: {}", e)))?;
        let bytes: [u8; ID_BYTES] = raw
            .try_into()
            .map_err(|_| Error::InvalidId(format!("id must be {} hex chars", ID_BYTES * 2)))?;
        Ok(NodeId(bytes))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", hex::encode(self.0))
    }
}

/// XOR distance between two identifiers.
///
/// The derived lexicographic ordering over the big-endian bytes equals the
/// ordering of the XOR read as an unsigned 160-bit integer, so distances
/// compare without any big-integer conversion.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Distance([u8; ID_BYTES]);

impl Distance {
    pub const ZERO: Distance = Distance([0u8; ID_BYTES]);

    /// Count leading zero bits
    pub fn leading_zeros(&self) -> usize {
        for (i, &byte) in self.0.iter().enumerate() {
            if byte != 0 {
                return i * 8 + byte.leading_zeros() as usize;
            }
        }
        ID_BITS
    }
}

impl fmt::Debug for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Distance({})", hex::encode(self.0))
    }
}

/// A peer's overlay identity plus its reachable address.
///
/// Two contacts are equal iff their node ids are equal; the address is
/// carried along but does not participate in identity.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Contact {
    pub id: NodeId,
    pub addr: SocketAddr,
}

impl Contact {
    pub fn new(id: NodeId, addr: SocketAddr) -> Self {
        Contact { id, addr }
    }

    pub fn distance_to(&self, target: &NodeId) -> Distance {
        self.id.xor(target)
    }
}

impl PartialEq for Contact {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Contact {}
