//! vanishdht - a Kademlia DHT overlay with self-destructing data objects
//!
//! Peers maintain a 160-bit XOR routing overlay, store key/value pairs at
//! the nodes closest to each key, and can publish encrypted objects whose
//! decryption key is sharded across time-derived DHT locations and expires
//! as those shards churn out of the network.

pub mod commands;
pub mod config;
pub mod error;
pub mod lookup;
pub mod node;
pub mod protocol;
pub mod routing;
pub mod transport;
pub mod vanish;

// Re-export commonly used types
pub use config::NodeConfig;
pub use error::{Error, Result};
pub use lookup::LookupResult;
pub use node::Node;
pub use protocol::{Contact, NodeId, ALPHA, ID_BITS, K};
pub use vanish::Vdo;
