//! Interactive shell commands
//!
//! Each command maps to one node operation and returns a human-readable
//! `OK:` / `ERR:` line. Identifier arguments accept either the 40-char hex
//! form or free text, which is digested into an identifier.

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::node::Node;
use crate::protocol::NodeId;

/// Dispatch one command line against the node
pub async fn execute(node: &Node, line: &str) -> String {
    let mut parts = line.split_whitespace();
    let Some(command) = parts.next() else {
        return String::new();
    };
    let args: Vec<&str> = parts.collect();

    match run(node, command, &args).await {
        Ok(output) => format!("OK: {}", output),
        Err(e) => format!("ERR: {}", e),
    }
}

async fn run(node: &Node, command: &str, args: &[&str]) -> Result<String> {
    match command {
        "whoami" => Ok(format!("{} @ {}", node.id(), node.local_addr())),

        "ping" => {
            let addr = parse_addr(arg(args, 0, "ping <host:port>")?)?;
            let contact = node.ping(addr).await?;
            Ok(format!("pong from {}", contact.id))
        }

        "find_contact" => {
            let id = NodeId::from_hex(arg(args, 0, "find_contact <node_id>")?)?;
            let contact = node.find_contact(id).await?;
            Ok(format!("{} @ {}", contact.id, contact.addr))
        }

        "store" => {
            let peer = NodeId::from_hex(arg(args, 0, "store <peer_id> <key> <value>")?)?;
            let key = parse_key(arg(args, 1, "store <peer_id> <key> <value>")?);
            let value = rest(args, 2, "store <peer_id> <key> <value>")?;
            let contact = node.find_contact(peer).await?;
            node.store(&contact, key, value.into_bytes()).await?;
            Ok(format!("stored {} at {}", key, peer))
        }

        "find_node" => {
            let peer = NodeId::from_hex(arg(args, 0, "find_node <peer_id> <target_id>")?)?;
            let target = parse_key(arg(args, 1, "find_node <peer_id> <target_id>")?);
            let contact = node.find_contact(peer).await?;
            let nodes = node.find_node(&contact, target).await?;
            Ok(render_contacts(&nodes))
        }

        "find_value" => {
            let peer = NodeId::from_hex(arg(args, 0, "find_value <peer_id> <key>")?)?;
            let key = parse_key(arg(args, 1, "find_value <peer_id> <key>")?);
            let contact = node.find_contact(peer).await?;
            let (value, nodes) = node.find_value(&contact, key).await?;
            match value {
                Some(value) => Ok(format!("value --> {}", String::from_utf8_lossy(&value))),
                None => Ok(render_contacts(&nodes)),
            }
        }

        "local_find_value" => {
            let key = parse_key(arg(args, 0, "local_find_value <key>")?);
            match node.local_find_value(key).await {
                Some(value) => Ok(format!("value --> {}", String::from_utf8_lossy(&value))),
                None => Err(Error::NotFound(format!("no local value for {}", key))),
            }
        }

        "iterative_find_node" => {
            let target = parse_key(arg(args, 0, "iterative_find_node <id>")?);
            let contacts = node.iterative_find_node(target).await;
            if contacts.is_empty() {
                Err(Error::NotFound("no contacts converged".into()))
            } else {
                Ok(render_contacts(&contacts))
            }
        }

        "iterative_store" => {
            let key = parse_key(arg(args, 0, "iterative_store <key> <value>")?);
            let value = rest(args, 1, "iterative_store <key> <value>")?;
            let acked = node.iterative_store(key, value.into_bytes()).await;
            Ok(format!("stored {} on {} peers", key, acked))
        }

        "iterative_find_value" => {
            let key = parse_key(arg(args, 0, "iterative_find_value <key>")?);
            let result = node.iterative_find_value(key).await;
            match result.value {
                Some(value) => Ok(format!(
                    "key {} --> {}",
                    result.key,
                    String::from_utf8_lossy(&value)
                )),
                None => Err(Error::NotFound(format!("no value for {}", key))),
            }
        }

        "vanish" => {
            let usage = "vanish <vdo_id> <shares> <threshold> <refresh_secs> <text...>";
            let vdo_id = parse_key(arg(args, 0, usage)?);
            let shares: u8 = parse_num(arg(args, 1, usage)?)?;
            let threshold: u8 = parse_num(arg(args, 2, usage)?)?;
            let refresh_secs: u64 = parse_num(arg(args, 3, usage)?)?;
            let text = rest(args, 4, usage)?;

            let vdo = node.vanish(vdo_id, text.as_bytes(), shares, threshold).await?;
            node.store_vdo(vdo, Duration::from_secs(refresh_secs)).await?;
            Ok(format!("vanished as {}", vdo_id))
        }

        "unvanish" => {
            let usage = "unvanish <node_id> <vdo_id>";
            let custodian = NodeId::from_hex(arg(args, 0, usage)?)?;
            let vdo_id = parse_key(arg(args, 1, usage)?);
            let data = node.unvanish(custodian, vdo_id).await?;
            Ok(String::from_utf8_lossy(&data).into_owned())
        }

        other => Err(Error::InvalidData(format!("unknown command: {}", other))),
    }
}

fn arg<'a>(args: &[&'a str], index: usize, usage: &str) -> Result<&'a str> {
    args.get(index)
        .copied()
        .ok_or_else(|| Error::InvalidData(format!("usage: {}", usage)))
}

/// Everything from `index` onward, joined back into one value
fn rest(args: &[&str], index: usize, usage: &str) -> Result<String> {
    if args.len() <= index {
        return Err(Error::InvalidData(format!("usage: {}", usage)));
    }
    Ok(args[index..].join(" "))
}

fn parse_addr(raw: &str) -> Result<SocketAddr> {
    raw.parse()
        .map_err(|_| Error::InvalidData(format!("not a host:port address: {}", raw)))
}

fn parse_num<T: std::str::FromStr>(raw: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| Error::InvalidData(format!("not a number: {}", raw)))
}

/// Hex ids pass through; anything else is digested into an id
fn parse_key(raw: &str) -> NodeId {
    NodeId::from_hex(raw).unwrap_or_else(|_| NodeId::digest(raw.as_bytes()))
}

fn render_contacts(contacts: &[crate::protocol::Contact]) -> String {
    let rendered: Vec<String> = contacts
        .iter()
        .map(|c| format!("{} @ {}", c.id, c.addr))
        .collect();
    format!("{} nodes\n{}", rendered.len(), rendered.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_keys_parse_exactly() {
        let id = NodeId::random();
        assert_eq!(parse_key(&id.to_string()), id);
    }

    #[test]
    fn text_keys_digest_deterministically() {
        assert_eq!(parse_key("hello"), parse_key("hello"));
        assert_ne!(parse_key("hello"), parse_key("world"));
    }
}
