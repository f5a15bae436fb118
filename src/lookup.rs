//! Iterative α-parallel lookup
//!
//! Each round dispatches up to α FIND_NODE / FIND_VALUE queries at the
//! closest not-yet-queried shortlist entries, joins them, merges the replies,
//! and re-sorts. The search ends when a value is found, when the shortlist
//! head stops improving, or when the K closest entries have all answered.
//! A peer that fails its dispatch is dropped from the shortlist so the
//! termination predicate can settle; the failure never propagates.

use std::collections::HashSet;

use futures::future::join_all;
use tracing::debug;

use crate::node::Node;
use crate::protocol::{Contact, NodeId, ALPHA, K};

/// Outcome of one iterative search
pub struct LookupResult {
    pub key: NodeId,
    /// K closest contacts seen, ascending by XOR distance to the key
    pub contacts: Vec<Contact>,
    /// Set iff a FIND_VALUE dispatch returned the value
    pub value: Option<Vec<u8>>,
}

enum DispatchOutcome {
    Nodes(Vec<Contact>),
    Value(Vec<u8>),
    Failed,
}

pub(crate) async fn iterative_find(node: &Node, target: NodeId, for_value: bool) -> LookupResult {
    let mut shortlist = node.find_closest_local(&target, K).await;
    sort_by_distance(&mut shortlist, &target);

    let mut queried: HashSet<NodeId> = HashSet::new();
    let mut completed: HashSet<NodeId> = HashSet::new();
    let mut closest_seen: Option<NodeId> = None;
    let mut found_value: Option<Vec<u8>> = None;

    'rounds: loop {
        let batch: Vec<Contact> = shortlist
            .iter()
            .filter(|c| !queried.contains(&c.id))
            .take(ALPHA)
            .copied()
            .collect();
        if batch.is_empty() {
            break;
        }
        queried.extend(batch.iter().map(|c| c.id));

        let replies = join_all(
            batch
                .iter()
                .map(|contact| dispatch(node, contact, target, for_value)),
        )
        .await;

        for (contact, outcome) in batch.iter().zip(replies) {
            match outcome {
                DispatchOutcome::Value(value) => {
                    found_value = Some(value);
                    break 'rounds;
                }
                DispatchOutcome::Nodes(nodes) => {
                    completed.insert(contact.id);
                    for learned in nodes {
                        node.observe(learned).await;
                        if !shortlist.iter().any(|c| c.id == learned.id) {
                            shortlist.push(learned);
                        }
                    }
                }
                DispatchOutcome::Failed => {
                    shortlist.retain(|c| c.id != contact.id);
                }
            }
        }

        sort_by_distance(&mut shortlist, &target);

        // Termination: an emptied shortlist, a head that stopped improving,
        // or K closest entries all answered.
        let head = match shortlist.first() {
            Some(contact) => contact.id,
            None => break,
        };
        if closest_seen == Some(head) {
            break;
        }
        if shortlist.iter().take(K).all(|c| completed.contains(&c.id)) {
            break;
        }
        closest_seen = Some(head);
    }

    sort_by_distance(&mut shortlist, &target);
    shortlist.truncate(K);
    LookupResult {
        key: target,
        contacts: shortlist,
        value: found_value,
    }
}

async fn dispatch(
    node: &Node,
    contact: &Contact,
    target: NodeId,
    for_value: bool,
) -> DispatchOutcome {
    if for_value {
        match node.find_value(contact, target).await {
            Ok((Some(value), _)) => DispatchOutcome::Value(value),
            Ok((None, nodes)) => DispatchOutcome::Nodes(nodes),
            Err(e) => {
                debug!(peer = %contact.id, error = %e, "find_value dispatch failed");
                DispatchOutcome::Failed
            }
        }
    } else {
        match node.find_node(contact, target).await {
            Ok(nodes) => DispatchOutcome::Nodes(nodes),
            Err(e) => {
                debug!(peer = %contact.id, error = %e, "find_node dispatch failed");
                DispatchOutcome::Failed
            }
        }
    }
}

fn sort_by_distance(contacts: &mut [Contact], target: &NodeId) {
    contacts.sort_by_key(|c| c.distance_to(target));
}
