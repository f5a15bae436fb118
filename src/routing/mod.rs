//! Kademlia routing table: 160 k-buckets with least-recently-seen eviction
//!
//! Bucket `i` holds peers whose XOR with the local id has exactly `i` leading
//! zero bits. Within a bucket, index 0 is the least recently seen contact and
//! the tail is the most recently seen. A full bucket never evicts the head
//! outright: the owner probes it with a PING first and only replaces it when
//! the probe fails, which keeps long-lived peers in the table.
//!
//! The table itself never performs network IO. `update` reports when a probe
//! is required and the caller commits the result with `resolve_full`, so no
//! lock is ever held across a dial.

use tracing::debug;

use crate::protocol::{Contact, NodeId, ID_BITS, K};

/// What `update` did, and whether the caller owes a liveness probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The contact is the local node; ignored
    Ignored,
    /// Known contact moved to the most-recently-seen position
    Refreshed,
    /// New contact appended to a bucket with room
    Appended,
    /// Bucket is full: probe `lru` and call `resolve_full` with the verdict
    Full { bucket: usize, lru: Contact },
}

/// Routing table owned by exactly one node
pub struct RoutingTable {
    self_contact: Contact,
    buckets: Vec<Vec<Contact>>,
}

impl RoutingTable {
    pub fn new(self_contact: Contact) -> Self {
        RoutingTable {
            self_contact,
            buckets: vec![Vec::new(); ID_BITS],
        }
    }

    pub fn self_contact(&self) -> &Contact {
        &self.self_contact
    }

    /// Snapshot of bucket `i` (LRU first)
    pub fn bucket(&self, i: usize) -> &[Contact] {
        &self.buckets[i]
    }

    /// Apply the Kademlia update rule for an observed contact.
    ///
    /// Does not block: a full bucket is reported back so the owner can probe
    /// the least-recently-seen entry without holding the table.
    pub fn update(&mut self, contact: &Contact) -> UpdateOutcome {
        let index = contact.id.prefix_len(&self.self_contact.id);
        if index == ID_BITS {
            return UpdateOutcome::Ignored;
        }

        let bucket = &mut self.buckets[index];
        if let Some(pos) = bucket.iter().position(|c| c.id == contact.id) {
            let entry = bucket.remove(pos);
            bucket.push(entry);
            return UpdateOutcome::Refreshed;
        }

        if bucket.len() < K {
            bucket.push(*contact);
            return UpdateOutcome::Appended;
        }

        UpdateOutcome::Full {
            bucket: index,
            lru: bucket[0],
        }
    }

    /// Commit the verdict of a liveness probe on a full bucket's head.
    ///
    /// A live head moves to the tail and the candidate is dropped; a dead
    /// head is evicted and the candidate appended. No-op if the bucket
    /// changed shape underneath (single-writer discipline makes that a
    /// should-not-happen, not a correctness hazard).
    pub fn resolve_full(
        &mut self,
        index: usize,
        lru: &Contact,
        candidate: &Contact,
        lru_alive: bool,
    ) {
        let bucket = &mut self.buckets[index];
        if bucket.first().map(|c| c.id) != Some(lru.id) {
            debug!(bucket = index, "bucket head changed during probe, dropping update");
            return;
        }
        let head = bucket.remove(0);
        if lru_alive {
            bucket.push(head);
        } else {
            debug!(evicted = %head.id, replacement = %candidate.id, "evicting unresponsive bucket head");
            bucket.push(*candidate);
        }
    }

    /// Collect up to `count` contacts closest to `target`, sorted by XOR
    /// distance ascending.
    ///
    /// Widens outward from the target's bucket (p, p-1, p+1, p-2, ...) until
    /// enough contacts are gathered or all buckets are exhausted; may return
    /// fewer than `count` when the table is sparse. When the target is the
    /// local id the local contact is included at distance zero.
    pub fn find_closest(&self, target: &NodeId, count: usize) -> Vec<Contact> {
        let mut gathered: Vec<Contact> = Vec::new();
        let p = target.prefix_len(&self.self_contact.id);

        let mut i = 0usize;
        while (p >= i || p + i < ID_BITS) && gathered.len() < count {
            if p == ID_BITS && i == 0 {
                gathered.push(self.self_contact);
                i += 1;
                continue;
            }
            if p >= i && p - i < ID_BITS {
                gathered.extend_from_slice(&self.buckets[p - i]);
            }
            if i > 0 && p + i < ID_BITS {
                gathered.extend_from_slice(&self.buckets[p + i]);
            }
            i += 1;
        }

        gathered.sort_by_key(|c| c.distance_to(target));
        gathered.truncate(count);
        gathered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::net::SocketAddr;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    fn random_contact(port: u16) -> Contact {
        Contact::new(NodeId::random(), addr(port))
    }

    #[test]
    fn self_contact_is_ignored() {
        let me = random_contact(7000);
        let mut table = RoutingTable::new(me);
        assert_eq!(table.update(&me), UpdateOutcome::Ignored);
    }

    #[test]
    fn buckets_stay_within_size_bound() {
        let mut table = RoutingTable::new(random_contact(7000));
        for port in 0..19 {
            table.update(&random_contact(8000 + port));
        }
        for i in 0..ID_BITS {
            assert!(table.bucket(i).len() <= K);
        }
    }

    #[test]
    fn contacts_land_in_their_prefix_bucket() {
        let me = random_contact(7000);
        let mut table = RoutingTable::new(me);
        for port in 0..50 {
            let c = random_contact(8000 + port);
            table.update(&c);
            let i = c.id.prefix_len(&me.id);
            assert!(table.bucket(i).iter().any(|e| e.id == c.id));
        }
    }

    #[test]
    fn refresh_moves_contact_to_tail() {
        let me = random_contact(7000);
        let mut table = RoutingTable::new(me);

        // Craft several contacts sharing one bucket
        let mut first = None;
        let mut bucket_index = None;
        let mut placed = 0;
        let mut port = 8000;
        while placed < 3 {
            let c = random_contact(port);
            port += 1;
            let i = c.id.prefix_len(&me.id);
            match bucket_index {
                None => {
                    bucket_index = Some(i);
                    first = Some(c);
                }
                Some(b) if b != i => continue,
                _ => {}
            }
            table.update(&c);
            placed += 1;
        }

        let b = bucket_index.unwrap();
        let first = first.unwrap();
        assert_eq!(table.bucket(b)[0].id, first.id);

        assert_eq!(table.update(&first), UpdateOutcome::Refreshed);
        assert_eq!(table.bucket(b).last().unwrap().id, first.id);
    }

    #[test]
    fn full_bucket_reports_lru_for_probing() {
        let me = Contact::new(NodeId::from_bytes([0u8; 20]), addr(7000));
        let mut table = RoutingTable::new(me);

        // All-in-one-bucket contacts: leading byte 0x80 pins prefix_len to 0
        let make = |tag: u8| {
            let mut bytes = [0u8; 20];
            bytes[0] = 0x80;
            bytes[19] = tag;
            Contact::new(NodeId::from_bytes(bytes), addr(8000 + tag as u16))
        };

        for tag in 0..K as u8 {
            assert_eq!(table.update(&make(tag)), UpdateOutcome::Appended);
        }

        let newcomer = make(200);
        let outcome = table.update(&newcomer);
        let (bucket, lru) = match outcome {
            UpdateOutcome::Full { bucket, lru } => (bucket, lru),
            other => panic!("expected Full, got {:?}", other),
        };
        assert_eq!(lru.id, make(0).id);

        // Dead head: evicted, newcomer appended at the tail
        table.resolve_full(bucket, &lru, &newcomer, false);
        assert_eq!(table.bucket(bucket).len(), K);
        assert_eq!(table.bucket(bucket).last().unwrap().id, newcomer.id);
        assert!(!table.bucket(bucket).iter().any(|c| c.id == lru.id));

        // Live head: moved to the tail, second newcomer dropped
        let second = make(201);
        let (bucket, lru) = match table.update(&second) {
            UpdateOutcome::Full { bucket, lru } => (bucket, lru),
            other => panic!("expected Full, got {:?}", other),
        };
        table.resolve_full(bucket, &lru, &second, true);
        assert_eq!(table.bucket(bucket).last().unwrap().id, lru.id);
        assert!(!table.bucket(bucket).iter().any(|c| c.id == second.id));
    }

    #[test]
    fn find_closest_returns_known_target_first() {
        let mut table = RoutingTable::new(random_contact(7000));
        let mut contacts = Vec::new();
        for port in 0..24 {
            let c = random_contact(8000 + port);
            contacts.push(c);
            table.update(&c);
        }

        let wanted = contacts[7];
        let found = table.find_closest(&wanted.id, K);
        assert_eq!(found[0].id, wanted.id);
    }

    #[test]
    fn find_closest_includes_self_for_own_id() {
        let me = random_contact(7000);
        let table = RoutingTable::new(me);
        let found = table.find_closest(&me.id, K);
        assert_eq!(found[0].id, me.id);
    }

    proptest! {
        #[test]
        fn find_closest_sorted_and_deduplicated(seeds in prop::collection::vec(any::<[u8; 20]>(), 1..60), target in any::<[u8; 20]>()) {
            let mut table = RoutingTable::new(random_contact(7000));
            for (i, seed) in seeds.iter().enumerate() {
                table.update(&Contact::new(NodeId::from_bytes(*seed), addr(8000 + i as u16)));
            }
            let target = NodeId::from_bytes(target);
            let found = table.find_closest(&target, K);

            prop_assert!(found.len() <= K);
            for pair in found.windows(2) {
                prop_assert!(pair[0].distance_to(&target) <= pair[1].distance_to(&target));
                prop_assert!(pair[0].id != pair[1].id);
            }
        }
    }
}
