//! Vanishing data objects: encrypt, shard the key across the DHT, expire
//!
//! The data-encryption key never leaves the originator in one piece. It is
//! Shamir-split and the shares are stored at DHT locations derived from a
//! time-dependent access key: the current 8-hour epoch seeds a deterministic
//! PRNG whose first 63-bit draw is the access key, and the access key seeds
//! the PRNG that emits the share locations. Any reader with a synchronized
//! clock can re-derive the same locations; once the shares churn out of the
//! network the object is unrecoverable.

pub mod crypto;

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Datelike, Timelike, Utc};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::node::Node;
use crate::protocol::{NodeId, ID_BYTES};

/// How many past epochs an unvanish scans, tolerating reader clock drift
const EPOCH_SCAN_WINDOW: i64 = 3;

/// A vanishing data object: the ciphertext plus what a reader needs to
/// re-derive the share locations. `access_key == 0` means uninitialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vdo {
    pub access_key: i64,
    pub ciphertext: Vec<u8>,
    /// Total number of key shares scattered (n)
    pub shares: u8,
    /// Shares required for reconstruction (k)
    pub threshold: u8,
    pub vdo_id: NodeId,
}

/// Epoch of a given instant: 8-hour buckets on a coarse calendar grid, so
/// every party inside the same bucket derives the same access key.
pub fn epoch_at(t: DateTime<Utc>) -> i64 {
    (t.year() as i64 - 1970) * 365 * 3
        + (t.month() as i64 - 1) * 30 * 3
        + (t.day() as i64 - 1) * 3
        + t.hour() as i64 / 8
}

pub fn current_epoch() -> i64 {
    epoch_at(Utc::now())
}

/// Deterministic access key for an epoch: one non-negative 63-bit draw from
/// a PRNG seeded with the epoch. Zero is reserved as the "uninitialized"
/// sentinel and is redrawn.
pub fn derive_access_key(epoch: i64) -> i64 {
    let mut rng = ChaCha20Rng::seed_from_u64(epoch as u64);
    loop {
        let draw = (rng.next_u64() >> 1) as i64;
        if draw != 0 {
            return draw;
        }
    }
}

/// The `count` DHT locations holding a VDO's key shares under `access_key`.
/// Pure function of its inputs.
pub fn derive_locations(access_key: i64, count: usize) -> Vec<NodeId> {
    let mut rng = ChaCha20Rng::seed_from_u64(access_key as u64);
    (0..count)
        .map(|_| {
            let mut bytes = [0u8; ID_BYTES];
            rng.fill_bytes(&mut bytes);
            NodeId::from_bytes(bytes)
        })
        .collect()
}

/// Encrypt `data`, split the key into `shares` Shamir shares with threshold
/// `threshold`, scatter them across the DHT under the current epoch's access
/// key, and return the VDO describing the result.
pub async fn vanish_data(
    node: &Node,
    vdo_id: NodeId,
    data: &[u8],
    shares: u8,
    threshold: u8,
) -> Result<Vdo> {
    let key = crypto::generate_key();
    let ciphertext = crypto::encrypt(&key, data);
    let share_map = crypto::split_key(shares, threshold, &key)?;

    let access_key = derive_access_key(current_epoch());
    scatter(node, access_key, &share_map).await;

    Ok(Vdo {
        access_key,
        ciphertext,
        shares,
        threshold,
        vdo_id,
    })
}

/// Reconstruct a VDO's plaintext, scanning the current and the two previous
/// epochs so a clock up to two epochs stale still finds the shares.
pub async fn unvanish(node: &Node, vdo: &Vdo) -> Result<Vec<u8>> {
    let epoch = current_epoch();
    for drift in 0..EPOCH_SCAN_WINDOW {
        match unvanish_at_epoch(node, vdo, epoch - drift).await {
            Ok(data) => return Ok(data),
            Err(e) => debug!(epoch = epoch - drift, error = %e, "reconstruction failed at epoch"),
        }
    }
    Err(Error::InsufficientShares(format!(
        "no epoch in the scan window yielded {} shares",
        vdo.threshold
    )))
}

/// Reconstruct against one specific epoch's access key
pub async fn unvanish_at_epoch(node: &Node, vdo: &Vdo, epoch: i64) -> Result<Vec<u8>> {
    let collected = gather_shares(node, derive_access_key(epoch), vdo.shares).await;
    if collected.len() < vdo.threshold as usize {
        return Err(Error::InsufficientShares(format!(
            "recovered {} of {} required shares",
            collected.len(),
            vdo.threshold
        )));
    }
    let key = crypto::key_from_slice(&crypto::combine_key(vdo.threshold, &collected)?)?;
    crypto::decrypt(&key, &vdo.ciphertext)
}

/// Periodic share re-scatter keeping a stored VDO alive across epochs.
///
/// Each iteration snapshots the VDO, performs every network round-trip with
/// no lock held, and only takes the write lock to commit the new access key.
/// The task stops for good once fewer than `threshold` shares are
/// recoverable: the object has expired.
pub(crate) fn spawn_refresh(node: Node, vdo_id: NodeId, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            sleep(interval).await;

            let snapshot = node.vdo_map().read().await.get(&vdo_id).cloned();
            let Some(vdo) = snapshot else {
                warn!(vdo = %vdo_id, "vdo no longer stored, stopping refresh");
                return;
            };

            let collected = gather_shares(&node, vdo.access_key, vdo.shares).await;
            if collected.len() < vdo.threshold as usize {
                warn!(
                    vdo = %vdo_id,
                    recovered = collected.len(),
                    required = vdo.threshold,
                    "cannot recover enough shares, object has expired"
                );
                return;
            }

            let key = match crypto::combine_key(vdo.threshold, &collected) {
                Ok(key) => key,
                Err(e) => {
                    warn!(vdo = %vdo_id, error = %e, "share recombination failed");
                    return;
                }
            };
            let share_map = match crypto::split_key(vdo.shares, vdo.threshold, &key) {
                Ok(map) => map,
                Err(e) => {
                    warn!(vdo = %vdo_id, error = %e, "key re-split failed");
                    return;
                }
            };

            let access_key = derive_access_key(current_epoch());
            scatter(&node, access_key, &share_map).await;

            let mut map = node.vdo_map().write().await;
            if let Some(entry) = map.get_mut(&vdo_id) {
                entry.access_key = access_key;
            }
            debug!(vdo = %vdo_id, access_key, "re-scattered key shares");
        }
    })
}

/// Store every share at its derived location: payload is the 1-based share
/// index byte followed by the share body.
async fn scatter(node: &Node, access_key: i64, share_map: &BTreeMap<u8, Vec<u8>>) {
    let locations = derive_locations(access_key, share_map.len());
    for ((index, body), location) in share_map.iter().zip(locations) {
        let mut payload = Vec::with_capacity(1 + body.len());
        payload.push(*index);
        payload.extend_from_slice(body);
        let acked = node.iterative_store(location, payload).await;
        debug!(share = index, location = %location, acked, "scattered key share");
    }
}

/// Iteratively fetch whatever shares are still reachable under `access_key`
async fn gather_shares(node: &Node, access_key: i64, count: u8) -> BTreeMap<u8, Vec<u8>> {
    let mut collected = BTreeMap::new();
    for location in derive_locations(access_key, count as usize) {
        let result = node.iterative_find_value(location).await;
        let Some(payload) = result.value else { continue };
        match parse_share(&payload) {
            Some((index, body)) => {
                collected.insert(index, body);
            }
            None => debug!(location = %location, "dropping malformed share payload"),
        }
    }
    collected
}

/// Decode an index-prefixed share payload; index 0 and empty bodies are
/// malformed.
fn parse_share(payload: &[u8]) -> Option<(u8, Vec<u8>)> {
    match payload.split_first() {
        Some((&index, body)) if index != 0 && !body.is_empty() => Some((index, body.to_vec())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn epoch_formula_matches_fixed_dates() {
        let t = Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(epoch_at(t), 0);

        // Hour 8 starts the second bucket of the day
        let t = Utc.with_ymd_and_hms(1970, 1, 1, 8, 0, 0).unwrap();
        assert_eq!(epoch_at(t), 1);
        let t = Utc.with_ymd_and_hms(1970, 1, 1, 7, 59, 59).unwrap();
        assert_eq!(epoch_at(t), 0);

        // Next day advances by three buckets, next month by ninety
        let t = Utc.with_ymd_and_hms(1970, 1, 2, 0, 0, 0).unwrap();
        assert_eq!(epoch_at(t), 3);
        let t = Utc.with_ymd_and_hms(1970, 2, 1, 0, 0, 0).unwrap();
        assert_eq!(epoch_at(t), 90);
        let t = Utc.with_ymd_and_hms(1971, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(epoch_at(t), 1095);
    }

    #[test]
    fn access_key_is_deterministic_and_positive() {
        let a = derive_access_key(12345);
        let b = derive_access_key(12345);
        assert_eq!(a, b);
        assert!(a > 0);
        assert_ne!(derive_access_key(12346), a);
    }

    #[test]
    fn locations_are_a_function_of_access_key_and_count() {
        let a = derive_locations(987654321, 30);
        let b = derive_locations(987654321, 30);
        assert_eq!(a, b);
        assert_eq!(a.len(), 30);

        // A different seed scatters elsewhere
        let c = derive_locations(123456789, 30);
        assert_ne!(a, c);

        // Prefix stability: the first locations do not depend on the count
        let shorter = derive_locations(987654321, 10);
        assert_eq!(&a[..10], &shorter[..]);
    }

    #[test]
    fn share_payload_round_trip() {
        assert_eq!(parse_share(&[3, 9, 8, 7]), Some((3, vec![9, 8, 7])));
        assert_eq!(parse_share(&[0, 1, 2]), None);
        assert_eq!(parse_share(&[5]), None);
        assert_eq!(parse_share(&[]), None);
    }
}
