//! Crypto primitives for vanishing data: AES-256-CFB and Shamir sharing
//!
//! The VDO wire format is a 16-byte random IV followed by the CFB stream;
//! there is no authentication tag, so decryption with the wrong key yields
//! garbage rather than an error. Key sharding is plain Shamir over GF(256),
//! with shares addressed by their 1-based x-coordinate.

use std::collections::BTreeMap;

use aes::cipher::generic_array::GenericArray;
use aes::Aes256;
use cfb_mode::cipher::{AsyncStreamCipher, KeyIvInit};
use rand::RngCore;
use sharks::{Share, Sharks};

use crate::error::{Error, Result};

type Aes256CfbEnc = cfb_mode::Encryptor<Aes256>;
type Aes256CfbDec = cfb_mode::Decryptor<Aes256>;

/// AES-256 key length
pub const KEY_BYTES: usize = 32;
/// CFB initialization vector length (one AES block)
pub const IV_BYTES: usize = 16;

/// Draw a fresh random data-encryption key
pub fn generate_key() -> [u8; KEY_BYTES] {
    let mut key = [0u8; KEY_BYTES];
    rand::thread_rng().fill_bytes(&mut key);
    key
}

/// Encrypt under a fresh random IV; output is IV ‖ ciphertext
pub fn encrypt(key: &[u8; KEY_BYTES], plaintext: &[u8]) -> Vec<u8> {
    let mut iv = [0u8; IV_BYTES];
    rand::thread_rng().fill_bytes(&mut iv);

    let mut body = plaintext.to_vec();
    Aes256CfbEnc::new(GenericArray::from_slice(key), GenericArray::from_slice(&iv))
        .encrypt(&mut body);

    let mut out = Vec::with_capacity(IV_BYTES + body.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&body);
    out
}

/// Strip the leading IV and decrypt the remainder
pub fn decrypt(key: &[u8; KEY_BYTES], ciphertext: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.len() < IV_BYTES {
        return Err(Error::Crypto(format!(
            "ciphertext shorter than the {}-byte IV",
            IV_BYTES
        )));
    }
    let (iv, body) = ciphertext.split_at(IV_BYTES);
    let mut out = body.to_vec();
    Aes256CfbDec::new(GenericArray::from_slice(key), GenericArray::from_slice(iv))
        .decrypt(&mut out);
    Ok(out)
}

/// Split `secret` into `shares` Shamir shares with reconstruction threshold
/// `threshold`. The returned map is keyed by the 1-based share index.
pub fn split_key(shares: u8, threshold: u8, secret: &[u8]) -> Result<BTreeMap<u8, Vec<u8>>> {
    if threshold == 0 || threshold > shares {
        return Err(Error::InvalidData(format!(
            "threshold {} out of range for {} shares",
            threshold, shares
        )));
    }

    let sharks = Sharks(threshold);
    let dealer = sharks.dealer(secret);

    let mut out = BTreeMap::new();
    for share in dealer.take(shares as usize) {
        let raw = Vec::from(&share);
        let (index, body) = raw
            .split_first()
            .ok_or_else(|| Error::Crypto("dealer produced an empty share".into()))?;
        out.insert(*index, body.to_vec());
    }
    Ok(out)
}

/// Recombine shares (any `threshold`-sized subset) into the secret
pub fn combine_key(threshold: u8, collected: &BTreeMap<u8, Vec<u8>>) -> Result<Vec<u8>> {
    let shares: Vec<Share> = collected
        .iter()
        .map(|(index, body)| {
            let mut raw = Vec::with_capacity(1 + body.len());
            raw.push(*index);
            raw.extend_from_slice(body);
            Share::try_from(raw.as_slice())
                .map_err(|e| Error::Crypto(format!("malformed share {}: {}", index, e)))
        })
        .collect::<Result<_>>()?;

    Sharks(threshold)
        .recover(&shares)
        .map_err(|e| Error::InsufficientShares(e.to_string()))
}

/// Fixed-width view of a recombined key
pub fn key_from_slice(raw: &[u8]) -> Result<[u8; KEY_BYTES]> {
    raw.try_into()
        .map_err(|_| Error::Crypto(format!("expected a {}-byte key, got {}", KEY_BYTES, raw.len())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_round_trip() {
        let key = generate_key();
        let plaintext = b"the quick brown fox";
        let ciphertext = encrypt(&key, plaintext);

        assert_eq!(ciphertext.len(), IV_BYTES + plaintext.len());
        assert_ne!(&ciphertext[IV_BYTES..], plaintext.as_slice());
        assert_eq!(decrypt(&key, &ciphertext).unwrap(), plaintext);
    }

    #[test]
    fn fresh_iv_per_encryption() {
        let key = generate_key();
        let a = encrypt(&key, b"same input");
        let b = encrypt(&key, b"same input");
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_scrambles_without_error() {
        let ciphertext = encrypt(&generate_key(), b"secret");
        let out = decrypt(&generate_key(), &ciphertext).unwrap();
        assert_ne!(out, b"secret");
    }

    #[test]
    fn truncated_ciphertext_rejected() {
        let key = generate_key();
        assert!(matches!(decrypt(&key, &[0u8; 7]), Err(Error::Crypto(_))));
    }

    #[test]
    fn shamir_round_trip_with_any_threshold_subset() {
        let secret = generate_key();
        let shares = split_key(5, 3, &secret).unwrap();
        assert_eq!(shares.len(), 5);
        assert!(shares.keys().all(|&i| (1..=5).contains(&i)));

        for subset_indices in [[1u8, 2, 3], [1, 3, 5], [2, 4, 5], [3, 4, 5]] {
            let subset: BTreeMap<u8, Vec<u8>> = subset_indices
                .iter()
                .map(|i| (*i, shares[i].clone()))
                .collect();
            assert_eq!(combine_key(3, &subset).unwrap(), secret.to_vec());
        }
    }

    #[test]
    fn too_few_shares_fail_to_combine() {
        let secret = generate_key();
        let shares = split_key(5, 3, &secret).unwrap();
        let subset: BTreeMap<u8, Vec<u8>> =
            shares.into_iter().take(2).collect();
        assert!(matches!(
            combine_key(3, &subset),
            Err(Error::InsufficientShares(_))
        ));
    }

    #[test]
    fn split_validates_threshold() {
        let secret = generate_key();
        assert!(split_key(3, 5, &secret).is_err());
        assert!(split_key(5, 0, &secret).is_err());
    }
}
