//! Ballot encryption, integrity hashing and receipt generation.
//!
//! Ballots are sealed with AES-256-GCM under a single process-wide key. Each call
//! to `encrypt` draws a fresh 96-bit nonce, so identical ballots never produce
//! identical ciphertexts. The integrity hash is independent of the key: anyone
//! holding the public fields of a ballot and a claimed selection can recompute it.

use crate::*;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce, Tag};
use chrono::{DateTime, SecondsFormat, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

pub const KEY_LENGTH: usize = 32;
const NONCE_LENGTH: usize = 12;
const TAG_LENGTH: usize = 16;
const RECEIPT_ID_LENGTH: usize = 16;

/// An encrypted ballot payload and everything needed to decrypt it, except the key
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CipherBundle {
    #[serde(with = "hex")]
    pub nonce: Vec<u8>,

    #[serde(with = "hex")]
    pub ciphertext: Vec<u8>,

    #[serde(with = "hex")]
    pub tag: Vec<u8>,
}

/// Symmetric cipher for ballot payloads.
///
/// Cheap to clone. Created once at startup and never mutated.
#[derive(Clone)]
pub struct BallotCipher {
    aead: Aes256Gcm,
}

impl std::fmt::Debug for BallotCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("BallotCipher { .. }")
    }
}

impl BallotCipher {
    /// Create a cipher from a raw 32 byte key
    pub fn new(key: &[u8]) -> Result<Self, CipherError> {
        if key.len() != KEY_LENGTH {
            return Err(CipherError::InvalidKey);
        }
        let aead = Aes256Gcm::new_from_slice(key).map_err(|_| CipherError::InvalidKey)?;
        Ok(BallotCipher { aead })
    }

    /// Create a cipher from a hex encoded 32 byte key
    pub fn from_hex(key: &str) -> Result<Self, CipherError> {
        let bytes = hex::decode(key.trim()).map_err(|_| CipherError::InvalidKey)?;
        Self::new(&bytes)
    }

    /// Generate a fresh random key, suitable for `BallotCipher::new`
    pub fn generate_key() -> [u8; KEY_LENGTH] {
        let mut key = [0u8; KEY_LENGTH];
        OsRng.fill_bytes(&mut key);
        key
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<CipherBundle, CipherError> {
        let mut nonce = [0u8; NONCE_LENGTH];
        OsRng.fill_bytes(&mut nonce);

        let mut buffer = plaintext.to_vec();
        let tag = self
            .aead
            .encrypt_in_place_detached(Nonce::from_slice(&nonce), b"", &mut buffer)
            .map_err(|_| CipherError::Malformed("plaintext too long"))?;

        Ok(CipherBundle {
            nonce: nonce.to_vec(),
            ciphertext: buffer,
            tag: tag.to_vec(),
        })
    }

    pub fn decrypt(&self, bundle: &CipherBundle) -> Result<Vec<u8>, CipherError> {
        if bundle.nonce.len() != NONCE_LENGTH {
            return Err(CipherError::Malformed("wrong nonce length"));
        }
        if bundle.tag.len() != TAG_LENGTH {
            return Err(CipherError::Malformed("wrong tag length"));
        }

        let mut buffer = bundle.ciphertext.clone();
        self.aead
            .decrypt_in_place_detached(
                Nonce::from_slice(&bundle.nonce),
                b"",
                &mut buffer,
                Tag::from_slice(&bundle.tag),
            )
            .map_err(|_| CipherError::AuthenticationFailed)?;

        Ok(buffer)
    }

    /// Serialize and encrypt a ballot payload
    pub fn seal(&self, payload: &BallotPayload) -> Result<CipherBundle, CipherError> {
        let plaintext = serde_json::to_vec(payload)?;
        self.encrypt(&plaintext)
    }

    /// Decrypt and parse a ballot payload
    pub fn open(&self, bundle: &CipherBundle) -> Result<BallotPayload, CipherError> {
        let plaintext = self.decrypt(bundle)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }
}

/// Sort ascending and drop duplicates
pub fn canonical_options(selected: &[OptionId]) -> Vec<OptionId> {
    let mut options = selected.to_vec();
    options.sort_unstable();
    options.dedup();
    options
}

/// Format a timestamp the way it enters the integrity hash
pub fn canonical_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Tamper-evidence digest over a ballot's logical content.
///
/// SHA-256 of the compact JSON object `{poll_id, voter_id, selected_options,
/// timestamp}`, keys in that order. The option set is canonicalized first, so the
/// digest does not depend on the order in which a client listed its selections.
pub fn integrity_hash(
    poll_id: PollId,
    voter_id: VoterId,
    selected: &[OptionId],
    timestamp: &DateTime<Utc>,
) -> String {
    let canonical = serde_json::json!({
        "poll_id": poll_id,
        "voter_id": voter_id,
        "selected_options": canonical_options(selected),
        "timestamp": canonical_timestamp(timestamp),
    });

    hex::encode(Sha256::digest(canonical.to_string().as_bytes()))
}

/// Random, fixed-length, URL-safe receipt token
pub fn generate_receipt_id() -> String {
    let mut bytes = [0u8; RECEIPT_ID_LENGTH];
    OsRng.fill_bytes(&mut bytes);
    hex::encode_upper(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> BallotCipher {
        BallotCipher::new(&BallotCipher::generate_key()).unwrap()
    }

    #[test]
    fn encrypt_decrypt() {
        let cipher = cipher();
        let plaintext = br#"{"selected_options":[3]}"#;

        let first = cipher.encrypt(plaintext).unwrap();
        let second = cipher.encrypt(plaintext).unwrap();
        assert_ne!(first.nonce, second.nonce);
        assert_ne!(first.ciphertext, second.ciphertext);

        assert_eq!(cipher.decrypt(&first).unwrap(), plaintext.to_vec());
        assert_eq!(cipher.decrypt(&second).unwrap(), plaintext.to_vec());
    }

    #[test]
    fn tampering_is_detected() {
        let cipher = cipher();
        let mut bundle = cipher.encrypt(b"ballot").unwrap();
        bundle.ciphertext[0] ^= 0x01;
        assert!(matches!(
            cipher.decrypt(&bundle),
            Err(CipherError::AuthenticationFailed)
        ));

        let bundle = cipher.encrypt(b"ballot").unwrap();
        let other = BallotCipher::new(&BallotCipher::generate_key()).unwrap();
        assert!(matches!(
            other.decrypt(&bundle),
            Err(CipherError::AuthenticationFailed)
        ));
    }

    #[test]
    fn malformed_bundles() {
        let cipher = cipher();
        let mut bundle = cipher.encrypt(b"ballot").unwrap();
        bundle.nonce.truncate(4);
        assert!(matches!(
            cipher.decrypt(&bundle),
            Err(CipherError::Malformed(_))
        ));

        let mut bundle = cipher.encrypt(b"ballot").unwrap();
        bundle.tag.clear();
        assert!(matches!(
            cipher.decrypt(&bundle),
            Err(CipherError::Malformed(_))
        ));
    }

    #[test]
    fn bad_keys() {
        assert!(matches!(
            BallotCipher::new(&[0u8; 16]),
            Err(CipherError::InvalidKey)
        ));
        assert!(matches!(
            BallotCipher::from_hex("not hex"),
            Err(CipherError::InvalidKey)
        ));
        assert!(BallotCipher::from_hex(&hex::encode([7u8; 32])).is_ok());
        assert_eq!(format!("{:?}", cipher()), "BallotCipher { .. }");
    }

    #[test]
    fn hash_ignores_option_order() {
        let now = Utc::now();
        let a = integrity_hash(1, 2, &[5, 3, 9], &now);
        let b = integrity_hash(1, 2, &[9, 5, 3], &now);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        assert_ne!(a, integrity_hash(1, 2, &[5, 3], &now));
        assert_ne!(a, integrity_hash(1, 3, &[5, 3, 9], &now));
        assert_ne!(a, integrity_hash(2, 2, &[5, 3, 9], &now));
    }

    #[test]
    fn hash_input_is_canonical_json() {
        let ts = DateTime::parse_from_rfc3339("2024-03-01T12:00:00.123456Z")
            .unwrap()
            .with_timezone(&Utc);
        let expected = r#"{"poll_id":1,"voter_id":2,"selected_options":[3,5],"timestamp":"2024-03-01T12:00:00.123Z"}"#;
        assert_eq!(
            integrity_hash(1, 2, &[5, 3, 5], &ts),
            hex::encode(Sha256::digest(expected.as_bytes()))
        );
    }

    #[test]
    fn receipt_ids() {
        let a = generate_receipt_id();
        let b = generate_receipt_id();
        assert_eq!(a.len(), RECEIPT_ID_LENGTH * 2);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
