use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A 256-bit content address.
///
/// This is a *write-id*, not a Merkle hash: the digest is salted with a
/// caller-supplied timestamp so that two `put`s of byte-identical payloads at
/// distinct moments yield distinct hashes. Replays are never deduplicated —
/// see the design notes on "timing salt in blob hashes".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobHash(#[serde(with = "hex::serde")] pub [u8; 32]);

impl BlobHash {
    /// `sha256(time_salt_nanos || key || branch || payload)`.
    pub fn compute(time_salt_nanos: i64, key: &str, branch: &str, payload: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(time_salt_nanos.to_be_bytes());
        hasher.update(key.as_bytes());
        hasher.update(0u8.to_be_bytes()); // field separator, avoids key/branch concatenation ambiguity
        hasher.update(branch.as_bytes());
        hasher.update(0u8.to_be_bytes());
        hasher.update(payload);
        let digest = hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for BlobHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for BlobHash {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}
