// Base58Check addresses

use crate::core::{double_sha256, PubKeyHash};
use crate::error::{NodeError, Result};
use serde::{Deserialize, Serialize};

/// Version byte prefixed to the public key hash
pub const ADDRESS_VERSION: u8 = 0x00;
/// Length of the checksum suffix
pub const CHECKSUM_LEN: usize = 4;

/// Base58Check(version || pubkey hash || checksum)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address(pub String);

impl Address {
    /// Create address from public key hash
    pub fn from_pubkey_hash(hash: &PubKeyHash) -> Self {
        let mut payload = Vec::with_capacity(1 + hash.len() + CHECKSUM_LEN);
        payload.push(ADDRESS_VERSION);
        payload.extend_from_slice(hash);
        let checksum = checksum(&payload);
        payload.extend_from_slice(&checksum);

        Self(bs58::encode(payload).into_string())
    }

    /// Parse and validate an address string
    pub fn parse(s: &str) -> Result<Self> {
        let address = Self(s.to_string());
        address.to_pubkey_hash()?;
        Ok(address)
    }

    /// Whether `s` decodes with the right version, length and checksum
    pub fn validate(s: &str) -> bool {
        Self::parse(s).is_ok()
    }

    /// Get address string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Recover the public key hash, checking version and checksum
    pub fn to_pubkey_hash(&self) -> Result<PubKeyHash> {
        let bytes = bs58::decode(&self.0)
            .into_vec()
            .map_err(|e| NodeError::InvalidAddress(format!("{}: {}", self.0, e)))?;

        if bytes.len() != 1 + 20 + CHECKSUM_LEN {
            return Err(NodeError::InvalidAddress(format!(
                "{}: decoded length {}",
                self.0,
                bytes.len()
            )));
        }

        let (payload, actual) = bytes.split_at(bytes.len() - CHECKSUM_LEN);
        if payload[0] != ADDRESS_VERSION {
            return Err(NodeError::InvalidAddress(format!("{}: unknown version {}", self.0, payload[0])));
        }
        if checksum(payload).as_slice() != actual {
            return Err(NodeError::InvalidAddress(format!("{}: checksum mismatch", self.0)));
        }

        let mut hash = [0u8; 20];
        hash.copy_from_slice(&payload[1..]);
        Ok(hash)
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for Address {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn checksum(payload: &[u8]) -> [u8; CHECKSUM_LEN] {
    let digest = double_sha256(payload);
    let mut checksum = [0u8; CHECKSUM_LEN];
    checksum.copy_from_slice(&digest[..CHECKSUM_LEN]);
    checksum
}
