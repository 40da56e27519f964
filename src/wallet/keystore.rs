// Key management

use crate::core::crypto::{generate_signing_key, public_key_bytes, signing_key_bytes, signing_key_from_bytes};
use crate::core::{hash160, PubKeyHash};
use crate::error::{NodeError, Result};
use crate::wallet::Address;
use p256::ecdsa::SigningKey;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Serializable key pair (for storage)
#[derive(Serialize, Deserialize)]
struct SerializableKeyPair {
    /// Hex-encoded 32-byte private scalar
    secret_key: String,
    address: Address,
}

#[derive(Serialize, Deserialize)]
struct SerializableKeystore {
    keys: HashMap<Address, SerializableKeyPair>,
    default_address: Option<Address>,
}

/// Key pair
#[derive(Clone)]
pub struct KeyPair {
    pub signing_key: SigningKey,
    pub address: Address,
}

impl KeyPair {
    /// Generate a new key pair
    pub fn generate() -> Self {
        Self::from_signing_key(generate_signing_key())
    }

    /// Create from secret key bytes
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(Self::from_signing_key(signing_key_from_bytes(bytes)?))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let address = Address::from_pubkey_hash(&hash160(&public_key_bytes(&signing_key)));
        Self {
            signing_key,
            address,
        }
    }

    fn to_serializable(&self) -> SerializableKeyPair {
        SerializableKeyPair {
            secret_key: hex::encode(signing_key_bytes(&self.signing_key)),
            address: self.address.clone(),
        }
    }

    /// Uncompressed public key bytes
    pub fn pubkey_bytes(&self) -> Vec<u8> {
        public_key_bytes(&self.signing_key)
    }

    pub fn pubkey_hash(&self) -> PubKeyHash {
        hash160(&self.pubkey_bytes())
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("KeyPair").field("address", &self.address).finish_non_exhaustive()
    }
}

/// Keystore - manages multiple key pairs
#[derive(Debug, Default)]
pub struct Keystore {
    keys: HashMap<Address, KeyPair>,
    default_address: Option<Address>,
}

impl Keystore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the keystore at `path`, or start an empty one if the file does not exist
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            log::debug!("Loading keystore from {}", path.as_ref().display());
            Self::load(path)
        } else {
            Ok(Self::new())
        }
    }

    /// Generate a new address
    pub fn new_address(&mut self) -> Address {
        let keypair = KeyPair::generate();
        let address = keypair.address.clone();

        // Set as default if first address
        if self.default_address.is_none() {
            self.default_address = Some(address.clone());
        }

        self.keys.insert(address.clone(), keypair);
        address
    }

    pub fn get_keypair(&self, address: &Address) -> Option<&KeyPair> {
        self.keys.get(address)
    }

    /// Key pair for `address`, or a wallet error naming it
    pub fn require_keypair(&self, address: &Address) -> Result<&KeyPair> {
        self.get_keypair(address)
            .ok_or_else(|| NodeError::Wallet(format!("Address {} not found in keystore", address)))
    }

    /// All addresses, sorted
    pub fn list_addresses(&self) -> Vec<Address> {
        let mut addresses: Vec<Address> = self.keys.keys().cloned().collect();
        addresses.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        addresses
    }

    pub fn default_address(&self) -> Option<&Address> {
        self.default_address.as_ref()
    }

    /// Save keystore to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let data = SerializableKeystore {
            keys: self
                .keys
                .iter()
                .map(|(addr, kp)| (addr.clone(), kp.to_serializable()))
                .collect(),
            default_address: self.default_address.clone(),
        };

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(&data)?)?;
        Ok(())
    }

    /// Load keystore from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        let data: SerializableKeystore = serde_json::from_str(&json)?;

        let mut keys = HashMap::new();
        for (addr, stored) in data.keys {
            let secret = hex::decode(&stored.secret_key)
                .map_err(|e| NodeError::Wallet(format!("Corrupt key for {}: {}", addr, e)))?;
            let kp = KeyPair::from_secret_bytes(&secret)?;
            if kp.address != addr {
                return Err(NodeError::Wallet(format!("Key does not match address {}", addr)));
            }
            keys.insert(addr, kp);
        }

        Ok(Self {
            keys,
            default_address: data.default_address,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::crypto::PUBLIC_KEY_LEN;

    #[test]
    fn test_keypair_generation() {
        let kp = KeyPair::generate();

        assert_eq!(kp.pubkey_bytes().len(), PUBLIC_KEY_LEN);
        assert_eq!(kp.address.to_pubkey_hash().unwrap(), kp.pubkey_hash());
        assert!(Address::validate(kp.address.as_str()));
    }

    #[test]
    fn test_keystore() {
        let mut ks = Keystore::new();

        assert_eq!(ks.list_addresses().len(), 0);
        assert!(ks.default_address().is_none());

        let addr1 = ks.new_address();
        assert_eq!(ks.list_addresses().len(), 1);
        assert_eq!(ks.default_address(), Some(&addr1));

        let addr2 = ks.new_address();
        assert_eq!(ks.list_addresses().len(), 2);
        assert_eq!(ks.default_address(), Some(&addr1));

        assert!(ks.get_keypair(&addr1).is_some());
        assert!(ks.get_keypair(&addr2).is_some());
        assert_eq!(ks.list_addresses().len(), 2);

        let stranger = Address::from_pubkey_hash(&[7u8; 20]);
        assert!(matches!(ks.require_keypair(&stranger), Err(NodeError::Wallet(_))));
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir()
            .join(format!("hashchain-wallet-{}", rand::random::<u64>()))
            .join("wallet.json");

        let mut ks = Keystore::new();
        let addr = ks.new_address();
        ks.new_address();
        ks.save(&path).unwrap();

        let loaded = Keystore::open(&path).unwrap();
        assert_eq!(loaded.list_addresses(), ks.list_addresses());
        assert_eq!(loaded.default_address(), Some(&addr));
        assert_eq!(
            loaded.get_keypair(&addr).unwrap().pubkey_bytes(),
            ks.get_keypair(&addr).unwrap().pubkey_bytes()
        );

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_open_missing_file() {
        let path = std::env::temp_dir().join(format!("hashchain-missing-{}.json", rand::random::<u64>()));
        assert_eq!(Keystore::open(&path).unwrap().list_addresses().len(), 0);
    }
}
