// ECDSA P-256 signing primitives
//
// Signatures are the fixed 64-byte r || s encoding and public keys the
// 65-byte SEC1 uncompressed point, so neither is ever split by guesswork.

use crate::error::{NodeError, Result};
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;

pub const SIGNATURE_LEN: usize = 64;
pub const PUBLIC_KEY_LEN: usize = 65;
pub const SECRET_KEY_LEN: usize = 32;

/// Generate a fresh private key
pub fn generate_signing_key() -> SigningKey {
    SigningKey::random(&mut OsRng)
}

pub fn signing_key_from_bytes(bytes: &[u8]) -> Result<SigningKey> {
    if bytes.len() != SECRET_KEY_LEN {
        return Err(NodeError::Crypto(format!(
            "Invalid secret key length: expected {}, got {}",
            SECRET_KEY_LEN,
            bytes.len()
        )));
    }
    SigningKey::from_slice(bytes).map_err(|e| NodeError::Crypto(e.to_string()))
}

pub fn signing_key_bytes(key: &SigningKey) -> [u8; SECRET_KEY_LEN] {
    let mut out = [0u8; SECRET_KEY_LEN];
    out.copy_from_slice(&key.to_bytes());
    out
}

/// Uncompressed SEC1 encoding of the key's public point
pub fn public_key_bytes(key: &SigningKey) -> Vec<u8> {
    key.verifying_key().to_encoded_point(false).as_bytes().to_vec()
}

/// Sign `message` (hashed internally with SHA-256)
pub fn sign(key: &SigningKey, message: &[u8]) -> Vec<u8> {
    let signature: Signature = key.sign(message);
    signature.to_bytes().to_vec()
}

/// Verify a fixed-width signature; malformed keys or signatures verify as false
pub fn verify(public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
    if public_key.len() != PUBLIC_KEY_LEN || signature.len() != SIGNATURE_LEN {
        return false;
    }
    let Ok(verifying_key) = VerifyingKey::from_sec1_bytes(public_key) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(signature) else {
        return false;
    };
    verifying_key.verify(message, &signature).is_ok()
}
