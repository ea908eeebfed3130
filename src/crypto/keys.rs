//! Account view keys
//!
//! An account's view keypair does double duty in the messaging layer: the
//! ed25519 half signs transport envelopes, and the x25519 half performs the
//! Diffie-Hellman exchange that keys payload encryption. Both halves are
//! derived from the same 32-byte view secret.

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use x25519_dalek::StaticSecret;

use super::{double_hash, Hash};

/// Key and address errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("invalid public key")]
    InvalidPublicKey,
    #[error("invalid address prefix")]
    InvalidAddressPrefix,
    #[error("invalid address encoding")]
    InvalidAddressEncoding,
    #[error("invalid address length")]
    InvalidAddressLength,
    #[error("invalid address checksum")]
    InvalidAddressChecksum,
}

/// 64-byte ed25519 signature over an envelope hash
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(#[serde(with = "sig_serde")] pub [u8; 64]);

mod sig_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; 64], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 64], D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes: Vec<u8> = Deserialize::deserialize(deserializer)?;
        if bytes.len() != 64 {
            return Err(serde::de::Error::custom("Invalid signature length"));
        }
        let mut arr = [0u8; 64];
        arr.copy_from_slice(&bytes);
        Ok(arr)
    }
}

impl Signature {
    /// Create from 64 bytes
    pub fn from_bytes(bytes: &[u8; 64]) -> Self {
        Signature(*bytes)
    }

    /// Export to bytes
    pub fn to_bytes(&self) -> [u8; 64] {
        self.0
    }
}

impl Default for Signature {
    fn default() -> Self {
        Signature([0u8; 64])
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature({})", hex::encode(self.0))
    }
}

/// Secret half of an account's view keypair
#[derive(Clone)]
pub struct ViewSecretKey([u8; 32]);

impl std::fmt::Debug for ViewSecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ViewSecretKey([REDACTED])")
    }
}

impl ViewSecretKey {
    /// Generate a new random view secret
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        ViewSecretKey(bytes)
    }

    /// Create from 32 bytes
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        ViewSecretKey(*bytes)
    }

    /// Export to bytes
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }

    /// Derive the matching public keys
    pub fn public(&self) -> AccountPublicKey {
        let signing = SigningKey::from_bytes(&self.0);
        let exchange = StaticSecret::from(self.0);
        AccountPublicKey {
            verify_key: signing.verifying_key().to_bytes(),
            exchange_key: x25519_dalek::PublicKey::from(&exchange).to_bytes(),
        }
    }

    /// Sign a message hash
    pub fn sign(&self, message: &Hash) -> Signature {
        let signing = SigningKey::from_bytes(&self.0);
        Signature(signing.sign(&message.0).to_bytes())
    }

    /// Diffie-Hellman against a peer's (possibly ephemeral) exchange key
    pub fn shared_secret(&self, peer_exchange_key: &[u8; 32]) -> [u8; 32] {
        let secret = StaticSecret::from(self.0);
        let peer = x25519_dalek::PublicKey::from(*peer_exchange_key);
        secret.diffie_hellman(&peer).to_bytes()
    }
}

/// Public half of an account, as exchanged between coalition members
#[derive(Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccountPublicKey {
    /// ed25519 verifying key for envelope signatures
    pub verify_key: [u8; 32],
    /// x25519 key for payload encryption
    pub exchange_key: [u8; 32],
}

impl AccountPublicKey {
    /// Verify an envelope signature
    pub fn verify(&self, message: &Hash, signature: &Signature) -> bool {
        let verifying_key = match VerifyingKey::from_bytes(&self.verify_key) {
            Ok(vk) => vk,
            Err(_) => return false,
        };
        let sig = ed25519_dalek::Signature::from_bytes(&signature.0);
        verifying_key.verify(&message.0, &sig).is_ok()
    }

    /// Convert to address with checksum
    ///
    /// Address = "OX" + Base58Check(verify_key || exchange_key + checksum[0:4])
    pub fn to_address(&self) -> String {
        let mut payload = Vec::with_capacity(68);
        payload.extend_from_slice(&self.verify_key);
        payload.extend_from_slice(&self.exchange_key);

        let checksum = double_hash(&payload);
        payload.extend_from_slice(&checksum.0[0..4]);

        format!("OX{}", bs58::encode(&payload).into_string())
    }

    /// Decode an OX address back into the public key pair
    pub fn from_address(address: &str) -> Result<Self, KeyError> {
        let encoded = address
            .strip_prefix("OX")
            .ok_or(KeyError::InvalidAddressPrefix)?;
        let decoded = bs58::decode(encoded)
            .into_vec()
            .map_err(|_| KeyError::InvalidAddressEncoding)?;
        if decoded.len() != 68 {
            return Err(KeyError::InvalidAddressLength);
        }

        let expected = double_hash(&decoded[0..64]);
        if decoded[64..68] != expected.0[0..4] {
            return Err(KeyError::InvalidAddressChecksum);
        }

        let mut verify_key = [0u8; 32];
        verify_key.copy_from_slice(&decoded[0..32]);
        let mut exchange_key = [0u8; 32];
        exchange_key.copy_from_slice(&decoded[32..64]);
        Ok(AccountPublicKey {
            verify_key,
            exchange_key,
        })
    }
}

impl std::fmt::Debug for AccountPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AccountPublicKey({})", self.to_address())
    }
}

impl std::fmt::Display for AccountPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_address())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash_bytes;

    #[test]
    fn test_sign_verify() {
        let secret = ViewSecretKey::generate();
        let public = secret.public();

        let message = hash_bytes(b"envelope content");
        let signature = secret.sign(&message);

        assert!(public.verify(&message, &signature));
    }

    #[test]
    fn test_wrong_key_fails() {
        let secret1 = ViewSecretKey::generate();
        let secret2 = ViewSecretKey::generate();

        let message = hash_bytes(b"envelope content");
        let signature = secret1.sign(&message);

        assert!(!secret2.public().verify(&message, &signature));
    }

    #[test]
    fn test_wrong_message_fails() {
        let secret = ViewSecretKey::generate();
        let public = secret.public();

        let signature = secret.sign(&hash_bytes(b"message 1"));
        assert!(!public.verify(&hash_bytes(b"message 2"), &signature));
    }

    #[test]
    fn test_shared_secret_agreement() {
        let alice = ViewSecretKey::generate();
        let bob = ViewSecretKey::generate();

        let ab = alice.shared_secret(&bob.public().exchange_key);
        let ba = bob.shared_secret(&alice.public().exchange_key);
        assert_eq!(ab, ba);
    }

    #[test]
    fn test_secret_roundtrip() {
        let secret = ViewSecretKey::generate();
        let recovered = ViewSecretKey::from_bytes(&secret.to_bytes());
        assert_eq!(secret.public(), recovered.public());
    }

    #[test]
    fn test_address_roundtrip() {
        let public = ViewSecretKey::generate().public();
        let address = public.to_address();

        assert!(address.starts_with("OX"));
        assert_eq!(AccountPublicKey::from_address(&address).unwrap(), public);
    }

    #[test]
    fn test_address_bad_checksum_rejected() {
        let public = ViewSecretKey::generate().public();
        let mut address = public.to_address();
        // Flip the final character to corrupt the checksum
        let last = if address.ends_with('2') { '3' } else { '2' };
        address.pop();
        address.push(last);

        assert!(AccountPublicKey::from_address(&address).is_err());
    }

    #[test]
    fn test_address_bad_prefix_rejected() {
        assert_eq!(
            AccountPublicKey::from_address("RHabcdef"),
            Err(KeyError::InvalidAddressPrefix)
        );
    }
}
