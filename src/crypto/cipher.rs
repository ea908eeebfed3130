//! Payload and store encryption
//!
//! Messages between coalition members are encrypted with a ChaCha20 stream
//! keyed from an ephemeral x25519 exchange against the recipient's view key;
//! the message store file reuses the same stream cipher with a key derived
//! directly from the wallet's view secret. Neither layer authenticates: the
//! transport envelope carries an ed25519 signature over the content hash
//! instead.

use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::ChaCha20;
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use x25519_dalek::EphemeralSecret;

use super::ViewSecretKey;

/// Length of the random per-message / per-write IV
pub const CIPHER_IV_LENGTH: usize = 16;

/// Random IV carried alongside every ciphertext
pub type CipherIv = [u8; CIPHER_IV_LENGTH];

/// Draw a fresh random IV
pub fn random_iv() -> CipherIv {
    let mut iv = [0u8; CIPHER_IV_LENGTH];
    OsRng.fill_bytes(&mut iv);
    iv
}

fn derive_key(input: &[u8], info: &[u8]) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(None, input);
    let mut key = [0u8; 32];
    hk.expand(info, &mut key)
        .expect("32 bytes is a valid HKDF-SHA256 output length");
    key
}

/// XOR `data` with the ChaCha20 keystream for `key` and `iv`
///
/// ChaCha20 takes a 96-bit nonce; the low 12 bytes of the IV form it, the
/// remainder keeps the envelope and file formats stable.
pub fn stream_xor(key: &[u8; 32], iv: &CipherIv, data: &[u8]) -> Vec<u8> {
    let mut cipher = ChaCha20::new(
        chacha20::Key::from_slice(key),
        chacha20::Nonce::from_slice(&iv[..12]),
    );
    let mut buf = data.to_vec();
    cipher.apply_keystream(&mut buf);
    buf
}

/// Encrypt a payload to a recipient's exchange key
///
/// Returns the ciphertext, the ephemeral public key the recipient needs to
/// reverse the exchange, and the IV.
pub fn encrypt_to(recipient_exchange_key: &[u8; 32], plaintext: &[u8]) -> (Vec<u8>, [u8; 32], CipherIv) {
    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = x25519_dalek::PublicKey::from(&ephemeral).to_bytes();

    let peer = x25519_dalek::PublicKey::from(*recipient_exchange_key);
    let shared = ephemeral.diffie_hellman(&peer);

    let key = derive_key(shared.as_bytes(), b"onyx-mms-message");
    let iv = random_iv();
    (stream_xor(&key, &iv, plaintext), ephemeral_public, iv)
}

/// Decrypt a payload encrypted with `encrypt_to`
pub fn decrypt_from(
    view_secret_key: &ViewSecretKey,
    encryption_public_key: &[u8; 32],
    iv: &CipherIv,
    ciphertext: &[u8],
) -> Vec<u8> {
    let shared = view_secret_key.shared_secret(encryption_public_key);
    let key = derive_key(&shared, b"onyx-mms-message");
    stream_xor(&key, iv, ciphertext)
}

/// Derive the message store file key from the wallet's view secret
pub fn derive_store_key(view_secret_key: &ViewSecretKey) -> [u8; 32] {
    derive_key(&view_secret_key.to_bytes(), b"onyx-mms-file")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let recipient = ViewSecretKey::generate();
        let plaintext = b"multisig sync data for round 0".to_vec();

        let (ciphertext, ephemeral_public, iv) =
            encrypt_to(&recipient.public().exchange_key, &plaintext);
        assert_ne!(ciphertext, plaintext);

        let recovered = decrypt_from(&recipient, &ephemeral_public, &iv, &ciphertext);
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn test_wrong_recipient_gets_garbage() {
        let recipient = ViewSecretKey::generate();
        let eavesdropper = ViewSecretKey::generate();
        let plaintext = b"partially signed tx".to_vec();

        let (ciphertext, ephemeral_public, iv) =
            encrypt_to(&recipient.public().exchange_key, &plaintext);
        let garbage = decrypt_from(&eavesdropper, &ephemeral_public, &iv, &ciphertext);
        assert_ne!(garbage, plaintext);
    }

    #[test]
    fn test_fresh_iv_per_message() {
        let recipient = ViewSecretKey::generate();
        let (c1, _, iv1) = encrypt_to(&recipient.public().exchange_key, b"same content");
        let (c2, _, iv2) = encrypt_to(&recipient.public().exchange_key, b"same content");
        assert_ne!(iv1, iv2);
        assert_ne!(c1, c2);
    }

    #[test]
    fn test_stream_xor_is_involutive() {
        let key = [7u8; 32];
        let iv = [9u8; CIPHER_IV_LENGTH];
        let data = b"store snapshot bytes";

        let once = stream_xor(&key, &iv, data);
        let twice = stream_xor(&key, &iv, &once);
        assert_eq!(twice, data);
    }

    #[test]
    fn test_store_key_is_stable() {
        let secret = ViewSecretKey::from_bytes(&[42u8; 32]);
        assert_eq!(derive_store_key(&secret), derive_store_key(&secret));
        let other = ViewSecretKey::from_bytes(&[43u8; 32]);
        assert_ne!(derive_store_key(&secret), derive_store_key(&other));
    }
}
