//! The dv1 suite: XChaCha20-Poly1305, keyed BLAKE2b, Ed25519, Argon2id.
//!
//! Ciphertexts bind the suite version string into the AEAD associated
//! data, so a dv1 blob can never be reinterpreted under a future suite
//! even if the key material were identical.

use argon2::{Algorithm, Argon2, Params, Version};
use blake2::digest::consts::{U32, U64};
use blake2::digest::Mac;
use blake2::Blake2bMac;
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;

use crate::envelope::VERSION;
use crate::error::{DvxError, Result};
use crate::primitive::Primitive;

pub const NONCE_LEN: usize = 24;
pub const KEY_LEN: usize = 32;
pub const MAC_KEY_LEN: usize = 64;
pub const SIGNATURE_LEN: usize = 64;
pub const PRIVATE_KEY_LEN: usize = 64;
pub const PUBLIC_KEY_LEN: usize = 32;

/// Argon2id parameters of the dv1 suite.
const ARGON2_TIME_COST: u32 = 1;
const ARGON2_MEMORY_KIB: u32 = 64 * 1024; // 64 MiB
const ARGON2_PARALLELISM: u32 = 4;

type Blake2bMac256 = Blake2bMac<U32>;
type Blake2bMac512 = Blake2bMac<U64>;

/// The dv1 primitive suite. Stateless; safe to share freely.
#[derive(Debug, Clone, Copy, Default)]
pub struct Dv1;

impl Primitive for Dv1 {
    fn kdf512(&self, password: &[u8], salt: &[u8]) -> Result<[u8; 64]> {
        let params = Params::new(
            ARGON2_MEMORY_KIB,
            ARGON2_TIME_COST,
            ARGON2_PARALLELISM,
            Some(64),
        )
        .map_err(|e| DvxError::Crypto(format!("dv1: invalid argon2 params: {}", e)))?;

        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut output = [0u8; 64];
        argon2
            .hash_password_into(password, salt, &mut output)
            .map_err(|e| DvxError::Crypto(format!("dv1: argon2 derivation failed: {}", e)))?;

        Ok(output)
    }

    fn mac256(&self, key: &[u8], message: &[u8]) -> Result<[u8; 32]> {
        if key.len() != MAC_KEY_LEN {
            return Err(DvxError::KeyMaterial(format!(
                "dv1: mac key must be {} bytes long",
                MAC_KEY_LEN
            )));
        }

        let mut mac = <Blake2bMac256 as blake2::digest::KeyInit>::new_from_slice(key)
            .map_err(|e| DvxError::KeyMaterial(format!("dv1: mac key rejected: {}", e)))?;
        mac.update(message);

        let mut tag = [0u8; 32];
        tag.copy_from_slice(&mac.finalize().into_bytes());
        Ok(tag)
    }

    fn mac512(&self, key: &[u8], message: &[u8]) -> Result<[u8; 64]> {
        if key.len() != MAC_KEY_LEN {
            return Err(DvxError::KeyMaterial(format!(
                "dv1: mac key must be {} bytes long",
                MAC_KEY_LEN
            )));
        }

        let mut mac = <Blake2bMac512 as blake2::digest::KeyInit>::new_from_slice(key)
            .map_err(|e| DvxError::KeyMaterial(format!("dv1: mac key rejected: {}", e)))?;
        mac.update(message);

        let mut tag = [0u8; 64];
        tag.copy_from_slice(&mac.finalize().into_bytes());
        Ok(tag)
    }

    fn encrypt(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        if key.len() != KEY_LEN {
            return Err(DvxError::KeyMaterial(format!(
                "dv1: key must be {} bytes long",
                KEY_LEN
            )));
        }

        let cipher = XChaCha20Poly1305::new_from_slice(key)
            .map_err(|e| DvxError::KeyMaterial(format!("dv1: key rejected: {}", e)))?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = XNonce::from_slice(&nonce_bytes);

        // The associated data binds the suite version and the nonce.
        let mut aad = Vec::with_capacity(VERSION.len() + NONCE_LEN);
        aad.extend_from_slice(VERSION.as_bytes());
        aad.extend_from_slice(&nonce_bytes);

        let encrypted = cipher
            .encrypt(
                nonce,
                Payload {
                    msg: data,
                    aad: &aad,
                },
            )
            .map_err(|e| DvxError::Crypto(format!("dv1: seal failed: {}", e)))?;

        let mut out = Vec::with_capacity(NONCE_LEN + encrypted.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&encrypted);
        Ok(out)
    }

    fn decrypt(&self, key: &[u8], cipher: &[u8]) -> Result<Vec<u8>> {
        if key.len() != KEY_LEN {
            return Err(DvxError::KeyMaterial(format!(
                "dv1: key must be {} bytes long",
                KEY_LEN
            )));
        }
        if cipher.len() < NONCE_LEN {
            return Err(DvxError::KeyMaterial(format!(
                "dv1: cipher shorter ({}) than needed for nonce ({})",
                cipher.len(),
                NONCE_LEN
            )));
        }

        let (nonce_bytes, encrypted) = cipher.split_at(NONCE_LEN);
        let nonce = XNonce::from_slice(nonce_bytes);

        let mut aad = Vec::with_capacity(VERSION.len() + NONCE_LEN);
        aad.extend_from_slice(VERSION.as_bytes());
        aad.extend_from_slice(nonce_bytes);

        let aead = XChaCha20Poly1305::new_from_slice(key)
            .map_err(|e| DvxError::KeyMaterial(format!("dv1: key rejected: {}", e)))?;

        aead.decrypt(
            nonce,
            Payload {
                msg: encrypted,
                aad: &aad,
            },
        )
        .map_err(|_| DvxError::Crypto("dv1: open failed".into()))
    }

    fn sign(&self, private_key: &[u8], message: &[u8]) -> Result<[u8; 64]> {
        if private_key.len() != PRIVATE_KEY_LEN {
            return Err(DvxError::KeyMaterial(format!(
                "dv1: private key must be {} bytes long",
                PRIVATE_KEY_LEN
            )));
        }

        let mut seed = [0u8; 32];
        seed.copy_from_slice(&private_key[..32]);
        let signing_key = SigningKey::from_bytes(&seed);

        Ok(signing_key.sign(message).to_bytes())
    }

    fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> Result<bool> {
        if public_key.len() != PUBLIC_KEY_LEN {
            return Err(DvxError::KeyMaterial(format!(
                "dv1: public key must be {} bytes long",
                PUBLIC_KEY_LEN
            )));
        }
        if signature.len() != SIGNATURE_LEN {
            return Err(DvxError::KeyMaterial(format!(
                "dv1: signature must be {} bytes long",
                SIGNATURE_LEN
            )));
        }

        let mut pk = [0u8; 32];
        pk.copy_from_slice(public_key);
        let verifying_key = match VerifyingKey::from_bytes(&pk) {
            Ok(vk) => vk,
            // A 32-byte value that is not a valid curve point cannot have
            // produced a valid signature.
            Err(_) => return Ok(false),
        };

        let mut sig = [0u8; 64];
        sig.copy_from_slice(signature);
        let sig = Signature::from_bytes(&sig);

        Ok(verifying_key.verify(message, &sig).is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn random_key(len: usize) -> Vec<u8> {
        let mut key = vec![0u8; len];
        rand::rngs::OsRng.fill_bytes(&mut key);
        key
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = random_key(32);
        let data = b"some random data";

        let cipher = Dv1.encrypt(&key, data).unwrap();
        assert_ne!(&cipher, data);

        let plain = Dv1.decrypt(&key, &cipher).unwrap();
        assert_eq!(plain, data);
    }

    #[test]
    fn test_encrypt_unique_nonce() {
        let key = random_key(32);

        let a = Dv1.encrypt(&key, b"data").unwrap();
        let b = Dv1.encrypt(&key, b"data").unwrap();
        assert_ne!(a, b);

        assert_eq!(Dv1.decrypt(&key, &a).unwrap(), b"data");
        assert_eq!(Dv1.decrypt(&key, &b).unwrap(), b"data");
    }

    #[test]
    fn test_encrypt_rejects_wrong_key_length() {
        assert!(Dv1.encrypt(&random_key(16), b"data").is_err());
        assert!(Dv1.encrypt(&random_key(64), b"data").is_err());
    }

    #[test]
    fn test_decrypt_wrong_key_fails() {
        let cipher = Dv1.encrypt(&random_key(32), b"secret").unwrap();
        assert!(Dv1.decrypt(&random_key(32), &cipher).is_err());
    }

    #[test]
    fn test_decrypt_tampered_fails() {
        let key = random_key(32);
        let mut cipher = Dv1.encrypt(&key, b"secret").unwrap();
        let last = cipher.len() - 1;
        cipher[last] ^= 0xFF;
        assert!(Dv1.decrypt(&key, &cipher).is_err());
    }

    #[test]
    fn test_decrypt_rejects_short_cipher() {
        let key = random_key(32);
        assert!(Dv1.decrypt(&key, &[0u8; 23]).is_err());
    }

    #[test]
    fn test_mac256_deterministic() {
        let key = random_key(64);

        let tag1 = Dv1.mac256(&key, b"message").unwrap();
        let tag2 = Dv1.mac256(&key, b"message").unwrap();
        assert_eq!(tag1, tag2);

        let other = Dv1.mac256(&key, b"other message").unwrap();
        assert_ne!(tag1, other);
    }

    #[test]
    fn test_mac512_deterministic() {
        let key = random_key(64);

        let tag1 = Dv1.mac512(&key, b"message").unwrap();
        let tag2 = Dv1.mac512(&key, b"message").unwrap();
        assert_eq!(tag1, tag2);
    }

    #[test]
    fn test_mac_rejects_wrong_key_length() {
        assert!(Dv1.mac256(&random_key(32), b"m").is_err());
        assert!(Dv1.mac256(&random_key(65), b"m").is_err());
        assert!(Dv1.mac512(&random_key(32), b"m").is_err());
        assert!(Dv1.mac512(&random_key(63), b"m").is_err());
    }

    #[test]
    fn test_kdf512_deterministic() {
        let k1 = Dv1.kdf512(b"password", b"salt-of-eight-bytes").unwrap();
        let k2 = Dv1.kdf512(b"password", b"salt-of-eight-bytes").unwrap();
        assert_eq!(k1, k2);

        let k3 = Dv1.kdf512(b"password", b"another-salt-value").unwrap();
        assert_ne!(k1, k3);
    }

    #[test]
    fn test_sign_verify_roundtrip() {
        let signing_key = SigningKey::from_bytes(&[0x42u8; 32]);
        let private = signing_key.to_keypair_bytes();

        let sig = Dv1.sign(&private, b"message").unwrap();

        let public = signing_key.verifying_key().to_bytes();
        assert!(Dv1.verify(&public, b"message", &sig).unwrap());
        assert!(!Dv1.verify(&public, b"tampered", &sig).unwrap());
    }

    #[test]
    fn test_verify_corrupted_signature() {
        let signing_key = SigningKey::from_bytes(&[0x42u8; 32]);
        let private = signing_key.to_keypair_bytes();
        let public = signing_key.verifying_key().to_bytes();

        let mut sig = Dv1.sign(&private, b"message").unwrap();
        for i in (0..sig.len()).step_by(10) {
            sig.swap(i, i + 1);
        }
        assert!(!Dv1.verify(&public, b"message", &sig).unwrap());
    }

    #[test]
    fn test_sign_verify_length_guards() {
        assert!(Dv1.sign(&[0u8; 32], b"m").is_err());
        assert!(Dv1.verify(&[0u8; 31], b"m", &[0u8; 64]).is_err());
        assert!(Dv1.verify(&[0u8; 32], b"m", &[0u8; 63]).is_err());
    }
}
