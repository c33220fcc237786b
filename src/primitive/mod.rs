//! Low-level cryptographic suites.
//!
//! A [`Primitive`] is a frozen set of algorithms invoked through a uniform
//! interface. The protocol layer only ever talks to this trait, so a
//! future suite can be added next to [`Dv1`] without touching the
//! envelope or the façade.

mod dv1;

pub use dv1::Dv1;

use crate::error::Result;

/// A low-level cryptographic contract.
///
/// Implementations are stateless; all key material is passed per call.
pub trait Primitive: Send + Sync {
    /// Derive a 64-byte key from a password and salt.
    fn kdf512(&self, password: &[u8], salt: &[u8]) -> Result<[u8; 64]>;

    /// Compute a 32-byte MAC tag. The key must be exactly 64 bytes.
    fn mac256(&self, key: &[u8], message: &[u8]) -> Result<[u8; 32]>;

    /// Compute a 64-byte MAC tag. The key must be exactly 64 bytes.
    fn mac512(&self, key: &[u8], message: &[u8]) -> Result<[u8; 64]>;

    /// Encrypt `data` under a 32-byte key. The returned blob carries the
    /// nonce as its prefix.
    fn encrypt(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>>;

    /// Decrypt a blob produced by [`Primitive::encrypt`].
    fn decrypt(&self, key: &[u8], cipher: &[u8]) -> Result<Vec<u8>>;

    /// Sign a message with a 64-byte private key (`seed ‖ public`).
    fn sign(&self, private_key: &[u8], message: &[u8]) -> Result<[u8; 64]>;

    /// Verify a 64-byte signature against a 32-byte public key.
    fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> Result<bool>;
}
