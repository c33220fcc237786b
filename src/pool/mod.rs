//! Key pools: on-demand derivation of per-purpose keys from a root secret.
//!
//! A pool never hands out its root; callers only ever see derived 32- or
//! 64-byte keys. Three implementations exist: [`SoftwarePool`] (root held
//! in process memory), [`HsmPool`] (root locked inside a PKCS#11 token)
//! and [`CachedPool`] (a caching layer over either).

mod cached;
mod hsm;

pub use cached::{CachedPool, TearcConfig};
pub use hsm::{HsmConfig, HsmPool};

use std::sync::Mutex;

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use tracing::info;
use zeroize::Zeroize;

use crate::error::{DvxError, Result};
use crate::primitive::Primitive;
use crate::sensitive::SecretBytes;

/// Length of the root key held by a [`SoftwarePool`].
pub const ROOT_KEY_LEN: usize = 64;

/// A key derivation loader.
pub trait KeyPool: Send + Sync {
    /// Derive a 32-byte key for `key_ring`. Equal key rings must always
    /// result in equal keys.
    fn kdf32(&self, key_ring: &[u8]) -> Result<SecretBytes>;

    /// Derive a 64-byte key for `key_ring`. Equal key rings must always
    /// result in equal keys.
    fn kdf64(&self, key_ring: &[u8]) -> Result<SecretBytes>;

    /// Release the pool and zero any retained secrets.
    fn close(&self) -> Result<()>;
}

/// A [`KeyPool`] that uses a primitive suite's MAC constructions as
/// key-derivation functions. The root key serves as MAC key; the key ring
/// is the MAC message.
pub struct SoftwarePool<P: Primitive> {
    primitive: P,
    root: Mutex<Option<SecretBytes>>,
}

impl<P: Primitive> SoftwarePool<P> {
    pub fn new(primitive: P, mut root_key: [u8; ROOT_KEY_LEN]) -> Self {
        let root = SecretBytes::new(root_key.to_vec());
        root_key.zeroize();
        Self {
            primitive,
            root: Mutex::new(Some(root)),
        }
    }

    fn kdf(&self, key_ring: &[u8], key_len: usize) -> Result<SecretBytes> {
        let guard = self
            .root
            .lock()
            .map_err(|_| DvxError::KeyMaterial("key pool lock poisoned".into()))?;
        let root = guard
            .as_ref()
            .ok_or_else(|| DvxError::KeyMaterial("key pool is closed".into()))?;

        let key = match key_len {
            32 => {
                let mut tag = self.primitive.mac256(root.as_bytes(), key_ring)?;
                let key = SecretBytes::new(tag.to_vec());
                tag.zeroize();
                key
            }
            _ => {
                let mut tag = self.primitive.mac512(root.as_bytes(), key_ring)?;
                let key = SecretBytes::new(tag.to_vec());
                tag.zeroize();
                key
            }
        };

        info!(
            target: "dvx::keypool::audit",
            key_len = key.len(),
            key_ring = %STANDARD_NO_PAD.encode(key_ring),
            "loaded key"
        );
        Ok(key)
    }
}

impl<P: Primitive> KeyPool for SoftwarePool<P> {
    fn kdf32(&self, key_ring: &[u8]) -> Result<SecretBytes> {
        self.kdf(key_ring, 32)
    }

    fn kdf64(&self, key_ring: &[u8]) -> Result<SecretBytes> {
        self.kdf(key_ring, 64)
    }

    fn close(&self) -> Result<()> {
        let mut guard = self
            .root
            .lock()
            .map_err(|_| DvxError::KeyMaterial("key pool lock poisoned".into()))?;
        // Dropping the buffer zeroizes it.
        guard.take();
        Ok(())
    }
}
