//! dvx — a versioned cryptography toolkit that derives every key it uses
//! on demand from a single root secret.
//!
//! Four operation categories are exposed through the [`Protocol`] façade:
//! encryption/decryption, signing/verifying, MAC, and as a higher-order
//! algorithm TOTP creation/verification. No key storage is needed: the
//! root secret either lives inside a hardware security module (PKCS#11)
//! or is held in protected process memory, and everything else is derived
//! from it per call. Every output is wrapped in a version-tagged envelope
//! so future primitive suites can be introduced without breaking
//! verification or decryption of existing content.

pub mod envelope;
pub mod error;
pub mod pool;
pub mod primitive;
pub mod protocol;
pub mod sensitive;
pub mod tearc;
pub mod totp;

pub use envelope::{TypePrefix, VERSION};
pub use error::{DvxError, Result};
pub use pool::{CachedPool, HsmConfig, HsmPool, KeyPool, SoftwarePool, TearcConfig};
pub use primitive::{Dv1, Primitive};
pub use protocol::Protocol;
pub use sensitive::SecretBytes;
