//! The protocol façade.
//!
//! Binds the envelope codec, the primitive suite and the key pools into
//! the public operation set: encrypt/decrypt, sign/verify, MAC and TOTP
//! generation/verification. Encrypt, sign and MAC always use the current
//! suite; decrypt and verify dispatch on the version decoded from the
//! envelope, so content from earlier suites stays readable.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use ed25519_dalek::SigningKey;
use rand::RngCore;
use zeroize::Zeroize;

use crate::envelope::{self, TypePrefix, VERSION};
use crate::error::{DvxError, Result};
use crate::pool::KeyPool;
use crate::primitive::{Dv1, Primitive};
use crate::sensitive::SecretBytes;
use crate::totp::{Algorithm, Totp};

/// The versioned cryptography façade.
///
/// Stateless past construction; safe for concurrent use.
pub struct Protocol {
    keys: HashMap<String, Box<dyn KeyPool>>,
}

impl Protocol {
    /// Create a protocol from key pools per suite version.
    pub fn new(key_pools: HashMap<String, Box<dyn KeyPool>>) -> Self {
        Self { keys: key_pools }
    }

    /// Create a protocol with a single pool registered under the current
    /// version.
    pub fn current(pool: Box<dyn KeyPool>) -> Self {
        let mut keys = HashMap::new();
        keys.insert(VERSION.to_string(), pool);
        Self { keys }
    }

    fn pool(&self, version: &str) -> Result<&dyn KeyPool> {
        self.keys
            .get(version)
            .map(|p| p.as_ref())
            .ok_or_else(|| {
                DvxError::KeyMaterial(format!(
                    "no key pool registered for version {:?}",
                    version
                ))
            })
    }

    /// Normalize a key-ring label to the bytes fed into derivation.
    ///
    /// A label of the form `prefix:suffix` whose suffix decodes as
    /// unpadded standard base64 derives from the decoded bytes, so two
    /// differently prefixed labels over the same bytes intentionally
    /// reach the same key. Anything else derives from the label's own
    /// bytes.
    fn key_ring_to_bytes(key_ring: &str) -> Vec<u8> {
        let Some(idx) = key_ring.find(':') else {
            return key_ring.as_bytes().to_vec();
        };

        match STANDARD_NO_PAD.decode(&key_ring[idx + 1..]) {
            Ok(buf) => buf,
            Err(_) => key_ring.as_bytes().to_vec(),
        }
    }

    /// Derive a secret key for `key_ring` and encrypt `data` with it.
    pub fn encrypt(&self, key_ring: &str, data: &[u8]) -> Result<String> {
        let key = self
            .pool(VERSION)?
            .kdf32(&Self::key_ring_to_bytes(key_ring))?;

        let cipher = Dv1.encrypt(key.as_bytes(), data)?;
        Ok(envelope::encode(TypePrefix::Encrypted, &cipher))
    }

    /// Derive a secret key for `key_ring` and decrypt the envelope with it.
    pub fn decrypt(&self, key_ring: &str, ciphertext: &str) -> Result<Vec<u8>> {
        let (version, cipher) = envelope::decode_expect(ciphertext, TypePrefix::Encrypted)?;

        match version.as_str() {
            "dv1" => {
                let key = self
                    .pool(&version)?
                    .kdf32(&Self::key_ring_to_bytes(key_ring))?;
                Dv1.decrypt(key.as_bytes(), &cipher)
            }
            v => Err(DvxError::Format(format!("unknown version: {:?}", v))),
        }
    }

    fn derive_sign_key(&self, key_ring: &[u8], version: &str) -> Result<SigningKey> {
        match version {
            "dv1" => {
                let seed = self.pool(VERSION)?.kdf32(key_ring)?;
                let mut seed_bytes: [u8; 32] = seed
                    .as_bytes()
                    .try_into()
                    .map_err(|_| DvxError::KeyMaterial("derived seed must be 32 bytes long".into()))?;

                let key = SigningKey::from_bytes(&seed_bytes);
                seed_bytes.zeroize();
                Ok(key)
            }
            v => Err(DvxError::Format(format!("unknown version: {:?}", v))),
        }
    }

    /// Derive a signing key for `key_ring` and return its public
    /// counterpart. Signatures created with [`Protocol::sign`] under the
    /// same key ring verify against it via [`Protocol::verify_pk`].
    pub fn create_sign_key(&self, key_ring: &str) -> Result<[u8; 32]> {
        let key = self.derive_sign_key(&Self::key_ring_to_bytes(key_ring), VERSION)?;
        Ok(key.verifying_key().to_bytes())
    }

    /// Derive a signing key for `key_ring` and sign `message`. Returns the
    /// envelope string together with the raw signature bytes.
    pub fn sign(&self, key_ring: &str, message: &[u8]) -> Result<(String, [u8; 64])> {
        let key = self.derive_sign_key(&Self::key_ring_to_bytes(key_ring), VERSION)?;

        let mut private = key.to_keypair_bytes();
        let signature = Dv1.sign(&private, message)?;
        private.zeroize();

        Ok((envelope::encode(TypePrefix::Signed, &signature), signature))
    }

    /// Derive the signing key for `key_ring` and verify the signature
    /// envelope against its public counterpart.
    pub fn verify(&self, key_ring: &str, message: &[u8], signature: &str) -> Result<bool> {
        let (version, sig) = envelope::decode_expect(signature, TypePrefix::Signed)?;

        match version.as_str() {
            "dv1" => {
                let public = self
                    .derive_sign_key(&Self::key_ring_to_bytes(key_ring), &version)?
                    .verifying_key()
                    .to_bytes();
                Dv1.verify(&public, message, &sig)
            }
            v => Err(DvxError::Format(format!("unknown version: {:?}", v))),
        }
    }

    /// Verify a signature envelope directly against a public key. No key
    /// pool is consulted, so this also works on a protocol constructed
    /// with an empty pool map.
    pub fn verify_pk(&self, public_key: &[u8], message: &[u8], signature: &str) -> Result<bool> {
        let (version, sig) = envelope::decode_expect(signature, TypePrefix::Signed)?;

        match version.as_str() {
            "dv1" => Dv1.verify(public_key, message, &sig),
            v => Err(DvxError::Format(format!("unknown version: {:?}", v))),
        }
    }

    /// Derive a secret key for `key_ring` and compute a MAC tag of
    /// `message` with it.
    pub fn mac(&self, key_ring: &str, message: &[u8]) -> Result<String> {
        let key = self
            .pool(VERSION)?
            .kdf64(&Self::key_ring_to_bytes(key_ring))?;

        let tag = Dv1.mac512(key.as_bytes(), message)?;
        Ok(envelope::encode(TypePrefix::Tagged, &tag))
    }

    fn derive_totp_key(
        &self,
        key_ring: &[u8],
        raw_id: &[u8],
        account_id: &str,
        version: &str,
    ) -> Result<SecretBytes> {
        match version {
            "dv1" => {
                let totp_sk = self.pool(VERSION)?.kdf64(key_ring)?;

                let mut intermediate = Dv1.mac512(totp_sk.as_bytes(), raw_id)?;
                let mut secret = Dv1.mac256(&intermediate, account_id.as_bytes())?;
                intermediate.zeroize();

                let key = SecretBytes::new(secret.to_vec());
                secret.zeroize();
                Ok(key)
            }
            v => Err(DvxError::Format(format!("unknown version: {:?}", v))),
        }
    }

    /// Create a new TOTP credential.
    ///
    /// Generates a random 32-byte selector, encoded into the returned
    /// `id`, and derives the TOTP secret from the key ring, the selector
    /// and `account_id`. Because the account id is mixed into the secret,
    /// swapping stored ids between accounts invalidates their codes; no
    /// extra integrity protection is needed in storage. The id must be
    /// kept by the caller to verify codes later and should not be handed
    /// to the end-user client.
    ///
    /// The returned uri is a Google Authenticator compliant key-uri the
    /// end user can load into an authenticator app. The credential always
    /// uses SHA256 with 6 digits and a 30 second period.
    pub fn generate_totp(
        &self,
        key_ring: &str,
        issuer: &str,
        account_name: &str,
        account_id: &str,
    ) -> Result<(String, String)> {
        let mut raw_id = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut raw_id);
        let id = envelope::encode(TypePrefix::Totp, &raw_id);

        let key = self.derive_totp_key(
            &Self::key_ring_to_bytes(key_ring),
            &raw_id,
            account_id,
            VERSION,
        )?;

        let uri = Totp {
            secret: key.as_bytes().to_vec(),
            algorithm: Algorithm::Sha256,
            digits: 6,
            period: 30,
            issuer: issuer.to_string(),
            account_name: account_name.to_string(),
        }
        .uri();

        Ok((id, uri))
    }

    /// Re-derive the TOTP secret for a stored selector `id` and verify the
    /// candidate code in constant time.
    pub fn verify_totp(
        &self,
        key_ring: &str,
        id: &str,
        account_id: &str,
        code: &str,
    ) -> Result<bool> {
        let (version, raw_id) = envelope::decode_expect(id, TypePrefix::Totp)?;

        let key = self.derive_totp_key(
            &Self::key_ring_to_bytes(key_ring),
            &raw_id,
            account_id,
            &version,
        )?;

        match version.as_str() {
            "dv1" => Totp {
                secret: key.as_bytes().to_vec(),
                algorithm: Algorithm::Sha256,
                digits: 6,
                period: 30,
                issuer: String::new(),
                account_name: String::new(),
            }
            .verify(code),
            v => Err(DvxError::Format(format!("unknown version: {:?}", v))),
        }
    }
}
