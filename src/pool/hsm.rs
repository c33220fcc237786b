//! A [`KeyPool`] backed by a PKCS#11 Hardware-Security-Module.
//!
//! The root key is a non-extractable generic secret locked inside the
//! token; derivations are CKM_SHA256_HMAC / CKM_SHA512_HMAC sign
//! operations over the key ring. Tested against SoftHSM2; anything that
//! implements the two HMAC mechanisms should work.

use std::sync::{Mutex, RwLock};

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use cryptoki::context::{CInitializeArgs, Pkcs11};
use cryptoki::error::{Error as CkError, RvError};
use cryptoki::mechanism::{Mechanism, MechanismType};
use cryptoki::object::{Attribute, KeyType, ObjectClass, ObjectHandle};
use cryptoki::session::{Session, UserType};
use cryptoki::slot::Slot;
use cryptoki::types::{AuthPin, Ulong};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{DvxError, Result};
use crate::pool::{KeyPool, ROOT_KEY_LEN};
use crate::sensitive::SecretBytes;

/// Configuration for an HSM-backed pool. Every field is required; there
/// are no implicit defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HsmConfig {
    /// Path to the PKCS#11 module, e.g. `/usr/lib/softhsm/libsofthsm2.so`.
    pub module: String,
    /// Label of the token this pool should use.
    pub token_label: String,
    /// PIN of the user (not the security officer).
    pub user_pin: String,
    /// ID of the root key object.
    pub root_key_id: String,
    /// Label of the root key object.
    pub root_key_label: String,
}

#[derive(Debug)]
struct HsmState {
    ctx: Pkcs11,
    slot: Slot,
    pin: AuthPin,
    // The long-lived session keeps the key object handle valid; all
    // derivations run in their own short-lived sessions.
    key_session: Mutex<Session>,
    key: ObjectHandle,
}

/// A [`KeyPool`] whose root key never leaves a PKCS#11 token.
#[derive(Debug)]
pub struct HsmPool {
    state: RwLock<Option<HsmState>>,
}

impl HsmPool {
    pub fn new(config: &HsmConfig) -> Result<Self> {
        let ctx = Pkcs11::new(&config.module)
            .map_err(|e| DvxError::Hsm(format!("failed to load pkcs11 module: {}", e)))?;
        ctx.initialize(CInitializeArgs::OsThreads)
            .map_err(|e| DvxError::Hsm(format!("failed to initialize pkcs11 context: {}", e)))?;

        let slot = select_slot(&ctx, &config.token_label)?;
        check_mechanism_support(&ctx, slot)?;

        let pin = AuthPin::new(config.user_pin.clone());
        let key_session = open_and_login(&ctx, slot, &pin)?;

        let key = match find_key(&key_session, &config.root_key_label)? {
            Some(handle) => handle,
            None => {
                debug!("no key handle found, generating key");
                generate_key(&key_session, config)?
            }
        };

        Ok(Self {
            state: RwLock::new(Some(HsmState {
                ctx,
                slot,
                pin,
                key_session: Mutex::new(key_session),
                key,
            })),
        })
    }

    fn kdf(&self, key_ring: &[u8], mechanism: Mechanism, key_len: usize) -> Result<SecretBytes> {
        let guard = self
            .state
            .read()
            .map_err(|_| DvxError::Hsm("pool lock poisoned".into()))?;
        let state = guard
            .as_ref()
            .ok_or_else(|| DvxError::Hsm("pool is closed".into()))?;

        let session = open_and_login(&state.ctx, state.slot, &state.pin)?;

        // Signing the key ring with the root key is the derivation; the
        // resulting MAC tag is the derived key.
        let signed = session
            .sign(&mechanism, state.key, key_ring)
            .map_err(|e| DvxError::Hsm(format!("sign failed: {}", e)));
        logout(&session);
        let mac = signed?;

        if mac.len() != key_len {
            return Err(DvxError::KeyMaterial(format!(
                "mac tag has invalid length: {}. Expected {}",
                mac.len(),
                key_len
            )));
        }

        let key = SecretBytes::new(mac);
        info!(
            target: "dvx::keypool::audit",
            key_len,
            key_ring = %STANDARD_NO_PAD.encode(key_ring),
            "loaded key"
        );
        Ok(key)
    }
}

impl KeyPool for HsmPool {
    fn kdf32(&self, key_ring: &[u8]) -> Result<SecretBytes> {
        self.kdf(key_ring, Mechanism::Sha256Hmac, 32)
    }

    fn kdf64(&self, key_ring: &[u8]) -> Result<SecretBytes> {
        self.kdf(key_ring, Mechanism::Sha512Hmac, 64)
    }

    fn close(&self) -> Result<()> {
        let mut guard = self
            .state
            .write()
            .map_err(|_| DvxError::Hsm("pool lock poisoned".into()))?;
        if let Some(state) = guard.take() {
            if let Ok(session) = state.key_session.lock() {
                logout(&session);
            }
            // Dropping the session closes it; dropping the context
            // finalizes the library.
            drop(state);
        }
        Ok(())
    }
}

fn select_slot(ctx: &Pkcs11, token_label: &str) -> Result<Slot> {
    let slots = ctx
        .get_slots_with_token()
        .map_err(|e| DvxError::Hsm(format!("failed to list slots: {}", e)))?;

    let mut selected = None;
    for slot in slots {
        let token = ctx
            .get_token_info(slot)
            .map_err(|e| DvxError::Hsm(format!("failed to get token info: {}", e)))?;
        if token.label() != token_label {
            continue;
        }

        info!(
            label = token_label,
            manufacturer_id = token.manufacturer_id(),
            model = token.model(),
            serial_number = token.serial_number(),
            "found HSM slot"
        );
        selected = Some(slot);
    }

    selected.ok_or_else(|| DvxError::Hsm(format!("slot with label {:?} not found", token_label)))
}

fn check_mechanism_support(ctx: &Pkcs11, slot: Slot) -> Result<()> {
    let supported = ctx
        .get_mechanism_list(slot)
        .map_err(|e| DvxError::Hsm(format!("unable to get mechanism list: {}", e)))?;

    for (mechanism, name) in [
        (MechanismType::SHA256_HMAC, "CKM_SHA256_HMAC"),
        (MechanismType::SHA512_HMAC, "CKM_SHA512_HMAC"),
    ] {
        if !supported.contains(&mechanism) {
            return Err(DvxError::Hsm(format!(
                "mechanism {} not supported by HSM slot",
                name
            )));
        }
    }

    Ok(())
}

fn open_and_login(ctx: &Pkcs11, slot: Slot, pin: &AuthPin) -> Result<Session> {
    let session = ctx
        .open_rw_session(slot)
        .map_err(|e| DvxError::Hsm(format!("failed to open session: {}", e)))?;

    // Logging in is what we wanted; an already-authenticated session is
    // not a failure.
    match session.login(UserType::User, Some(pin)) {
        Ok(()) => {}
        Err(CkError::Pkcs11(RvError::UserAlreadyLoggedIn, _)) => {}
        Err(e) => return Err(DvxError::Hsm(format!("failed to login: {}", e))),
    }

    Ok(session)
}

fn logout(session: &Session) {
    if let Err(e) = session.logout() {
        warn!(error = %e, "logout of session failed");
    }
}

fn find_key(session: &Session, label: &str) -> Result<Option<ObjectHandle>> {
    let handles = session
        .find_objects(&[Attribute::Label(label.as_bytes().to_vec())])
        .map_err(|e| DvxError::Hsm(format!("failed to find objects: {}", e)))?;

    match handles.len() {
        0 => Ok(None),
        1 => {
            debug!("selected key handle");
            Ok(Some(handles[0]))
        }
        n => Err(DvxError::KeyMaterial(format!(
            "invalid amount of object handles returned from find: {}",
            n
        ))),
    }
}

fn generate_key(session: &Session, config: &HsmConfig) -> Result<ObjectHandle> {
    let template = [
        Attribute::Id(config.root_key_id.clone().into_bytes()),
        Attribute::Label(config.root_key_label.clone().into_bytes()),
        Attribute::Class(ObjectClass::SECRET_KEY),
        Attribute::KeyType(KeyType::GENERIC_SECRET),
        Attribute::Token(true),
        Attribute::Sensitive(true),
        Attribute::Extractable(false),
        Attribute::Encrypt(false),
        Attribute::Decrypt(false),
        Attribute::Wrap(false),
        Attribute::Unwrap(false),
        Attribute::Sign(true),
        Attribute::Verify(false),
        Attribute::ValueLen(Ulong::from(ROOT_KEY_LEN as u64)),
    ];

    let handle = session
        .generate_key(&Mechanism::GenericSecretKeyGen, &template)
        .map_err(|e| DvxError::KeyMaterial(format!("failed to generate root key: {}", e)))?;

    debug!("key object handle generated successfully");
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> HsmConfig {
        HsmConfig {
            module: "/nonexistent/pkcs11-module.so".into(),
            token_label: "dvx".into(),
            user_pin: "1234".into(),
            root_key_id: "dvx-root".into(),
            root_key_label: "dvx-root".into(),
        }
    }

    #[test]
    fn test_new_fails_without_module() {
        let err = HsmPool::new(&test_config()).unwrap_err();
        assert!(matches!(err, DvxError::Hsm(_)));
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let config = test_config();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: HsmConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.module, config.module);
        assert_eq!(parsed.token_label, config.token_label);
    }
}
