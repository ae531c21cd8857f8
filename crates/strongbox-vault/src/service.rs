//! Vault lifecycle: setup, unlock, lock, passphrase change, payload encryption.

use crate::config::VaultConfig;
use crate::context::{AuthContext, UserId};
use crate::error::{Result, StoreError, VaultError};
use crate::record::{VaultRecord, KEY_VERSION};
use crate::storage::{RecordStore, VaultStore};
use serde::de::DeserializeOwned;
use serde::Serialize;
use strongbox_crypto::envelope::{self, OpeningKeys};
use strongbox_crypto::{aead, kdf, wrap, CryptoError, EncryptedEnvelope, KeyPair, SymmetricKey};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultState {
    /// No vault row exists for the user.
    NoVault,
    /// Only a legacy salt row exists; see [`VaultService::upgrade_legacy_vault`].
    Legacy,
    /// A vault exists but this service holds no key material for it.
    Locked,
    Unlocked,
}

/// Key material held for the duration of one unlocked session.
struct UnlockedSession {
    user: UserId,
    keypair: KeyPair,
    /// Passphrase-derived key; opens legacy version-1 envelopes.
    legacy_key: SymmetricKey,
}

/// Owns the in-memory keypair and mediates every encrypt/decrypt call.
///
/// Not reentrant: callers serialize concurrent unlock attempts. There is no
/// recovery path for a lost passphrase.
pub struct VaultService<S> {
    store: S,
    config: VaultConfig,
    session: Option<UnlockedSession>,
}

impl<S: VaultStore> VaultService<S> {
    pub fn new(store: S) -> Self {
        Self::with_config(store, VaultConfig::default())
    }

    pub fn with_config(store: S, config: VaultConfig) -> Self {
        Self {
            store,
            config,
            session: None,
        }
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn is_unlocked(&self) -> bool {
        self.session.is_some()
    }

    pub fn unlocked_user(&self) -> Option<&UserId> {
        self.session.as_ref().map(|s| &s.user)
    }

    pub fn state(&self, ctx: &AuthContext) -> Result<VaultState> {
        let user = ctx.user_id()?;
        if self.unlocked_user() == Some(user) {
            return Ok(VaultState::Unlocked);
        }
        match self.store.load_vault(user)? {
            Some(record) if record.is_legacy() => Ok(VaultState::Legacy),
            Some(_) => Ok(VaultState::Locked),
            None => Ok(VaultState::NoVault),
        }
    }

    /// Create the user's vault and leave it unlocked.
    ///
    /// Generates the keypair, wraps the private key under a key derived from
    /// `passphrase` and a fresh salt, and persists everything in one insert.
    /// If the insert fails nothing is stored and the service stays locked.
    pub fn setup_vault(&mut self, ctx: &AuthContext, passphrase: &str) -> Result<()> {
        let user = ctx.user_id()?;
        self.config.check_passphrase(passphrase)?;

        if let Some(existing) = self.store.load_vault(user)? {
            if existing.is_legacy() {
                return Err(VaultError::LegacyVault);
            }
            return Err(VaultError::VaultExists);
        }

        let keypair = KeyPair::generate()?;
        let salt = kdf::generate_salt();
        let wrapping_key = kdf::derive(passphrase, &salt);
        let wrapped = wrap::wrap(keypair.private_key(), &wrapping_key)?;
        let record = VaultRecord::new(user.clone(), &salt, keypair.public_key(), &wrapped)?;

        match self.store.insert_vault(&record) {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => return Err(VaultError::VaultExists),
            Err(e) => {
                warn!(user = %user, error = %e, "vault setup could not be persisted");
                return Err(e.into());
            }
        }

        self.session = Some(UnlockedSession {
            user: user.clone(),
            keypair,
            legacy_key: wrapping_key,
        });
        info!(user = %user, key_version = KEY_VERSION, "vault created");
        Ok(())
    }

    /// Re-derive the wrapping key from the stored salt and unwrap the private key.
    ///
    /// Any previous session is discarded first, so a failed attempt always
    /// leaves the service locked.
    pub fn unlock_vault(&mut self, ctx: &AuthContext, passphrase: &str) -> Result<()> {
        self.session = None;
        let user = ctx.user_id()?;

        let record = self
            .store
            .load_vault(user)?
            .ok_or(VaultError::VaultNotFound)?;

        let (keypair, legacy_key) = open_record(&record, passphrase).map_err(|e| {
            if matches!(e, VaultError::InvalidPassphrase) {
                warn!(user = %user, "vault unlock rejected");
            }
            e
        })?;

        self.session = Some(UnlockedSession {
            user: user.clone(),
            keypair,
            legacy_key,
        });
        info!(user = %user, "vault unlocked");
        Ok(())
    }

    /// Give a legacy salt-only vault its keypair and leave it unlocked.
    ///
    /// The stored salt is kept, so `passphrase` still derives the key that
    /// sealed the user's version-1 records and the session can open them for
    /// migration. When `records` holds a version-1 record the passphrase must
    /// open it; otherwise nothing is written and `InvalidPassphrase` is returned.
    pub fn upgrade_legacy_vault<R: RecordStore + ?Sized>(
        &mut self,
        ctx: &AuthContext,
        records: &R,
        passphrase: &str,
    ) -> Result<()> {
        self.session = None;
        let user = ctx.user_id()?;

        let legacy = self
            .store
            .load_vault(user)?
            .ok_or(VaultError::VaultNotFound)?;
        if !legacy.is_legacy() {
            return Err(VaultError::VaultExists);
        }

        let salt = legacy.salt()?;
        let legacy_key = kdf::derive(passphrase, &salt);

        let sample = records
            .records_pending_encryption(user)?
            .into_iter()
            .find_map(|r| match r.decoded_envelope() {
                Ok(Some(sealed @ EncryptedEnvelope::V1 { .. })) => Some(sealed),
                _ => None,
            });
        if let Some(EncryptedEnvelope::V1 { ciphertext, iv }) = sample {
            aead::open(&legacy_key, &ciphertext, &iv).map_err(|e| match e {
                CryptoError::AuthenticationFailed => {
                    warn!(user = %user, "legacy vault upgrade rejected");
                    VaultError::InvalidPassphrase
                }
                other => other.into(),
            })?;
        }

        let keypair = KeyPair::generate()?;
        let wrapped = wrap::wrap(keypair.private_key(), &legacy_key)?;
        let record = VaultRecord::new(user.clone(), &salt, keypair.public_key(), &wrapped)?;
        self.store.upgrade_legacy_vault(&record)?;

        self.session = Some(UnlockedSession {
            user: user.clone(),
            keypair,
            legacy_key,
        });
        info!(user = %user, key_version = KEY_VERSION, "legacy vault upgraded");
        Ok(())
    }

    /// Drop all in-memory key material.
    pub fn lock(&mut self) {
        if let Some(session) = self.session.take() {
            debug!(user = %session.user, "vault locked");
        }
    }

    /// Re-wrap the same private key under a new passphrase and fresh salt.
    ///
    /// The public key and every version-2 envelope stay valid. Version-1
    /// envelopes are bound to the old passphrase, so the change is refused
    /// while `records` still holds any for this user. Leaves the vault unlocked.
    pub fn change_passphrase<R: RecordStore + ?Sized>(
        &mut self,
        ctx: &AuthContext,
        records: &R,
        current: &str,
        new: &str,
    ) -> Result<()> {
        let user = ctx.user_id()?;
        self.config.check_passphrase(new)?;

        let record = self
            .store
            .load_vault(user)?
            .ok_or(VaultError::VaultNotFound)?;
        let (keypair, _) = open_record(&record, current)?;

        let legacy = records
            .records_pending_encryption(user)?
            .iter()
            .filter(|r| r.envelope.is_encrypted)
            .count();
        if legacy > 0 {
            return Err(VaultError::LegacyRecordsPending(legacy));
        }

        let salt = kdf::generate_salt();
        let wrapping_key = kdf::derive(new, &salt);
        let wrapped = wrap::wrap(keypair.private_key(), &wrapping_key)?;

        self.store
            .update_wrapped_key(user, &salt.to_base64(), &wrapped.to_json()?)?;

        self.session = Some(UnlockedSession {
            user: user.clone(),
            keypair,
            legacy_key: wrapping_key,
        });
        info!(user = %user, "vault passphrase changed");
        Ok(())
    }

    /// Seal `payload` as a version-2 envelope for the unlocked vault.
    pub fn encrypt_payload<T: Serialize + ?Sized>(&self, payload: &T) -> Result<EncryptedEnvelope> {
        let session = self.session.as_ref().ok_or(VaultError::VaultLocked)?;
        Ok(envelope::encrypt(session.keypair.public_key(), payload)?)
    }

    /// Seal for the user's stored public key without unlocking. Useful for
    /// writers that must never hold the private key.
    pub fn encrypt_for_user<T: Serialize + ?Sized>(
        &self,
        ctx: &AuthContext,
        payload: &T,
    ) -> Result<EncryptedEnvelope> {
        let user = ctx.user_id()?;
        let record = self
            .store
            .load_vault(user)?
            .ok_or(VaultError::VaultNotFound)?;
        if record.is_legacy() {
            return Err(VaultError::LegacyVault);
        }
        Ok(envelope::encrypt(&record.public_key()?, payload)?)
    }

    /// Open a version-1 or version-2 envelope with the unlocked key material.
    /// Any authentication failure surfaces as `InvalidPassphrase`.
    pub fn decrypt_payload<T: DeserializeOwned>(&self, sealed: &EncryptedEnvelope) -> Result<T> {
        let session = self.session.as_ref().ok_or(VaultError::VaultLocked)?;
        let keys = OpeningKeys {
            private_key: session.keypair.private_key(),
            legacy_key: Some(&session.legacy_key),
        };

        envelope::decrypt(&keys, sealed).map_err(|e| match e {
            CryptoError::AuthenticationFailed => VaultError::InvalidPassphrase,
            other => other.into(),
        })
    }
}

/// Unwrap a stored vault row with `passphrase`. Returns the keypair and the
/// derived key.
fn open_record(record: &VaultRecord, passphrase: &str) -> Result<(KeyPair, SymmetricKey)> {
    if record.is_legacy() {
        return Err(VaultError::LegacyVault);
    }
    if record.key_version != KEY_VERSION {
        return Err(VaultError::UnsupportedKeyVersion(record.key_version));
    }

    let salt = record.salt()?;
    let wrapped = record.wrapped_private_key()?;
    let public_key = record.public_key()?;

    let wrapping_key = kdf::derive(passphrase, &salt);
    let private_key = wrap::unwrap(&wrapped, &wrapping_key).map_err(|e| match e {
        CryptoError::AuthenticationFailed => VaultError::InvalidPassphrase,
        other => other.into(),
    })?;

    let keypair = KeyPair::from_parts(public_key, private_key)?;
    Ok((keypair, wrapping_key))
}
