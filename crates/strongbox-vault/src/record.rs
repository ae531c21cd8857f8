//! Persisted shapes: the per-user vault row and per-record envelope columns.

use crate::context::UserId;
use crate::error::{Result, VaultError};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strongbox_crypto::{EncryptedEnvelope, PublicKey, Salt, WrappedKey};

/// Key scheme written by this version: RSA-OAEP keypair, hybrid v2 envelopes.
pub const KEY_VERSION: u32 = 2;
/// Pre-keypair scheme: only a salt is stored and records are sealed directly
/// with the passphrase-derived key.
pub const LEGACY_KEY_VERSION: u32 = 1;

/// One per user. Everything in here is safe to hand to the server: without the
/// passphrase none of it yields the private key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultRecord {
    pub user_id: UserId,
    /// base64, 16 bytes
    pub password_salt: String,
    /// public JWK
    pub public_key: String,
    /// `{"encryptedKey", "iv"}` JSON, base64 members
    pub encrypted_private_key: String,
    pub key_version: u32,
}

impl VaultRecord {
    pub fn new(
        user_id: UserId,
        salt: &Salt,
        public_key: &PublicKey,
        wrapped: &WrappedKey,
    ) -> Result<Self> {
        Ok(Self {
            user_id,
            password_salt: salt.to_base64(),
            public_key: public_key.to_jwk_string()?,
            encrypted_private_key: wrapped.to_json()?,
            key_version: KEY_VERSION,
        })
    }

    /// Row left behind by the symmetric scheme: salt only, no keypair yet.
    pub fn legacy(user_id: UserId, salt: &Salt) -> Self {
        Self {
            user_id,
            password_salt: salt.to_base64(),
            public_key: String::new(),
            encrypted_private_key: String::new(),
            key_version: LEGACY_KEY_VERSION,
        }
    }

    pub fn is_legacy(&self) -> bool {
        self.key_version == LEGACY_KEY_VERSION
    }

    pub fn salt(&self) -> Result<Salt> {
        Ok(Salt::from_base64(&self.password_salt)?)
    }

    pub fn public_key(&self) -> Result<PublicKey> {
        Ok(PublicKey::from_jwk_str(&self.public_key)?)
    }

    pub fn wrapped_private_key(&self) -> Result<WrappedKey> {
        Ok(WrappedKey::from_json(&self.encrypted_private_key)?)
    }
}

/// Plaintext record fields that go inside an envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SensitiveFieldSet(BTreeMap<String, serde_json::Value>);

impl SensitiveFieldSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.0.iter()
    }

    /// Same field names, every value replaced by `placeholder`.
    pub fn redacted(&self, placeholder: &str) -> Self {
        Self(
            self.0
                .keys()
                .map(|k| (k.clone(), serde_json::Value::String(placeholder.to_string())))
                .collect(),
        )
    }
}

impl FromIterator<(String, serde_json::Value)> for SensitiveFieldSet {
    fn from_iter<I: IntoIterator<Item = (String, serde_json::Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A user's journal entry as the record store sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct SensitiveRecord {
    pub id: String,
    pub user_id: UserId,
    /// Plaintext before sealing, placeholders after.
    pub fields: SensitiveFieldSet,
    pub envelope: EnvelopeColumns,
}

impl SensitiveRecord {
    pub fn plaintext(id: impl Into<String>, user_id: UserId, fields: SensitiveFieldSet) -> Self {
        Self {
            id: id.into(),
            user_id,
            fields,
            envelope: EnvelopeColumns::plaintext(),
        }
    }

    pub fn sealed(
        id: impl Into<String>,
        user_id: UserId,
        redacted: SensitiveFieldSet,
        envelope: &EncryptedEnvelope,
    ) -> Self {
        Self {
            id: id.into(),
            user_id,
            fields: redacted,
            envelope: EnvelopeColumns::from(envelope),
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.envelope.is_encrypted
    }

    pub fn decoded_envelope(&self) -> Result<Option<EncryptedEnvelope>> {
        self.envelope.to_envelope()
    }
}

/// Envelope columns stored alongside a record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeColumns {
    pub is_encrypted: bool,
    pub encrypted_payload: Option<String>,
    /// Version 2 only
    pub wrapped_aes_key: Option<String>,
    pub encryption_iv: Option<String>,
    pub encryption_version: Option<u32>,
}

impl From<&EncryptedEnvelope> for EnvelopeColumns {
    fn from(envelope: &EncryptedEnvelope) -> Self {
        Self {
            is_encrypted: true,
            encrypted_payload: Some(BASE64.encode(envelope.ciphertext())),
            wrapped_aes_key: envelope.wrapped_key().map(|k| BASE64.encode(k)),
            encryption_iv: Some(BASE64.encode(envelope.iv())),
            encryption_version: Some(envelope.version()),
        }
    }
}

impl EnvelopeColumns {
    pub fn plaintext() -> Self {
        Self::default()
    }

    /// `None` for a plaintext row; `MalformedEnvelope` for a row that claims to
    /// be encrypted but is missing or mixing up its parts.
    pub fn to_envelope(&self) -> Result<Option<EncryptedEnvelope>> {
        if !self.is_encrypted {
            return Ok(None);
        }

        let missing = |column: &str| VaultError::MalformedEnvelope(format!("missing {}", column));
        let decode = |column: &str, value: &str| {
            BASE64
                .decode(value)
                .map_err(|e| VaultError::MalformedEnvelope(format!("{}: {}", column, e)))
        };

        let payload = self
            .encrypted_payload
            .as_deref()
            .ok_or_else(|| missing("encrypted_payload"))?;
        let iv = self
            .encryption_iv
            .as_deref()
            .ok_or_else(|| missing("encryption_iv"))?;
        let version = self
            .encryption_version
            .ok_or_else(|| missing("encryption_version"))?;
        let wrapped = self
            .wrapped_aes_key
            .as_deref()
            .map(|k| decode("wrapped_aes_key", k))
            .transpose()?;

        let envelope = EncryptedEnvelope::from_parts(
            version,
            decode("encrypted_payload", payload)?,
            &decode("encryption_iv", iv)?,
            wrapped,
        )?;
        Ok(Some(envelope))
    }
}
