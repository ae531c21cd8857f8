//! Per-record hybrid encryption.
//!
//! Version 2 (current): a fresh AES-256 key per record seals the JSON payload
//! with AES-GCM, and RSA-OAEP-SHA256 wraps that key for the vault's public key.
//! RSA never touches the payload itself.
//!
//! Version 1 (legacy, read-mostly): the payload is sealed directly with the
//! passphrase-derived symmetric key. No wrapped key.

use crate::aead::{self, Iv, IV_SIZE};
use crate::error::{CryptoError, Result};
use crate::kdf::SymmetricKey;
use crate::keypair::{PrivateKey, PublicKey};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::rngs::OsRng;
use rsa::Oaep;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

pub const ENVELOPE_V1: u32 = 1;
pub const ENVELOPE_V2: u32 = 2;

/// An encrypted payload. Immutable once written; re-encrypting produces a new one.
///
/// The version is the variant, so a v1 envelope cannot carry a wrapped key and
/// a v2 envelope cannot lack one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "EnvelopeFields", into = "EnvelopeFields")]
pub enum EncryptedEnvelope {
    V1 {
        ciphertext: Vec<u8>,
        iv: Iv,
    },
    V2 {
        ciphertext: Vec<u8>,
        iv: Iv,
        wrapped_key: Vec<u8>,
    },
}

impl EncryptedEnvelope {
    pub fn version(&self) -> u32 {
        match self {
            Self::V1 { .. } => ENVELOPE_V1,
            Self::V2 { .. } => ENVELOPE_V2,
        }
    }

    pub fn ciphertext(&self) -> &[u8] {
        match self {
            Self::V1 { ciphertext, .. } | Self::V2 { ciphertext, .. } => ciphertext,
        }
    }

    pub fn iv(&self) -> &Iv {
        match self {
            Self::V1 { iv, .. } | Self::V2 { iv, .. } => iv,
        }
    }

    pub fn wrapped_key(&self) -> Option<&[u8]> {
        match self {
            Self::V1 { .. } => None,
            Self::V2 { wrapped_key, .. } => Some(wrapped_key),
        }
    }

    /// Rebuild an envelope from its stored parts, enforcing the version/key pairing.
    pub fn from_parts(
        version: u32,
        ciphertext: Vec<u8>,
        iv: &[u8],
        wrapped_key: Option<Vec<u8>>,
    ) -> Result<Self> {
        let iv: Iv = iv.try_into().map_err(|_| {
            CryptoError::MalformedEnvelope(format!(
                "iv must be {} bytes, got {}",
                IV_SIZE,
                iv.len()
            ))
        })?;

        match (version, wrapped_key) {
            (ENVELOPE_V1, None) => Ok(Self::V1 { ciphertext, iv }),
            (ENVELOPE_V1, Some(_)) => Err(CryptoError::MalformedEnvelope(
                "version 1 envelope carries a wrapped key".to_string(),
            )),
            (ENVELOPE_V2, Some(wrapped_key)) if !wrapped_key.is_empty() => Ok(Self::V2 {
                ciphertext,
                iv,
                wrapped_key,
            }),
            (ENVELOPE_V2, _) => Err(CryptoError::MalformedEnvelope(
                "version 2 envelope is missing its wrapped key".to_string(),
            )),
            (other, _) => Err(CryptoError::UnsupportedVersion(other)),
        }
    }
}

/// Portable JSON form: `{ciphertext, iv, wrappedEphemeralKey?, version}`, base64 fields.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnvelopeFields {
    ciphertext: String,
    iv: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    wrapped_ephemeral_key: Option<String>,
    version: u32,
}

impl From<EncryptedEnvelope> for EnvelopeFields {
    fn from(envelope: EncryptedEnvelope) -> Self {
        Self {
            ciphertext: BASE64.encode(envelope.ciphertext()),
            iv: BASE64.encode(envelope.iv()),
            wrapped_ephemeral_key: envelope.wrapped_key().map(|k| BASE64.encode(k)),
            version: envelope.version(),
        }
    }
}

impl TryFrom<EnvelopeFields> for EncryptedEnvelope {
    type Error = CryptoError;

    fn try_from(fields: EnvelopeFields) -> Result<Self> {
        let decode = |name: &str, value: &str| {
            BASE64
                .decode(value)
                .map_err(|e| CryptoError::MalformedEnvelope(format!("{}: {}", name, e)))
        };

        let ciphertext = decode("ciphertext", &fields.ciphertext)?;
        let iv = decode("iv", &fields.iv)?;
        let wrapped_key = fields
            .wrapped_ephemeral_key
            .as_deref()
            .map(|k| decode("wrappedEphemeralKey", k))
            .transpose()?;

        Self::from_parts(fields.version, ciphertext, &iv, wrapped_key)
    }
}

/// Key material able to open envelopes for one vault.
///
/// `legacy_key` is only needed for version-1 envelopes.
pub struct OpeningKeys<'a> {
    pub private_key: &'a PrivateKey,
    pub legacy_key: Option<&'a SymmetricKey>,
}

fn oaep() -> Oaep {
    Oaep::new::<Sha256>()
}

/// Seal `payload` for `recipient` as a version-2 envelope.
pub fn encrypt<T: Serialize + ?Sized>(
    recipient: &PublicKey,
    payload: &T,
) -> Result<EncryptedEnvelope> {
    let plaintext = Zeroizing::new(
        serde_json::to_vec(payload).map_err(|e| CryptoError::Serialization(e.to_string()))?,
    );

    let ephemeral = SymmetricKey::generate();
    let sealed = aead::seal(&ephemeral, &plaintext)?;

    let wrapped_key = recipient
        .rsa()
        .encrypt(&mut OsRng, oaep(), ephemeral.as_bytes())
        .map_err(|e| CryptoError::Encryption(format!("RSA-OAEP wrap failed: {}", e)))?;

    Ok(EncryptedEnvelope::V2 {
        ciphertext: sealed.ciphertext,
        iv: sealed.iv,
        wrapped_key,
    })
}

/// Seal `payload` in the legacy version-1 format. Kept for interop and
/// fixtures; new data always goes through [`encrypt`].
pub fn encrypt_legacy<T: Serialize + ?Sized>(
    key: &SymmetricKey,
    payload: &T,
) -> Result<EncryptedEnvelope> {
    let plaintext = Zeroizing::new(
        serde_json::to_vec(payload).map_err(|e| CryptoError::Serialization(e.to_string()))?,
    );
    let sealed = aead::seal(key, &plaintext)?;

    Ok(EncryptedEnvelope::V1 {
        ciphertext: sealed.ciphertext,
        iv: sealed.iv,
    })
}

/// Open an envelope to its raw JSON bytes.
///
/// Every failure to authenticate (wrong key, flipped bit in any part of the
/// envelope) is `AuthenticationFailed`; nothing partial is returned.
pub fn decrypt_bytes(
    keys: &OpeningKeys<'_>,
    envelope: &EncryptedEnvelope,
) -> Result<Zeroizing<Vec<u8>>> {
    match envelope {
        EncryptedEnvelope::V2 {
            ciphertext,
            iv,
            wrapped_key,
        } => {
            let raw_key = Zeroizing::new(
                keys.private_key
                    .rsa()
                    .decrypt(oaep(), wrapped_key)
                    .map_err(|_| CryptoError::AuthenticationFailed)?,
            );
            let ephemeral =
                SymmetricKey::from_slice(&raw_key).map_err(|_| CryptoError::AuthenticationFailed)?;
            aead::open(&ephemeral, ciphertext, iv)
        }
        EncryptedEnvelope::V1 { ciphertext, iv } => {
            let key = keys.legacy_key.ok_or_else(|| {
                CryptoError::InvalidKey("no legacy key available for version 1 envelope".into())
            })?;
            aead::open(key, ciphertext, iv)
        }
    }
}

/// Open an envelope and deserialize its payload.
pub fn decrypt<T: DeserializeOwned>(
    keys: &OpeningKeys<'_>,
    envelope: &EncryptedEnvelope,
) -> Result<T> {
    let plaintext = decrypt_bytes(keys, envelope)?;
    serde_json::from_slice(&plaintext).map_err(|e| CryptoError::Serialization(e.to_string()))
}
