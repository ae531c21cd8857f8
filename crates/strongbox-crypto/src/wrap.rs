//! Wrapping of the private key under the passphrase-derived key.

use crate::aead::{self, Iv, IV_SIZE};
use crate::error::{CryptoError, Result};
use crate::kdf::SymmetricKey;
use crate::keypair::PrivateKey;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};

/// AES-GCM-encrypted private JWK as stored in `encrypted_private_key`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WrappedKey {
    pub ciphertext: Vec<u8>,
    pub iv: Iv,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WrappedKeyJson {
    encrypted_key: String,
    iv: String,
}

impl WrappedKey {
    /// `{"encryptedKey": "<base64>", "iv": "<base64>"}`
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(&WrappedKeyJson {
            encrypted_key: BASE64.encode(&self.ciphertext),
            iv: BASE64.encode(self.iv),
        })
        .map_err(|e| CryptoError::Serialization(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let raw: WrappedKeyJson = serde_json::from_str(json)
            .map_err(|e| CryptoError::InvalidKey(format!("wrapped key JSON: {}", e)))?;

        let ciphertext = BASE64
            .decode(&raw.encrypted_key)
            .map_err(|e| CryptoError::InvalidKey(format!("encryptedKey: {}", e)))?;
        let iv_bytes = BASE64
            .decode(&raw.iv)
            .map_err(|e| CryptoError::InvalidKey(format!("iv: {}", e)))?;
        let iv: Iv = iv_bytes
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength {
                expected: IV_SIZE,
                got: iv_bytes.len(),
            })?;

        Ok(Self { ciphertext, iv })
    }
}

/// Encrypt the private key's JWK form under `wrapping_key` with a fresh IV.
pub fn wrap(private_key: &PrivateKey, wrapping_key: &SymmetricKey) -> Result<WrappedKey> {
    let jwk = private_key.to_jwk_bytes()?;
    let sealed = aead::seal(wrapping_key, &jwk)?;

    Ok(WrappedKey {
        ciphertext: sealed.ciphertext,
        iv: sealed.iv,
    })
}

/// Reverse [`wrap`]. A wrong wrapping key (i.e. a wrong passphrase) is only
/// ever reported as `AuthenticationFailed`.
pub fn unwrap(wrapped: &WrappedKey, wrapping_key: &SymmetricKey) -> Result<PrivateKey> {
    let jwk = aead::open(wrapping_key, &wrapped.ciphertext, &wrapped.iv)?;
    PrivateKey::from_jwk_bytes(&jwk)
}
