//! Passphrase → symmetric key derivation (PBKDF2-HMAC-SHA256).

use crate::error::{CryptoError, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use pbkdf2::pbkdf2_hmac;
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use zeroize::Zeroizing;

pub const PBKDF2_ITERATIONS: u32 = 100_000;
pub const SALT_SIZE: usize = 16;
pub const KEY_SIZE: usize = 32;

/// Random per-vault salt. Public; stored next to the wrapped private key.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Salt([u8; SALT_SIZE]);

impl Salt {
    pub fn generate() -> Self {
        let mut bytes = [0u8; SALT_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; SALT_SIZE] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: SALT_SIZE,
                    got: bytes.len(),
                })?;
        Ok(Self(bytes))
    }

    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = BASE64
            .decode(encoded)
            .map_err(|e| CryptoError::InvalidKey(format!("salt is not base64: {}", e)))?;
        Self::from_slice(&bytes)
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; SALT_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for Salt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Salt").field(&self.to_base64()).finish()
    }
}

/// 256-bit AES key. Used to wrap the private key and, for legacy version-1
/// envelopes, to encrypt payloads directly.
#[derive(Clone)]
pub struct SymmetricKey(Zeroizing<[u8; KEY_SIZE]>);

impl SymmetricKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; KEY_SIZE] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: KEY_SIZE,
                    got: bytes.len(),
                })?;
        Ok(Self::from_bytes(bytes))
    }

    /// Fresh random key, used as the single-use ephemeral key of a v2 envelope.
    pub fn generate() -> Self {
        let mut bytes = Zeroizing::new([0u8; KEY_SIZE]);
        OsRng.fill_bytes(bytes.as_mut());
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey(<REDACTED>)")
    }
}

/// Derive the wrapping key for `passphrase` under `salt`.
///
/// Deterministic: the same passphrase and salt always give the same key, so the
/// key itself is never stored. Passphrase strength is not checked here.
pub fn derive(passphrase: &str, salt: &Salt) -> SymmetricKey {
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    pbkdf2_hmac::<Sha256>(
        passphrase.as_bytes(),
        salt.as_bytes(),
        PBKDF2_ITERATIONS,
        key.as_mut(),
    );
    SymmetricKey(key)
}

pub fn generate_salt() -> Salt {
    Salt::generate()
}
