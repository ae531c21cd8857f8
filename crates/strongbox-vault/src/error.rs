use strongbox_crypto::CryptoError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Not authenticated - no active user")]
    NotAuthenticated,
    #[error("No vault found - set one up first")]
    VaultNotFound,
    #[error("A vault already exists for this user")]
    VaultExists,
    #[error("Invalid passphrase")]
    InvalidPassphrase,
    #[error("Passphrase rejected: {0}")]
    WeakPassphrase(String),
    #[error("Unsupported vault key version: {0}")]
    UnsupportedKeyVersion(u32),
    #[error("{0} record(s) still use the legacy format - migrate before changing the passphrase")]
    LegacyRecordsPending(usize),
    #[error("Vault still uses the legacy key scheme - upgrade it before unlocking")]
    LegacyVault,
    #[error("Vault is locked")]
    VaultLocked,
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),
    #[error("Persistence failure: {0}")]
    Persistence(#[from] StoreError),
    #[error("Crypto error: {0}")]
    Crypto(CryptoError),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<CryptoError> for VaultError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::MalformedEnvelope(msg) => VaultError::MalformedEnvelope(msg),
            CryptoError::UnsupportedVersion(v) => {
                VaultError::MalformedEnvelope(format!("unsupported version {}", v))
            }
            other => VaultError::Crypto(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, VaultError>;
