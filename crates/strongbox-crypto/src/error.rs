use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// AEAD tag or OAEP padding check failed. Carries no reason on purpose:
    /// a wrong key and a corrupted ciphertext must look the same to the caller.
    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Unsupported envelope version: {0}")]
    UnsupportedVersion(u32),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
