pub mod aead;
pub mod envelope;
pub mod error;
pub mod kdf;
pub mod keypair;
pub mod wrap;

pub use envelope::{EncryptedEnvelope, OpeningKeys, ENVELOPE_V1, ENVELOPE_V2};
pub use error::{CryptoError, Result};
pub use kdf::{Salt, SymmetricKey};
pub use keypair::{KeyPair, PrivateKey, PublicKey};
pub use wrap::WrappedKey;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::envelope::{EncryptedEnvelope, OpeningKeys, ENVELOPE_V1, ENVELOPE_V2};
    pub use crate::error::{CryptoError, Result};
    pub use crate::kdf::{Salt, SymmetricKey};
    pub use crate::keypair::{KeyPair, PrivateKey, PublicKey};
    pub use crate::wrap::WrappedKey;
}
