//! Client-side encryption vault for journal records.
//!
//! A user's records are sealed before they reach the backend. The vault
//! keypair is generated on the client, its private half stored only wrapped
//! under a passphrase-derived key, and held in memory while unlocked.

pub mod config;
pub mod context;
pub mod error;
pub mod migration;
pub mod record;
pub mod service;
pub mod storage;

pub use config::{MinLength, PassphrasePolicy, VaultConfig, VaultConfigBuilder};
pub use context::{AuthContext, UserId};
pub use error::{Result, StoreError, VaultError};
pub use migration::{
    FailedRecord, MigrationCoordinator, MigrationProgress, MigrationReport, MigrationRun,
    RecordOutcome,
};
pub use record::{
    EnvelopeColumns, SensitiveFieldSet, SensitiveRecord, VaultRecord, KEY_VERSION,
    LEGACY_KEY_VERSION,
};
pub use service::{VaultService, VaultState};
pub use storage::{MemoryStore, RecordStore, SqliteStore, VaultStore};
pub use strongbox_crypto::EncryptedEnvelope;
