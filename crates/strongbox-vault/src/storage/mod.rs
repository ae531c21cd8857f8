//! Record-store collaborators the vault persists through.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::context::UserId;
use crate::error::StoreError;
use crate::record::{EnvelopeColumns, SensitiveFieldSet, SensitiveRecord, VaultRecord};
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Per-user vault rows. One row per user, enforced by the store.
pub trait VaultStore {
    fn load_vault(&self, user: &UserId) -> StoreResult<Option<VaultRecord>>;

    /// Write a brand new vault row in one step. `Conflict` if the user already
    /// has one; nothing is written on failure.
    fn insert_vault(&self, record: &VaultRecord) -> StoreResult<()>;

    /// Swap salt and wrapped private key together (passphrase change).
    fn update_wrapped_key(
        &self,
        user: &UserId,
        password_salt: &str,
        encrypted_private_key: &str,
    ) -> StoreResult<()>;

    /// Turn a legacy row into `record` in one write. Only applies while the
    /// stored row is still legacy and has the same salt; `Conflict` otherwise.
    fn upgrade_legacy_vault(&self, record: &VaultRecord) -> StoreResult<()>;
}

/// Journal records with their envelope columns, plus the per-user
/// privacy-mode flag.
pub trait RecordStore {
    fn insert_record(&self, record: &SensitiveRecord) -> StoreResult<()>;

    fn get_record(&self, user: &UserId, id: &str) -> StoreResult<Option<SensitiveRecord>>;

    /// Records that are plaintext or carry a version-1 envelope, in insertion order.
    fn records_pending_encryption(&self, user: &UserId) -> StoreResult<Vec<SensitiveRecord>>;

    /// Attach `envelope` and overwrite the plaintext fields with `redacted`,
    /// as one write. The row is kept, never deleted.
    fn store_sealed(
        &self,
        user: &UserId,
        id: &str,
        envelope: &EnvelopeColumns,
        redacted: &SensitiveFieldSet,
    ) -> StoreResult<()>;

    fn privacy_mode_enabled_at(&self, user: &UserId) -> StoreResult<Option<DateTime<Utc>>>;

    fn enable_privacy_mode(&self, user: &UserId, at: DateTime<Utc>) -> StoreResult<()>;
}

impl<T: VaultStore + ?Sized> VaultStore for &T {
    fn load_vault(&self, user: &UserId) -> StoreResult<Option<VaultRecord>> {
        (**self).load_vault(user)
    }

    fn insert_vault(&self, record: &VaultRecord) -> StoreResult<()> {
        (**self).insert_vault(record)
    }

    fn update_wrapped_key(
        &self,
        user: &UserId,
        password_salt: &str,
        encrypted_private_key: &str,
    ) -> StoreResult<()> {
        (**self).update_wrapped_key(user, password_salt, encrypted_private_key)
    }

    fn upgrade_legacy_vault(&self, record: &VaultRecord) -> StoreResult<()> {
        (**self).upgrade_legacy_vault(record)
    }
}

impl<T: VaultStore + ?Sized> VaultStore for Arc<T> {
    fn load_vault(&self, user: &UserId) -> StoreResult<Option<VaultRecord>> {
        (**self).load_vault(user)
    }

    fn insert_vault(&self, record: &VaultRecord) -> StoreResult<()> {
        (**self).insert_vault(record)
    }

    fn update_wrapped_key(
        &self,
        user: &UserId,
        password_salt: &str,
        encrypted_private_key: &str,
    ) -> StoreResult<()> {
        (**self).update_wrapped_key(user, password_salt, encrypted_private_key)
    }

    fn upgrade_legacy_vault(&self, record: &VaultRecord) -> StoreResult<()> {
        (**self).upgrade_legacy_vault(record)
    }
}

pub(crate) fn needs_encryption(envelope: &EnvelopeColumns) -> bool {
    !envelope.is_encrypted || envelope.encryption_version == Some(strongbox_crypto::ENVELOPE_V1)
}
