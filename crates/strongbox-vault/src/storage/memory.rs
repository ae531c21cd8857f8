use super::{needs_encryption, RecordStore, StoreResult, VaultStore};
use crate::context::UserId;
use crate::error::StoreError;
use crate::record::{EnvelopeColumns, SensitiveFieldSet, SensitiveRecord, VaultRecord};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct Inner {
    vaults: HashMap<UserId, VaultRecord>,
    records: Vec<SensitiveRecord>,
    privacy_mode: HashMap<UserId, DateTime<Utc>>,
    read_only: bool,
}

/// In-process store. Backs tests and embedders that persist elsewhere.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write fail with `Unavailable`, as a backend outage would.
    pub fn set_read_only(&self, read_only: bool) -> StoreResult<()> {
        self.lock()?.read_only = read_only;
        Ok(())
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("store mutex poisoned".to_string()))
    }

    fn lock_for_write(&self) -> StoreResult<MutexGuard<'_, Inner>> {
        let inner = self.lock()?;
        if inner.read_only {
            return Err(StoreError::Unavailable("store is read-only".to_string()));
        }
        Ok(inner)
    }
}

impl VaultStore for MemoryStore {
    fn load_vault(&self, user: &UserId) -> StoreResult<Option<VaultRecord>> {
        Ok(self.lock()?.vaults.get(user).cloned())
    }

    fn insert_vault(&self, record: &VaultRecord) -> StoreResult<()> {
        let mut inner = self.lock_for_write()?;
        if inner.vaults.contains_key(&record.user_id) {
            return Err(StoreError::Conflict(format!(
                "vault already exists for {}",
                record.user_id
            )));
        }
        inner.vaults.insert(record.user_id.clone(), record.clone());
        Ok(())
    }

    fn update_wrapped_key(
        &self,
        user: &UserId,
        password_salt: &str,
        encrypted_private_key: &str,
    ) -> StoreResult<()> {
        let mut inner = self.lock_for_write()?;
        let record = inner
            .vaults
            .get_mut(user)
            .ok_or_else(|| StoreError::NotFound(format!("vault for {}", user)))?;
        record.password_salt = password_salt.to_string();
        record.encrypted_private_key = encrypted_private_key.to_string();
        Ok(())
    }

    fn upgrade_legacy_vault(&self, record: &VaultRecord) -> StoreResult<()> {
        let mut inner = self.lock_for_write()?;
        match inner.vaults.get_mut(&record.user_id) {
            Some(row) if row.is_legacy() && row.password_salt == record.password_salt => {
                *row = record.clone();
                Ok(())
            }
            Some(_) => Err(StoreError::Conflict(format!(
                "vault for {} is no longer the legacy row",
                record.user_id
            ))),
            None => Err(StoreError::NotFound(format!("vault for {}", record.user_id))),
        }
    }
}

impl RecordStore for MemoryStore {
    fn insert_record(&self, record: &SensitiveRecord) -> StoreResult<()> {
        let mut inner = self.lock_for_write()?;
        if inner
            .records
            .iter()
            .any(|r| r.user_id == record.user_id && r.id == record.id)
        {
            return Err(StoreError::Conflict(format!("record {}", record.id)));
        }
        inner.records.push(record.clone());
        Ok(())
    }

    fn get_record(&self, user: &UserId, id: &str) -> StoreResult<Option<SensitiveRecord>> {
        Ok(self
            .lock()?
            .records
            .iter()
            .find(|r| &r.user_id == user && r.id == id)
            .cloned())
    }

    fn records_pending_encryption(&self, user: &UserId) -> StoreResult<Vec<SensitiveRecord>> {
        Ok(self
            .lock()?
            .records
            .iter()
            .filter(|r| &r.user_id == user && needs_encryption(&r.envelope))
            .cloned()
            .collect())
    }

    fn store_sealed(
        &self,
        user: &UserId,
        id: &str,
        envelope: &EnvelopeColumns,
        redacted: &SensitiveFieldSet,
    ) -> StoreResult<()> {
        let mut inner = self.lock_for_write()?;
        let record = inner
            .records
            .iter_mut()
            .find(|r| &r.user_id == user && r.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("record {}", id)))?;
        record.envelope = envelope.clone();
        record.fields = redacted.clone();
        Ok(())
    }

    fn privacy_mode_enabled_at(&self, user: &UserId) -> StoreResult<Option<DateTime<Utc>>> {
        Ok(self.lock()?.privacy_mode.get(user).copied())
    }

    fn enable_privacy_mode(&self, user: &UserId, at: DateTime<Utc>) -> StoreResult<()> {
        self.lock_for_write()?.privacy_mode.insert(user.clone(), at);
        Ok(())
    }
}
