//! Bulk sealing of plaintext and legacy version-1 records.
//!
//! Records are processed one at a time: seal, persist envelope plus redacted
//! fields, move on. A crash mid-run leaves a mix of sealed and pending rows;
//! running again picks up only what is still pending.

use crate::context::{AuthContext, UserId};
use crate::error::{Result, VaultError};
use crate::record::{EnvelopeColumns, SensitiveFieldSet, SensitiveRecord};
use crate::service::VaultService;
use crate::storage::{RecordStore, VaultStore};
use chrono::{DateTime, Utc};
use strongbox_crypto::EncryptedEnvelope;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationProgress {
    pub processed: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Plaintext record sealed as version 2.
    Sealed { id: String },
    /// Version-1 envelope re-sealed as version 2.
    Upgraded { id: String },
    /// Already version 2; left untouched.
    Skipped { id: String },
    Failed { id: String, error: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedRecord {
    pub id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub total: usize,
    pub sealed: usize,
    pub upgraded: usize,
    pub skipped: usize,
    pub failed: Vec<FailedRecord>,
    /// Set when the run completed with no failures and the flag was written.
    pub privacy_mode_enabled_at: Option<DateTime<Utc>>,
}

impl MigrationReport {
    pub fn is_complete(&self) -> bool {
        self.privacy_mode_enabled_at.is_some()
    }
}

/// Walks a user's pending records through an unlocked [`VaultService`].
pub struct MigrationCoordinator<'a, S, R: ?Sized> {
    vault: &'a VaultService<S>,
    records: &'a R,
}

impl<'a, S: VaultStore, R: RecordStore + ?Sized> MigrationCoordinator<'a, S, R> {
    pub fn new(vault: &'a VaultService<S>, records: &'a R) -> Self {
        Self { vault, records }
    }

    /// True until a run has completed without failures for this user.
    pub fn needs_migration(&self, ctx: &AuthContext) -> Result<bool> {
        let user = ctx.user_id()?;
        Ok(self.records.privacy_mode_enabled_at(user)?.is_none())
    }

    /// Snapshot the pending records and return a run that processes one per
    /// `next()`. Dropping the run between records cancels it.
    pub fn start(&self, ctx: &AuthContext) -> Result<MigrationRun<'a, S, R>> {
        let user = ctx.user_id()?;
        if self.vault.unlocked_user() != Some(user) {
            return Err(VaultError::VaultLocked);
        }

        let pending = self.records.records_pending_encryption(user)?;
        let total = pending.len();
        info!(user = %user, total, "record migration started");

        Ok(MigrationRun {
            vault: self.vault,
            records: self.records,
            user: user.clone(),
            pending: pending.into_iter(),
            processed: 0,
            report: MigrationReport {
                total,
                ..MigrationReport::default()
            },
        })
    }

    /// Run to completion, calling `on_progress` with `(0, total)` first and
    /// then after every record.
    pub fn migrate<F>(&self, ctx: &AuthContext, mut on_progress: F) -> Result<MigrationReport>
    where
        F: FnMut(MigrationProgress),
    {
        let mut run = self.start(ctx)?;
        on_progress(run.progress());

        while run.next().is_some() {
            on_progress(run.progress());
        }

        run.finish()
    }
}

/// An in-flight migration. Yields one [`RecordOutcome`] per record.
pub struct MigrationRun<'a, S, R: ?Sized> {
    vault: &'a VaultService<S>,
    records: &'a R,
    user: UserId,
    pending: std::vec::IntoIter<SensitiveRecord>,
    processed: usize,
    report: MigrationReport,
}

impl<'a, S: VaultStore, R: RecordStore + ?Sized> MigrationRun<'a, S, R> {
    pub fn progress(&self) -> MigrationProgress {
        MigrationProgress {
            processed: self.processed,
            total: self.report.total,
        }
    }

    /// Close the run. The privacy-mode flag is written only if every record
    /// was processed and none failed.
    pub fn finish(mut self) -> Result<MigrationReport> {
        let finished = self.processed == self.report.total;

        if finished && self.report.failed.is_empty() {
            let now = Utc::now();
            self.records.enable_privacy_mode(&self.user, now)?;
            self.report.privacy_mode_enabled_at = Some(now);
        }

        info!(
            user = %self.user,
            total = self.report.total,
            processed = self.processed,
            sealed = self.report.sealed,
            upgraded = self.report.upgraded,
            failed = self.report.failed.len(),
            "record migration finished"
        );
        Ok(self.report)
    }

    fn migrate_record(&self, record: &SensitiveRecord) -> Result<RecordOutcome> {
        let id = record.id.clone();

        let (sealed, fields, outcome) = match record.decoded_envelope()? {
            None => {
                let sealed = self.vault.encrypt_payload(&record.fields)?;
                (sealed, record.fields.clone(), RecordOutcome::Sealed { id })
            }
            Some(legacy @ EncryptedEnvelope::V1 { .. }) => {
                let fields: SensitiveFieldSet = self.vault.decrypt_payload(&legacy)?;
                let sealed = self.vault.encrypt_payload(&fields)?;
                (sealed, fields, RecordOutcome::Upgraded { id })
            }
            Some(EncryptedEnvelope::V2 { .. }) => return Ok(RecordOutcome::Skipped { id }),
        };

        let redacted = fields.redacted(&self.vault.config().redaction_placeholder);
        self.records.store_sealed(
            &self.user,
            &record.id,
            &EnvelopeColumns::from(&sealed),
            &redacted,
        )?;
        Ok(outcome)
    }
}

impl<'a, S: VaultStore, R: RecordStore + ?Sized> Iterator for MigrationRun<'a, S, R> {
    type Item = RecordOutcome;

    fn next(&mut self) -> Option<RecordOutcome> {
        let record = self.pending.next()?;

        let outcome = match self.migrate_record(&record) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(record = %record.id, error = %e, "record migration failed, skipping");
                RecordOutcome::Failed {
                    id: record.id.clone(),
                    error: e.to_string(),
                }
            }
        };

        match &outcome {
            RecordOutcome::Sealed { id } => {
                debug!(record = %id, "record sealed");
                self.report.sealed += 1;
            }
            RecordOutcome::Upgraded { id } => {
                debug!(record = %id, "legacy record upgraded");
                self.report.upgraded += 1;
            }
            RecordOutcome::Skipped { .. } => self.report.skipped += 1,
            RecordOutcome::Failed { id, error } => self.report.failed.push(FailedRecord {
                id: id.clone(),
                error: error.clone(),
            }),
        }

        self.processed += 1;
        Some(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, StoreResult};

    /// Pending query that keeps returning rows after they were sealed, as a
    /// lagging read replica does.
    struct StaleReplica {
        inner: MemoryStore,
        ids: Vec<String>,
    }

    impl RecordStore for StaleReplica {
        fn insert_record(&self, record: &SensitiveRecord) -> StoreResult<()> {
            self.inner.insert_record(record)
        }

        fn get_record(&self, user: &UserId, id: &str) -> StoreResult<Option<SensitiveRecord>> {
            self.inner.get_record(user, id)
        }

        fn records_pending_encryption(&self, user: &UserId) -> StoreResult<Vec<SensitiveRecord>> {
            self.ids
                .iter()
                .filter_map(|id| self.inner.get_record(user, id).transpose())
                .collect()
        }

        fn store_sealed(
            &self,
            user: &UserId,
            id: &str,
            envelope: &EnvelopeColumns,
            redacted: &SensitiveFieldSet,
        ) -> StoreResult<()> {
            self.inner.store_sealed(user, id, envelope, redacted)
        }

        fn privacy_mode_enabled_at(&self, user: &UserId) -> StoreResult<Option<DateTime<Utc>>> {
            self.inner.privacy_mode_enabled_at(user)
        }

        fn enable_privacy_mode(&self, user: &UserId, at: DateTime<Utc>) -> StoreResult<()> {
            self.inner.enable_privacy_mode(user, at)
        }
    }

    #[test]
    fn test_already_sealed_record_is_skipped() {
        let replica = StaleReplica {
            inner: MemoryStore::new(),
            ids: vec!["a".to_string(), "b".to_string()],
        };
        let ctx = AuthContext::user("alice");
        let alice = UserId::new("alice");
        let mut vault = VaultService::new(&replica.inner);
        vault.setup_vault(&ctx, "correct-horse-battery").unwrap();

        let fields = SensitiveFieldSet::new().with("notes", "x");
        for id in ["a", "b"] {
            replica
                .insert_record(&SensitiveRecord::plaintext(id, alice.clone(), fields.clone()))
                .unwrap();
        }
        let sealed = EnvelopeColumns::from(&vault.encrypt_payload(&fields).unwrap());
        replica
            .store_sealed(&alice, "a", &sealed, &fields.redacted("[encrypted]"))
            .unwrap();

        let coordinator = MigrationCoordinator::new(&vault, &replica);
        let mut run = coordinator.start(&ctx).unwrap();
        assert_eq!(run.next(), Some(RecordOutcome::Skipped { id: "a".to_string() }));
        assert_eq!(run.next(), Some(RecordOutcome::Sealed { id: "b".to_string() }));
        assert_eq!(run.next(), None);

        let report = run.finish().unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.sealed, 1);
        assert!(report.is_complete());
        assert_eq!(replica.get_record(&alice, "a").unwrap().unwrap().envelope, sealed);
    }

    #[test]
    fn test_requires_unlocked_vault_for_same_user() {
        let store = MemoryStore::new();
        let mut vault = VaultService::new(&store);
        vault
            .setup_vault(&AuthContext::user("alice"), "correct-horse-battery")
            .unwrap();

        let coordinator = MigrationCoordinator::new(&vault, &store);
        assert!(matches!(
            coordinator.start(&AuthContext::user("bob")),
            Err(VaultError::VaultLocked)
        ));
        assert!(matches!(
            coordinator.start(&AuthContext::Anonymous),
            Err(VaultError::NotAuthenticated)
        ));
        assert!(coordinator.start(&AuthContext::user("alice")).is_ok());
    }

    #[test]
    fn test_empty_run_sets_flag() {
        let store = MemoryStore::new();
        let mut vault = VaultService::new(&store);
        let ctx = AuthContext::user("alice");
        vault.setup_vault(&ctx, "correct-horse-battery").unwrap();

        let coordinator = MigrationCoordinator::new(&vault, &store);
        assert!(coordinator.needs_migration(&ctx).unwrap());

        let mut calls = Vec::new();
        let report = coordinator.migrate(&ctx, |p| calls.push(p)).unwrap();

        assert_eq!(calls, vec![MigrationProgress { processed: 0, total: 0 }]);
        assert!(report.is_complete());
        assert!(!coordinator.needs_migration(&ctx).unwrap());
    }
}
