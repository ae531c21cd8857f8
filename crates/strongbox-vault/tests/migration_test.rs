//! MigrationCoordinator behaviour: progress, idempotency, failures, cancellation.
use strongbox_crypto::{envelope, SymmetricKey};
use strongbox_vault::*;

const PASSPHRASE: &str = "correct-horse-battery";

fn entry(i: usize) -> SensitiveFieldSet {
    SensitiveFieldSet::new()
        .with("strain", format!("strain-{}", i))
        .with("dosage", format!("0.{}g", i % 10))
        .with("notes", format!("entry number {}", i))
}

fn seed_plaintext(store: &MemoryStore, user: &UserId, count: usize) {
    for i in 0..count {
        store
            .insert_record(&SensitiveRecord::plaintext(
                format!("rec-{:03}", i),
                user.clone(),
                entry(i),
            ))
            .unwrap();
    }
}

fn unlocked<'a>(store: &'a MemoryStore, ctx: &AuthContext) -> VaultService<&'a MemoryStore> {
    let mut vault = VaultService::new(store);
    vault.setup_vault(ctx, PASSPHRASE).unwrap();
    vault
}

#[test]
fn test_hundred_plaintext_records() {
    let store = MemoryStore::new();
    let ctx = AuthContext::user("user-1");
    let user = UserId::new("user-1");
    seed_plaintext(&store, &user, 100);
    let vault = unlocked(&store, &ctx);

    let coordinator = MigrationCoordinator::new(&vault, &store);
    let mut progress = Vec::new();
    let report = coordinator.migrate(&ctx, |p| progress.push(p)).unwrap();

    assert_eq!(report.total, 100);
    assert_eq!(report.sealed, 100);
    assert!(report.failed.is_empty());
    assert!(report.is_complete());

    let processed: Vec<usize> = progress.iter().map(|p| p.processed).collect();
    assert_eq!(processed, (0..=100).collect::<Vec<_>>());
    assert!(progress.iter().all(|p| p.total == 100));

    for i in 0..100 {
        let record = store.get_record(&user, &format!("rec-{:03}", i)).unwrap().unwrap();
        assert!(record.is_encrypted());
        assert_eq!(record.envelope.encryption_version, Some(2));
        assert!(record.envelope.wrapped_aes_key.is_some());
        assert!(record.fields.iter().all(|(_, v)| v == "[encrypted]"));
        assert_eq!(record.fields.len(), 3);

        let sealed = record.decoded_envelope().unwrap().unwrap();
        let fields: SensitiveFieldSet = vault.decrypt_payload(&sealed).unwrap();
        assert_eq!(fields, entry(i));
    }

    assert!(store.records_pending_encryption(&user).unwrap().is_empty());
    assert!(!coordinator.needs_migration(&ctx).unwrap());
}

#[test]
fn test_second_run_is_a_noop() {
    let store = MemoryStore::new();
    let ctx = AuthContext::user("user-1");
    let user = UserId::new("user-1");
    seed_plaintext(&store, &user, 5);
    let vault = unlocked(&store, &ctx);
    let coordinator = MigrationCoordinator::new(&vault, &store);

    coordinator.migrate(&ctx, |_| {}).unwrap();
    let after_first: Vec<_> = (0..5)
        .map(|i| store.get_record(&user, &format!("rec-{:03}", i)).unwrap().unwrap())
        .collect();

    let report = coordinator.migrate(&ctx, |_| {}).unwrap();
    assert_eq!(report.total, 0);
    assert_eq!(report.sealed, 0);

    let after_second: Vec<_> = (0..5)
        .map(|i| store.get_record(&user, &format!("rec-{:03}", i)).unwrap().unwrap())
        .collect();
    assert_eq!(after_first, after_second);
}

#[test]
fn test_bad_record_is_skipped_and_flag_withheld() {
    let store = MemoryStore::new();
    let ctx = AuthContext::user("user-1");
    let user = UserId::new("user-1");
    let vault = unlocked(&store, &ctx);

    seed_plaintext(&store, &user, 2);
    // Sealed under some other key: cannot be opened, must not abort the run.
    let foreign = envelope::encrypt_legacy(&SymmetricKey::generate(), &entry(99)).unwrap();
    store
        .insert_record(&SensitiveRecord::sealed(
            "foreign",
            user.clone(),
            entry(99).redacted("[encrypted]"),
            &foreign,
        ))
        .unwrap();
    store
        .insert_record(&SensitiveRecord::plaintext("last", user.clone(), entry(3)))
        .unwrap();

    let coordinator = MigrationCoordinator::new(&vault, &store);
    let report = coordinator.migrate(&ctx, |_| {}).unwrap();

    assert_eq!(report.total, 4);
    assert_eq!(report.sealed, 3);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].id, "foreign");
    assert!(!report.is_complete());
    assert!(coordinator.needs_migration(&ctx).unwrap());

    // The failed record is untouched and still pending.
    let pending = store.records_pending_encryption(&user).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].decoded_envelope().unwrap(), Some(foreign));
    assert!(store.get_record(&user, "last").unwrap().unwrap().is_encrypted());
}

#[test]
fn test_malformed_row_counts_as_failure() {
    let store = MemoryStore::new();
    let ctx = AuthContext::user("user-1");
    let user = UserId::new("user-1");
    let vault = unlocked(&store, &ctx);

    let mut broken = SensitiveRecord::plaintext("broken", user.clone(), entry(1));
    broken.envelope = EnvelopeColumns {
        is_encrypted: true,
        encrypted_payload: Some("AQID".to_string()),
        wrapped_aes_key: None,
        encryption_iv: None,
        encryption_version: Some(1),
    };
    store.insert_record(&broken).unwrap();

    let report = MigrationCoordinator::new(&vault, &store)
        .migrate(&ctx, |_| {})
        .unwrap();
    assert_eq!(report.failed.len(), 1);
    assert!(report.failed[0].error.contains("Malformed envelope"));
}

#[test]
fn test_cancelled_run_resumes_where_it_stopped() {
    let store = MemoryStore::new();
    let ctx = AuthContext::user("user-1");
    let user = UserId::new("user-1");
    seed_plaintext(&store, &user, 10);
    let vault = unlocked(&store, &ctx);
    let coordinator = MigrationCoordinator::new(&vault, &store);

    let mut run = coordinator.start(&ctx).unwrap();
    for _ in 0..4 {
        assert!(matches!(run.next(), Some(RecordOutcome::Sealed { .. })));
    }
    assert_eq!(run.progress(), MigrationProgress { processed: 4, total: 10 });
    let partial = run.finish().unwrap();
    assert!(!partial.is_complete());
    assert!(coordinator.needs_migration(&ctx).unwrap());

    let report = coordinator.migrate(&ctx, |_| {}).unwrap();
    assert_eq!(report.total, 6);
    assert_eq!(report.sealed, 6);
    assert!(report.is_complete());
}

#[test]
fn test_locked_vault_cannot_migrate() {
    let store = MemoryStore::new();
    let ctx = AuthContext::user("user-1");
    seed_plaintext(&store, &UserId::new("user-1"), 1);
    let mut vault = unlocked(&store, &ctx);
    vault.lock();

    assert!(matches!(
        MigrationCoordinator::new(&vault, &store).migrate(&ctx, |_| {}),
        Err(VaultError::VaultLocked)
    ));
}
