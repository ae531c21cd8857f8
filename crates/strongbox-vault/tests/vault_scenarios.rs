//! Vault lifecycle scenarios over the in-memory store.
use serde::{Deserialize, Serialize};
use strongbox_vault::*;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct DoseEntry {
    strain: String,
    dosage: String,
}

fn acdc() -> DoseEntry {
    DoseEntry {
        strain: "ACDC".to_string(),
        dosage: "0.4g".to_string(),
    }
}

#[test]
fn test_setup_encrypt_unlock_scenario() {
    let store = MemoryStore::new();
    let ctx = AuthContext::user("user-1");

    let mut vault = VaultService::new(&store);
    vault.setup_vault(&ctx, "correct-horse-battery").unwrap();

    let sealed = vault.encrypt_payload(&acdc()).unwrap();
    assert_eq!(sealed.version(), 2);
    assert!(!sealed.wrapped_key().unwrap().is_empty());

    let opened: DoseEntry = vault.decrypt_payload(&sealed).unwrap();
    assert_eq!(opened, acdc());

    // A fresh session re-derives everything from the stored row.
    let mut fresh = VaultService::new(&store);
    assert!(!fresh.is_unlocked());
    fresh.unlock_vault(&ctx, "correct-horse-battery").unwrap();
    assert_eq!(fresh.decrypt_payload::<DoseEntry>(&sealed).unwrap(), acdc());

    let mut intruder = VaultService::new(&store);
    assert!(matches!(
        intruder.unlock_vault(&ctx, "wrong-password"),
        Err(VaultError::InvalidPassphrase)
    ));
    assert!(!intruder.is_unlocked());
    assert!(matches!(
        intruder.decrypt_payload::<DoseEntry>(&sealed),
        Err(VaultError::VaultLocked)
    ));
}

#[test]
fn test_wrong_passphrases_never_unlock() {
    let store = MemoryStore::new();
    let ctx = AuthContext::user("user-1");
    VaultService::new(&store)
        .setup_vault(&ctx, "correct-horse-battery")
        .unwrap();

    for attempt in ["", "correct-horse-batter", "Correct-horse-battery", "correct-horse-battery "] {
        let mut vault = VaultService::new(&store);
        assert!(
            matches!(vault.unlock_vault(&ctx, attempt), Err(VaultError::InvalidPassphrase)),
            "unexpected result for {:?}",
            attempt
        );
        assert!(!vault.is_unlocked());
    }
}

#[test]
fn test_tampered_envelope_fails_closed() {
    let store = MemoryStore::new();
    let ctx = AuthContext::user("user-1");
    let mut vault = VaultService::new(&store);
    vault.setup_vault(&ctx, "correct-horse-battery").unwrap();

    let sealed = vault.encrypt_payload(&acdc()).unwrap();
    let EncryptedEnvelope::V2 {
        mut ciphertext,
        iv,
        wrapped_key,
    } = sealed
    else {
        panic!("expected v2");
    };
    ciphertext[3] ^= 0x10;

    let tampered = EncryptedEnvelope::V2 {
        ciphertext,
        iv,
        wrapped_key,
    };
    assert!(matches!(
        vault.decrypt_payload::<DoseEntry>(&tampered),
        Err(VaultError::InvalidPassphrase)
    ));
}

#[test]
fn test_envelope_from_another_vault_is_rejected() {
    let store = MemoryStore::new();
    let mut alice = VaultService::new(&store);
    let mut bob = VaultService::new(&store);
    alice
        .setup_vault(&AuthContext::user("alice"), "alice-passphrase")
        .unwrap();
    bob.setup_vault(&AuthContext::user("bob"), "bob-passphrase")
        .unwrap();

    let sealed = alice.encrypt_payload(&acdc()).unwrap();
    assert!(matches!(
        bob.decrypt_payload::<DoseEntry>(&sealed),
        Err(VaultError::InvalidPassphrase)
    ));
}

#[test]
fn test_encrypt_for_user_while_locked() {
    let store = MemoryStore::new();
    let ctx = AuthContext::user("user-1");
    let mut vault = VaultService::new(&store);
    vault.setup_vault(&ctx, "correct-horse-battery").unwrap();
    vault.lock();

    let sealed = vault.encrypt_for_user(&ctx, &acdc()).unwrap();
    assert!(matches!(
        vault.decrypt_payload::<DoseEntry>(&sealed),
        Err(VaultError::VaultLocked)
    ));

    vault.unlock_vault(&ctx, "correct-horse-battery").unwrap();
    assert_eq!(vault.decrypt_payload::<DoseEntry>(&sealed).unwrap(), acdc());
}

#[test]
fn test_change_passphrase_keeps_envelopes_readable() {
    let store = MemoryStore::new();
    let ctx = AuthContext::user("user-1");
    let mut vault = VaultService::new(&store);
    vault.setup_vault(&ctx, "correct-horse-battery").unwrap();
    let sealed = vault.encrypt_payload(&acdc()).unwrap();
    let before = store.load_vault(&UserId::new("user-1")).unwrap().unwrap();

    assert!(matches!(
        vault.change_passphrase(&ctx, &store, "wrong-password", "tr0ub4dor&3-staple"),
        Err(VaultError::InvalidPassphrase)
    ));
    vault
        .change_passphrase(&ctx, &store, "correct-horse-battery", "tr0ub4dor&3-staple")
        .unwrap();

    let after = store.load_vault(&UserId::new("user-1")).unwrap().unwrap();
    assert_eq!(after.public_key, before.public_key);
    assert_ne!(after.password_salt, before.password_salt);
    assert_ne!(after.encrypted_private_key, before.encrypted_private_key);

    let mut fresh = VaultService::new(&store);
    assert!(matches!(
        fresh.unlock_vault(&ctx, "correct-horse-battery"),
        Err(VaultError::InvalidPassphrase)
    ));
    fresh.unlock_vault(&ctx, "tr0ub4dor&3-staple").unwrap();
    assert_eq!(fresh.decrypt_payload::<DoseEntry>(&sealed).unwrap(), acdc());
}

#[test]
fn test_custom_policy_applies_to_setup() {
    let store = MemoryStore::new();
    let config = VaultConfig::builder().min_passphrase_len(16).build().unwrap();
    let mut vault = VaultService::with_config(&store, config);

    assert!(matches!(
        vault.setup_vault(&AuthContext::user("user-1"), "only-12-chars"),
        Err(VaultError::WeakPassphrase(_))
    ));
    vault
        .setup_vault(&AuthContext::user("user-1"), "sixteen-chars-ok")
        .unwrap();
}
