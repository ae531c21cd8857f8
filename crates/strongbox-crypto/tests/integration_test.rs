//! End-to-end: passphrase → wrapped keypair → envelopes, the way the vault layer drives it.
use strongbox_crypto::prelude::*;
use strongbox_crypto::{envelope, kdf, wrap};

#[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
struct DoseEntry {
    strain: String,
    dosage: String,
}

#[test]
fn test_setup_then_unlock_then_open() {
    // Setup
    let pair = KeyPair::generate().unwrap();
    let salt = kdf::generate_salt();
    let wrapped = wrap::wrap(pair.private_key(), &kdf::derive("correct-horse-battery", &salt)).unwrap();
    let public_json = pair.public_key().to_jwk_string().unwrap();
    let wrapped_json = wrapped.to_json().unwrap();
    let salt_b64 = salt.to_base64();

    let entry = DoseEntry {
        strain: "ACDC".to_string(),
        dosage: "0.4g".to_string(),
    };
    let sealed = envelope::encrypt(pair.public_key(), &entry).unwrap();
    drop(pair);

    // Unlock from the persisted text only
    let salt = Salt::from_base64(&salt_b64).unwrap();
    let key = kdf::derive("correct-horse-battery", &salt);
    let private = wrap::unwrap(&WrappedKey::from_json(&wrapped_json).unwrap(), &key).unwrap();
    let public = PublicKey::from_jwk_str(&public_json).unwrap();
    let restored = KeyPair::from_parts(public, private).unwrap();

    let opened: DoseEntry = envelope::decrypt(
        &OpeningKeys {
            private_key: restored.private_key(),
            legacy_key: Some(&key),
        },
        &sealed,
    )
    .unwrap();
    assert_eq!(opened, entry);

    // Wrong passphrase never yields a key
    let wrong = kdf::derive("wrong-password", &salt);
    assert!(matches!(
        wrap::unwrap(&WrappedKey::from_json(&wrapped_json).unwrap(), &wrong),
        Err(CryptoError::AuthenticationFailed)
    ));
}

#[test]
fn test_v1_and_v2_open_with_same_keys() {
    let pair = KeyPair::generate().unwrap();
    let legacy = kdf::derive("correct-horse-battery", &kdf::generate_salt());

    let old = envelope::encrypt_legacy(&legacy, "legacy entry").unwrap();
    let new = envelope::encrypt(pair.public_key(), "current entry").unwrap();

    let keys = OpeningKeys {
        private_key: pair.private_key(),
        legacy_key: Some(&legacy),
    };
    assert_eq!(envelope::decrypt::<String>(&keys, &old).unwrap(), "legacy entry");
    assert_eq!(envelope::decrypt::<String>(&keys, &new).unwrap(), "current entry");
}
