use crate::error::{CryptoError, Result};
use crate::kdf::SymmetricKey;
use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    AeadCore, Aes256Gcm, Nonce,
};
use zeroize::Zeroizing;

pub const IV_SIZE: usize = 12;

pub type Iv = [u8; IV_SIZE];

/// AES-256-GCM ciphertext with the IV it was sealed under.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub iv: Iv,
}

/// Encrypt under a fresh random 96-bit IV.
///
/// Every call draws a new IV from the OS RNG; callers never supply one.
pub fn seal(key: &SymmetricKey, plaintext: &[u8]) -> Result<Sealed> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| CryptoError::Encryption(format!("Key init failed: {}", e)))?;

    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| CryptoError::Encryption(format!("AEAD encrypt failed: {}", e)))?;

    let mut iv = [0u8; IV_SIZE];
    iv.copy_from_slice(&nonce);

    Ok(Sealed { ciphertext, iv })
}

/// Decrypt and authenticate. Any failure collapses to `AuthenticationFailed`.
pub fn open(key: &SymmetricKey, ciphertext: &[u8], iv: &Iv) -> Result<Zeroizing<Vec<u8>>> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|_| CryptoError::AuthenticationFailed)?;

    let plaintext = cipher
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map_err(|_| CryptoError::AuthenticationFailed)?;

    Ok(Zeroizing::new(plaintext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_seal_open() {
        let key = SymmetricKey::from_bytes([1u8; 32]);

        let sealed = seal(&key, b"secret message").unwrap();
        let opened = open(&key, &sealed.ciphertext, &sealed.iv).unwrap();

        assert_eq!(&**opened, b"secret message");
    }

    #[test]
    fn test_open_wrong_key() {
        let key1 = SymmetricKey::from_bytes([1u8; 32]);
        let key2 = SymmetricKey::from_bytes([2u8; 32]);

        let sealed = seal(&key1, b"secret message").unwrap();

        assert!(matches!(
            open(&key2, &sealed.ciphertext, &sealed.iv),
            Err(CryptoError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_iv_uniqueness() {
        let key = SymmetricKey::from_bytes([1u8; 32]);
        let mut ivs = HashSet::new();

        for i in 0..10000 {
            let sealed = seal(&key, format!("message {}", i).as_bytes()).unwrap();
            assert!(ivs.insert(sealed.iv), "IV collision at message {}", i);
        }
    }

    #[test]
    fn test_tampered_iv_or_ciphertext_fails() {
        let key = SymmetricKey::generate();
        let sealed = seal(&key, b"dose log").unwrap();

        let mut bad_iv = sealed.iv;
        bad_iv[0] ^= 0x01;
        assert!(open(&key, &sealed.ciphertext, &bad_iv).is_err());

        let mut bad_ct = sealed.ciphertext.clone();
        bad_ct[0] ^= 0x80;
        assert!(open(&key, &bad_ct, &sealed.iv).is_err());
    }

    #[test]
    fn test_empty_plaintext() {
        let key = SymmetricKey::generate();
        let sealed = seal(&key, b"").unwrap();
        // 16-byte GCM tag only
        assert_eq!(sealed.ciphertext.len(), 16);
        assert!(open(&key, &sealed.ciphertext, &sealed.iv).unwrap().is_empty());
    }
}
