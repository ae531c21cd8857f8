//! Long-lived RSA-OAEP keypair and its portable JSON Web Key form.

use crate::error::{CryptoError, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD as B64URL, Engine};
use rand::rngs::OsRng;
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

pub const RSA_BITS: usize = 2048;
const JWK_ALG: &str = "RSA-OAEP-256";

/// JSON Web Key (RFC 7517) for an RSA-OAEP-256 key.
///
/// Private members are only ever populated on the path into the key wrapper
/// and are wiped on drop.
#[derive(Serialize, Deserialize)]
pub(crate) struct Jwk {
    kty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    alg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ext: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key_ops: Option<Vec<String>>,
    n: String,
    e: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    d: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    p: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    q: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dq: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    qi: Option<String>,
}

impl Drop for Jwk {
    fn drop(&mut self) {
        self.d.zeroize();
        self.p.zeroize();
        self.q.zeroize();
        self.dp.zeroize();
        self.dq.zeroize();
        self.qi.zeroize();
    }
}

fn encode_uint(value: &BigUint) -> String {
    B64URL.encode(value.to_bytes_be())
}

fn decode_uint(member: &str, value: &str) -> Result<BigUint> {
    let bytes = Zeroizing::new(
        B64URL
            .decode(value)
            .map_err(|e| CryptoError::InvalidKey(format!("JWK member {}: {}", member, e)))?,
    );
    Ok(BigUint::from_bytes_be(&bytes))
}

fn required<'a>(member: &str, value: &'a Option<String>) -> Result<&'a str> {
    value
        .as_deref()
        .ok_or_else(|| CryptoError::InvalidKey(format!("JWK is missing member {}", member)))
}

impl Jwk {
    fn check_kty(&self) -> Result<()> {
        if self.kty != "RSA" {
            return Err(CryptoError::InvalidKey(format!(
                "expected kty RSA, got {}",
                self.kty
            )));
        }
        if let Some(alg) = &self.alg {
            if alg != JWK_ALG {
                return Err(CryptoError::InvalidKey(format!(
                    "expected alg {}, got {}",
                    JWK_ALG, alg
                )));
            }
        }
        Ok(())
    }
}

/// Recipient key: anyone holding it can seal envelopes, nobody can open them.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey(RsaPublicKey);

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicKey")
            .field("modulus_bits", &(self.0.size() * 8))
            .field("e", &self.0.e())
            .finish()
    }
}

impl PublicKey {
    pub(crate) fn rsa(&self) -> &RsaPublicKey {
        &self.0
    }

    /// Export as a JWK JSON string, suitable for storing as text.
    pub fn to_jwk_string(&self) -> Result<String> {
        let jwk = Jwk {
            kty: "RSA".to_string(),
            alg: Some(JWK_ALG.to_string()),
            ext: Some(true),
            key_ops: Some(vec!["encrypt".to_string()]),
            n: encode_uint(self.0.n()),
            e: encode_uint(self.0.e()),
            d: None,
            p: None,
            q: None,
            dp: None,
            dq: None,
            qi: None,
        };
        serde_json::to_string(&jwk).map_err(|e| CryptoError::Serialization(e.to_string()))
    }

    /// Import a key previously produced by [`PublicKey::to_jwk_string`] (or any
    /// RSA-OAEP-256 public JWK). Private members, if present, are ignored.
    pub fn from_jwk_str(json: &str) -> Result<Self> {
        let jwk: Jwk = serde_json::from_str(json)
            .map_err(|e| CryptoError::InvalidKey(format!("public key JSON: {}", e)))?;
        jwk.check_kty()?;

        let n = decode_uint("n", &jwk.n)?;
        let e = decode_uint("e", &jwk.e)?;
        let key = RsaPublicKey::new(n, e).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;

        if key.size() * 8 < RSA_BITS {
            return Err(CryptoError::InvalidKey(format!(
                "modulus too small: {} bits",
                key.size() * 8
            )));
        }

        Ok(Self(key))
    }
}

/// Decryption half of the vault keypair. Never leaves this crate unwrapped.
pub struct PrivateKey(RsaPrivateKey);

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey")
            .field("modulus_bits", &(self.0.size() * 8))
            .field("secret", &"<REDACTED>")
            .finish()
    }
}

impl PrivateKey {
    pub(crate) fn rsa(&self) -> &RsaPrivateKey {
        &self.0
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.to_public_key())
    }

    /// Serialize as a private JWK. Only the key wrapper calls this; the
    /// returned buffer is wiped when dropped.
    pub(crate) fn to_jwk_bytes(&self) -> Result<Zeroizing<Vec<u8>>> {
        let primes = self.0.primes();
        if primes.len() != 2 {
            return Err(CryptoError::InvalidKey(format!(
                "expected 2 primes, found {}",
                primes.len()
            )));
        }
        let (p, q) = (&primes[0], &primes[1]);
        let one = BigUint::from(1u32);
        let two = BigUint::from(2u32);

        let dp = self.0.d() % &(p - &one);
        let dq = self.0.d() % &(q - &one);
        // p is prime, so q^(p-2) mod p is q⁻¹ mod p.
        let qi = q.modpow(&(p - &two), p);

        let jwk = Jwk {
            kty: "RSA".to_string(),
            alg: Some(JWK_ALG.to_string()),
            ext: Some(true),
            key_ops: Some(vec!["decrypt".to_string()]),
            n: encode_uint(self.0.n()),
            e: encode_uint(self.0.e()),
            d: Some(encode_uint(self.0.d())),
            p: Some(encode_uint(p)),
            q: Some(encode_uint(q)),
            dp: Some(encode_uint(&dp)),
            dq: Some(encode_uint(&dq)),
            qi: Some(encode_uint(&qi)),
        };

        serde_json::to_vec(&jwk)
            .map(Zeroizing::new)
            .map_err(|e| CryptoError::Serialization(e.to_string()))
    }

    pub(crate) fn from_jwk_bytes(bytes: &[u8]) -> Result<Self> {
        let jwk: Jwk = serde_json::from_slice(bytes)
            .map_err(|e| CryptoError::InvalidKey(format!("private key JSON: {}", e)))?;
        jwk.check_kty()?;

        let n = decode_uint("n", &jwk.n)?;
        let e = decode_uint("e", &jwk.e)?;
        let d = decode_uint("d", required("d", &jwk.d)?)?;
        let p = decode_uint("p", required("p", &jwk.p)?)?;
        let q = decode_uint("q", required("q", &jwk.q)?)?;

        let key = RsaPrivateKey::from_components(n, e, d, vec![p, q])
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self(key))
    }
}

/// The user's vault keypair. Lives in memory for one unlocked session only.
pub struct KeyPair {
    public: PublicKey,
    private: PrivateKey,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .field("private", &"<REDACTED>")
            .finish()
    }
}

impl KeyPair {
    /// Generate a fresh 2048-bit RSA keypair (e = 65537).
    pub fn generate() -> Result<Self> {
        let private = RsaPrivateKey::new(&mut OsRng, RSA_BITS)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        let public = private.to_public_key();

        Ok(Self {
            public: PublicKey(public),
            private: PrivateKey(private),
        })
    }

    /// Pair an unwrapped private key with its stored public key, refusing
    /// the combination if they do not belong together.
    pub fn from_parts(public: PublicKey, private: PrivateKey) -> Result<Self> {
        if private.public_key() != public {
            return Err(CryptoError::InvalidKey(
                "private key does not match stored public key".to_string(),
            ));
        }
        Ok(Self { public, private })
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    pub fn private_key(&self) -> &PrivateKey {
        &self.private
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_2048_bit() {
        let pair = KeyPair::generate().unwrap();
        assert_eq!(pair.public_key().rsa().size() * 8, RSA_BITS);
    }

    #[test]
    fn test_public_jwk_roundtrip() {
        let pair = KeyPair::generate().unwrap();
        let json = pair.public_key().to_jwk_string().unwrap();

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["kty"], "RSA");
        assert_eq!(value["alg"], "RSA-OAEP-256");
        assert_eq!(value["e"], "AQAB");
        assert!(value.get("d").is_none(), "public JWK must not carry d");

        let imported = PublicKey::from_jwk_str(&json).unwrap();
        assert_eq!(&imported, pair.public_key());
    }

    #[test]
    fn test_private_jwk_roundtrip() {
        let pair = KeyPair::generate().unwrap();
        let bytes = pair.private_key().to_jwk_bytes().unwrap();

        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        for member in ["d", "p", "q", "dp", "dq", "qi"] {
            assert!(value.get(member).is_some(), "missing {}", member);
        }

        let restored = PrivateKey::from_jwk_bytes(&bytes).unwrap();
        assert_eq!(restored.public_key(), *pair.public_key());
    }

    #[test]
    fn test_import_rejects_wrong_kty() {
        let json = r#"{"kty":"EC","n":"AQAB","e":"AQAB"}"#;
        assert!(matches!(
            PublicKey::from_jwk_str(json),
            Err(CryptoError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_from_parts_rejects_mismatch() {
        let a = KeyPair::generate().unwrap();
        let b = KeyPair::generate().unwrap();
        let b_private = PrivateKey::from_jwk_bytes(&b.private_key().to_jwk_bytes().unwrap()).unwrap();

        assert!(KeyPair::from_parts(a.public_key().clone(), b_private).is_err());
    }

    #[test]
    fn test_debug_no_secret_leakage() {
        let pair = KeyPair::generate().unwrap();
        let debug_output = format!("{:?}", pair);

        assert!(debug_output.contains("REDACTED"));
        assert!(debug_output.contains("modulus_bits"));
        assert!(format!("{:?}", pair.private_key()).contains("REDACTED"));
    }
}
