//! Salted, iterated HMAC-SHA256 password hashes.
//!
//! Encoded form: `hmac-sha256$<iterations>$<salt hex>$<digest hex>`.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const SCHEME: &str = "hmac-sha256";
pub const DEFAULT_ITERATIONS: u32 = 10_000;

#[derive(Clone, PartialEq, Eq)]
pub struct PasswordHash {
    iterations: u32,
    salt: Vec<u8>,
    digest: Vec<u8>,
}

impl core::fmt::Debug for PasswordHash {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PasswordHash")
            .field("iterations", &self.iterations)
            .finish_non_exhaustive()
    }
}

impl PasswordHash {
    /// Hash `password` under a fresh random salt.
    pub fn new(password: &str) -> Self {
        Self::with_salt(password, Uuid::new_v4().as_bytes(), DEFAULT_ITERATIONS)
    }

    fn with_salt(password: &str, salt: &[u8], iterations: u32) -> Self {
        Self {
            iterations,
            salt: salt.to_vec(),
            digest: derive(password.as_bytes(), salt, iterations),
        }
    }

    /// Constant-time check of `password` against this hash.
    pub fn verify(&self, password: &str) -> bool {
        let candidate = derive(password.as_bytes(), &self.salt, self.iterations);
        candidate.ct_eq(&self.digest).into()
    }

    pub fn encode(&self) -> String {
        format!(
            "{SCHEME}${}${}${}",
            self.iterations,
            hex::encode(&self.salt),
            hex::encode(&self.digest)
        )
    }

    /// Parse the encoded form; `None` for anything not produced by [`PasswordHash::encode`].
    pub fn decode(encoded: &str) -> Option<Self> {
        let mut parts = encoded.split('$');
        if parts.next()? != SCHEME {
            return None;
        }
        let iterations = parts.next()?.parse().ok().filter(|n| *n > 0)?;
        let salt = hex::decode(parts.next()?).ok()?;
        let digest = hex::decode(parts.next()?).ok()?;
        if parts.next().is_some() || salt.is_empty() || digest.len() != 32 {
            return None;
        }
        Some(Self {
            iterations,
            salt,
            digest,
        })
    }
}

/// `U_1 = HMAC(salt, password)`, `U_n = HMAC(salt, U_{n-1} || password)`.
fn derive(password: &[u8], salt: &[u8], iterations: u32) -> Vec<u8> {
    let mut block: Vec<u8> = Vec::new();
    for _ in 0..iterations.max(1) {
        // HMAC accepts keys of any length.
        let Ok(mut mac) = HmacSha256::new_from_slice(salt) else {
            return Vec::new();
        };
        mac.update(&block);
        mac.update(password);
        block = mac.finalize().into_bytes().to_vec();
    }
    block
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifies_only_the_original_password() {
        let hash = PasswordHash::new("correct horse");
        assert!(hash.verify("correct horse"));
        assert!(!hash.verify("correct horse "));
        assert!(!hash.verify(""));
    }

    #[test]
    fn salts_differ_between_hashes() {
        let a = PasswordHash::new("same");
        let b = PasswordHash::new("same");
        assert_ne!(a.encode(), b.encode());
        assert!(a.verify("same") && b.verify("same"));
    }

    #[test]
    fn encoded_form_survives_decoding() {
        let hash = PasswordHash::with_salt("pw", b"fixed-salt", 3);
        let encoded = hash.encode();
        assert!(encoded.starts_with("hmac-sha256$3$"));
        let decoded = PasswordHash::decode(&encoded).unwrap();
        assert!(decoded.verify("pw"));
        assert_eq!(decoded, hash);
    }

    #[test]
    fn foreign_encodings_are_rejected() {
        assert!(PasswordHash::decode("bcrypt$10$abc$def").is_none());
        assert!(PasswordHash::decode("hmac-sha256$0$00$00").is_none());
        assert!(PasswordHash::decode("hmac-sha256$5$zz$00").is_none());
    }

    #[test]
    fn debug_output_hides_the_digest() {
        let hash = PasswordHash::with_salt("pw", b"salt", 1);
        let digest_hex = hex::encode(&hash.digest);
        assert!(!format!("{hash:?}").contains(&digest_hex));
    }
}
