use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Number of random bytes behind every opaque token (256 bits).
const OPAQUE_TOKEN_BYTES: usize = 32;

/// Compute SHA256 hash of input bytes
pub fn sha256(input: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(input);
    hasher.finalize().into()
}

/// Generate a fresh opaque bearer value (base64url, no padding).
pub fn generate_opaque_token() -> String {
    let mut bytes = [0u8; OPAQUE_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[derive(Debug, thiserror::Error)]
pub enum FingerprintError {
    #[error("fingerprint key must not be empty")]
    EmptyKey,
}

/// Keyed fingerprint of raw bearer tokens
///
/// Raw refresh, verification and reset tokens are never persisted. Storage only
/// ever sees `HMAC-SHA256(key, raw)` hex-encoded, which is deterministic for a
/// given key (equality lookup works) and not reversible without the key.
#[derive(Clone)]
pub struct TokenFingerprinter {
    mac: HmacSha256,
}

impl TokenFingerprinter {
    pub fn new(key: &[u8]) -> Result<Self, FingerprintError> {
        if key.is_empty() {
            return Err(FingerprintError::EmptyKey);
        }
        let mac = <HmacSha256 as Mac>::new_from_slice(key).map_err(|_| FingerprintError::EmptyKey)?;
        Ok(Self { mac })
    }

    /// Fingerprinter with a process-local random key.
    ///
    /// Fingerprints do not survive a restart, so tokens stored under a previous
    /// key stop resolving.
    pub fn random() -> Result<Self, FingerprintError> {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        Self::new(&key)
    }

    pub fn fingerprint(&self, raw_token: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(raw_token.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

impl std::fmt::Debug for TokenFingerprinter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenFingerprinter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256() {
        let input = b"hello world";
        let hash = sha256(input);
        assert_eq!(hash.len(), 32);

        // Verify deterministic
        let hash2 = sha256(input);
        assert_eq!(hash, hash2);
    }

    #[test]
    fn test_fingerprint_is_deterministic_per_key() {
        let fp = TokenFingerprinter::new(b"fingerprint-key").unwrap();
        assert_eq!(fp.fingerprint("abc"), fp.fingerprint("abc"));
        assert_ne!(fp.fingerprint("abc"), fp.fingerprint("abd"));
        assert_eq!(fp.fingerprint("abc").len(), 64);
    }

    #[test]
    fn test_fingerprint_depends_on_key() {
        let a = TokenFingerprinter::new(b"key-a").unwrap();
        let b = TokenFingerprinter::new(b"key-b").unwrap();
        assert_ne!(a.fingerprint("token"), b.fingerprint("token"));
    }

    #[test]
    fn test_fingerprint_matches_known_hmac_vector() {
        // RFC 4231 test case 2
        let fp = TokenFingerprinter::new(b"Jefe").unwrap();
        assert_eq!(
            fp.fingerprint("what do ya want for nothing?"),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_empty_key_rejected() {
        assert!(matches!(
            TokenFingerprinter::new(b""),
            Err(FingerprintError::EmptyKey)
        ));
    }

    #[test]
    fn test_opaque_tokens_are_unique_and_url_safe() {
        let a = generate_opaque_token();
        let b = generate_opaque_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }
}
