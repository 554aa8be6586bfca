/// RSA signing key management and JWKS publication
///
/// A `KeyManager` is built once at startup and shared (via `Arc`) by everything
/// that signs or verifies tokens. It is immutable after construction, so
/// concurrent readers need no synchronisation.
///
/// ## Persistence
///
/// By default keys are ephemeral: a fresh keypair per process, never written
/// anywhere. Every restart therefore invalidates all outstanding access tokens,
/// and two instances reject each other's tokens. Deployments that need
/// stability plug in a `KeyStore` (see `PemFileKeyStore`).
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use jsonwebtoken::{DecodingKey, EncodingKey};
use rand::rngs::OsRng;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::hash::sha256;

/// Default modulus size for generated keys
pub const DEFAULT_KEY_BITS: usize = 2048;

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("RSA key generation failed: {0}")]
    Generation(String),
    #[error("Failed to parse RSA private key: {0}")]
    Parse(String),
    #[error("Failed to encode RSA key: {0}")]
    Encoding(String),
    #[error("Key store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// JWKS
// ============================================================================

/// Single RSA public key in JWK form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    #[serde(rename = "use")]
    pub key_use: String,
    pub kid: String,
    pub alg: String,
    pub n: String,
    pub e: String,
}

/// Document served at `/.well-known/jwks.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

// ============================================================================
// Key persistence
// ============================================================================

/// Pluggable persistence for the signing key (PKCS#8 PEM)
pub trait KeyStore: Send + Sync {
    fn load(&self) -> Result<Option<String>, KeyError>;
    fn save(&self, private_key_pem: &str) -> Result<(), KeyError>;
}

/// Never persists anything; every process gets a fresh key.
#[derive(Debug, Default, Clone, Copy)]
pub struct EphemeralKeyStore;

impl KeyStore for EphemeralKeyStore {
    fn load(&self) -> Result<Option<String>, KeyError> {
        Ok(None)
    }

    fn save(&self, _private_key_pem: &str) -> Result<(), KeyError> {
        Ok(())
    }
}

/// Keeps the signing key in a PEM file on disk.
#[derive(Debug, Clone)]
pub struct PemFileKeyStore {
    path: PathBuf,
}

impl PemFileKeyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyStore for PemFileKeyStore {
    fn load(&self) -> Result<Option<String>, KeyError> {
        match std::fs::read_to_string(&self.path) {
            Ok(pem) => Ok(Some(pem)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, private_key_pem: &str) -> Result<(), KeyError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.path, private_key_pem)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }
}

// ============================================================================
// KeyManager
// ============================================================================

/// Owns the RS256 signing keypair and its public JWK
#[derive(Clone)]
pub struct KeyManager {
    encoding: EncodingKey,
    decoding: DecodingKey,
    jwk: Jwk,
}

impl KeyManager {
    /// Generate a fresh keypair of `bits` modulus size.
    pub fn generate(bits: usize) -> Result<Self, KeyError> {
        let key = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| KeyError::Generation(e.to_string()))?;
        Self::from_private_key(&key)
    }

    /// Build from a PKCS#8 (`PRIVATE KEY`) or PKCS#1 (`RSA PRIVATE KEY`) PEM.
    pub fn from_pem(pem: &str) -> Result<Self, KeyError> {
        let key = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| KeyError::Parse(e.to_string()))?;
        Self::from_private_key(&key)
    }

    /// Load the key from `store`, generating and saving one when it is empty.
    pub fn load_or_generate(store: &dyn KeyStore, bits: usize) -> Result<Self, KeyError> {
        if let Some(pem) = store.load()? {
            info!("Loaded RSA signing key from key store");
            return Self::from_pem(&pem);
        }

        let key = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| KeyError::Generation(e.to_string()))?;
        let pem = key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| KeyError::Encoding(e.to_string()))?;
        store.save(pem.as_str())?;
        info!(bits, "Generated new RSA signing key");

        Self::from_private_key(&key)
    }

    fn from_private_key(key: &RsaPrivateKey) -> Result<Self, KeyError> {
        let pem = key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| KeyError::Encoding(e.to_string()))?;
        let encoding = EncodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| KeyError::Parse(e.to_string()))?;

        let n = URL_SAFE_NO_PAD.encode(strip_leading_zeros(&key.n().to_bytes_be()));
        let e = URL_SAFE_NO_PAD.encode(strip_leading_zeros(&key.e().to_bytes_be()));
        let decoding =
            DecodingKey::from_rsa_components(&n, &e).map_err(|e| KeyError::Parse(e.to_string()))?;

        let jwk = Jwk {
            kty: "RSA".to_string(),
            key_use: "sig".to_string(),
            kid: thumbprint(&n, &e),
            alg: "RS256".to_string(),
            n,
            e,
        };

        Ok(Self {
            encoding,
            decoding,
            jwk,
        })
    }

    /// Replace the derived key id with an operator-chosen one.
    pub fn with_kid(mut self, kid: impl Into<String>) -> Self {
        self.jwk.kid = kid.into();
        self
    }

    pub fn kid(&self) -> &str {
        &self.jwk.kid
    }

    pub fn jwk(&self) -> &Jwk {
        &self.jwk
    }

    pub fn jwks(&self) -> Jwks {
        Jwks {
            keys: vec![self.jwk.clone()],
        }
    }

    pub fn encoding_key(&self) -> &EncodingKey {
        &self.encoding
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding
    }
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("kid", &self.jwk.kid)
            .finish_non_exhaustive()
    }
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[first..]
}

/// RFC 7638 JWK thumbprint; stable for the lifetime of a key.
fn thumbprint(n: &str, e: &str) -> String {
    let canonical = format!(r#"{{"e":"{e}","kty":"RSA","n":"{n}"}}"#);
    URL_SAFE_NO_PAD.encode(sha256(canonical.as_bytes()))
}
