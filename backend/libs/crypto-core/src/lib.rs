//! Shared cryptographic primitives for the identity service.
//!
//! - `keys`: RSA signing keypair ownership, JWKS publication, pluggable key persistence
//! - `jwt`: RS256 token codec with typed validation failures
//! - `hash`: SHA-256 helpers, keyed token fingerprints and opaque token generation
pub mod hash;
pub mod jwt;
pub mod keys;

pub use hash::{generate_opaque_token, sha256, FingerprintError, TokenFingerprinter};
pub use jwt::{Claims, JwtCodec, TokenError, TokenType};
pub use keys::{EphemeralKeyStore, Jwk, Jwks, KeyError, KeyManager, KeyStore, PemFileKeyStore};
