/// RS256 JWT codec
///
/// Signs and validates identity tokens with the key held by a `KeyManager`.
/// The codec is an explicitly constructed value injected wherever tokens are
/// issued; there is no global key state.
///
/// ## Security Design
///
/// - **RS256 ONLY**: any other `alg` in the header is rejected before the
///   signature is even looked at, so HS256/none confusion is impossible
/// - **Signature first**: no claim is returned unless the signature verifies
/// - **No leeway**: `exp` is enforced to the second
///
/// ## Wire contract
///
/// Claim names (`sub`, `email`, `name`, `email_verified`, `client_id`, `roles`,
/// `token_type`, `iss`, `iat`, `exp`) are consumed by relying parties and
/// must not change.
use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::keys::KeyManager;

/// JWT algorithm - RS256 is the only accepted algorithm
const JWT_ALGORITHM: Algorithm = Algorithm::RS256;

// ============================================================================
// Data Structures
// ============================================================================

/// Marker distinguishing access tokens from refresh-claim tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
        }
    }
}

/// JWT claims
///
/// Profile claims and `roles` are only present on access tokens, where
/// `roles` is always emitted (possibly `[]`); refresh-claim tokens carry just
/// the subject, client and standard claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID as UUID string)
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,
    pub token_type: TokenType,
    pub iss: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

impl Claims {
    pub fn is_access(&self) -> bool {
        self.token_type == TokenType::Access
    }

    pub fn is_refresh(&self) -> bool {
        self.token_type == TokenType::Refresh
    }

    /// Role names, empty when the claim is absent
    pub fn roles(&self) -> &[String] {
        self.roles.as_deref().unwrap_or_default()
    }

    pub fn subject_id(&self) -> Result<Uuid, TokenError> {
        Uuid::parse_str(&self.sub).map_err(|_| TokenError::Invalid)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.exp, 0).single()
    }
}

/// Why a token was rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("Token expired")]
    Expired,
    #[error("Malformed token")]
    Malformed,
    #[error("Unsupported token algorithm")]
    UnsupportedAlgorithm,
    #[error("Invalid token signature")]
    InvalidSignature,
    #[error("Invalid token")]
    Invalid,
    #[error("Token signing failed: {0}")]
    Signing(String),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::InvalidSignature => TokenError::InvalidSignature,
            ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
                TokenError::UnsupportedAlgorithm
            }
            ErrorKind::InvalidToken
            | ErrorKind::Base64(_)
            | ErrorKind::Json(_)
            | ErrorKind::Utf8(_) => TokenError::Malformed,
            _ => TokenError::Invalid,
        }
    }
}

// ============================================================================
// Codec
// ============================================================================

/// Signs and validates RS256 tokens for one issuer
#[derive(Clone)]
pub struct JwtCodec {
    keys: Arc<KeyManager>,
    issuer: String,
    validation: Validation,
}

impl JwtCodec {
    pub fn new(keys: Arc<KeyManager>, issuer: impl Into<String>) -> Self {
        let issuer = issuer.into();

        let mut validation = Validation::new(JWT_ALGORITHM);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.validate_aud = false;
        validation.set_issuer(&[issuer.as_str()]);
        validation.set_required_spec_claims(&["sub", "iss", "iat", "exp"]);

        Self {
            keys,
            issuer,
            validation,
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn keys(&self) -> &KeyManager {
        &self.keys
    }

    /// Sign `claims`; the header carries the key id and `typ: JWT`.
    pub fn encode(&self, claims: &Claims) -> Result<String, TokenError> {
        let mut header = Header::new(JWT_ALGORITHM);
        header.kid = Some(self.keys.kid().to_string());
        header.typ = Some("JWT".to_string());

        encode(&header, claims, self.keys.encoding_key())
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    /// Verify signature, algorithm, issuer and expiry, then return the claims.
    pub fn decode(&self, token: &str) -> Result<Claims, TokenError> {
        let data = decode::<Claims>(token, self.keys.decoding_key(), &self.validation)?;
        Ok(data.claims)
    }
}

impl std::fmt::Debug for JwtCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtCodec")
            .field("issuer", &self.issuer)
            .field("kid", &self.keys.kid())
            .finish()
    }
}
