/// Signed token issuance and validation
///
/// Access tokens carry the user's profile claims and current roles.
/// Refresh-claim tokens are signed JWTs with `token_type=refresh`; they are
/// distinct from the opaque refresh tokens handed out at login.
use chrono::{Duration, Utc};
use crypto_core::{Claims, JwtCodec, Jwks, KeyManager, TokenError, TokenType};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::JwtSettings;
use crate::error::Result;
use crate::models::User;
use crate::store::StoreTx;

#[derive(Debug, Clone)]
pub struct TokenService {
    codec: JwtCodec,
    access_ttl: Duration,
    refresh_claim_ttl: Duration,
}

impl TokenService {
    pub fn new(
        keys: Arc<KeyManager>,
        issuer: impl Into<String>,
        access_ttl: Duration,
        refresh_claim_ttl: Duration,
    ) -> Self {
        Self {
            codec: JwtCodec::new(keys, issuer),
            access_ttl,
            refresh_claim_ttl,
        }
    }

    pub fn from_settings(keys: Arc<KeyManager>, settings: &JwtSettings) -> Self {
        Self::new(
            keys,
            settings.issuer.clone(),
            Duration::seconds(settings.access_token_ttl_secs),
            Duration::seconds(settings.refresh_claim_ttl_secs),
        )
    }

    /// Sign an access token, reading the user's roles inside `tx`.
    pub async fn issue_access_token(
        &self,
        tx: &mut dyn StoreTx,
        user: &User,
        client_id: &str,
    ) -> Result<String> {
        let roles = tx.role_names(user.id).await?;
        Ok(self.sign_access_token(user, client_id, roles)?)
    }

    pub fn sign_access_token(
        &self,
        user: &User,
        client_id: &str,
        roles: Vec<String>,
    ) -> std::result::Result<String, TokenError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user.id.to_string(),
            email: Some(user.email.clone()),
            name: Some(user.full_name()),
            email_verified: Some(user.email_verified),
            client_id: client_id.to_string(),
            roles: Some(roles),
            token_type: TokenType::Access,
            iss: self.codec.issuer().to_string(),
            iat: now.timestamp(),
            exp: (now + self.access_ttl).timestamp(),
        };
        self.codec.encode(&claims)
    }

    pub fn issue_refresh_claim_token(
        &self,
        user: &User,
        client_id: &str,
    ) -> std::result::Result<String, TokenError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user.id.to_string(),
            email: None,
            name: None,
            email_verified: None,
            client_id: client_id.to_string(),
            roles: None,
            token_type: TokenType::Refresh,
            iss: self.codec.issuer().to_string(),
            iat: now.timestamp(),
            exp: (now + self.refresh_claim_ttl).timestamp(),
        };
        self.codec.encode(&claims)
    }

    pub fn validate(&self, token: &str) -> std::result::Result<Claims, TokenError> {
        self.codec.decode(token)
    }

    /// Valid signature, unexpired, and `token_type=access`.
    pub fn is_access_token(&self, token: &str) -> bool {
        self.validate(token).map(|c| c.is_access()).unwrap_or(false)
    }

    pub fn is_refresh_token_claim(&self, token: &str) -> bool {
        self.validate(token).map(|c| c.is_refresh()).unwrap_or(false)
    }

    pub fn user_id_from_token(&self, token: &str) -> Result<Uuid> {
        Ok(self.validate(token)?.subject_id()?)
    }

    pub fn client_id_from_token(&self, token: &str) -> Result<String> {
        Ok(self.validate(token)?.client_id)
    }

    pub fn jwks(&self) -> Jwks {
        self.codec.keys().jwks()
    }

    pub fn key_id(&self) -> &str {
        self.codec.keys().kid()
    }

    pub fn access_ttl_secs(&self) -> i64 {
        self.access_ttl.num_seconds()
    }
}
