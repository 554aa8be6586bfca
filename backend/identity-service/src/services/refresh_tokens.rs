/// Opaque refresh token lifecycle
///
/// Raw tokens are 256-bit random values returned to the caller exactly once.
/// Only their HMAC fingerprint is persisted. Tokens are multi-use until
/// they expire or are revoked; each use stamps `last_used_at`.
use chrono::{Duration, Utc};
use crypto_core::{generate_opaque_token, TokenFingerprinter};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::error::{IdentityError, Result};
use crate::models::RefreshToken;
use crate::store::StoreTx;

#[derive(Debug, Clone)]
pub struct RefreshTokenStore {
    fingerprinter: Arc<TokenFingerprinter>,
    ttl: Duration,
}

impl RefreshTokenStore {
    pub fn new(fingerprinter: Arc<TokenFingerprinter>, ttl: Duration) -> Self {
        Self { fingerprinter, ttl }
    }

    pub fn fingerprint(&self, raw: &str) -> String {
        self.fingerprinter.fingerprint(raw)
    }

    /// Persist a new token for `(user_id, client_id)` and return the raw value.
    pub async fn issue(&self, tx: &mut dyn StoreTx, user_id: Uuid, client_id: &str) -> Result<String> {
        let raw = generate_opaque_token();
        let now = Utc::now();
        let token = RefreshToken {
            id: Uuid::new_v4(),
            token_hash: self.fingerprint(&raw),
            user_id,
            client_id: client_id.to_string(),
            expires_at: now + self.ttl,
            is_revoked: false,
            last_used_at: None,
            created_at: now,
        };
        tx.insert_refresh_token(&token).await?;
        debug!(user_id = %user_id, client_id, "Issued refresh token");
        Ok(raw)
    }

    /// Unknown, revoked and expired tokens are indistinguishable to the caller.
    pub async fn validate(&self, tx: &mut dyn StoreTx, raw: &str) -> Result<RefreshToken> {
        tx.find_valid_refresh_token(&self.fingerprint(raw), Utc::now())
            .await?
            .ok_or(IdentityError::InvalidOrExpiredToken)
    }

    pub async fn rotate_usage(&self, tx: &mut dyn StoreTx, token: &RefreshToken) -> Result<()> {
        tx.touch_refresh_token(token.id, Utc::now()).await?;
        Ok(())
    }

    pub async fn revoke(&self, tx: &mut dyn StoreTx, token: &RefreshToken) -> Result<()> {
        tx.revoke_refresh_token(token.id).await?;
        Ok(())
    }

    /// Revoke by raw value. Returns the record when one exists, revoked or not;
    /// unknown tokens are a silent no-op.
    pub async fn revoke_by_raw(&self, tx: &mut dyn StoreTx, raw: &str) -> Result<Option<RefreshToken>> {
        let Some(token) = tx.find_refresh_token(&self.fingerprint(raw)).await? else {
            return Ok(None);
        };
        if !token.is_revoked {
            tx.revoke_refresh_token(token.id).await?;
        }
        Ok(Some(token))
    }

    pub async fn revoke_all(&self, tx: &mut dyn StoreTx, user_id: Uuid) -> Result<u64> {
        Ok(tx.revoke_refresh_tokens_for_user(user_id).await?)
    }

    pub async fn revoke_all_for_client(
        &self,
        tx: &mut dyn StoreTx,
        user_id: Uuid,
        client_id: &str,
    ) -> Result<u64> {
        Ok(tx.revoke_refresh_tokens_for_client(user_id, client_id).await?)
    }

    pub async fn active_count(&self, tx: &mut dyn StoreTx, user_id: Uuid) -> Result<i64> {
        Ok(tx.count_active_refresh_tokens(user_id, Utc::now()).await?)
    }

    /// Delete expired and revoked rows.
    pub async fn purge(&self, tx: &mut dyn StoreTx) -> Result<u64> {
        Ok(tx.purge_refresh_tokens(Utc::now()).await?)
    }
}
