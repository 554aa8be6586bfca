/// PostgreSQL implementation of the identity store
///
/// Each unit of work is one database transaction. Uncommitted transactions
/// are rolled back by sqlx when dropped, so an abandoned call leaves no
/// partial writes behind.
pub mod clients;
pub mod login_attempts;
pub mod refresh_tokens;
pub mod roles;
pub mod users;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::models::{
    FederatedIdentity, LoginAttempt, OAuthClient, OAuthProvider, RefreshToken, User,
};
use crate::store::{IdentityStore, StoreError, StoreResult, StoreTx};

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(db_err) = err.as_database_error() {
            // PostgreSQL unique violation error code: 23505
            if db_err.code().as_deref() == Some("23505") {
                return StoreError::Conflict(db_err.constraint().unwrap_or("unique").to_string());
            }
        }
        tracing::error!("Database error: {}", err);
        StoreError::Backend(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct PgIdentityStore {
    pool: PgPool,
}

impl PgIdentityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityStore for PgIdentityStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgStoreTx { tx }))
    }
}

pub struct PgStoreTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgStoreTx {
    async fn find_user_by_email(&mut self, email: &str) -> StoreResult<Option<User>> {
        users::find_by_email(&mut self.tx, email).await
    }

    async fn find_user_by_id(&mut self, user_id: Uuid) -> StoreResult<Option<User>> {
        users::find_by_id(&mut self.tx, user_id).await
    }

    async fn find_user_by_identity(
        &mut self,
        provider: OAuthProvider,
        external_id: &str,
    ) -> StoreResult<Option<User>> {
        users::find_by_identity(&mut self.tx, provider, external_id).await
    }

    async fn find_user_by_verification_token(
        &mut self,
        fingerprint: &str,
    ) -> StoreResult<Option<User>> {
        users::find_by_verification_token(&mut self.tx, fingerprint).await
    }

    async fn find_user_by_reset_token(&mut self, fingerprint: &str) -> StoreResult<Option<User>> {
        users::find_by_reset_token(&mut self.tx, fingerprint).await
    }

    async fn insert_user(&mut self, user: &User) -> StoreResult<()> {
        users::insert(&mut self.tx, user).await
    }

    async fn update_user(&mut self, user: &User) -> StoreResult<()> {
        users::update(&mut self.tx, user).await
    }

    async fn link_identity(
        &mut self,
        user_id: Uuid,
        identity: &FederatedIdentity,
    ) -> StoreResult<()> {
        users::link_identity(&mut self.tx, user_id, identity).await
    }

    async fn find_client(&mut self, client_id: &str) -> StoreResult<Option<OAuthClient>> {
        clients::find(&mut self.tx, client_id).await
    }

    async fn find_active_client(&mut self, client_id: &str) -> StoreResult<Option<OAuthClient>> {
        clients::find_active(&mut self.tx, client_id).await
    }

    async fn insert_client(&mut self, client: &OAuthClient) -> StoreResult<()> {
        clients::insert(&mut self.tx, client).await
    }

    async fn set_client_active(&mut self, client_id: &str, active: bool) -> StoreResult<bool> {
        clients::set_active(&mut self.tx, client_id, active).await
    }

    async fn list_clients(&mut self) -> StoreResult<Vec<OAuthClient>> {
        clients::list(&mut self.tx).await
    }

    async fn update_client(&mut self, client: &OAuthClient) -> StoreResult<bool> {
        clients::update(&mut self.tx, client).await
    }

    async fn delete_client(&mut self, client_id: &str) -> StoreResult<bool> {
        clients::delete(&mut self.tx, client_id).await
    }

    async fn insert_refresh_token(&mut self, token: &RefreshToken) -> StoreResult<()> {
        refresh_tokens::insert(&mut self.tx, token).await
    }

    async fn find_refresh_token(&mut self, fingerprint: &str) -> StoreResult<Option<RefreshToken>> {
        refresh_tokens::find_by_hash(&mut self.tx, fingerprint).await
    }

    async fn find_valid_refresh_token(
        &mut self,
        fingerprint: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<RefreshToken>> {
        refresh_tokens::find_valid_by_hash(&mut self.tx, fingerprint, now).await
    }

    async fn touch_refresh_token(
        &mut self,
        token_id: Uuid,
        used_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        refresh_tokens::touch(&mut self.tx, token_id, used_at).await
    }

    async fn revoke_refresh_token(&mut self, token_id: Uuid) -> StoreResult<()> {
        refresh_tokens::revoke(&mut self.tx, token_id).await
    }

    async fn revoke_refresh_tokens_for_user(&mut self, user_id: Uuid) -> StoreResult<u64> {
        refresh_tokens::revoke_all_for_user(&mut self.tx, user_id).await
    }

    async fn revoke_refresh_tokens_for_client(
        &mut self,
        user_id: Uuid,
        client_id: &str,
    ) -> StoreResult<u64> {
        refresh_tokens::revoke_all_for_client(&mut self.tx, user_id, client_id).await
    }

    async fn count_active_refresh_tokens(
        &mut self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<i64> {
        refresh_tokens::count_active(&mut self.tx, user_id, now).await
    }

    async fn purge_refresh_tokens(&mut self, now: DateTime<Utc>) -> StoreResult<u64> {
        refresh_tokens::purge(&mut self.tx, now).await
    }

    async fn insert_login_attempt(&mut self, attempt: &LoginAttempt) -> StoreResult<()> {
        login_attempts::insert(&mut self.tx, attempt).await
    }

    async fn count_failed_attempts_since(
        &mut self,
        email: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<i64> {
        login_attempts::count_failed_since(&mut self.tx, email, since).await
    }

    async fn has_role(&mut self, user_id: Uuid, role: &str) -> StoreResult<bool> {
        roles::exists(&mut self.tx, user_id, role).await
    }

    async fn grant_role(&mut self, user_id: Uuid, role: &str) -> StoreResult<()> {
        roles::grant(&mut self.tx, user_id, role).await
    }

    async fn revoke_role(&mut self, user_id: Uuid, role: &str) -> StoreResult<bool> {
        roles::revoke(&mut self.tx, user_id, role).await
    }

    async fn role_names(&mut self, user_id: Uuid) -> StoreResult<Vec<String>> {
        roles::names(&mut self.tx, user_id).await
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
