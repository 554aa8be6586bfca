/// Storage seam for the identity core
///
/// Every public operation of the core runs inside one unit of work obtained
/// from `IdentityStore::begin`. Writes become visible only after `commit`;
/// dropping an uncommitted unit of work rolls it back.
///
/// Two implementations ship with the service:
/// - `PgIdentityStore` (`crate::db`): PostgreSQL via sqlx
/// - `MemoryStore`: arena + index maps, used by tests and local tooling
mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    FederatedIdentity, LoginAttempt, OAuthClient, OAuthProvider, RefreshToken, User,
};

#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write (constraint name attached).
    #[error("Unique constraint violated: {0}")]
    Conflict(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Open a unit of work.
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>>;
}

/// Queries and writes available inside a unit of work
///
/// Emails passed in are expected to be normalized already.
#[async_trait]
pub trait StoreTx: Send {
    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------
    async fn find_user_by_email(&mut self, email: &str) -> StoreResult<Option<User>>;
    async fn find_user_by_id(&mut self, user_id: Uuid) -> StoreResult<Option<User>>;
    async fn find_user_by_identity(
        &mut self,
        provider: OAuthProvider,
        external_id: &str,
    ) -> StoreResult<Option<User>>;
    async fn find_user_by_verification_token(
        &mut self,
        fingerprint: &str,
    ) -> StoreResult<Option<User>>;
    async fn find_user_by_reset_token(&mut self, fingerprint: &str) -> StoreResult<Option<User>>;
    /// Insert a user together with its federated identities.
    async fn insert_user(&mut self, user: &User) -> StoreResult<()>;
    /// Persist scalar user fields; identities are written via `link_identity`.
    async fn update_user(&mut self, user: &User) -> StoreResult<()>;
    async fn link_identity(
        &mut self,
        user_id: Uuid,
        identity: &FederatedIdentity,
    ) -> StoreResult<()>;

    // ------------------------------------------------------------------
    // OAuth clients
    // ------------------------------------------------------------------
    async fn find_client(&mut self, client_id: &str) -> StoreResult<Option<OAuthClient>>;
    async fn find_active_client(&mut self, client_id: &str) -> StoreResult<Option<OAuthClient>>;
    async fn insert_client(&mut self, client: &OAuthClient) -> StoreResult<()>;
    async fn set_client_active(&mut self, client_id: &str, active: bool) -> StoreResult<bool>;
    /// Ordered by creation time.
    async fn list_clients(&mut self) -> StoreResult<Vec<OAuthClient>>;
    /// Persist every mutable field of the client row matched by `client_id`.
    async fn update_client(&mut self, client: &OAuthClient) -> StoreResult<bool>;
    /// Delete the client together with the refresh tokens issued to it.
    async fn delete_client(&mut self, client_id: &str) -> StoreResult<bool>;

    // ------------------------------------------------------------------
    // Refresh tokens
    // ------------------------------------------------------------------
    async fn insert_refresh_token(&mut self, token: &RefreshToken) -> StoreResult<()>;
    /// Lookup regardless of state.
    async fn find_refresh_token(&mut self, fingerprint: &str) -> StoreResult<Option<RefreshToken>>;
    /// Non-revoked and unexpired at `now`; locks the row for the unit of work.
    async fn find_valid_refresh_token(
        &mut self,
        fingerprint: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<RefreshToken>>;
    async fn touch_refresh_token(&mut self, token_id: Uuid, used_at: DateTime<Utc>)
        -> StoreResult<()>;
    async fn revoke_refresh_token(&mut self, token_id: Uuid) -> StoreResult<()>;
    async fn revoke_refresh_tokens_for_user(&mut self, user_id: Uuid) -> StoreResult<u64>;
    async fn revoke_refresh_tokens_for_client(
        &mut self,
        user_id: Uuid,
        client_id: &str,
    ) -> StoreResult<u64>;
    async fn count_active_refresh_tokens(
        &mut self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<i64>;
    /// Delete rows that are expired or revoked.
    async fn purge_refresh_tokens(&mut self, now: DateTime<Utc>) -> StoreResult<u64>;

    // ------------------------------------------------------------------
    // Login attempts
    // ------------------------------------------------------------------
    async fn insert_login_attempt(&mut self, attempt: &LoginAttempt) -> StoreResult<()>;
    async fn count_failed_attempts_since(
        &mut self,
        email: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<i64>;

    // ------------------------------------------------------------------
    // Roles
    // ------------------------------------------------------------------
    async fn has_role(&mut self, user_id: Uuid, role: &str) -> StoreResult<bool>;
    /// Idempotent.
    async fn grant_role(&mut self, user_id: Uuid, role: &str) -> StoreResult<()>;
    async fn revoke_role(&mut self, user_id: Uuid, role: &str) -> StoreResult<bool>;
    async fn role_names(&mut self, user_id: Uuid) -> StoreResult<Vec<String>>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}
