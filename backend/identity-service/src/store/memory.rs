/// In-memory identity store
///
/// Rows live in arenas keyed by id, with secondary indexes for every lookup
/// the core performs. Units of work are serialised behind an async mutex; each
/// one snapshots the tables on entry and restores the snapshot unless it
/// commits, which gives the same all-or-nothing visibility as a database
/// transaction.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{IdentityStore, StoreError, StoreResult, StoreTx};
use crate::models::{
    FederatedIdentity, LoginAttempt, OAuthClient, OAuthProvider, RefreshToken, User,
};

#[derive(Debug, Clone, Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    user_ids_by_email: HashMap<String, Uuid>,
    user_ids_by_identity: HashMap<(OAuthProvider, String), Uuid>,
    clients: HashMap<String, OAuthClient>,
    refresh_tokens: HashMap<Uuid, RefreshToken>,
    token_ids_by_hash: HashMap<String, Uuid>,
    login_attempts: Vec<LoginAttempt>,
    roles: HashMap<Uuid, BTreeSet<String>>,
    /// User another writer "commits" right before the next `insert_user`.
    concurrent_user: Option<User>,
}

impl Tables {
    fn check_user_unique(&self, user: &User) -> StoreResult<()> {
        if self.user_ids_by_email.contains_key(&user.email) {
            return Err(StoreError::Conflict("users_email_key".to_string()));
        }
        for identity in &user.identities {
            let key = (identity.provider, identity.external_id.clone());
            if self.user_ids_by_identity.contains_key(&key) {
                return Err(StoreError::Conflict(
                    "user_identities_provider_external_id_key".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn put_user(&mut self, user: User) {
        self.user_ids_by_email.insert(user.email.clone(), user.id);
        for identity in &user.identities {
            self.user_ids_by_identity
                .insert((identity.provider, identity.external_id.clone()), user.id);
        }
        self.users.insert(user.id, user);
    }

    fn user_by_index(&self, id: Option<&Uuid>) -> Option<User> {
        id.and_then(|id| self.users.get(id)).cloned()
    }
}

/// Shared in-memory store; clones refer to the same tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `user` appear as if a concurrent unit of work committed it just
    /// before the next `insert_user`, which then hits the uniqueness checks.
    pub async fn stage_concurrent_user(&self, user: User) {
        self.tables.lock().await.concurrent_user = Some(user);
    }

    pub async fn user_count(&self) -> usize {
        self.tables.lock().await.users.len()
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let guard = Arc::clone(&self.tables).lock_owned().await;
        let snapshot = guard.clone();
        Ok(Box::new(MemoryTx {
            guard,
            snapshot: Some(snapshot),
        }))
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<Tables>,
    /// Restored on drop unless the unit of work commits.
    snapshot: Option<Tables>,
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            *self.guard = snapshot;
        }
    }
}

impl MemoryTx {
    fn tables(&mut self) -> &mut Tables {
        &mut self.guard
    }

    fn apply_concurrent_insert(&mut self) {
        if let Some(racer) = self.guard.concurrent_user.take() {
            // The racing writer committed: its row survives our rollback.
            if let Some(snapshot) = self.snapshot.as_mut() {
                snapshot.concurrent_user = None;
                snapshot.put_user(racer.clone());
            }
            self.guard.put_user(racer);
        }
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn find_user_by_email(&mut self, email: &str) -> StoreResult<Option<User>> {
        let tables = self.tables();
        Ok(tables.user_by_index(tables.user_ids_by_email.get(email)))
    }

    async fn find_user_by_id(&mut self, user_id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.tables().users.get(&user_id).cloned())
    }

    async fn find_user_by_identity(
        &mut self,
        provider: OAuthProvider,
        external_id: &str,
    ) -> StoreResult<Option<User>> {
        let tables = self.tables();
        let key = (provider, external_id.to_string());
        Ok(tables.user_by_index(tables.user_ids_by_identity.get(&key)))
    }

    async fn find_user_by_verification_token(
        &mut self,
        fingerprint: &str,
    ) -> StoreResult<Option<User>> {
        Ok(self
            .tables()
            .users
            .values()
            .find(|u| u.verification_token.as_deref() == Some(fingerprint))
            .cloned())
    }

    async fn find_user_by_reset_token(&mut self, fingerprint: &str) -> StoreResult<Option<User>> {
        Ok(self
            .tables()
            .users
            .values()
            .find(|u| u.password_reset_token.as_deref() == Some(fingerprint))
            .cloned())
    }

    async fn insert_user(&mut self, user: &User) -> StoreResult<()> {
        self.apply_concurrent_insert();
        let tables = self.tables();
        tables.check_user_unique(user)?;
        tables.put_user(user.clone());
        Ok(())
    }

    async fn update_user(&mut self, user: &User) -> StoreResult<()> {
        let tables = self.tables();
        let Some(existing) = tables.users.get(&user.id) else {
            return Err(StoreError::Backend(format!("user {} does not exist", user.id)));
        };
        if existing.email != user.email {
            if tables.user_ids_by_email.contains_key(&user.email) {
                return Err(StoreError::Conflict("users_email_key".to_string()));
            }
            tables.user_ids_by_email.remove(&existing.email);
            tables.user_ids_by_email.insert(user.email.clone(), user.id);
        }

        // Identities are owned by link_identity.
        let identities = existing.identities.clone();
        let mut updated = user.clone();
        updated.identities = identities;
        tables.users.insert(user.id, updated);
        Ok(())
    }

    async fn link_identity(
        &mut self,
        user_id: Uuid,
        identity: &FederatedIdentity,
    ) -> StoreResult<()> {
        let tables = self.tables();
        let key = (identity.provider, identity.external_id.clone());
        if tables.user_ids_by_identity.contains_key(&key) {
            return Err(StoreError::Conflict(
                "user_identities_provider_external_id_key".to_string(),
            ));
        }
        let Some(user) = tables.users.get_mut(&user_id) else {
            return Err(StoreError::Backend(format!("user {} does not exist", user_id)));
        };
        if user.identities.iter().any(|i| i.provider == identity.provider) {
            return Err(StoreError::Conflict(
                "user_identities_user_id_provider_key".to_string(),
            ));
        }
        user.identities.push(identity.clone());
        tables.user_ids_by_identity.insert(key, user_id);
        Ok(())
    }

    async fn find_client(&mut self, client_id: &str) -> StoreResult<Option<OAuthClient>> {
        Ok(self.tables().clients.get(client_id).cloned())
    }

    async fn find_active_client(&mut self, client_id: &str) -> StoreResult<Option<OAuthClient>> {
        Ok(self
            .tables()
            .clients
            .get(client_id)
            .filter(|c| c.is_active)
            .cloned())
    }

    async fn insert_client(&mut self, client: &OAuthClient) -> StoreResult<()> {
        let tables = self.tables();
        if tables.clients.contains_key(&client.client_id) {
            return Err(StoreError::Conflict("oauth_clients_client_id_key".to_string()));
        }
        tables.clients.insert(client.client_id.clone(), client.clone());
        Ok(())
    }

    async fn set_client_active(&mut self, client_id: &str, active: bool) -> StoreResult<bool> {
        match self.tables().clients.get_mut(client_id) {
            Some(client) => {
                client.is_active = active;
                client.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_clients(&mut self) -> StoreResult<Vec<OAuthClient>> {
        let mut clients: Vec<OAuthClient> = self.tables().clients.values().cloned().collect();
        clients.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.client_id.cmp(&b.client_id))
        });
        Ok(clients)
    }

    async fn update_client(&mut self, client: &OAuthClient) -> StoreResult<bool> {
        match self.tables().clients.get_mut(&client.client_id) {
            Some(existing) => {
                *existing = client.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_client(&mut self, client_id: &str) -> StoreResult<bool> {
        let tables = self.tables();
        if tables.clients.remove(client_id).is_none() {
            return Ok(false);
        }
        let orphaned: Vec<RefreshToken> = tables
            .refresh_tokens
            .values()
            .filter(|t| t.client_id == client_id)
            .cloned()
            .collect();
        for token in orphaned {
            tables.refresh_tokens.remove(&token.id);
            tables.token_ids_by_hash.remove(&token.token_hash);
        }
        Ok(true)
    }

    async fn insert_refresh_token(&mut self, token: &RefreshToken) -> StoreResult<()> {
        let tables = self.tables();
        if tables.token_ids_by_hash.contains_key(&token.token_hash) {
            return Err(StoreError::Conflict("refresh_tokens_token_hash_key".to_string()));
        }
        tables
            .token_ids_by_hash
            .insert(token.token_hash.clone(), token.id);
        tables.refresh_tokens.insert(token.id, token.clone());
        Ok(())
    }

    async fn find_refresh_token(&mut self, fingerprint: &str) -> StoreResult<Option<RefreshToken>> {
        let tables = self.tables();
        Ok(tables
            .token_ids_by_hash
            .get(fingerprint)
            .and_then(|id| tables.refresh_tokens.get(id))
            .cloned())
    }

    async fn find_valid_refresh_token(
        &mut self,
        fingerprint: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<RefreshToken>> {
        Ok(self
            .find_refresh_token(fingerprint)
            .await?
            .filter(|t| t.is_valid_at(now)))
    }

    async fn touch_refresh_token(
        &mut self,
        token_id: Uuid,
        used_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        if let Some(token) = self.tables().refresh_tokens.get_mut(&token_id) {
            token.last_used_at = Some(used_at);
        }
        Ok(())
    }

    async fn revoke_refresh_token(&mut self, token_id: Uuid) -> StoreResult<()> {
        if let Some(token) = self.tables().refresh_tokens.get_mut(&token_id) {
            token.is_revoked = true;
        }
        Ok(())
    }

    async fn revoke_refresh_tokens_for_user(&mut self, user_id: Uuid) -> StoreResult<u64> {
        let mut revoked = 0;
        for token in self.tables().refresh_tokens.values_mut() {
            if token.user_id == user_id && !token.is_revoked {
                token.is_revoked = true;
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn revoke_refresh_tokens_for_client(
        &mut self,
        user_id: Uuid,
        client_id: &str,
    ) -> StoreResult<u64> {
        let mut revoked = 0;
        for token in self.tables().refresh_tokens.values_mut() {
            if token.user_id == user_id && token.client_id == client_id && !token.is_revoked {
                token.is_revoked = true;
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn count_active_refresh_tokens(
        &mut self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<i64> {
        Ok(self
            .tables()
            .refresh_tokens
            .values()
            .filter(|t| t.user_id == user_id && t.is_valid_at(now))
            .count() as i64)
    }

    async fn purge_refresh_tokens(&mut self, now: DateTime<Utc>) -> StoreResult<u64> {
        let tables = self.tables();
        let stale: Vec<RefreshToken> = tables
            .refresh_tokens
            .values()
            .filter(|t| !t.is_valid_at(now))
            .cloned()
            .collect();
        for token in &stale {
            tables.refresh_tokens.remove(&token.id);
            tables.token_ids_by_hash.remove(&token.token_hash);
        }
        Ok(stale.len() as u64)
    }

    async fn insert_login_attempt(&mut self, attempt: &LoginAttempt) -> StoreResult<()> {
        self.tables().login_attempts.push(attempt.clone());
        Ok(())
    }

    async fn count_failed_attempts_since(
        &mut self,
        email: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<i64> {
        Ok(self
            .tables()
            .login_attempts
            .iter()
            .filter(|a| a.email == email && !a.success && a.attempted_at >= since)
            .count() as i64)
    }

    async fn has_role(&mut self, user_id: Uuid, role: &str) -> StoreResult<bool> {
        Ok(self
            .tables()
            .roles
            .get(&user_id)
            .is_some_and(|roles| roles.contains(role)))
    }

    async fn grant_role(&mut self, user_id: Uuid, role: &str) -> StoreResult<()> {
        self.tables()
            .roles
            .entry(user_id)
            .or_default()
            .insert(role.to_string());
        Ok(())
    }

    async fn revoke_role(&mut self, user_id: Uuid, role: &str) -> StoreResult<bool> {
        Ok(self
            .tables()
            .roles
            .get_mut(&user_id)
            .is_some_and(|roles| roles.remove(role)))
    }

    async fn role_names(&mut self, user_id: Uuid) -> StoreResult<Vec<String>> {
        Ok(self
            .tables()
            .roles
            .get(&user_id)
            .map(|roles| roles.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let mut tx = self;
        tx.snapshot = None;
        Ok(())
    }
}
