/// Login, refresh and logout orchestration
///
/// Every public operation runs in exactly one unit of work. Client-facing
/// failures commit what was written before them (login attempts, revocations)
/// so lockout and revocation survive the failed call; internal failures roll
/// the unit of work back. Audit events are emitted only after commit.
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::error::{IdentityError, Result};
use crate::models::{
    normalize_email, AuditEventType, FederatedProfile, OAuthClient, OAuthProvider,
    RequestContext, User,
};
use crate::security::{verify_password, LockoutPolicy, TokenService};
use crate::services::audit::AuditLogger;
use crate::services::federation::FederationLinker;
use crate::services::providers::ProviderRegistry;
use crate::services::refresh_tokens::RefreshTokenStore;
use crate::store::{IdentityStore, StoreTx};

pub const TOKEN_TYPE_BEARER: &str = "Bearer";

/// Tokens handed out by a successful login
#[derive(Debug, Clone, Serialize)]
pub struct AuthResult {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub user: User,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshResult {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

/// Commit on success or client error; roll back on internal error.
pub(crate) async fn finish<T>(tx: Box<dyn StoreTx>, outcome: Result<T>) -> Result<T> {
    match outcome {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) if err.is_client_error() => {
            tx.commit().await?;
            Err(err)
        }
        Err(err) => {
            drop(tx);
            Err(err)
        }
    }
}

/// Conflicts are only expected where a retry handles them.
pub(crate) fn surface(err: IdentityError) -> IdentityError {
    match err {
        IdentityError::StorageConflict => {
            warn!("Unexpected storage conflict");
            IdentityError::Internal("storage conflict".to_string())
        }
        other => other,
    }
}

#[derive(Clone)]
pub struct AuthenticationEngine {
    store: Arc<dyn IdentityStore>,
    lockout: LockoutPolicy,
    tokens: Arc<TokenService>,
    refresh_tokens: RefreshTokenStore,
    federation: FederationLinker,
    audit: AuditLogger,
    providers: ProviderRegistry,
}

impl AuthenticationEngine {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        lockout: LockoutPolicy,
        tokens: Arc<TokenService>,
        refresh_tokens: RefreshTokenStore,
        audit: AuditLogger,
        providers: ProviderRegistry,
    ) -> Self {
        Self {
            store,
            lockout,
            tokens,
            refresh_tokens,
            federation: FederationLinker::new(),
            audit,
            providers,
        }
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    // ========================================================================
    // Password login
    // ========================================================================

    pub async fn authenticate_with_password(
        &self,
        email: &str,
        password: &str,
        client_id: &str,
        ctx: &RequestContext,
    ) -> Result<AuthResult> {
        let email = normalize_email(email);
        let mut tx = self.store.begin().await?;
        let outcome = self
            .password_login(tx.as_mut(), &email, password, client_id, ctx)
            .await;
        let result = finish(tx, outcome).await.map_err(surface)?;

        self.audit
            .log_event(Some(result.user.id), AuditEventType::Login, "Successful login", ctx)
            .await;
        info!(user_id = %result.user.id, client_id, "User authenticated successfully");
        Ok(result)
    }

    async fn password_login(
        &self,
        tx: &mut dyn StoreTx,
        email: &str,
        password: &str,
        client_id: &str,
        ctx: &RequestContext,
    ) -> Result<AuthResult> {
        if self.lockout.is_locked(tx, email).await? {
            self.lockout.record_attempt(tx, email, false, ctx).await?;
            warn!(client_id, "Login rejected: account locked");
            return Err(IdentityError::AccountLocked);
        }

        Self::require_client(tx, client_id).await?;

        let Some(mut user) = tx.find_user_by_email(email).await? else {
            self.lockout.record_attempt(tx, email, false, ctx).await?;
            return Err(IdentityError::InvalidCredentials);
        };

        if !user.is_active {
            self.lockout.record_attempt(tx, email, false, ctx).await?;
            return Err(IdentityError::AccountDeactivated);
        }

        if !user.email_verified {
            self.lockout.record_attempt(tx, email, false, ctx).await?;
            return Err(IdentityError::EmailNotVerified);
        }

        let password_ok = match user.password_hash.as_deref() {
            Some(hash) => verify_password(password, hash)?,
            // Federation-only account
            None => false,
        };
        if !password_ok {
            self.lockout.record_attempt(tx, email, false, ctx).await?;
            return Err(IdentityError::InvalidCredentials);
        }

        self.lockout.record_attempt(tx, email, true, ctx).await?;

        let now = Utc::now();
        user.last_login_at = Some(now);
        user.updated_at = now;
        tx.update_user(&user).await?;

        self.issue_session(tx, user, client_id).await
    }

    // ========================================================================
    // Federated login
    // ========================================================================

    /// Log in with a profile already asserted by an external provider.
    ///
    /// A uniqueness conflict from a concurrent identical call retries the
    /// whole unit of work once; a second conflict is an internal error.
    pub async fn authenticate_federated(
        &self,
        profile: &FederatedProfile,
        client_id: &str,
        ctx: &RequestContext,
    ) -> Result<AuthResult> {
        profile
            .validate()
            .map_err(|e| IdentityError::ProviderProfileInvalid(e.to_string()))?;

        let result = match self.federated_attempt(profile, client_id).await {
            Err(IdentityError::StorageConflict) => {
                debug!(provider = %profile.provider, "Federation raced a concurrent insert; retrying");
                self.federated_attempt(profile, client_id).await
            }
            other => other,
        }
        .map_err(surface)?;

        self.audit
            .log_event(
                Some(result.user.id),
                AuditEventType::OauthLogin,
                format!("Successful {} login", profile.provider),
                ctx,
            )
            .await;
        info!(user_id = %result.user.id, provider = %profile.provider, client_id, "Federated user authenticated");
        Ok(result)
    }

    async fn federated_attempt(
        &self,
        profile: &FederatedProfile,
        client_id: &str,
    ) -> Result<AuthResult> {
        let mut tx = self.store.begin().await?;
        let outcome = self.federated_login(tx.as_mut(), profile, client_id).await;
        finish(tx, outcome).await
    }

    async fn federated_login(
        &self,
        tx: &mut dyn StoreTx,
        profile: &FederatedProfile,
        client_id: &str,
    ) -> Result<AuthResult> {
        Self::require_client(tx, client_id).await?;

        let user = self.federation.link_or_create(tx, profile).await?;
        if !user.is_active {
            return Err(IdentityError::AccountDeactivated);
        }

        self.issue_session(tx, user, client_id).await
    }

    /// Authorization URL for `provider`
    pub fn provider_authorization_url(
        &self,
        provider: OAuthProvider,
        state: &str,
        redirect_uri: &str,
    ) -> Result<String> {
        Ok(self.providers.get(provider)?.authorization_url(state, redirect_uri))
    }

    /// Complete an authorization-code callback from `provider`.
    ///
    /// The client is checked before the code is spent; the provider exchange
    /// runs outside any unit of work.
    pub async fn authenticate_with_provider_code(
        &self,
        provider: OAuthProvider,
        code: &str,
        redirect_uri: &str,
        client_id: &str,
        ctx: &RequestContext,
    ) -> Result<AuthResult> {
        let provider_client = self.providers.get(provider)?;

        {
            let mut tx = self.store.begin().await?;
            Self::require_client(tx.as_mut(), client_id).await?;
        }

        let profile = provider_client.exchange_code(code, redirect_uri).await?;
        self.authenticate_federated(&profile, client_id, ctx).await
    }

    // ========================================================================
    // Refresh
    // ========================================================================

    /// Mint a new access token from an opaque refresh token.
    ///
    /// The refresh token stays valid and is returned to no one; callers keep
    /// using the one they hold.
    pub async fn refresh(&self, raw_refresh_token: &str, client_id: &str) -> Result<RefreshResult> {
        let mut tx = self.store.begin().await?;
        let outcome = self
            .refresh_in(tx.as_mut(), raw_refresh_token, client_id)
            .await;
        let (user_id, result) = finish(tx, outcome).await.map_err(surface)?;

        self.audit
            .log_event(
                Some(user_id),
                AuditEventType::TokenRefresh,
                "Access token refreshed",
                &RequestContext::default(),
            )
            .await;
        debug!(user_id = %user_id, client_id, "Access token refreshed");
        Ok(result)
    }

    async fn refresh_in(
        &self,
        tx: &mut dyn StoreTx,
        raw_refresh_token: &str,
        client_id: &str,
    ) -> Result<(Uuid, RefreshResult)> {
        Self::require_client(tx, client_id).await?;

        let token = self.refresh_tokens.validate(tx, raw_refresh_token).await?;
        if token.client_id != client_id {
            warn!(token_client = %token.client_id, client_id, "Refresh token presented by another client");
            return Err(IdentityError::ClientMismatch);
        }

        let user = tx
            .find_user_by_id(token.user_id)
            .await?
            .ok_or(IdentityError::UserNotFound)?;
        if !user.is_active {
            self.refresh_tokens.revoke(tx, &token).await?;
            info!(user_id = %user.id, "Revoked refresh token of deactivated user");
            return Err(IdentityError::AccountDeactivated);
        }

        self.refresh_tokens.rotate_usage(tx, &token).await?;
        let access_token = self.tokens.issue_access_token(tx, &user, client_id).await?;

        Ok((
            user.id,
            RefreshResult {
                access_token,
                token_type: TOKEN_TYPE_BEARER.to_string(),
                expires_in: self.tokens.access_ttl_secs(),
            },
        ))
    }

    // ========================================================================
    // Logout
    // ========================================================================

    /// Revoke one refresh token. Unknown or already revoked tokens are a no-op.
    pub async fn logout(&self, raw_refresh_token: Option<&str>, user_id: Option<Uuid>) -> Result<()> {
        let mut tx = self.store.begin().await?;
        let outcome = match raw_refresh_token {
            Some(raw) => self.refresh_tokens.revoke_by_raw(tx.as_mut(), raw).await.map(|_| ()),
            None => Ok(()),
        };
        finish(tx, outcome).await.map_err(surface)?;

        if let Some(user_id) = user_id {
            self.audit
                .log_event(
                    Some(user_id),
                    AuditEventType::Logout,
                    "User logged out",
                    &RequestContext::default(),
                )
                .await;
        }
        Ok(())
    }

    /// Revoke every refresh token of `user_id` across all clients.
    pub async fn logout_all(&self, user_id: Uuid) -> Result<u64> {
        let mut tx = self.store.begin().await?;
        let outcome = self.refresh_tokens.revoke_all(tx.as_mut(), user_id).await;
        let revoked = finish(tx, outcome).await.map_err(surface)?;

        self.audit
            .log_event(
                Some(user_id),
                AuditEventType::LogoutAll,
                "All sessions logged out",
                &RequestContext::default(),
            )
            .await;
        info!(user_id = %user_id, revoked, "Logged out all sessions");
        Ok(revoked)
    }

    /// Revoke the refresh tokens `user_id` holds for one client.
    pub async fn logout_client(&self, user_id: Uuid, client_id: &str) -> Result<u64> {
        let mut tx = self.store.begin().await?;
        let outcome = self
            .refresh_tokens
            .revoke_all_for_client(tx.as_mut(), user_id, client_id)
            .await;
        let revoked = finish(tx, outcome).await.map_err(surface)?;

        self.audit
            .log_event(
                Some(user_id),
                AuditEventType::Logout,
                format!("Logged out of client {}", client_id),
                &RequestContext::default(),
            )
            .await;
        Ok(revoked)
    }

    pub async fn active_session_count(&self, user_id: Uuid) -> Result<i64> {
        let mut tx = self.store.begin().await?;
        let outcome = self.refresh_tokens.active_count(tx.as_mut(), user_id).await;
        finish(tx, outcome).await.map_err(surface)
    }

    /// Delete expired and revoked refresh tokens.
    pub async fn purge_stale_refresh_tokens(&self) -> Result<u64> {
        let mut tx = self.store.begin().await?;
        let outcome = self.refresh_tokens.purge(tx.as_mut()).await;
        let purged = finish(tx, outcome).await.map_err(surface)?;
        if purged > 0 {
            info!(purged, "Purged stale refresh tokens");
        }
        Ok(purged)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn require_client(tx: &mut dyn StoreTx, client_id: &str) -> Result<OAuthClient> {
        tx.find_active_client(client_id)
            .await?
            .ok_or(IdentityError::InvalidClient)
    }

    async fn issue_session(
        &self,
        tx: &mut dyn StoreTx,
        user: User,
        client_id: &str,
    ) -> Result<AuthResult> {
        let access_token = self.tokens.issue_access_token(tx, &user, client_id).await?;
        let refresh_token = self.refresh_tokens.issue(tx, user.id, client_id).await?;

        Ok(AuthResult {
            access_token,
            refresh_token,
            token_type: TOKEN_TYPE_BEARER.to_string(),
            expires_in: self.tokens.access_ttl_secs(),
            user,
        })
    }
}

impl std::fmt::Debug for AuthenticationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticationEngine")
            .field("lockout", &self.lockout)
            .field("providers", &self.providers)
            .finish_non_exhaustive()
    }
}
