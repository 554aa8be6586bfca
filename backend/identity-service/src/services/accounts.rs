/// Local account lifecycle: registration, email verification, password reset,
/// role management and deactivation
///
/// Verification and reset tokens are opaque random values mailed to the user;
/// the user row only keeps their fingerprint.
use chrono::{Duration, Utc};
use crypto_core::{generate_opaque_token, TokenFingerprinter};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::config::AccountSettings;
use crate::error::{IdentityError, Result};
use crate::models::{normalize_email, AuditEventType, RequestContext, User, DEFAULT_ROLE};
use crate::security::hash_password;
use crate::services::audit::AuditLogger;
use crate::services::authentication::{finish, surface};
use crate::services::email::Notifier;
use crate::store::{IdentityStore, StoreTx};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct Registration {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 8, max = 128))]
    pub password: String,
    #[validate(length(max = 100))]
    pub first_name: Option<String>,
    #[validate(length(max = 100))]
    pub last_name: Option<String>,
}

#[derive(Clone)]
pub struct AccountService {
    store: Arc<dyn IdentityStore>,
    fingerprinter: Arc<TokenFingerprinter>,
    notifier: Arc<dyn Notifier>,
    audit: AuditLogger,
    verification_ttl: Duration,
    reset_ttl: Duration,
}

impl AccountService {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        fingerprinter: Arc<TokenFingerprinter>,
        notifier: Arc<dyn Notifier>,
        audit: AuditLogger,
        settings: &AccountSettings,
    ) -> Self {
        Self {
            store,
            fingerprinter,
            notifier,
            audit,
            verification_ttl: Duration::hours(settings.verification_token_ttl_hours),
            reset_ttl: Duration::minutes(settings.password_reset_token_ttl_minutes),
        }
    }

    /// Create an unverified local account holding the default role and mail
    /// the verification link.
    pub async fn register(&self, registration: Registration, ctx: &RequestContext) -> Result<User> {
        registration.validate()?;

        let password_hash = hash_password(&registration.password)?;
        let raw_token = generate_opaque_token();
        let now = Utc::now();

        let mut user = User::new(&registration.email);
        user.password_hash = Some(password_hash);
        user.first_name = registration.first_name.filter(|s| !s.trim().is_empty());
        user.last_name = registration.last_name.filter(|s| !s.trim().is_empty());
        user.verification_token = Some(self.fingerprinter.fingerprint(&raw_token));
        user.verification_token_expires_at = Some(now + self.verification_ttl);

        let mut tx = self.store.begin().await?;
        let outcome = Self::insert_registered(tx.as_mut(), &user).await;
        finish(tx, outcome).await.map_err(|e| match e {
            IdentityError::StorageConflict => IdentityError::EmailAlreadyExists,
            other => other,
        })?;

        if let Err(e) = self
            .notifier
            .send_verification_email(&user.email, &raw_token)
            .await
        {
            warn!(user_id = %user.id, error = %e, "Failed to send verification email");
        }

        self.audit
            .log_event(
                Some(user.id),
                AuditEventType::Registration,
                "User registered",
                ctx,
            )
            .await;
        info!(user_id = %user.id, "User registered successfully");
        Ok(user)
    }

    async fn insert_registered(tx: &mut dyn StoreTx, user: &User) -> Result<()> {
        if tx.find_user_by_email(&user.email).await?.is_some() {
            return Err(IdentityError::EmailAlreadyExists);
        }
        tx.insert_user(user).await?;
        tx.grant_role(user.id, DEFAULT_ROLE).await?;
        Ok(())
    }

    /// Returns `false` for unknown or expired tokens.
    pub async fn verify_email(&self, raw_token: &str) -> Result<bool> {
        let fingerprint = self.fingerprinter.fingerprint(raw_token);
        let mut tx = self.store.begin().await?;
        let outcome = Self::apply_verification(tx.as_mut(), &fingerprint).await;
        let verified = finish(tx, outcome).await.map_err(surface)?;

        if let Some(user_id) = verified {
            self.audit
                .log_event(
                    Some(user_id),
                    AuditEventType::EmailVerification,
                    "Email verified",
                    &RequestContext::default(),
                )
                .await;
            info!(user_id = %user_id, "Email verified");
        }
        Ok(verified.is_some())
    }

    async fn apply_verification(tx: &mut dyn StoreTx, fingerprint: &str) -> Result<Option<Uuid>> {
        let now = Utc::now();
        let Some(mut user) = tx.find_user_by_verification_token(fingerprint).await? else {
            return Ok(None);
        };
        if user.verification_token_expires_at.map_or(true, |at| at <= now) {
            return Ok(None);
        }

        user.email_verified = true;
        user.verification_token = None;
        user.verification_token_expires_at = None;
        user.updated_at = now;
        tx.update_user(&user).await?;
        Ok(Some(user.id))
    }

    /// Start a password reset. Succeeds whether or not the email is known.
    pub async fn initiate_password_reset(&self, email: &str, ctx: &RequestContext) -> Result<()> {
        let email = normalize_email(email);
        let raw_token = generate_opaque_token();
        let fingerprint = self.fingerprinter.fingerprint(&raw_token);
        let expires_at = Utc::now() + self.reset_ttl;

        let mut tx = self.store.begin().await?;
        let outcome = Self::store_reset_token(tx.as_mut(), &email, fingerprint, expires_at).await;
        let Some(user_id) = finish(tx, outcome).await.map_err(surface)? else {
            warn!("Password reset requested for unknown email");
            return Ok(());
        };

        if let Err(e) = self
            .notifier
            .send_password_reset_email(&email, &raw_token)
            .await
        {
            warn!(user_id = %user_id, error = %e, "Failed to send password reset email");
        }

        self.audit
            .log_event(
                Some(user_id),
                AuditEventType::PasswordResetRequest,
                "Password reset requested",
                ctx,
            )
            .await;
        Ok(())
    }

    async fn store_reset_token(
        tx: &mut dyn StoreTx,
        email: &str,
        fingerprint: String,
        expires_at: chrono::DateTime<Utc>,
    ) -> Result<Option<Uuid>> {
        let Some(mut user) = tx.find_user_by_email(email).await? else {
            return Ok(None);
        };
        user.password_reset_token = Some(fingerprint);
        user.password_reset_expires_at = Some(expires_at);
        user.updated_at = Utc::now();
        tx.update_user(&user).await?;
        Ok(Some(user.id))
    }

    /// Set a new password from a reset token and revoke every refresh token
    /// the user holds. Returns `false` for unknown or expired tokens.
    pub async fn reset_password(&self, raw_token: &str, new_password: &str) -> Result<bool> {
        if new_password.len() < 8 {
            return Err(IdentityError::Validation(
                "password must be at least 8 characters".to_string(),
            ));
        }

        let fingerprint = self.fingerprinter.fingerprint(raw_token);
        let password_hash = hash_password(new_password)?;

        let mut tx = self.store.begin().await?;
        let outcome = Self::apply_reset(tx.as_mut(), &fingerprint, password_hash).await;
        let reset = finish(tx, outcome).await.map_err(surface)?;

        if let Some(user_id) = reset {
            self.audit
                .log_event(
                    Some(user_id),
                    AuditEventType::PasswordReset,
                    "Password reset successfully",
                    &RequestContext::default(),
                )
                .await;
            info!(user_id = %user_id, "Password reset completed");
        }
        Ok(reset.is_some())
    }

    async fn apply_reset(
        tx: &mut dyn StoreTx,
        fingerprint: &str,
        password_hash: String,
    ) -> Result<Option<Uuid>> {
        let now = Utc::now();
        let Some(mut user) = tx.find_user_by_reset_token(fingerprint).await? else {
            return Ok(None);
        };
        if user.password_reset_expires_at.map_or(true, |at| at <= now) {
            return Ok(None);
        }

        user.password_hash = Some(password_hash);
        user.password_reset_token = None;
        user.password_reset_expires_at = None;
        user.updated_at = now;
        tx.update_user(&user).await?;
        tx.revoke_refresh_tokens_for_user(user.id).await?;
        Ok(Some(user.id))
    }

    pub async fn get_user(&self, user_id: Uuid) -> Result<User> {
        let mut tx = self.store.begin().await?;
        let outcome = tx
            .find_user_by_id(user_id)
            .await
            .map_err(IdentityError::from)
            .and_then(|user| user.ok_or(IdentityError::UserNotFound));
        finish(tx, outcome).await.map_err(surface)
    }

    // ========================================================================
    // Roles
    // ========================================================================

    /// Idempotent; fails with `UserNotFound` for unknown users.
    pub async fn grant_role(&self, user_id: Uuid, role: &str) -> Result<()> {
        let role = Self::role_name(role)?;
        let mut tx = self.store.begin().await?;
        let outcome = Self::grant_in(tx.as_mut(), user_id, &role).await;
        let added = finish(tx, outcome).await.map_err(surface)?;

        if added {
            self.audit
                .log_event(
                    Some(user_id),
                    AuditEventType::RoleChange,
                    format!("Role {} granted", role),
                    &RequestContext::default(),
                )
                .await;
            info!(user_id = %user_id, role = %role, "Role granted");
        }
        Ok(())
    }

    async fn grant_in(tx: &mut dyn StoreTx, user_id: Uuid, role: &str) -> Result<bool> {
        if tx.find_user_by_id(user_id).await?.is_none() {
            return Err(IdentityError::UserNotFound);
        }
        if tx.has_role(user_id, role).await? {
            return Ok(false);
        }
        tx.grant_role(user_id, role).await?;
        Ok(true)
    }

    /// Returns whether the role was held.
    pub async fn revoke_role(&self, user_id: Uuid, role: &str) -> Result<bool> {
        let role = Self::role_name(role)?;
        let mut tx = self.store.begin().await?;
        let outcome = tx.revoke_role(user_id, &role).await.map_err(IdentityError::from);
        let removed = finish(tx, outcome).await.map_err(surface)?;

        if removed {
            self.audit
                .log_event(
                    Some(user_id),
                    AuditEventType::RoleChange,
                    format!("Role {} revoked", role),
                    &RequestContext::default(),
                )
                .await;
            info!(user_id = %user_id, role = %role, "Role revoked");
        }
        Ok(removed)
    }

    pub async fn user_roles(&self, user_id: Uuid) -> Result<Vec<String>> {
        let mut tx = self.store.begin().await?;
        let outcome = tx.role_names(user_id).await.map_err(IdentityError::from);
        finish(tx, outcome).await.map_err(surface)
    }

    fn role_name(role: &str) -> Result<String> {
        let role = role.trim().to_uppercase();
        if role.is_empty() {
            return Err(IdentityError::Validation("role name must not be empty".to_string()));
        }
        Ok(role)
    }

    /// Mark the account inactive. Outstanding refresh tokens are revoked the
    /// next time they are presented.
    pub async fn deactivate(&self, user_id: Uuid, ctx: &RequestContext) -> Result<()> {
        let mut tx = self.store.begin().await?;
        let outcome = Self::deactivate_in(tx.as_mut(), user_id).await;
        finish(tx, outcome).await.map_err(surface)?;

        self.audit
            .log_event(
                Some(user_id),
                AuditEventType::AccountDeactivation,
                "Account deactivated",
                ctx,
            )
            .await;
        info!(user_id = %user_id, "Account deactivated");
        Ok(())
    }

    async fn deactivate_in(tx: &mut dyn StoreTx, user_id: Uuid) -> Result<()> {
        let mut user = tx
            .find_user_by_id(user_id)
            .await?
            .ok_or(IdentityError::UserNotFound)?;
        user.is_active = false;
        user.updated_at = Utc::now();
        tx.update_user(&user).await?;
        Ok(())
    }
}

impl std::fmt::Debug for AccountService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountService")
            .field("verification_ttl", &self.verification_ttl)
            .field("reset_ttl", &self.reset_ttl)
            .finish_non_exhaustive()
    }
}
