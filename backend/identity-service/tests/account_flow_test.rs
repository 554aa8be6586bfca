// Integration tests for account lifecycle flows
//
// - Registration, verification and first login
// - Password reset, including session revocation
// - Role management reflected in issued tokens

mod common;

use common::*;
use identity_service::models::{AuditEventType, RequestContext, DEFAULT_ROLE};
use identity_service::services::{NotificationKind, Registration};
use identity_service::IdentityError;

fn registration(email: &str, password: &str) -> Registration {
    Registration {
        email: email.to_string(),
        password: password.to_string(),
        first_name: Some("Ada".to_string()),
        last_name: Some("Lovelace".to_string()),
    }
}

// ============================================================================
// Registration and verification
// ============================================================================

#[tokio::test]
async fn test_register_verify_then_login() {
    let t = harness().await;
    let ctx = RequestContext::default();

    let user = t
        .core
        .accounts
        .register(registration("Ada@Example.com", "correct-horse"), &ctx)
        .await
        .unwrap();
    assert_eq!(user.email, "ada@example.com");
    assert!(!user.email_verified);
    assert_eq!(
        t.core.accounts.user_roles(user.id).await.unwrap(),
        vec![DEFAULT_ROLE.to_string()]
    );
    assert_eq!(t.audit.events_of(AuditEventType::Registration).len(), 1);

    let err = t
        .core
        .engine
        .authenticate_with_password("ada@example.com", "correct-horse", CLIENT_ID, &ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::EmailNotVerified));

    let token = t
        .notifier
        .last_token(NotificationKind::Verification, "ada@example.com")
        .expect("verification mail sent");

    // Only the fingerprint is stored
    let stored = stored_user(&t.store, user.id).await.unwrap();
    assert_ne!(stored.verification_token.as_deref(), Some(token.as_str()));

    assert!(t.core.accounts.verify_email(&token).await.unwrap());
    assert!(!t.core.accounts.verify_email(&token).await.unwrap());

    let login = t
        .core
        .engine
        .authenticate_with_password("ada@example.com", "correct-horse", CLIENT_ID, &ctx)
        .await
        .unwrap();
    assert!(login.user.email_verified);
    assert_eq!(t.audit.events_of(AuditEventType::EmailVerification).len(), 1);

    let fetched = t.core.accounts.get_user(user.id).await.unwrap();
    assert!(fetched.email_verified);
    assert!(fetched.last_login_at.is_some());
    assert!(matches!(
        t.core.accounts.get_user(uuid::Uuid::new_v4()).await,
        Err(IdentityError::UserNotFound)
    ));
}

#[tokio::test]
async fn test_duplicate_registration_is_rejected() {
    let t = harness().await;
    let ctx = RequestContext::default();
    t.core
        .accounts
        .register(registration("dup@example.com", "correct-horse"), &ctx)
        .await
        .unwrap();

    let err = t
        .core
        .accounts
        .register(registration("DUP@example.com", "another-pass"), &ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::EmailAlreadyExists));
    assert_eq!(t.store.user_count().await, 1);
}

#[tokio::test]
async fn test_registration_validation() {
    let t = harness().await;
    let ctx = RequestContext::default();

    let err = t
        .core
        .accounts
        .register(registration("not-an-email", "correct-horse"), &ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::Validation(_)));

    let err = t
        .core
        .accounts
        .register(registration("short@example.com", "pw1"), &ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::Validation(_)));
    assert_eq!(t.store.user_count().await, 0);
}

#[tokio::test]
async fn test_unknown_verification_token() {
    let t = harness().await;
    assert!(!t.core.accounts.verify_email("nope").await.unwrap());
}

// ============================================================================
// Password reset
// ============================================================================

#[tokio::test]
async fn test_password_reset_replaces_password_and_revokes_sessions() {
    let t = harness().await;
    let ctx = RequestContext::default();
    let user = seed_user(&t.store, "ada@example.com", "old-password", true).await;
    let engine = &t.core.engine;

    let login = engine
        .authenticate_with_password("ada@example.com", "old-password", CLIENT_ID, &ctx)
        .await
        .unwrap();

    t.core
        .accounts
        .initiate_password_reset("ADA@example.com", &ctx)
        .await
        .unwrap();
    let token = t
        .notifier
        .last_token(NotificationKind::PasswordReset, "ada@example.com")
        .expect("reset mail sent");

    assert!(t
        .core
        .accounts
        .reset_password(&token, "new-password")
        .await
        .unwrap());
    assert!(!t
        .core
        .accounts
        .reset_password(&token, "newer-password")
        .await
        .unwrap());

    let err = engine.refresh(&login.refresh_token, CLIENT_ID).await.unwrap_err();
    assert!(matches!(err, IdentityError::InvalidOrExpiredToken));

    let err = engine
        .authenticate_with_password("ada@example.com", "old-password", CLIENT_ID, &ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::InvalidCredentials));
    engine
        .authenticate_with_password("ada@example.com", "new-password", CLIENT_ID, &ctx)
        .await
        .unwrap();

    assert_eq!(t.audit.events_of(AuditEventType::PasswordResetRequest).len(), 1);
    assert_eq!(t.audit.events_of(AuditEventType::PasswordReset).len(), 1);
    assert!(stored_user(&t.store, user.id)
        .await
        .unwrap()
        .password_reset_token
        .is_none());
}

#[tokio::test]
async fn test_password_reset_for_unknown_email_reports_success() {
    let t = harness().await;
    t.core
        .accounts
        .initiate_password_reset("ghost@example.com", &RequestContext::default())
        .await
        .unwrap();

    assert!(t.notifier.sent().is_empty());
    assert!(t.audit.events_of(AuditEventType::PasswordResetRequest).is_empty());
}

#[tokio::test]
async fn test_reset_rejects_short_password() {
    let t = harness().await;
    let err = t
        .core
        .accounts
        .reset_password("any", "short")
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::Validation(_)));
}

// ============================================================================
// Roles
// ============================================================================

#[tokio::test]
async fn test_granted_roles_appear_in_next_access_token() {
    let t = harness().await;
    let ctx = RequestContext::default();
    let user = seed_user(&t.store, "ada@example.com", "correct-horse", true).await;
    let accounts = &t.core.accounts;

    accounts.grant_role(user.id, "admin").await.unwrap();
    accounts.grant_role(user.id, "ADMIN").await.unwrap();
    assert_eq!(t.audit.events_of(AuditEventType::RoleChange).len(), 1);

    let login = t
        .core
        .engine
        .authenticate_with_password("ada@example.com", "correct-horse", CLIENT_ID, &ctx)
        .await
        .unwrap();
    let claims = t.core.tokens.validate(&login.access_token).unwrap();
    assert_eq!(claims.roles(), ["ADMIN".to_string(), "USER".to_string()]);

    assert!(accounts.revoke_role(user.id, "admin").await.unwrap());
    assert!(!accounts.revoke_role(user.id, "admin").await.unwrap());

    let refreshed = t
        .core
        .engine
        .refresh(&login.refresh_token, CLIENT_ID)
        .await
        .unwrap();
    let claims = t.core.tokens.validate(&refreshed.access_token).unwrap();
    assert_eq!(claims.roles(), ["USER".to_string()]);
}

#[tokio::test]
async fn test_role_changes_for_unknown_user() {
    let t = harness().await;
    let err = t
        .core
        .accounts
        .grant_role(uuid::Uuid::new_v4(), "ADMIN")
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::UserNotFound));

    let err = t
        .core
        .accounts
        .grant_role(uuid::Uuid::new_v4(), "  ")
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::Validation(_)));
}

// ============================================================================
// Clients
// ============================================================================

#[tokio::test]
async fn test_registered_client_can_be_used_then_retired() {
    use identity_service::services::NewClient;

    let t = harness().await;
    let ctx = RequestContext::default();
    seed_user(&t.store, "ada@example.com", "correct-horse", true).await;

    let registered = t
        .core
        .clients
        .register(NewClient {
            name: "Partner Portal".to_string(),
            redirect_uris: None,
            scopes: None,
        })
        .await
        .unwrap();
    let client_id = registered.client.client_id.clone();
    assert!(t
        .core
        .clients
        .validate_credentials(&client_id, &registered.client_secret)
        .await
        .unwrap());

    let login = t
        .core
        .engine
        .authenticate_with_password("ada@example.com", "correct-horse", &client_id, &ctx)
        .await
        .unwrap();
    assert_eq!(
        t.core.tokens.client_id_from_token(&login.access_token).unwrap(),
        client_id
    );

    assert!(t.core.clients.set_active(&client_id, false).await.unwrap());
    let err = t
        .core
        .engine
        .authenticate_with_password("ada@example.com", "correct-horse", &client_id, &ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::InvalidClient));
}

#[tokio::test]
async fn test_deleting_client_drops_its_sessions_only() {
    let t = harness().await;
    let ctx = RequestContext::default();
    let user = seed_user(&t.store, "ada@example.com", "correct-horse", true).await;
    let engine = &t.core.engine;

    engine
        .authenticate_with_password("ada@example.com", "correct-horse", CLIENT_ID, &ctx)
        .await
        .unwrap();
    let mobile = engine
        .authenticate_with_password("ada@example.com", "correct-horse", OTHER_CLIENT_ID, &ctx)
        .await
        .unwrap();
    assert_eq!(engine.active_session_count(user.id).await.unwrap(), 2);

    assert!(t.core.clients.delete(CLIENT_ID).await.unwrap());
    assert_eq!(engine.active_session_count(user.id).await.unwrap(), 1);
    assert!(t
        .core
        .clients
        .list()
        .await
        .unwrap()
        .iter()
        .all(|c| c.client_id != CLIENT_ID));

    engine
        .refresh(&mobile.refresh_token, OTHER_CLIENT_ID)
        .await
        .unwrap();
    assert_eq!(t.audit.events_of(AuditEventType::ClientDeletion).len(), 1);
}
