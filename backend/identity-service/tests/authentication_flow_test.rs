// Integration tests for the authentication engine
//
// Exercises the full core against the in-memory store:
// - Password login, lockout and anti-enumeration
// - Refresh token reuse, client binding and revocation
// - Federated login, account linking and concurrent callbacks
// - Provider authorization-code flow with a mocked provider

mod common;

use async_trait::async_trait;
use common::*;
use identity_service::models::{
    AuditEventType, FederatedIdentity, FederatedProfile, OAuthProvider, RequestContext, User,
    DEFAULT_ROLE,
};
use identity_service::services::{IdentityProviderClient, ProviderRegistry};
use identity_service::IdentityError;
use mockall::mock;
use std::sync::Arc;

fn ctx() -> RequestContext {
    RequestContext::new(Some("198.51.100.4"), Some("integration-test"))
}

// ============================================================================
// Password login
// ============================================================================

#[tokio::test]
async fn test_password_login_issues_tokens() {
    let t = harness().await;
    let user = seed_user(&t.store, "ada@example.com", "correct-horse", true).await;

    let result = t
        .core
        .engine
        .authenticate_with_password("Ada@Example.com", "correct-horse", CLIENT_ID, &ctx())
        .await
        .unwrap();

    assert_eq!(result.user.id, user.id);
    assert_eq!(result.token_type, "Bearer");
    assert_eq!(result.expires_in, 900);
    assert_eq!(result.refresh_token.len(), 43);

    let claims = t.core.tokens.validate(&result.access_token).unwrap();
    assert_eq!(claims.sub, user.id.to_string());
    assert_eq!(claims.client_id, CLIENT_ID);
    assert_eq!(claims.roles(), [DEFAULT_ROLE.to_string()]);
    assert!(t.core.tokens.is_access_token(&result.access_token));

    let stored = stored_user(&t.store, user.id).await.unwrap();
    assert!(stored.last_login_at.is_some());

    let logins = t.audit.events_of(AuditEventType::Login);
    assert_eq!(logins.len(), 1);
    assert_eq!(logins[0].ip_address.as_deref(), Some("198.51.100.4"));
}

#[tokio::test]
async fn test_lockout_rejects_correct_password() {
    let t = harness().await;
    seed_user(&t.store, "locked@example.com", "correct-horse", true).await;
    let engine = &t.core.engine;

    for _ in 0..5 {
        let err = engine
            .authenticate_with_password("locked@example.com", "wrong", CLIENT_ID, &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::InvalidCredentials));
    }

    let err = engine
        .authenticate_with_password("locked@example.com", "correct-horse", CLIENT_ID, &ctx())
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::AccountLocked));

    // Case variations hit the same counter
    let err = engine
        .authenticate_with_password("LOCKED@example.com", "correct-horse", CLIENT_ID, &ctx())
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::AccountLocked));
    assert!(t.audit.events_of(AuditEventType::Login).is_empty());
}

#[tokio::test]
async fn test_unknown_email_and_wrong_password_are_indistinguishable() {
    let t = harness().await;
    seed_user(&t.store, "known@example.com", "correct-horse", true).await;

    let unknown = t
        .core
        .engine
        .authenticate_with_password("nobody@example.com", "whatever", CLIENT_ID, &ctx())
        .await
        .unwrap_err();
    let wrong = t
        .core
        .engine
        .authenticate_with_password("known@example.com", "whatever", CLIENT_ID, &ctx())
        .await
        .unwrap_err();

    assert!(matches!(unknown, IdentityError::InvalidCredentials));
    assert!(matches!(wrong, IdentityError::InvalidCredentials));
    assert_eq!(unknown.public_message(), wrong.public_message());
}

#[tokio::test]
async fn test_unverified_email_is_rejected() {
    let t = harness().await;
    seed_user(&t.store, "a@x.com", "pw1", false).await;

    let err = t
        .core
        .engine
        .authenticate_with_password("a@x.com", "pw1", CLIENT_ID, &ctx())
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::EmailNotVerified));
}

#[tokio::test]
async fn test_invalid_and_inactive_clients_are_rejected() {
    let t = harness().await;
    seed_user(&t.store, "ada@example.com", "correct-horse", true).await;

    for client in ["no-such-client", INACTIVE_CLIENT_ID] {
        let err = t
            .core
            .engine
            .authenticate_with_password("ada@example.com", "correct-horse", client, &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::InvalidClient));
    }
}

#[tokio::test]
async fn test_deactivated_account_cannot_log_in() {
    let t = harness().await;
    let user = seed_user(&t.store, "gone@example.com", "correct-horse", true).await;
    t.core.accounts.deactivate(user.id, &ctx()).await.unwrap();

    let err = t
        .core
        .engine
        .authenticate_with_password("gone@example.com", "correct-horse", CLIENT_ID, &ctx())
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::AccountDeactivated));
}

#[tokio::test]
async fn test_federation_only_account_has_no_password() {
    let t = harness().await;
    t.core
        .engine
        .authenticate_federated(&google_profile("g1", "fed@example.com"), CLIENT_ID, &ctx())
        .await
        .unwrap();

    let err = t
        .core
        .engine
        .authenticate_with_password("fed@example.com", "", CLIENT_ID, &ctx())
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::InvalidCredentials));
}

// ============================================================================
// Refresh and logout
// ============================================================================

#[tokio::test]
async fn test_refresh_token_is_multi_use_until_logout() {
    let t = harness().await;
    let user = seed_user(&t.store, "ada@example.com", "correct-horse", true).await;
    let engine = &t.core.engine;
    let login = engine
        .authenticate_with_password("ada@example.com", "correct-horse", CLIENT_ID, &ctx())
        .await
        .unwrap();

    for _ in 0..3 {
        let refreshed = engine.refresh(&login.refresh_token, CLIENT_ID).await.unwrap();
        assert_eq!(
            t.core.tokens.user_id_from_token(&refreshed.access_token).unwrap(),
            user.id
        );
    }
    assert_eq!(t.audit.events_of(AuditEventType::TokenRefresh).len(), 3);

    engine
        .logout(Some(&login.refresh_token), Some(user.id))
        .await
        .unwrap();
    let err = engine.refresh(&login.refresh_token, CLIENT_ID).await.unwrap_err();
    assert!(matches!(err, IdentityError::InvalidOrExpiredToken));

    // Second logout of the same token is a no-op
    engine
        .logout(Some(&login.refresh_token), Some(user.id))
        .await
        .unwrap();
    engine.logout(Some("never-issued"), None).await.unwrap();
    assert_eq!(t.audit.events_of(AuditEventType::Logout).len(), 2);
}

#[tokio::test]
async fn test_refresh_rejects_other_client_then_succeeds() {
    let t = harness().await;
    seed_user(&t.store, "ada@example.com", "correct-horse", true).await;
    let engine = &t.core.engine;
    let login = engine
        .authenticate_with_password("ada@example.com", "correct-horse", CLIENT_ID, &ctx())
        .await
        .unwrap();

    let err = engine
        .refresh(&login.refresh_token, OTHER_CLIENT_ID)
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::ClientMismatch));

    let refreshed = engine.refresh(&login.refresh_token, CLIENT_ID).await.unwrap();
    assert!(t.core.tokens.is_access_token(&refreshed.access_token));
    engine.refresh(&login.refresh_token, CLIENT_ID).await.unwrap();
}

#[tokio::test]
async fn test_refresh_with_unknown_token_or_client() {
    let t = harness().await;
    let engine = &t.core.engine;

    let err = engine.refresh("made-up-token", CLIENT_ID).await.unwrap_err();
    assert!(matches!(err, IdentityError::InvalidOrExpiredToken));

    let err = engine.refresh("made-up-token", "no-such-client").await.unwrap_err();
    assert!(matches!(err, IdentityError::InvalidClient));
}

#[tokio::test]
async fn test_logout_all_revokes_every_client() {
    let t = harness().await;
    let user = seed_user(&t.store, "ada@example.com", "correct-horse", true).await;
    let engine = &t.core.engine;

    let web = engine
        .authenticate_with_password("ada@example.com", "correct-horse", CLIENT_ID, &ctx())
        .await
        .unwrap();
    let mobile = engine
        .authenticate_with_password("ada@example.com", "correct-horse", OTHER_CLIENT_ID, &ctx())
        .await
        .unwrap();
    assert_eq!(engine.active_session_count(user.id).await.unwrap(), 2);

    assert_eq!(engine.logout_all(user.id).await.unwrap(), 2);

    for (token, client) in [
        (&web.refresh_token, CLIENT_ID),
        (&mobile.refresh_token, OTHER_CLIENT_ID),
    ] {
        let err = engine.refresh(token, client).await.unwrap_err();
        assert!(matches!(err, IdentityError::InvalidOrExpiredToken));
    }
    assert_eq!(engine.active_session_count(user.id).await.unwrap(), 0);
    assert_eq!(t.audit.events_of(AuditEventType::LogoutAll).len(), 1);
    assert_eq!(engine.purge_stale_refresh_tokens().await.unwrap(), 2);
}

#[tokio::test]
async fn test_logout_client_keeps_other_sessions() {
    let t = harness().await;
    let user = seed_user(&t.store, "ada@example.com", "correct-horse", true).await;
    let engine = &t.core.engine;

    let web = engine
        .authenticate_with_password("ada@example.com", "correct-horse", CLIENT_ID, &ctx())
        .await
        .unwrap();
    let mobile = engine
        .authenticate_with_password("ada@example.com", "correct-horse", OTHER_CLIENT_ID, &ctx())
        .await
        .unwrap();

    assert_eq!(engine.logout_client(user.id, CLIENT_ID).await.unwrap(), 1);
    assert!(engine.refresh(&web.refresh_token, CLIENT_ID).await.is_err());
    engine
        .refresh(&mobile.refresh_token, OTHER_CLIENT_ID)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_refresh_for_deactivated_user_revokes_token() {
    let t = harness().await;
    let user = seed_user(&t.store, "ada@example.com", "correct-horse", true).await;
    let engine = &t.core.engine;
    let login = engine
        .authenticate_with_password("ada@example.com", "correct-horse", CLIENT_ID, &ctx())
        .await
        .unwrap();

    t.core.accounts.deactivate(user.id, &ctx()).await.unwrap();

    let err = engine.refresh(&login.refresh_token, CLIENT_ID).await.unwrap_err();
    assert!(matches!(err, IdentityError::AccountDeactivated));

    // The revocation was committed with the failure
    assert_eq!(engine.active_session_count(user.id).await.unwrap(), 0);
    let err = engine.refresh(&login.refresh_token, CLIENT_ID).await.unwrap_err();
    assert!(matches!(err, IdentityError::InvalidOrExpiredToken));
}

// ============================================================================
// Federated login
// ============================================================================

#[tokio::test]
async fn test_federation_creates_then_returns_same_user() {
    let t = harness().await;
    let engine = &t.core.engine;

    let first = engine
        .authenticate_federated(&google_profile("g1", "b@x.com"), CLIENT_ID, &ctx())
        .await
        .unwrap();
    assert!(first.user.email_verified);
    assert_eq!(first.user.email, "b@x.com");

    let second = engine
        .authenticate_federated(&google_profile("g1", "b2@x.com"), CLIENT_ID, &ctx())
        .await
        .unwrap();
    assert_eq!(second.user.id, first.user.id);
    assert_eq!(second.user.email, "b@x.com");
    assert_eq!(t.store.user_count().await, 1);
    assert_eq!(t.audit.events_of(AuditEventType::OauthLogin).len(), 2);

    let claims = t.core.tokens.validate(&second.access_token).unwrap();
    assert_eq!(claims.roles(), [DEFAULT_ROLE.to_string()]);
}

#[tokio::test]
async fn test_federation_links_existing_local_account() {
    let t = harness().await;
    let local = seed_user(&t.store, "b@x.com", "correct-horse", true).await;

    let result = t
        .core
        .engine
        .authenticate_federated(&google_profile("g1", "B@X.com"), CLIENT_ID, &ctx())
        .await
        .unwrap();

    assert_eq!(result.user.id, local.id);
    assert_eq!(result.user.external_id(OAuthProvider::Google), Some("g1"));

    // Password login still works after linking
    t.core
        .engine
        .authenticate_with_password("b@x.com", "correct-horse", CLIENT_ID, &ctx())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_concurrent_federation_yields_one_user() {
    let t = harness().await;
    let engine = &t.core.engine;
    let profile = google_profile("g-concurrent", "c@x.com");

    let (ctx_a, ctx_b) = (ctx(), ctx());
    let (a, b) = tokio::join!(
        engine.authenticate_federated(&profile, CLIENT_ID, &ctx_a),
        engine.authenticate_federated(&profile, OTHER_CLIENT_ID, &ctx_b),
    );

    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.user.id, b.user.id);
    assert_eq!(t.store.user_count().await, 1);
}

#[tokio::test]
async fn test_federation_recovers_from_racing_insert() {
    let t = harness().await;

    // Another callback for the same profile commits between our lookup and insert
    let mut racer = User::new("race@x.com");
    racer.email_verified = true;
    racer.identities.push(FederatedIdentity {
        provider: OAuthProvider::Google,
        external_id: "g-race".to_string(),
    });
    let racer_id = racer.id;
    t.store.stage_concurrent_user(racer).await;

    let result = t
        .core
        .engine
        .authenticate_federated(&google_profile("g-race", "race@x.com"), CLIENT_ID, &ctx())
        .await
        .unwrap();

    assert_eq!(result.user.id, racer_id);
    assert_eq!(t.store.user_count().await, 1);
    assert_eq!(
        t.core.accounts.user_roles(racer_id).await.unwrap(),
        vec![DEFAULT_ROLE.to_string()]
    );
}

#[tokio::test]
async fn test_federation_rejects_invalid_profile_and_client() {
    let t = harness().await;
    let engine = &t.core.engine;

    let mut profile = google_profile("g1", "not-an-email");
    let err = engine
        .authenticate_federated(&profile, CLIENT_ID, &ctx())
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::ProviderProfileInvalid(_)));

    profile.email = "ok@x.com".to_string();
    let err = engine
        .authenticate_federated(&profile, INACTIVE_CLIENT_ID, &ctx())
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::InvalidClient));
    assert_eq!(t.store.user_count().await, 0);
}

#[tokio::test]
async fn test_federation_rejects_deactivated_user() {
    let t = harness().await;
    let engine = &t.core.engine;
    let first = engine
        .authenticate_federated(&google_profile("g1", "b@x.com"), CLIENT_ID, &ctx())
        .await
        .unwrap();
    t.core.accounts.deactivate(first.user.id, &ctx()).await.unwrap();

    let err = engine
        .authenticate_federated(&google_profile("g1", "b@x.com"), CLIENT_ID, &ctx())
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::AccountDeactivated));
}

// ============================================================================
// Provider authorization-code flow
// ============================================================================

mock! {
    pub Provider {}

    #[async_trait]
    impl IdentityProviderClient for Provider {
        fn provider(&self) -> OAuthProvider;
        fn authorization_url(&self, state: &str, redirect_uri: &str) -> String;
        async fn exchange_code(
            &self,
            code: &str,
            redirect_uri: &str,
        ) -> identity_service::Result<FederatedProfile>;
    }
}

fn registry_with(mock: MockProvider) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(mock));
    registry
}

#[tokio::test]
async fn test_provider_code_flow_logs_user_in() {
    let mut provider = MockProvider::new();
    provider.expect_provider().return_const(OAuthProvider::Google);
    provider
        .expect_exchange_code()
        .times(1)
        .returning(|code, _redirect_uri| {
            if code == "auth-code" {
                Ok(google_profile("g-code", "code@x.com"))
            } else {
                Err(IdentityError::ProviderExchangeFailed("invalid_grant".to_string()))
            }
        });

    let t = harness_with_providers(registry_with(provider)).await;
    let result = t
        .core
        .engine
        .authenticate_with_provider_code(
            OAuthProvider::Google,
            "auth-code",
            "https://app.example.com/callback",
            CLIENT_ID,
            &ctx(),
        )
        .await
        .unwrap();

    assert_eq!(result.user.email, "code@x.com");
    assert_eq!(result.user.external_id(OAuthProvider::Google), Some("g-code"));
}

#[tokio::test]
async fn test_provider_code_not_spent_for_invalid_client() {
    let mut provider = MockProvider::new();
    provider.expect_provider().return_const(OAuthProvider::Google);
    provider.expect_exchange_code().never();

    let t = harness_with_providers(registry_with(provider)).await;
    let err = t
        .core
        .engine
        .authenticate_with_provider_code(
            OAuthProvider::Google,
            "auth-code",
            "https://app.example.com/callback",
            "no-such-client",
            &ctx(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::InvalidClient));
}

#[tokio::test]
async fn test_provider_failure_surfaces_typed_error() {
    let mut provider = MockProvider::new();
    provider.expect_provider().return_const(OAuthProvider::Google);
    provider
        .expect_exchange_code()
        .returning(|_, _| Err(IdentityError::ProviderExchangeFailed("timeout".to_string())));

    let t = harness_with_providers(registry_with(provider)).await;
    let err = t
        .core
        .engine
        .authenticate_with_provider_code(
            OAuthProvider::Google,
            "auth-code",
            "https://app.example.com/callback",
            CLIENT_ID,
            &ctx(),
        )
        .await
        .unwrap_err();

    assert!(err.is_client_error());
    assert_eq!(err.public_message(), "Identity provider exchange failed");
    assert_eq!(t.store.user_count().await, 0);
}

#[tokio::test]
async fn test_unconfigured_provider() {
    let t = harness().await;
    let err = t
        .core
        .engine
        .authenticate_with_provider_code(
            OAuthProvider::LinkedIn,
            "code",
            "https://app.example.com/callback",
            CLIENT_ID,
            &ctx(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::ProviderExchangeFailed(_)));
    assert!(t
        .core
        .engine
        .provider_authorization_url(OAuthProvider::LinkedIn, "state", "https://cb")
        .is_err());
}
