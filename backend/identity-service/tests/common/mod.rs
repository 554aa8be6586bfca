// Shared harness for identity core integration tests
//
// Wires the full core against the in-memory store, a fixed RSA key, a
// recording notifier and an in-memory audit sink.
#![allow(dead_code)]

use chrono::{Duration, Utc};
use crypto_core::{KeyManager, TokenFingerprinter};
use identity_service::config::{AccountSettings, LockoutSettings, RefreshTokenSettings};
use identity_service::models::{FederatedProfile, OAuthClient, OAuthProvider, User, DEFAULT_ROLE};
use identity_service::security::{hash_password, TokenService};
use identity_service::services::{MemoryAuditSink, ProviderRegistry, RecordingNotifier};
use identity_service::store::{IdentityStore, MemoryStore};
use identity_service::{CoreDependencies, IdentityCore};
use std::sync::Arc;
use uuid::Uuid;

pub const TEST_KEY: &str = include_str!("../fixtures/test_rsa_key.pem");
pub const CLIENT_ID: &str = "web-client";
pub const OTHER_CLIENT_ID: &str = "mobile-client";
pub const INACTIVE_CLIENT_ID: &str = "retired-client";

pub struct TestCore {
    pub core: IdentityCore,
    pub store: MemoryStore,
    pub audit: Arc<MemoryAuditSink>,
    pub notifier: Arc<RecordingNotifier>,
}

pub async fn harness() -> TestCore {
    harness_with_providers(ProviderRegistry::new()).await
}

pub async fn harness_with_providers(providers: ProviderRegistry) -> TestCore {
    let store = MemoryStore::new();
    let audit = Arc::new(MemoryAuditSink::new());
    let notifier = Arc::new(RecordingNotifier::new());

    let keys = Arc::new(KeyManager::from_pem(TEST_KEY).expect("fixture key parses"));
    let tokens = Arc::new(TokenService::new(
        keys,
        "idp-test",
        Duration::minutes(15),
        Duration::days(7),
    ));
    let fingerprinter =
        Arc::new(TokenFingerprinter::new(b"integration-test-key").expect("non-empty key"));

    let core = IdentityCore::new(CoreDependencies {
        store: Arc::new(store.clone()),
        tokens,
        fingerprinter,
        notifier: notifier.clone(),
        audit_sink: audit.clone(),
        providers,
        lockout: LockoutSettings::default(),
        refresh_token: RefreshTokenSettings {
            ttl_secs: 7 * 24 * 3600,
            fingerprint_key: None,
            purge_interval_secs: 3600,
        },
        account: AccountSettings::default(),
    });

    seed_client(&store, CLIENT_ID, true).await;
    seed_client(&store, OTHER_CLIENT_ID, true).await;
    seed_client(&store, INACTIVE_CLIENT_ID, false).await;

    TestCore {
        core,
        store,
        audit,
        notifier,
    }
}

pub async fn seed_client(store: &MemoryStore, client_id: &str, active: bool) {
    let now = Utc::now();
    let client = OAuthClient {
        id: Uuid::new_v4(),
        client_id: client_id.to_string(),
        client_secret_hash: "unused".to_string(),
        client_name: client_id.to_string(),
        redirect_uris: vec!["https://app.example.com/callback".to_string()],
        scopes: vec!["read".to_string()],
        is_active: active,
        created_at: now,
        updated_at: now,
    };
    let mut tx = store.begin().await.expect("begin");
    tx.insert_client(&client).await.expect("insert client");
    tx.commit().await.expect("commit");
}

/// Local user with a password and the default role
pub async fn seed_user(store: &MemoryStore, email: &str, password: &str, verified: bool) -> User {
    let mut user = User::new(email);
    user.password_hash = Some(hash_password(password).expect("hash"));
    user.first_name = Some("Test".to_string());
    user.last_name = Some("User".to_string());
    user.email_verified = verified;

    let mut tx = store.begin().await.expect("begin");
    tx.insert_user(&user).await.expect("insert user");
    tx.grant_role(user.id, DEFAULT_ROLE).await.expect("grant role");
    tx.commit().await.expect("commit");
    user
}

pub async fn stored_user(store: &MemoryStore, user_id: Uuid) -> Option<User> {
    let mut tx = store.begin().await.expect("begin");
    tx.find_user_by_id(user_id).await.expect("find user")
}

pub fn google_profile(external_id: &str, email: &str) -> FederatedProfile {
    FederatedProfile {
        provider: OAuthProvider::Google,
        external_id: external_id.to_string(),
        email: email.to_string(),
        display_name: Some("Bea Example".to_string()),
        picture_url: Some("https://cdn.example.com/bea.png".to_string()),
    }
}
