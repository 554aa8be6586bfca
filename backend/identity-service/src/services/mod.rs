/// Service layer for identity-service
///
/// - AuthenticationEngine: password, federated and provider-code login,
///   refresh and logout
/// - AccountService: registration, email verification, password reset, roles
/// - ClientRegistry: OAuth client registration and credential checks
/// - FederationLinker: provider profile to local user mapping
/// - RefreshTokenStore: opaque refresh token lifecycle
/// - Notifier / AuditLogger / ProviderRegistry: outbound collaborators
pub mod accounts;
pub mod audit;
pub mod authentication;
pub mod clients;
pub mod email;
pub mod federation;
pub mod providers;
pub mod refresh_tokens;

pub use accounts::{AccountService, Registration};
pub use audit::{AuditLogger, AuditSink, MemoryAuditSink, TracingAuditSink};
pub use authentication::{AuthResult, AuthenticationEngine, RefreshResult};
pub use clients::{ClientRegistry, ClientUpdate, NewClient, RegisteredClient};
pub use email::{NotificationKind, Notifier, RecordingNotifier, SmtpNotifier};
pub use federation::FederationLinker;
pub use providers::{GoogleClient, IdentityProviderClient, LinkedInClient, ProviderRegistry};
pub use refresh_tokens::RefreshTokenStore;

use chrono::Duration;
use crypto_core::TokenFingerprinter;
use std::sync::Arc;

use crate::config::{AccountSettings, LockoutSettings, RefreshTokenSettings};
use crate::security::{LockoutPolicy, TokenService};
use crate::store::IdentityStore;

/// Collaborators and settings the core is assembled from
pub struct CoreDependencies {
    pub store: Arc<dyn IdentityStore>,
    pub tokens: Arc<TokenService>,
    pub fingerprinter: Arc<TokenFingerprinter>,
    pub notifier: Arc<dyn Notifier>,
    pub audit_sink: Arc<dyn AuditSink>,
    pub providers: ProviderRegistry,
    pub lockout: LockoutSettings,
    pub refresh_token: RefreshTokenSettings,
    pub account: AccountSettings,
}

/// Fully wired identity core
#[derive(Clone, Debug)]
pub struct IdentityCore {
    pub engine: AuthenticationEngine,
    pub accounts: AccountService,
    pub clients: ClientRegistry,
    pub tokens: Arc<TokenService>,
}

impl IdentityCore {
    pub fn new(deps: CoreDependencies) -> Self {
        let audit = AuditLogger::new(deps.audit_sink);
        let refresh_tokens = RefreshTokenStore::new(
            Arc::clone(&deps.fingerprinter),
            Duration::seconds(deps.refresh_token.ttl_secs),
        );

        let engine = AuthenticationEngine::new(
            Arc::clone(&deps.store),
            LockoutPolicy::from_settings(&deps.lockout),
            Arc::clone(&deps.tokens),
            refresh_tokens,
            audit.clone(),
            deps.providers,
        );
        let accounts = AccountService::new(
            Arc::clone(&deps.store),
            deps.fingerprinter,
            deps.notifier,
            audit.clone(),
            &deps.account,
        );
        let clients = ClientRegistry::new(deps.store, audit);

        Self {
            engine,
            accounts,
            clients,
            tokens: deps.tokens,
        }
    }
}
