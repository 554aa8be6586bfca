/// Data models for identity and authentication
pub mod audit;
pub mod client;
pub mod oauth;
pub mod token;
pub mod user;

pub use audit::{AuditEvent, AuditEventType};
pub use client::OAuthClient;
pub use oauth::{FederatedIdentity, FederatedProfile, OAuthProvider};
pub use token::{LoginAttempt, RefreshToken};
pub use user::{normalize_email, User, DEFAULT_ROLE};

/// Caller network metadata recorded with login attempts and audit events
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl RequestContext {
    pub fn new(ip_address: Option<&str>, user_agent: Option<&str>) -> Self {
        Self {
            ip_address: ip_address.map(str::to_string),
            user_agent: user_agent.map(str::to_string),
        }
    }
}
