use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kinds of security-relevant events emitted by the core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    Login,
    OauthLogin,
    TokenRefresh,
    Logout,
    LogoutAll,
    Registration,
    PasswordResetRequest,
    PasswordReset,
    EmailVerification,
    RoleChange,
    ClientRegistration,
    ClientUpdate,
    ClientDeletion,
    AccountDeactivation,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::Login => "LOGIN",
            AuditEventType::OauthLogin => "OAUTH_LOGIN",
            AuditEventType::TokenRefresh => "TOKEN_REFRESH",
            AuditEventType::Logout => "LOGOUT",
            AuditEventType::LogoutAll => "LOGOUT_ALL",
            AuditEventType::Registration => "REGISTRATION",
            AuditEventType::PasswordResetRequest => "PASSWORD_RESET_REQUEST",
            AuditEventType::PasswordReset => "PASSWORD_RESET",
            AuditEventType::EmailVerification => "EMAIL_VERIFICATION",
            AuditEventType::RoleChange => "ROLE_CHANGE",
            AuditEventType::ClientRegistration => "CLIENT_REGISTRATION",
            AuditEventType::ClientUpdate => "CLIENT_UPDATE",
            AuditEventType::ClientDeletion => "CLIENT_DELETION",
            AuditEventType::AccountDeactivation => "ACCOUNT_DEACTIVATION",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub user_id: Option<Uuid>,
    pub event_type: AuditEventType,
    pub description: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub occurred_at: DateTime<Utc>,
}
