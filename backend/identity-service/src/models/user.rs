use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::oauth::{FederatedIdentity, OAuthProvider};

/// Role every registered or federated user holds
pub const DEFAULT_ROLE: &str = "USER";

/// Canonical form used for every email lookup and lockout count.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// User model - core identity entity
///
/// Roles live in their own table and are read through the store, never cached
/// on the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    /// `None` for federation-only accounts
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email_verified: bool,
    /// Fingerprint of the outstanding email verification token
    #[serde(skip)]
    pub verification_token: Option<String>,
    pub verification_token_expires_at: Option<DateTime<Utc>>,
    /// Fingerprint of the outstanding password reset token
    #[serde(skip)]
    pub password_reset_token: Option<String>,
    pub password_reset_expires_at: Option<DateTime<Utc>>,
    pub profile_picture_url: Option<String>,
    pub is_active: bool,
    pub identities: Vec<FederatedIdentity>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl User {
    /// Fresh, active, unverified user with no credentials
    pub fn new(email: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            email: normalize_email(email),
            password_hash: None,
            first_name: None,
            last_name: None,
            email_verified: false,
            verification_token: None,
            verification_token_expires_at: None,
            password_reset_token: None,
            password_reset_expires_at: None,
            profile_picture_url: None,
            is_active: true,
            identities: Vec::new(),
            created_at: now,
            updated_at: now,
            last_login_at: None,
        }
    }

    /// "first last" trimmed, or the email when neither name is known
    pub fn full_name(&self) -> String {
        if self.first_name.is_none() && self.last_name.is_none() {
            return self.email.clone();
        }
        format!(
            "{} {}",
            self.first_name.as_deref().unwrap_or(""),
            self.last_name.as_deref().unwrap_or("")
        )
        .trim()
        .to_string()
    }

    pub fn external_id(&self, provider: OAuthProvider) -> Option<&str> {
        self.identities
            .iter()
            .find(|identity| identity.provider == provider)
            .map(|identity| identity.external_id.as_str())
    }
}
