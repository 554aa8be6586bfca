use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Opaque refresh token record; only the fingerprint of the raw value is kept
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct RefreshToken {
    pub id: Uuid,
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub user_id: Uuid,
    /// Public id of the owning OAuth client
    pub client_id: String,
    pub expires_at: DateTime<Utc>,
    pub is_revoked: bool,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl RefreshToken {
    /// Revocation and expiry are independent terminal states.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_revoked && now < self.expires_at
    }
}

/// Append-only login attempt record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct LoginAttempt {
    pub id: Uuid,
    pub email: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub success: bool,
    pub attempted_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn token(expires_in: Duration, revoked: bool) -> RefreshToken {
        let now = Utc::now();
        RefreshToken {
            id: Uuid::new_v4(),
            token_hash: "fp".to_string(),
            user_id: Uuid::new_v4(),
            client_id: "web".to_string(),
            expires_at: now + expires_in,
            is_revoked: revoked,
            last_used_at: None,
            created_at: now,
        }
    }

    #[test]
    fn test_validity() {
        let now = Utc::now();
        assert!(token(Duration::days(7), false).is_valid_at(now));
        assert!(!token(Duration::days(7), true).is_valid_at(now));
        assert!(!token(Duration::seconds(-1), false).is_valid_at(now));
    }

    #[test]
    fn test_expiry_boundary_is_exclusive() {
        let t = token(Duration::days(1), false);
        assert!(!t.is_valid_at(t.expires_at));
    }
}
