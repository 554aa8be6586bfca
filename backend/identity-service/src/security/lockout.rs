/// Failed-login lockout over a rolling window
///
/// An email is locked while the number of failed attempts recorded within
/// the last `window` reaches `max_attempts`. Attempts that arrive while
/// locked are recorded as failures too, so sustained guessing keeps the
/// window full.
use chrono::{Duration, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::config::LockoutSettings;
use crate::models::{normalize_email, LoginAttempt, RequestContext};
use crate::store::{StoreResult, StoreTx};

#[derive(Debug, Clone)]
pub struct LockoutPolicy {
    max_attempts: u32,
    window: Duration,
}

impl LockoutPolicy {
    pub fn new(max_attempts: u32, window: Duration) -> Self {
        Self {
            max_attempts,
            window,
        }
    }

    pub fn from_settings(settings: &LockoutSettings) -> Self {
        Self::new(
            settings.max_attempts,
            Duration::minutes(settings.window_minutes),
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub async fn is_locked(&self, tx: &mut dyn StoreTx, email: &str) -> StoreResult<bool> {
        let email = normalize_email(email);
        let since = Utc::now() - self.window;
        let failures = tx.count_failed_attempts_since(&email, since).await?;

        let locked = failures >= i64::from(self.max_attempts);
        if locked {
            debug!(failures, "Login attempts over lockout threshold");
        }
        Ok(locked)
    }

    pub async fn record_attempt(
        &self,
        tx: &mut dyn StoreTx,
        email: &str,
        success: bool,
        ctx: &RequestContext,
    ) -> StoreResult<()> {
        let attempt = LoginAttempt {
            id: Uuid::new_v4(),
            email: normalize_email(email),
            ip_address: ctx.ip_address.clone(),
            user_agent: ctx.user_agent.clone(),
            success,
            attempted_at: Utc::now(),
        };
        tx.insert_login_attempt(&attempt).await
    }
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self::from_settings(&LockoutSettings::default())
    }
}
