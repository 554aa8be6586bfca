/// Login attempt log (append-only)
use chrono::{DateTime, Utc};
use sqlx::PgConnection;

use crate::models::LoginAttempt;
use crate::store::StoreResult;

pub async fn insert(conn: &mut PgConnection, attempt: &LoginAttempt) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO login_attempts (id, email, ip_address, user_agent, success, attempted_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(attempt.id)
    .bind(&attempt.email)
    .bind(&attempt.ip_address)
    .bind(&attempt.user_agent)
    .bind(attempt.success)
    .bind(attempt.attempted_at)
    .execute(conn)
    .await?;

    Ok(())
}

/// Bounded range query served by `idx_login_attempts_email_time`
pub async fn count_failed_since(
    conn: &mut PgConnection,
    email: &str,
    since: DateTime<Utc>,
) -> StoreResult<i64> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM login_attempts
        WHERE email = $1 AND success = FALSE AND attempted_at >= $2
        "#,
    )
    .bind(email)
    .bind(since)
    .fetch_one(conn)
    .await?;

    Ok(count)
}
