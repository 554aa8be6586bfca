/// Refresh token database operations
///
/// Rows are keyed by the token fingerprint; the raw bearer value never reaches
/// the database.
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::models::RefreshToken;
use crate::store::StoreResult;

pub async fn insert(conn: &mut PgConnection, token: &RefreshToken) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO refresh_tokens (
            id, token_hash, user_id, client_id, expires_at, is_revoked, last_used_at, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(token.id)
    .bind(&token.token_hash)
    .bind(token.user_id)
    .bind(&token.client_id)
    .bind(token.expires_at)
    .bind(token.is_revoked)
    .bind(token.last_used_at)
    .bind(token.created_at)
    .execute(conn)
    .await?;

    Ok(())
}

pub async fn find_by_hash(
    conn: &mut PgConnection,
    token_hash: &str,
) -> StoreResult<Option<RefreshToken>> {
    let token =
        sqlx::query_as::<_, RefreshToken>("SELECT * FROM refresh_tokens WHERE token_hash = $1")
            .bind(token_hash)
            .fetch_optional(conn)
            .await?;

    Ok(token)
}

/// Valid = not revoked and not expired. `FOR UPDATE` makes a concurrent
/// revoke wait for this unit of work instead of interleaving with it.
pub async fn find_valid_by_hash(
    conn: &mut PgConnection,
    token_hash: &str,
    now: DateTime<Utc>,
) -> StoreResult<Option<RefreshToken>> {
    let token = sqlx::query_as::<_, RefreshToken>(
        r#"
        SELECT * FROM refresh_tokens
        WHERE token_hash = $1 AND is_revoked = FALSE AND expires_at > $2
        FOR UPDATE
        "#,
    )
    .bind(token_hash)
    .bind(now)
    .fetch_optional(conn)
    .await?;

    Ok(token)
}

pub async fn touch(conn: &mut PgConnection, token_id: Uuid, used_at: DateTime<Utc>) -> StoreResult<()> {
    sqlx::query("UPDATE refresh_tokens SET last_used_at = $2 WHERE id = $1")
        .bind(token_id)
        .bind(used_at)
        .execute(conn)
        .await?;

    Ok(())
}

pub async fn revoke(conn: &mut PgConnection, token_id: Uuid) -> StoreResult<()> {
    sqlx::query("UPDATE refresh_tokens SET is_revoked = TRUE WHERE id = $1")
        .bind(token_id)
        .execute(conn)
        .await?;

    Ok(())
}

pub async fn revoke_all_for_user(conn: &mut PgConnection, user_id: Uuid) -> StoreResult<u64> {
    let result = sqlx::query(
        "UPDATE refresh_tokens SET is_revoked = TRUE WHERE user_id = $1 AND is_revoked = FALSE",
    )
    .bind(user_id)
    .execute(conn)
    .await?;

    Ok(result.rows_affected())
}

pub async fn revoke_all_for_client(
    conn: &mut PgConnection,
    user_id: Uuid,
    client_id: &str,
) -> StoreResult<u64> {
    let result = sqlx::query(
        r#"
        UPDATE refresh_tokens SET is_revoked = TRUE
        WHERE user_id = $1 AND client_id = $2 AND is_revoked = FALSE
        "#,
    )
    .bind(user_id)
    .bind(client_id)
    .execute(conn)
    .await?;

    Ok(result.rows_affected())
}

pub async fn count_active(conn: &mut PgConnection, user_id: Uuid, now: DateTime<Utc>) -> StoreResult<i64> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM refresh_tokens
        WHERE user_id = $1 AND is_revoked = FALSE AND expires_at > $2
        "#,
    )
    .bind(user_id)
    .bind(now)
    .fetch_one(conn)
    .await?;

    Ok(count)
}

pub async fn purge(conn: &mut PgConnection, now: DateTime<Utc>) -> StoreResult<u64> {
    let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at <= $1 OR is_revoked = TRUE")
        .bind(now)
        .execute(conn)
        .await?;

    Ok(result.rows_affected())
}
