/// OAuth client registry database operations
use sqlx::PgConnection;

use crate::models::OAuthClient;
use crate::store::StoreResult;

pub async fn find(conn: &mut PgConnection, client_id: &str) -> StoreResult<Option<OAuthClient>> {
    let client = sqlx::query_as::<_, OAuthClient>("SELECT * FROM oauth_clients WHERE client_id = $1")
        .bind(client_id)
        .fetch_optional(conn)
        .await?;

    Ok(client)
}

pub async fn find_active(
    conn: &mut PgConnection,
    client_id: &str,
) -> StoreResult<Option<OAuthClient>> {
    let client = sqlx::query_as::<_, OAuthClient>(
        "SELECT * FROM oauth_clients WHERE client_id = $1 AND is_active = TRUE",
    )
    .bind(client_id)
    .fetch_optional(conn)
    .await?;

    Ok(client)
}

pub async fn insert(conn: &mut PgConnection, client: &OAuthClient) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO oauth_clients (
            id, client_id, client_secret_hash, client_name,
            redirect_uris, scopes, is_active, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(client.id)
    .bind(&client.client_id)
    .bind(&client.client_secret_hash)
    .bind(&client.client_name)
    .bind(&client.redirect_uris)
    .bind(&client.scopes)
    .bind(client.is_active)
    .bind(client.created_at)
    .bind(client.updated_at)
    .execute(conn)
    .await?;

    Ok(())
}

/// Returns `false` when no such client exists.
pub async fn set_active(conn: &mut PgConnection, client_id: &str, active: bool) -> StoreResult<bool> {
    let result = sqlx::query(
        "UPDATE oauth_clients SET is_active = $2, updated_at = NOW() WHERE client_id = $1",
    )
    .bind(client_id)
    .bind(active)
    .execute(conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn list(conn: &mut PgConnection) -> StoreResult<Vec<OAuthClient>> {
    let clients = sqlx::query_as::<_, OAuthClient>(
        "SELECT * FROM oauth_clients ORDER BY created_at, client_id",
    )
    .fetch_all(conn)
    .await?;

    Ok(clients)
}

pub async fn update(conn: &mut PgConnection, client: &OAuthClient) -> StoreResult<bool> {
    let result = sqlx::query(
        r#"
        UPDATE oauth_clients
        SET client_secret_hash = $2,
            client_name = $3,
            redirect_uris = $4,
            scopes = $5,
            is_active = $6,
            updated_at = $7
        WHERE client_id = $1
        "#,
    )
    .bind(&client.client_id)
    .bind(&client.client_secret_hash)
    .bind(&client.client_name)
    .bind(&client.redirect_uris)
    .bind(&client.scopes)
    .bind(client.is_active)
    .bind(client.updated_at)
    .execute(conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Refresh tokens reference the client row, so they go first.
pub async fn delete(conn: &mut PgConnection, client_id: &str) -> StoreResult<bool> {
    sqlx::query("DELETE FROM refresh_tokens WHERE client_id = $1")
        .bind(client_id)
        .execute(&mut *conn)
        .await?;

    let result = sqlx::query("DELETE FROM oauth_clients WHERE client_id = $1")
        .bind(client_id)
        .execute(conn)
        .await?;

    Ok(result.rows_affected() > 0)
}
