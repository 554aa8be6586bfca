/// User role assignments
use sqlx::PgConnection;
use uuid::Uuid;

use crate::store::StoreResult;

pub async fn exists(conn: &mut PgConnection, user_id: Uuid, role: &str) -> StoreResult<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM user_roles WHERE user_id = $1 AND role_name = $2)",
    )
    .bind(user_id)
    .bind(role)
    .fetch_one(conn)
    .await?;

    Ok(exists)
}

pub async fn grant(conn: &mut PgConnection, user_id: Uuid, role: &str) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO user_roles (user_id, role_name)
        VALUES ($1, $2)
        ON CONFLICT (user_id, role_name) DO NOTHING
        "#,
    )
    .bind(user_id)
    .bind(role)
    .execute(conn)
    .await?;

    Ok(())
}

pub async fn revoke(conn: &mut PgConnection, user_id: Uuid, role: &str) -> StoreResult<bool> {
    let result = sqlx::query("DELETE FROM user_roles WHERE user_id = $1 AND role_name = $2")
        .bind(user_id)
        .bind(role)
        .execute(conn)
        .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn names(conn: &mut PgConnection, user_id: Uuid) -> StoreResult<Vec<String>> {
    let names: Vec<String> = sqlx::query_scalar(
        "SELECT role_name FROM user_roles WHERE user_id = $1 ORDER BY role_name",
    )
    .bind(user_id)
    .fetch_all(conn)
    .await?;

    Ok(names)
}
