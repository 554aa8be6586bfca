/// User and federated identity database operations
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use tracing::warn;
use uuid::Uuid;

use crate::models::{FederatedIdentity, OAuthProvider, User};
use crate::store::StoreResult;

/// Row projection of `users`; identities are loaded separately
#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    password_hash: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    email_verified: bool,
    verification_token: Option<String>,
    verification_token_expires_at: Option<DateTime<Utc>>,
    password_reset_token: Option<String>,
    password_reset_expires_at: Option<DateTime<Utc>>,
    profile_picture_url: Option<String>,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_login_at: Option<DateTime<Utc>>,
}

impl UserRow {
    fn into_user(self, identities: Vec<FederatedIdentity>) -> User {
        User {
            id: self.id,
            email: self.email,
            password_hash: self.password_hash,
            first_name: self.first_name,
            last_name: self.last_name,
            email_verified: self.email_verified,
            verification_token: self.verification_token,
            verification_token_expires_at: self.verification_token_expires_at,
            password_reset_token: self.password_reset_token,
            password_reset_expires_at: self.password_reset_expires_at,
            profile_picture_url: self.profile_picture_url,
            is_active: self.is_active,
            identities,
            created_at: self.created_at,
            updated_at: self.updated_at,
            last_login_at: self.last_login_at,
        }
    }
}

const USER_COLUMNS: &str = r#"
    u.id, u.email, u.password_hash, u.first_name, u.last_name, u.email_verified,
    u.verification_token, u.verification_token_expires_at,
    u.password_reset_token, u.password_reset_expires_at,
    u.profile_picture_url, u.is_active, u.created_at, u.updated_at, u.last_login_at
"#;

async fn load_identities(conn: &mut PgConnection, user_id: Uuid) -> StoreResult<Vec<FederatedIdentity>> {
    let rows: Vec<(String, String)> = sqlx::query_as(
        "SELECT provider, external_id FROM user_identities WHERE user_id = $1 ORDER BY created_at",
    )
    .bind(user_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .into_iter()
        .filter_map(|(provider, external_id)| match OAuthProvider::from_str(&provider) {
            Some(provider) => Some(FederatedIdentity {
                provider,
                external_id,
            }),
            None => {
                warn!(user_id = %user_id, provider = %provider, "Ignoring identity for unknown provider");
                None
            }
        })
        .collect())
}

async fn hydrate(conn: &mut PgConnection, row: Option<UserRow>) -> StoreResult<Option<User>> {
    match row {
        Some(row) => {
            let identities = load_identities(conn, row.id).await?;
            Ok(Some(row.into_user(identities)))
        }
        None => Ok(None),
    }
}

/// Find user by email (case-insensitive)
pub async fn find_by_email(conn: &mut PgConnection, email: &str) -> StoreResult<Option<User>> {
    let row = sqlx::query_as::<_, UserRow>(&format!(
        "SELECT {USER_COLUMNS} FROM users u WHERE LOWER(u.email) = LOWER($1)"
    ))
    .bind(email)
    .fetch_optional(&mut *conn)
    .await?;

    hydrate(conn, row).await
}

pub async fn find_by_id(conn: &mut PgConnection, user_id: Uuid) -> StoreResult<Option<User>> {
    let row = sqlx::query_as::<_, UserRow>(&format!(
        "SELECT {USER_COLUMNS} FROM users u WHERE u.id = $1"
    ))
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?;

    hydrate(conn, row).await
}

pub async fn find_by_identity(
    conn: &mut PgConnection,
    provider: OAuthProvider,
    external_id: &str,
) -> StoreResult<Option<User>> {
    let row = sqlx::query_as::<_, UserRow>(&format!(
        r#"
        SELECT {USER_COLUMNS}
        FROM users u
        JOIN user_identities i ON i.user_id = u.id
        WHERE i.provider = $1 AND i.external_id = $2
        "#
    ))
    .bind(provider.as_str())
    .bind(external_id)
    .fetch_optional(&mut *conn)
    .await?;

    hydrate(conn, row).await
}

pub async fn find_by_verification_token(
    conn: &mut PgConnection,
    fingerprint: &str,
) -> StoreResult<Option<User>> {
    let row = sqlx::query_as::<_, UserRow>(&format!(
        "SELECT {USER_COLUMNS} FROM users u WHERE u.verification_token = $1"
    ))
    .bind(fingerprint)
    .fetch_optional(&mut *conn)
    .await?;

    hydrate(conn, row).await
}

pub async fn find_by_reset_token(
    conn: &mut PgConnection,
    fingerprint: &str,
) -> StoreResult<Option<User>> {
    let row = sqlx::query_as::<_, UserRow>(&format!(
        "SELECT {USER_COLUMNS} FROM users u WHERE u.password_reset_token = $1"
    ))
    .bind(fingerprint)
    .fetch_optional(&mut *conn)
    .await?;

    hydrate(conn, row).await
}

/// Insert a user row plus its federated identities
pub async fn insert(conn: &mut PgConnection, user: &User) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO users (
            id, email, password_hash, first_name, last_name, email_verified,
            verification_token, verification_token_expires_at,
            password_reset_token, password_reset_expires_at,
            profile_picture_url, is_active, created_at, updated_at, last_login_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
        "#,
    )
    .bind(user.id)
    .bind(&user.email)
    .bind(&user.password_hash)
    .bind(&user.first_name)
    .bind(&user.last_name)
    .bind(user.email_verified)
    .bind(&user.verification_token)
    .bind(user.verification_token_expires_at)
    .bind(&user.password_reset_token)
    .bind(user.password_reset_expires_at)
    .bind(&user.profile_picture_url)
    .bind(user.is_active)
    .bind(user.created_at)
    .bind(user.updated_at)
    .bind(user.last_login_at)
    .execute(&mut *conn)
    .await?;

    for identity in &user.identities {
        link_identity(conn, user.id, identity).await?;
    }

    Ok(())
}

pub async fn update(conn: &mut PgConnection, user: &User) -> StoreResult<()> {
    sqlx::query(
        r#"
        UPDATE users
        SET email = $2,
            password_hash = $3,
            first_name = $4,
            last_name = $5,
            email_verified = $6,
            verification_token = $7,
            verification_token_expires_at = $8,
            password_reset_token = $9,
            password_reset_expires_at = $10,
            profile_picture_url = $11,
            is_active = $12,
            updated_at = $13,
            last_login_at = $14
        WHERE id = $1
        "#,
    )
    .bind(user.id)
    .bind(&user.email)
    .bind(&user.password_hash)
    .bind(&user.first_name)
    .bind(&user.last_name)
    .bind(user.email_verified)
    .bind(&user.verification_token)
    .bind(user.verification_token_expires_at)
    .bind(&user.password_reset_token)
    .bind(user.password_reset_expires_at)
    .bind(&user.profile_picture_url)
    .bind(user.is_active)
    .bind(user.updated_at)
    .bind(user.last_login_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn link_identity(
    conn: &mut PgConnection,
    user_id: Uuid,
    identity: &FederatedIdentity,
) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO user_identities (user_id, provider, external_id)
        VALUES ($1, $2, $3)
        "#,
    )
    .bind(user_id)
    .bind(identity.provider.as_str())
    .bind(&identity.external_id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}
