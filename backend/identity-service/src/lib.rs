/// Identity Service Library
///
/// Credential and token lifecycle engine: password login under a rolling
/// lockout, federated login with account linking, RS256 access tokens with
/// JWKS publication, and opaque refresh tokens.
///
/// ## Modules
///
/// - `config`: Service configuration
/// - `db`: PostgreSQL store (sqlx)
/// - `error`: Error types
/// - `http`: Health check and JWKS endpoint
/// - `models`: Data models
/// - `security`: Password hashing, lockout, token issuance
/// - `services`: Authentication engine, accounts, clients, collaborators
/// - `store`: Unit-of-work storage seam and in-memory store
pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod models;
pub mod security;
pub mod services;
pub mod store;

// Re-export commonly used types
pub use error::{IdentityError, Result};
pub use services::{IdentityCore, CoreDependencies};
