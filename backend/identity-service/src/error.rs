use crate::store::StoreError;
use crypto_core::TokenError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, IdentityError>;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Account is temporarily locked due to too many failed login attempts")]
    AccountLocked,

    #[error("Invalid client")]
    InvalidClient,

    /// Same text for unknown email and wrong password.
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account is deactivated")]
    AccountDeactivated,

    #[error("Email address has not been verified")]
    EmailNotVerified,

    #[error("Refresh token was not issued to this client")]
    ClientMismatch,

    #[error("Invalid or expired refresh token")]
    InvalidOrExpiredToken,

    #[error("Token expired")]
    TokenExpired,

    #[error("Malformed token")]
    TokenMalformed,

    #[error("Invalid token signature")]
    TokenInvalidSignature,

    #[error("Unsupported token algorithm")]
    TokenUnsupported,

    #[error("Invalid token")]
    TokenInvalid,

    #[error("Identity provider exchange failed: {0}")]
    ProviderExchangeFailed(String),

    #[error("Identity provider returned an invalid profile: {0}")]
    ProviderProfileInvalid(String),

    #[error("Email already exists")]
    EmailAlreadyExists,

    #[error("User not found")]
    UserNotFound,

    #[error("Validation error: {0}")]
    Validation(String),

    /// Unique-constraint race; retried where idempotency requires it.
    #[error("Storage conflict")]
    StorageConflict,

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IdentityError {
    /// Client errors are safe to report to the caller; everything else is an
    /// internal fault that must be logged and reported generically.
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            IdentityError::StorageConflict | IdentityError::Internal(_)
        )
    }

    /// Message suitable for returning to an untrusted caller
    pub fn public_message(&self) -> String {
        match self {
            IdentityError::ProviderExchangeFailed(_) => {
                "Identity provider exchange failed".to_string()
            }
            IdentityError::ProviderProfileInvalid(_) => {
                "Identity provider returned an invalid profile".to_string()
            }
            // Don't leak internal details
            IdentityError::StorageConflict | IdentityError::Internal(_) => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<StoreError> for IdentityError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(constraint) => {
                tracing::debug!(constraint = %constraint, "Storage uniqueness conflict");
                IdentityError::StorageConflict
            }
            StoreError::Backend(msg) => {
                tracing::error!("Storage error: {}", msg);
                IdentityError::Internal(msg)
            }
        }
    }
}

impl From<TokenError> for IdentityError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => IdentityError::TokenExpired,
            TokenError::Malformed => IdentityError::TokenMalformed,
            TokenError::InvalidSignature => IdentityError::TokenInvalidSignature,
            TokenError::UnsupportedAlgorithm => IdentityError::TokenUnsupported,
            TokenError::Invalid => IdentityError::TokenInvalid,
            TokenError::Signing(msg) => {
                tracing::error!("JWT signing error: {}", msg);
                IdentityError::Internal(msg)
            }
        }
    }
}

impl From<validator::ValidationErrors> for IdentityError {
    fn from(err: validator::ValidationErrors) -> Self {
        IdentityError::Validation(err.to_string())
    }
}
