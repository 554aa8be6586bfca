/// Security primitives for identity-service
///
/// - **password**: Argon2id hashing for user passwords and client secrets
/// - **lockout**: rolling-window failed-login lockout
/// - **tokens**: RS256 access and refresh-claim tokens (via crypto-core)
pub mod lockout;
pub mod password;
pub mod tokens;

pub use lockout::LockoutPolicy;
pub use password::{hash_password, verify_password};
pub use tokens::TokenService;
