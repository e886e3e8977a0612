pub use self::password::{hash_password, verify_password};
pub use self::token::TokenIssuer;

pub mod password;
pub mod token;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("password hashing failed: {0}")]
    Hash(String),
    #[error("token encoding failed: {0}")]
    Encode(String),
    #[error("invalid or expired token")]
    InvalidToken,
}
