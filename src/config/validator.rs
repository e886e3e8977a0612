use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

pub const MIN_JWT_SECRET_LEN: usize = 16;
pub const MAX_TOKEN_TTL_HOURS: u64 = 24 * 366;
pub const MIN_PASSWORD_LEN: usize = 6;
pub const MAX_PASSWORD_LEN: usize = 128;

static USERNAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.-]{3,32}$").expect("username pattern is valid"));

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

/// Returns the reason the username is unacceptable, phrased to follow the field name.
pub fn validate_username(username: &str) -> Result<(), &'static str> {
    if USERNAME_RE.is_match(username) {
        Ok(())
    } else {
        Err("must be 3-32 characters of letters, digits, '_', '.' or '-'")
    }
}

pub fn validate_password(password: &str) -> Result<(), &'static str> {
    let len = password.chars().count();
    if len < MIN_PASSWORD_LEN {
        Err("must be at least 6 characters")
    } else if len > MAX_PASSWORD_LEN {
        Err("must be at most 128 characters")
    } else {
        Ok(())
    }
}
