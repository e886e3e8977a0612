pub use self::parser::{Config, DatabaseConfig, LoggingConfig, PaginationConfig, UploadsConfig};
pub use self::validator::{
    ConfigError, MAX_TOKEN_TTL_HOURS, validate_password, validate_username,
};

mod parser;
mod validator;
