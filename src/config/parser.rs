use super::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub uploads: UploadsConfig,
    #[serde(default)]
    pub pagination: PaginationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            cors_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    #[serde(default = "default_token_ttl_hours")]
    pub token_ttl_hours: u64,
    #[serde(default)]
    pub bootstrap_admin: Option<BootstrapAdminConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BootstrapAdminConfig {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub max_connections: Option<u32>,
}

impl DatabaseConfig {
    pub fn for_path(path: impl Into<String>) -> Self {
        Self {
            url: None,
            filename: Some(path.into()),
            max_connections: None,
        }
    }

    pub fn connection_string(&self) -> String {
        if let Some(ref url) = self.url {
            url.clone()
        } else if let Some(ref file) = self.filename {
            format!("sqlite://{}", file)
        } else {
            String::new()
        }
    }

    pub fn sqlite_path(&self) -> String {
        let url = self.connection_string();
        url.strip_prefix("sqlite://").unwrap_or(&url).to_string()
    }

    pub fn max_connections(&self) -> u32 {
        self.max_connections.unwrap_or(4).max(1)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UploadsConfig {
    #[serde(default = "default_upload_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default = "default_max_files")]
    pub max_files: usize,
    /// MIME prefixes such as `image/` or `application/pdf`; empty accepts anything.
    #[serde(default)]
    pub allowed_mime_prefixes: Vec<String>,
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            dir: default_upload_dir(),
            max_file_size: default_max_file_size(),
            max_files: default_max_files(),
            allowed_mime_prefixes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct PaginationConfig {
    #[serde(default = "default_page_limit")]
    pub default_limit: i64,
    #[serde(default = "default_max_page_limit")]
    pub max_limit: i64,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_limit: default_page_limit(),
            max_limit: default_max_page_limit(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(alias = "console", default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("CONFIG_PATH").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("config.yaml"));

        Self::load_from_file(&config_path)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let mut config: Config = serde_yaml::from_str(content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.jwt_secret.len() < super::validator::MIN_JWT_SECRET_LEN {
            return Err(ConfigError::InvalidConfig(format!(
                "auth.jwt_secret must be at least {} characters",
                super::validator::MIN_JWT_SECRET_LEN
            )));
        }

        if self.auth.token_ttl_hours == 0
            || self.auth.token_ttl_hours > super::validator::MAX_TOKEN_TTL_HOURS
        {
            return Err(ConfigError::InvalidConfig(format!(
                "auth.token_ttl_hours must be between 1 and {}",
                super::validator::MAX_TOKEN_TTL_HOURS
            )));
        }

        if let Some(admin) = &self.auth.bootstrap_admin {
            super::validator::validate_username(&admin.username).map_err(|reason| {
                ConfigError::InvalidConfig(format!("auth.bootstrap_admin.username {}", reason))
            })?;
            super::validator::validate_password(&admin.password).map_err(|reason| {
                ConfigError::InvalidConfig(format!("auth.bootstrap_admin.password {}", reason))
            })?;
        }

        if self.database.connection_string().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "database connection string cannot be empty".to_string(),
            ));
        }

        if !self.database.connection_string().starts_with("sqlite://") {
            return Err(ConfigError::InvalidConfig(
                "database.url must use the sqlite:// scheme".to_string(),
            ));
        }

        if self.server.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "server.port must be between 1 and 65535".to_string(),
            ));
        }

        if self.uploads.max_file_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "uploads.max_file_size must be positive".to_string(),
            ));
        }

        if self.uploads.max_files == 0 {
            return Err(ConfigError::InvalidConfig(
                "uploads.max_files must be positive".to_string(),
            ));
        }

        if self.pagination.default_limit < 1
            || self.pagination.max_limit < self.pagination.default_limit
        {
            return Err(ConfigError::InvalidConfig(
                "pagination.default_limit must be between 1 and pagination.max_limit".to_string(),
            ));
        }

        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(ConfigError::InvalidConfig(
                "logging.format must be either pretty or json".to_string(),
            ));
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("SCHOOL_CMS_JWT_SECRET") {
            self.auth.jwt_secret = value;
        }
        if let Ok(value) = std::env::var("SCHOOL_CMS_DATABASE_URL") {
            self.database.url = Some(value);
        }
        if let Some(port) = std::env::var("SCHOOL_CMS_PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
        {
            self.server.port = port;
        }
        if let Ok(value) = std::env::var("SCHOOL_CMS_UPLOAD_DIR") {
            self.uploads.dir = PathBuf::from(value);
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3001
}

fn default_token_ttl_hours() -> u64 {
    24
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_max_file_size() -> u64 {
    50 * 1024 * 1024
}

fn default_max_files() -> usize {
    10
}

fn default_page_limit() -> i64 {
    10
}

fn default_max_page_limit() -> i64 {
    100
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}
