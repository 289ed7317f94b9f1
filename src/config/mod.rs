use std::env;
use std::fmt;
use std::path::PathBuf;

use crate::services::warehouse::WarehouseError;

/// Service configuration for the upload form
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Maximum CSV size in bytes (default: 200 MB)
    pub max_file_size: usize,

    /// Rows rendered in the preview table (default: 3)
    pub preview_rows: usize,

    /// Seconds a previewed file stays available for upload (default: 900)
    pub draft_ttl_secs: u64,

    /// Previewed files held at once; the oldest is evicted beyond this (default: 16)
    pub max_drafts: usize,

    /// Parent directory for scratch directories (default: OS temp dir)
    pub scratch_dir: Option<PathBuf>,

    /// Warehouse backend: "snowflake" or "memory" (default: "snowflake")
    pub warehouse_backend: String,

    /// Allowed CORS Origins (comma separated)
    pub allowed_origins: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_file_size: 200 * 1024 * 1024, // 200 MB
            preview_rows: 3,
            draft_ttl_secs: 15 * 60,
            max_drafts: 16,
            scratch_dir: None,
            warehouse_backend: "snowflake".to_string(),
            allowed_origins: vec![
                "http://localhost:8501".to_string(),
                "http://127.0.0.1:8501".to_string(),
            ],
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            max_file_size: env::var("MAX_FILE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_file_size),

            preview_rows: env::var("PREVIEW_ROWS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|rows: &usize| *rows > 0)
                .unwrap_or(default.preview_rows),

            draft_ttl_secs: env::var("DRAFT_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.draft_ttl_secs),

            max_drafts: env::var("MAX_DRAFTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|drafts: &usize| *drafts > 0)
                .unwrap_or(default.max_drafts),

            scratch_dir: env::var("SCRATCH_DIR")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),

            warehouse_backend: env::var("WAREHOUSE_BACKEND")
                .map(|v| v.trim().to_lowercase())
                .unwrap_or(default.warehouse_backend),

            allowed_origins: env::var("ALLOWED_ORIGINS")
                .ok()
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(default.allowed_origins),
        }
    }

    /// Config for local development: in-memory warehouse, no env required
    pub fn development() -> Self {
        Self {
            warehouse_backend: "memory".to_string(),
            ..Self::default()
        }
    }
}

/// Connection settings for the warehouse session.
///
/// Read once at process start and threaded into the session provisioner.
/// Fields stay optional here so that the service can boot with an incomplete
/// environment; completeness is checked each time a session is opened.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct WarehouseConfig {
    pub account: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub warehouse: Option<String>,
    pub database: Option<String>,
    pub schema: Option<String>,
}

/// A complete set of credentials, ready to hand to a connector.
#[derive(Clone, PartialEq, Eq)]
pub struct WarehouseCredentials {
    pub account: String,
    pub user: String,
    pub password: String,
    pub warehouse: String,
    pub database: String,
    pub schema: Option<String>,
}

impl WarehouseConfig {
    pub fn from_env() -> Self {
        fn var(name: &str) -> Option<String> {
            env::var(name).ok().filter(|v| !v.trim().is_empty())
        }

        Self {
            account: var("SNOWFLAKE_ACCOUNT"),
            user: var("SNOWFLAKE_USER"),
            password: var("SNOWFLAKE_PASSWORD"),
            warehouse: var("SNOWFLAKE_WAREHOUSE"),
            database: var("SNOWFLAKE_DATABASE"),
            schema: var("SNOWFLAKE_SCHEMA"),
        }
    }

    /// Names of required variables that are not set, in declaration order.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("SNOWFLAKE_ACCOUNT", &self.account),
            ("SNOWFLAKE_USER", &self.user),
            ("SNOWFLAKE_PASSWORD", &self.password),
            ("SNOWFLAKE_WAREHOUSE", &self.warehouse),
            ("SNOWFLAKE_DATABASE", &self.database),
        ]
        .into_iter()
        .filter(|(_, value)| value.is_none())
        .map(|(name, _)| name)
        .collect()
    }

    pub fn credentials(&self) -> Result<WarehouseCredentials, WarehouseError> {
        if let Some(&missing) = self.missing_fields().first() {
            return Err(WarehouseError::MissingConfig(missing));
        }

        let required = |field: &Option<String>| field.clone().unwrap_or_default();
        Ok(WarehouseCredentials {
            account: required(&self.account),
            user: required(&self.user),
            password: required(&self.password),
            warehouse: required(&self.warehouse),
            database: required(&self.database),
            schema: self.schema.clone(),
        })
    }
}

impl fmt::Debug for WarehouseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarehouseConfig")
            .field("account", &self.account)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("warehouse", &self.warehouse)
            .field("database", &self.database)
            .field("schema", &self.schema)
            .finish()
    }
}

impl fmt::Debug for WarehouseCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarehouseCredentials")
            .field("account", &self.account)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("warehouse", &self.warehouse)
            .field("database", &self.database)
            .field("schema", &self.schema)
            .finish()
    }
}
