use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Per-tenant-manager configuration: metadata database, local blob root,
/// optional object-store tier, codec flags and cache sizing. Immutable once
/// the manager is constructed.
#[derive(Debug, Clone, Deserialize)]
pub struct TenantConfig {
    #[serde(default)]
    pub db: DatabaseConfig,
    pub local: LocalStoreConfig,
    #[serde(default)]
    pub object: Option<ObjectStoreConfig>,
    #[serde(default)]
    pub codec: CodecConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    /// Database name for server-backed deployments; the bundled SQLite
    /// driver consumes this as the database file path (`:memory:` is the
    /// in-process mode used by tests).
    pub db_name: String,
    pub user: String,
    pub password: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 5432,
            db_name: ":memory:".to_owned(),
            user: String::new(),
            password: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocalStoreConfig {
    pub base_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObjectStoreConfig {
    pub endpoint: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// A configured bucket selects shared-bucket mode: all tenants live in
    /// this bucket under a `<tenant>/` prefix. When absent, each tenant gets
    /// a bucket of its own.
    #[serde(default)]
    pub bucket: Option<String>,
    pub access_key: String,
    pub secret_key: String,
    #[serde(default)]
    pub path_style: bool,
}

fn default_region() -> String {
    "us-east-1".to_owned()
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    pub encrypt_data: bool,
    pub compress_data: bool,
    /// 32-byte AES-256 key, encoded as 64 hex characters or base64.
    pub encryption_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_size_bytes: u64,
    pub threshold: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: 64 * 1024 * 1024,
            threshold: 0.8,
        }
    }
}

impl TenantConfig {
    /// Loads configuration from a file, with environment variables prefixed
    /// `FILEENGINE` overriding file values.
    pub fn load(config_path: &str) -> std::result::Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(config_path))
            .add_source(Environment::with_prefix("FILEENGINE").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
