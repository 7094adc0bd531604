use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub s3: S3Config,
    #[serde(default)]
    pub clamav: ClamavConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub trash: TrashConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Secret shared with the identity service that issues access tokens.
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,
    /// Secret required on /internal routes (worker/scheduler surface).
    #[serde(default = "default_internal_secret")]
    pub internal_secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    #[serde(default = "default_s3_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_s3_region")]
    pub region: String,
    #[serde(default = "default_s3_bucket")]
    pub bucket: String,
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret_key: String,
    /// Presigned URL lifetime in seconds (part uploads and downloads).
    #[serde(default = "default_presign_ttl")]
    pub presign_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClamavConfig {
    #[serde(default = "default_clamav_host")]
    pub host: String,
    #[serde(default = "default_clamav_port")]
    pub port: u16,
    #[serde(default = "default_scan_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_max_file_size")]
    pub max_file_size: i64,
    /// Sessions idle longer than this are aborted by the reaper.
    #[serde(default = "default_session_ttl")]
    pub session_ttl_hours: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfig {
    #[serde(default = "default_scan_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_scan_attempts")]
    pub max_attempts: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrashConfig {
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    1988
}

fn default_db_path() -> String {
    "data/nimbus.db".to_string()
}

fn default_jwt_secret() -> String {
    "change-me".to_string()
}

fn default_internal_secret() -> String {
    "change-me-too".to_string()
}

fn default_s3_endpoint() -> String {
    "http://localhost:9000".to_string()
}

fn default_s3_region() -> String {
    "us-east-1".to_string()
}

fn default_s3_bucket() -> String {
    "userfiles".to_string()
}

fn default_presign_ttl() -> u64 {
    3600 // 1 hour
}

fn default_clamav_host() -> String {
    "127.0.0.1".to_string()
}

fn default_clamav_port() -> u16 {
    3310
}

fn default_scan_timeout() -> u64 {
    30
}

fn default_max_file_size() -> i64 {
    50 * 1024 * 1024 * 1024 // 50 GiB
}

fn default_session_ttl() -> i64 {
    24
}

fn default_scan_concurrency() -> usize {
    4
}

fn default_scan_attempts() -> i64 {
    5
}

fn default_retention_days() -> i64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            internal_secret: default_internal_secret(),
        }
    }
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            endpoint: default_s3_endpoint(),
            region: default_s3_region(),
            bucket: default_s3_bucket(),
            access_key: String::new(),
            secret_key: String::new(),
            presign_ttl_secs: default_presign_ttl(),
        }
    }
}

impl Default for ClamavConfig {
    fn default() -> Self {
        Self {
            host: default_clamav_host(),
            port: default_clamav_port(),
            timeout_secs: default_scan_timeout(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            session_ttl_hours: default_session_ttl(),
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            concurrency: default_scan_concurrency(),
            max_attempts: default_scan_attempts(),
        }
    }
}

impl Default for TrashConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            auth: AuthConfig::default(),
            s3: S3Config::default(),
            clamav: ClamavConfig::default(),
            upload: UploadConfig::default(),
            scan: ScanConfig::default(),
            trash: TrashConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_env_overrides();
        config.ensure_directories()?;
        Ok(config)
    }

    /// Load configuration from config.toml
    fn load_from_file() -> anyhow::Result<Self> {
        let config_paths = ["config.toml", "data/config.toml"];

        for path in config_paths {
            if Path::new(path).exists() {
                let content = fs::read_to_string(path)?;
                let config: Config = toml::from_str(&content)?;
                tracing::info!("Loaded configuration from {}", path);
                return Ok(config);
            }
        }

        tracing::info!("No configuration file found, using defaults");
        Ok(Config::default())
    }

    /// Apply environment variable overrides
    /// Format: NB_CONF_<SECTION>_<KEY>
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("NB_CONF_SERVER_HOST") {
            self.server.host = val;
        }
        if let Ok(val) = env::var("NB_CONF_SERVER_PORT") {
            if let Ok(port) = val.parse() {
                self.server.port = port;
            }
        }

        if let Ok(val) = env::var("NB_CONF_DATABASE_PATH") {
            self.database.path = val;
        }

        if let Ok(val) = env::var("NB_CONF_AUTH_JWT_SECRET") {
            self.auth.jwt_secret = val;
        }
        if let Ok(val) = env::var("NB_CONF_AUTH_INTERNAL_SECRET") {
            self.auth.internal_secret = val;
        }

        if let Ok(val) = env::var("NB_CONF_S3_ENDPOINT") {
            self.s3.endpoint = val;
        }
        if let Ok(val) = env::var("NB_CONF_S3_REGION") {
            self.s3.region = val;
        }
        if let Ok(val) = env::var("NB_CONF_S3_BUCKET") {
            self.s3.bucket = val;
        }
        if let Ok(val) = env::var("NB_CONF_S3_ACCESS_KEY") {
            self.s3.access_key = val;
        }
        if let Ok(val) = env::var("NB_CONF_S3_SECRET_KEY") {
            self.s3.secret_key = val;
        }

        if let Ok(val) = env::var("NB_CONF_CLAMAV_HOST") {
            self.clamav.host = val;
        }
        if let Ok(val) = env::var("NB_CONF_CLAMAV_PORT") {
            if let Ok(port) = val.parse() {
                self.clamav.port = port;
            }
        }

        if let Ok(val) = env::var("NB_CONF_SCAN_CONCURRENCY") {
            if let Ok(n) = val.parse() {
                self.scan.concurrency = n;
            }
        }

        if let Ok(val) = env::var("NB_CONF_TRASH_RETENTION_DAYS") {
            if let Ok(n) = val.parse() {
                self.trash.retention_days = n;
            }
        }
    }

    /// Ensure required directories exist
    fn ensure_directories(&self) -> anyhow::Result<()> {
        if let Some(parent) = Path::new(&self.database.path).parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}
