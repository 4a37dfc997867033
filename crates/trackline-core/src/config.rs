//! Configuration module
//!
//! Settings are read from the environment (after loading `.env`), defaulted,
//! and validated once at startup.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::storage_types::StorageBackend;

const SERVER_PORT: u16 = 3000;
const MAX_CONNECTIONS: u32 = 20;
const CONNECTION_TIMEOUT_SECS: u64 = 30;
const WORKER_JOB_TIMEOUT_SECS: u64 = 3600;
const HEAVY_QUEUE_PREFETCH: u16 = 1;
const LIGHT_QUEUE_PREFETCH: u16 = 4;
const BROKER_RECONNECT_DELAY_MS: u64 = 5000;
const NOTIFIER_SESSION_BUFFER: usize = 64;
const SHUTDOWN_GRACE_SECS: u64 = 30;
const MAX_UPLOAD_SIZE_MB: usize = 500;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => Err(anyhow::anyhow!("Invalid log format: {}", s)),
        }
    }
}

/// Server-level settings
#[derive(Clone, Debug)]
pub struct BaseConfig {
    pub server_port: u16,
    pub environment: String,
    pub cors_origins: Vec<String>,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    pub log_format: LogFormat,
}

/// Pipeline settings
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub base: BaseConfig,
    /// Without a database URL the in-memory track store is used.
    pub database_url: Option<String>,
    // Storage configuration
    pub storage_backend: StorageBackend,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>,
    pub local_storage_path: Option<String>,
    pub local_storage_base_url: Option<String>,
    pub staging_dir: PathBuf,
    pub max_upload_size_bytes: usize,
    // Encoder configuration
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    // Worker configuration
    pub worker_pool_size: usize,
    pub worker_job_timeout_secs: u64,
    pub heavy_queue_prefetch: u16,
    pub light_queue_prefetch: u16,
    // Broker configuration
    pub broker_reconnect_delay_ms: u64,
    pub publisher_spool_path: Option<PathBuf>,
    // Notifications
    pub notifier_session_buffer: usize,
    pub shutdown_grace_secs: u64,
}

/// Application configuration.
#[derive(Clone, Debug)]
pub struct Config(pub Box<PipelineConfig>);

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        Ok(Config(Box::new(PipelineConfig::from_env()?)))
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.0.validate()
    }

    pub fn is_production(&self) -> bool {
        let env = self.0.base.environment.to_lowercase();
        env == "production" || env == "prod"
    }

    pub fn server_port(&self) -> u16 {
        self.0.base.server_port
    }

    pub fn environment(&self) -> &str {
        &self.0.base.environment
    }

    pub fn cors_origins(&self) -> &[String] {
        &self.0.base.cors_origins
    }

    pub fn db_max_connections(&self) -> u32 {
        self.0.base.db_max_connections
    }

    pub fn db_timeout_seconds(&self) -> u64 {
        self.0.base.db_timeout_seconds
    }

    pub fn log_format(&self) -> LogFormat {
        self.0.base.log_format
    }

    pub fn database_url(&self) -> Option<&str> {
        self.0.database_url.as_deref()
    }

    pub fn storage_backend(&self) -> StorageBackend {
        self.0.storage_backend
    }

    pub fn s3_bucket(&self) -> Option<&str> {
        self.0.s3_bucket.as_deref()
    }

    pub fn s3_region(&self) -> Option<&str> {
        self.0.s3_region.as_deref()
    }

    pub fn s3_endpoint(&self) -> Option<&str> {
        self.0.s3_endpoint.as_deref()
    }

    pub fn local_storage_path(&self) -> Option<&str> {
        self.0.local_storage_path.as_deref()
    }

    pub fn local_storage_base_url(&self) -> Option<&str> {
        self.0.local_storage_base_url.as_deref()
    }

    pub fn staging_dir(&self) -> &PathBuf {
        &self.0.staging_dir
    }

    pub fn max_upload_size_bytes(&self) -> usize {
        self.0.max_upload_size_bytes
    }

    pub fn ffmpeg_path(&self) -> &str {
        &self.0.ffmpeg_path
    }

    pub fn ffprobe_path(&self) -> &str {
        &self.0.ffprobe_path
    }

    pub fn worker_pool_size(&self) -> usize {
        self.0.worker_pool_size
    }

    pub fn worker_job_timeout_secs(&self) -> u64 {
        self.0.worker_job_timeout_secs
    }

    pub fn heavy_queue_prefetch(&self) -> u16 {
        self.0.heavy_queue_prefetch
    }

    pub fn light_queue_prefetch(&self) -> u16 {
        self.0.light_queue_prefetch
    }

    pub fn broker_reconnect_delay_ms(&self) -> u64 {
        self.0.broker_reconnect_delay_ms
    }

    pub fn publisher_spool_path(&self) -> Option<&PathBuf> {
        self.0.publisher_spool_path.as_ref()
    }

    pub fn notifier_session_buffer(&self) -> usize {
        self.0.notifier_session_buffer
    }

    pub fn shutdown_grace_secs(&self) -> u64 {
        self.0.shutdown_grace_secs
    }
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env_opt(key).and_then(|s| s.parse().ok()).unwrap_or(default)
}

/// Logical CPU count, never below one.
pub fn default_worker_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .max(1)
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let environment = env_opt("ENVIRONMENT")
            .or_else(|| env_opt("APP_ENV"))
            .unwrap_or_else(|| "development".to_string());

        let cors_origins: Vec<String> = env_opt("CORS_ORIGINS")
            .unwrap_or_else(|| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .collect();

        let log_format = match env_opt("LOG_FORMAT") {
            Some(raw) => raw.parse()?,
            None => LogFormat::Pretty,
        };

        let base = BaseConfig {
            server_port: match env_opt("SERVER_PORT").or_else(|| env_opt("PORT")) {
                Some(raw) => raw
                    .parse()
                    .map_err(|_| anyhow::anyhow!("SERVER_PORT must be a valid number"))?,
                None => SERVER_PORT,
            },
            environment,
            cors_origins,
            db_max_connections: env_parse("DB_MAX_CONNECTIONS", MAX_CONNECTIONS),
            db_timeout_seconds: env_parse("DB_TIMEOUT_SECONDS", CONNECTION_TIMEOUT_SECS),
            log_format,
        };

        let storage_backend = match env_opt("STORAGE_BACKEND") {
            Some(raw) => raw.parse()?,
            None => StorageBackend::Local,
        };

        let config = PipelineConfig {
            base,
            database_url: env_opt("DATABASE_URL"),
            storage_backend,
            s3_bucket: env_opt("S3_BUCKET"),
            s3_region: env_opt("S3_REGION").or_else(|| env_opt("AWS_REGION")),
            s3_endpoint: env_opt("S3_ENDPOINT"),
            local_storage_path: env_opt("LOCAL_STORAGE_PATH"),
            local_storage_base_url: env_opt("LOCAL_STORAGE_BASE_URL"),
            staging_dir: env_opt("STAGING_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| env::temp_dir().join("trackline-staging")),
            max_upload_size_bytes: env_parse("MAX_UPLOAD_SIZE_MB", MAX_UPLOAD_SIZE_MB) * 1024 * 1024,
            ffmpeg_path: env_opt("FFMPEG_PATH").unwrap_or_else(|| "ffmpeg".to_string()),
            ffprobe_path: env_opt("FFPROBE_PATH").unwrap_or_else(|| "ffprobe".to_string()),
            worker_pool_size: env_parse("WORKER_POOL_SIZE", default_worker_pool_size()),
            worker_job_timeout_secs: env_parse("WORKER_JOB_TIMEOUT_SECS", WORKER_JOB_TIMEOUT_SECS),
            heavy_queue_prefetch: env_parse("HEAVY_QUEUE_PREFETCH", HEAVY_QUEUE_PREFETCH),
            light_queue_prefetch: env_parse("LIGHT_QUEUE_PREFETCH", LIGHT_QUEUE_PREFETCH),
            broker_reconnect_delay_ms: env_parse(
                "BROKER_RECONNECT_DELAY_MS",
                BROKER_RECONNECT_DELAY_MS,
            ),
            publisher_spool_path: env_opt("PUBLISHER_SPOOL_PATH").map(PathBuf::from),
            notifier_session_buffer: env_parse("NOTIFIER_SESSION_BUFFER", NOTIFIER_SESSION_BUFFER),
            shutdown_grace_secs: env_parse("SHUTDOWN_GRACE_SECS", SHUTDOWN_GRACE_SECS),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        let env = self.base.environment.to_lowercase();
        let is_production = env == "production" || env == "prod";
        if is_production && self.base.cors_origins.iter().any(|o| o == "*") {
            return Err(anyhow::anyhow!(
                "CORS_ORIGINS cannot be '*' in production. Please specify explicit origins."
            ));
        }

        if let Some(url) = &self.database_url {
            if !url.starts_with("postgres://") && !url.starts_with("postgresql://") {
                return Err(anyhow::anyhow!(
                    "DATABASE_URL must be a valid PostgreSQL connection string"
                ));
            }
        }

        match self.storage_backend {
            StorageBackend::S3 => {
                if self.s3_bucket.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_BUCKET must be set when using S3 storage backend"
                    ));
                }
                if self.s3_region.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_REGION or AWS_REGION must be set when using S3 storage backend"
                    ));
                }
            }
            StorageBackend::Local => {
                if self.local_storage_path.is_none() {
                    return Err(anyhow::anyhow!(
                        "LOCAL_STORAGE_PATH must be set when using local storage backend"
                    ));
                }
                if self.local_storage_base_url.is_none() {
                    return Err(anyhow::anyhow!(
                        "LOCAL_STORAGE_BASE_URL must be set when using local storage backend"
                    ));
                }
            }
        }

        if self.worker_pool_size == 0 {
            return Err(anyhow::anyhow!("WORKER_POOL_SIZE must be at least 1"));
        }
        if self.heavy_queue_prefetch == 0 || self.light_queue_prefetch == 0 {
            return Err(anyhow::anyhow!(
                "HEAVY_QUEUE_PREFETCH and LIGHT_QUEUE_PREFETCH must be at least 1"
            ));
        }
        if self.worker_job_timeout_secs == 0 {
            return Err(anyhow::anyhow!("WORKER_JOB_TIMEOUT_SECS must be at least 1"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_config() -> PipelineConfig {
        PipelineConfig {
            base: BaseConfig {
                server_port: SERVER_PORT,
                environment: "development".to_string(),
                cors_origins: vec!["*".to_string()],
                db_max_connections: MAX_CONNECTIONS,
                db_timeout_seconds: CONNECTION_TIMEOUT_SECS,
                log_format: LogFormat::Pretty,
            },
            database_url: None,
            storage_backend: StorageBackend::Local,
            s3_bucket: None,
            s3_region: None,
            s3_endpoint: None,
            local_storage_path: Some("/var/lib/trackline".to_string()),
            local_storage_base_url: Some("http://localhost:3000/media".to_string()),
            staging_dir: PathBuf::from("/tmp/trackline-staging"),
            max_upload_size_bytes: MAX_UPLOAD_SIZE_MB * 1024 * 1024,
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            worker_pool_size: 2,
            worker_job_timeout_secs: WORKER_JOB_TIMEOUT_SECS,
            heavy_queue_prefetch: HEAVY_QUEUE_PREFETCH,
            light_queue_prefetch: LIGHT_QUEUE_PREFETCH,
            broker_reconnect_delay_ms: BROKER_RECONNECT_DELAY_MS,
            publisher_spool_path: None,
            notifier_session_buffer: NOTIFIER_SESSION_BUFFER,
            shutdown_grace_secs: SHUTDOWN_GRACE_SECS,
        }
    }

    #[test]
    fn test_local_config_is_valid() {
        assert!(local_config().validate().is_ok());
    }

    #[test]
    fn test_s3_requires_bucket_and_region() {
        let mut config = local_config();
        config.storage_backend = StorageBackend::S3;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("S3_BUCKET"));

        config.s3_bucket = Some("tracks".to_string());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("S3_REGION"));

        config.s3_region = Some("eu-west-1".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_prefetch_rejected() {
        let mut config = local_config();
        config.heavy_queue_prefetch = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_database_url_must_be_postgres() {
        let mut config = local_config();
        config.database_url = Some("mysql://localhost/tracks".to_string());
        assert!(config.validate().is_err());
        config.database_url = Some("postgres://localhost/tracks".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_production_rejects_wildcard_cors() {
        let mut config = local_config();
        config.base.environment = "production".to_string();
        assert!(config.validate().is_err());
        config.base.cors_origins = vec!["https://artists.example.com".to_string()];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
