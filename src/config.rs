use anyhow::{Context, Result};
use clap::Parser;
use std::{env, time::Duration};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Root directory for the local storage backend.
    pub storage_dir: String,
    pub database_url: String,
    /// Base URL clients use to reach this service (embedded in local
    /// presigned URLs).
    pub public_base_url: String,
    /// Target size of a single upload part, in bytes.
    pub part_size: i64,
    /// Largest accepted file size, in bytes.
    pub max_file_size: i64,
    /// Files at or above this size go to the remote backend.
    pub remote_threshold: i64,
    /// How long an upload session stays usable.
    pub session_ttl_hours: i64,
    /// How long a presigned part URL stays valid.
    pub presign_ttl_secs: i64,
    /// Secret used to sign part upload URLs.
    pub signing_secret: String,
    /// Shared secret expected on the cleanup trigger endpoint.
    pub cleanup_token: String,
    /// Cadence of the in-process cleanup sweep; 0 disables it.
    pub cleanup_interval_secs: u64,
    /// Upper bound on a single storage backend call.
    pub backend_timeout_secs: u64,
    /// Remote object gateway base URL, e.g. https://gateway.example.com.
    pub remote_endpoint: Option<String>,
    /// Bucket name on the remote gateway.
    pub remote_bucket: String,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Chunked file-transfer upload service")]
pub struct Args {
    /// Host to bind to (overrides FILEDROP_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides FILEDROP_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where local objects are stored (overrides FILEDROP_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides FILEDROP_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Public base URL for presigned part links (overrides FILEDROP_PUBLIC_BASE_URL)
    #[arg(long)]
    pub public_base_url: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

const DEFAULT_PART_SIZE: i64 = 5 * 1024 * 1024;
const DEFAULT_MAX_FILE_SIZE: i64 = 50 * 1024 * 1024 * 1024;
const DEFAULT_REMOTE_THRESHOLD: i64 = 1024 * 1024 * 1024;
const DEFAULT_SESSION_TTL_HOURS: i64 = 24;
const DEFAULT_PRESIGN_TTL_SECS: i64 = 15 * 60;
const DEFAULT_CLEANUP_INTERVAL_SECS: i64 = 3600;
const DEFAULT_BACKEND_TIMEOUT_SECS: i64 = 10;

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();

        let env_host = env::var("FILEDROP_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = match env::var("FILEDROP_PORT") {
            Ok(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing FILEDROP_PORT value `{}`", value))?,
            Err(env::VarError::NotPresent) => 3000,
            Err(err) => return Err(err).context("reading FILEDROP_PORT"),
        };
        let env_storage =
            env::var("FILEDROP_STORAGE_DIR").unwrap_or_else(|_| "./data/objects".into());
        let env_db = env::var("FILEDROP_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/filedrop.db".into());
        let port = args.port.unwrap_or(env_port);
        let env_public = env::var("FILEDROP_PUBLIC_BASE_URL")
            .unwrap_or_else(|_| format!("http://127.0.0.1:{}", port));

        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port,
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            public_base_url: args.public_base_url.unwrap_or(env_public),
            part_size: env_i64("FILEDROP_PART_SIZE", DEFAULT_PART_SIZE)?,
            max_file_size: env_i64("FILEDROP_MAX_FILE_SIZE", DEFAULT_MAX_FILE_SIZE)?,
            remote_threshold: env_i64("FILEDROP_REMOTE_THRESHOLD", DEFAULT_REMOTE_THRESHOLD)?,
            session_ttl_hours: env_i64("FILEDROP_SESSION_TTL_HOURS", DEFAULT_SESSION_TTL_HOURS)?,
            presign_ttl_secs: env_i64("FILEDROP_PRESIGN_TTL_SECS", DEFAULT_PRESIGN_TTL_SECS)?,
            signing_secret: env::var("FILEDROP_SIGNING_SECRET")
                .unwrap_or_else(|_| "dev-signing-secret".into()),
            cleanup_token: env::var("FILEDROP_CLEANUP_TOKEN")
                .unwrap_or_else(|_| "dev-cleanup-token".into()),
            cleanup_interval_secs: env_i64(
                "FILEDROP_CLEANUP_INTERVAL_SECS",
                DEFAULT_CLEANUP_INTERVAL_SECS,
            )?
            .max(0) as u64,
            backend_timeout_secs: env_i64(
                "FILEDROP_BACKEND_TIMEOUT_SECS",
                DEFAULT_BACKEND_TIMEOUT_SECS,
            )?
            .max(1) as u64,
            remote_endpoint: env::var("FILEDROP_REMOTE_ENDPOINT").ok(),
            remote_bucket: env::var("FILEDROP_REMOTE_BUCKET").unwrap_or_else(|_| "filedrop".into()),
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn presign_ttl(&self) -> Duration {
        Duration::from_secs(self.presign_ttl_secs.max(0) as u64)
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_timeout_secs)
    }
}

fn env_i64(key: &str, default: i64) -> Result<i64> {
    match env::var(key) {
        Ok(value) => value
            .parse::<i64>()
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}
