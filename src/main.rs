use anyhow::Result;
use axum::Router;
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use std::{fs, io::ErrorKind, path::Path, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod storage;

use models::session::StorageKind;
use services::{
    AppState,
    session_store::SessionStore,
    upload_manager::{UploadManager, UploadPolicy},
};
use storage::{BackendSet, local::LocalBackend, remote::RemoteBackend, sign::UrlSigner};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting filedrop with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    tracing::debug!("Connecting using raw URL => {}", db_url);

    // Extract the local file path SQLx will use
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("file:");
    let db_path_obj = Path::new(db_path);

    // Create parent directory if needed
    if let Some(parent) = db_path_obj.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    // SQLx will not create the database file on its own
    match fs::OpenOptions::new().create(true).write(true).open(db_path) {
        Ok(_) => tracing::debug!("Database file can be created/opened."),
        Err(e) => tracing::warn!("Failed to open database file: {}", e),
    }

    let db: Arc<sqlx::Pool<sqlx::Sqlite>> = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await?,
    );

    // --- Handle migration mode ---
    if migrate {
        run_migrations(&db).await?;
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Build storage backends ---
    let signer = UrlSigner::new(cfg.signing_secret.clone());
    let local = Arc::new(LocalBackend::new(
        cfg.storage_dir.clone(),
        cfg.public_base_url.clone(),
        signer.clone(),
        cfg.presign_ttl(),
    ));
    let mut backends = BackendSet::new().with(StorageKind::Local, local.clone());
    if let Some(endpoint) = &cfg.remote_endpoint {
        let remote = RemoteBackend::new(
            endpoint.clone(),
            cfg.remote_bucket.clone(),
            signer.clone(),
            cfg.presign_ttl(),
            cfg.backend_timeout(),
        )
        .map_err(|e| anyhow::anyhow!("building remote backend: {}", e))?;
        backends = backends.with(StorageKind::Remote, Arc::new(remote));
        tracing::info!("Remote backend enabled against {}", endpoint);
    }

    // --- Initialize core service ---
    let manager = UploadManager::new(
        SessionStore::new(db.clone()),
        backends,
        UploadPolicy::from_config(&cfg),
    );
    let state = AppState {
        manager: manager.clone(),
        local,
        db: db.clone(),
        storage_dir: cfg.storage_dir.clone().into(),
        cleanup_token: cfg.cleanup_token.clone(),
    };

    // --- In-process cleanup sweep (the HTTP trigger works regardless) ---
    if cfg.cleanup_interval_secs > 0 {
        let sweep_manager = manager.clone();
        let interval = Duration::from_secs(cfg.cleanup_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await; // first tick fires immediately
            loop {
                ticker.tick().await;
                if let Err(err) = sweep_manager.reclaim_expired(Utc::now()).await {
                    tracing::warn!("cleanup sweep failed: {}", err);
                }
            }
        });
    }

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Run SQLite migrations manually from the embedded SQL file.
async fn run_migrations(db: &Arc<sqlx::Pool<sqlx::Sqlite>>) -> Result<()> {
    let path = "migrations/0001_init.sql";

    if !Path::new(path).exists() {
        anyhow::bail!("Migration file not found: {}", path);
    }

    let sql = fs::read_to_string(path)?;
    let statements = sql
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        tracing::debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(&**db).await?;
    }

    Ok(())
}
