use anyhow::{Context, Result};
use axum::Router;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{fs, io::ErrorKind, path::Path, process::ExitCode, str::FromStr, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

use config::{AppConfig, RunMode};
use services::{invocation, storage_service::StorageService};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    // --- Parse config + run mode ---
    let (cfg, mode) = AppConfig::from_env_and_args()?;
    tracing::debug!("Starting retention-sweeper with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite connection ---
    let connect_options = SqliteConnectOptions::from_str(&cfg.database_url)
        .with_context(|| format!("parsing database URL `{}`", cfg.database_url))?
        .create_if_missing(true);
    if let Some(parent) = connect_options.get_filename().parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }
    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await
            .with_context(|| format!("connecting to {}", cfg.database_url))?,
    );

    // --- Schema (idempotent) ---
    services::storage_service::run_migrations(&db).await?;

    let storage = StorageService::new(db, cfg.storage_dir.clone(), cfg.namespace.clone());

    match mode {
        RunMode::Migrate => {
            tracing::info!("Database migration complete.");
            Ok(ExitCode::SUCCESS)
        }
        RunMode::Serve => {
            serve(&cfg, storage).await?;
            Ok(ExitCode::SUCCESS)
        }
        RunMode::Invoke { payload } => {
            let body = payload.unwrap_or_default();
            let shutdown = async {
                if tokio::signal::ctrl_c().await.is_err() {
                    std::future::pending::<()>().await;
                }
            };
            let outcome =
                invocation::invoke_until(&storage, &cfg.sweep, body.as_bytes(), shutdown).await;
            if let Some(report) = &outcome.report {
                tracing::info!(
                    bucket = %report.bucket_name,
                    cutoff = %report.cutoff,
                    deleted = report.deleted_count(),
                    failures = report.failures().count(),
                    cancelled = report.cancelled,
                    "invocation finished"
                );
            }
            print!("{}", outcome.output);
            Ok(if outcome.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

async fn serve(cfg: &AppConfig, storage: StorageService) -> Result<()> {
    let state = state::AppState::new(storage, cfg.sweep.clone());
    let app: Router = routes::routes::routes().with_state(state);

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
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}
