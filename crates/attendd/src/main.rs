use anyhow::{Context, Result};
use attend_core::{CommandExtractor, Config};
use attend_store::{SqliteCredentialStore, SqliteLedger};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod engine;
mod enroll;
mod error;
mod http;
mod notify;
mod service;
mod verify;

use notify::{FileNotifier, NotificationDispatcher, OwnerNotifier};
use service::{AttendanceService, FlowConfig};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("attendd=info,tower_http=info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "attendd starting");

    let config = Config::from_env();
    if config.uses_default_owner_secret() {
        tracing::warn!("ATTEND_OWNER_SECRET not set; using the built-in default owner secret");
    }
    tracing::info!(
        lat = config.allowed_lat,
        lon = config.allowed_lon,
        radius_m = config.allowed_radius_m,
        threshold = config.face_threshold,
        policy = ?config.ledger_policy,
        "configuration loaded"
    );

    let users = SqliteCredentialStore::open(&config.users_db)
        .await
        .with_context(|| format!("opening user store {}", config.users_db.display()))?;
    let ledger = SqliteLedger::open(&config.ledger_db)
        .await
        .with_context(|| format!("opening ledger {}", config.ledger_db.display()))?;

    let command = config
        .extractor_cmd
        .as_deref()
        .context("ATTEND_EXTRACTOR_CMD must name an embedding extractor program")?;
    let extract_timeout = Duration::from_secs(config.extract_timeout_secs);
    let extractor = CommandExtractor::from_command_line(command)
        .context("ATTEND_EXTRACTOR_CMD is empty")?
        .with_deadline(extract_timeout);
    tracing::info!(program = %extractor.program(), "using command extractor");

    let engine = engine::spawn_engine(Box::new(extractor), config.embedding_dim, extract_timeout)?;

    let notifier = OwnerNotifier::from_config(&config).unwrap_or_else(|e| {
        tracing::error!(error = %e, "mail relay unusable; owner notifications go to the log file");
        OwnerNotifier::Log(FileNotifier::new(
            &config.notify_log,
            config.owner_email.clone(),
        ))
    });
    let (dispatcher, notify_worker) =
        NotificationDispatcher::spawn(notifier, Some(config.notify_log.clone()));

    let flow = Arc::new(FlowConfig::from_config(&config)?);
    let service = Arc::new(AttendanceService::new(flow, users, ledger, engine, dispatcher));

    let app = http::app(
        http::router(service, config.max_body_bytes),
        &config.cors_origins,
    );

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("binding {}", config.listen))?;
    tracing::info!(addr = %config.listen, "attendd ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("attendd shutting down");
        })
        .await?;

    // The router owned the last dispatcher; wait for queued notifications.
    if let Err(e) = notify_worker.await {
        tracing::warn!(error = %e, "notification task ended abnormally");
    }

    Ok(())
}
