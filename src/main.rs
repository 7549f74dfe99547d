use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use pc_group_cloning::ad_client::{DirectoryClient, LdapDirectoryClient};
use pc_group_cloning::api::{router, AppState};
use pc_group_cloning::audit_log::AuditLogger;
use pc_group_cloning::cipher::SymmetricCipher;
use pc_group_cloning::clone_orchestrator::CloneOrchestrator;
use pc_group_cloning::config::AppConfig;
use pc_group_cloning::credential_vault::CredentialVault;
use pc_group_cloning::database::{default_database_path, Database};
use pc_group_cloning::ou_config::OuConfigStore;

const LOG_FILE_NAME: &str = "pc-group-cloning.log";

/// Console logging always; file logging when a log directory is configured.
/// The returned guard must live until exit so buffered lines are flushed.
fn init_logging(
    log_dir: Option<&std::path::Path>,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_appender::rolling::{RollingFileAppender, Rotation};
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console_layer = fmt::layer().with_target(true);

    match log_dir {
        Some(dir) => {
            let file_appender = RollingFileAppender::new(Rotation::NEVER, dir, LOG_FILE_NAME);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let file_layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true);

            tracing_subscriber::registry()
                .with(filter)
                .with(console_layer)
                .with(file_layer)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(console_layer)
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal: {:#}", e);
        eprintln!("pc-group-cloning: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = AppConfig::from_env().context("Invalid configuration")?;
    let _log_guard = init_logging(config.log_dir.as_deref());

    info!("=======================================================");
    info!("PC Group Cloning service starting");
    info!(
        domain = %config.directory.domain,
        url = %config.directory.url(),
        base_dn = %config.directory.base_dn,
        cipher = %config.cipher_scheme,
        "Directory settings"
    );
    info!("=======================================================");
    if config.uses_default_key() {
        warn!("PCGC_ENCRYPTION_KEY not set, using the built-in default key");
    }

    let db_path = config
        .database_path
        .clone()
        .unwrap_or_else(default_database_path);
    let db = Database::open(Some(db_path.clone())).context("Failed to open database")?;
    let audit = Arc::new(AuditLogger::new(Some(db_path)).context("Failed to open audit log")?);

    let cipher = Arc::new(SymmetricCipher::new(
        config.encryption_key.expose_secret(),
        config.cipher_scheme,
    ));
    let vault = Arc::new(CredentialVault::new(
        db.clone(),
        cipher,
        config.directory.clone(),
    ));
    let migrating = Arc::clone(&vault);
    match tokio::task::spawn_blocking(move || migrating.reencrypt_active("system")).await? {
        Ok(true) => info!("Service account secret migrated to {}", config.cipher_scheme),
        Ok(false) => {}
        Err(e) => warn!("Service account secret left as stored: {:#}", e),
    }

    let ou_config = Arc::new(OuConfigStore::new(db));
    let directory: Arc<dyn DirectoryClient> = Arc::new(LdapDirectoryClient::new(
        config.directory.clone(),
        vault.clone(),
    ));
    let orchestrator = Arc::new(CloneOrchestrator::new(
        directory.clone(),
        audit.clone(),
        ou_config.clone(),
    ));

    let app = router(AppState {
        orchestrator,
        directory,
        vault,
        ou_config,
        audit,
    });

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!("Listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("PC Group Cloning service stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
