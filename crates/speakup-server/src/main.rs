mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, warn};

use speakup_api::attachments::DiskStore;
use speakup_api::notify::{LogNotifier, Notifier, WebhookNotifier};
use speakup_api::{AppContext, Settings};
use speakup_db::Database;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "speakup=debug,tower_http=debug".into()),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: {:#}", e);
            eprintln!("       Set it in your .env file and restart.");
            std::process::exit(1);
        }
    };

    let db = Arc::new(Database::open(&config.db_path)?);
    let store = Arc::new(DiskStore::new(config.upload_dir.clone()).await?);

    let notifier: Arc<dyn Notifier> = match &config.mail_relay_url {
        Some(url) => {
            info!("Verification mail goes through relay {}", url);
            Arc::new(WebhookNotifier::new(url.clone()))
        }
        None => {
            warn!("SPEAKUP_MAIL_RELAY_URL not set, verification links will only be logged");
            Arc::new(LogNotifier)
        }
    };

    let state = AppContext::new(
        db,
        &config.jwt_secret,
        store,
        notifier,
        &config.frontend_url,
        Settings {
            upload_dir: Some(config.upload_dir.clone()),
            expose_error_details: config.development,
        },
    );

    if !config.admin_emails.is_empty() {
        let promoted = state.credentials.promote_admins(&config.admin_emails)?;
        info!(
            "Admin role ensured for {} of {} configured accounts",
            promoted,
            config.admin_emails.len()
        );
    }

    let app = speakup_api::router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("SpeakUp server listening on {}", addr);
    if config.development {
        info!("Development mode: error details are returned to clients");
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Could not install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
