use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use dnsguard::config::AppConfig;
use dnsguard::db;
use dnsguard::db::services::monitor_service;
use dnsguard::dns::{cloudflare::CloudflareDns, DnsProvider};
use dnsguard::engine::{failover::MonitorEngine, scheduler::Scheduler};
use dnsguard::notifications::Notifier;
use dnsguard::web::{self, AppState};

const SHUTDOWN_DRAIN: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<String>,
}

fn init_logging(debug: bool) {
    // File: JSON with daily rotation. Stdout: human-readable.
    let file_appender = rolling::daily("logs", "dnsguard.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();
    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let default_filter = if debug {
        "debug,sqlx=warn,sea_orm=warn,hyper=info,reqwest=info"
    } else {
        "info,sqlx=warn,sea_orm=warn"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();
    let config = Arc::new(AppConfig::load(args.config.as_deref())?);

    init_logging(config.server.debug);
    info!(version = env!("CARGO_PKG_VERSION"), "starting dnsguard");

    let db = db::connect(&config.database.path).await?;
    monitor_service::seed_monitors(&db, &config.monitors).await?;

    let notifier = Arc::new(Notifier::new(config.notifications.clone()));
    let dns: Arc<dyn DnsProvider> = Arc::new(CloudflareDns::new(config.accounts.clone()));
    let engine = Arc::new(MonitorEngine::new(db.clone(), dns.clone(), notifier));
    let scheduler = Arc::new(Scheduler::new(db.clone(), engine.clone()));
    scheduler.reload().await?;

    let state = Arc::new(AppState {
        db,
        config: config.clone(),
        engine,
        scheduler: scheduler.clone(),
        dns,
    });
    let app = web::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.listen).await?;
    info!(address = %config.server.listen, "admin api listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down, draining running checks");
    scheduler.shutdown(SHUTDOWN_DRAIN).await;
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
