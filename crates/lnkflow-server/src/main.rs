//! lnkflow - Automation service entry point

use anyhow::Result;
use lnkflow_api::{create_router, AppState};
use lnkflow_common::config::Config;
use lnkflow_engine::{
    ActionDispatcher, EventGateway, NoopCampaignControl, NoopNotifier, Notifier, RuleExecutor,
    SmtpNotifier, SweepLoop,
};
use lnkflow_store::db::DatabasePool;
use lnkflow_store::repository::{DbRuleRepository, RuleRepository};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration before logging so the log format is honored
    let config = Config::load()?;
    init_logging(&config);

    info!("Starting lnkflow automation service...");

    // Initialize database
    let db_pool = DatabasePool::new(&config.database).await?;
    info!("Database connection established");

    // Run migrations
    db_pool.migrate().await?;
    info!("Database migrations completed");

    let store: Arc<dyn RuleRepository> = Arc::new(DbRuleRepository::new(db_pool));

    // Notifications are optional; without SMTP config they are dropped
    let notifier: Arc<dyn Notifier> = if config.notifications.enabled {
        info!(
            host = %config.notifications.smtp_host,
            "email notifications enabled"
        );
        Arc::new(SmtpNotifier::new(config.notifications.clone()))
    } else {
        Arc::new(NoopNotifier)
    };

    let dispatcher = Arc::new(ActionDispatcher::new(
        &config.engine,
        Arc::new(NoopCampaignControl),
        notifier,
    ));
    let executor = Arc::new(RuleExecutor::new(store.clone(), dispatcher));
    let gateway = Arc::new(EventGateway::new(store.clone(), executor.clone()));

    // Start the periodic sweep
    let sweep = Arc::new(SweepLoop::new(store.clone(), executor.clone(), &config.engine));
    let sweep_handle = tokio::spawn(sweep.run());

    // Start API server
    let state = Arc::new(AppState {
        store,
        executor,
        gateway,
    });
    let bind = format!("{}:{}", config.server.bind_address, config.server.port);
    let api_handle = tokio::spawn(async move {
        let app = create_router(state);
        let listener = tokio::net::TcpListener::bind(&bind)
            .await
            .expect("Failed to bind API server");
        info!("Starting API server on {}", bind);
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("API server error: {}", e);
        }
    });

    info!("lnkflow started successfully");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    sweep_handle.abort();
    api_handle.abort();

    info!("lnkflow shutdown complete");
    Ok(())
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},lnkflow=debug", config.logging.level)));

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
