use std::sync::Arc;

use anyhow::Context;
use stratus_actions::simulated::{SimulatedDeploy, SimulatedInfra};
use stratus_actions::{
    ActionConfig, DeployActions, InfraActions, ShellDeployActions, TerraformActions,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::repository::{InMemorySnapshotStore, PgSnapshotStore, SnapshotStore};
use crate::runtime::Runtime;

pub mod api;
pub mod config;
pub mod db;
pub mod repository;
pub mod runtime;
pub mod saga;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "stratus_orchestrator=debug,stratus_actions=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Stratus Orchestrator...");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    let action_config = ActionConfig::from_env().context("Failed to load action configuration")?;

    // Snapshot store
    let store: Arc<dyn SnapshotStore> = match &config.database_url {
        Some(database_url) => {
            tracing::info!("Connecting to database...");
            let pool = db::create_pool(database_url)
                .await
                .context("Failed to create database pool")?;

            db::run_migrations(&pool)
                .await
                .context("Failed to run database migrations")?;
            tracing::info!("Database connection pool created");

            Arc::new(PgSnapshotStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, saga snapshots are kept in memory only");
            Arc::new(InMemorySnapshotStore::new())
        }
    };

    // Actions
    let infra_actions: Arc<dyn InfraActions>;
    let deploy_actions: Arc<dyn DeployActions>;

    if config.simulate {
        tracing::info!(
            "Simulate mode: actions are simulated ({:?} each)",
            config.simulate_delay
        );
        infra_actions = Arc::new(SimulatedInfra::new().with_delay(config.simulate_delay));
        deploy_actions = Arc::new(
            SimulatedDeploy::new(action_config.app_port).with_delay(config.simulate_delay),
        );
    } else {
        action_config
            .validate()
            .context("Invalid action configuration")?;
        tracing::info!(
            "Using {} with modules in {}",
            action_config.terraform_bin,
            action_config.terraform_dir.display()
        );
        infra_actions = Arc::new(TerraformActions::new(action_config.clone()));
        deploy_actions = Arc::new(ShellDeployActions::new(action_config));
    }

    let runtime = Runtime::new(
        infra_actions,
        deploy_actions,
        store,
        config.runtime_settings(),
    );

    let orphaned = runtime
        .restore()
        .await
        .context("Failed to restore saga snapshots")?;
    if orphaned > 0 {
        tracing::warn!("{} saga instance(s) marked orphaned", orphaned);
    }

    // Build router with all API endpoints
    let app = api::create_router(runtime.clone());

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Failed to start server")?;

    runtime.shutdown().await;
    tracing::info!("Orchestrator stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
