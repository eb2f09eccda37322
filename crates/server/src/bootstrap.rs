use std::sync::Arc;

use helios_agent::{client_from_config, AgentRouter, LlmClient};
use helios_core::config::{AppConfig, ConfigError, LoadOptions};
use helios_db::{connect_with_settings, migrations, DbPool, StatementExecutor};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub router: Arc<AgentRouter>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("inference client setup failed: {0}")]
    Inference(String),
    #[error("agent prompt template is invalid: {0}")]
    Prompt(#[source] tera::Error),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    let llm: Arc<dyn LlmClient> = client_from_config(&config.llm)
        .map_err(|error| BootstrapError::Inference(format!("{error:#}")))?
        .into();
    bootstrap_with_llm(config, llm).await
}

/// Bootstraps with an explicit inference client; tests pass a scripted one.
pub async fn bootstrap_with_llm(
    config: AppConfig,
    llm: Arc<dyn LlmClient>,
) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let router = AgentRouter::from_config(&config, StatementExecutor::new(db_pool.clone()), llm)
        .map_err(BootstrapError::Prompt)?;
    info!(
        event_name = "system.bootstrap.router_ready",
        correlation_id = "bootstrap",
        classifier = ?config.agent.classifier,
        max_iterations = config.agent.max_iterations,
        "agent router ready"
    );

    Ok(Application { config, db_pool, router: Arc::new(router) })
}
