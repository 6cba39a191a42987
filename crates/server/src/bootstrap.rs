use std::sync::Arc;

use leadflow_agent::providers::HttpProviderFactory;
use leadflow_agent::runtime::AgentRuntime;
use leadflow_core::config::{AppConfig, ConfigError, LoadOptions};
use leadflow_db::{
    connect_with_config, migrations, DbPool, SqlChatSessionRepository, SqlChatbotRepository,
};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub runtime: Arc<AgentRuntime>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

#[allow(dead_code)]
pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "engine.bootstrap.start",
        correlation_id = "bootstrap",
        llm_provider = ?config.llm.provider,
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "engine.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "engine.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let runtime = AgentRuntime::new(
        Arc::new(SqlChatbotRepository::new(db_pool.clone())),
        Arc::new(SqlChatSessionRepository::new(db_pool.clone())),
        Arc::new(HttpProviderFactory::new(config.llm.clone())),
        config.engine.clone(),
    );

    Ok(Application { config, db_pool, runtime: Arc::new(runtime) })
}

#[cfg(test)]
mod tests {
    use leadflow_core::config::{ConfigOverrides, LoadOptions};
    use leadflow_core::domain::tenant::TenantId;
    use leadflow_db::DEMO_TENANT_ID;

    use crate::bootstrap::bootstrap;

    fn overrides(database_url: &str) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_rejects_non_sqlite_database_urls() {
        let result = bootstrap(overrides("postgres://localhost/leadflow")).await;

        let message = result.err().expect("error").to_string();
        assert!(message.contains("database.url"));
    }

    #[tokio::test]
    async fn bootstrap_applies_migrations_and_wires_the_runtime() {
        let app = bootstrap(overrides("sqlite::memory:?cache=shared"))
            .await
            .expect("bootstrap should succeed with an in-memory database");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('chatbot', 'chat_session', 'chat_message')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("tables should exist after bootstrap");
        assert_eq!(table_count, 3);

        let error = app
            .runtime
            .load_tenant(&TenantId(DEMO_TENANT_ID.to_string()))
            .await
            .expect_err("no tenant has been seeded");
        assert!(error.to_string().contains("does not exist"));

        app.db_pool.close().await;
    }
}
