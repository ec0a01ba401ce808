use std::sync::Arc;
use std::time::Duration;

use callquote_agent::conversation::RuleBasedLanguageModel;
use callquote_agent::extraction::Extractor;
use callquote_agent::llm::{HttpLanguageModel, LanguageModel, LlmError};
use callquote_agent::runtime::AgentRuntime;
use callquote_agent::tools::{BusinessTools, HttpToolGateway, ToolError};
use callquote_core::config::{AppConfig, ConfigError, LlmConfig, LlmProvider, LoadOptions};
use callquote_db::repositories::{SqlConversationRepository, SqlTenantRepository};
use callquote_db::{connect_with_settings, migrations, DbPool};
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
    #[error("language model setup failed: {0}")]
    LanguageModel(#[source] LlmError),
    #[error("tool gateway setup failed: {0}")]
    ToolGateway(#[source] ToolError),
}

#[cfg(test)]
pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    bootstrap_with_config(AppConfig::load(options)?).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
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

    let model = build_language_model(&config.llm).map_err(BootstrapError::LanguageModel)?;
    let gateway = HttpToolGateway::from_config(&config.tools).map_err(BootstrapError::ToolGateway)?;
    info!(
        event_name = "system.bootstrap.collaborators_ready",
        correlation_id = "bootstrap",
        llm_provider = config.llm.provider.as_str(),
        model = model.name(),
        tools_base_url = %config.tools.base_url,
        "language model and tool gateway configured"
    );

    let runtime = AgentRuntime::new(
        Arc::new(SqlConversationRepository::new(db_pool.clone())),
        Arc::new(SqlTenantRepository::new(db_pool.clone())),
        Extractor::new(model, Duration::from_secs(config.llm.timeout_secs)),
        BusinessTools::new(Arc::new(gateway), Duration::from_secs(config.tools.timeout_secs)),
        config.conversation.clone(),
    );

    Ok(Application { config, db_pool, runtime: Arc::new(runtime) })
}

/// One shared, stateless client for the whole process.
pub fn build_language_model(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>, LlmError> {
    match config.provider {
        LlmProvider::RuleBased => Ok(Arc::new(RuleBasedLanguageModel::new())),
        LlmProvider::OpenAi | LlmProvider::Anthropic | LlmProvider::Ollama => {
            Ok(Arc::new(HttpLanguageModel::from_config(config)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use callquote_core::config::{ConfigOverrides, LlmProvider, LoadOptions};

    use crate::bootstrap::{bootstrap, build_language_model};

    fn overrides(database_url: &str) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                llm_provider: Some(LlmProvider::RuleBased),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_migrates_and_wires_the_offline_model() {
        let app = bootstrap(overrides("sqlite::memory:")).await.expect("bootstrap");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('conversation_state', 'tenant_profile')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("count tables");
        assert_eq!(table_count, 2);
        assert_eq!(app.runtime.model_name(), "rule_based");

        app.db_pool.close().await;
    }

    #[tokio::test]
    async fn bootstrap_rejects_non_sqlite_urls() {
        let result = bootstrap(overrides("postgres://localhost/callquote")).await;

        let message = result.err().expect("error").to_string();
        assert!(message.contains("database.url"), "{message}");
    }

    #[test]
    fn ollama_without_base_url_is_a_setup_error() {
        let mut config = callquote_core::config::AppConfig::default().llm;
        config.provider = LlmProvider::Ollama;
        config.base_url = None;

        assert!(build_language_model(&config).is_err());
    }
}
