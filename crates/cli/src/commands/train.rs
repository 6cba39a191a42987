use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{ensure, Context};
use leadflow_agent::providers::{HttpProviderFactory, ProviderFactory};
use leadflow_agent::runtime::{AgentRuntime, TrainRequest, TrainingOutcome};
use leadflow_agent::training::SourceFormat;
use leadflow_core::config::{AppConfig, LoadOptions};
use leadflow_core::domain::tenant::TenantId;
use leadflow_core::errors::ApplicationError;
use leadflow_db::{
    connect_with_config, migrations, InMemoryChatSessionRepository, InMemoryChatbotRepository,
    SqlChatSessionRepository, SqlChatbotRepository,
};
use serde_json::json;

use crate::commands::CommandResult;

#[derive(Clone, Debug)]
pub enum TrainSource {
    File { path: PathBuf, html: bool },
    Website(String),
}

#[derive(Clone, Debug)]
pub struct TrainArgs {
    pub source: TrainSource,
    pub chatbot: Option<String>,
}

pub fn run(args: TrainArgs) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "train",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };
    let factory = Arc::new(HttpProviderFactory::new(config.llm.clone()));
    run_with(config, factory, args)
}

/// Runs training against an explicit provider factory.
pub fn run_with(
    config: AppConfig,
    providers: Arc<dyn ProviderFactory>,
    args: TrainArgs,
) -> CommandResult {
    let (source, format) = match &args.source {
        TrainSource::File { path, html } => match read_source(path) {
            Ok(source) => (source, if *html { SourceFormat::Html } else { SourceFormat::Text }),
            Err(error) => {
                return CommandResult::failure("train", "input", format!("{error:#}"), 2)
            }
        },
        TrainSource::Website(url) => (url.clone(), SourceFormat::Url),
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "train",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let Some(chatbot) = args.chatbot else {
            let agent = AgentRuntime::new(
                Arc::new(InMemoryChatbotRepository::default()),
                Arc::new(InMemoryChatSessionRepository::default()),
                providers,
                config.engine.clone(),
            );
            let request = TrainRequest { tenant_id: None, business_name: None, source, format };
            return agent.train(request).await.map_err(training_failure);
        };

        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let agent = AgentRuntime::new(
            Arc::new(SqlChatbotRepository::new(pool.clone())),
            Arc::new(SqlChatSessionRepository::new(pool.clone())),
            providers,
            config.engine.clone(),
        );
        let request = TrainRequest {
            tenant_id: Some(TenantId(chatbot)),
            business_name: None,
            source,
            format,
        };
        let outcome = agent.train(request).await.map_err(training_failure);
        pool.close().await;
        outcome
    });

    match result {
        Ok(outcome) => CommandResult::success_with_details(
            "train",
            outcome_message(&outcome),
            Some(json!({
                "items": outcome.items,
                "warnings": outcome.warnings.iter().map(ToString::to_string).collect::<Vec<_>>(),
            })),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("train", error_class, message, exit_code)
        }
    }
}

fn read_source(path: &Path) -> anyhow::Result<String> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("could not read training input `{}`", path.display()))?;
    ensure!(!raw.trim().is_empty(), "training input `{}` is empty", path.display());
    Ok(raw)
}

fn training_failure(error: ApplicationError) -> (&'static str, String, u8) {
    match error {
        ApplicationError::NotFound(message) => ("not_found", message, 6),
        ApplicationError::Domain(error) => ("training_validation", error.to_string(), 7),
        ApplicationError::Configuration(message) => ("llm_configuration", message, 2),
        other => ("training_generation", other.to_string(), 7),
    }
}

fn outcome_message(outcome: &TrainingOutcome) -> String {
    let mut message = format!(
        "generated {} intents in {} attempt(s) with {} warning(s)",
        outcome.items.len(),
        outcome.attempts,
        outcome.warnings.len()
    );
    if outcome.repaired {
        message.push_str("; model output needed JSON repair");
    }
    if outcome.stored {
        message.push_str("; stored on chatbot");
    }
    message
}
