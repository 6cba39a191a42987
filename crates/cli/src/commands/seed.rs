use crate::commands::CommandResult;
use leadflow_core::config::{AppConfig, LoadOptions};
use leadflow_core::flows::FlowTemplate;
use leadflow_db::{connect_with_config, migrations, seed_demo_tenant, SeedResult};

pub fn run(template: FlowTemplate) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "seed",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "seed",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let seeded = seed_demo_tenant(&pool, template)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 6u8));

        pool.close().await;
        seeded
    });

    match result {
        Ok(seeded) => CommandResult::success("seed", seed_message(&seeded)),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn seed_message(seeded: &SeedResult) -> String {
    format!(
        "seeded chatbot `{}` with {} intents and the {} flow ({} nodes)",
        seeded.tenant_id,
        seeded.intents_seeded,
        seeded.template.as_str(),
        seeded.flow_nodes_seeded
    )
}

#[cfg(test)]
mod tests {
    use leadflow_core::domain::tenant::TenantId;
    use leadflow_core::flows::FlowTemplate;
    use leadflow_db::SeedResult;

    use super::seed_message;

    #[test]
    fn seed_message_names_tenant_and_template() {
        let message = seed_message(&SeedResult {
            tenant_id: TenantId("demo-chatbot".to_string()),
            template: FlowTemplate::Healthcare,
            intents_seeded: 4,
            flow_nodes_seeded: 6,
        });

        assert_eq!(
            message,
            "seeded chatbot `demo-chatbot` with 4 intents and the healthcare flow (6 nodes)"
        );
    }
}
