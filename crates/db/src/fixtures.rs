//! Demo tenant used by `leadflow seed` and the end-to-end tests.

use leadflow_core::domain::tenant::{TenantConfig, TenantId};
use leadflow_core::domain::training::{FollowUpOption, TrainingData, TrainingDataItem};
use leadflow_core::flows::FlowTemplate;

use crate::connection::DbPool;
use crate::repositories::{ChatbotRepository, RepositoryError, SqlChatbotRepository};

pub const DEMO_TENANT_ID: &str = "demo-chatbot";
const DEMO_WHATSAPP: &str = "+1 (555) 010-0200";

#[derive(Debug)]
pub struct SeedResult {
    pub tenant_id: TenantId,
    pub template: FlowTemplate,
    pub intents_seeded: usize,
    pub flow_nodes_seeded: usize,
}

/// Upserts the demo tenant with sample training data and the flow template.
/// Running it twice leaves a single tenant behind.
pub async fn seed_demo_tenant(
    pool: &DbPool,
    template: FlowTemplate,
) -> Result<SeedResult, RepositoryError> {
    let tenant = demo_tenant(template);
    let result = SeedResult {
        tenant_id: tenant.id.clone(),
        template,
        intents_seeded: tenant.training_data.items().len(),
        flow_nodes_seeded: tenant.question_flow.as_ref().map_or(0, |graph| graph.nodes.len()),
    };

    SqlChatbotRepository::new(pool.clone()).save(tenant).await?;
    Ok(result)
}

pub fn demo_tenant(template: FlowTemplate) -> TenantConfig {
    let mut tenant = TenantConfig::new(DEMO_TENANT_ID, "Demo Studio");
    tenant.training_data = TrainingData::Structured(demo_training_items());
    tenant.question_flow_enabled = true;
    tenant.question_flow = Some(template.graph());
    tenant.contact.whatsapp = Some(DEMO_WHATSAPP.to_string());
    tenant.contact.email = Some("hello@demo-studio.test".to_string());
    tenant.contact.website = Some("https://demo-studio.test".to_string());
    tenant
}

pub fn demo_training_items() -> Vec<TrainingDataItem> {
    vec![
        TrainingDataItem {
            intent_id: "greeting".to_string(),
            nlp_training_phrases: phrases(&["hi", "hello", "hey there", "good morning"]),
            default_response_text: "Hello! Welcome to Demo Studio. What can I help you with?"
                .to_string(),
            follow_up_options: vec![
                follow_up("Our services", "services"),
                follow_up("Pricing", "pricing"),
                follow_up("Talk to someone", "contact"),
            ],
            ..TrainingDataItem::default()
        },
        TrainingDataItem {
            intent_id: "services".to_string(),
            nlp_training_phrases: phrases(&["what do you do", "services", "what do you offer"]),
            default_response_text:
                "We design and build websites, online stores and brand identities.".to_string(),
            follow_up_options: vec![follow_up("See pricing", "pricing")],
            ..TrainingDataItem::default()
        },
        TrainingDataItem {
            intent_id: "pricing".to_string(),
            nlp_training_phrases: phrases(&["how much", "price", "cost", "quote"]),
            default_response_text: "Projects start at $1,500 depending on scope.".to_string(),
            follow_up_options: vec![follow_up("Our services", "services")],
            cta_button_text: Some("Get a quote".to_string()),
            cta_button_link: Some("https://demo-studio.test/quote".to_string()),
            lead: true,
        },
        TrainingDataItem {
            intent_id: "contact".to_string(),
            nlp_training_phrases: phrases(&["contact", "talk to a human", "phone number"]),
            default_response_text: "You can reach our team any weekday from 9am to 6pm."
                .to_string(),
            lead: true,
            ..TrainingDataItem::default()
        },
    ]
}

fn phrases(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

fn follow_up(text: &str, intent_id: &str) -> FollowUpOption {
    FollowUpOption {
        option_text: text.to_string(),
        associated_intent_id: Some(intent_id.to_string()),
        ..FollowUpOption::default()
    }
}

#[cfg(test)]
mod tests {
    use leadflow_core::domain::training::validate_batch;
    use leadflow_core::flows::FlowTemplate;

    use super::{demo_training_items, seed_demo_tenant, DEMO_TENANT_ID};
    use crate::repositories::{ChatbotRepository, SqlChatbotRepository};
    use crate::{connect_with_settings, migrations};

    #[test]
    fn demo_training_items_validate_without_warnings() {
        let warnings = validate_batch(&demo_training_items()).expect("valid batch");
        assert!(warnings.is_empty(), "unexpected warnings: {warnings:?}");
    }

    #[tokio::test]
    async fn seed_is_idempotent() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("run migrations");

        let first = seed_demo_tenant(&pool, FlowTemplate::General).await.expect("first seed");
        let second =
            seed_demo_tenant(&pool, FlowTemplate::Healthcare).await.expect("second seed");
        assert_eq!(first.intents_seeded, 4);
        assert_eq!(second.tenant_id.0, DEMO_TENANT_ID);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM chatbot")
            .fetch_one(&pool)
            .await
            .expect("count");
        assert_eq!(count, 1);

        let tenant = SqlChatbotRepository::new(pool)
            .find_by_id(&second.tenant_id)
            .await
            .expect("find")
            .expect("seeded tenant");
        assert_eq!(tenant.question_flow, Some(FlowTemplate::Healthcare.graph()));
        assert!(tenant.default_cta().is_some());
    }
}
