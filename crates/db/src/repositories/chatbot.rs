use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use sqlx::{sqlite::SqliteRow, Row};
use tracing::warn;

use leadflow_core::domain::flow::FlowGraph;
use leadflow_core::domain::tenant::{
    AiProvider, ContactInfo, FallbackMessages, TenantConfig, TenantId,
};
use leadflow_core::domain::training::TrainingData;

use super::{ChatbotRepository, RepositoryError};
use crate::DbPool;

pub struct SqlChatbotRepository {
    pool: DbPool,
}

impl SqlChatbotRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ChatbotRepository for SqlChatbotRepository {
    async fn find_by_id(&self, id: &TenantId) -> Result<Option<TenantConfig>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                id,
                name,
                training_data,
                plain_data,
                lead_collection_enabled,
                question_flow_enabled,
                question_flow,
                ai_provider,
                custom_api_key,
                ai_system_prompt,
                whatsapp,
                phone,
                email,
                website,
                allowed_domains,
                unrecognized_intent_message,
                default_cta_text,
                default_cta_link,
                is_active
             FROM chatbot
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(tenant_from_row).transpose()
    }

    async fn save(&self, tenant: TenantConfig) -> Result<(), RepositoryError> {
        let now = Utc::now().to_rfc3339();
        let question_flow = tenant
            .question_flow
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|error| RepositoryError::Decode(format!("question_flow: {error}")))?;
        let allowed_domains = serde_json::to_string(&tenant.allowed_domains)
            .map_err(|error| RepositoryError::Decode(format!("allowed_domains: {error}")))?;

        sqlx::query(
            "INSERT INTO chatbot (
                id,
                name,
                training_data,
                plain_data,
                lead_collection_enabled,
                question_flow_enabled,
                question_flow,
                ai_provider,
                custom_api_key,
                ai_system_prompt,
                whatsapp,
                phone,
                email,
                website,
                allowed_domains,
                unrecognized_intent_message,
                default_cta_text,
                default_cta_link,
                is_active,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                training_data = excluded.training_data,
                plain_data = excluded.plain_data,
                lead_collection_enabled = excluded.lead_collection_enabled,
                question_flow_enabled = excluded.question_flow_enabled,
                question_flow = excluded.question_flow,
                ai_provider = excluded.ai_provider,
                custom_api_key = excluded.custom_api_key,
                ai_system_prompt = excluded.ai_system_prompt,
                whatsapp = excluded.whatsapp,
                phone = excluded.phone,
                email = excluded.email,
                website = excluded.website,
                allowed_domains = excluded.allowed_domains,
                unrecognized_intent_message = excluded.unrecognized_intent_message,
                default_cta_text = excluded.default_cta_text,
                default_cta_link = excluded.default_cta_link,
                is_active = excluded.is_active,
                updated_at = excluded.updated_at",
        )
        .bind(&tenant.id.0)
        .bind(&tenant.name)
        .bind(tenant.training_data.to_json_string())
        .bind(&tenant.plain_data)
        .bind(tenant.lead_collection_enabled)
        .bind(tenant.question_flow_enabled)
        .bind(question_flow)
        .bind(tenant.ai_provider.as_str())
        .bind(tenant.custom_api_key.as_ref().map(|key| key.expose_secret().to_string()))
        .bind(&tenant.ai_system_prompt)
        .bind(&tenant.contact.whatsapp)
        .bind(&tenant.contact.phone)
        .bind(&tenant.contact.email)
        .bind(&tenant.contact.website)
        .bind(allowed_domains)
        .bind(&tenant.fallback.unrecognized_intent_message)
        .bind(&tenant.fallback.default_cta_text)
        .bind(&tenant.fallback.default_cta_link)
        .bind(tenant.is_active)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_training_data(
        &self,
        id: &TenantId,
        training_data: &TrainingData,
    ) -> Result<bool, RepositoryError> {
        let result =
            sqlx::query("UPDATE chatbot SET training_data = ?, updated_at = ? WHERE id = ?")
                .bind(training_data.to_json_string())
                .bind(Utc::now().to_rfc3339())
                .bind(&id.0)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn tenant_from_row(row: SqliteRow) -> Result<TenantConfig, RepositoryError> {
    let id: String = row.try_get("id")?;

    let training_data = row
        .try_get::<Option<String>, _>("training_data")?
        .map(|raw| TrainingData::parse(&raw))
        .unwrap_or_default();

    // A malformed flow disables matching for the tenant but never blocks loading.
    let question_flow = match row.try_get::<Option<String>, _>("question_flow")? {
        Some(raw) if !raw.trim().is_empty() => match serde_json::from_str::<FlowGraph>(&raw) {
            Ok(graph) => Some(graph),
            Err(error) => {
                warn!(
                    event_name = "db.chatbot.question_flow_unreadable",
                    chatbot_id = %id,
                    error = %error,
                    "stored question flow is not a readable graph"
                );
                None
            }
        },
        _ => None,
    };

    let allowed_domains = match row.try_get::<Option<String>, _>("allowed_domains")? {
        Some(raw) if !raw.trim().is_empty() => serde_json::from_str::<Vec<String>>(&raw)
            .map_err(|error| {
                RepositoryError::Decode(format!("invalid allowed_domains for `{id}`: {error}"))
            })?,
        _ => Vec::new(),
    };

    let defaults = FallbackMessages::default();
    let fallback = FallbackMessages {
        unrecognized_intent_message: non_blank(row.try_get("unrecognized_intent_message")?)
            .unwrap_or(defaults.unrecognized_intent_message),
        default_cta_text: non_blank(row.try_get("default_cta_text")?)
            .unwrap_or(defaults.default_cta_text),
        default_cta_link: non_blank(row.try_get("default_cta_link")?),
    };

    Ok(TenantConfig {
        name: row.try_get("name")?,
        training_data,
        plain_data: row.try_get("plain_data")?,
        lead_collection_enabled: row.try_get("lead_collection_enabled")?,
        question_flow_enabled: row.try_get("question_flow_enabled")?,
        question_flow,
        ai_provider: AiProvider::parse(&row.try_get::<String, _>("ai_provider")?),
        custom_api_key: non_blank(row.try_get("custom_api_key")?).map(SecretString::from),
        ai_system_prompt: row.try_get("ai_system_prompt")?,
        contact: ContactInfo {
            whatsapp: row.try_get("whatsapp")?,
            phone: row.try_get("phone")?,
            email: row.try_get("email")?,
            website: row.try_get("website")?,
        },
        fallback,
        allowed_domains,
        is_active: row.try_get("is_active")?,
        id: TenantId(id),
    })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use secrecy::{ExposeSecret, SecretString};

    use leadflow_core::domain::flow::{FlowGraph, FlowNode, FlowNodeType};
    use leadflow_core::domain::tenant::{AiProvider, TenantConfig, TenantId};
    use leadflow_core::domain::training::{TrainingData, TrainingDataItem};

    use super::SqlChatbotRepository;
    use crate::repositories::ChatbotRepository;
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn greeting_item() -> TrainingDataItem {
        TrainingDataItem {
            intent_id: "greeting".to_string(),
            nlp_training_phrases: vec!["hi".to_string(), "hello".to_string()],
            default_response_text: "Hello! How can I help?".to_string(),
            follow_up_options: Vec::new(),
            cta_button_text: None,
            cta_button_link: None,
            lead: false,
        }
    }

    #[tokio::test]
    async fn sql_chatbot_repo_round_trip() {
        let repo = SqlChatbotRepository::new(setup_pool().await);
        let mut tenant = TenantConfig::new("bot-1", "Acme Studio");
        tenant.training_data = TrainingData::Structured(vec![greeting_item()]);
        tenant.question_flow_enabled = true;
        tenant.question_flow = Some(FlowGraph::new(vec![FlowNode::new(
            "start",
            FlowNodeType::Statement,
            "Welcome",
        )
        .with_next("end")]));
        tenant.ai_provider = AiProvider::OpenAi;
        tenant.custom_api_key = Some(SecretString::from("sk-tenant".to_string()));
        tenant.contact.whatsapp = Some("+1 555 0100".to_string());
        tenant.allowed_domains = vec!["acme.test".to_string()];
        tenant.fallback.default_cta_link = Some("https://acme.test/contact".to_string());

        repo.save(tenant.clone()).await.expect("save tenant");
        let found = repo
            .find_by_id(&TenantId("bot-1".to_string()))
            .await
            .expect("find tenant")
            .expect("tenant exists");

        assert_eq!(found.name, "Acme Studio");
        assert_eq!(found.training_data, tenant.training_data);
        assert_eq!(found.question_flow, tenant.question_flow);
        assert_eq!(found.ai_provider, AiProvider::OpenAi);
        assert_eq!(
            found.custom_api_key.as_ref().map(|key| key.expose_secret().to_string()),
            Some("sk-tenant".to_string())
        );
        assert_eq!(found.contact, tenant.contact);
        assert_eq!(found.allowed_domains, tenant.allowed_domains);
        assert_eq!(found.fallback, tenant.fallback);
        assert!(found.lead_collection_enabled);
        assert!(found.is_active);
    }

    #[tokio::test]
    async fn missing_tenant_is_none() {
        let repo = SqlChatbotRepository::new(setup_pool().await);
        let found = repo.find_by_id(&TenantId("ghost".to_string())).await.expect("query");
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn save_upserts_existing_tenant() {
        let repo = SqlChatbotRepository::new(setup_pool().await);
        let mut tenant = TenantConfig::new("bot-1", "Before");
        repo.save(tenant.clone()).await.expect("first save");

        tenant.name = "After".to_string();
        tenant.lead_collection_enabled = false;
        repo.save(tenant).await.expect("second save");

        let found = repo
            .find_by_id(&TenantId("bot-1".to_string()))
            .await
            .expect("find")
            .expect("tenant exists");
        assert_eq!(found.name, "After");
        assert!(!found.lead_collection_enabled);
    }

    #[tokio::test]
    async fn update_training_data_reports_missing_tenant() {
        let repo = SqlChatbotRepository::new(setup_pool().await);
        repo.save(TenantConfig::new("bot-1", "Acme")).await.expect("save");

        let data = TrainingData::Structured(vec![greeting_item()]);
        let updated =
            repo.update_training_data(&TenantId("bot-1".to_string()), &data).await.expect("update");
        let missing =
            repo.update_training_data(&TenantId("nope".to_string()), &data).await.expect("update");

        assert!(updated);
        assert!(!missing);
        let found = repo
            .find_by_id(&TenantId("bot-1".to_string()))
            .await
            .expect("find")
            .expect("tenant exists");
        assert_eq!(found.training_data, data);
    }

    #[tokio::test]
    async fn unreadable_question_flow_loads_without_graph() {
        let pool = setup_pool().await;
        sqlx::query(
            "INSERT INTO chatbot (id, name, question_flow, question_flow_enabled, created_at, updated_at)
             VALUES ('bot-1', 'Acme', '{not json', 1, '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
        )
        .execute(&pool)
        .await
        .expect("insert");

        let repo = SqlChatbotRepository::new(pool);
        let found = repo
            .find_by_id(&TenantId("bot-1".to_string()))
            .await
            .expect("find")
            .expect("tenant exists");
        assert!(found.question_flow.is_none());
        assert_eq!(found.training_data, TrainingData::default());
    }
}
