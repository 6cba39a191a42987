use std::collections::hash_map::Entry;
use std::collections::HashMap;

use tokio::sync::RwLock;

use leadflow_core::domain::conversation::{ConversationTurn, SessionId};
use leadflow_core::domain::tenant::{TenantConfig, TenantId};
use leadflow_core::domain::training::TrainingData;

use super::{ChatSessionRepository, ChatbotRepository, RepositoryError, SessionClaim};

#[derive(Default)]
pub struct InMemoryChatbotRepository {
    tenants: RwLock<HashMap<String, TenantConfig>>,
}

impl InMemoryChatbotRepository {
    pub fn with_tenants(tenants: impl IntoIterator<Item = TenantConfig>) -> Self {
        let tenants = tenants.into_iter().map(|tenant| (tenant.id.0.clone(), tenant)).collect();
        Self { tenants: RwLock::new(tenants) }
    }
}

#[async_trait::async_trait]
impl ChatbotRepository for InMemoryChatbotRepository {
    async fn find_by_id(&self, id: &TenantId) -> Result<Option<TenantConfig>, RepositoryError> {
        let tenants = self.tenants.read().await;
        Ok(tenants.get(&id.0).cloned())
    }

    async fn save(&self, tenant: TenantConfig) -> Result<(), RepositoryError> {
        let mut tenants = self.tenants.write().await;
        tenants.insert(tenant.id.0.clone(), tenant);
        Ok(())
    }

    async fn update_training_data(
        &self,
        id: &TenantId,
        training_data: &TrainingData,
    ) -> Result<bool, RepositoryError> {
        let mut tenants = self.tenants.write().await;
        Ok(match tenants.get_mut(&id.0) {
            Some(tenant) => {
                tenant.training_data = training_data.clone();
                true
            }
            None => false,
        })
    }
}

struct StoredSession {
    tenant_id: TenantId,
    turns: Vec<ConversationTurn>,
}

#[derive(Default)]
pub struct InMemoryChatSessionRepository {
    sessions: RwLock<HashMap<String, StoredSession>>,
}

impl InMemoryChatSessionRepository {
    /// Owner of a session, if it has been created.
    pub async fn tenant_of(&self, session_id: &SessionId) -> Option<TenantId> {
        let sessions = self.sessions.read().await;
        sessions.get(&session_id.0).map(|session| session.tenant_id.clone())
    }
}

#[async_trait::async_trait]
impl ChatSessionRepository for InMemoryChatSessionRepository {
    async fn ensure_session(
        &self,
        session_id: &SessionId,
        tenant_id: &TenantId,
    ) -> Result<SessionClaim, RepositoryError> {
        let mut sessions = self.sessions.write().await;
        Ok(match sessions.entry(session_id.0.clone()) {
            Entry::Occupied(entry) if entry.get().tenant_id == *tenant_id => SessionClaim::Resumed,
            Entry::Occupied(_) => SessionClaim::Foreign,
            Entry::Vacant(entry) => {
                entry.insert(StoredSession { tenant_id: tenant_id.clone(), turns: Vec::new() });
                SessionClaim::Created
            }
        })
    }

    async fn append_turn(
        &self,
        session_id: &SessionId,
        turn: &ConversationTurn,
    ) -> Result<(), RepositoryError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&session_id.0)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown session `{session_id}`")))?;
        session.turns.push(turn.clone());
        Ok(())
    }

    async fn recent_turns(
        &self,
        session_id: &SessionId,
        tenant_id: &TenantId,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, RepositoryError> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(&session_id.0)
            .filter(|session| session.tenant_id == *tenant_id)
            .map(|session| {
                let start = session.turns.len().saturating_sub(limit);
                session.turns[start..].to_vec()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use leadflow_core::domain::conversation::{ConversationTurn, SessionId, TurnMetadata};
    use leadflow_core::domain::tenant::{TenantConfig, TenantId};
    use leadflow_core::domain::training::{TrainingData, TrainingDataItem};

    use crate::repositories::{
        ChatSessionRepository, ChatbotRepository, InMemoryChatSessionRepository,
        InMemoryChatbotRepository, SessionClaim,
    };

    #[tokio::test]
    async fn in_memory_chatbot_repo_round_trip() {
        let repo = InMemoryChatbotRepository::default();
        let tenant = TenantConfig::new("bot-1", "Acme");

        repo.save(tenant.clone()).await.expect("save tenant");
        let found = repo.find_by_id(&tenant.id).await.expect("find tenant");

        assert_eq!(found.map(|tenant| tenant.name), Some("Acme".to_string()));
    }

    #[tokio::test]
    async fn in_memory_training_update_touches_only_known_tenants() {
        let repo = InMemoryChatbotRepository::with_tenants([TenantConfig::new("bot-1", "Acme")]);
        let data = TrainingData::Structured(vec![TrainingDataItem {
            intent_id: "greeting".to_string(),
            default_response_text: "Hi".to_string(),
            ..TrainingDataItem::default()
        }]);

        assert!(repo.update_training_data(&TenantId("bot-1".into()), &data).await.expect("ok"));
        assert!(!repo.update_training_data(&TenantId("bot-2".into()), &data).await.expect("ok"));

        let found = repo.find_by_id(&TenantId("bot-1".into())).await.expect("find");
        assert_eq!(found.map(|tenant| tenant.training_data), Some(data));
    }

    #[tokio::test]
    async fn in_memory_session_keeps_the_latest_window() {
        let repo = InMemoryChatSessionRepository::default();
        let session = SessionId("s-1".to_string());
        repo.ensure_session(&session, &TenantId("bot-1".into())).await.expect("session");

        for content in ["a", "b", "c"] {
            repo.append_turn(&session, &ConversationTurn::user(content)).await.expect("append");
        }
        repo.append_turn(&session, &ConversationTurn::bot("d", TurnMetadata::default()))
            .await
            .expect("append");

        let recent = repo.recent_turns(&session, &TenantId("bot-1".into()), 2).await.expect("recent");
        let contents: Vec<&str> = recent.iter().map(|turn| turn.content.as_str()).collect();
        assert_eq!(contents, vec!["c", "d"]);
        assert_eq!(repo.tenant_of(&session).await, Some(TenantId("bot-1".into())));
    }

    #[tokio::test]
    async fn in_memory_append_requires_session() {
        let repo = InMemoryChatSessionRepository::default();
        let result =
            repo.append_turn(&SessionId("missing".into()), &ConversationTurn::user("hi")).await;
        assert!(result.is_err());
        assert!(repo
            .recent_turns(&SessionId("missing".into()), &TenantId("bot-1".into()), 6)
            .await
            .expect("recent")
            .is_empty());
    }

    #[tokio::test]
    async fn in_memory_session_rejects_a_second_tenant() {
        let repo = InMemoryChatSessionRepository::default();
        let session = SessionId("s-1".to_string());
        let owner = TenantId("bot-1".into());
        let other = TenantId("bot-2".into());

        assert_eq!(repo.ensure_session(&session, &owner).await.expect("claim"), SessionClaim::Created);
        repo.append_turn(&session, &ConversationTurn::user("secret")).await.expect("append");

        assert_eq!(repo.ensure_session(&session, &other).await.expect("claim"), SessionClaim::Foreign);
        assert_eq!(repo.ensure_session(&session, &owner).await.expect("claim"), SessionClaim::Resumed);
        assert!(repo.recent_turns(&session, &other, 6).await.expect("recent").is_empty());
        assert_eq!(repo.tenant_of(&session).await, Some(owner));
    }
}
