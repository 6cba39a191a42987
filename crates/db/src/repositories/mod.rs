use async_trait::async_trait;
use thiserror::Error;

use leadflow_core::domain::conversation::{ConversationTurn, SessionId};
use leadflow_core::domain::tenant::{TenantConfig, TenantId};
use leadflow_core::domain::training::TrainingData;

pub mod chatbot;
pub mod memory;
pub mod session;

pub use chatbot::SqlChatbotRepository;
pub use memory::{InMemoryChatSessionRepository, InMemoryChatbotRepository};
pub use session::SqlChatSessionRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Tenant configuration lookup. Reads return a point-in-time snapshot.
#[async_trait]
pub trait ChatbotRepository: Send + Sync {
    async fn find_by_id(&self, id: &TenantId) -> Result<Option<TenantConfig>, RepositoryError>;
    async fn save(&self, tenant: TenantConfig) -> Result<(), RepositoryError>;
    /// Replaces the stored training data. Returns `false` when the tenant
    /// does not exist.
    async fn update_training_data(
        &self,
        id: &TenantId,
        training_data: &TrainingData,
    ) -> Result<bool, RepositoryError>;
}

/// Outcome of claiming a session id for a tenant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionClaim {
    Created,
    Resumed,
    /// The id already belongs to another tenant. Nothing was written.
    Foreign,
}

impl SessionClaim {
    pub fn is_foreign(self) -> bool {
        self == Self::Foreign
    }
}

/// Conversation store. Turns are append-only and a session belongs to the
/// tenant that created it.
#[async_trait]
pub trait ChatSessionRepository: Send + Sync {
    async fn ensure_session(
        &self,
        session_id: &SessionId,
        tenant_id: &TenantId,
    ) -> Result<SessionClaim, RepositoryError>;

    async fn append_turn(
        &self,
        session_id: &SessionId,
        turn: &ConversationTurn,
    ) -> Result<(), RepositoryError>;

    /// The last `limit` turns of a session owned by `tenant_id`, oldest
    /// first. Sessions of other tenants read as empty.
    async fn recent_turns(
        &self,
        session_id: &SessionId,
        tenant_id: &TenantId,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, RepositoryError>;
}
