pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;

pub use connection::{connect, connect_with_config, connect_with_settings, DbPool};
pub use fixtures::{seed_demo_tenant, SeedResult, DEMO_TENANT_ID};
pub use repositories::{
    ChatSessionRepository, ChatbotRepository, InMemoryChatSessionRepository,
    InMemoryChatbotRepository, RepositoryError, SessionClaim, SqlChatSessionRepository,
    SqlChatbotRepository,
};
