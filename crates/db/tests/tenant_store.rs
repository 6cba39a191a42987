use leadflow_core::domain::conversation::{ConversationTurn, SessionId, TurnMetadata};
use leadflow_core::flows::FlowTemplate;
use leadflow_db::migrations;
use leadflow_db::{
    connect_with_settings, seed_demo_tenant, ChatSessionRepository, ChatbotRepository,
    SqlChatSessionRepository, SqlChatbotRepository,
};

#[tokio::test]
async fn seeded_tenant_supports_a_full_conversation() {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
    migrations::run_pending(&pool).await.expect("run migrations");
    let seeded = seed_demo_tenant(&pool, FlowTemplate::Ecommerce).await.expect("seed");

    let tenants = SqlChatbotRepository::new(pool.clone());
    let tenant = tenants.find_by_id(&seeded.tenant_id).await.expect("find").expect("tenant");
    let flow = tenant.active_flow().expect("flow enabled");
    assert_eq!(flow.validate(), Ok(()));
    assert!(tenant.training_data.vocabulary().contains("pricing"));

    let sessions = SqlChatSessionRepository::new(pool);
    let session = SessionId::generate();
    sessions.ensure_session(&session, &tenant.id).await.expect("session");
    for round in 0..4 {
        sessions
            .append_turn(&session, &ConversationTurn::user(format!("question {round}")))
            .await
            .expect("user turn");
        sessions
            .append_turn(
                &session,
                &ConversationTurn::bot(format!("answer {round}"), TurnMetadata::default()),
            )
            .await
            .expect("bot turn");
    }

    let window = sessions.recent_turns(&session, &tenant.id, 6).await.expect("window");
    assert_eq!(window.len(), 6);
    assert_eq!(window.first().map(|turn| turn.content.as_str()), Some("question 1"));
    assert_eq!(window.last().map(|turn| turn.content.as_str()), Some("answer 3"));
}
