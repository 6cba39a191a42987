use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    User,
    Bot,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Bot => "bot",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Self::User),
            "bot" => Some(Self::Bot),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnMetadata {
    pub intent_id: Option<String>,
    #[serde(default)]
    pub lead: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub sender: Sender,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: TurnMetadata,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            sender: Sender::User,
            content: content.into(),
            created_at: Utc::now(),
            metadata: TurnMetadata::default(),
        }
    }

    pub fn bot(content: impl Into<String>, metadata: TurnMetadata) -> Self {
        Self { sender: Sender::Bot, content: content.into(), created_at: Utc::now(), metadata }
    }
}

/// Number of user-sent turns in `history`.
pub fn user_turn_count(history: &[ConversationTurn]) -> usize {
    history.iter().filter(|turn| turn.sender == Sender::User).count()
}

/// The last `window` turns, oldest first.
pub fn recent_window(history: &[ConversationTurn], window: usize) -> &[ConversationTurn] {
    &history[history.len().saturating_sub(window)..]
}

/// Renders turns as `User: ...` / `Assistant: ...` lines for prompts.
pub fn render_transcript(turns: &[ConversationTurn]) -> String {
    turns
        .iter()
        .map(|turn| {
            let speaker = match turn.sender {
                Sender::User => "User",
                Sender::Bot => "Assistant",
            };
            format!("{speaker}: {}", turn.content.trim())
        })
        .collect::<Vec<_>>()
        .join("\n")
}
