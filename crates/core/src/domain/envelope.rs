//! The reply contract rendered by the chat widget. Every field is always
//! serialized so the widget never has to null-check.

use serde::{Deserialize, Serialize};

use crate::domain::intent::UNRECOGNIZED_INTENT;

/// Fixed reply used when the pipeline cannot produce anything better.
pub const APOLOGY_MESSAGE: &str =
    "I apologize, but I'm having trouble processing your request right now. Please try again later.";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CtaButton {
    pub text: String,
    pub link: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CtaOptionKind {
    #[serde(rename = "cta_option")]
    CtaOption,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ButtonPayload {
    Intent(String),
    CtaOption {
        #[serde(rename = "type")]
        kind: CtaOptionKind,
        link: String,
    },
}

impl ButtonPayload {
    pub fn intent(intent_id: impl Into<String>) -> Self {
        Self::Intent(intent_id.into())
    }

    pub fn link(link: impl Into<String>) -> Self {
        Self::CtaOption { kind: CtaOptionKind::CtaOption, link: link.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowUpButton {
    pub text: String,
    pub payload: ButtonPayload,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub message_text: String,
    #[serde(default)]
    pub follow_up_buttons: Vec<FollowUpButton>,
    #[serde(default)]
    pub cta_button: Option<CtaButton>,
    #[serde(default)]
    pub lead: bool,
    #[serde(default = "default_intent_id")]
    pub intent_id: String,
}

fn default_intent_id() -> String {
    UNRECOGNIZED_INTENT.to_string()
}

impl ResponseEnvelope {
    /// An envelope carrying only text, with every other field at its safe default.
    pub fn text(message_text: impl Into<String>) -> Self {
        Self {
            message_text: message_text.into(),
            follow_up_buttons: Vec::new(),
            cta_button: None,
            lead: false,
            intent_id: default_intent_id(),
        }
    }

    /// The universal fallback: apology text, no follow-ups, the tenant's
    /// default CTA, no lead prompt.
    pub fn circuit_breaker(default_cta: Option<CtaButton>) -> Self {
        Self { cta_button: default_cta, ..Self::text(APOLOGY_MESSAGE) }
    }

    pub fn is_circuit_breaker(&self) -> bool {
        self.message_text == APOLOGY_MESSAGE
    }
}
