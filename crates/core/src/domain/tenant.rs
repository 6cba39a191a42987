use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::domain::envelope::CtaButton;
use crate::domain::flow::FlowGraph;
use crate::domain::training::TrainingData;

pub const DEFAULT_UNRECOGNIZED_MESSAGE: &str =
    "I'm not sure I understand. Could you rephrase that, or pick one of the options below?";
pub const DEFAULT_CTA_TEXT: &str = "Contact Us on WhatsApp";

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(pub String);

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which model backend answers for a tenant. `Platform` defers to the
/// deployment-wide provider.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiProvider {
    #[default]
    Platform,
    Google,
    OpenAi,
}

impl AiProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Platform => "platform",
            Self::Google => "google",
            Self::OpenAi => "openai",
        }
    }

    /// Unknown values fall back to the platform provider.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "google" | "gemini" => Self::Google,
            "openai" => Self::OpenAi,
            _ => Self::Platform,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub whatsapp: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
}

impl ContactInfo {
    /// WhatsApp deep link built from the digits of the configured number.
    pub fn whatsapp_link(&self) -> Option<String> {
        let digits: String = self
            .whatsapp
            .as_deref()?
            .chars()
            .filter(char::is_ascii_digit)
            .collect();
        if digits.is_empty() {
            return None;
        }
        Some(format!("https://wa.me/{digits}?text=Hello%2C%20I%20have%20a%20question."))
    }

    pub fn is_empty(&self) -> bool {
        [&self.whatsapp, &self.phone, &self.email, &self.website]
            .iter()
            .all(|field| field.as_deref().map(str::trim).unwrap_or_default().is_empty())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FallbackMessages {
    pub unrecognized_intent_message: String,
    pub default_cta_text: String,
    pub default_cta_link: Option<String>,
}

impl Default for FallbackMessages {
    fn default() -> Self {
        Self {
            unrecognized_intent_message: DEFAULT_UNRECOGNIZED_MESSAGE.to_string(),
            default_cta_text: DEFAULT_CTA_TEXT.to_string(),
            default_cta_link: None,
        }
    }
}

/// Point-in-time snapshot of one chatbot's configuration.
#[derive(Clone, Debug)]
pub struct TenantConfig {
    pub id: TenantId,
    pub name: String,
    pub training_data: TrainingData,
    pub plain_data: Option<String>,
    pub lead_collection_enabled: bool,
    pub question_flow_enabled: bool,
    pub question_flow: Option<FlowGraph>,
    pub ai_provider: AiProvider,
    pub custom_api_key: Option<SecretString>,
    pub ai_system_prompt: Option<String>,
    pub contact: ContactInfo,
    pub fallback: FallbackMessages,
    pub allowed_domains: Vec<String>,
    pub is_active: bool,
}

impl TenantConfig {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: TenantId(id.into()),
            name: name.into(),
            training_data: TrainingData::default(),
            plain_data: None,
            lead_collection_enabled: true,
            question_flow_enabled: false,
            question_flow: None,
            ai_provider: AiProvider::Platform,
            custom_api_key: None,
            ai_system_prompt: None,
            contact: ContactInfo::default(),
            fallback: FallbackMessages::default(),
            allowed_domains: Vec::new(),
            is_active: true,
        }
    }

    /// Graph used for deterministic matching: the dedicated question flow,
    /// else training data stored in flow form. `None` while the flow is off.
    pub fn active_flow(&self) -> Option<&FlowGraph> {
        if !self.question_flow_enabled {
            return None;
        }
        self.question_flow.as_ref().or_else(|| self.training_data.flow_graph())
    }

    /// Tenant default CTA; the link falls back to the WhatsApp deep link.
    pub fn default_cta(&self) -> Option<CtaButton> {
        let link = self
            .fallback
            .default_cta_link
            .clone()
            .filter(|link| !link.trim().is_empty())
            .or_else(|| self.contact.whatsapp_link())?;
        Some(CtaButton { text: self.fallback.default_cta_text.clone(), link })
    }

    /// Origin check for embedded widgets. An empty allow-list admits every
    /// origin; otherwise the origin host must contain one listed domain.
    pub fn allows_origin(&self, origin: Option<&str>) -> bool {
        let domains: Vec<&str> = self
            .allowed_domains
            .iter()
            .map(|domain| domain.trim())
            .filter(|domain| !domain.is_empty())
            .collect();
        if domains.is_empty() {
            return true;
        }

        let Some(host) = origin.map(origin_host) else {
            return false;
        };
        domains.iter().any(|domain| host.contains(&domain.to_ascii_lowercase()))
    }
}

fn origin_host(origin: &str) -> String {
    let without_scheme = origin.split_once("://").map(|(_, rest)| rest).unwrap_or(origin);
    without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default()
        .split(':')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase()
}
