use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::envelope::CtaButton;
use crate::domain::flow::FlowGraph;
use crate::domain::intent::{normalize_label, IntentVocabulary};
use crate::errors::DomainError;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowUpOption {
    pub option_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub associated_intent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_text_override: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cta_button_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cta_button_link: Option<String>,
    #[serde(default)]
    pub collect_contact_info: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingDataItem {
    pub intent_id: String,
    #[serde(default)]
    pub nlp_training_phrases: Vec<String>,
    pub default_response_text: String,
    #[serde(default)]
    pub follow_up_options: Vec<FollowUpOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cta_button_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cta_button_link: Option<String>,
    #[serde(default)]
    pub lead: bool,
}

impl TrainingDataItem {
    /// Primary CTA, present only when both text and link are set.
    pub fn cta(&self) -> Option<CtaButton> {
        match (&self.cta_button_text, &self.cta_button_link) {
            (Some(text), Some(link)) if !text.trim().is_empty() && !link.trim().is_empty() => {
                Some(CtaButton { text: text.clone(), link: link.clone() })
            }
            _ => None,
        }
    }

    pub fn is_greeting(&self) -> bool {
        self.intent_id == "greeting" || self.intent_id.ends_with("_greeting")
    }
}

/// Tenant training data as stored. The shape is decided once, here, and
/// consumers match on the variant.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TrainingData {
    Structured(Vec<TrainingDataItem>),
    FlowGraph(FlowGraph),
    Unknown(Value),
}

impl Default for TrainingData {
    fn default() -> Self {
        Self::Structured(Vec::new())
    }
}

impl TrainingData {
    /// Parses stored text. Blank input is an empty structured set; text that
    /// is not JSON at all is kept as an opaque string.
    pub fn parse(raw: &str) -> Self {
        if raw.trim().is_empty() {
            return Self::default();
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => Self::from_value(value),
            Err(_) => Self::Unknown(Value::String(raw.to_string())),
        }
    }

    pub fn from_value(value: Value) -> Self {
        match &value {
            Value::Array(elements) if elements.is_empty() => Self::default(),
            Value::Array(elements)
                if elements.iter().all(|element| element.get("intent_id").is_some()) =>
            {
                serde_json::from_value::<Vec<TrainingDataItem>>(value.clone())
                    .map(Self::Structured)
                    .unwrap_or(Self::Unknown(value))
            }
            Value::Array(elements)
                if elements
                    .iter()
                    .all(|element| element.get("id").is_some() && element.get("type").is_some()) =>
            {
                serde_json::from_value::<FlowGraph>(value.clone())
                    .map(Self::FlowGraph)
                    .unwrap_or(Self::Unknown(value))
            }
            Value::Object(map) if map.contains_key("nodes") => {
                serde_json::from_value::<FlowGraph>(value.clone())
                    .map(Self::FlowGraph)
                    .unwrap_or(Self::Unknown(value))
            }
            _ => Self::Unknown(value),
        }
    }

    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "[]".to_string())
    }

    pub fn items(&self) -> &[TrainingDataItem] {
        match self {
            Self::Structured(items) => items,
            Self::FlowGraph(_) | Self::Unknown(_) => &[],
        }
    }

    pub fn item(&self, intent_id: &str) -> Option<&TrainingDataItem> {
        self.items().iter().find(|item| item.intent_id == intent_id)
    }

    pub fn flow_graph(&self) -> Option<&FlowGraph> {
        match self {
            Self::FlowGraph(graph) => Some(graph),
            Self::Structured(_) | Self::Unknown(_) => None,
        }
    }

    pub fn vocabulary(&self) -> IntentVocabulary {
        IntentVocabulary::new(self.items().iter().map(|item| item.intent_id.clone()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrainingWarning {
    DanglingReference { intent_id: String, option_text: String, target: String },
    MissingGreeting,
    SparseGreeting { intent_id: String, follow_ups: usize },
    /// Two ids reduce to the same classifier token, so at most one of them is ever detected.
    AmbiguousIntentIds { first: String, second: String, token: String },
}

impl fmt::Display for TrainingWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DanglingReference { intent_id, option_text, target } => write!(
                f,
                "intent `{intent_id}` option `{option_text}` references unknown intent `{target}`"
            ),
            Self::MissingGreeting => f.write_str("no greeting intent was generated"),
            Self::SparseGreeting { intent_id, follow_ups } => write!(
                f,
                "greeting intent `{intent_id}` has {follow_ups} follow-up options, expected at least 3"
            ),
            Self::AmbiguousIntentIds { first, second, token } => write!(
                f,
                "intents `{first}` and `{second}` both classify as `{token}` and cannot be told apart"
            ),
        }
    }
}

/// Validates a generated batch. Duplicate or empty intent ids are fatal;
/// unresolved follow-up references and a thin greeting are only reported.
pub fn validate_batch(items: &[TrainingDataItem]) -> Result<Vec<TrainingWarning>, DomainError> {
    let mut ids = BTreeSet::new();
    for item in items {
        if item.intent_id.trim().is_empty() {
            return Err(DomainError::TrainingValidation("intent_id must not be empty".to_string()));
        }
        if !ids.insert(item.intent_id.as_str()) {
            return Err(DomainError::TrainingValidation(format!(
                "duplicate intent_id `{}`",
                item.intent_id
            )));
        }
    }

    let mut warnings = Vec::new();
    for item in items {
        for option in &item.follow_up_options {
            if let Some(target) = option.associated_intent_id.as_deref() {
                if !ids.contains(target) {
                    warnings.push(TrainingWarning::DanglingReference {
                        intent_id: item.intent_id.clone(),
                        option_text: option.option_text.clone(),
                        target: target.to_string(),
                    });
                }
            }
        }
    }

    let mut tokens: BTreeMap<String, &str> = BTreeMap::new();
    for item in items {
        let token = normalize_label(&item.intent_id);
        match tokens.get(token.as_str()) {
            Some(first) => {
                warnings.push(TrainingWarning::AmbiguousIntentIds {
                    first: first.to_string(),
                    second: item.intent_id.clone(),
                    token,
                });
            }
            None => {
                tokens.insert(token, item.intent_id.as_str());
            }
        }
    }

    match items.iter().find(|item| item.is_greeting()) {
        None => warnings.push(TrainingWarning::MissingGreeting),
        Some(greeting) if greeting.follow_up_options.len() < 3 => {
            warnings.push(TrainingWarning::SparseGreeting {
                intent_id: greeting.intent_id.clone(),
                follow_ups: greeting.follow_up_options.len(),
            })
        }
        Some(_) => {}
    }

    Ok(warnings)
}
