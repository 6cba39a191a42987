//! Offline generator that turns a tenant's free text into training items.

use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use leadflow_core::config::EngineConfig;
use leadflow_core::domain::tenant::ContactInfo;
use leadflow_core::domain::training::{validate_batch, TrainingDataItem, TrainingWarning};
use leadflow_core::errors::DomainError;

use crate::llm::{complete_within, LlmClient, LlmError};
use crate::repair::parse_lenient;
use crate::website::WebsiteError;

pub const OVERLOADED_MESSAGE: &str =
    "The AI model is temporarily overloaded. Please try again in a few moments.";

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("training source text is empty")]
    EmptySource,
    #[error("The AI model is temporarily overloaded. Please try again in a few moments.")]
    Overloaded { attempts: u32 },
    #[error("training generation failed: {0}")]
    Provider(#[source] LlmError),
    #[error("model output is not valid training JSON: {0}")]
    Parse(String),
    #[error(transparent)]
    Validation(#[from] DomainError),
    #[error(transparent)]
    Website(#[from] WebsiteError),
}

impl TrainingError {
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::EmptySource => "empty_source",
            Self::Overloaded { .. } => "overloaded",
            Self::Provider(_) => "provider",
            Self::Parse(_) => "parse",
            Self::Validation(_) => "validation",
            Self::Website(_) => "website",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    #[default]
    Text,
    Html,
    /// A website address. Its pages are fetched and reduced to text before
    /// generation, so the generator itself treats the source as text.
    Url,
}

impl FromStr for SourceFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "html" => Ok(Self::Html),
            "url" | "website" => Ok(Self::Url),
            other => Err(format!("unknown source format `{other}`, expected text, html or url")),
        }
    }
}

/// Exponential backoff for capacity errors: `initial * 2^(attempt - 1)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, initial_backoff: Duration::from_millis(1000) }
    }
}

impl RetryPolicy {
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.initial_backoff.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

#[derive(Clone, Copy, Debug)]
pub struct TrainingRequest<'a> {
    pub business_name: &'a str,
    pub source: &'a str,
    pub format: SourceFormat,
    pub contact: &'a ContactInfo,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GeneratedTraining {
    pub items: Vec<TrainingDataItem>,
    pub warnings: Vec<TrainingWarning>,
    pub repaired: bool,
    pub attempts: u32,
}

#[derive(Clone, Copy, Debug)]
pub struct TrainingGenerator {
    retry: RetryPolicy,
    budget: Duration,
}

impl TrainingGenerator {
    pub fn new(retry: RetryPolicy, budget: Duration) -> Self {
        Self { retry, budget }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            RetryPolicy {
                max_attempts: config.training_max_attempts.max(1),
                initial_backoff: Duration::from_millis(config.training_initial_backoff_ms),
            },
            Duration::from_secs(config.generation_timeout_secs.max(1)),
        )
    }

    pub async fn generate(
        &self,
        client: &dyn LlmClient,
        request: &TrainingRequest<'_>,
    ) -> Result<GeneratedTraining, TrainingError> {
        let source = match request.format {
            SourceFormat::Html => html_to_text(request.source),
            SourceFormat::Text | SourceFormat::Url => request.source.trim().to_string(),
        };
        if source.is_empty() {
            return Err(TrainingError::EmptySource);
        }

        let prompt = build_training_prompt(request.business_name, &source, request.contact);
        let (raw, attempts) = self.complete_with_retry(client, &prompt).await?;
        let (items, repaired) = parse_training_items(&raw)?;
        let warnings = validate_batch(&items)?;

        for warning in &warnings {
            warn!(event_name = "engine.training.warning", warning = %warning, "training data warning");
        }
        info!(
            event_name = "engine.training.generated",
            provider = client.name(),
            items = items.len(),
            warnings = warnings.len(),
            repaired,
            attempts,
            "training data generated"
        );
        Ok(GeneratedTraining { items, warnings, repaired, attempts })
    }

    async fn complete_with_retry(
        &self,
        client: &dyn LlmClient,
        prompt: &str,
    ) -> Result<(String, u32), TrainingError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match complete_within(client, prompt, self.budget).await {
                Ok(result) => return Ok((result.text, attempt)),
                Err(error) if error.is_retryable() && attempt < max_attempts => {
                    let delay = self.retry.delay_after(attempt);
                    warn!(
                        event_name = "engine.training.retry",
                        provider = client.name(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "provider overloaded; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) if error.is_retryable() => {
                    return Err(TrainingError::Overloaded { attempts: attempt });
                }
                Err(error) => return Err(TrainingError::Provider(error)),
            }
        }
    }
}

/// Strict parse first, structural repair second. Accepts a bare array or an
/// object wrapping the array under `intents`, `items` or `training_data`.
pub fn parse_training_items(raw: &str) -> Result<(Vec<TrainingDataItem>, bool), TrainingError> {
    let (value, repaired) =
        parse_lenient(raw).map_err(|error| TrainingError::Parse(error.to_string()))?;
    let array = match value {
        Value::Array(_) => value,
        Value::Object(mut map) => ["intents", "items", "training_data"]
            .iter()
            .find_map(|key| map.remove(*key).filter(Value::is_array))
            .ok_or_else(|| TrainingError::Parse("expected a JSON array of intents".to_string()))?,
        _ => return Err(TrainingError::Parse("expected a JSON array of intents".to_string())),
    };

    let mut items: Vec<TrainingDataItem> =
        serde_json::from_value(array).map_err(|error| TrainingError::Parse(error.to_string()))?;
    for item in &mut items {
        item.intent_id = item.intent_id.trim().to_string();
    }
    Ok((items, repaired))
}

pub fn build_training_prompt(business_name: &str, source: &str, contact: &ContactInfo) -> String {
    let whatsapp_link = contact.whatsapp_link();
    let mut contact_lines = Vec::new();
    if let Some(link) = &whatsapp_link {
        contact_lines.push(format!("- WhatsApp link: {link}"));
    }
    if let Some(phone) = contact.phone.as_deref().filter(|value| !value.trim().is_empty()) {
        contact_lines.push(format!("- Phone: {phone}"));
    }
    if let Some(email) = contact.email.as_deref().filter(|value| !value.trim().is_empty()) {
        contact_lines.push(format!("- Email: {email}"));
    }
    if let Some(website) = contact.website.as_deref().filter(|value| !value.trim().is_empty()) {
        contact_lines.push(format!("- Website: {website}"));
    }
    let contact_block = if contact_lines.is_empty() {
        "No contact details were provided; do not invent any.".to_string()
    } else {
        contact_lines.join("\n")
    };
    let cta_link = whatsapp_link.unwrap_or_else(|| "https://example.com/contact".to_string());

    format!(
        "You build chatbot training data for {business_name}.\n\
         Read the business text below and return a JSON array of intents.\n\n\
         Rules:\n\
         1. Produce between 40 and 70 intents. Give every topic, feature, process step, cost \
         question and requirement its own intent; never merge distinct topics.\n\
         2. Include an intent with intent_id \"greeting\" that has 3 or 4 follow_up_options \
         pointing at the main topics.\n\
         3. No dead ends: every intent that finishes a topic offers a way on, such as asking \
         another question (associated_intent_id \"greeting\") or a contact link.\n\
         4. Every item has a boolean \"lead\": true for pricing, quotes, bookings and contact \
         requests, false otherwise.\n\
         5. option_text is one to three words. Use cta_button_text and cta_button_link only for \
         the primary call to action.\n\
         6. intent_id uses lowercase letters and underscores only, with no digits or dashes, \
         and every intent_id is unique.\n\n\
         Contact details:\n{contact_block}\n\n\
         Item shape:\n\
         {{\"intent_id\": \"service_pricing\", \"nlp_training_phrases\": [\"how much\", \"price\"], \
         \"default_response_text\": \"...\", \"lead\": true, \
         \"cta_button_text\": \"Chat on WhatsApp\", \"cta_button_link\": \"{cta_link}\", \
         \"follow_up_options\": [{{\"option_text\": \"Ask more\", \"associated_intent_id\": \"greeting\"}}]}}\n\n\
         Return only the JSON array.\n\n\
         Business text:\n{source}"
    )
}

const HIDDEN_ELEMENTS: &[&str] = &["script", "style", "noscript", "nav", "header", "footer", "aside"];

static HIDDEN_ELEMENT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    HIDDEN_ELEMENTS
        .iter()
        .filter_map(|tag| Regex::new(&format!(r"(?is)<{tag}\b[^>]*>.*?</{tag}\s*>")).ok())
        .collect()
});

static COMMENT: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").ok());
static TAG: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"<[^>]*>").ok());

/// Reduces an HTML page to its visible text.
pub fn html_to_text(html: &str) -> String {
    let mut text = html.to_string();
    for pattern in HIDDEN_ELEMENT_PATTERNS.iter() {
        text = pattern.replace_all(&text, " ").into_owned();
    }
    for pattern in [COMMENT.as_ref(), TAG.as_ref()].into_iter().flatten() {
        text = pattern.replace_all(&text, " ").into_owned();
    }

    let decoded = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    decoded
        .chars()
        .filter(char::is_ascii)
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use leadflow_core::domain::tenant::ContactInfo;
    use leadflow_core::domain::training::TrainingWarning;

    use super::{
        build_training_prompt, html_to_text, parse_training_items, RetryPolicy, SourceFormat,
        TrainingError, TrainingGenerator, TrainingRequest, HIDDEN_ELEMENTS,
        HIDDEN_ELEMENT_PATTERNS, OVERLOADED_MESSAGE,
    };
    use crate::llm::{LlmClient, LlmError, ProviderResult};

    struct ScriptedClient {
        replies: Mutex<VecDeque<Result<ProviderResult, LlmError>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedClient {
        fn new(replies: Vec<Result<ProviderResult, LlmError>>) -> Self {
            Self { replies: Mutex::new(replies.into()), calls: Mutex::new(0) }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().expect("calls lock")
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedClient {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn complete(&self, _prompt: &str) -> Result<ProviderResult, LlmError> {
            *self.calls.lock().expect("calls lock") += 1;
            self.replies
                .lock()
                .expect("replies lock")
                .pop_front()
                .unwrap_or_else(|| Err(LlmError::Network("script exhausted".to_string())))
        }
    }

    const BATCH: &str = r#"[
        {"intent_id": "greeting", "default_response_text": "Hi!", "lead": false,
         "follow_up_options": [
            {"option_text": "Pricing", "associated_intent_id": "pricing"},
            {"option_text": "Services", "associated_intent_id": "services"},
            {"option_text": "Hours", "associated_intent_id": "hours"}
         ]},
        {"intent_id": "pricing", "default_response_text": "From $29.", "lead": true}
    ]"#;

    fn generator() -> TrainingGenerator {
        TrainingGenerator::new(
            RetryPolicy { max_attempts: 3, initial_backoff: Duration::from_millis(1) },
            Duration::from_secs(5),
        )
    }

    fn contact() -> ContactInfo {
        ContactInfo { whatsapp: Some("+1 555 0100".to_string()), ..ContactInfo::default() }
    }

    fn request<'a>(source: &'a str, contact: &'a ContactInfo) -> TrainingRequest<'a> {
        TrainingRequest { business_name: "Acme", source, format: SourceFormat::Text, contact }
    }

    #[test]
    fn backoff_doubles_from_the_initial_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_after(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_after(3), Duration::from_millis(4000));
    }

    #[test]
    fn prompt_embeds_contact_details_and_whatsapp_link() {
        let prompt = build_training_prompt("Acme", "We sell shoes.", &contact());
        assert!(prompt.contains("https://wa.me/15550100?text=Hello%2C%20I%20have%20a%20question."));
        assert!(prompt.contains("between 40 and 70 intents"));
        assert!(prompt.contains("lowercase letters and underscores only"));
        assert!(prompt.ends_with("Business text:\nWe sell shoes."));

        let bare = build_training_prompt("Acme", "We sell shoes.", &ContactInfo::default());
        assert!(bare.contains("No contact details were provided"));
    }

    #[test]
    fn wrapped_and_fenced_batches_parse() {
        let (items, repaired) =
            parse_training_items(&format!("```json\n{{\"intents\": {BATCH}}}\n```")).expect("parse");
        assert_eq!(items.len(), 2);
        assert!(repaired);

        let error = parse_training_items("{\"answer\": 42}").expect_err("no array");
        assert!(matches!(error, TrainingError::Parse(_)));
    }

    #[test]
    fn html_is_reduced_to_visible_text() {
        let html = "<html><head><style>p{color:red}</style><script>var a = 1;</script></head>\
                    <body><nav>Home | About</nav><header>Logo</header><h1>Acme&nbsp;Shoes</h1>\
                    <!-- hidden --><p>Handmade  shoes &amp; boots ✓</p><aside>Ads</aside>\
                    <footer>© 2024</footer></body></html>";
        assert_eq!(html_to_text(html), "Acme Shoes Handmade shoes & boots");
    }

    #[test]
    fn every_hidden_element_pattern_compiles() {
        assert_eq!(HIDDEN_ELEMENT_PATTERNS.len(), HIDDEN_ELEMENTS.len());
        assert_eq!("HTML".parse::<SourceFormat>(), Ok(SourceFormat::Html));
        assert!("pdf".parse::<SourceFormat>().is_err());
    }

    #[tokio::test]
    async fn overload_is_retried_then_succeeds() {
        let client = ScriptedClient::new(vec![
            Err(LlmError::Overloaded("503".to_string())),
            Err(LlmError::Overloaded("503".to_string())),
            Ok(ProviderResult::new(BATCH)),
        ]);
        let contact = contact();
        let generated =
            generator().generate(&client, &request("We sell shoes.", &contact)).await.expect("generate");

        assert_eq!(generated.attempts, 3);
        assert_eq!(generated.items.len(), 2);
        assert!(!generated.repaired);
        assert!(generated.warnings.iter().any(|warning| matches!(
            warning,
            TrainingWarning::DanglingReference { target, .. } if target == "services"
        )));
    }

    #[tokio::test]
    async fn persistent_overload_surfaces_friendly_message() {
        let client = ScriptedClient::new(
            (0..3).map(|_| Err(LlmError::Overloaded("503".to_string()))).collect(),
        );
        let contact = contact();
        let error = generator()
            .generate(&client, &request("We sell shoes.", &contact))
            .await
            .expect_err("overloaded");

        assert!(matches!(error, TrainingError::Overloaded { attempts: 3 }));
        assert_eq!(error.to_string(), OVERLOADED_MESSAGE);
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_fail_immediately() {
        let client = ScriptedClient::new(vec![Err(LlmError::Api {
            status: 401,
            body: "bad key".to_string(),
        })]);
        let contact = contact();
        let error = generator()
            .generate(&client, &request("We sell shoes.", &contact))
            .await
            .expect_err("provider error");

        assert!(matches!(error, TrainingError::Provider(LlmError::Api { status: 401, .. })));
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn duplicate_intents_fail_validation() {
        let client = ScriptedClient::new(vec![Ok(ProviderResult::new(
            r#"[{"intent_id": "a", "default_response_text": "x"},
                {"intent_id": "a", "default_response_text": "y"}]"#,
        ))]);
        let contact = contact();
        let error = generator()
            .generate(&client, &request("We sell shoes.", &contact))
            .await
            .expect_err("duplicate");
        assert!(matches!(error, TrainingError::Validation(_)));
    }

    #[tokio::test]
    async fn empty_source_is_rejected_before_calling_the_model() {
        let client = ScriptedClient::new(Vec::new());
        let contact = contact();
        let mut req = request("<script>x</script>", &contact);
        req.format = SourceFormat::Html;
        let error = generator().generate(&client, &req).await.expect_err("empty");

        assert!(matches!(error, TrainingError::EmptySource));
        assert_eq!(client.calls(), 0);
    }
}
