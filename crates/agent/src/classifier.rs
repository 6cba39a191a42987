use std::time::Duration;

use tracing::{debug, warn};

use leadflow_core::domain::intent::{
    normalize_label, IntentLabel, IntentVocabulary, UNRECOGNIZED_INTENT,
};

use crate::llm::{complete_within, LlmClient, LlmError};

/// Instruction listing every label the model may answer with.
pub fn build_classification_prompt(
    message: &str,
    vocabulary: &IntentVocabulary,
    transcript: &str,
) -> String {
    let labels = vocabulary.labels().join(", ");
    let context = if transcript.trim().is_empty() {
        String::new()
    } else {
        format!("Recent conversation:\n{transcript}\n\n")
    };
    format!(
        "You classify chat messages for a business assistant.\n\
         Allowed intent labels: {labels}\n\
         Answer with exactly one label from the list and nothing else. \
         If none fits, answer {UNRECOGNIZED_INTENT}.\n\n\
         {context}Message: {message}\n\nLabel:"
    )
}

/// Calls the model and normalizes its answer. The candidate is returned even
/// when it is not a vocabulary member; membership is decided downstream.
pub async fn try_classify(
    client: &dyn LlmClient,
    message: &str,
    vocabulary: &IntentVocabulary,
    transcript: &str,
    budget: Duration,
) -> Result<IntentLabel, LlmError> {
    let prompt = build_classification_prompt(message, vocabulary, transcript);
    let result = complete_within(client, &prompt, budget).await?;
    let candidate = normalize_label(&result.text);
    debug!(
        event_name = "engine.classifier.completed",
        provider = client.name(),
        raw = %result.text.trim(),
        candidate = %candidate,
        "intent classified"
    );
    Ok(if candidate.is_empty() { IntentLabel::unrecognized() } else { IntentLabel(candidate) })
}

/// Like [`try_classify`] but any provider failure yields the fallback label.
pub async fn classify(
    client: &dyn LlmClient,
    message: &str,
    vocabulary: &IntentVocabulary,
    transcript: &str,
    budget: Duration,
) -> IntentLabel {
    match try_classify(client, message, vocabulary, transcript, budget).await {
        Ok(label) => label,
        Err(error) => {
            warn!(
                event_name = "engine.classifier.failed",
                provider = client.name(),
                error_class = error.error_class(),
                error = %error,
                "classification failed; using fallback label"
            );
            IntentLabel::unrecognized()
        }
    }
}
