//! Builds the reply envelope for one turn.
//!
//! Resolution order: a matched flow node (while the tenant flow is enabled),
//! then the training item for a recognized intent, then the tenant's
//! unrecognized-intent message with its default CTA. Generated text only ever
//! reaches the envelope through the guardrail policy.

use std::collections::BTreeSet;

use tracing::debug;

use leadflow_core::domain::envelope::{ButtonPayload, FollowUpButton, ResponseEnvelope};
use leadflow_core::domain::flow::{FlowNode, FlowNodeType};
use leadflow_core::domain::intent::IntentLabel;
use leadflow_core::domain::tenant::TenantConfig;
use leadflow_core::domain::training::{FollowUpOption, TrainingDataItem};
use leadflow_core::lead::{lead_invitation, LeadDecision};

use crate::guardrails::{GuardrailDecision, GuardrailPolicy};

/// Reference answers embedded in the generation prompt.
const MAX_REFERENCE_ANSWERS: usize = 12;

/// Where the message text of an envelope came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplySource {
    FlowNode,
    FlowNodeGenerated,
    TrainingDefault,
    TrainingGenerated,
    Unrecognized,
}

impl ReplySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FlowNode => "flow_node",
            Self::FlowNodeGenerated => "flow_node_generated",
            Self::TrainingDefault => "training_default",
            Self::TrainingGenerated => "training_generated",
            Self::Unrecognized => "unrecognized",
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ComposeRequest<'a> {
    pub tenant: &'a TenantConfig,
    /// Flow node chosen by the matcher. Ignored while the tenant flow is off.
    pub matched_node: Option<&'a FlowNode>,
    /// Classifier output already resolved against the tenant vocabulary.
    pub intent: &'a IntentLabel,
    pub training_item: Option<&'a TrainingDataItem>,
    /// Successful generation output, unfiltered.
    pub generated: Option<&'a str>,
    pub lead: LeadDecision,
    /// User turns before the current message; picks the invitation wording.
    pub turn_count: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Composition {
    pub envelope: ResponseEnvelope,
    pub source: ReplySource,
}

pub fn compose(request: &ComposeRequest<'_>, policy: &GuardrailPolicy) -> Composition {
    let tenant = request.tenant;
    let intent_id = request.intent.as_str().to_string();
    let flow_node = request.matched_node.filter(|_| tenant.question_flow_enabled);

    let (mut envelope, source) = if let Some(node) = flow_node {
        compose_from_node(tenant, node, request.generated, policy)
    } else if let Some(item) = request.training_item.filter(|_| !request.intent.is_unrecognized()) {
        compose_from_item(tenant, item, request.generated, policy)
    } else {
        let envelope = ResponseEnvelope {
            cta_button: tenant.default_cta(),
            ..ResponseEnvelope::text(tenant.fallback.unrecognized_intent_message.clone())
        };
        (envelope, ReplySource::Unrecognized)
    };

    envelope.intent_id = intent_id;
    let contact_node = flow_node.is_some_and(|node| node.node_type == FlowNodeType::ContactForm);
    envelope.lead = request.lead.show || contact_node;
    if request.lead.show {
        envelope.message_text =
            append_invitation(&envelope.message_text, lead_invitation(request.turn_count));
    }

    debug!(
        event_name = "engine.composer.composed",
        tenant_id = %tenant.id,
        source = source.as_str(),
        intent_id = %envelope.intent_id,
        lead = envelope.lead,
        follow_ups = envelope.follow_up_buttons.len(),
        "reply composed"
    );
    Composition { envelope, source }
}

fn compose_from_node(
    tenant: &TenantConfig,
    node: &FlowNode,
    generated: Option<&str>,
    policy: &GuardrailPolicy,
) -> (ResponseEnvelope, ReplySource) {
    let canned = non_empty(node.prompt())
        .unwrap_or(tenant.fallback.unrecognized_intent_message.as_str())
        .to_string();
    let (message_text, source) = match generated.filter(|_| node.ai_handling) {
        Some(text) => match filtered(tenant, text, policy) {
            Some(text) => (text, ReplySource::FlowNodeGenerated),
            None => (canned, ReplySource::FlowNode),
        },
        None => (canned, ReplySource::FlowNode),
    };

    let follow_up_buttons = node
        .options
        .iter()
        .map(|option| FollowUpButton {
            text: option.text.clone(),
            payload: ButtonPayload::intent(
                option.next_id.clone().unwrap_or_else(|| option.text.clone()),
            ),
        })
        .collect();

    (ResponseEnvelope { follow_up_buttons, ..ResponseEnvelope::text(message_text) }, source)
}

fn compose_from_item(
    tenant: &TenantConfig,
    item: &TrainingDataItem,
    generated: Option<&str>,
    policy: &GuardrailPolicy,
) -> (ResponseEnvelope, ReplySource) {
    let canned = non_empty(&item.default_response_text)
        .unwrap_or(tenant.fallback.unrecognized_intent_message.as_str())
        .to_string();
    let (message_text, source) = match generated.and_then(|text| filtered(tenant, text, policy)) {
        Some(text) => (text, ReplySource::TrainingGenerated),
        None => (canned, ReplySource::TrainingDefault),
    };

    let envelope = ResponseEnvelope {
        follow_up_buttons: item.follow_up_options.iter().map(follow_up_button).collect(),
        cta_button: item.cta(),
        ..ResponseEnvelope::text(message_text)
    };
    (envelope, source)
}

fn follow_up_button(option: &FollowUpOption) -> FollowUpButton {
    let payload = match (&option.associated_intent_id, &option.cta_button_link) {
        (Some(intent_id), _) if !intent_id.trim().is_empty() => ButtonPayload::intent(intent_id),
        (_, Some(link)) if !link.trim().is_empty() => ButtonPayload::link(link),
        _ => ButtonPayload::intent(option.option_text.clone()),
    };
    FollowUpButton { text: option.option_text.clone(), payload }
}

fn filtered(tenant: &TenantConfig, text: &str, policy: &GuardrailPolicy) -> Option<String> {
    match policy.evaluate(text) {
        GuardrailDecision::Allow { text } => Some(text),
        GuardrailDecision::Degrade { reason_code, text, removed } => {
            debug!(
                event_name = "engine.guardrails.degraded",
                tenant_id = %tenant.id,
                reason_code,
                removed = removed.len(),
                "generated text filtered"
            );
            Some(text)
        }
        GuardrailDecision::Deny { reason_code } => {
            debug!(
                event_name = "engine.guardrails.denied",
                tenant_id = %tenant.id,
                reason_code,
                "generated text discarded"
            );
            None
        }
    }
}

fn non_empty(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

fn append_invitation(text: &str, invitation: &str) -> String {
    if text.trim().is_empty() {
        invitation.to_string()
    } else {
        format!("{}\n\n{invitation}", text.trim_end())
    }
}

/// Prompt for the free-text reply. Runs before classification finishes, so
/// it carries the knowledge base and the trained answers closest to the
/// message as references instead of a single resolved item.
pub fn build_generation_prompt(
    tenant: &TenantConfig,
    node: Option<&FlowNode>,
    message: &str,
    transcript: &str,
) -> String {
    let persona = tenant
        .ai_system_prompt
        .as_deref()
        .and_then(non_empty)
        .map(str::to_string)
        .unwrap_or_else(|| {
            format!("You are the friendly website assistant for {}.", tenant.name)
        });

    let mut prompt = format!("{persona}\n\n");
    prompt.push_str(
        "Answer the visitor in two to four short sentences. Use the reference answers only as a \
         style guide and never repeat them word for word.\n",
    );
    if !tenant.lead_collection_enabled {
        prompt.push_str(
            "Do not suggest contacting the business, calling, emailing, booking or scheduling.\n",
        );
    }

    if let Some(knowledge) = tenant.plain_data.as_deref().and_then(non_empty) {
        prompt.push_str(&format!("\nAdditional context and training data:\n{knowledge}\n"));
    }

    let references: Vec<String> = reference_answers(tenant.training_data.items(), message)
        .into_iter()
        .map(|item| format!("- {}: {}", item.intent_id, item.default_response_text.trim()))
        .collect();
    if !references.is_empty() {
        prompt.push_str(&format!("\nReference answers:\n{}\n", references.join("\n")));
    }

    if let Some(node) = node {
        prompt.push_str(&format!("\nCurrent conversation step: {}\n", node.prompt()));
    }
    if !transcript.trim().is_empty() {
        prompt.push_str(&format!("\nRecent conversation:\n{transcript}\n"));
    }
    prompt.push_str(&format!("\nVisitor: {message}\nAssistant:"));
    prompt
}

/// Up to [`MAX_REFERENCE_ANSWERS`] answered items, most relevant to the
/// message first. Ties keep training order.
fn reference_answers<'a>(items: &'a [TrainingDataItem], message: &str) -> Vec<&'a TrainingDataItem> {
    let words = keywords(message);
    let mut ranked: Vec<(usize, &TrainingDataItem)> = items
        .iter()
        .filter(|item| !item.default_response_text.trim().is_empty())
        .map(|item| (relevance(item, &words), item))
        .collect();
    ranked.sort_by(|left, right| right.0.cmp(&left.0));
    ranked.into_iter().take(MAX_REFERENCE_ANSWERS).map(|(_, item)| item).collect()
}

// Id and training-phrase hits count double; answer-text hits count once.
fn relevance(item: &TrainingDataItem, words: &BTreeSet<String>) -> usize {
    if words.is_empty() {
        return 0;
    }
    let mut labelled = keywords(&item.intent_id);
    for phrase in &item.nlp_training_phrases {
        labelled.extend(keywords(phrase));
    }
    let answered = keywords(&item.default_response_text);
    2 * words.intersection(&labelled).count() + words.intersection(&answered).count()
}

fn keywords(text: &str) -> BTreeSet<String> {
    text.split(|ch: char| !ch.is_ascii_alphanumeric())
        .filter(|word| word.len() >= 3)
        .map(str::to_ascii_lowercase)
        .collect()
}
