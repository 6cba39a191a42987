//! Lead-capture trigger policy.
//!
//! The layers are evaluated in order and stop at the first one that says
//! "show". Once lead collection is enabled and the visitor has sent at least
//! one earlier message the answer is always yes. That bias is product
//! behavior and must not be softened.

use serde::Serialize;

/// Outcome of the secondary model call asking whether to show the lead form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LeadJudgment {
    /// Raw model answer, expected to be `YES` or `NO`.
    Obtained(String),
    /// The call errored or timed out.
    Failed,
    /// No call was made for this turn.
    NotRequested,
}

impl LeadJudgment {
    pub fn is_yes(&self) -> bool {
        matches!(self, Self::Obtained(answer) if answer.trim().eq_ignore_ascii_case("yes"))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadTrigger {
    TurnCount,
    AiJudgment,
    KeywordFallback,
    SafetyNet,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LeadDecision {
    pub show: bool,
    pub trigger: Option<LeadTrigger>,
}

impl LeadDecision {
    fn shown(trigger: LeadTrigger) -> Self {
        Self { show: true, trigger: Some(trigger) }
    }

    fn hidden() -> Self {
        Self { show: false, trigger: None }
    }
}

/// Everything the policy looks at for one turn.
#[derive(Clone, Copy, Debug)]
pub struct LeadSignals<'a> {
    /// User-sent turns before the current message.
    pub turn_count: usize,
    pub lead_collection_enabled: bool,
    pub message: &'a str,
    /// Resolved intent for this turn, if any.
    pub intent_id: Option<&'a str>,
    /// The matched training item is flagged as commercially significant.
    pub intent_marked_lead: bool,
    pub judgment: &'a LeadJudgment,
}

pub const HIGH_VALUE_INTENTS: &[&str] = &[
    "pricing",
    "pricing_inquiry",
    "quote",
    "quote_request",
    "booking",
    "book_appointment",
    "appointment",
    "consultation",
    "demo_request",
    "contact",
    "contact_us",
    "connect_to_human",
    "purchase",
    "services",
];

pub const BUSINESS_KEYWORDS: &[&str] = &[
    "price",
    "pricing",
    "cost",
    "quote",
    "buy",
    "purchase",
    "order",
    "service",
    "consultation",
    "appointment",
    "book",
    "demo",
    "hire",
    "contract",
    "package",
    "plan",
];

pub const HELP_TERMS: &[&str] = &[
    "help",
    "need",
    "interested",
    "looking for",
    "how do i",
    "how can i",
    "can you",
    "want to",
    "assist",
];

pub const LEAD_INVITATIONS: &[&str] = &[
    "If you'd like, share your name and email and our team will follow up with details tailored to you.",
    "Want a personal follow-up? Leave your contact details and we'll get back to you shortly.",
    "Happy to go further: drop your email or phone number and someone from our team will reach out.",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LeadPolicy {
    pub primary_turn_threshold: usize,
    pub safety_net_min_turns: usize,
}

impl Default for LeadPolicy {
    fn default() -> Self {
        Self { primary_turn_threshold: 2, safety_net_min_turns: 1 }
    }
}

impl LeadPolicy {
    pub fn evaluate(&self, signals: &LeadSignals<'_>) -> LeadDecision {
        if signals.turn_count >= self.primary_turn_threshold {
            return LeadDecision::shown(LeadTrigger::TurnCount);
        }

        if signals.lead_collection_enabled && signals.judgment.is_yes() {
            return LeadDecision::shown(LeadTrigger::AiJudgment);
        }

        if *signals.judgment == LeadJudgment::Failed && self.keyword_fallback(signals) {
            return LeadDecision::shown(LeadTrigger::KeywordFallback);
        }

        if signals.lead_collection_enabled && signals.turn_count >= self.safety_net_min_turns {
            return LeadDecision::shown(LeadTrigger::SafetyNet);
        }

        LeadDecision::hidden()
    }

    fn keyword_fallback(&self, signals: &LeadSignals<'_>) -> bool {
        let message = signals.message.to_lowercase();
        let high_value =
            signals.intent_id.is_some_and(|intent| HIGH_VALUE_INTENTS.contains(&intent));

        high_value
            || signals.intent_marked_lead
            || signals.turn_count >= self.primary_turn_threshold
            || BUSINESS_KEYWORDS.iter().any(|keyword| message.contains(keyword))
            || message.contains('?')
            || HELP_TERMS.iter().any(|term| message.contains(term))
    }
}

/// Convenience form of [`LeadPolicy::evaluate`] with default thresholds and
/// no intent information.
pub fn should_show_lead(
    turn_count: usize,
    lead_collection_enabled: bool,
    message: &str,
    judgment: &LeadJudgment,
) -> bool {
    LeadPolicy::default()
        .evaluate(&LeadSignals {
            turn_count,
            lead_collection_enabled,
            message,
            intent_id: None,
            intent_marked_lead: false,
            judgment,
        })
        .show
}

/// Invitation sentence for a turn; rotates through [`LEAD_INVITATIONS`].
pub fn lead_invitation(turn_count: usize) -> &'static str {
    LEAD_INVITATIONS[turn_count % LEAD_INVITATIONS.len()]
}
