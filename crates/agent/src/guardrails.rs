//! Post-filters for model-generated text.
//!
//! Two passes run over generated replies: instruction-leakage scrubbing,
//! always on, and contact-solicitation stripping, on whenever the tenant has
//! lead collection disabled. Prompts alone do not keep a model from offering
//! a call or a booking, so the second pass removes whole sentences.

use std::sync::LazyLock;

use regex::Regex;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContactPattern {
    ContactUs,
    DirectChannel,
    Booking,
    ProfessionalReferral,
    ContactQuestion,
}

impl ContactPattern {
    pub const ALL: [ContactPattern; 5] = [
        Self::ContactUs,
        Self::DirectChannel,
        Self::Booking,
        Self::ProfessionalReferral,
        Self::ContactQuestion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContactUs => "contact_us",
            Self::DirectChannel => "direct_channel",
            Self::Booking => "booking",
            Self::ProfessionalReferral => "professional_referral",
            Self::ContactQuestion => "contact_question",
        }
    }

    fn source(&self) -> &'static str {
        match self {
            Self::ContactUs => {
                r"(?i)\b(?:(?:contact|reach(?:\s+out\s+to)?|connect\s+with|get\s+in\s+touch\s+with)\s+(?:us|our\s+(?:team|office|staff|experts?|specialists?))|get\s+in\s+touch)\b"
            }
            Self::DirectChannel => {
                r"(?i)\b(?:(?:call|phone|email|e-mail|whatsapp|message|text|ring|dm)\s+us|give\s+us\s+a\s+(?:call|ring)|drop\s+us\s+(?:a|an)\s+(?:line|message|email|note)|(?:we|our\s+(?:team|staff|office|experts?|specialists?))\s+(?:can|will|could|would\s+be\s+happy\s+to|are\s+happy\s+to)\s+(?:call|phone|ring|email|text|message|reach|contact|get\s+back\s+to)\b)"
            }
            Self::Booking => r"(?i)\b(?:book|schedule|arrange|reserve)\s+(?:a|an|your)\b",
            Self::ProfessionalReferral => {
                r"(?i)\b(?:contact|consult|call|see|visit|speak\s+(?:with|to)|talk\s+(?:with|to)|reach\s+out\s+to)\s+(?:(?:a|an|our|your|the)\s+)?(?:doctor|dr\.?|physician|dentist|lawyer|attorney|specialist|consultant|advis[oe]r|expert|representative|agent|counsell?or|professional)s?\b"
            }
            Self::ContactQuestion => {
                r"(?i)^(?:would|do|shall|can|could|should|may|want)\b[^.!?]*\b(?:contact|call|reach|connect|speak|talk|appointment|consultation|meeting|callback|in\s+touch)\b[^.!?]*\?$"
            }
        }
    }
}

static CONTACT_PATTERNS: LazyLock<Vec<(ContactPattern, Regex)>> = LazyLock::new(|| {
    ContactPattern::ALL
        .iter()
        .filter_map(|pattern| Regex::new(pattern.source()).ok().map(|regex| (*pattern, regex)))
        .collect()
});

/// Whole lines that echo the prompt back: section headers and restated rules.
const LEAKAGE_LINE_SOURCES: &[&str] = &[
    r"(?i)^\s*(?:\*\*)?(?:instructions?|system(?:\s+prompt)?|key\s+guidelines|guidelines|additional\s+context(?:\s+and\s+training\s+data)?|training\s+data|context)(?:\*\*)?\s*:",
    r"(?i)\b(?:do\s+not|don't)\s+(?:copy|reproduce|paste)\b",
    r"(?i)\bas\s+an\s+ai(?:\s+language)?\s+model\b",
];

static LEAKAGE_LINES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    LEAKAGE_LINE_SOURCES.iter().filter_map(|source| Regex::new(source).ok()).collect()
});

static SPEAKER_PREFIX: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(?:assistant|bot|ai|response)\s*:\s*").ok());

/// Removes echoed prompt text from a generated reply.
pub fn sanitize_generated_text(text: &str) -> String {
    let kept: Vec<&str> = text
        .lines()
        .filter(|line| !LEAKAGE_LINES.iter().any(|regex| regex.is_match(line)))
        .collect();
    let joined = kept.join("\n");
    let stripped = match SPEAKER_PREFIX.as_ref() {
        Some(regex) => regex.replace(&joined, "").into_owned(),
        None => joined,
    };
    normalize_whitespace(&stripped)
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FilterOutcome {
    pub text: String,
    pub removed: Vec<ContactPattern>,
}

/// Drops every sentence that offers direct contact, a booking or a callback,
/// then removes orphaned fragments and normalizes whitespace. Patterns never
/// span a sentence boundary, so re-joining the kept sentences cannot form a
/// new match.
pub fn strip_contact_solicitation(text: &str) -> FilterOutcome {
    let mut removed = Vec::new();
    let mut lines = Vec::new();

    for line in text.lines() {
        let mut kept = Vec::new();
        for sentence in split_sentences(line) {
            match matching_pattern(sentence) {
                Some(pattern) => removed.push(pattern),
                None if is_orphan(sentence) => {}
                None => kept.push(sentence),
            }
        }
        if !kept.is_empty() {
            lines.push(kept.join(" "));
        }
    }

    FilterOutcome { text: normalize_whitespace(&lines.join("\n")), removed }
}

fn matching_pattern(sentence: &str) -> Option<ContactPattern> {
    let sentence = sentence.trim();
    CONTACT_PATTERNS.iter().find(|(_, regex)| regex.is_match(sentence)).map(|(pattern, _)| *pattern)
}

fn is_orphan(sentence: &str) -> bool {
    !sentence.chars().any(char::is_alphanumeric)
}

const ABBREVIATIONS: &[&str] = &["dr", "mr", "mrs", "ms", "prof", "st", "e.g", "i.e", "etc"];

/// Splits on `.`, `!` or `?` followed by whitespace or end of input.
/// Common abbreviations such as `Dr.` do not end a sentence.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((index, ch)) = chars.next() {
        if !matches!(ch, '.' | '!' | '?') {
            continue;
        }
        let at_boundary = chars.peek().map_or(true, |(_, next)| next.is_whitespace());
        if !at_boundary || (ch == '.' && ends_with_abbreviation(&text[start..index])) {
            continue;
        }
        let end = index + ch.len_utf8();
        let sentence = text[start..end].trim();
        if !sentence.is_empty() {
            sentences.push(sentence);
        }
        start = end;
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

fn ends_with_abbreviation(prefix: &str) -> bool {
    let word = prefix.rsplit(char::is_whitespace).next().unwrap_or_default().to_ascii_lowercase();
    ABBREVIATIONS.contains(&word.as_str())
}

/// Collapses runs of spaces and tabs, trims every line, and drops blank lines.
pub fn normalize_whitespace(text: &str) -> String {
    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    Allow { text: String },
    Degrade { reason_code: &'static str, text: String, removed: Vec<ContactPattern> },
    Deny { reason_code: &'static str },
}

impl GuardrailDecision {
    /// Text that may be shown, if any survived.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Allow { text } | Self::Degrade { text, .. } => Some(text),
            Self::Deny { .. } => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GuardrailPolicy {
    pub strip_contact_solicitation: bool,
}

impl Default for GuardrailPolicy {
    fn default() -> Self {
        Self { strip_contact_solicitation: true }
    }
}

impl GuardrailPolicy {
    /// Contact offers are only allowed where the tenant collects leads.
    pub fn for_tenant(lead_collection_enabled: bool) -> Self {
        Self { strip_contact_solicitation: !lead_collection_enabled }
    }

    pub fn evaluate(&self, generated: &str) -> GuardrailDecision {
        let sanitized = sanitize_generated_text(generated);
        if sanitized.is_empty() {
            return GuardrailDecision::Deny { reason_code: "empty_generation" };
        }

        if self.strip_contact_solicitation {
            let outcome = strip_contact_solicitation(&sanitized);
            if outcome.text.is_empty() {
                return GuardrailDecision::Deny { reason_code: "contact_only_generation" };
            }
            if !outcome.removed.is_empty() {
                return GuardrailDecision::Degrade {
                    reason_code: "contact_solicitation_removed",
                    text: outcome.text,
                    removed: outcome.removed,
                };
            }
        }

        if sanitized != normalize_whitespace(generated) {
            return GuardrailDecision::Degrade {
                reason_code: "instruction_leakage_removed",
                text: sanitized,
                removed: Vec::new(),
            };
        }
        GuardrailDecision::Allow { text: sanitized }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        sanitize_generated_text, split_sentences, strip_contact_solicitation, ContactPattern,
        GuardrailDecision, GuardrailPolicy, CONTACT_PATTERNS, LEAKAGE_LINES,
        LEAKAGE_LINE_SOURCES, SPEAKER_PREFIX,
    };

    fn assert_family_removed(input: &str, family: ContactPattern, survivor: &str) {
        let outcome = strip_contact_solicitation(input);
        assert_eq!(outcome.text, survivor, "input: {input}");
        assert!(outcome.removed.contains(&family), "{family:?} not reported for {input}");
        for (_, regex) in CONTACT_PATTERNS.iter() {
            assert!(!regex.is_match(&outcome.text), "{} still matches", regex.as_str());
        }
    }

    #[test]
    fn every_pattern_compiles() {
        assert_eq!(CONTACT_PATTERNS.len(), ContactPattern::ALL.len());
        assert_eq!(LEAKAGE_LINES.len(), LEAKAGE_LINE_SOURCES.len());
        assert!(SPEAKER_PREFIX.is_some());
    }

    #[test]
    fn booking_question_is_dropped_and_the_rest_kept() {
        assert_family_removed(
            "Would you like to book a consultation? Our service is great.",
            ContactPattern::Booking,
            "Our service is great.",
        );
    }

    #[test]
    fn contact_us_family() {
        assert_family_removed(
            "We offer three plans. Feel free to contact our team for details.",
            ContactPattern::ContactUs,
            "We offer three plans.",
        );
        assert_family_removed(
            "Get in touch today! Shipping is free.",
            ContactPattern::ContactUs,
            "Shipping is free.",
        );
    }

    #[test]
    fn direct_channel_family() {
        assert_family_removed(
            "Our clinic opens at 9am. Call us or WhatsApp us anytime.",
            ContactPattern::DirectChannel,
            "Our clinic opens at 9am.",
        );
        assert_family_removed(
            "Drop us a line. Returns take 30 days.",
            ContactPattern::DirectChannel,
            "Returns take 30 days.",
        );
    }

    #[test]
    fn professional_referral_family() {
        assert_family_removed(
            "Fillings take about an hour. Please speak with our specialist about options.",
            ContactPattern::ProfessionalReferral,
            "Fillings take about an hour.",
        );
        assert_family_removed(
            "You should consult Dr. Mehta first. Recovery is quick.",
            ContactPattern::ProfessionalReferral,
            "Recovery is quick.",
        );
    }

    #[test]
    fn trailing_contact_question_family() {
        assert_family_removed(
            "We ship worldwide. Shall I connect you with someone?",
            ContactPattern::ContactQuestion,
            "We ship worldwide.",
        );
    }

    #[test]
    fn team_callback_offers_are_removed_without_joining_neighbours() {
        assert_family_removed(
            "Would you like some ideas. Our team can call. Fine?",
            ContactPattern::DirectChannel,
            "Would you like some ideas. Fine?",
        );
        assert_family_removed(
            "We stock 40 models. We will get back to you within a day.",
            ContactPattern::DirectChannel,
            "We stock 40 models.",
        );
    }

    #[test]
    fn questions_do_not_match_across_sentences() {
        let text = "Would you like more ideas. I can talk you through them. Okay?";
        let outcome = strip_contact_solicitation(text);
        assert_eq!(outcome.text, text);
        assert!(outcome.removed.is_empty());
        for (_, regex) in CONTACT_PATTERNS.iter() {
            assert!(!regex.is_match(&outcome.text), "{} matches across sentences", regex.as_str());
        }
    }

    #[test]
    fn unrelated_text_passes_untouched() {
        let outcome = strip_contact_solicitation("Our service is great.\nPrices start at $10.");
        assert_eq!(outcome.text, "Our service is great.\nPrices start at $10.");
        assert!(outcome.removed.is_empty());
    }

    #[test]
    fn fully_contact_text_becomes_empty() {
        let outcome = strip_contact_solicitation("Contact us today. Call us now!");
        assert!(outcome.text.is_empty());
        assert_eq!(outcome.removed.len(), 2);
    }

    #[test]
    fn sentence_splitting_respects_abbreviations_and_urls() {
        assert_eq!(
            split_sentences("Meet Dr. Rao. Visit acme.test/plans today! Done"),
            vec!["Meet Dr. Rao.", "Visit acme.test/plans today!", "Done"]
        );
    }

    #[test]
    fn leaked_instruction_lines_are_scrubbed() {
        let raw = "Assistant: Instructions:\nWe open at 9am.\n- Do NOT copy-paste from training data\n\
                   Additional context and training data:\nParking is free.";
        assert_eq!(sanitize_generated_text(raw), "We open at 9am.\nParking is free.");
        assert_eq!(sanitize_generated_text("As an AI language model, I think so."), "");
        assert_eq!(sanitize_generated_text("Bot: Hello!"), "Hello!");
    }

    #[test]
    fn policy_follows_lead_collection_setting() {
        let text = "Our service is great. Contact us for a quote.";
        let strict = GuardrailPolicy::for_tenant(false);
        let open = GuardrailPolicy::for_tenant(true);

        assert!(matches!(
            strict.evaluate(text),
            GuardrailDecision::Degrade { reason_code: "contact_solicitation_removed", .. }
        ));
        assert_eq!(strict.evaluate(text).text(), Some("Our service is great."));
        assert_eq!(open.evaluate(text), GuardrailDecision::Allow { text: text.to_string() });
        assert_eq!(
            strict.evaluate("Call us today!"),
            GuardrailDecision::Deny { reason_code: "contact_only_generation" }
        );
        assert_eq!(open.evaluate("   "), GuardrailDecision::Deny { reason_code: "empty_generation" });
    }
}
