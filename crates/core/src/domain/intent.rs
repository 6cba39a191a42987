use std::fmt;

use serde::{Deserialize, Serialize};

/// Reserved label meaning "no vocabulary member applies".
pub const UNRECOGNIZED_INTENT: &str = "unrecognized_intent";

/// An opaque classifier output. It is not guaranteed to be a member of any
/// vocabulary; membership is decided by [`IntentVocabulary::resolve`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IntentLabel(pub String);

impl IntentLabel {
    pub fn unrecognized() -> Self {
        Self(UNRECOGNIZED_INTENT.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_unrecognized(&self) -> bool {
        self.0 == UNRECOGNIZED_INTENT
    }
}

impl fmt::Display for IntentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reduces raw model output to a label candidate: the first
/// whitespace-delimited token with every character outside `[A-Za-z_]`
/// removed. Applying it twice yields the same result as applying it once.
pub fn normalize_label(raw: &str) -> String {
    raw.split_whitespace()
        .next()
        .unwrap_or_default()
        .chars()
        .filter(|ch| ch.is_ascii_alphabetic() || *ch == '_')
        .collect()
}

/// Closed, tenant-scoped set of labels. Always contains the fallback label.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntentVocabulary {
    labels: Vec<String>,
}

impl IntentVocabulary {
    /// Builds a vocabulary from tenant intent ids. Ids are kept as authored
    /// (deduplicated, order preserved) and the fallback is appended when missing.
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut collected: Vec<String> = Vec::new();
        for label in labels {
            let label = label.into();
            if !label.trim().is_empty() && !collected.contains(&label) {
                collected.push(label);
            }
        }
        if !collected.iter().any(|label| label == UNRECOGNIZED_INTENT) {
            collected.push(UNRECOGNIZED_INTENT.to_string());
        }
        Self { labels: collected }
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Labels other than the fallback.
    pub fn intents(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str).filter(|label| *label != UNRECOGNIZED_INTENT)
    }

    /// Case-sensitive membership after the same normalization the classifier
    /// applies, on both sides. `GREETING` is therefore not a member of a
    /// vocabulary holding `greeting`, while `book_demo` reaches an intent
    /// authored as `book-demo`.
    pub fn contains(&self, candidate: &str) -> bool {
        self.member(candidate).is_some()
    }

    /// The authored label a candidate normalizes onto. Ids that collapse onto
    /// the same token (`plan_2`, `plan_3`) are ambiguous and match nothing.
    pub fn member(&self, candidate: &str) -> Option<&str> {
        let normalized = normalize_label(candidate);
        if normalized.is_empty() {
            return None;
        }
        if let Some(exact) = self.labels.iter().find(|label| **label == normalized) {
            return Some(exact.as_str());
        }
        let mut matches = self.labels.iter().filter(|label| normalize_label(label) == normalized);
        match (matches.next(), matches.next()) {
            (Some(label), None) => Some(label.as_str()),
            _ => None,
        }
    }

    /// Maps any classifier output to a member label, collapsing non-members
    /// into the fallback.
    pub fn resolve(&self, candidate: &IntentLabel) -> IntentLabel {
        match self.member(candidate.as_str()) {
            Some(label) => IntentLabel(label.to_string()),
            None => IntentLabel::unrecognized(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{normalize_label, IntentLabel, IntentVocabulary, UNRECOGNIZED_INTENT};

    #[test]
    fn normalization_takes_first_token_and_strips_symbols() {
        assert_eq!(normalize_label("GREETING!!"), "GREETING");
        assert_eq!(normalize_label("  pricing_inquiry.\nbecause the user asked"), "pricing_inquiry");
        assert_eq!(normalize_label("\"book-demo\""), "bookdemo");
        assert_eq!(normalize_label("intent42"), "intent");
        assert_eq!(normalize_label(""), "");
        assert_eq!(normalize_label("   "), "");
    }

    #[test]
    fn normalization_is_idempotent() {
        let samples = [
            "GREETING!!",
            "  label: pricing",
            "***",
            "héllo_wörld again",
            "`contact_us`",
            "a b c",
            "__init__",
            "!!! greeting",
        ];
        for sample in samples {
            let once = normalize_label(sample);
            assert_eq!(normalize_label(&once), once, "not idempotent for {sample:?}");
        }
    }

    #[test]
    fn vocabulary_always_contains_fallback_once() {
        let vocabulary = IntentVocabulary::new(["greeting", "pricing", "greeting"]);
        assert_eq!(vocabulary.labels(), ["greeting", "pricing", UNRECOGNIZED_INTENT]);

        let explicit = IntentVocabulary::new(["greeting", UNRECOGNIZED_INTENT]);
        assert_eq!(explicit.labels().len(), 2);
        assert_eq!(explicit.intents().collect::<Vec<_>>(), vec!["greeting"]);
    }

    #[test]
    fn membership_is_case_sensitive_after_normalization() {
        let vocabulary = IntentVocabulary::new(["greeting", "pricing"]);

        assert!(vocabulary.contains("greeting"));
        assert!(vocabulary.contains("greeting."));
        assert!(!vocabulary.contains("GREETING!!"));
        assert!(!vocabulary.contains(""));

        let resolved = vocabulary.resolve(&IntentLabel("GREETING".to_string()));
        assert!(resolved.is_unrecognized());
        let member = vocabulary.resolve(&IntentLabel("pricing".to_string()));
        assert_eq!(member.as_str(), "pricing");
    }

    #[test]
    fn authored_ids_with_digits_or_dashes_stay_reachable() {
        let vocabulary = IntentVocabulary::new(["greeting", "plan_2", "book-demo"]);

        let plan = vocabulary.resolve(&IntentLabel(normalize_label("plan_2")));
        assert_eq!(plan.as_str(), "plan_2");
        let demo = vocabulary.resolve(&IntentLabel(normalize_label("book-demo.")));
        assert_eq!(demo.as_str(), "book-demo");
        assert!(vocabulary.contains("bookdemo"));
    }

    #[test]
    fn ids_collapsing_onto_one_token_are_ambiguous() {
        let vocabulary = IntentVocabulary::new(["plan_2", "plan_3", "pricing"]);

        assert!(vocabulary.resolve(&IntentLabel("plan_".to_string())).is_unrecognized());
        assert_eq!(vocabulary.resolve(&IntentLabel("pricing".to_string())).as_str(), "pricing");
    }
}
