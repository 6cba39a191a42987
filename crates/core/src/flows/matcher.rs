//! Deterministic keyword matcher that maps a free-text message onto a
//! single flow node.
//!
//! Families are tried in table order and the first one whose trigger phrases
//! occur in the message decides the outcome alone. Within that family the
//! candidate nodes are scored, and the winner has to beat the entry node by
//! more than [`MatchWeights::entry_margin`] so that weak signals do not reset
//! the conversation to `start`.

use tracing::debug;

use crate::domain::flow::{FlowNode, FlowNodeType};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IntentFamily {
    pub name: &'static str,
    pub triggers: &'static [&'static str],
    pub node_types: &'static [FlowNodeType],
    pub primary_keyword: &'static str,
}

impl IntentFamily {
    fn is_triggered_by(&self, lowered_message: &str) -> bool {
        self.triggers.iter().any(|trigger| lowered_message.contains(trigger))
    }

    fn accepts(&self, node: &FlowNode) -> bool {
        self.node_types.contains(&node.node_type)
    }
}

pub const INTENT_FAMILIES: &[IntentFamily] = &[
    IntentFamily {
        name: "contact",
        triggers: &[
            "contact info",
            "contact information",
            "get in touch",
            "reach out",
            "phone number",
            "email",
            "address",
            "location",
            "call",
            "speak to",
            "talk to",
            "contact us",
            "contact you",
            "reach you",
            "get contact",
            "your contact",
            "contact details",
            "contact form",
            "get contact form",
            "show contact form",
            "need contact form",
            "want contact form",
            "can i get contact form",
            "i need contact form",
            "contact form please",
            "contact form request",
        ],
        node_types: &[FlowNodeType::ContactForm, FlowNodeType::MultipleChoice],
        primary_keyword: "contact",
    },
    IntentFamily {
        name: "pricing",
        triggers: &[
            "pricing",
            "price",
            "cost",
            "how much",
            "fee",
            "charge",
            "quote",
            "estimate",
            "pricing plans",
            "pricing options",
            "what does it cost",
            "how much does it cost",
            "what are your prices",
            "what are your rates",
            "how much do you charge",
            "what is the cost",
            "what is the price",
            "tell me about pricing",
            "pricing information",
            "price list",
            "cost breakdown",
            "fee structure",
        ],
        node_types: &[FlowNodeType::MultipleChoice, FlowNodeType::Statement],
        primary_keyword: "pricing",
    },
    IntentFamily {
        name: "services",
        triggers: &[
            "services",
            "what do you do",
            "what services",
            "offer",
            "provide",
            "help with",
            "what can you help",
            "what do you offer",
            "your services",
            "service offerings",
        ],
        node_types: &[FlowNodeType::MultipleChoice, FlowNodeType::Statement],
        primary_keyword: "services",
    },
    IntentFamily {
        name: "booking",
        triggers: &[
            "book",
            "appointment",
            "schedule",
            "meeting",
            "consultation",
            "demo",
            "call",
            "book a call",
            "schedule a call",
            "book appointment",
            "schedule meeting",
        ],
        node_types: &[FlowNodeType::ContactForm, FlowNodeType::MultipleChoice],
        primary_keyword: "book",
    },
    IntentFamily {
        name: "portfolio",
        triggers: &[
            "portfolio",
            "work",
            "projects",
            "examples",
            "case studies",
            "show me",
            "your work",
            "previous work",
            "examples of work",
            "portfolio of work",
        ],
        node_types: &[FlowNodeType::MultipleChoice, FlowNodeType::Statement],
        primary_keyword: "portfolio",
    },
];

const PRICING_TERMS: &[&str] = &["pricing", "price", "cost", "fee"];

/// Hand-tuned scoring weights. Kept as data so behavior stays comparable
/// across releases.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MatchWeights {
    pub non_entry_node: i32,
    pub keyword_in_question: i32,
    pub contact_form_for_contact: i32,
    pub form_request_on_contact_form: i32,
    pub contact_question_for_contact: i32,
    pub form_request_on_form_question: i32,
    pub pricing_term_in_question: i32,
    pub pricing_term_in_options: i32,
    pub entry_margin: i32,
}

pub const DEFAULT_WEIGHTS: MatchWeights = MatchWeights {
    non_entry_node: 10,
    keyword_in_question: 5,
    contact_form_for_contact: 3,
    form_request_on_contact_form: 5,
    contact_question_for_contact: 2,
    form_request_on_form_question: 4,
    pricing_term_in_question: 8,
    pricing_term_in_options: 6,
    entry_margin: 5,
};

impl Default for MatchWeights {
    fn default() -> Self {
        DEFAULT_WEIGHTS
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchKind {
    /// Best exact candidate that cleared the entry-node margin.
    Scored { score: i32 },
    /// First non-entry node of an accepted type.
    Fallback,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlowMatch<'a> {
    pub node: &'a FlowNode,
    pub family: &'static str,
    pub kind: MatchKind,
}

#[derive(Clone, Copy, Debug)]
pub struct FlowMatcher {
    families: &'static [IntentFamily],
    weights: MatchWeights,
}

impl Default for FlowMatcher {
    fn default() -> Self {
        Self { families: INTENT_FAMILIES, weights: DEFAULT_WEIGHTS }
    }
}

impl FlowMatcher {
    pub fn new(families: &'static [IntentFamily], weights: MatchWeights) -> Self {
        Self { families, weights }
    }

    pub fn match_node<'a>(&self, message: &str, nodes: &'a [FlowNode]) -> Option<&'a FlowNode> {
        self.match_detailed(message, nodes).map(|found| found.node)
    }

    pub fn match_detailed<'a>(&self, message: &str, nodes: &'a [FlowNode]) -> Option<FlowMatch<'a>> {
        let lowered = message.to_lowercase();
        let family = self.families.iter().find(|family| family.is_triggered_by(&lowered))?;
        let keyword = family.primary_keyword;

        let mut scored: Vec<(&FlowNode, i32)> = nodes
            .iter()
            .filter(|node| family.accepts(node) && mentions_keyword(node, keyword))
            .map(|node| (node, self.score(node, keyword, &lowered)))
            .collect();

        if !scored.is_empty() {
            // sort_by is stable, so equal scores keep authoring order.
            scored.sort_by(|left, right| right.1.cmp(&left.1));
            let (best, best_score) = scored[0];
            let entry_score = scored
                .iter()
                .find(|(node, _)| node.is_entry())
                .map(|(_, score)| *score)
                .unwrap_or(0);

            if best_score > entry_score + self.weights.entry_margin {
                debug!(
                    event_name = "engine.matcher.scored",
                    family = family.name,
                    node_id = %best.id,
                    score = best_score,
                    entry_score,
                    "flow node matched by score"
                );
                return Some(FlowMatch {
                    node: best,
                    family: family.name,
                    kind: MatchKind::Scored { score: best_score },
                });
            }
            debug!(
                event_name = "engine.matcher.margin_not_cleared",
                family = family.name,
                node_id = %best.id,
                score = best_score,
                entry_score,
                "best candidate too close to entry node"
            );
        }

        let fallback = nodes.iter().find(|node| family.accepts(node) && !node.is_entry());
        match fallback {
            Some(node) => {
                debug!(
                    event_name = "engine.matcher.fallback",
                    family = family.name,
                    node_id = %node.id,
                    "flow node matched by type fallback"
                );
                Some(FlowMatch { node, family: family.name, kind: MatchKind::Fallback })
            }
            None => {
                debug!(
                    event_name = "engine.matcher.no_candidate",
                    family = family.name,
                    "family triggered but no node qualifies"
                );
                None
            }
        }
    }

    fn score(&self, node: &FlowNode, keyword: &str, lowered_message: &str) -> i32 {
        let weights = &self.weights;
        let question = node.prompt().to_lowercase();
        let asks_for_form = lowered_message.contains("form");
        let is_contact_form = node.node_type == FlowNodeType::ContactForm;
        let mut score = 0;

        if !node.is_entry() {
            score += weights.non_entry_node;
        }
        if question.contains(keyword) {
            score += weights.keyword_in_question;
        }
        if keyword == "contact" && is_contact_form {
            score += weights.contact_form_for_contact;
        }
        if asks_for_form && is_contact_form {
            score += weights.form_request_on_contact_form;
        }
        if keyword == "contact" && question.contains("contact") {
            score += weights.contact_question_for_contact;
        }
        if asks_for_form && question.contains("form") {
            score += weights.form_request_on_form_question;
        }
        if matches!(keyword, "pricing" | "price" | "cost") {
            if PRICING_TERMS.iter().any(|term| question.contains(term)) {
                score += weights.pricing_term_in_question;
            }
            let option_hit = node.options.iter().any(|option| {
                let text = option.text.to_lowercase();
                PRICING_TERMS.iter().any(|term| text.contains(term))
            });
            if option_hit {
                score += weights.pricing_term_in_options;
            }
        }

        score
    }
}

fn mentions_keyword(node: &FlowNode, keyword: &str) -> bool {
    node.prompt().to_lowercase().contains(keyword)
        || node.options.iter().any(|option| option.text.to_lowercase().contains(keyword))
}

/// Maps `message` onto the best node in `nodes` using the built-in families
/// and weights. `None` means "no deterministic trigger", never an error.
pub fn match_flow_node<'a>(message: &str, nodes: &'a [FlowNode]) -> Option<&'a FlowNode> {
    FlowMatcher::default().match_node(message, nodes)
}

#[cfg(test)]
mod tests {
    use super::{match_flow_node, FlowMatcher, MatchKind, INTENT_FAMILIES};
    use crate::domain::flow::{FlowNode, FlowNodeType};

    fn general_flow() -> Vec<FlowNode> {
        vec![
            FlowNode::new("start", FlowNodeType::MultipleChoice, "What can I assist you with?")
                .with_option("Pricing", "plans")
                .with_option("Contact someone", "contact-form"),
            FlowNode::new("plans", FlowNodeType::MultipleChoice, "Our pricing plans")
                .with_option("Starter", "contact-form")
                .with_option("Business", "contact-form"),
            FlowNode::new("services", FlowNodeType::Statement, "Our services cover design and hosting.")
                .with_next("start"),
            FlowNode::new(
                "contact-form",
                FlowNodeType::ContactForm,
                "May I have your contact information?",
            ),
        ]
    }

    #[test]
    fn pricing_question_reaches_pricing_node() {
        let nodes = general_flow();
        let matched = match_flow_node("how much does it cost", &nodes).map(|node| node.id.as_str());
        assert_eq!(matched, Some("plans"));

        let detail = FlowMatcher::default()
            .match_detailed("how much does it cost", &nodes)
            .expect("pricing match");
        assert_eq!(detail.family, "pricing");
        assert_eq!(detail.kind, MatchKind::Scored { score: 23 });
    }

    #[test]
    fn contact_form_request_prefers_contact_form_node() {
        let nodes = general_flow();
        let detail = FlowMatcher::default()
            .match_detailed("can i get contact form", &nodes)
            .expect("contact match");
        assert_eq!(detail.node.id, "contact-form");
        // 10 non-entry + 5 keyword + 3 contact-form + 5 form request + 2 contact question
        // + 4 because "information" contains "form".
        assert_eq!(detail.kind, MatchKind::Scored { score: 29 });
    }

    #[test]
    fn empty_node_list_returns_none() {
        assert_eq!(match_flow_node("how much does it cost", &[]), None);
        assert_eq!(match_flow_node("", &[]), None);
    }

    #[test]
    fn message_without_trigger_returns_none() {
        let nodes = general_flow();
        assert_eq!(match_flow_node("good morning", &nodes), None);
    }

    #[test]
    fn entry_node_is_never_returned_through_scoring() {
        let nodes = vec![FlowNode::new("start", FlowNodeType::MultipleChoice, "Our pricing options")
            .with_option("See prices", "start")];
        assert_eq!(match_flow_node("what is the price", &nodes), None);
    }

    #[test]
    fn weak_candidate_falls_back_to_first_accepted_non_entry_node() {
        // "start" is the only exact candidate, so the first accepted non-entry node wins.
        let nodes = vec![
            FlowNode::new("start", FlowNodeType::MultipleChoice, "Ask about pricing"),
            FlowNode::new("contact-form", FlowNodeType::ContactForm, "Leave your email"),
            FlowNode::new("faq", FlowNodeType::Statement, "We answer within a day."),
            FlowNode::new("more", FlowNodeType::Statement, "Anything else?"),
        ];
        let detail =
            FlowMatcher::default().match_detailed("pricing?", &nodes).expect("fallback match");
        assert_eq!(detail.node.id, "faq");
        assert_eq!(detail.kind, MatchKind::Fallback);
    }

    #[test]
    fn first_triggered_family_decides_even_without_candidates() {
        // "call" triggers the contact family first; it has no acceptable node,
        // so the booking family is never consulted.
        let nodes = vec![
            FlowNode::new("start", FlowNodeType::Statement, "Welcome"),
            FlowNode::new("book", FlowNodeType::Statement, "Book a call with us"),
        ];
        assert_eq!(match_flow_node("can I book a call", &nodes), None);
    }

    #[test]
    fn equal_scores_keep_authoring_order() {
        let nodes = vec![
            FlowNode::new("first", FlowNodeType::Statement, "Pricing for teams"),
            FlowNode::new("second", FlowNodeType::Statement, "Pricing for agencies"),
        ];
        let matched = match_flow_node("pricing please", &nodes).map(|node| node.id.as_str());
        assert_eq!(matched, Some("first"));

        let reversed: Vec<FlowNode> = nodes.into_iter().rev().collect();
        let matched = match_flow_node("pricing please", &reversed).map(|node| node.id.as_str());
        assert_eq!(matched, Some("second"));
    }

    #[test]
    fn repeated_calls_are_deterministic() {
        let nodes = general_flow();
        let messages = ["how much", "contact us", "what services do you offer", "show me your work", "hello"];
        for message in messages {
            let first = match_flow_node(message, &nodes).map(|node| node.id.clone());
            for _ in 0..5 {
                assert_eq!(match_flow_node(message, &nodes).map(|node| node.id.clone()), first);
            }
        }
    }

    #[test]
    fn matching_is_case_insensitive() {
        let nodes = general_flow();
        assert_eq!(
            match_flow_node("HOW MUCH DOES IT COST", &nodes).map(|node| node.id.as_str()),
            Some("plans")
        );
    }

    #[test]
    fn family_table_order_is_stable() {
        let names: Vec<&str> = INTENT_FAMILIES.iter().map(|family| family.name).collect();
        assert_eq!(names, ["contact", "pricing", "services", "booking", "portfolio"]);
    }
}
