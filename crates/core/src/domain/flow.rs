//! Tenant-authored conversation graphs.
//!
//! A graph is loaded once per turn and only ever read. Cycles are legal
//! (a node may route back to `start`), so nothing here walks the graph
//! recursively.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

/// Id of the node a fresh conversation begins at.
pub const ENTRY_NODE_ID: &str = "start";
/// Target that ends a flow without naming a node.
pub const TERMINAL_NODE_ID: &str = "end";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlowNodeType {
    MultipleChoice,
    ContactForm,
    Statement,
    OpenEnded,
}

impl FlowNodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MultipleChoice => "multiple-choice",
            Self::ContactForm => "contact-form",
            Self::Statement => "statement",
            Self::OpenEnded => "open-ended",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowOption {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: FlowNodeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<FlowOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_id: Option<String>,
    #[serde(default)]
    pub ai_handling: bool,
}

impl FlowNode {
    pub fn new(id: impl Into<String>, node_type: FlowNodeType, question: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type,
            question: Some(question.into()),
            text: None,
            options: Vec::new(),
            next_id: None,
            ai_handling: false,
        }
    }

    pub fn with_option(mut self, text: impl Into<String>, next_id: impl Into<String>) -> Self {
        self.options.push(FlowOption { text: text.into(), next_id: Some(next_id.into()) });
        self
    }

    pub fn with_next(mut self, next_id: impl Into<String>) -> Self {
        self.next_id = Some(next_id.into());
        self
    }

    pub fn with_ai_handling(mut self) -> Self {
        self.ai_handling = true;
        self
    }

    /// Text shown to the user; `question` wins over `text` when both are set.
    pub fn prompt(&self) -> &str {
        self.question.as_deref().or(self.text.as_deref()).unwrap_or_default()
    }

    pub fn is_entry(&self) -> bool {
        self.id == ENTRY_NODE_ID
    }

    /// Every edge target declared by this node, options first.
    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.options
            .iter()
            .filter_map(|option| option.next_id.as_deref())
            .chain(self.next_id.as_deref())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FlowGraph {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub welcome: Option<String>,
    pub nodes: Vec<FlowNode>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FlowGraphRepr {
    Wrapped {
        #[serde(default)]
        welcome: Option<String>,
        nodes: Vec<FlowNode>,
    },
    Bare(Vec<FlowNode>),
}

impl<'de> Deserialize<'de> for FlowGraph {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Ok(match FlowGraphRepr::deserialize(deserializer)? {
            FlowGraphRepr::Wrapped { welcome, nodes } => Self { welcome, nodes },
            FlowGraphRepr::Bare(nodes) => Self { welcome: None, nodes },
        })
    }
}

impl FlowGraph {
    pub fn new(nodes: Vec<FlowNode>) -> Self {
        Self { welcome: None, nodes }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&FlowNode> {
        self.nodes.iter().find(|node| node.id == id)
    }

    pub fn entry(&self) -> Option<&FlowNode> {
        self.node(ENTRY_NODE_ID)
    }

    /// Next node after `node_id`. A clicked option is matched by its text
    /// (case-insensitive); without one the node's linear `next_id` is used.
    /// `None` means the flow ended or the target is missing.
    pub fn successor(&self, node_id: &str, option_text: Option<&str>) -> Option<&FlowNode> {
        let node = self.node(node_id)?;
        let target = match option_text {
            Some(choice) => node
                .options
                .iter()
                .find(|option| option.text.trim().eq_ignore_ascii_case(choice.trim()))
                .and_then(|option| option.next_id.as_deref()),
            None => node.next_id.as_deref(),
        }?;

        if target == TERMINAL_NODE_ID {
            return None;
        }
        self.node(target)
    }

    /// Checks id uniqueness and that every edge lands on a node or the
    /// terminal sentinel. Cycles are not reported.
    pub fn validate(&self) -> Result<(), DomainError> {
        let mut seen = BTreeSet::new();
        let mut duplicates = BTreeSet::new();
        for node in &self.nodes {
            if !seen.insert(node.id.as_str()) {
                duplicates.insert(node.id.as_str());
            }
        }

        let mut dangling: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for node in &self.nodes {
            for target in node.targets() {
                if target != TERMINAL_NODE_ID && !seen.contains(target) {
                    dangling.entry(node.id.as_str()).or_default().push(target);
                }
            }
        }

        let mut problems = Vec::new();
        if !duplicates.is_empty() {
            problems.push(format!(
                "duplicate node ids: {}",
                duplicates.into_iter().collect::<Vec<_>>().join(", ")
            ));
        }
        for (source, targets) in dangling {
            problems.push(format!("node `{source}` points at unknown {}", targets.join(", ")));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(DomainError::InvalidFlowGraph(problems.join("; ")))
        }
    }
}
