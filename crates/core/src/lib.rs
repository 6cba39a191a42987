//! Domain model and deterministic decision logic for the lead-capture chat engine.
//!
//! Nothing in this crate performs I/O: flow matching and the lead policy are
//! pure functions over tenant configuration and the current message.

pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod lead;

pub use domain::conversation::{ConversationTurn, Sender, SessionId, TurnMetadata};
pub use domain::envelope::{ButtonPayload, CtaButton, FollowUpButton, ResponseEnvelope};
pub use domain::flow::{FlowGraph, FlowNode, FlowNodeType, FlowOption};
pub use domain::intent::{IntentLabel, IntentVocabulary, UNRECOGNIZED_INTENT};
pub use domain::tenant::{AiProvider, ContactInfo, TenantConfig, TenantId};
pub use domain::training::{FollowUpOption, TrainingData, TrainingDataItem, TrainingWarning};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use flows::{match_flow_node, FlowMatcher};
pub use lead::{LeadDecision, LeadJudgment, LeadPolicy, LeadSignals};
