//! Model-facing half of the chat engine.
//!
//! This crate wraps the language-model providers and turns their output into
//! replies a widget can render:
//! - `classifier` maps a message onto the tenant's closed intent vocabulary
//! - `lead_judge` asks whether to invite the visitor to leave contact details
//! - `guardrails` scrubs echoed prompt text and, when the tenant does not
//!   collect leads, every sentence offering contact or bookings
//! - `composer` picks the reply text, buttons and CTA
//! - `training` generates training items from a tenant's own text
//! - `website` gathers that text from a tenant's site when given a URL
//!
//! `AgentRuntime` ties these together per incoming message.
//!
//! # Failure model
//!
//! Model calls are fallible and slow. Every call carries its own timeout,
//! and every failure path ends in either a trained default answer or the
//! fixed circuit-breaker envelope. Callers never see provider errors.

pub mod classifier;
pub mod composer;
pub mod guardrails;
pub mod lead_judge;
pub mod llm;
pub mod providers;
pub mod repair;
pub mod runtime;
pub mod training;
pub mod website;

pub use composer::{compose, ComposeRequest, Composition, ReplySource};
pub use guardrails::{sanitize_generated_text, GuardrailDecision, GuardrailPolicy};
pub use llm::{LlmClient, LlmError, ProviderResult};
pub use providers::{HttpProviderFactory, ProviderFactory, SharedClientFactory};
pub use runtime::{
    AgentRuntime, DetectIntentRequest, DetectIntentResponse, TrainRequest, TrainingOutcome,
};
pub use training::{SourceFormat, TrainingError, TrainingGenerator};
pub use website::{HttpPageFetcher, PageFetcher};
