use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use leadflow_core::config::EngineConfig;
use leadflow_core::domain::conversation::{
    recent_window, render_transcript, user_turn_count, ConversationTurn, SessionId, TurnMetadata,
};
use leadflow_core::domain::envelope::ResponseEnvelope;
use leadflow_core::domain::flow::FlowNode;
use leadflow_core::domain::intent::IntentLabel;
use leadflow_core::domain::tenant::{ContactInfo, TenantConfig, TenantId};
use leadflow_core::domain::training::{TrainingData, TrainingDataItem, TrainingWarning};
use leadflow_core::errors::{ApplicationError, DomainError};
use leadflow_core::flows::FlowMatcher;
use leadflow_core::lead::{LeadJudgment, LeadPolicy, LeadSignals};
use leadflow_db::{ChatSessionRepository, ChatbotRepository, RepositoryError, SessionClaim};

use crate::classifier::try_classify;
use crate::composer::{build_generation_prompt, compose, ComposeRequest, ReplySource};
use crate::guardrails::GuardrailPolicy;
use crate::lead_judge::judge_lead;
use crate::llm::{complete_within, LlmClient};
use crate::providers::ProviderFactory;
use crate::training::{SourceFormat, TrainingError, TrainingGenerator, TrainingRequest};
use crate::website::{collect_site_text, HttpPageFetcher, PageFetcher, WebsiteError};

#[derive(Clone, Debug)]
pub struct DetectIntentRequest {
    pub tenant_id: TenantId,
    pub message: String,
    /// Caller-supplied history. When absent the session store is read.
    pub history: Option<Vec<ConversationTurn>>,
    pub session_id: Option<SessionId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DetectIntentResponse {
    pub session_id: SessionId,
    pub envelope: ResponseEnvelope,
}

#[derive(Clone, Debug)]
pub struct TrainRequest {
    /// Tenant whose contact details shape the prompt and who receives the
    /// result. Without one the items are only returned.
    pub tenant_id: Option<TenantId>,
    pub business_name: Option<String>,
    /// Text, HTML, or a website address when `format` is `Url`.
    pub source: String,
    pub format: SourceFormat,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TrainingOutcome {
    pub items: Vec<TrainingDataItem>,
    pub warnings: Vec<TrainingWarning>,
    pub repaired: bool,
    pub attempts: u32,
    pub stored: bool,
}

impl From<TrainingError> for ApplicationError {
    fn from(error: TrainingError) -> Self {
        match error {
            TrainingError::EmptySource => {
                Self::Domain(DomainError::TrainingValidation(error.to_string()))
            }
            TrainingError::Validation(domain) => Self::Domain(domain),
            TrainingError::Website(WebsiteError::InvalidUrl(_) | WebsiteError::Empty(_)) => {
                Self::Domain(DomainError::TrainingValidation(error.to_string()))
            }
            TrainingError::Overloaded { .. }
            | TrainingError::Provider(_)
            | TrainingError::Parse(_)
            | TrainingError::Website(_) => Self::Integration(error.to_string()),
        }
    }
}

/// Per-message orchestration: deterministic flow matching, the concurrent
/// provider fan-out, lead policy, composition and session persistence.
pub struct AgentRuntime {
    chatbots: Arc<dyn ChatbotRepository>,
    sessions: Arc<dyn ChatSessionRepository>,
    providers: Arc<dyn ProviderFactory>,
    pages: Option<Arc<dyn PageFetcher>>,
    config: EngineConfig,
    matcher: FlowMatcher,
    lead_policy: LeadPolicy,
}

struct Resolution {
    envelope: ResponseEnvelope,
    source: Option<ReplySource>,
}

impl Resolution {
    fn circuit_breaker(tenant: &TenantConfig) -> Self {
        Self { envelope: ResponseEnvelope::circuit_breaker(tenant.default_cta()), source: None }
    }
}

impl AgentRuntime {
    pub fn new(
        chatbots: Arc<dyn ChatbotRepository>,
        sessions: Arc<dyn ChatSessionRepository>,
        providers: Arc<dyn ProviderFactory>,
        config: EngineConfig,
    ) -> Self {
        Self {
            chatbots,
            sessions,
            providers,
            pages: None,
            config,
            matcher: FlowMatcher::default(),
            lead_policy: LeadPolicy::default(),
        }
    }

    /// Replaces the HTTP fetcher used for website training sources.
    pub fn with_page_fetcher(mut self, pages: Arc<dyn PageFetcher>) -> Self {
        self.pages = Some(pages);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Loads an active tenant. Missing and inactive tenants are both
    /// reported as not found.
    pub async fn load_tenant(&self, tenant_id: &TenantId) -> Result<TenantConfig, ApplicationError> {
        let tenant = self
            .chatbots
            .find_by_id(tenant_id)
            .await
            .map_err(|error| ApplicationError::Persistence(error.to_string()))?;
        match tenant {
            Some(tenant) if tenant.is_active => Ok(tenant),
            Some(_) => Err(ApplicationError::NotFound(format!("chatbot `{tenant_id}` is inactive"))),
            None => Err(ApplicationError::NotFound(format!("chatbot `{tenant_id}` does not exist"))),
        }
    }

    /// Errors only when the tenant cannot be loaded; every later failure
    /// ends in a training default or the circuit-breaker envelope.
    pub async fn detect_intent(
        &self,
        request: DetectIntentRequest,
    ) -> Result<DetectIntentResponse, ApplicationError> {
        let tenant = self.load_tenant(&request.tenant_id).await?;
        Ok(self.respond(&tenant, request).await)
    }

    pub async fn respond(
        &self,
        tenant: &TenantConfig,
        request: DetectIntentRequest,
    ) -> DetectIntentResponse {
        let DetectIntentRequest { message, history, session_id, .. } = request;
        let session_id = self.claim_session(tenant, session_id).await;

        let history = match history {
            Some(history) => history,
            None => self.load_history(tenant, &session_id).await,
        };
        let turn_count = user_turn_count(&history);
        let transcript = render_transcript(recent_window(&history, self.config.history_window));

        self.persist_user_turn(tenant, &session_id, &message).await;

        let flow = tenant.active_flow();
        if let Some(Err(error)) = flow.map(|graph| graph.validate()) {
            warn!(
                event_name = "engine.flow.invalid",
                tenant_id = %tenant.id,
                error = %error,
                "tenant flow graph is invalid; matching continues read-only"
            );
        }
        let matched = flow.and_then(|graph| self.matcher.match_detailed(&message, &graph.nodes));
        if let Some(found) = &matched {
            debug!(
                event_name = "engine.flow.matched",
                tenant_id = %tenant.id,
                node_id = %found.node.id,
                family = found.family,
                "flow node matched"
            );
        }
        let node = matched.map(|found| found.node);

        let resolution = match self.providers.client_for(tenant) {
            Ok(client) => {
                self.resolve(tenant, client.as_ref(), &message, node, &transcript, turn_count).await
            }
            Err(error) => {
                warn!(
                    event_name = "engine.provider.unavailable",
                    tenant_id = %tenant.id,
                    error_class = error.error_class(),
                    error = %error,
                    "no model client for tenant"
                );
                self.without_provider(tenant, &message, node, turn_count)
            }
        };

        let envelope = resolution.envelope;
        self.persist_bot_turn(tenant, &session_id, &envelope).await;
        info!(
            event_name = "engine.detect_intent.completed",
            tenant_id = %tenant.id,
            session_id = %session_id,
            intent_id = %envelope.intent_id,
            lead = envelope.lead,
            source = resolution.source.map(|source| source.as_str()).unwrap_or("circuit_breaker"),
            "message answered"
        );
        DetectIntentResponse { session_id, envelope }
    }

    async fn resolve(
        &self,
        tenant: &TenantConfig,
        client: &dyn LlmClient,
        message: &str,
        node: Option<&FlowNode>,
        transcript: &str,
        turn_count: usize,
    ) -> Resolution {
        let vocabulary = tenant.training_data.vocabulary();
        let wants_judgment = self.config.lead_judgment_enabled && tenant.lead_collection_enabled;
        let wants_generation = node.map_or(true, |node| node.ai_handling);
        let generation_prompt = build_generation_prompt(tenant, node, message, transcript);

        let classification = try_classify(
            client,
            message,
            &vocabulary,
            transcript,
            secs(self.config.classification_timeout_secs),
        );
        let judgment = async {
            if wants_judgment {
                judge_lead(
                    client,
                    &tenant.name,
                    message,
                    transcript,
                    secs(self.config.lead_judgment_timeout_secs),
                )
                .await
            } else {
                LeadJudgment::NotRequested
            }
        };
        let generation = async {
            if wants_generation {
                Some(
                    complete_within(
                        client,
                        &generation_prompt,
                        secs(self.config.generation_timeout_secs),
                    )
                    .await,
                )
            } else {
                None
            }
        };
        let (classified, judgment, generated) = tokio::join!(classification, judgment, generation);

        let generated = match generated {
            Some(Ok(result)) => Some(result.text),
            Some(Err(error)) => {
                warn!(
                    event_name = "engine.generation.failed",
                    tenant_id = %tenant.id,
                    provider = client.name(),
                    error_class = error.error_class(),
                    error = %error,
                    "generation failed; canned text applies"
                );
                None
            }
            None => None,
        };

        let intent = match classified {
            Ok(candidate) => vocabulary.resolve(&candidate),
            Err(error) if node.is_some() => {
                warn!(
                    event_name = "engine.classifier.failed",
                    tenant_id = %tenant.id,
                    provider = client.name(),
                    error_class = error.error_class(),
                    error = %error,
                    "classification failed; answering from matched flow node"
                );
                IntentLabel::unrecognized()
            }
            Err(error) => {
                warn!(
                    event_name = "engine.circuit_breaker.tripped",
                    tenant_id = %tenant.id,
                    provider = client.name(),
                    error_class = error.error_class(),
                    error = %error,
                    "classification failed"
                );
                return Resolution::circuit_breaker(tenant);
            }
        };

        self.compose_turn(
            tenant,
            message,
            node,
            intent,
            generated.as_deref(),
            &judgment,
            turn_count,
        )
    }

    /// Deterministic answer when no provider can be built for the tenant.
    fn without_provider(
        &self,
        tenant: &TenantConfig,
        message: &str,
        node: Option<&FlowNode>,
        turn_count: usize,
    ) -> Resolution {
        if node.is_none() {
            return Resolution::circuit_breaker(tenant);
        }
        let judgment = if self.config.lead_judgment_enabled && tenant.lead_collection_enabled {
            LeadJudgment::Failed
        } else {
            LeadJudgment::NotRequested
        };
        self.compose_turn(
            tenant,
            message,
            node,
            IntentLabel::unrecognized(),
            None,
            &judgment,
            turn_count,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn compose_turn(
        &self,
        tenant: &TenantConfig,
        message: &str,
        node: Option<&FlowNode>,
        intent: IntentLabel,
        generated: Option<&str>,
        judgment: &LeadJudgment,
        turn_count: usize,
    ) -> Resolution {
        let recognized = !intent.is_unrecognized();
        let item = tenant.training_data.item(intent.as_str()).filter(|_| recognized);
        let decision = self.lead_policy.evaluate(&LeadSignals {
            turn_count,
            lead_collection_enabled: tenant.lead_collection_enabled,
            message,
            intent_id: recognized.then_some(intent.as_str()),
            intent_marked_lead: item.is_some_and(|item| item.lead),
            judgment,
        });
        debug!(
            event_name = "engine.lead.evaluated",
            tenant_id = %tenant.id,
            show = decision.show,
            trigger = ?decision.trigger,
            turn_count,
            "lead policy evaluated"
        );

        let composition = compose(
            &ComposeRequest {
                tenant,
                matched_node: node,
                intent: &intent,
                training_item: item,
                generated,
                lead: decision,
                turn_count,
            },
            &GuardrailPolicy::for_tenant(tenant.lead_collection_enabled),
        );
        Resolution { envelope: composition.envelope, source: Some(composition.source) }
    }

    /// Binds the requested session to the tenant. An id that belongs to
    /// another tenant is dropped in favour of a fresh session.
    async fn claim_session(&self, tenant: &TenantConfig, requested: Option<SessionId>) -> SessionId {
        let session_id = requested.unwrap_or_else(SessionId::generate);
        match self.sessions.ensure_session(&session_id, &tenant.id).await {
            Ok(SessionClaim::Created | SessionClaim::Resumed) => session_id,
            Ok(SessionClaim::Foreign) => {
                let fresh = SessionId::generate();
                warn!(
                    event_name = "engine.session.foreign",
                    tenant_id = %tenant.id,
                    requested_session_id = %session_id,
                    session_id = %fresh,
                    "session id belongs to another chatbot; starting a new session"
                );
                if let Err(error) = self.sessions.ensure_session(&fresh, &tenant.id).await {
                    self.session_write_failed(tenant, &fresh, "session", &error);
                }
                fresh
            }
            Err(error) => {
                self.session_write_failed(tenant, &session_id, "session", &error);
                session_id
            }
        }
    }

    async fn load_history(&self, tenant: &TenantConfig, session_id: &SessionId) -> Vec<ConversationTurn> {
        match self.sessions.recent_turns(session_id, &tenant.id, self.config.history_window).await {
            Ok(turns) => turns,
            Err(error) => {
                warn!(
                    event_name = "engine.session.history_unavailable",
                    session_id = %session_id,
                    error = %error,
                    "could not read session history; continuing without it"
                );
                Vec::new()
            }
        }
    }

    async fn persist_user_turn(&self, tenant: &TenantConfig, session_id: &SessionId, message: &str) {
        if let Err(error) = self.sessions.append_turn(session_id, &ConversationTurn::user(message)).await {
            self.session_write_failed(tenant, session_id, "user", &error);
        }
    }

    async fn persist_bot_turn(
        &self,
        tenant: &TenantConfig,
        session_id: &SessionId,
        envelope: &ResponseEnvelope,
    ) {
        let turn = ConversationTurn::bot(
            envelope.message_text.clone(),
            TurnMetadata { intent_id: Some(envelope.intent_id.clone()), lead: envelope.lead },
        );
        if let Err(error) = self.sessions.append_turn(session_id, &turn).await {
            self.session_write_failed(tenant, session_id, "bot", &error);
        }
    }

    fn session_write_failed(
        &self,
        tenant: &TenantConfig,
        session_id: &SessionId,
        record: &'static str,
        error: &RepositoryError,
    ) {
        warn!(
            event_name = "engine.session.persist_failed",
            tenant_id = %tenant.id,
            session_id = %session_id,
            record,
            error = %error,
            "failed to persist session data"
        );
    }

    /// Generates training items from free text and, for a known tenant,
    /// stores them as its training data.
    pub async fn train(&self, request: TrainRequest) -> Result<TrainingOutcome, ApplicationError> {
        let tenant = match &request.tenant_id {
            Some(tenant_id) => Some(
                self.chatbots
                    .find_by_id(tenant_id)
                    .await
                    .map_err(|error| ApplicationError::Persistence(error.to_string()))?
                    .ok_or_else(|| {
                        ApplicationError::NotFound(format!("chatbot `{tenant_id}` does not exist"))
                    })?,
            ),
            None => None,
        };

        let client = match &tenant {
            Some(tenant) => self.providers.client_for(tenant),
            None => self.providers.platform_client(),
        }
        .map_err(|error| ApplicationError::Configuration(error.to_string()))?;

        let (source, format) = match request.format {
            SourceFormat::Url => {
                let pages = match &self.pages {
                    Some(pages) => pages.clone(),
                    None => Arc::new(
                        HttpPageFetcher::new(secs(self.config.generation_timeout_secs))
                            .map_err(TrainingError::from)?,
                    ),
                };
                let site = collect_site_text(pages, &request.source)
                    .await
                    .map_err(TrainingError::from)?;
                (site.text, SourceFormat::Text)
            }
            format => (request.source, format),
        };

        let fallback_contact = ContactInfo::default();
        let business_name = request
            .business_name
            .as_deref()
            .or(tenant.as_ref().map(|tenant| tenant.name.as_str()))
            .unwrap_or("the business");
        let generated = TrainingGenerator::from_config(&self.config)
            .generate(
                client.as_ref(),
                &TrainingRequest {
                    business_name,
                    source: &source,
                    format,
                    contact: tenant.as_ref().map_or(&fallback_contact, |tenant| &tenant.contact),
                },
            )
            .await?;

        let stored = match &tenant {
            Some(tenant) => self
                .chatbots
                .update_training_data(&tenant.id, &TrainingData::Structured(generated.items.clone()))
                .await
                .map_err(|error| ApplicationError::Persistence(error.to_string()))?,
            None => false,
        };

        Ok(TrainingOutcome {
            items: generated.items,
            warnings: generated.warnings,
            repaired: generated.repaired,
            attempts: generated.attempts,
            stored,
        })
    }
}

fn secs(value: u64) -> Duration {
    Duration::from_secs(value.max(1))
}
