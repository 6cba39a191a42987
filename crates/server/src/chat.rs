//! Chat endpoints used by the embeddable widget and the dashboard.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use leadflow_agent::runtime::{AgentRuntime, DetectIntentRequest, TrainRequest};
use leadflow_agent::training::SourceFormat;
use leadflow_core::domain::conversation::{ConversationTurn, Sender, SessionId, TurnMetadata};
use leadflow_core::domain::envelope::ResponseEnvelope;
use leadflow_core::domain::tenant::{TenantConfig, TenantId};
use leadflow_core::domain::training::TrainingDataItem;
use leadflow_core::errors::{ApplicationError, InterfaceError};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct ChatState {
    runtime: Arc<AgentRuntime>,
    /// Bearer token for operator routes; `None` keeps them closed.
    admin_token: Option<Arc<SecretString>>,
}

pub fn router(runtime: Arc<AgentRuntime>, admin_token: Option<SecretString>) -> Router {
    Router::new()
        .route("/api/intent-detect/{chatbot_id}", post(intent_detect))
        .route("/api/chat", post(chat))
        .route("/api/chatbots/{chatbot_id}/training", post(train))
        .with_state(ChatState { runtime, admin_token: admin_token.map(Arc::new) })
}

/// Turn as sent by the widget; timestamps are assigned on receipt.
#[derive(Clone, Debug, Deserialize)]
pub struct HistoryTurn {
    pub sender: Sender,
    pub content: String,
}

impl From<HistoryTurn> for ConversationTurn {
    fn from(turn: HistoryTurn) -> Self {
        match turn.sender {
            Sender::User => ConversationTurn::user(turn.content),
            Sender::Bot => ConversationTurn::bot(turn.content, TurnMetadata::default()),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct IntentDetectBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub history: Option<Vec<HistoryTurn>>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ChatBody {
    #[serde(default)]
    pub chatbot_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TrainingBody {
    /// Business text, page HTML, or a website address when `format` is `url`.
    pub raw_text: String,
    #[serde(default)]
    pub format: SourceFormat,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChatResponse {
    pub session_id: String,
    pub response: ResponseEnvelope,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrainingResponse {
    pub chatbot_id: String,
    pub stored: bool,
    pub repaired: bool,
    pub attempts: u32,
    pub warnings: Vec<String>,
    pub items: Vec<TrainingDataItem>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub correlation_id: String,
}

#[derive(Debug)]
pub struct ApiError(InterfaceError);

impl ApiError {
    fn bad_request(message: &str) -> Self {
        Self(InterfaceError::BadRequest {
            message: message.to_string(),
            correlation_id: correlation_id(),
        })
    }

    fn from_application(error: ApplicationError) -> Self {
        Self(error.into_interface(correlation_id()))
    }

    fn unauthorized(message: &str) -> Self {
        Self(InterfaceError::Unauthorized {
            message: message.to_string(),
            correlation_id: correlation_id(),
        })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
            InterfaceError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            InterfaceError::Forbidden { .. } => StatusCode::FORBIDDEN,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        warn!(
            event_name = "engine.http.request_failed",
            correlation_id = %self.0.correlation_id(),
            status = status.as_u16(),
            error = %self.0,
            "request failed"
        );
        let body = ErrorBody {
            error: self.0.user_message().to_string(),
            correlation_id: self.0.correlation_id().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

fn correlation_id() -> String {
    Uuid::new_v4().to_string()
}

fn required_message(message: Option<String>) -> Result<String, ApiError> {
    message
        .map(|message| message.trim().to_string())
        .filter(|message| !message.is_empty())
        .ok_or_else(|| ApiError::bad_request("message is required"))
}

fn session_from(raw: Option<String>) -> Option<SessionId> {
    raw.map(|value| value.trim().to_string()).filter(|value| !value.is_empty()).map(SessionId)
}

/// Origin of an embedding page, falling back to the referer.
fn request_origin(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::ORIGIN)
        .or_else(|| headers.get(header::REFERER))
        .and_then(|value| value.to_str().ok())
}

fn ensure_origin(tenant: &TenantConfig, headers: &HeaderMap) -> Result<(), ApiError> {
    let origin = request_origin(headers);
    if tenant.allows_origin(origin) {
        return Ok(());
    }
    Err(ApiError::from_application(ApplicationError::Forbidden(format!(
        "origin `{}` is not allowed for chatbot `{}`",
        origin.unwrap_or("<none>"),
        tenant.id
    ))))
}

fn authorize_operator(state: &ChatState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = state.admin_token.as_deref() else {
        return Err(ApiError::unauthorized("operator routes are disabled: server.admin_token is unset"));
    };
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim);
    match presented {
        Some(token) if tokens_match(token, expected.expose_secret()) => Ok(()),
        Some(_) => Err(ApiError::unauthorized("operator token does not match")),
        None => Err(ApiError::unauthorized("missing bearer token")),
    }
}

// Compares every byte so timing does not reveal the matching prefix length.
fn tokens_match(presented: &str, expected: &str) -> bool {
    presented.len() == expected.len()
        && presented.bytes().zip(expected.bytes()).fold(0u8, |diff, (a, b)| diff | (a ^ b)) == 0
}

async fn answer(
    state: &ChatState,
    tenant: &TenantConfig,
    message: String,
    session_id: Option<SessionId>,
    history: Option<Vec<ConversationTurn>>,
) -> Json<ChatResponse> {
    let response = state
        .runtime
        .respond(
            tenant,
            DetectIntentRequest { tenant_id: tenant.id.clone(), message, history, session_id },
        )
        .await;
    Json(ChatResponse { session_id: response.session_id.0, response: response.envelope })
}

pub async fn intent_detect(
    Path(chatbot_id): Path<String>,
    State(state): State<ChatState>,
    headers: HeaderMap,
    Json(body): Json<IntentDetectBody>,
) -> Result<Json<ChatResponse>, ApiError> {
    let message = required_message(body.message)?;
    let tenant = state
        .runtime
        .load_tenant(&TenantId(chatbot_id))
        .await
        .map_err(ApiError::from_application)?;

    ensure_origin(&tenant, &headers)?;

    let history =
        body.history.map(|turns| turns.into_iter().map(ConversationTurn::from).collect());
    Ok(answer(&state, &tenant, message, session_from(body.session_id), history).await)
}

pub async fn chat(
    State(state): State<ChatState>,
    headers: HeaderMap,
    Json(body): Json<ChatBody>,
) -> Result<Json<ChatResponse>, ApiError> {
    let chatbot_id = body
        .chatbot_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("chatbot_id is required"))?;
    let message = required_message(body.message)?;
    let tenant = state
        .runtime
        .load_tenant(&TenantId(chatbot_id))
        .await
        .map_err(ApiError::from_application)?;
    ensure_origin(&tenant, &headers)?;

    Ok(answer(&state, &tenant, message, session_from(body.session_id), None).await)
}

pub async fn train(
    Path(chatbot_id): Path<String>,
    State(state): State<ChatState>,
    headers: HeaderMap,
    Json(body): Json<TrainingBody>,
) -> Result<Json<TrainingResponse>, ApiError> {
    authorize_operator(&state, &headers)?;
    if body.raw_text.trim().is_empty() {
        return Err(ApiError::bad_request("raw_text is required"));
    }

    let outcome = state
        .runtime
        .train(TrainRequest {
            tenant_id: Some(TenantId(chatbot_id.clone())),
            business_name: None,
            source: body.raw_text,
            format: body.format,
        })
        .await
        .map_err(ApiError::from_application)?;

    info!(
        event_name = "engine.http.training_stored",
        tenant_id = %chatbot_id,
        items = outcome.items.len(),
        warnings = outcome.warnings.len(),
        "training data replaced"
    );
    Ok(Json(TrainingResponse {
        chatbot_id,
        stored: outcome.stored,
        repaired: outcome.repaired,
        attempts: outcome.attempts,
        warnings: outcome.warnings.iter().map(ToString::to_string).collect(),
        items: outcome.items,
    }))
}
