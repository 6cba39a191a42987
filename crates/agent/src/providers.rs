//! HTTP adapters for the supported model providers.
//!
//! Each adapter owns the provider's wire format and hands back a
//! [`ProviderResult`]; nothing outside this module looks at raw bodies.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};

use leadflow_core::config::{LlmConfig, LlmProvider};
use leadflow_core::domain::tenant::{AiProvider, TenantConfig};

use crate::llm::{LlmClient, LlmError, ProviderResult};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

fn http_client(timeout: Duration) -> Result<Client, LlmError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|error| LlmError::Configuration(format!("failed to build HTTP client: {error}")))
}

async fn post_json(
    request: reqwest::RequestBuilder,
    body: &Value,
) -> Result<Value, LlmError> {
    let response = request.json(body).send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(LlmError::from_status(status.as_u16(), body));
    }
    response.json::<Value>().await.map_err(|error| LlmError::InvalidResponse(error.to_string()))
}

/// `candidates[0].content.parts[*].text`, concatenated.
pub fn extract_gemini_text(body: &Value) -> Result<ProviderResult, LlmError> {
    let parts = body
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .ok_or_else(|| LlmError::InvalidResponse("gemini response has no candidates".into()))?;
    let text: String = parts.iter().filter_map(|part| part.get("text")?.as_str()).collect();
    Ok(ProviderResult::new(text))
}

/// `choices[0].message.content`.
pub fn extract_openai_text(body: &Value) -> Result<ProviderResult, LlmError> {
    body.pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(ProviderResult::new)
        .ok_or_else(|| LlmError::InvalidResponse("openai response has no message content".into()))
}

/// `response` from a non-streaming `/api/generate` call.
pub fn extract_ollama_text(body: &Value) -> Result<ProviderResult, LlmError> {
    body.get("response")
        .and_then(Value::as_str)
        .map(ProviderResult::new)
        .ok_or_else(|| LlmError::InvalidResponse("ollama response has no `response` field".into()))
}

pub struct GeminiClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: SecretString,
}

impl GeminiClient {
    pub fn new(
        api_key: SecretString,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: GEMINI_BASE_URL.to_string(),
            model: model.into(),
            api_key,
        })
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn complete(&self, prompt: &str) -> Result<ProviderResult, LlmError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
        });
        let request =
            self.client.post(url).header("x-goog-api-key", self.api_key.expose_secret());
        extract_gemini_text(&post_json(request, &body).await?)
    }
}

pub struct OpenAiClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: SecretString,
}

impl OpenAiClient {
    pub fn new(
        api_key: SecretString,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: OPENAI_BASE_URL.to_string(),
            model: model.into(),
            api_key,
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn complete(&self, prompt: &str) -> Result<ProviderResult, LlmError> {
        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "max_tokens": 800,
            "temperature": 0.7,
        });
        let request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret());
        extract_openai_text(&post_json(request, &body).await?)
    }
}

pub struct OllamaClient {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaClient {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn complete(&self, prompt: &str) -> Result<ProviderResult, LlmError> {
        let body = json!({ "model": self.model, "prompt": prompt, "stream": false });
        let request = self.client.post(format!("{}/api/generate", self.base_url));
        extract_ollama_text(&post_json(request, &body).await?)
    }
}

/// Picks the model client that answers for a tenant.
pub trait ProviderFactory: Send + Sync {
    fn client_for(&self, tenant: &TenantConfig) -> Result<Arc<dyn LlmClient>, LlmError>;

    /// Client for operator tasks that are not bound to a tenant.
    fn platform_client(&self) -> Result<Arc<dyn LlmClient>, LlmError>;
}

/// Provider plus a fingerprint of the tenant key, so raw keys never sit in the map.
type ClientKey = (LlmProvider, Option<u64>);

/// Builds HTTP clients from `[llm]`, honouring a tenant's own provider and key.
/// Clients are cached per provider and key so connection pools are reused
/// across messages.
pub struct HttpProviderFactory {
    config: LlmConfig,
    clients: Mutex<HashMap<ClientKey, Arc<dyn LlmClient>>>,
}

impl HttpProviderFactory {
    pub fn new(config: LlmConfig) -> Self {
        Self { config, clients: Mutex::new(HashMap::new()) }
    }

    fn cached(
        &self,
        provider: LlmProvider,
        tenant_key: Option<&SecretString>,
    ) -> Result<Arc<dyn LlmClient>, LlmError> {
        let fingerprint = tenant_key.map(|key| {
            let mut hasher = DefaultHasher::new();
            key.expose_secret().hash(&mut hasher);
            hasher.finish()
        });
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = clients.get(&(provider, fingerprint)) {
            return Ok(Arc::clone(client));
        }
        let client = self.build(provider, tenant_key)?;
        clients.insert((provider, fingerprint), Arc::clone(&client));
        Ok(client)
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs.max(1))
    }

    fn platform_key(&self, provider: LlmProvider) -> Option<SecretString> {
        (self.config.provider == provider).then(|| self.config.api_key.clone()).flatten()
    }

    fn model_for(&self, provider: LlmProvider, fallback: &str) -> String {
        if self.config.provider == provider {
            self.config.model.clone()
        } else {
            fallback.to_string()
        }
    }

    fn build(
        &self,
        provider: LlmProvider,
        tenant_key: Option<&SecretString>,
    ) -> Result<Arc<dyn LlmClient>, LlmError> {
        let missing_key = |name: &str| {
            LlmError::Configuration(format!("no API key available for provider `{name}`"))
        };
        Ok(match provider {
            LlmProvider::Gemini => {
                let key = tenant_key
                    .cloned()
                    .or_else(|| self.platform_key(LlmProvider::Gemini))
                    .ok_or_else(|| missing_key("gemini"))?;
                Arc::new(GeminiClient::new(
                    key,
                    self.model_for(LlmProvider::Gemini, DEFAULT_GEMINI_MODEL),
                    self.timeout(),
                )?)
            }
            LlmProvider::OpenAi => {
                let key = tenant_key
                    .cloned()
                    .or_else(|| self.platform_key(LlmProvider::OpenAi))
                    .ok_or_else(|| missing_key("openai"))?;
                Arc::new(OpenAiClient::new(
                    key,
                    self.model_for(LlmProvider::OpenAi, DEFAULT_OPENAI_MODEL),
                    self.timeout(),
                )?)
            }
            LlmProvider::Ollama => {
                let base_url = self.config.base_url.clone().ok_or_else(|| {
                    LlmError::Configuration("ollama requires `llm.base_url`".to_string())
                })?;
                Arc::new(OllamaClient::new(base_url, self.config.model.clone(), self.timeout())?)
            }
        })
    }
}

impl ProviderFactory for HttpProviderFactory {
    fn client_for(&self, tenant: &TenantConfig) -> Result<Arc<dyn LlmClient>, LlmError> {
        let tenant_key = tenant.custom_api_key.as_ref();
        match tenant.ai_provider {
            AiProvider::Platform => self.cached(self.config.provider, None),
            AiProvider::Google => self.cached(LlmProvider::Gemini, tenant_key),
            AiProvider::OpenAi => self.cached(LlmProvider::OpenAi, tenant_key),
        }
    }

    fn platform_client(&self) -> Result<Arc<dyn LlmClient>, LlmError> {
        self.cached(self.config.provider, None)
    }
}

/// Hands out one shared client regardless of tenant.
pub struct SharedClientFactory {
    client: Arc<dyn LlmClient>,
}

impl SharedClientFactory {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client }
    }
}

impl ProviderFactory for SharedClientFactory {
    fn client_for(&self, _tenant: &TenantConfig) -> Result<Arc<dyn LlmClient>, LlmError> {
        Ok(Arc::clone(&self.client))
    }

    fn platform_client(&self) -> Result<Arc<dyn LlmClient>, LlmError> {
        Ok(Arc::clone(&self.client))
    }
}
