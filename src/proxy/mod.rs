// Generation proxy - forwards prompts to one LLM vendor and validates the reply

pub mod gemini;
pub mod openai;
pub mod prompts;
pub mod router;
pub mod schema;
pub mod schema_cleaner;
pub mod translator;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::{Duration, Instant};

use crate::config::{GenerationConfig, ProvidersConfig};
use router::ModelPlan;
use schema::SchemaSpec;
use translator::Completion;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    OpenAI,
    Gemini,
    OpenRouter,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::OpenAI, Provider::Gemini, Provider::OpenRouter];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAI => "openai",
            Provider::Gemini => "gemini",
            Provider::OpenRouter => "openrouter",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationKind {
    Animation,
    Vfx,
    Script,
    Ui,
}

impl GenerationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationKind::Animation => "animation",
            GenerationKind::Vfx => "vfx",
            GenerationKind::Script => "script",
            GenerationKind::Ui => "ui",
        }
    }
}

impl fmt::Display for GenerationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const MAX_DURATION_SECS: f64 = 600.0;
const MAX_KEYFRAMES: u32 = 500;

#[derive(Debug, Clone, Deserialize)]
pub struct GenerationRequest {
    #[serde(rename = "type")]
    pub kind: GenerationKind,
    #[serde(default, alias = "systemPrompt")]
    pub system_prompt: Option<String>,
    #[serde(default, alias = "userPrompt", alias = "prompt")]
    pub user_prompt: String,
    #[serde(default, alias = "rigType")]
    pub rig_type: Option<String>,
    /// Seconds
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default, alias = "keyframeCount")]
    pub keyframe_count: Option<u32>,
    #[serde(default)]
    pub provider: Option<Provider>,
    #[serde(default)]
    pub structured: Option<bool>,
    #[serde(default, alias = "userId")]
    pub user_id: Option<String>,
}

impl GenerationRequest {
    pub fn new(kind: GenerationKind, user_prompt: impl Into<String>) -> Self {
        Self {
            kind,
            system_prompt: None,
            user_prompt: user_prompt.into(),
            rig_type: None,
            duration: None,
            keyframe_count: None,
            provider: None,
            structured: None,
            user_id: None,
        }
    }

    pub fn validate(&self, settings: &GenerationConfig) -> Result<(), ProxyError> {
        let invalid = |msg: String| Err(ProxyError::InvalidRequest(msg));

        if self.user_prompt.trim().is_empty() {
            return invalid("user_prompt must not be empty".to_string());
        }
        if self.user_prompt.chars().count() > settings.max_prompt_chars {
            return invalid(format!(
                "user_prompt exceeds {} characters",
                settings.max_prompt_chars
            ));
        }
        if let Some(system_prompt) = &self.system_prompt {
            if system_prompt.chars().count() > settings.max_prompt_chars {
                return invalid(format!(
                    "system_prompt exceeds {} characters",
                    settings.max_prompt_chars
                ));
            }
        }
        if let Some(duration) = self.duration {
            if !duration.is_finite() || duration <= 0.0 || duration > MAX_DURATION_SECS {
                return invalid(format!(
                    "duration must be within (0, {}] seconds",
                    MAX_DURATION_SECS
                ));
            }
        }
        if let Some(count) = self.keyframe_count {
            if count == 0 || count > MAX_KEYFRAMES {
                return invalid(format!("keyframe_count must be within 1..={}", MAX_KEYFRAMES));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum GenerationContent {
    Text(String),
    Json(Value),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationResult {
    pub id: String,
    pub content: GenerationContent,
    pub usage: Usage,
    pub model: String,
    pub provider: Provider,
    pub elapsed_ms: u64,
    pub attempts: u32,
    pub fallback_used: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coins_remaining: Option<u64>,
}

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("invalid generation request: {0}")]
    InvalidRequest(String),

    #[error("provider {0} is not configured")]
    ProviderNotConfigured(Provider),

    #[error("{provider} returned {status}: {body}")]
    Upstream {
        provider: Provider,
        status: u16,
        body: String,
    },

    #[error("{0} request timed out")]
    Timeout(Provider),

    #[error("request to {provider} failed: {source}")]
    Transport {
        provider: Provider,
        #[source]
        source: reqwest::Error,
    },

    #[error("malformed response from {provider}: {reason}")]
    MalformedResponse { provider: Provider, reason: String },

    #[error("output of {model} failed schema validation: {}", errors.join("; "))]
    SchemaValidation { model: String, errors: Vec<String> },
}

impl ProxyError {
    pub(crate) fn from_reqwest(provider: Provider, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProxyError::Timeout(provider)
        } else {
            ProxyError::Transport {
                provider,
                source: err,
            }
        }
    }
}

/// Vendor-neutral completion call
pub struct CompletionInput<'a> {
    pub system_prompt: &'a str,
    pub user_prompt: &'a str,
    pub max_tokens: u32,
    pub temperature: f32,
    pub schema: Option<&'a SchemaSpec>,
}

pub struct GenerationProxy {
    http_client: reqwest::Client,
    providers: ProvidersConfig,
    settings: GenerationConfig,
}

impl GenerationProxy {
    pub fn new(providers: ProvidersConfig, settings: GenerationConfig) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs.max(1)))
            .build()?;

        Ok(Self {
            http_client,
            providers,
            settings,
        })
    }

    pub fn settings(&self) -> &GenerationConfig {
        &self.settings
    }

    pub fn providers(&self) -> &ProvidersConfig {
        &self.providers
    }

    pub async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult, ProxyError> {
        request.validate(&self.settings)?;

        let provider = request.provider.unwrap_or(self.settings.default_provider);
        let plan = router::plan(provider, &self.providers)?;

        let structured = request.structured.unwrap_or(self.settings.structured_output);
        let spec = structured.then(|| schema::schema_for(request.kind));
        let system_prompt = prompts::system_prompt(request, structured);
        let user_prompt = prompts::user_prompt(request);
        let input = CompletionInput {
            system_prompt: &system_prompt,
            user_prompt: &user_prompt,
            max_tokens: self.settings.max_tokens.for_kind(request.kind),
            temperature: self.settings.temperature,
            schema: spec.as_ref(),
        };

        let started = Instant::now();
        let mut usage = Usage::default();
        let mut failed_model = String::new();
        let mut failures = Vec::new();

        for (index, model) in plan.models().enumerate() {
            let attempt = index as u32 + 1;
            tracing::info!(
                "Generating {} via {} (model={}, attempt={}, structured={})",
                request.kind,
                provider,
                model,
                attempt,
                structured
            );

            let completion = self.complete(&plan, model, &input).await?;
            usage.add(&completion.usage);

            let content = match &spec {
                None => GenerationContent::Text(completion.text),
                Some(spec) => match schema::parse_and_validate(&completion.text, spec) {
                    Ok(value) => GenerationContent::Json(value),
                    Err(errors) => {
                        tracing::warn!(
                            "Output of {} failed {} schema validation: {}",
                            completion.model,
                            spec.name,
                            errors.join("; ")
                        );
                        failed_model = completion.model;
                        failures = errors;
                        continue;
                    }
                },
            };

            let id = format!("gen-{}", uuid::Uuid::new_v4());
            let elapsed_ms = started.elapsed().as_millis() as u64;
            tracing::info!(
                "Generated {} {} with {} in {}ms ({} tokens)",
                request.kind,
                id,
                completion.model,
                elapsed_ms,
                usage.total_tokens
            );

            return Ok(GenerationResult {
                id,
                content,
                usage,
                model: completion.model,
                provider,
                elapsed_ms,
                attempts: attempt,
                fallback_used: index > 0,
                coins_remaining: None,
            });
        }

        Err(ProxyError::SchemaValidation {
            model: failed_model,
            errors: failures,
        })
    }

    async fn complete(
        &self,
        plan: &ModelPlan,
        model: &str,
        input: &CompletionInput<'_>,
    ) -> Result<Completion, ProxyError> {
        match plan.provider {
            Provider::OpenAI | Provider::OpenRouter => {
                let client = openai::OpenAIClient::new(
                    self.http_client.clone(),
                    plan,
                    &self.providers,
                );
                client.chat_completion(model, input).await
            }
            Provider::Gemini => {
                let client = gemini::GeminiClient::new(self.http_client.clone(), plan);
                client.generate_content(model, input).await
            }
        }
    }
}
