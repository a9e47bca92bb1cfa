// Gemini API client (generativelanguage generateContent with an API key)

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::router::ModelPlan;
use super::schema_cleaner::clean_json_schema_for_gemini;
use super::translator::{self, Completion};
use super::{CompletionInput, Provider, ProxyError};

const GEMINI_API_VERSION: &str = "v1beta";

#[derive(Debug, Serialize, Deserialize)]
pub struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GeminiPart {
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiGenerateRequest {
    pub contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GeminiGenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<Value>,
}

pub struct GeminiClient<'a> {
    http_client: reqwest::Client,
    plan: &'a ModelPlan,
}

impl<'a> GeminiClient<'a> {
    pub fn new(http_client: reqwest::Client, plan: &'a ModelPlan) -> Self {
        Self { http_client, plan }
    }

    pub async fn generate_content(
        &self,
        model: &str,
        input: &CompletionInput<'_>,
    ) -> Result<Completion, ProxyError> {
        let url = format!(
            "{}/{}/models/{}:generateContent",
            self.plan.base_url, GEMINI_API_VERSION, model
        );
        let payload = build_request(input);

        let response = self
            .http_client
            .post(&url)
            .header("x-goog-api-key", &self.plan.api_key)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| ProxyError::from_reqwest(Provider::Gemini, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProxyError::from_reqwest(Provider::Gemini, e))?;

        if !status.is_success() {
            tracing::warn!("Gemini generateContent failed: {}", status);
            return Err(ProxyError::Upstream {
                provider: Provider::Gemini,
                status: status.as_u16(),
                body: translator::truncate_body(&body),
            });
        }

        let body: Value = serde_json::from_str(&body).map_err(|e| ProxyError::MalformedResponse {
            provider: Provider::Gemini,
            reason: format!("invalid JSON: {}", e),
        })?;

        translator::gemini_to_completion(&body, model)
    }
}

pub fn build_request(input: &CompletionInput<'_>) -> GeminiGenerateRequest {
    let (response_mime_type, response_schema) = match input.schema {
        Some(spec) => (
            Some("application/json".to_string()),
            Some(clean_json_schema_for_gemini(&spec.schema)),
        ),
        None => (None, None),
    };

    GeminiGenerateRequest {
        contents: vec![GeminiContent {
            role: Some("user".to_string()),
            parts: vec![GeminiPart {
                text: input.user_prompt.to_string(),
            }],
        }],
        system_instruction: Some(GeminiContent {
            role: None,
            parts: vec![GeminiPart {
                text: input.system_prompt.to_string(),
            }],
        }),
        generation_config: Some(GeminiGenerationConfig {
            temperature: Some(input.temperature),
            max_output_tokens: Some(input.max_tokens),
            response_mime_type,
            response_schema,
        }),
    }
}
