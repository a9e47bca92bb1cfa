// OpenAI-compatible chat completions client (OpenAI and OpenRouter)

use serde_json::{json, Value};

use super::router::ModelPlan;
use super::translator::{self, Completion};
use super::{CompletionInput, Provider, ProxyError};
use crate::config::ProvidersConfig;

pub struct OpenAIClient<'a> {
    http_client: reqwest::Client,
    plan: &'a ModelPlan,
    site_url: Option<&'a str>,
    app_name: Option<&'a str>,
}

impl<'a> OpenAIClient<'a> {
    pub fn new(http_client: reqwest::Client, plan: &'a ModelPlan, providers: &'a ProvidersConfig) -> Self {
        Self {
            http_client,
            plan,
            site_url: providers.openrouter_site_url.as_deref(),
            app_name: providers.openrouter_app_name.as_deref(),
        }
    }

    pub async fn chat_completion(
        &self,
        model: &str,
        input: &CompletionInput<'_>,
    ) -> Result<Completion, ProxyError> {
        let provider = self.plan.provider;
        let url = format!("{}/chat/completions", self.plan.base_url);
        let payload = build_payload(model, input);

        let mut req = self
            .http_client
            .post(&url)
            .bearer_auth(&self.plan.api_key)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .json(&payload);

        if provider == Provider::OpenRouter {
            if let Some(site_url) = self.site_url {
                req = req.header("HTTP-Referer", site_url);
            }
            if let Some(app_name) = self.app_name {
                req = req.header("X-Title", app_name);
            }
        }

        let response = req
            .send()
            .await
            .map_err(|e| ProxyError::from_reqwest(provider, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProxyError::from_reqwest(provider, e))?;

        if !status.is_success() {
            tracing::warn!("{} chat completion failed: {}", provider, status);
            return Err(ProxyError::Upstream {
                provider,
                status: status.as_u16(),
                body: translator::truncate_body(&body),
            });
        }

        let body: Value = serde_json::from_str(&body).map_err(|e| ProxyError::MalformedResponse {
            provider,
            reason: format!("invalid JSON: {}", e),
        })?;

        translator::openai_to_completion(provider, &body, model)
    }
}

pub fn build_payload(model: &str, input: &CompletionInput<'_>) -> Value {
    let mut payload = json!({
        "model": model,
        "messages": [
            { "role": "system", "content": input.system_prompt },
            { "role": "user", "content": input.user_prompt }
        ],
        "max_tokens": input.max_tokens,
        "temperature": input.temperature,
    });

    if let Some(spec) = input.schema {
        payload["response_format"] = json!({
            "type": "json_schema",
            "json_schema": {
                "name": spec.name,
                "strict": true,
                "schema": spec.schema
            }
        });
    }

    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::schema::schema_for;
    use crate::proxy::GenerationKind;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn input<'a>(schema: Option<&'a crate::proxy::schema::SchemaSpec>) -> CompletionInput<'a> {
        CompletionInput {
            system_prompt: "sys",
            user_prompt: "usr",
            max_tokens: 100,
            temperature: 0.5,
            schema,
        }
    }

    #[test]
    fn test_payload_without_schema() {
        let payload = build_payload("gpt-4.1-nano", &input(None));
        assert_eq!(payload["model"], "gpt-4.1-nano");
        assert_eq!(payload["messages"][0]["role"], "system");
        assert_eq!(payload["messages"][1]["content"], "usr");
        assert_eq!(payload["max_tokens"], 100);
        assert!(payload.get("response_format").is_none());
    }

    #[test]
    fn test_payload_with_schema() {
        let spec = schema_for(GenerationKind::Vfx);
        let payload = build_payload("gpt-4.1-nano", &input(Some(&spec)));
        let format = &payload["response_format"];
        assert_eq!(format["type"], "json_schema");
        assert_eq!(format["json_schema"]["name"], "vfx_effect");
        assert_eq!(format["json_schema"]["strict"], true);
        assert_eq!(format["json_schema"]["schema"]["type"], "object");
    }

    #[tokio::test]
    async fn test_openrouter_headers_and_error_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/chat/completions"))
            .and(header("HTTP-Referer", "https://example.com"))
            .and(header("X-Title", "Studio"))
            .respond_with(ResponseTemplate::new(402).set_body_string("no credits"))
            .expect(1)
            .mount(&server)
            .await;

        let plan = ModelPlan {
            provider: Provider::OpenRouter,
            base_url: format!("{}/api/v1", server.uri()),
            api_key: "or-key".to_string(),
            primary: "openai/gpt-4.1-nano".to_string(),
            fallback: None,
        };
        let providers = ProvidersConfig {
            openrouter_site_url: Some("https://example.com".to_string()),
            openrouter_app_name: Some("Studio".to_string()),
            ..Default::default()
        };

        let client = OpenAIClient::new(reqwest::Client::new(), &plan, &providers);
        let err = client
            .chat_completion("openai/gpt-4.1-nano", &input(None))
            .await
            .unwrap_err();

        match err {
            ProxyError::Upstream { provider, status, body } => {
                assert_eq!(provider, Provider::OpenRouter);
                assert_eq!(status, 402);
                assert_eq!(body, "no credits");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }
}
