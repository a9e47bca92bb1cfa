// Vendor response normalization

use serde_json::Value;

use super::{Provider, ProxyError, Usage};

const MAX_ERROR_BODY_CHARS: usize = 2000;

/// Text reply of one vendor call
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: Usage,
    pub model: String,
}

pub fn truncate_body(body: &str) -> String {
    if body.chars().count() <= MAX_ERROR_BODY_CHARS {
        return body.to_string();
    }
    let mut truncated: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
    truncated.push_str("...");
    truncated
}

fn token_count(value: Option<&Value>) -> u64 {
    value.and_then(|v| v.as_u64()).unwrap_or(0)
}

/// Translate an OpenAI chat completion body
pub fn openai_to_completion(
    provider: Provider,
    body: &Value,
    requested_model: &str,
) -> Result<Completion, ProxyError> {
    let malformed = |reason: String| ProxyError::MalformedResponse { provider, reason };

    let message = body
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or_else(|| malformed("no choices in response".to_string()))?;

    if let Some(refusal) = message.get("refusal").and_then(|r| r.as_str()) {
        return Err(malformed(format!("model refused: {}", refusal)));
    }

    let text = message
        .get("content")
        .and_then(|c| c.as_str())
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| malformed("empty message content".to_string()))?;

    let usage = body.get("usage");
    let prompt_tokens = token_count(usage.and_then(|u| u.get("prompt_tokens")));
    let completion_tokens = token_count(usage.and_then(|u| u.get("completion_tokens")));
    let total_tokens = usage
        .and_then(|u| u.get("total_tokens"))
        .and_then(|v| v.as_u64())
        .unwrap_or(prompt_tokens + completion_tokens);

    let model = body
        .get("model")
        .and_then(|m| m.as_str())
        .unwrap_or(requested_model)
        .to_string();

    Ok(Completion {
        text: text.to_string(),
        usage: Usage {
            prompt_tokens,
            completion_tokens,
            total_tokens,
        },
        model,
    })
}

/// Translate a Gemini generateContent body
pub fn gemini_to_completion(body: &Value, requested_model: &str) -> Result<Completion, ProxyError> {
    let malformed = |reason: String| ProxyError::MalformedResponse {
        provider: Provider::Gemini,
        reason,
    };

    let candidate = match body.get("candidates").and_then(|c| c.get(0)) {
        Some(candidate) => candidate,
        None => {
            let reason = body
                .get("promptFeedback")
                .and_then(|f| f.get("blockReason"))
                .and_then(|r| r.as_str())
                .map(|r| format!("prompt blocked: {}", r))
                .unwrap_or_else(|| "no candidates in response".to_string());
            return Err(malformed(reason));
        }
    };

    let text: String = candidate
        .get("content")
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.as_array())
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect()
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        let finish_reason = candidate
            .get("finishReason")
            .and_then(|r| r.as_str())
            .unwrap_or("UNKNOWN");
        return Err(malformed(format!("empty content (finishReason={})", finish_reason)));
    }

    let usage = body.get("usageMetadata");
    let prompt_tokens = token_count(usage.and_then(|u| u.get("promptTokenCount")));
    let completion_tokens = token_count(usage.and_then(|u| u.get("candidatesTokenCount")));
    let total_tokens = usage
        .and_then(|u| u.get("totalTokenCount"))
        .and_then(|v| v.as_u64())
        .unwrap_or(prompt_tokens + completion_tokens);

    let model = body
        .get("modelVersion")
        .and_then(|m| m.as_str())
        .unwrap_or(requested_model)
        .to_string();

    Ok(Completion {
        text,
        usage: Usage {
            prompt_tokens,
            completion_tokens,
            total_tokens,
        },
        model,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_openai_completion() {
        let body = json!({
            "model": "gpt-4.1-nano-2025-04-14",
            "choices": [{ "message": { "role": "assistant", "content": "hi" } }],
            "usage": { "prompt_tokens": 3, "completion_tokens": 1 }
        });
        let completion = openai_to_completion(Provider::OpenAI, &body, "gpt-4.1-nano").unwrap();
        assert_eq!(completion.text, "hi");
        assert_eq!(completion.model, "gpt-4.1-nano-2025-04-14");
        assert_eq!(completion.usage.total_tokens, 4);
    }

    #[test]
    fn test_openai_refusal_and_empty() {
        let refused = json!({
            "choices": [{ "message": { "content": null, "refusal": "cannot help" } }]
        });
        let err = openai_to_completion(Provider::OpenAI, &refused, "m").unwrap_err();
        assert!(err.to_string().contains("cannot help"));

        let empty = json!({ "choices": [] });
        assert!(openai_to_completion(Provider::OpenRouter, &empty, "m").is_err());
    }

    #[test]
    fn test_gemini_joins_parts() {
        let body = json!({
            "candidates": [{
                "content": { "parts": [{ "text": "{\"a\":" }, { "text": "1}" }] },
                "finishReason": "STOP"
            }],
            "usageMetadata": { "promptTokenCount": 7, "candidatesTokenCount": 2, "totalTokenCount": 9 },
            "modelVersion": "gemini-2.5-flash-lite"
        });
        let completion = gemini_to_completion(&body, "gemini").unwrap();
        assert_eq!(completion.text, "{\"a\":1}");
        assert_eq!(completion.usage.prompt_tokens, 7);
        assert_eq!(completion.usage.total_tokens, 9);
        assert_eq!(completion.model, "gemini-2.5-flash-lite");
    }

    #[test]
    fn test_gemini_blocked_prompt() {
        let body = json!({ "promptFeedback": { "blockReason": "SAFETY" } });
        let err = gemini_to_completion(&body, "gemini-2.5-flash").unwrap_err();
        assert!(err.to_string().contains("prompt blocked: SAFETY"));

        let body = json!({ "candidates": [{ "finishReason": "MAX_TOKENS" }] });
        let err = gemini_to_completion(&body, "gemini-2.5-flash").unwrap_err();
        assert!(err.to_string().contains("MAX_TOKENS"));
    }

    #[test]
    fn test_truncate_body() {
        assert_eq!(truncate_body("short"), "short");
        let long = "é".repeat(MAX_ERROR_BODY_CHARS + 10);
        let truncated = truncate_body(&long);
        assert!(truncated.ends_with("..."));
        assert_eq!(truncated.chars().count(), MAX_ERROR_BODY_CHARS + 3);
    }
}
