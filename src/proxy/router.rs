// Model router - resolves a provider to its endpoint, key and model chain

use serde::Serialize;

use super::{Provider, ProxyError};
use crate::config::ProvidersConfig;

/// Built-in defaults per provider.
/// Format: (provider, base_url, primary_model, fallback_model)
static PROVIDER_DEFAULTS: &[(Provider, &str, &str, &str)] = &[
    (
        Provider::OpenAI,
        "https://api.openai.com/v1",
        "gpt-4.1-nano",
        "gpt-4.1-mini",
    ),
    (
        Provider::Gemini,
        "https://generativelanguage.googleapis.com",
        "gemini-2.5-flash-lite",
        "gemini-2.5-flash",
    ),
    (
        Provider::OpenRouter,
        "https://openrouter.ai/api/v1",
        "openai/gpt-4.1-nano",
        "openai/gpt-4.1-mini",
    ),
];

#[derive(Debug, Clone)]
pub struct ModelPlan {
    pub provider: Provider,
    pub base_url: String,
    pub api_key: String,
    pub primary: String,
    /// Tried once when the primary model's output fails schema validation
    pub fallback: Option<String>,
}

impl ModelPlan {
    pub fn models(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.primary.as_str()).chain(self.fallback.as_deref())
    }
}

/// Public description of a provider's routing, without secrets
#[derive(Debug, Clone, Serialize)]
pub struct ProviderModels {
    pub provider: Provider,
    pub configured: bool,
    pub model: String,
    pub fallback_model: Option<String>,
}

fn defaults_for(provider: Provider) -> (&'static str, &'static str, &'static str) {
    PROVIDER_DEFAULTS
        .iter()
        .find(|(p, ..)| *p == provider)
        .map(|(_, url, primary, fallback)| (*url, *primary, *fallback))
        .unwrap_or(("", "", ""))
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn resolve_models(provider: Provider, providers: &ProvidersConfig) -> (String, Option<String>) {
    let entry = providers.entry(provider);
    let (_, default_primary, default_fallback) = defaults_for(provider);

    let primary = non_empty(&entry.model).unwrap_or(default_primary).to_string();
    // An explicitly empty fallback disables the retry
    let fallback = match entry.fallback_model.as_deref() {
        Some(model) => Some(model.trim()).filter(|m| !m.is_empty()).map(str::to_string),
        None => Some(default_fallback.to_string()),
    }
    .filter(|model| *model != primary);

    (primary, fallback)
}

/// Resolve the model chain for a provider; fails if it has no API key
pub fn plan(provider: Provider, providers: &ProvidersConfig) -> Result<ModelPlan, ProxyError> {
    let entry = providers.entry(provider);
    let api_key = non_empty(&entry.api_key)
        .ok_or(ProxyError::ProviderNotConfigured(provider))?
        .to_string();

    let (default_url, ..) = defaults_for(provider);
    let base_url = non_empty(&entry.base_url)
        .unwrap_or(default_url)
        .trim_end_matches('/')
        .to_string();
    let (primary, fallback) = resolve_models(provider, providers);

    Ok(ModelPlan {
        provider,
        base_url,
        api_key,
        primary,
        fallback,
    })
}

pub fn describe_all(providers: &ProvidersConfig) -> Vec<ProviderModels> {
    Provider::ALL
        .iter()
        .map(|&provider| {
            let (model, fallback_model) = resolve_models(provider, providers);
            ProviderModels {
                provider,
                configured: non_empty(&providers.entry(provider).api_key).is_some(),
                model,
                fallback_model,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderEntry;

    fn with_openai(entry: ProviderEntry) -> ProvidersConfig {
        ProvidersConfig {
            openai: entry,
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_nano_then_mini() {
        let providers = with_openai(ProviderEntry {
            api_key: Some("sk".to_string()),
            ..Default::default()
        });
        let plan = plan(Provider::OpenAI, &providers).unwrap();
        assert_eq!(plan.base_url, "https://api.openai.com/v1");
        assert_eq!(
            plan.models().collect::<Vec<_>>(),
            vec!["gpt-4.1-nano", "gpt-4.1-mini"]
        );
    }

    #[test]
    fn test_missing_or_blank_key_is_not_configured() {
        assert!(matches!(
            plan(Provider::Gemini, &ProvidersConfig::default()),
            Err(ProxyError::ProviderNotConfigured(Provider::Gemini))
        ));

        let providers = with_openai(ProviderEntry {
            api_key: Some("  ".to_string()),
            ..Default::default()
        });
        assert!(plan(Provider::OpenAI, &providers).is_err());
    }

    #[test]
    fn test_overrides_and_disabled_fallback() {
        let providers = with_openai(ProviderEntry {
            api_key: Some("sk".to_string()),
            base_url: Some("http://localhost:9999/v1/".to_string()),
            model: Some("gpt-4o-mini".to_string()),
            fallback_model: Some(String::new()),
        });
        let plan = plan(Provider::OpenAI, &providers).unwrap();
        assert_eq!(plan.base_url, "http://localhost:9999/v1");
        assert_eq!(plan.models().collect::<Vec<_>>(), vec!["gpt-4o-mini"]);
    }

    #[test]
    fn test_fallback_equal_to_primary_is_dropped() {
        let providers = with_openai(ProviderEntry {
            api_key: Some("sk".to_string()),
            model: Some("gpt-4.1-mini".to_string()),
            ..Default::default()
        });
        assert!(plan(Provider::OpenAI, &providers).unwrap().fallback.is_none());
    }

    #[test]
    fn test_describe_all_hides_keys() {
        let providers = with_openai(ProviderEntry {
            api_key: Some("sk".to_string()),
            ..Default::default()
        });
        let described = describe_all(&providers);
        assert_eq!(described.len(), 3);
        assert!(described[0].configured);
        assert!(!described[1].configured);
        assert_eq!(described[2].model, "openai/gpt-4.1-nano");
    }
}
