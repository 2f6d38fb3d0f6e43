//! Composes the configured concrete provider adapters (`loom_agent::{Anthropic,
//! OpenAi,Ollama}Provider`) behind one [`LlmProvider`] the rest of the
//! gateway talks to, dispatching by the `model` field on each request.
//!
//! Per §6's "Environment inputs" note, a provider absent from both the
//! config file and the environment isn't constructed at all — the router
//! then returns [`ProviderError::Unavailable`] the first time a request
//! names a model only that vendor could serve, rather than failing at
//! startup.

use async_trait::async_trait;
use tokio::sync::mpsc;

use loom_agent::provider::{ChatRequest, ChatResponse, LlmProvider, ModelInfo, ProviderError};
use loom_agent::stream::StreamEvent;
use loom_agent::{AnthropicProvider, OllamaProvider, OpenAiProvider};
use loom_core::config::GatewayConfig;

/// Routes a [`ChatRequest`] to whichever configured adapter advertises the
/// requested model, by prefix. See the Open Question in the design notes on
/// `stop_reason`: this dispatch never inspects response content, only the
/// request's `model` field, so it composes cleanly regardless of vendor.
pub struct ProviderRouter {
    anthropic: Option<AnthropicProvider>,
    openai: Option<OpenAiProvider>,
    compat: Vec<(String, OpenAiProvider)>,
    ollama: OllamaProvider,
}

/// Well-known OpenAI-compatible base URLs, resolved automatically when a
/// compat entry's `base_url` is left unset.
fn well_known_base_url(id: &str) -> Option<&'static str> {
    match id {
        "deepseek" => Some("https://api.deepseek.com"),
        "openrouter" => Some("https://openrouter.ai/api/v1"),
        _ => None,
    }
}

impl ProviderRouter {
    /// Build from config, falling back to the environment-variable slots
    /// named in §6 when the config file leaves a provider unset.
    pub fn from_config(config: &GatewayConfig) -> Self {
        let anthropic = config
            .providers
            .anthropic
            .as_ref()
            .map(|c| (c.api_key.clone(), Some(c.base_url.clone())))
            .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok().map(|k| (k, None)))
            .map(|(key, base)| AnthropicProvider::new(key, base));

        let openai = config
            .providers
            .openai
            .as_ref()
            .map(|c| (c.api_key.clone(), Some(c.base_url.clone())))
            .or_else(|| std::env::var("OPENAI_API_KEY").ok().map(|k| (k, None)))
            .map(|(key, base)| OpenAiProvider::new(key, base));

        let mut compat_entries = config.providers.openai_compat.clone();
        for (env_var, id) in [("DEEPSEEK_API_KEY", "deepseek"), ("OPENROUTER_API_KEY", "openrouter")] {
            if compat_entries.iter().any(|e| e.id == id) {
                continue;
            }
            if let Ok(key) = std::env::var(env_var) {
                compat_entries.push(loom_core::config::OpenAiCompatEntry {
                    id: id.to_string(),
                    api_key: key,
                    base_url: None,
                    chat_path: None,
                    model: None,
                });
            }
        }

        let compat = compat_entries
            .into_iter()
            .filter_map(|entry| {
                let base_url = entry
                    .base_url
                    .or_else(|| well_known_base_url(&entry.id).map(String::from))?;
                let chat_path = entry.chat_path.unwrap_or_else(|| "/v1/chat/completions".to_string());
                Some((entry.id.clone(), OpenAiProvider::with_path(entry.id, entry.api_key, base_url, chat_path)))
            })
            .collect();

        let ollama = OllamaProvider::new(config.providers.ollama.as_ref().map(|c| c.base_url.clone()));

        Self { anthropic, openai, compat, ollama }
    }

    fn pick(&self, model: &str) -> Result<&dyn LlmProvider, ProviderError> {
        if model.starts_with("claude") {
            return self
                .anthropic
                .as_ref()
                .map(|p| p as &dyn LlmProvider)
                .ok_or_else(|| ProviderError::Unavailable("anthropic provider not configured (set ANTHROPIC_API_KEY)".into()));
        }
        if model.starts_with("gpt") || model.starts_with("o1") || model.starts_with("o3") || model.starts_with("o4") {
            return self
                .openai
                .as_ref()
                .map(|p| p as &dyn LlmProvider)
                .ok_or_else(|| ProviderError::Unavailable("openai provider not configured (set OPENAI_API_KEY)".into()));
        }
        for (id, provider) in &self.compat {
            if model.starts_with(id.as_str()) {
                return Ok(provider as &dyn LlmProvider);
            }
        }
        Ok(&self.ollama)
    }
}

#[async_trait]
impl LlmProvider for ProviderRouter {
    fn id(&self) -> &str {
        "multi"
    }

    fn list_models(&self) -> Vec<ModelInfo> {
        let mut models = Vec::new();
        if let Some(p) = &self.anthropic {
            models.extend(p.list_models());
        }
        if let Some(p) = &self.openai {
            models.extend(p.list_models());
        }
        for (_, p) in &self.compat {
            models.extend(p.list_models());
        }
        models.extend(self.ollama.list_models());
        models
    }

    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        self.pick(&req.model)?.chat(req).await
    }

    async fn chat_stream(&self, req: &ChatRequest, tx: mpsc::Sender<StreamEvent>) -> Result<(), ProviderError> {
        self.pick(&req.model)?.chat_stream(req, tx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_still_falls_back_to_ollama() {
        let config = GatewayConfig::default();
        let router = ProviderRouter::from_config(&config);
        assert!(matches!(router.pick("llama3"), Ok(_)));
    }

    #[test]
    fn claude_model_without_anthropic_config_is_unavailable() {
        let config = GatewayConfig::default();
        let router = ProviderRouter::from_config(&config);
        assert!(matches!(router.pick("claude-sonnet-4-6"), Err(ProviderError::Unavailable(_))));
    }

    #[test]
    fn well_known_compat_ids_resolve_base_url() {
        assert_eq!(well_known_base_url("deepseek"), Some("https://api.deepseek.com"));
        assert_eq!(well_known_base_url("unknown"), None);
    }
}
