//! Backend selection — builds the completion backend named by config.

use std::sync::Arc;

use banter_config::AppConfig;
use banter_core::provider::CompletionBackend;
use tracing::debug;

use crate::openai_compat::OpenAiCompatProvider;

/// Providers that run on the local machine and need no API key.
const LOCAL_PROVIDERS: &[&str] = &["ollama", "vllm", "llamacpp", "llama.cpp"];

/// Build the default provider from configuration.
///
/// Per-provider settings under `[providers.<name>]` override the top-level
/// API key; a missing `api_url` falls back to the provider's well-known URL.
pub fn build_from_config(config: &AppConfig) -> Arc<dyn CompletionBackend> {
    let name = config.default_provider.as_str();
    let provider_config = config.providers.get(name);

    let api_key = provider_config
        .and_then(|p| p.api_key.clone())
        .or_else(|| config.api_key.clone())
        .unwrap_or_default();

    let base_url = provider_config
        .and_then(|p| p.api_url.clone())
        .unwrap_or_else(|| default_base_url(name));

    debug!(provider = name, base_url = %base_url, "Building completion backend");

    Arc::new(
        OpenAiCompatProvider::new(name, base_url, api_key)
            .with_framing(config.context.frame_entries),
    )
}

/// Whether `provider_name` refuses requests without an API key.
pub fn requires_api_key(provider_name: &str) -> bool {
    !LOCAL_PROVIDERS.contains(&provider_name)
}

/// Get the default base URL for well-known providers.
pub fn default_base_url(provider_name: &str) -> String {
    match provider_name {
        "openrouter" => "https://openrouter.ai/api/v1".into(),
        "openai" => "https://api.openai.com/v1".into(),
        "ollama" => "http://localhost:11434/v1".into(),
        "deepseek" => "https://api.deepseek.com/v1".into(),
        "groq" => "https://api.groq.com/openai/v1".into(),
        "together" => "https://api.together.xyz/v1".into(),
        "vllm" => "http://localhost:8000/v1".into(),
        "llamacpp" | "llama.cpp" => "http://localhost:8080/v1".into(),
        _ => format!("https://{provider_name}.api.example.com/v1"),
    }
}
