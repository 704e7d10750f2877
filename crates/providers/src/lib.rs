//! LLM provider implementations for DeepSearch.
//!
//! All providers implement the `deepsearch_core::Provider` trait. The
//! gateway builds exactly one from configuration and hands it to the agent
//! loop; there is no runtime model routing.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;

use std::sync::Arc;

use deepsearch_config::ProviderConfig;
use deepsearch_core::error::ProviderError;
use deepsearch_core::provider::Provider;

/// Build the configured model provider.
pub fn build_from_config(config: &ProviderConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    let api_key = config.api_key.clone().ok_or_else(|| {
        ProviderError::NotConfigured(format!(
            "no API key for provider '{}' (set provider.api_key or DEEPSEARCH_API_KEY)",
            config.name
        ))
    })?;
    let provider = OpenAiCompatProvider::new(&config.name, &config.api_url, api_key)?;
    Ok(Arc::new(provider))
}
