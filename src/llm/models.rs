//! Centralized model definitions
//!
//! Every model the tutor can route to is listed here. All of them speak the
//! `OpenAI` chat completions protocol, either directly or through an
//! OpenAI-compatible gateway.

use super::{LlmService, OpenAIService};
use std::sync::Arc;

/// Model definition with metadata
#[derive(Debug, Clone)]
pub struct ModelDef {
    /// Model ID used in block configuration (e.g., "gpt-4o")
    pub id: &'static str,
    /// API name sent to the provider
    pub api_name: &'static str,
    /// Context window size in tokens
    pub context_window: usize,
    /// Factory function to create the service from an API key and optional base URL
    pub factory: fn(&ModelDef, &str, Option<&str>) -> Result<Arc<dyn LlmService>, String>,
}

fn openai_factory(
    def: &ModelDef,
    api_key: &str,
    base_url: Option<&str>,
) -> Result<Arc<dyn LlmService>, String> {
    if api_key.is_empty() {
        return Err(format!("{} requires OPENAI_API_KEY or a gateway", def.id));
    }
    let service = OpenAIService::new(
        api_key.to_string(),
        def.id,
        def.api_name,
        def.context_window,
        base_url,
    )?;
    Ok(Arc::new(service))
}

/// Get all available model definitions
pub fn all_models() -> &'static [ModelDef] {
    &[
        ModelDef {
            id: "gpt-4o",
            api_name: "gpt-4o",
            context_window: 128_000,
            factory: openai_factory,
        },
        ModelDef {
            id: "gpt-4o-mini",
            api_name: "gpt-4o-mini",
            context_window: 128_000,
            factory: openai_factory,
        },
        ModelDef {
            id: "gpt-4.1",
            api_name: "gpt-4.1",
            context_window: 1_047_576,
            factory: openai_factory,
        },
        ModelDef {
            id: "gpt-4.1-mini",
            api_name: "gpt-4.1-mini",
            context_window: 1_047_576,
            factory: openai_factory,
        },
    ]
}
