//! Model registry for managing available LLM services

use super::{all_models, LlmService, LoggingService, ModelDef};
use std::collections::HashMap;
use std::sync::Arc;

/// Model used when neither the block nor the environment names one
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Configuration for LLM providers
#[derive(Debug, Clone, Default)]
pub struct LlmConfig {
    pub openai_api_key: Option<String>,
    /// OpenAI-compatible gateway base URL (e.g., `http://localhost:4000/v1`)
    pub base_url: Option<String>,
    /// Default model ID
    pub default_model: Option<String>,
}

impl LlmConfig {
    /// Read provider settings through `var`, usually the process environment
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            openai_api_key: var("OPENAI_API_KEY").filter(|v| !v.is_empty()),
            base_url: var("OPENAI_BASE_URL").filter(|v| !v.is_empty()),
            default_model: var("DEFAULT_MODEL"),
        }
    }
}

/// Registry of available LLM models
pub struct ModelRegistry {
    services: HashMap<String, Arc<dyn LlmService>>,
    default_model: String,
}

impl ModelRegistry {
    pub fn new(config: &LlmConfig) -> Self {
        let mut services: HashMap<String, Arc<dyn LlmService>> = HashMap::new();

        for model_def in all_models() {
            if let Some(service) = Self::try_create_model(model_def, config) {
                services.insert(model_def.id.to_string(), service);
            }
        }

        let default_model = config
            .default_model
            .clone()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        if !services.is_empty() && !services.contains_key(&default_model) {
            tracing::warn!(model = %default_model, "Default model is not registered");
        }

        Self {
            services,
            default_model,
        }
    }

    /// Try to create a model service, validating prerequisites
    fn try_create_model(model_def: &ModelDef, config: &LlmConfig) -> Option<Arc<dyn LlmService>> {
        // A gateway handles authentication itself
        let api_key = match (&config.openai_api_key, &config.base_url) {
            (Some(key), _) if !key.is_empty() => key.clone(),
            (_, Some(_)) => "implicit".to_string(),
            _ => return None,
        };

        match (model_def.factory)(model_def, &api_key, config.base_url.as_deref()) {
            Ok(service) => Some(Arc::new(LoggingService::new(service))),
            Err(e) => {
                tracing::warn!(model = model_def.id, error = %e, "Failed to create model");
                None
            }
        }
    }

    /// Get a model by ID
    pub fn get(&self, model_id: &str) -> Option<Arc<dyn LlmService>> {
        self.services.get(model_id).cloned()
    }

    /// Get the default model
    pub fn default(&self) -> Option<Arc<dyn LlmService>> {
        self.get(&self.default_model)
    }

    /// Get the default model ID
    pub fn default_model_id(&self) -> &str {
        &self.default_model
    }

    /// List all available model IDs
    pub fn available_models(&self) -> Vec<String> {
        let mut models: Vec<_> = self.services.keys().cloned().collect();
        models.sort();
        models
    }

    /// Check if any models are available
    pub fn has_models(&self) -> bool {
        !self.services.is_empty()
    }
}
