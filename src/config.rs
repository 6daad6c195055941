//! Service configuration from environment variables

use crate::llm::LlmConfig;
use crate::workflow::DEFAULT_MAX_FOLLOW_UPS;
use std::path::PathBuf;

const DEFAULT_PORT: u16 = 8000;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub port: u16,
    pub llm: LlmConfig,
    /// Raw `TUTOR_TEMPLATE_MAP` overrides, e.g. `12=examination,40=roleplay`
    pub template_map: Option<String>,
    pub max_follow_ups: u32,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build the configuration from a variable lookup
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let db_path = var("TUTOR_DB_PATH")
            .filter(|p| !p.is_empty())
            .map_or_else(
                || {
                    let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                    PathBuf::from(home).join(".tutor-engine").join("tutor.db")
                },
                PathBuf::from,
            );

        let port = var("TUTOR_PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let max_follow_ups = var("TUTOR_MAX_FOLLOW_UPS")
            .and_then(|n| n.parse().ok())
            .unwrap_or(DEFAULT_MAX_FOLLOW_UPS);

        Self {
            db_path,
            port,
            llm: LlmConfig::from_vars(&var),
            template_map: var("TUTOR_TEMPLATE_MAP").filter(|m| !m.trim().is_empty()),
            max_follow_ups,
        }
    }
}
