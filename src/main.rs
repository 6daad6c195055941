//! Tutor Engine - workflow orchestration for LLM tutoring sessions
//!
//! An HTTP service that runs examination, gap-filling, role-play,
//! reflection and free-form tutoring conversations and grades them.

mod api;
mod config;
mod db;
mod llm;
mod runtime;
mod workflow;

use api::{create_router, AppState};
use config::AppConfig;
use db::Database;
use llm::ModelRegistry;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use workflow::WorkflowRegistry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tutor_engine=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = AppConfig::from_env();

    // Ensure database directory exists
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!(path = %config.db_path.display(), "Opening database");
    let db = Database::open(&config.db_path)?;

    let llm_registry = Arc::new(ModelRegistry::new(&config.llm));
    if llm_registry.has_models() {
        tracing::info!(
            models = ?llm_registry.available_models(),
            default = %llm_registry.default_model_id(),
            "LLM registry initialized"
        );
    } else {
        tracing::warn!("No LLM configured. Set OPENAI_API_KEY or OPENAI_BASE_URL.");
    }

    // Invalid template overrides stop startup
    let workflows = WorkflowRegistry::with_overrides(config.template_map.as_deref())?;
    for (template_id, kind) in workflows.templates() {
        tracing::debug!(template_id, workflow = %kind, "Template registered");
    }

    let state = AppState::new(db, llm_registry, workflows, config.max_follow_ups);

    let app = create_router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Tutor engine listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
