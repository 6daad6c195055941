//! HTTP API for the tutoring engine

mod handlers;
mod sse;
mod types;

pub use handlers::create_router;

use crate::db::Database;
use crate::llm::ModelRegistry;
use crate::runtime::{DatabaseStorage, ProductionRuntime, RegistryLlmClient, SessionRuntime};
use crate::workflow::WorkflowRegistry;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<ProductionRuntime>,
    pub db: Database,
    pub llm_registry: Arc<ModelRegistry>,
}

impl AppState {
    pub fn new(
        db: Database,
        llm_registry: Arc<ModelRegistry>,
        workflows: WorkflowRegistry,
        max_follow_ups: u32,
    ) -> Self {
        let runtime = SessionRuntime::new(
            DatabaseStorage::new(db.clone()),
            RegistryLlmClient::new(Arc::clone(&llm_registry)),
            workflows,
            llm_registry.default_model_id().to_string(),
        )
        .with_max_follow_ups(max_follow_ups);

        Self {
            runtime: Arc::new(runtime),
            db,
            llm_registry,
        }
    }
}
