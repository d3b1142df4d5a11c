use std::sync::Arc;

use hopper_agents::Outbox;
use hopper_core::{AppConfig, GraphStore};
use hopper_reasoning::Orchestrator;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub orchestrator: Arc<Orchestrator>,
    pub graph: Arc<dyn GraphStore>,
    pub generator_name: String,
    pub outbox: Arc<Outbox>,
}
