use std::sync::Arc;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use hopper_agents::{Knowledge, Toolbox};
use hopper_core::{AppConfig, EventBus, Result};
use hopper_reasoning::{Collaborators, InMemoryHistoryStore, Orchestrator};

pub mod handlers;
pub mod routes;
pub mod state;

pub use state::AppState;

/// Wires every collaborator from configuration.
pub async fn build_state(config: AppConfig) -> Result<AppState> {
    let generator = hopper_reasoning::build_generator(&config)?;
    let embedder = hopper_extraction::build_embedder(&config);
    let graph = hopper_graph::build_graph_store(&config).await;
    let extractor = hopper_extraction::build_extractor(Some(generator.clone()));
    let retriever = hopper_graph::build_retriever(&config, graph.clone(), embedder.clone(), extractor);

    let knowledge = Knowledge {
        retriever: retriever.clone(),
        embedder: embedder.clone(),
        graph: graph.clone(),
    };
    let toolbox = Toolbox::from_config(&config, knowledge).await?;
    let agent = Arc::new(toolbox.agent(generator.clone(), &config));

    let orchestrator = Orchestrator::new(
        &config,
        Collaborators {
            generator: generator.clone(),
            embedder,
            retriever,
            agent,
            history: Arc::new(InMemoryHistoryStore::new(config.conversation.max_turns)),
            events: Arc::new(EventBus::new(config.server.event_queue)),
        },
    );

    Ok(AppState {
        config: Arc::new(config),
        orchestrator: Arc::new(orchestrator),
        graph,
        generator_name: generator.name().to_string(),
        outbox: toolbox.outbox,
    })
}

pub fn app(state: AppState) -> Router {
    routes::create_router()
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
