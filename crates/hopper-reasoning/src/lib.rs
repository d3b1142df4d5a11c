pub mod expander;
pub mod history;
pub mod llm;
pub mod orchestrator;
pub mod router;

pub use expander::QueryExpander;
pub use history::InMemoryHistoryStore;
pub use llm::{build_generator, AnthropicGenerator, LlamaCppGenerator};
pub use orchestrator::{Collaborators, Orchestrator, OrchestratorSettings};
pub use router::DecisionRouter;
