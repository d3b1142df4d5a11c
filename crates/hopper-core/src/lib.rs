pub mod agent;
pub mod api_types;
pub mod config;
pub mod conversation;
pub mod decision;
pub mod embedding;
pub mod entity;
pub mod error;
pub mod events;
pub mod extraction;
pub mod generation;
pub mod graph;
pub mod response;
pub mod retrieval;
pub mod tool;

pub use agent::{
    ActionAgent, AgentOutcome, AgentRun, AgentState, AgentStep, Observation, ToolCall,
    ToolInvocation, ToolOutcome,
};
pub use config::AppConfig;
pub use conversation::{ConversationTurn, HistoryStore, Request, Speaker};
pub use decision::{Decision, DecisionTag, LatencyClass, RouterStats};
pub use embedding::Embedder;
pub use entity::{Document, Entity, EntityType, Relation, RelationType};
pub use error::{HopperError, Result};
pub use events::{EventBus, PipelineStage, ProgressEvent};
pub use extraction::{EntityExtractor, ExtractedEntity, ExtractedRelation, Extraction};
pub use generation::{GenerationRequest, TextGenerator};
pub use graph::{
    GraphPath, GraphStore, Neighborhood, PathNode, ReachedDocument, ReachedEntity, ScoredDocument,
};
pub use response::{Expansion, QueryType, Response, SourceRef};
pub use retrieval::{
    Ingestion, RetrievalQuery, RetrievalStrategy, RetrievedItem, Retrieval, Retriever,
    SupportKind,
};
pub use tool::{ArgType, Tool, ToolArguments, ToolContext, ToolParam, ToolSchema};
