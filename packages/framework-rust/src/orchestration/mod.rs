//! Service resolution through the orchestrator collaborator.

pub mod gateway;
pub mod resolver;

pub use gateway::{HttpOrchestratorGateway, OrchestratorGateway};
pub use resolver::{OrchestrationResolver, OrchestrationResult, ResolveOptions};
