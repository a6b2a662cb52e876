mod orchestrator;
mod pipeline;
mod runtime;
mod shutdown;
mod startup;
mod state;
mod types;

#[cfg(test)]
mod tests;

pub use orchestrator::{OfficecamOrchestrator, OfficecamOrchestratorBuilder, ShutdownTrigger};
pub use types::{PipelineState, ShutdownReason};
