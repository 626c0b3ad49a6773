pub mod generator;
pub mod orchestrator;
pub mod task;
pub mod worker;

// Re-export common types
pub use generator::{discover_slot_options, generate_tasks};
pub use orchestrator::Orchestrator;
pub use task::{Outcome, RunReport, RunSettings, Stage};
pub use worker::WorkerContext;
