//! Pipeline execution engine

pub mod engine;
pub mod executor;
pub mod scheduler;

pub use engine::{EventHandler, ExecutionEngine, ExecutionEvent, RunReport};
pub use executor::{ExecutionResult, StageExecutor};
pub use scheduler::ExecutionScheduler;
