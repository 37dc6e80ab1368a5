//! Acquisition orchestration state machine.
//!
//! The orchestrator is split by concern: `commands` for caller-driven
//! transitions, `handlers` for sensor events and the reconstruction path,
//! `queries` for read-only access and observer registration.

mod acquisition;
mod builder;
mod commands;
mod handlers;
mod queries;
mod run;

#[cfg(test)]
mod tests;

pub use acquisition::AcquisitionOrchestrator;
pub use builder::OrchestratorBuilder;
