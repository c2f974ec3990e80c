//! Orchestration layer for running provisioning phases in order.

/// Phase execution environment.
pub mod context;
/// Marker-driven sequencing engine.
pub mod engine;
/// Phase declarations.
pub mod model;
/// Phase action abstraction.
pub mod runner;
/// Run lifecycle state and persisted run record.
pub mod state;

pub use context::{PhaseContext, PhaseEnvironment};
pub use engine::{PhaseSequencer, PhaseStatus, Preparation, SequenceReport, StatusReport};
pub use model::Phase;
pub use runner::{FnAction, PhaseAction};
pub use state::{RunRecord, RunStatus};
