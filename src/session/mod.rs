//! Optimization sessions: state, control loop, report and export

pub mod export;
pub mod orchestrator;
pub mod report;
pub mod state;

pub use export::{export_session, Artifact, ExportManifest};
pub use orchestrator::OptimizationOrchestrator;
pub use report::render_report;
pub use state::{
    AbortReason, CancellationToken, ConvergenceReason, Direction, OptimizationSession,
    OptimizationTrial, SessionStatus,
};
