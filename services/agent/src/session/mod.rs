//! One tutoring session from room connection to report.

pub mod lifecycle;
pub mod monitor;
pub mod orchestrator;
pub mod report;

pub use lifecycle::{SessionState, TransitionError};
pub use monitor::SessionEventMonitor;
pub use orchestrator::{
    SessionDeps, SessionHandle, SessionOrchestrator, SessionOutcome, TerminationTrigger,
};
pub use report::ReportDispatcher;
