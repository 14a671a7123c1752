//! # Delve Core
//!
//! Core library for Delve, a research session orchestrator.
//! Provides the research state machine, the result synchronizer that polls for
//! asynchronously produced reports, the message log merger, the backend
//! interface (HTTP and scripted mock), configuration, and fundamental types.

pub mod backend;
pub mod config;
pub mod error;
pub mod producer;
pub mod research;
pub mod sync;
pub mod types;

// Re-export commonly used types at the crate root.
pub use backend::{HttpBackend, MockBackend, ResearchBackend, SessionQuota, SessionSummary};
pub use config::{DelveConfig, ResearchConfig, load_config};
pub use error::{BackendError, DelveError, ResearchError, Result};
pub use research::{
    PollOutcome, RecordingObserver, ResearchOrchestrator, ResearchState, Session, SessionObserver,
};
pub use types::{Message, MessageOrigin, ReportBundle, SessionId, SessionStatus};
