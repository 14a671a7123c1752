//! Research session lifecycle.
//!
//! A session moves through a fixed set of states:
//! 1. **Not started**: waiting for a topic
//! 2. **Awaiting clarification**: one clarifying question answered at a time
//! 3. **Awaiting report**: producers are generating; the store is polled
//! 4. **Completed** or **Errored**: terminal, no further submissions
//!
//! `reducer` holds the pure transition function; `orchestrator` drives it
//! against a `ResearchBackend`.

pub mod orchestrator;
pub mod reducer;
pub mod session;

pub use orchestrator::{PollOutcome, RecordingObserver, ResearchOrchestrator, SessionObserver};
pub use reducer::{ResearchEvent, reduce};
pub use session::{ResearchBrief, ResearchState, Session};
