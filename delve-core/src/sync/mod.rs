//! Asynchronous result synchronization.
//!
//! - **merger** - the client's message log: authoritative fetch + echoes + placeholders
//! - **synchronizer** - producer arrival detection and terminal-flag verdicts
//! - **poller** - the owned poll timer

pub mod merger;
pub mod poller;
pub mod synchronizer;

pub use merger::{MessageLog, Placeholder};
pub use poller::PollHandle;
pub use synchronizer::{PlaceholderChange, PollVerdict, ResultSynchronizer};
