//! Error types for the Delve core library.
//!
//! Uses `thiserror` for public API error types with structured variants covering
//! the research state machine, the backend collaborators, and configuration.

use crate::types::SessionStatus;

/// Top-level error type for the Delve core library.
#[derive(Debug, thiserror::Error)]
pub enum DelveError {
    #[error("Research error: {0}")]
    Research(#[from] ResearchError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors surfaced by the research orchestrator to its callers.
#[derive(Debug, thiserror::Error)]
pub enum ResearchError {
    #[error("Invalid input: {reason}")]
    Validation { reason: String },

    #[error("Another request for this session is still in flight")]
    Busy,

    #[error("Session is {status} and accepts no further submissions")]
    SessionClosed { status: SessionStatus },

    #[error("Submission not accepted while the session is {status}")]
    UnexpectedSubmission { status: SessionStatus },

    #[error("No active session")]
    NoActiveSession,

    #[error("The active session changed before the result arrived; result discarded")]
    SessionChanged,

    #[error("The report is not finished yet (session is {status})")]
    ReportNotReady { status: SessionStatus },

    #[error("Request failed: {message}")]
    Transport { message: String },

    #[error("Authentication required")]
    AuthenticationRequired,

    #[error("Invalid state transition: {event} while {from}")]
    InvalidTransition { from: SessionStatus, event: String },
}

impl ResearchError {
    /// Whether the surrounding system must force re-authentication.
    pub fn requires_authentication(&self) -> bool {
        matches!(self, ResearchError::AuthenticationRequired)
    }
}

impl From<BackendError> for ResearchError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::AuthenticationRequired => ResearchError::AuthenticationRequired,
            other => ResearchError::Transport {
                message: other.to_string(),
            },
        }
    }
}

/// Errors from the external research backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Request failed: {message}")]
    Transport { message: String },

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Authentication required")]
    AuthenticationRequired,

    #[error("Session quota exceeded: {message}")]
    QuotaExceeded { message: String },

    #[error("Request rejected by the server: {message}")]
    Rejected { message: String },

    #[error("Unexpected response: {message}")]
    Protocol { message: String },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// A type alias for results using the top-level `DelveError`.
pub type Result<T> = std::result::Result<T, DelveError>;
