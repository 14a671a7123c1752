//! External research backend.
//!
//! The orchestrator never touches the store directly: it issues the calls on
//! `ResearchBackend` and re-fetches. `HttpBackend` talks to the REST API,
//! `MockBackend` replays scripted responses for tests and demos.

pub mod http;
pub mod mock;

pub use http::HttpBackend;
pub use mock::{BackendCall, MockBackend};

use crate::error::BackendError;
use crate::types::{Message, ReportBundle, SessionId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stored session as listed by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default)]
    pub has_error: bool,
}

/// Daily session allowance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionQuota {
    pub today_count: u32,
    pub max_sessions: u32,
    pub is_premium: bool,
}

impl SessionQuota {
    pub fn remaining(&self) -> u32 {
        self.max_sessions.saturating_sub(self.today_count)
    }
}

/// Result of submitting a topic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicResponse {
    /// Optional introduction shown before the first question.
    pub intro: Option<String>,
    pub questions: Vec<String>,
    /// Set when the backend skipped clarification and started the report.
    pub direct_report: Option<ReportBundle>,
    /// New session title chosen by the backend.
    pub title: Option<String>,
}

/// Everything the backend needs to record one clarification answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnswerSubmission {
    pub topic: String,
    pub questions: Vec<String>,
    /// All answers so far, including the one being submitted.
    pub answers: Vec<String>,
    /// Index of the question being answered.
    pub answer_index: usize,
}

impl AnswerSubmission {
    /// The answer being submitted.
    pub fn answer(&self) -> &str {
        self.answers.last().map(String::as_str).unwrap_or_default()
    }

    pub fn is_last(&self) -> bool {
        self.answer_index + 1 >= self.questions.len()
    }
}

/// Result of submitting one clarification answer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnswerResponse {
    pub acknowledgment: Option<String>,
    /// Set when this call started report generation.
    pub report: Option<ReportBundle>,
}

/// The polled read: authoritative log plus terminal flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportSnapshot {
    pub messages: Vec<Message>,
    pub is_completed: bool,
    pub has_error: bool,
}

/// Result of emailing a finished report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmailReceipt {
    pub success: bool,
    pub summary: Option<String>,
}

/// Calls the orchestrator makes against the persistent store and report producers.
#[async_trait]
pub trait ResearchBackend: Send + Sync {
    /// Create an empty session in the store.
    async fn create_session(&self, title: &str) -> Result<SessionSummary, BackendError>;

    /// List the caller's sessions, most recent first.
    async fn list_sessions(&self) -> Result<Vec<SessionSummary>, BackendError>;

    /// The caller's daily session allowance.
    async fn session_quota(&self) -> Result<SessionQuota, BackendError>;

    /// Submit a topic; returns clarifying questions or a direct report.
    async fn generate_questions(
        &self,
        session: &SessionId,
        topic: &str,
    ) -> Result<TopicResponse, BackendError>;

    /// Submit one clarification answer. Submitting the last answer starts
    /// report generation.
    async fn submit_answer(
        &self,
        session: &SessionId,
        submission: &AnswerSubmission,
    ) -> Result<AnswerResponse, BackendError>;

    /// Fetch the authoritative message log and the session's terminal flags.
    async fn poll_report(&self, session: &SessionId) -> Result<ReportSnapshot, BackendError>;

    /// Email the finished report to the account's address.
    async fn send_report_by_email(&self, session: &SessionId)
    -> Result<EmailReceipt, BackendError>;
}
