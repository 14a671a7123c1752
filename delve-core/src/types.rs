//! Core type definitions for Delve.
//!
//! Defines the data exchanged between the orchestrator, the synchronizer and the
//! backend: session identifiers, session status, log messages and report bundles.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a research session (a "chat" in the store).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Flat status of a research session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    NotStarted,
    AwaitingClarification,
    AwaitingReport,
    Completed,
    Errored,
}

impl SessionStatus {
    /// Terminal states accept no further submissions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Errored)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::NotStarted => write!(f, "not started"),
            SessionStatus::AwaitingClarification => write!(f, "awaiting clarification"),
            SessionStatus::AwaitingReport => write!(f, "awaiting report"),
            SessionStatus::Completed => write!(f, "completed"),
            SessionStatus::Errored => write!(f, "errored"),
        }
    }
}

/// Where a message in the merged log came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageOrigin {
    /// Typed by the user.
    User,
    /// Produced by the backend (fetched, or echoed from a call response).
    SystemAuthoritative,
    /// Synthesized locally to stand in for a producer that has not reported yet.
    LocalPlaceholder,
}

/// A single entry of the conversation log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub text: String,
    pub is_user: bool,
    pub origin: MessageOrigin,
}

impl Message {
    /// A locally echoed user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: local_id("local"),
            text: text.into(),
            is_user: true,
            origin: MessageOrigin::User,
        }
    }

    /// A locally echoed backend message (question, acknowledgment, report section).
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            id: local_id("local"),
            text: text.into(),
            is_user: false,
            origin: MessageOrigin::SystemAuthoritative,
        }
    }

    /// A message as persisted in the store.
    pub fn stored(id: impl Into<String>, text: impl Into<String>, is_user: bool) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            is_user,
            origin: if is_user {
                MessageOrigin::User
            } else {
                MessageOrigin::SystemAuthoritative
            },
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.origin == MessageOrigin::LocalPlaceholder
    }
}

/// Generate an id for a locally synthesized message.
pub(crate) fn local_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}

/// Report sections returned directly by a backend call, each tagged by its
/// producer's leading marker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportBundle {
    pub sections: Vec<String>,
}

impl ReportBundle {
    pub fn new(sections: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            sections: sections.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sections.iter().all(|s| s.trim().is_empty())
    }
}
