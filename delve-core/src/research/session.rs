//! Research session state as an explicit tagged union.
//!
//! `Session` is only ever replaced wholesale by the reducer; the flat view
//! (status, topic, questions, answers, current question index) is derived.

use crate::types::{SessionId, SessionStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The topic, the clarifying questions and the answers collected so far.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchBrief {
    pub topic: String,
    pub questions: Vec<String>,
    pub answers: Vec<String>,
}

impl ResearchBrief {
    pub fn new(topic: impl Into<String>, questions: Vec<String>) -> Self {
        Self {
            topic: topic.into(),
            questions,
            answers: Vec::new(),
        }
    }

    /// The question the next answer responds to.
    pub fn current_question(&self) -> Option<&str> {
        self.questions.get(self.answers.len()).map(String::as_str)
    }
}

/// Where a research session is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResearchState {
    NotStarted,
    AwaitingClarification(ResearchBrief),
    AwaitingReport(ResearchBrief),
    Completed(ResearchBrief),
    Errored {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        brief: Option<ResearchBrief>,
        reason: String,
    },
}

impl ResearchState {
    pub fn status(&self) -> SessionStatus {
        match self {
            ResearchState::NotStarted => SessionStatus::NotStarted,
            ResearchState::AwaitingClarification(_) => SessionStatus::AwaitingClarification,
            ResearchState::AwaitingReport(_) => SessionStatus::AwaitingReport,
            ResearchState::Completed(_) => SessionStatus::Completed,
            ResearchState::Errored { .. } => SessionStatus::Errored,
        }
    }

    pub fn brief(&self) -> Option<&ResearchBrief> {
        match self {
            ResearchState::NotStarted => None,
            ResearchState::AwaitingClarification(brief)
            | ResearchState::AwaitingReport(brief)
            | ResearchState::Completed(brief) => Some(brief),
            ResearchState::Errored { brief, .. } => brief.as_ref(),
        }
    }
}

/// One research conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub state: ResearchState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// A fresh session that has not received a topic yet.
    pub fn new(id: SessionId) -> Self {
        let now = Utc::now();
        Self {
            id,
            state: ResearchState::NotStarted,
            created_at: now,
            updated_at: now,
        }
    }

    /// A session restored in a given state (e.g. when re-opening a stored chat).
    pub fn restored(id: SessionId, state: ResearchState) -> Self {
        let mut session = Self::new(id);
        session.state = state;
        session
    }

    /// Same session, new state.
    pub(crate) fn with_state(&self, state: ResearchState) -> Self {
        Self {
            id: self.id.clone(),
            state,
            created_at: self.created_at,
            updated_at: Utc::now(),
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.state.status()
    }

    pub fn topic(&self) -> Option<&str> {
        self.state.brief().map(|b| b.topic.as_str())
    }

    pub fn questions(&self) -> &[String] {
        self.state.brief().map(|b| b.questions.as_slice()).unwrap_or(&[])
    }

    pub fn answers(&self) -> &[String] {
        self.state.brief().map(|b| b.answers.as_slice()).unwrap_or(&[])
    }

    /// Index of the next question to answer; equals the number of answers given.
    pub fn current_question_index(&self) -> usize {
        self.answers().len()
    }

    pub fn current_question(&self) -> Option<&str> {
        match &self.state {
            ResearchState::AwaitingClarification(brief) => brief.current_question(),
            _ => None,
        }
    }

    pub fn is_waiting_for_answer(&self) -> bool {
        matches!(self.state, ResearchState::AwaitingClarification(_))
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn error_reason(&self) -> Option<&str> {
        match &self.state {
            ResearchState::Errored { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brief(answers: usize) -> ResearchBrief {
        ResearchBrief {
            topic: "climate policy".into(),
            questions: vec!["q1".into(), "q2".into(), "q3".into()],
            answers: (0..answers).map(|i| format!("a{i}")).collect(),
        }
    }

    #[test]
    fn test_new_session_is_not_started() {
        let session = Session::new("chat-1".into());
        assert_eq!(session.status(), SessionStatus::NotStarted);
        assert_eq!(session.topic(), None);
        assert_eq!(session.current_question_index(), 0);
        assert!(session.questions().is_empty());
    }

    #[test]
    fn test_flat_view_of_clarification() {
        let session = Session::restored(
            "chat-1".into(),
            ResearchState::AwaitingClarification(brief(1)),
        );
        assert_eq!(session.topic(), Some("climate policy"));
        assert_eq!(session.current_question_index(), 1);
        assert_eq!(session.current_question(), Some("q2"));
        assert!(session.is_waiting_for_answer());
    }

    #[test]
    fn test_errored_keeps_brief_and_reason() {
        let session = Session::restored(
            "chat-1".into(),
            ResearchState::Errored {
                brief: Some(brief(2)),
                reason: "timeout".into(),
            },
        );
        assert!(session.is_terminal());
        assert_eq!(session.answers().len(), 2);
        assert_eq!(session.error_reason(), Some("timeout"));
        assert_eq!(session.current_question(), None);
    }

    #[test]
    fn test_state_serializes_with_status_tag() {
        let value = serde_json::to_value(ResearchState::AwaitingReport(brief(3))).unwrap();
        assert_eq!(value["status"], "awaiting_report");
        assert_eq!(value["topic"], "climate policy");
    }
}
