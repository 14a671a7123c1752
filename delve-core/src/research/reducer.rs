//! Pure transition function of the research state machine.
//!
//! `reduce` never performs I/O: the orchestrator turns backend responses into
//! `ResearchEvent`s and stores whatever session comes back.

use super::session::{ResearchBrief, ResearchState, Session};
use crate::error::ResearchError;

/// Reason recorded when the store reports that report generation failed.
pub const REPORT_FAILED_REASON: &str = "report generation failed";

/// Something that happened to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResearchEvent {
    /// Question generation returned a nonempty list of clarifying questions.
    QuestionsReceived {
        topic: String,
        questions: Vec<String>,
    },
    /// Question generation returned a report directly; clarification is skipped.
    ReportStartedDirectly { topic: String },
    /// The backend accepted the answer to the current question.
    AnswerAccepted {
        answer: String,
        /// The backend already started report generation with this call.
        report_started: bool,
    },
    /// A mutating backend call failed.
    CallFailed { reason: String },
    /// A poll cycle read the store's terminal flags.
    PollObserved { is_completed: bool, has_error: bool },
}

impl ResearchEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ResearchEvent::QuestionsReceived { .. } => "questions received",
            ResearchEvent::ReportStartedDirectly { .. } => "direct report",
            ResearchEvent::AnswerAccepted { .. } => "answer accepted",
            ResearchEvent::CallFailed { .. } => "call failed",
            ResearchEvent::PollObserved { .. } => "poll observed",
        }
    }
}

/// Apply `event` to `session`, returning the next session.
///
/// Events that make no sense in the current state are rejected with
/// `ResearchError::InvalidTransition` and leave the input untouched.
pub fn reduce(session: &Session, event: ResearchEvent) -> Result<Session, ResearchError> {
    let invalid = |event: &ResearchEvent| ResearchError::InvalidTransition {
        from: session.status(),
        event: event.name().to_string(),
    };

    let next = match (&session.state, event) {
        (ResearchState::NotStarted, ResearchEvent::QuestionsReceived { topic, questions }) => {
            if questions.is_empty() {
                return Err(ResearchError::InvalidTransition {
                    from: session.status(),
                    event: "questions received (empty)".to_string(),
                });
            }
            ResearchState::AwaitingClarification(ResearchBrief::new(topic, questions))
        }

        (ResearchState::NotStarted, ResearchEvent::ReportStartedDirectly { topic }) => {
            ResearchState::AwaitingReport(ResearchBrief::new(topic, Vec::new()))
        }

        (
            ResearchState::AwaitingClarification(brief),
            ResearchEvent::AnswerAccepted {
                answer,
                report_started,
            },
        ) => {
            let mut brief = brief.clone();
            brief.answers.push(answer);
            if report_started || brief.answers.len() >= brief.questions.len() {
                ResearchState::AwaitingReport(brief)
            } else {
                ResearchState::AwaitingClarification(brief)
            }
        }

        (
            state @ (ResearchState::NotStarted
            | ResearchState::AwaitingClarification(_)
            | ResearchState::AwaitingReport(_)),
            ResearchEvent::CallFailed { reason },
        ) => ResearchState::Errored {
            brief: state.brief().cloned(),
            reason,
        },

        (
            ResearchState::AwaitingReport(brief),
            ResearchEvent::PollObserved {
                is_completed,
                has_error,
            },
        ) => {
            if has_error {
                ResearchState::Errored {
                    brief: Some(brief.clone()),
                    reason: REPORT_FAILED_REASON.to_string(),
                }
            } else if is_completed {
                ResearchState::Completed(brief.clone())
            } else {
                return Ok(session.clone());
            }
        }

        (_, event) => return Err(invalid(&event)),
    };

    Ok(session.with_state(next))
}
