//! Scripted in-memory backend.
//!
//! Responses are queued per call type and consumed in order; every call is
//! recorded so tests can assert on what the orchestrator asked for.

use super::{
    AnswerResponse, AnswerSubmission, EmailReceipt, ReportSnapshot, ResearchBackend,
    SessionQuota, SessionSummary, TopicResponse,
};
use crate::error::BackendError;
use crate::types::{Message, ReportBundle, SessionId};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// A call received by the mock, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    CreateSession { title: String },
    ListSessions,
    SessionQuota,
    GenerateQuestions { session: SessionId, topic: String },
    SubmitAnswer { session: SessionId, submission: AnswerSubmission },
    PollReport { session: SessionId },
    SendReportByEmail { session: SessionId },
}

type Scripted<T> = Mutex<VecDeque<Result<T, BackendError>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory `ResearchBackend` driven by queued responses.
pub struct MockBackend {
    latency: Mutex<Duration>,
    next_session: AtomicUsize,
    sessions: Mutex<Vec<SessionSummary>>,
    quota: Mutex<SessionQuota>,
    topics: Scripted<TopicResponse>,
    answers: Scripted<AnswerResponse>,
    polls: Scripted<ReportSnapshot>,
    last_poll: Mutex<ReportSnapshot>,
    emails: Scripted<EmailReceipt>,
    calls: Mutex<Vec<BackendCall>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            latency: Mutex::new(Duration::ZERO),
            next_session: AtomicUsize::new(1),
            sessions: Mutex::new(Vec::new()),
            quota: Mutex::new(SessionQuota {
                today_count: 0,
                max_sessions: 5,
                is_premium: false,
            }),
            topics: Mutex::new(VecDeque::new()),
            answers: Mutex::new(VecDeque::new()),
            polls: Mutex::new(VecDeque::new()),
            last_poll: Mutex::new(ReportSnapshot::default()),
            emails: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Delay every call by `latency` (use with a paused tokio clock).
    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.latency) = latency;
    }

    pub fn queue_topic(&self, response: Result<TopicResponse, BackendError>) {
        lock(&self.topics).push_back(response);
    }

    pub fn queue_answer(&self, response: Result<AnswerResponse, BackendError>) {
        lock(&self.answers).push_back(response);
    }

    /// Queue a poll result. Once the queue is empty the last successful
    /// snapshot is repeated.
    pub fn queue_poll(&self, response: Result<ReportSnapshot, BackendError>) {
        lock(&self.polls).push_back(response);
    }

    pub fn queue_email(&self, response: Result<EmailReceipt, BackendError>) {
        lock(&self.emails).push_back(response);
    }

    pub fn set_quota(&self, quota: SessionQuota) {
        *lock(&self.quota) = quota;
    }

    /// Every call received so far.
    pub fn calls(&self) -> Vec<BackendCall> {
        lock(&self.calls).clone()
    }

    /// Number of `poll_report` calls received so far.
    pub fn poll_count(&self) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|c| matches!(c, BackendCall::PollReport { .. }))
            .count()
    }

    /// A topic response with clarifying questions.
    pub fn questions(intro: Option<&str>, questions: &[&str]) -> TopicResponse {
        TopicResponse {
            intro: intro.map(str::to_string),
            questions: questions.iter().map(|q| q.to_string()).collect(),
            direct_report: None,
            title: None,
        }
    }

    /// A topic response that skips clarification.
    pub fn direct_report(sections: &[&str]) -> TopicResponse {
        TopicResponse {
            direct_report: Some(ReportBundle::new(sections.iter().copied())),
            ..Default::default()
        }
    }

    /// An acknowledgment for a non-final answer.
    pub fn acknowledged(text: &str) -> AnswerResponse {
        AnswerResponse {
            acknowledgment: Some(text.to_string()),
            report: None,
        }
    }

    /// A poll snapshot from `(id, text, is_user)` triples.
    pub fn snapshot(
        messages: &[(&str, &str, bool)],
        is_completed: bool,
        has_error: bool,
    ) -> ReportSnapshot {
        ReportSnapshot {
            messages: messages
                .iter()
                .map(|(id, text, is_user)| Message::stored(*id, *text, *is_user))
                .collect(),
            is_completed,
            has_error,
        }
    }

    async fn record(&self, call: BackendCall) {
        lock(&self.calls).push(call);
        let latency = *lock(&self.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn unscripted(call: &str) -> BackendError {
        BackendError::Transport {
            message: format!("no scripted response for {call}"),
        }
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResearchBackend for MockBackend {
    async fn create_session(&self, title: &str) -> Result<SessionSummary, BackendError> {
        self.record(BackendCall::CreateSession {
            title: title.to_string(),
        })
        .await;
        let n = self.next_session.fetch_add(1, Ordering::SeqCst);
        let summary = SessionSummary {
            id: SessionId::new(format!("chat-{n}")),
            title: title.to_string(),
            created_at: Some(chrono::Utc::now()),
            is_completed: false,
            has_error: false,
        };
        lock(&self.sessions).insert(0, summary.clone());
        lock(&self.quota).today_count += 1;
        Ok(summary)
    }

    async fn list_sessions(&self) -> Result<Vec<SessionSummary>, BackendError> {
        self.record(BackendCall::ListSessions).await;
        Ok(lock(&self.sessions).clone())
    }

    async fn session_quota(&self) -> Result<SessionQuota, BackendError> {
        self.record(BackendCall::SessionQuota).await;
        Ok(*lock(&self.quota))
    }

    async fn generate_questions(
        &self,
        session: &SessionId,
        topic: &str,
    ) -> Result<TopicResponse, BackendError> {
        self.record(BackendCall::GenerateQuestions {
            session: session.clone(),
            topic: topic.to_string(),
        })
        .await;
        lock(&self.topics)
            .pop_front()
            .unwrap_or_else(|| Err(Self::unscripted("generate_questions")))
    }

    async fn submit_answer(
        &self,
        session: &SessionId,
        submission: &AnswerSubmission,
    ) -> Result<AnswerResponse, BackendError> {
        self.record(BackendCall::SubmitAnswer {
            session: session.clone(),
            submission: submission.clone(),
        })
        .await;
        lock(&self.answers)
            .pop_front()
            .unwrap_or_else(|| Ok(AnswerResponse::default()))
    }

    async fn poll_report(&self, session: &SessionId) -> Result<ReportSnapshot, BackendError> {
        self.record(BackendCall::PollReport {
            session: session.clone(),
        })
        .await;
        match lock(&self.polls).pop_front() {
            Some(Ok(snapshot)) => {
                *lock(&self.last_poll) = snapshot.clone();
                Ok(snapshot)
            }
            Some(Err(err)) => Err(err),
            None => Ok(lock(&self.last_poll).clone()),
        }
    }

    async fn send_report_by_email(
        &self,
        session: &SessionId,
    ) -> Result<EmailReceipt, BackendError> {
        self.record(BackendCall::SendReportByEmail {
            session: session.clone(),
        })
        .await;
        lock(&self.emails).pop_front().unwrap_or_else(|| {
            Ok(EmailReceipt {
                success: true,
                summary: None,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_topics_in_order() {
        let mock = MockBackend::new();
        mock.queue_topic(Ok(MockBackend::questions(None, &["q1"])));
        mock.queue_topic(Err(BackendError::AuthenticationRequired));

        let id = SessionId::from("chat-1");
        let first = mock.generate_questions(&id, "a").await.unwrap();
        assert_eq!(first.questions, vec!["q1".to_string()]);
        assert!(matches!(
            mock.generate_questions(&id, "b").await,
            Err(BackendError::AuthenticationRequired)
        ));
        assert!(matches!(
            mock.generate_questions(&id, "c").await,
            Err(BackendError::Transport { .. })
        ));
        assert_eq!(mock.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_poll_repeats_last_success() {
        let mock = MockBackend::new();
        let id = SessionId::from("chat-1");
        mock.queue_poll(Ok(MockBackend::snapshot(&[("1", "hi", true)], false, false)));
        mock.queue_poll(Err(BackendError::Transport {
            message: "reset".into(),
        }));

        assert_eq!(mock.poll_report(&id).await.unwrap().messages.len(), 1);
        assert!(mock.poll_report(&id).await.is_err());
        assert_eq!(mock.poll_report(&id).await.unwrap().messages.len(), 1);
        assert_eq!(mock.poll_count(), 3);
    }

    #[tokio::test]
    async fn test_create_session_counts_against_quota() {
        let mock = MockBackend::new();
        let first = mock.create_session("New Chat").await.unwrap();
        let second = mock.create_session("New Chat").await.unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(mock.session_quota().await.unwrap().today_count, 2);
        assert_eq!(mock.list_sessions().await.unwrap()[0].id, second.id);
    }
}
