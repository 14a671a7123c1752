//! End-to-end research session flows against the scripted backend.
//!
//! All tests run on a paused tokio clock so the 2 s poll cadence is driven
//! deterministically by `tokio::time::sleep`.

use std::sync::Arc;
use std::time::Duration;

use delve_core::backend::{AnswerResponse, BackendCall, EmailReceipt, MockBackend};
use delve_core::config::{DEFAULT_TRANSPORT_ERROR_MESSAGE, ResearchConfig};
use delve_core::{
    BackendError, PollOutcome, RecordingObserver, ResearchError, ResearchOrchestrator,
    SessionId, SessionStatus,
};
use pretty_assertions::assert_eq;
use tokio_test::{assert_err, assert_ok};

const OPENAI: &str = "## ChatGPT (OpenAI) Research\n\nFindings on the topic.";
const GEMINI: &str = "## Gemini (Google) Research\n\nSummary and insights.";

fn setup() -> (Arc<MockBackend>, ResearchOrchestrator, Arc<RecordingObserver>) {
    let mock = Arc::new(MockBackend::new());
    let orchestrator = ResearchOrchestrator::new(mock.clone(), ResearchConfig::default());
    let observer = Arc::new(RecordingObserver::new());
    orchestrator.on_state_change(observer.clone());
    (mock, orchestrator, observer)
}

/// Sleep just past one poll period so the tick due at its end has run.
async fn tick() {
    tokio::time::sleep(Duration::from_millis(2100)).await;
}

/// Drive a session into AWAITING_REPORT by way of a direct report.
async fn awaiting_report(mock: &MockBackend, orchestrator: &ResearchOrchestrator) {
    mock.queue_topic(Ok(MockBackend::direct_report(&[])));
    let session = assert_ok!(orchestrator.submit_topic("solar storage").await);
    assert_eq!(session.status(), SessionStatus::AwaitingReport);
}

fn texts(orchestrator: &ResearchOrchestrator) -> Vec<String> {
    orchestrator
        .merged_log()
        .into_iter()
        .map(|m| m.text)
        .collect()
}

// --- Clarification ---

#[tokio::test(start_paused = true)]
async fn three_questions_walk_to_awaiting_report() {
    let (mock, orchestrator, _observer) = setup();
    mock.queue_topic(Ok(MockBackend::questions(None, &["Q1", "Q2", "Q3"])));
    mock.queue_answer(Ok(MockBackend::acknowledged("Thanks.")));

    let session = assert_ok!(orchestrator.submit_topic("energy markets").await);
    assert_eq!(session.current_question_index(), 0);
    assert_eq!(session.current_question(), Some("Q1"));

    let session = assert_ok!(orchestrator.submit_answer("Europe").await);
    assert_eq!(session.status(), SessionStatus::AwaitingClarification);
    assert_eq!(session.current_question_index(), 1);
    assert!(session.is_waiting_for_answer());
    assert_eq!(
        texts(&orchestrator).last().map(String::as_str),
        Some("**Question 2 of 3:**\n\nQ2")
    );

    assert_ok!(orchestrator.submit_answer("Since 2010").await);
    assert!(!orchestrator.is_polling());

    let session = assert_ok!(orchestrator.submit_answer("Policy focus").await);
    assert_eq!(session.status(), SessionStatus::AwaitingReport);
    assert_eq!(session.answers().len(), 3);
    assert!(orchestrator.is_polling());

    let last = mock
        .calls()
        .into_iter()
        .rev()
        .find_map(|c| match c {
            BackendCall::SubmitAnswer { submission, .. } => Some(submission),
            _ => None,
        })
        .unwrap();
    assert_eq!(last.topic, "energy markets");
    assert_eq!(last.answers, vec!["Europe", "Since 2010", "Policy focus"]);
    assert_eq!(last.answer_index, 2);
    assert!(last.is_last());
}

#[tokio::test(start_paused = true)]
async fn early_report_skips_remaining_questions() {
    let (mock, orchestrator, _observer) = setup();
    mock.queue_topic(Ok(MockBackend::questions(None, &["Q1", "Q2", "Q3"])));
    mock.queue_answer(Ok(AnswerResponse {
        acknowledgment: None,
        report: Some(delve_core::ReportBundle::new([OPENAI])),
    }));

    assert_ok!(orchestrator.submit_topic("topic").await);
    let session = assert_ok!(orchestrator.submit_answer("only answer").await);
    assert_eq!(session.status(), SessionStatus::AwaitingReport);
    assert_eq!(session.current_question_index(), 1);

    let log = orchestrator.merged_log();
    assert!(log.iter().any(|m| m.text == OPENAI));
    assert_eq!(log.iter().filter(|m| m.is_placeholder()).count(), 1);
}

#[tokio::test]
async fn blank_answer_is_rejected_before_any_call() {
    let (mock, orchestrator, _observer) = setup();
    mock.queue_topic(Ok(MockBackend::questions(None, &["Q1"])));
    assert_ok!(orchestrator.submit_topic("topic").await);
    let calls = mock.calls().len();

    let err = assert_err!(orchestrator.submit_answer("  \n").await);
    assert!(matches!(err, ResearchError::Validation { .. }));
    assert_eq!(mock.calls().len(), calls);
    assert_eq!(orchestrator.state().unwrap().current_question_index(), 0);
}

#[tokio::test]
async fn second_topic_is_rejected() {
    let (mock, orchestrator, _observer) = setup();
    mock.queue_topic(Ok(MockBackend::questions(None, &["Q1"])));
    assert_ok!(orchestrator.submit_topic("topic").await);

    let err = assert_err!(orchestrator.submit_topic("another topic").await);
    assert!(matches!(err, ResearchError::UnexpectedSubmission {
        status: SessionStatus::AwaitingClarification
    }));
}

// --- Report synchronization ---

#[tokio::test(start_paused = true)]
async fn placeholder_then_completion() {
    let (mock, orchestrator, observer) = setup();
    awaiting_report(&mock, &orchestrator).await;

    mock.queue_poll(Ok(MockBackend::snapshot(
        &[("1", "solar storage", true), ("2", OPENAI, false)],
        false,
        false,
    )));
    mock.queue_poll(Ok(MockBackend::snapshot(
        &[("1", "solar storage", true), ("2", OPENAI, false), ("3", GEMINI, false)],
        true,
        false,
    )));

    tick().await;
    let log = orchestrator.merged_log();
    assert_eq!(log.len(), 3);
    assert_eq!(log[1].text, OPENAI);
    assert!(log[2].is_placeholder());
    assert!(log[2].text.starts_with("## Gemini (Google) Research"));
    assert_eq!(orchestrator.state().unwrap().status(), SessionStatus::AwaitingReport);

    tick().await;
    let session = orchestrator.state().unwrap();
    assert_eq!(session.status(), SessionStatus::Completed);
    assert!(!orchestrator.is_polling());
    assert_eq!(texts(&orchestrator), vec![
        "solar storage".to_string(),
        OPENAI.to_string(),
        GEMINI.to_string(),
    ]);
    assert_eq!(observer.statuses().last(), Some(&SessionStatus::Completed));

    let polls = mock.poll_count();
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(mock.poll_count(), polls);
}

#[tokio::test(start_paused = true)]
async fn both_results_without_flag_keeps_waiting() {
    let (mock, orchestrator, _observer) = setup();
    awaiting_report(&mock, &orchestrator).await;
    mock.queue_poll(Ok(MockBackend::snapshot(
        &[("2", OPENAI, false), ("3", GEMINI, false)],
        false,
        false,
    )));

    tick().await;
    assert_eq!(orchestrator.state().unwrap().status(), SessionStatus::AwaitingReport);
    assert!(orchestrator.is_polling());
    assert!(orchestrator.merged_log().iter().all(|m| !m.is_placeholder()));
}

#[tokio::test(start_paused = true)]
async fn error_flag_fails_session() {
    let (mock, orchestrator, _observer) = setup();
    awaiting_report(&mock, &orchestrator).await;
    mock.queue_poll(Ok(MockBackend::snapshot(&[("2", OPENAI, false)], true, true)));

    tick().await;
    let session = orchestrator.state().unwrap();
    assert_eq!(session.status(), SessionStatus::Errored);
    assert_eq!(session.error_reason(), Some("report generation failed"));
    assert!(!orchestrator.is_polling());
}

#[tokio::test(start_paused = true)]
async fn failed_poll_is_retried_without_erroring() {
    let (mock, orchestrator, observer) = setup();
    awaiting_report(&mock, &orchestrator).await;
    mock.queue_poll(Err(BackendError::Transport {
        message: "connection reset".into(),
    }));
    mock.queue_poll(Ok(MockBackend::snapshot(&[("2", OPENAI, false)], false, false)));

    tick().await;
    assert_eq!(mock.poll_count(), 1);
    assert_eq!(orchestrator.state().unwrap().status(), SessionStatus::AwaitingReport);
    assert!(orchestrator.is_polling());

    tick().await;
    assert_eq!(mock.poll_count(), 2);
    assert_eq!(orchestrator.state().unwrap().status(), SessionStatus::AwaitingReport);
    assert!(!observer.statuses().contains(&SessionStatus::Errored));
}

#[tokio::test(start_paused = true)]
async fn poll_once_reports_outcome() {
    let (mock, orchestrator, _observer) = setup();
    awaiting_report(&mock, &orchestrator).await;
    mock.queue_poll(Err(BackendError::Http {
        status: 502,
        message: "bad gateway".into(),
    }));
    mock.queue_poll(Ok(MockBackend::snapshot(&[("2", OPENAI, false)], false, false)));
    mock.queue_poll(Ok(MockBackend::snapshot(&[("2", OPENAI, false)], true, false)));

    assert!(matches!(
        orchestrator.poll_once().await.unwrap(),
        PollOutcome::Failed { .. }
    ));
    assert_eq!(orchestrator.poll_once().await.unwrap(), PollOutcome::Pending);
    assert_eq!(orchestrator.poll_once().await.unwrap(), PollOutcome::Completed);
    assert_eq!(orchestrator.poll_once().await.unwrap(), PollOutcome::Idle);
}

#[tokio::test(start_paused = true)]
async fn auth_failure_keeps_polling_until_accepted() {
    let (mock, orchestrator, observer) = setup();
    awaiting_report(&mock, &orchestrator).await;
    mock.queue_poll(Err(BackendError::AuthenticationRequired));
    mock.queue_poll(Err(BackendError::AuthenticationRequired));
    mock.queue_poll(Ok(MockBackend::snapshot(
        &[("2", OPENAI, false), ("3", GEMINI, false)],
        true,
        false,
    )));

    tick().await;
    assert_eq!(observer.auth_requests(), 1);
    assert!(orchestrator.is_polling());
    assert_eq!(orchestrator.state().unwrap().status(), SessionStatus::AwaitingReport);

    tick().await;
    assert_eq!(observer.auth_requests(), 1);
    assert!(orchestrator.is_polling());

    tick().await;
    assert_eq!(mock.poll_count(), 3);
    assert_eq!(orchestrator.state().unwrap().status(), SessionStatus::Completed);
    assert!(!orchestrator.is_polling());
}

#[tokio::test]
async fn rejected_topic_withdraws_its_echo() {
    let (mock, orchestrator, observer) = setup();
    mock.queue_topic(Err(BackendError::AuthenticationRequired));
    mock.queue_topic(Ok(MockBackend::questions(None, &["Q1"])));

    let err = assert_err!(orchestrator.submit_topic("climate policy").await);
    assert!(err.requires_authentication());
    assert_eq!(orchestrator.state().unwrap().status(), SessionStatus::NotStarted);
    assert!(texts(&orchestrator).is_empty());
    assert_eq!(observer.last_log(), Some(Vec::new()));

    assert_ok!(orchestrator.submit_topic("climate policy").await);
    assert_eq!(texts(&orchestrator), vec![
        "climate policy".to_string(),
        "**Question 1 of 1:**\n\nQ1".to_string(),
    ]);
}

#[tokio::test]
async fn rejected_answer_withdraws_its_echo() {
    let (mock, orchestrator, _observer) = setup();
    mock.queue_topic(Ok(MockBackend::questions(None, &["Q1", "Q2"])));
    mock.queue_answer(Err(BackendError::AuthenticationRequired));
    assert_ok!(orchestrator.submit_topic("energy markets").await);

    assert_err!(orchestrator.submit_answer("Europe").await);
    let session = orchestrator.state().unwrap();
    assert_eq!(session.current_question_index(), 0);

    assert_ok!(orchestrator.submit_answer("Europe").await);
    let europe = texts(&orchestrator)
        .into_iter()
        .filter(|t| t == "Europe")
        .count();
    assert_eq!(europe, 1);
}

// --- Failures and terminal states ---

#[tokio::test]
async fn failed_topic_call_errors_session() {
    let (mock, orchestrator, _observer) = setup();
    mock.queue_topic(Err(BackendError::Http {
        status: 500,
        message: "internal error".into(),
    }));

    let err = assert_err!(orchestrator.submit_topic("topic").await);
    assert!(matches!(err, ResearchError::Transport { .. }));

    let session = orchestrator.state().unwrap();
    assert_eq!(session.status(), SessionStatus::Errored);
    let errors = orchestrator
        .merged_log()
        .into_iter()
        .filter(|m| m.text == DEFAULT_TRANSPORT_ERROR_MESSAGE)
        .count();
    assert_eq!(errors, 1);

    let calls = mock.calls().len();
    assert!(matches!(
        orchestrator.submit_topic("again").await,
        Err(ResearchError::SessionClosed { status: SessionStatus::Errored })
    ));
    assert!(matches!(
        orchestrator.submit_answer("answer").await,
        Err(ResearchError::SessionClosed { status: SessionStatus::Errored })
    ));
    assert_eq!(mock.calls().len(), calls);
    assert_eq!(orchestrator.state().unwrap(), session);
}

#[tokio::test]
async fn failed_answer_call_errors_session() {
    let (mock, orchestrator, _observer) = setup();
    mock.queue_topic(Ok(MockBackend::questions(None, &["Q1", "Q2"])));
    mock.queue_answer(Err(BackendError::Transport {
        message: "timeout".into(),
    }));

    assert_ok!(orchestrator.submit_topic("topic").await);
    assert_err!(orchestrator.submit_answer("a1").await);
    let session = orchestrator.state().unwrap();
    assert_eq!(session.status(), SessionStatus::Errored);
    assert_eq!(session.questions().len(), 2);
}

#[tokio::test]
async fn failed_session_creation_changes_nothing() {
    let mock = Arc::new(QuotaLimitedBackend::default());
    let orchestrator = ResearchOrchestrator::new(mock, ResearchConfig::default());

    let err = assert_err!(orchestrator.submit_topic("topic").await);
    assert!(matches!(err, ResearchError::Transport { .. }));
    assert!(orchestrator.state().is_none());
    assert!(orchestrator.merged_log().is_empty());
}

#[tokio::test(start_paused = true)]
async fn concurrent_submission_is_busy() {
    let (mock, orchestrator, _observer) = setup();
    mock.set_latency(Duration::from_secs(1));
    mock.queue_topic(Ok(MockBackend::questions(None, &["Q1"])));

    let background = orchestrator.clone();
    let first = tokio::spawn(async move { background.submit_topic("topic").await });
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(orchestrator.is_busy());
    assert!(matches!(
        orchestrator.submit_topic("topic").await,
        Err(ResearchError::Busy)
    ));
    assert!(matches!(
        orchestrator.submit_answer("answer").await,
        Err(ResearchError::Busy)
    ));

    let session = first.await.unwrap().unwrap();
    assert_eq!(session.status(), SessionStatus::AwaitingClarification);
    assert!(!orchestrator.is_busy());
}

// --- Session switching ---

#[tokio::test(start_paused = true)]
async fn switching_sessions_stops_old_poller() {
    let (mock, orchestrator, _observer) = setup();
    awaiting_report(&mock, &orchestrator).await;
    assert!(orchestrator.is_polling());

    mock.queue_poll(Ok(MockBackend::snapshot(
        &[("1", "older topic", true), ("2", OPENAI, false), ("3", GEMINI, false)],
        true,
        false,
    )));
    let session = assert_ok!(orchestrator.select_session(SessionId::from("chat-9")).await);
    assert_eq!(session.id.as_str(), "chat-9");
    assert_eq!(session.status(), SessionStatus::Completed);
    assert_eq!(session.topic(), Some("older topic"));
    assert!(!orchestrator.is_polling());

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(mock.poll_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn stale_poll_result_is_discarded() {
    let (mock, orchestrator, observer) = setup();
    awaiting_report(&mock, &orchestrator).await;
    mock.set_latency(Duration::from_secs(1));
    mock.queue_poll(Ok(MockBackend::snapshot(&[("2", OPENAI, false)], true, false)));

    // The first tick fires at 2 s and its fetch is still in flight at 2.5 s.
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(mock.poll_count(), 1);
    orchestrator.clear_active();

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(orchestrator.state().is_none());
    assert!(orchestrator.merged_log().is_empty());
    assert!(!observer.statuses().contains(&SessionStatus::Completed));
}

#[tokio::test(start_paused = true)]
async fn restored_session_statuses() {
    let (mock, orchestrator, _observer) = setup();

    mock.queue_poll(Ok(MockBackend::snapshot(&[], false, false)));
    let session = assert_ok!(orchestrator.select_session("chat-1".into()).await);
    assert_eq!(session.status(), SessionStatus::NotStarted);

    mock.queue_poll(Ok(MockBackend::snapshot(&[("1", "topic", true)], false, false)));
    let session = assert_ok!(orchestrator.select_session("chat-2".into()).await);
    assert_eq!(session.status(), SessionStatus::Errored);
    assert_eq!(session.error_reason(), Some("clarification was interrupted"));

    mock.queue_poll(Ok(MockBackend::snapshot(&[("1", "topic", true)], true, true)));
    let session = assert_ok!(orchestrator.select_session("chat-3".into()).await);
    assert_eq!(session.status(), SessionStatus::Errored);

    mock.queue_poll(Ok(MockBackend::snapshot(
        &[("1", "topic", true), ("2", OPENAI, false)],
        false,
        false,
    )));
    let session = assert_ok!(orchestrator.select_session("chat-4".into()).await);
    assert_eq!(session.status(), SessionStatus::AwaitingReport);
    assert!(orchestrator.is_polling());
    assert_eq!(
        orchestrator.merged_log().iter().filter(|m| m.is_placeholder()).count(),
        1
    );

    mock.queue_poll(Ok(MockBackend::snapshot(
        &[("1", "topic", true), ("2", OPENAI, false), ("3", GEMINI, false)],
        true,
        false,
    )));
    tick().await;
    assert_eq!(orchestrator.state().unwrap().status(), SessionStatus::Completed);
}

#[tokio::test]
async fn new_session_creates_on_next_topic() {
    let (mock, orchestrator, _observer) = setup();
    mock.queue_topic(Ok(MockBackend::questions(None, &["Q1"])));
    mock.queue_topic(Ok(MockBackend::questions(None, &["Q1"])));

    let first = assert_ok!(orchestrator.submit_topic("first").await);
    orchestrator.new_session();
    assert!(orchestrator.state().is_none());

    let second = assert_ok!(orchestrator.submit_topic("second").await);
    assert_ne!(first.id, second.id);
    assert_eq!(texts(&orchestrator)[0], "second");
}

// --- Email ---

#[tokio::test]
async fn email_appends_confirmation() {
    let (mock, orchestrator, _observer) = setup();
    mock.queue_poll(Ok(MockBackend::snapshot(
        &[("1", "topic", true), ("2", OPENAI, false), ("3", GEMINI, false)],
        true,
        false,
    )));
    assert_ok!(orchestrator.select_session("chat-5".into()).await);

    mock.queue_email(Ok(EmailReceipt {
        success: true,
        summary: Some("Solar storage report".into()),
    }));
    let receipt = assert_ok!(orchestrator.send_report_by_email().await);
    assert!(receipt.success);
    assert_eq!(
        texts(&orchestrator).last().map(String::as_str),
        Some("✅ Report successfully sent to your registered email: Solar storage report.")
    );

    mock.queue_email(Err(BackendError::Rejected {
        message: "no email on file".into(),
    }));
    assert_err!(orchestrator.send_report_by_email().await);
    assert_eq!(
        texts(&orchestrator).last().map(String::as_str),
        Some("Failed to send email. Please ensure your account has a valid email address.")
    );
    assert_eq!(orchestrator.state().unwrap().status(), SessionStatus::Completed);
}

/// A backend whose session quota is exhausted.
#[derive(Default)]
struct QuotaLimitedBackend;

#[async_trait::async_trait]
impl delve_core::ResearchBackend for QuotaLimitedBackend {
    async fn create_session(
        &self,
        _title: &str,
    ) -> Result<delve_core::SessionSummary, BackendError> {
        Err(BackendError::QuotaExceeded {
            message: "Daily chat limit reached".into(),
        })
    }

    async fn list_sessions(&self) -> Result<Vec<delve_core::SessionSummary>, BackendError> {
        Ok(Vec::new())
    }

    async fn session_quota(&self) -> Result<delve_core::SessionQuota, BackendError> {
        Ok(delve_core::SessionQuota {
            today_count: 5,
            max_sessions: 5,
            is_premium: false,
        })
    }

    async fn generate_questions(
        &self,
        _session: &SessionId,
        _topic: &str,
    ) -> Result<delve_core::backend::TopicResponse, BackendError> {
        unreachable!("no session can be created")
    }

    async fn submit_answer(
        &self,
        _session: &SessionId,
        _submission: &delve_core::backend::AnswerSubmission,
    ) -> Result<AnswerResponse, BackendError> {
        unreachable!("no session can be created")
    }

    async fn poll_report(
        &self,
        _session: &SessionId,
    ) -> Result<delve_core::backend::ReportSnapshot, BackendError> {
        unreachable!("no session can be created")
    }

    async fn send_report_by_email(
        &self,
        _session: &SessionId,
    ) -> Result<EmailReceipt, BackendError> {
        unreachable!("no session can be created")
    }
}
