//! Research orchestrator.
//!
//! Owns the active session, its message log and the poll timer. Mutating calls
//! go through a single in-flight slot, and every result (including background
//! poll results) is applied only if the session it was issued for is still the
//! active one at apply time.

use super::reducer::{REPORT_FAILED_REASON, ResearchEvent, reduce};
use super::session::{ResearchBrief, ResearchState, Session};
use crate::backend::{
    AnswerResponse, AnswerSubmission, EmailReceipt, ReportSnapshot, ResearchBackend,
    TopicResponse,
};
use crate::config::ResearchConfig;
use crate::error::{BackendError, ResearchError};
use crate::producer::ProducerSet;
use crate::sync::{MessageLog, PollHandle, PollVerdict, ResultSynchronizer};
use crate::types::{Message, SessionId, SessionStatus};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Title given to sessions created for a fresh topic.
pub const DEFAULT_SESSION_TITLE: &str = "New Chat";

/// Reason recorded when a stored session stopped mid-clarification.
pub const INTERRUPTED_REASON: &str = "clarification was interrupted";

const NO_QUESTIONS_REASON: &str = "backend returned neither questions nor a report";
const EMAIL_SENT_PREFIX: &str = "✅ Report successfully sent to your registered email";
const EMAIL_FAILED_MESSAGE: &str =
    "Failed to send email. Please ensure your account has a valid email address.";

/// Receives session updates from the orchestrator.
///
/// Called synchronously after the orchestrator's internal lock is released,
/// possibly from the background poll task. Implementations must not block.
pub trait SessionObserver: Send + Sync {
    /// The active session or its merged log changed.
    fn on_state_change(&self, session: &Session, log: &[Message]);

    /// The backend rejected the caller's credentials during background polling.
    /// Called once per run of rejected polls; the timer keeps ticking and
    /// picks up where it left off once a poll is accepted again.
    fn on_authentication_required(&self) {}
}

/// An observer that records every notification, for tests and diagnostics.
#[derive(Default)]
pub struct RecordingObserver {
    updates: Mutex<Vec<(Session, Vec<Message>)>>,
    auth_requests: AtomicUsize,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Status of the session at each notification, in order.
    pub fn statuses(&self) -> Vec<SessionStatus> {
        lock(&self.updates).iter().map(|(s, _)| s.status()).collect()
    }

    /// Merged log delivered with the most recent notification.
    pub fn last_log(&self) -> Option<Vec<Message>> {
        lock(&self.updates).last().map(|(_, log)| log.clone())
    }

    pub fn notification_count(&self) -> usize {
        lock(&self.updates).len()
    }

    pub fn auth_requests(&self) -> usize {
        self.auth_requests.load(Ordering::SeqCst)
    }
}

impl SessionObserver for RecordingObserver {
    fn on_state_change(&self, session: &Session, log: &[Message]) {
        lock(&self.updates).push((session.clone(), log.to_vec()));
    }

    fn on_authentication_required(&self) {
        self.auth_requests.fetch_add(1, Ordering::SeqCst);
    }
}

/// What one poll cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// No session is awaiting a report.
    Idle,
    /// The report is still being generated.
    Pending,
    /// The store reported completion; the session is now completed.
    Completed,
    /// The store reported a generation error; the session is now errored.
    Errored,
    /// The fetch failed; the next tick retries.
    Failed { reason: String },
    /// The session changed while the fetch was in flight; the result was dropped.
    Discarded,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Identity of the activation a call was issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Ticket {
    id: SessionId,
    generation: u64,
}

#[derive(Debug, Default)]
struct ActiveView {
    session: Option<Session>,
    log: MessageLog,
    poller: Option<PollHandle>,
    generation: u64,
    /// Set while background polls are being rejected for authentication.
    auth_rejected: bool,
}

impl ActiveView {
    fn ticket(&self) -> Option<Ticket> {
        self.session.as_ref().map(|s| Ticket {
            id: s.id.clone(),
            generation: self.generation,
        })
    }

    fn matches(&self, ticket: &Ticket) -> bool {
        self.generation == ticket.generation
            && self.session.as_ref().is_some_and(|s| s.id == ticket.id)
    }

    fn is_awaiting_report(&self, ticket: &Ticket) -> bool {
        self.matches(ticket)
            && self
                .session
                .as_ref()
                .is_some_and(|s| s.status() == SessionStatus::AwaitingReport)
    }

    /// Stop the poller and forget the active session.
    fn deactivate(&mut self) {
        self.poller = None;
        self.session = None;
        self.log.clear();
        self.auth_rejected = false;
        self.generation += 1;
    }

    fn activate(&mut self, session: Session) -> Ticket {
        self.deactivate();
        let ticket = Ticket {
            id: session.id.clone(),
            generation: self.generation,
        };
        self.session = Some(session);
        ticket
    }
}

type Snapshot = (Session, Vec<Message>);

struct Shared {
    backend: Arc<dyn ResearchBackend>,
    config: ResearchConfig,
    synchronizer: ResultSynchronizer,
    view: Mutex<ActiveView>,
    in_flight: tokio::sync::Mutex<()>,
    observers: RwLock<Vec<Arc<dyn SessionObserver>>>,
}

impl Shared {
    fn view(&self) -> MutexGuard<'_, ActiveView> {
        lock(&self.view)
    }

    fn producers(&self) -> &ProducerSet {
        self.synchronizer.producers()
    }

    fn snapshot(&self, view: &ActiveView) -> Option<Snapshot> {
        view.session
            .clone()
            .map(|s| (s, view.log.merged(self.producers())))
    }

    fn observers(&self) -> Vec<Arc<dyn SessionObserver>> {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn notify(&self, snapshot: Option<Snapshot>) {
        if let Some((session, log)) = snapshot {
            for observer in self.observers() {
                observer.on_state_change(&session, &log);
            }
        }
    }

    /// Release the view lock and tell observers about state-changing outcomes.
    fn finish<T>(
        &self,
        view: MutexGuard<'_, ActiveView>,
        outcome: Result<T, ResearchError>,
    ) -> Result<T, ResearchError> {
        let changed = matches!(
            &outcome,
            Ok(_) | Err(ResearchError::Transport { .. } | ResearchError::AuthenticationRequired)
        );
        let snapshot = if changed { self.snapshot(&view) } else { None };
        drop(view);
        self.notify(snapshot);
        outcome
    }

    /// Move the session to ERRORED after a failed mutating call and show the
    /// user-facing error message.
    fn record_failure(
        &self,
        view: &mut ActiveView,
        session: &Session,
        reason: String,
    ) -> Result<Session, ResearchError> {
        let next = reduce(session, ResearchEvent::CallFailed {
            reason: reason.clone(),
        })?;
        warn!(session_id = %session.id, reason = %reason, "Research call failed");
        view.log
            .push_echo(Message::system(&self.config.transport_error_message));
        view.log.settle();
        view.poller = None;
        view.session = Some(next.clone());
        Ok(next)
    }

    /// Store `next` as the active session, starting the poller when it awaits a report.
    fn enter(self: &Arc<Self>, view: &mut ActiveView, next: Session) -> Session {
        info!(
            session_id = %next.id,
            status = %next.status(),
            question_index = next.current_question_index(),
            "Session updated"
        );
        let polling = next.status() == SessionStatus::AwaitingReport;
        let ticket = Ticket {
            id: next.id.clone(),
            generation: view.generation,
        };
        view.session = Some(next.clone());
        if polling {
            self.start_polling(view, ticket);
        } else {
            view.poller = None;
        }
        next
    }

    fn start_polling(self: &Arc<Self>, view: &mut ActiveView, ticket: Ticket) {
        let period = self.config.poll_interval();
        info!(
            session_id = %ticket.id,
            period_ms = period.as_millis() as u64,
            "Polling for report"
        );
        let weak = Arc::downgrade(self);
        let generation = ticket.generation;
        // Replacing the handle cancels any previous poller first.
        view.poller = Some(PollHandle::spawn(generation, period, move || {
            let weak = weak.clone();
            let ticket = ticket.clone();
            async move {
                match weak.upgrade() {
                    Some(shared) => shared.poll_tick(ticket).await,
                    None => ControlFlow::Break(()),
                }
            }
        }));
    }

    async fn poll_tick(self: Arc<Self>, ticket: Ticket) -> ControlFlow<()> {
        match self.poll_cycle(&ticket).await {
            Ok(PollOutcome::Pending | PollOutcome::Failed { .. }) => ControlFlow::Continue(()),
            Ok(_) => ControlFlow::Break(()),
            Err(err) if err.requires_authentication() => {
                let newly_rejected = {
                    let mut view = self.view();
                    view.matches(&ticket) && !std::mem::replace(&mut view.auth_rejected, true)
                };
                if newly_rejected {
                    warn!(
                        session_id = %ticket.id,
                        "Authentication required, retrying on next tick"
                    );
                    for observer in self.observers() {
                        observer.on_authentication_required();
                    }
                }
                ControlFlow::Continue(())
            }
            Err(err) => {
                warn!(session_id = %ticket.id, error = %err, "Poll cycle failed");
                ControlFlow::Continue(())
            }
        }
    }

    async fn poll_cycle(&self, ticket: &Ticket) -> Result<PollOutcome, ResearchError> {
        let fetched_at = {
            let view = self.view();
            if !view.is_awaiting_report(ticket) {
                return Ok(PollOutcome::Discarded);
            }
            view.log.revision()
        };

        debug!(session_id = %ticket.id, "Polling report");
        let snapshot = match self.backend.poll_report(&ticket.id).await {
            Ok(snapshot) => snapshot,
            Err(BackendError::AuthenticationRequired) => {
                return Err(ResearchError::AuthenticationRequired);
            }
            Err(err) => {
                warn!(
                    session_id = %ticket.id,
                    error = %err,
                    "Report poll failed, retrying on next tick"
                );
                return Ok(PollOutcome::Failed {
                    reason: err.to_string(),
                });
            }
        };

        let mut guard = self.view();
        let view = &mut *guard;
        if !view.is_awaiting_report(ticket) {
            debug!(session_id = %ticket.id, "Discarding poll result for inactive session");
            return Ok(PollOutcome::Discarded);
        }
        let Some(session) = view.session.clone() else {
            return Ok(PollOutcome::Discarded);
        };
        if std::mem::take(&mut view.auth_rejected) {
            info!(session_id = %ticket.id, "Poll accepted again after authentication failure");
        }

        let next = reduce(&session, ResearchEvent::PollObserved {
            is_completed: snapshot.is_completed,
            has_error: snapshot.has_error,
        })?;
        let before = view.log.merged(self.producers());
        let verdict = self
            .synchronizer
            .reconcile(&mut view.log, snapshot, fetched_at);

        let outcome = match verdict {
            PollVerdict::Pending => PollOutcome::Pending,
            PollVerdict::Completed => PollOutcome::Completed,
            PollVerdict::Failed => PollOutcome::Errored,
        };
        let finished = next.status() != SessionStatus::AwaitingReport;
        if finished {
            info!(session_id = %next.id, status = %next.status(), "Report generation finished");
            view.poller = None;
            view.session = Some(next);
        }

        let changed = finished || view.log.merged(self.producers()) != before;
        let snapshot = if changed { self.snapshot(view) } else { None };
        drop(guard);
        self.notify(snapshot);
        Ok(outcome)
    }

    fn refresh_placeholders(&self, view: &mut ActiveView, id: &SessionId) {
        let change = self.synchronizer.refresh_placeholders(&mut view.log);
        if !change.is_empty() {
            debug!(
                session_id = %id,
                inserted = ?change.inserted,
                removed = ?change.removed,
                "Placeholders updated"
            );
        }
    }

    fn apply_topic(
        &self,
        view: &mut ActiveView,
        ticket: &Ticket,
        echo_id: &str,
        topic: String,
        result: Result<TopicResponse, BackendError>,
    ) -> Result<Session, ResearchError> {
        if !view.matches(ticket) {
            debug!(session_id = %ticket.id, "Discarding topic result for inactive session");
            return Err(ResearchError::SessionChanged);
        }
        let Some(session) = view.session.clone() else {
            return Err(ResearchError::SessionChanged);
        };
        let response = match result {
            Ok(response) => response,
            Err(BackendError::AuthenticationRequired) => {
                view.log.remove_echo(echo_id);
                return Err(ResearchError::AuthenticationRequired);
            }
            Err(err) => {
                return self
                    .record_failure(view, &session, err.to_string())
                    .and(Err(err.into()));
            }
        };

        if let Some(title) = &response.title {
            debug!(session_id = %ticket.id, title = %title, "Backend titled the session");
        }

        let intro = response.intro.filter(|t| !t.trim().is_empty());
        let next = match (response.direct_report, response.questions.first().cloned()) {
            (Some(report), _) => {
                let next = reduce(&session, ResearchEvent::ReportStartedDirectly { topic })?;
                view.log.extend_echoes(intro.into_iter().chain(report.sections));
                next
            }
            (None, Some(first)) => {
                let total = response.questions.len();
                let next = reduce(&session, ResearchEvent::QuestionsReceived {
                    topic,
                    questions: response.questions,
                })?;
                view.log
                    .extend_echoes(intro.into_iter().chain([question_text(1, total, &first)]));
                next
            }
            (None, None) => {
                return self
                    .record_failure(view, &session, NO_QUESTIONS_REASON.to_string())
                    .and(Err(ResearchError::Transport {
                        message: NO_QUESTIONS_REASON.to_string(),
                    }));
            }
        };

        view.log.settle();
        self.refresh_placeholders(view, &ticket.id);
        Ok(next)
    }

    fn apply_answer(
        &self,
        view: &mut ActiveView,
        ticket: &Ticket,
        echo_id: &str,
        answer: String,
        result: Result<AnswerResponse, BackendError>,
    ) -> Result<Session, ResearchError> {
        if !view.matches(ticket) {
            debug!(session_id = %ticket.id, "Discarding answer result for inactive session");
            return Err(ResearchError::SessionChanged);
        }
        let Some(session) = view.session.clone() else {
            return Err(ResearchError::SessionChanged);
        };
        let response = match result {
            Ok(response) => response,
            Err(BackendError::AuthenticationRequired) => {
                view.log.remove_echo(echo_id);
                return Err(ResearchError::AuthenticationRequired);
            }
            Err(err) => {
                return self
                    .record_failure(view, &session, err.to_string())
                    .and(Err(err.into()));
            }
        };

        let next = reduce(&session, ResearchEvent::AnswerAccepted {
            answer,
            report_started: response.report.is_some(),
        })?;

        let acknowledgment = response.acknowledgment.filter(|t| !t.trim().is_empty());
        view.log.extend_echoes(acknowledgment);
        match &next.state {
            ResearchState::AwaitingClarification(brief) => {
                if let Some(question) = brief.current_question() {
                    view.log.extend_echoes([question_text(
                        brief.answers.len() + 1,
                        brief.questions.len(),
                        question,
                    )]);
                }
            }
            _ => {
                if let Some(report) = response.report {
                    view.log.extend_echoes(report.sections);
                }
            }
        }

        view.log.settle();
        self.refresh_placeholders(view, &ticket.id);
        Ok(next)
    }

    fn apply_email(
        &self,
        view: &mut ActiveView,
        ticket: &Ticket,
        result: Result<EmailReceipt, BackendError>,
    ) -> Result<EmailReceipt, ResearchError> {
        if !view.matches(ticket) {
            return Err(ResearchError::SessionChanged);
        }
        let outcome = match result {
            Err(BackendError::AuthenticationRequired) => {
                return Err(ResearchError::AuthenticationRequired);
            }
            Ok(receipt) if receipt.success => {
                let text = match receipt.summary.as_deref().filter(|s| !s.trim().is_empty()) {
                    Some(summary) => format!("{EMAIL_SENT_PREFIX}: {summary}."),
                    None => format!("{EMAIL_SENT_PREFIX}."),
                };
                view.log.push_echo(Message::system(text));
                info!(session_id = %ticket.id, "Report emailed");
                Ok(receipt)
            }
            Ok(_) => Err(ResearchError::Transport {
                message: "the backend did not send the email".to_string(),
            }),
            Err(err) => Err(err.into()),
        };
        if let Err(err) = &outcome {
            warn!(session_id = %ticket.id, error = %err, "Emailing the report failed");
            view.log.push_echo(Message::system(EMAIL_FAILED_MESSAGE));
        }
        view.log.settle();
        outcome
    }

    fn apply_restore(
        self: &Arc<Self>,
        view: &mut ActiveView,
        generation: u64,
        id: SessionId,
        snapshot: ReportSnapshot,
    ) -> Result<Session, ResearchError> {
        if view.generation != generation || view.session.is_some() {
            debug!(session_id = %id, "Discarding restored session, another one became active");
            return Err(ResearchError::SessionChanged);
        }
        let state = self.restored_state(&snapshot);
        view.activate(Session::restored(id, state));
        let fetched_at = view.log.revision();
        self.synchronizer
            .reconcile(&mut view.log, snapshot, fetched_at);
        let Some(session) = view.session.clone() else {
            return Err(ResearchError::SessionChanged);
        };
        Ok(self.enter(view, session))
    }

    /// Reconstruct a session's state from its stored log and flags.
    fn restored_state(&self, snapshot: &ReportSnapshot) -> ResearchState {
        let brief = || {
            let topic = snapshot
                .messages
                .iter()
                .find(|m| m.is_user)
                .map(|m| m.text.clone())
                .unwrap_or_default();
            ResearchBrief::new(topic, Vec::new())
        };

        let any_result = self.producers().presence(&snapshot.messages).contains(&true);
        match PollVerdict::from_flags(snapshot.is_completed, snapshot.has_error) {
            PollVerdict::Failed => ResearchState::Errored {
                brief: Some(brief()),
                reason: REPORT_FAILED_REASON.to_string(),
            },
            PollVerdict::Completed => ResearchState::Completed(brief()),
            PollVerdict::Pending if snapshot.messages.is_empty() => ResearchState::NotStarted,
            PollVerdict::Pending if any_result => ResearchState::AwaitingReport(brief()),
            PollVerdict::Pending => ResearchState::Errored {
                brief: Some(brief()),
                reason: INTERRUPTED_REASON.to_string(),
            },
        }
    }
}

fn question_text(number: usize, total: usize, question: &str) -> String {
    format!("**Question {number} of {total}:**\n\n{question}")
}

fn validated(text: &str, what: &str) -> Result<String, ResearchError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ResearchError::Validation {
            reason: format!("{what} must not be empty"),
        });
    }
    Ok(trimmed.to_string())
}

fn rejected(status: SessionStatus) -> ResearchError {
    if status.is_terminal() {
        ResearchError::SessionClosed { status }
    } else {
        ResearchError::UnexpectedSubmission { status }
    }
}

/// Drives research sessions against a `ResearchBackend`.
///
/// Cloning is cheap; clones share the active session, the log and the poll timer.
#[derive(Clone)]
pub struct ResearchOrchestrator {
    shared: Arc<Shared>,
}

impl ResearchOrchestrator {
    pub fn new(backend: Arc<dyn ResearchBackend>, config: ResearchConfig) -> Self {
        let synchronizer = ResultSynchronizer::new(ProducerSet::new(config.producers.clone()));
        Self {
            shared: Arc::new(Shared {
                backend,
                config,
                synchronizer,
                view: Mutex::new(ActiveView::default()),
                in_flight: tokio::sync::Mutex::new(()),
                observers: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn backend(&self) -> &Arc<dyn ResearchBackend> {
        &self.shared.backend
    }

    pub fn config(&self) -> &ResearchConfig {
        &self.shared.config
    }

    /// Register an observer for session and log changes.
    pub fn on_state_change(&self, observer: Arc<dyn SessionObserver>) {
        self.shared
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    /// The active session, if any.
    pub fn state(&self) -> Option<Session> {
        self.shared.view().session.clone()
    }

    /// Authoritative messages, then unconfirmed echoes, then placeholders.
    pub fn merged_log(&self) -> Vec<Message> {
        self.shared.view().log.merged(self.shared.producers())
    }

    /// Whether a poll timer is running for the active session.
    pub fn is_polling(&self) -> bool {
        self.shared
            .view()
            .poller
            .as_ref()
            .is_some_and(|p| !p.is_finished())
    }

    /// Whether a mutating call is in flight.
    pub fn is_busy(&self) -> bool {
        self.shared.in_flight.try_lock().is_err()
    }

    /// Start research on a topic.
    ///
    /// Creates a session first when none is active. Only valid while the
    /// session has not started.
    pub async fn submit_topic(&self, text: &str) -> Result<Session, ResearchError> {
        let topic = validated(text, "Topic")?;
        let _slot = self
            .shared
            .in_flight
            .try_lock()
            .map_err(|_| ResearchError::Busy)?;

        let (ticket, generation) = {
            let view = self.shared.view();
            if let Some(session) = &view.session
                && session.status() != SessionStatus::NotStarted
            {
                return Err(rejected(session.status()));
            }
            (view.ticket(), view.generation)
        };
        let ticket = match ticket {
            Some(ticket) => ticket,
            None => self.create_session(generation).await?,
        };

        let echo_id = self.echo_user(&ticket, &topic)?;
        info!(session_id = %ticket.id, "Submitting research topic");
        let result = self
            .shared
            .backend
            .generate_questions(&ticket.id, &topic)
            .await;

        let mut view = self.shared.view();
        let outcome = self
            .shared
            .apply_topic(&mut view, &ticket, &echo_id, topic, result);
        let outcome = outcome.map(|next| self.shared.enter(&mut view, next));
        self.shared.finish(view, outcome)
    }

    /// Answer the current clarifying question.
    pub async fn submit_answer(&self, text: &str) -> Result<Session, ResearchError> {
        let answer = validated(text, "Answer")?;
        let _slot = self
            .shared
            .in_flight
            .try_lock()
            .map_err(|_| ResearchError::Busy)?;

        let (ticket, submission) = {
            let view = self.shared.view();
            let Some(session) = &view.session else {
                return Err(ResearchError::NoActiveSession);
            };
            let ResearchState::AwaitingClarification(brief) = &session.state else {
                return Err(rejected(session.status()));
            };
            let mut answers = brief.answers.clone();
            answers.push(answer.clone());
            let submission = AnswerSubmission {
                topic: brief.topic.clone(),
                questions: brief.questions.clone(),
                answers,
                answer_index: brief.answers.len(),
            };
            let ticket = Ticket {
                id: session.id.clone(),
                generation: view.generation,
            };
            (ticket, submission)
        };

        let echo_id = self.echo_user(&ticket, &answer)?;
        info!(
            session_id = %ticket.id,
            question_index = submission.answer_index,
            last = submission.is_last(),
            "Submitting clarification answer"
        );
        let result = self
            .shared
            .backend
            .submit_answer(&ticket.id, &submission)
            .await;

        let mut view = self.shared.view();
        let outcome = self
            .shared
            .apply_answer(&mut view, &ticket, &echo_id, answer, result);
        let outcome = outcome.map(|next| self.shared.enter(&mut view, next));
        self.shared.finish(view, outcome)
    }

    /// Run one poll cycle now, independent of the timer.
    pub async fn poll_once(&self) -> Result<PollOutcome, ResearchError> {
        let ticket = {
            let view = self.shared.view();
            match view.ticket() {
                Some(ticket) if view.is_awaiting_report(&ticket) => ticket,
                _ => return Ok(PollOutcome::Idle),
            }
        };
        self.shared.poll_cycle(&ticket).await
    }

    /// Make a stored session the active one.
    ///
    /// Stops any running poller first, then restores status from the stored
    /// log and flags. Polling resumes when a report is still outstanding.
    pub async fn select_session(&self, id: SessionId) -> Result<Session, ResearchError> {
        let generation = {
            let mut view = self.shared.view();
            view.deactivate();
            view.generation
        };
        info!(session_id = %id, "Opening session");
        let snapshot = self.shared.backend.poll_report(&id).await?;

        let mut view = self.shared.view();
        let outcome = self
            .shared
            .apply_restore(&mut view, generation, id, snapshot);
        self.shared.finish(view, outcome)
    }

    /// Start over with a fresh chat; the next topic creates a new session.
    pub fn new_session(&self) {
        info!("Starting a new session");
        self.clear_active();
    }

    /// Forget the active session and stop its poller.
    pub fn clear_active(&self) {
        let mut view = self.shared.view();
        if let Some(session) = &view.session {
            debug!(session_id = %session.id, "Clearing active session");
        }
        view.deactivate();
    }

    /// Email the finished report to the account's registered address.
    pub async fn send_report_by_email(&self) -> Result<EmailReceipt, ResearchError> {
        let _slot = self
            .shared
            .in_flight
            .try_lock()
            .map_err(|_| ResearchError::Busy)?;

        let ticket = {
            let view = self.shared.view();
            let Some(session) = &view.session else {
                return Err(ResearchError::NoActiveSession);
            };
            if session.status() != SessionStatus::Completed {
                return Err(ResearchError::ReportNotReady {
                    status: session.status(),
                });
            }
            Ticket {
                id: session.id.clone(),
                generation: view.generation,
            }
        };

        info!(session_id = %ticket.id, "Emailing report");
        let result = self.shared.backend.send_report_by_email(&ticket.id).await;

        let mut view = self.shared.view();
        let outcome = self.shared.apply_email(&mut view, &ticket, result);
        self.shared.finish(view, outcome)
    }

    async fn create_session(&self, generation: u64) -> Result<Ticket, ResearchError> {
        let summary = self
            .shared
            .backend
            .create_session(DEFAULT_SESSION_TITLE)
            .await?;
        let mut view = self.shared.view();
        if view.generation != generation {
            debug!(session_id = %summary.id, "Active session changed while creating a session");
            return Err(ResearchError::SessionChanged);
        }
        info!(session_id = %summary.id, "Session created");
        Ok(view.activate(Session::new(summary.id)))
    }

    /// Show the user's text right away; returns the echo's id.
    fn echo_user(&self, ticket: &Ticket, text: &str) -> Result<String, ResearchError> {
        let mut view = self.shared.view();
        if !view.matches(ticket) {
            return Err(ResearchError::SessionChanged);
        }
        let echo = Message::user(text);
        let id = echo.id.clone();
        view.log.push_echo(echo);
        let snapshot = self.shared.snapshot(&view);
        drop(view);
        self.shared.notify(snapshot);
        Ok(id)
    }
}
