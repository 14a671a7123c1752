//! Terminal rendering of the merged message log.

use delve_core::{Message, MessageOrigin, Session, SessionId, SessionObserver, SessionStatus};
use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::Mutex;

const DEFAULT_WIDTH: usize = 100;

/// Tracks which log entries have already been shown for the current session.
///
/// Entries are keyed by sender and text rather than id: a local echo and the
/// stored copy that later replaces it are the same entry to the reader.
#[derive(Debug, Default)]
pub(crate) struct Printed {
    session: Option<SessionId>,
    seen: HashMap<(bool, String), usize>,
    status: Option<SessionStatus>,
}

impl Printed {
    /// Messages in `log` not shown yet, in log order. Local echoes of what the
    /// user typed are recorded but never returned.
    pub(crate) fn fresh(&mut self, session: &Session, log: &[Message]) -> Vec<Message> {
        if self.session.as_ref() != Some(&session.id) {
            self.session = Some(session.id.clone());
            self.seen.clear();
            self.status = None;
        }

        let mut occurrences: HashMap<(bool, String), usize> = HashMap::new();
        let mut fresh = Vec::new();
        for message in log {
            let key = (message.is_user, message.text.clone());
            let count = occurrences.entry(key.clone()).or_default();
            *count += 1;
            let shown = self.seen.entry(key).or_default();
            if *count > *shown {
                *shown = *count;
                if message.origin != MessageOrigin::User {
                    fresh.push(message.clone());
                }
            }
        }
        fresh
    }

    /// The new status, if it changed since the last call.
    pub(crate) fn status_change(&mut self, status: SessionStatus) -> Option<SessionStatus> {
        if self.status == Some(status) {
            return None;
        }
        self.status = Some(status);
        Some(status)
    }
}

/// Render one message for the terminal.
pub(crate) fn render_message(message: &Message, width: usize) -> String {
    let wrapped = textwrap::fill(&message.text, width.saturating_sub(2).max(20));
    let body = textwrap::indent(&wrapped, "  ");
    if message.is_user {
        format!("\x1b[1;34mYou:\x1b[0m\n{}", body)
    } else if message.is_placeholder() {
        format!("\x1b[90m{}\x1b[0m", body)
    } else {
        format!("\x1b[32mDelve:\x1b[0m\n{}", body)
    }
}

pub(crate) fn status_line(session: &Session) -> String {
    match session.status() {
        SessionStatus::NotStarted => "Enter a research topic to begin.".to_string(),
        SessionStatus::AwaitingClarification => format!(
            "Question {} of {}. Type your answer.",
            session.current_question_index() + 1,
            session.questions().len()
        ),
        SessionStatus::AwaitingReport => {
            "Generating the report. Results appear here as they arrive.".to_string()
        }
        SessionStatus::Completed => {
            "Research complete. /email sends the report, /new starts another session.".to_string()
        }
        SessionStatus::Errored => format!(
            "Session failed ({}). /new starts another session.",
            session.error_reason().unwrap_or("unknown error")
        ),
    }
}

fn terminal_width() -> usize {
    std::env::var("COLUMNS")
        .ok()
        .and_then(|c| c.parse().ok())
        .unwrap_or(DEFAULT_WIDTH)
}

/// Prints new log entries and status changes as they happen.
pub(crate) struct ConsoleObserver {
    printed: Mutex<Printed>,
    width: usize,
}

impl ConsoleObserver {
    pub(crate) fn new() -> Self {
        Self {
            printed: Mutex::new(Printed::default()),
            width: terminal_width(),
        }
    }
}

impl SessionObserver for ConsoleObserver {
    fn on_state_change(&self, session: &Session, log: &[Message]) {
        let mut printed = self
            .printed
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let fresh = printed.fresh(session, log);
        let status = printed.status_change(session.status());
        drop(printed);

        let mut out = io::stdout().lock();
        for message in &fresh {
            let _ = writeln!(out, "\n{}", render_message(message, self.width));
        }
        if let Some(status) = status
            && status != SessionStatus::NotStarted
        {
            let _ = writeln!(out, "\n\x1b[33m[{}]\x1b[0m {}", status, status_line(session));
        }
        let _ = out.flush();
    }

    fn on_authentication_required(&self) {
        println!(
            "\n\x1b[31mAuthentication required.\x1b[0m Set a valid API token; \
             polling retries on its own."
        );
    }
}
