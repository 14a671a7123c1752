//! REPL (Read-Eval-Print Loop) for interactive research sessions.
//!
//! The first line of a fresh session is the topic; while clarifying questions
//! are outstanding every line answers the current one. Output arrives through
//! the `ConsoleObserver`, including report sections found by background polling.

use crate::console::{ConsoleObserver, status_line};
use delve_core::{
    DelveConfig, HttpBackend, ResearchBackend, ResearchError, ResearchOrchestrator, SessionId,
    SessionStatus,
};
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

const HELP: &str = "\
Commands:
  /new           start a new research session
  /open <id>     open a stored session
  /sessions      list stored sessions
  /state         show the active session's status
  /email         email the finished report
  /help          show this help
  /quit          exit";

/// What the REPL should do with one line of input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Input {
    Topic(String),
    Answer(String),
    Command { name: String, arg: String },
    /// Text submitted while the session cannot take it.
    Ignored(&'static str),
    Empty,
}

/// Route a line of input based on the active session's status.
pub(crate) fn classify(line: &str, status: Option<SessionStatus>) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    if let Some(rest) = line.strip_prefix('/') {
        let mut parts = rest.splitn(2, ' ');
        let name = parts.next().unwrap_or_default().to_lowercase();
        let arg = parts.next().unwrap_or_default().trim().to_string();
        return Input::Command { name, arg };
    }
    match status {
        None | Some(SessionStatus::NotStarted) => Input::Topic(line.to_string()),
        Some(SessionStatus::AwaitingClarification) => Input::Answer(line.to_string()),
        Some(SessionStatus::AwaitingReport) => {
            Input::Ignored("The report is still being generated; please wait.")
        }
        Some(SessionStatus::Completed | SessionStatus::Errored) => {
            Input::Ignored("This session is finished. Use /new to start another.")
        }
    }
}

fn report_error(err: &ResearchError) {
    debug!(error = %err, "Command failed");
    match err {
        ResearchError::AuthenticationRequired => println!(
            "\x1b[31mAuthentication required.\x1b[0m Set a valid API token and try again."
        ),
        ResearchError::Validation { reason } => println!("{}", reason),
        other => println!("\x1b[31mError:\x1b[0m {}", other),
    }
}

/// Run the interactive loop until `/quit` or end of input.
pub async fn run_interactive(config: DelveConfig, session: Option<String>) -> anyhow::Result<()> {
    let backend = Arc::new(HttpBackend::new(&config.backend)?);
    let orchestrator = ResearchOrchestrator::new(backend, config.research.clone());
    orchestrator.on_state_change(Arc::new(ConsoleObserver::new()));
    info!(
        authenticated = config.backend.resolve_token().is_some(),
        "Interactive session started"
    );

    println!("\x1b[1mDelve\x1b[0m research assistant ({})", config.backend.base_url);
    println!("Type a topic to start, /help for commands.");

    if let Some(id) = session
        && let Err(err) = orchestrator.select_session(SessionId::from(id)).await
    {
        report_error(&err);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\x1b[1;34m> \x1b[0m");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };

        let status = orchestrator.state().map(|s| s.status());
        let result = match classify(&line, status) {
            Input::Empty => continue,
            Input::Ignored(reason) => {
                println!("{}", reason);
                continue;
            }
            Input::Topic(topic) => orchestrator.submit_topic(&topic).await.map(|_| ()),
            Input::Answer(answer) => orchestrator.submit_answer(&answer).await.map(|_| ()),
            Input::Command { name, arg } => match name.as_str() {
                "quit" | "exit" | "q" => {
                    println!("Goodbye!");
                    break;
                }
                "help" | "?" => {
                    println!("{}", HELP);
                    Ok(())
                }
                "new" => {
                    orchestrator.new_session();
                    println!("Started a new session. Enter a research topic.");
                    Ok(())
                }
                "open" if arg.is_empty() => {
                    println!("Usage: /open <session id>");
                    Ok(())
                }
                "open" => orchestrator
                    .select_session(SessionId::from(arg))
                    .await
                    .map(|_| ()),
                "sessions" => {
                    handle_sessions(&orchestrator).await;
                    Ok(())
                }
                "state" => {
                    match orchestrator.state() {
                        Some(session) => println!(
                            "Session {}: {}. {}",
                            session.id,
                            session.status(),
                            status_line(&session)
                        ),
                        None => println!("No active session. Enter a research topic."),
                    }
                    Ok(())
                }
                "email" => orchestrator.send_report_by_email().await.map(|_| ()),
                other => {
                    println!("Unknown command: /{}. Type /help for commands.", other);
                    Ok(())
                }
            },
        };

        if let Err(err) = result {
            report_error(&err);
        }
    }

    orchestrator.clear_active();
    Ok(())
}

async fn handle_sessions(orchestrator: &ResearchOrchestrator) {
    let backend = orchestrator.backend();
    match backend.list_sessions().await {
        Ok(sessions) if sessions.is_empty() => println!("No sessions yet."),
        Ok(sessions) => {
            for session in &sessions {
                println!("  {}", crate::commands::session_line(session));
            }
            if let Ok(quota) = backend.session_quota().await {
                println!(
                    "Sessions today: {} of {}",
                    quota.today_count, quota.max_sessions
                );
            }
        }
        Err(err) => report_error(&err.into()),
    }
}
