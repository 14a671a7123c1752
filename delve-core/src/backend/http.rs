//! REST implementation of `ResearchBackend`.
//!
//! Endpoints:
//! - `POST /api/chats`, `GET /api/chats`, `GET /api/chats/{id}`
//! - `GET /api/chats/{id}/messages`
//! - `POST /api/chats/{id}/research-topic`
//! - `POST /api/chats/{id}/clarification-answer`
//! - `POST /api/chats/{id}/send-email`
//! - `GET /api/user/chat-count`
//!
//! Every response is a JSON object with a `success` flag. HTTP 401 maps to
//! `BackendError::AuthenticationRequired` on every endpoint.

use super::{
    AnswerResponse, AnswerSubmission, EmailReceipt, ReportSnapshot, ResearchBackend,
    SessionQuota, SessionSummary, TopicResponse,
};
use crate::config::BackendConfig;
use crate::error::BackendError;
use crate::types::{Message, ReportBundle, SessionId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

const MESSAGE_TYPE_QUESTIONS: &str = "clarifying_questions";
const MESSAGE_TYPE_REPORT: &str = "research_pages";

/// HTTP client for the research API.
pub struct HttpBackend {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpBackend {
    /// Build a backend from configuration, resolving the API token.
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let mut builder =
            Client::builder().connect_timeout(Duration::from_secs(config.connect_timeout_secs));
        if let Some(secs) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder.build().map_err(|e| BackendError::Transport {
            message: format!("Failed to build HTTP client: {}", e),
        })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.resolve_token(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Send a request and return the JSON body of a successful response.
    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Value, BackendError> {
        debug!(call = what, "Sending research API request");
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| BackendError::Transport {
                message: format!("{} request failed: {}", what, e),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| BackendError::Transport {
            message: format!("Failed to read {} response body: {}", what, e),
        })?;

        if !status.is_success() {
            return Err(map_http_error(status, &body));
        }

        let json: Value = serde_json::from_str(&body).map_err(|e| BackendError::Protocol {
            message: format!("{} returned invalid JSON: {}", what, e),
        })?;

        if json.get("success").and_then(Value::as_bool) == Some(false) {
            return Err(BackendError::Rejected {
                message: error_text(&json)
                    .unwrap_or_else(|| format!("{} was not successful", what)),
            });
        }

        Ok(json)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, what: &str) -> Result<T, BackendError> {
        let json = self.send(self.client.get(self.url(path)), what).await?;
        parse(json, what)
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Value,
        what: &str,
    ) -> Result<T, BackendError> {
        let json = self
            .send(self.client.post(self.url(path)).json(&body), what)
            .await?;
        parse(json, what)
    }
}

fn parse<T: DeserializeOwned>(json: Value, what: &str) -> Result<T, BackendError> {
    serde_json::from_value(json).map_err(|e| BackendError::Protocol {
        message: format!("Unexpected {} response: {}", what, e),
    })
}

fn error_text(json: &Value) -> Option<String> {
    json.get("error")
        .or_else(|| json.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Map a non-success HTTP status to a `BackendError`.
fn map_http_error(status: StatusCode, body: &str) -> BackendError {
    match status.as_u16() {
        401 => {
            debug!(body = %body, "Authentication required (401)");
            BackendError::AuthenticationRequired
        }
        code => {
            let message = serde_json::from_str::<Value>(body)
                .ok()
                .as_ref()
                .and_then(error_text)
                .unwrap_or_else(|| body.to_string());
            BackendError::Http {
                status: code,
                message,
            }
        }
    }
}

// --- Wire types ---

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireId {
    Number(i64),
    Text(String),
}

impl WireId {
    fn into_string(self) -> String {
        match self {
            WireId::Number(n) => n.to_string(),
            WireId::Text(s) => s,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireChat {
    id: WireId,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    is_completed: Option<bool>,
    #[serde(default)]
    has_error: Option<bool>,
}

impl From<WireChat> for SessionSummary {
    fn from(chat: WireChat) -> Self {
        SessionSummary {
            id: SessionId::new(chat.id.into_string()),
            title: chat.title.unwrap_or_else(|| "New Chat".to_string()),
            created_at: chat.created_at.as_deref().and_then(parse_timestamp),
            is_completed: chat.is_completed.unwrap_or(false),
            has_error: chat.has_error.unwrap_or(false),
        }
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|n| n.and_utc())
        })
}

#[derive(Debug, Deserialize)]
struct ChatEnvelope {
    chat: WireChat,
}

#[derive(Debug, Deserialize)]
struct ChatsEnvelope {
    #[serde(default)]
    chats: Vec<WireChat>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    id: WireId,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    is_user: bool,
}

#[derive(Debug, Deserialize)]
struct MessagesEnvelope {
    #[serde(default)]
    messages: Vec<WireMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireChatCount {
    today_count: u32,
    max_chats: u32,
    #[serde(default)]
    is_premium: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireResearchReply {
    #[serde(default)]
    message_type: Option<String>,
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    questions: Option<Vec<String>>,
    #[serde(default)]
    openai_research: Option<String>,
    #[serde(default)]
    gemini_research: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

impl WireResearchReply {
    fn is_report(&self) -> bool {
        self.message_type.as_deref() == Some(MESSAGE_TYPE_REPORT)
    }

    fn report(&self) -> ReportBundle {
        ReportBundle::new(
            [&self.openai_research, &self.gemini_research]
                .into_iter()
                .flatten()
                .filter(|s| !s.trim().is_empty())
                .cloned(),
        )
    }

    fn response_text(&self) -> Option<String> {
        self.response.clone().filter(|r| !r.trim().is_empty())
    }

    fn into_topic_response(self) -> TopicResponse {
        if self.is_report() {
            return TopicResponse {
                intro: self.response_text(),
                questions: Vec::new(),
                direct_report: Some(self.report()),
                title: self.title,
            };
        }
        let questions = if self.message_type.as_deref() == Some(MESSAGE_TYPE_QUESTIONS) {
            self.questions.clone().unwrap_or_default()
        } else {
            Vec::new()
        };
        TopicResponse {
            intro: self.response_text(),
            questions,
            direct_report: None,
            title: self.title,
        }
    }

    fn into_answer_response(self) -> AnswerResponse {
        if self.is_report() {
            AnswerResponse {
                acknowledgment: None,
                report: Some(self.report()),
            }
        } else {
            AnswerResponse {
                acknowledgment: self.response_text(),
                report: None,
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireEmail {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    summary: Option<String>,
}

#[async_trait]
impl ResearchBackend for HttpBackend {
    async fn create_session(&self, title: &str) -> Result<SessionSummary, BackendError> {
        let envelope: ChatEnvelope = self
            .post("/api/chats", json!({ "title": title }), "create chat")
            .await
            .map_err(|e| match e {
                BackendError::Http {
                    status: 403,
                    message,
                } => BackendError::QuotaExceeded { message },
                other => other,
            })?;
        Ok(envelope.chat.into())
    }

    async fn list_sessions(&self) -> Result<Vec<SessionSummary>, BackendError> {
        let envelope: ChatsEnvelope = self.get("/api/chats", "list chats").await?;
        Ok(envelope.chats.into_iter().map(Into::into).collect())
    }

    async fn session_quota(&self) -> Result<SessionQuota, BackendError> {
        let count: WireChatCount = self.get("/api/user/chat-count", "chat count").await?;
        Ok(SessionQuota {
            today_count: count.today_count,
            max_sessions: count.max_chats,
            is_premium: count.is_premium,
        })
    }

    async fn generate_questions(
        &self,
        session: &SessionId,
        topic: &str,
    ) -> Result<TopicResponse, BackendError> {
        let reply: WireResearchReply = self
            .post(
                &format!("/api/chats/{}/research-topic", session),
                json!({ "message": topic }),
                "research topic",
            )
            .await?;
        Ok(reply.into_topic_response())
    }

    async fn submit_answer(
        &self,
        session: &SessionId,
        submission: &AnswerSubmission,
    ) -> Result<AnswerResponse, BackendError> {
        let body = json!({
            "message": submission.answer(),
            "questionIndex": submission.answer_index,
            "totalQuestions": submission.questions.len(),
            "originalTopic": submission.topic,
            "questions": submission.questions,
            "answers": submission.answers,
        });
        let reply: WireResearchReply = self
            .post(
                &format!("/api/chats/{}/clarification-answer", session),
                body,
                "clarification answer",
            )
            .await?;
        Ok(reply.into_answer_response())
    }

    async fn poll_report(&self, session: &SessionId) -> Result<ReportSnapshot, BackendError> {
        let messages: MessagesEnvelope = self
            .get(&format!("/api/chats/{}/messages", session), "chat messages")
            .await?;
        let info: ChatEnvelope = self
            .get(&format!("/api/chats/{}", session), "chat info")
            .await?;

        Ok(ReportSnapshot {
            messages: messages
                .messages
                .into_iter()
                .map(|m| {
                    Message::stored(m.id.into_string(), m.content.unwrap_or_default(), m.is_user)
                })
                .collect(),
            is_completed: info.chat.is_completed.unwrap_or(false),
            has_error: info.chat.has_error.unwrap_or(false),
        })
    }

    async fn send_report_by_email(
        &self,
        session: &SessionId,
    ) -> Result<EmailReceipt, BackendError> {
        let receipt: WireEmail = self
            .post(
                &format!("/api/chats/{}/send-email", session),
                json!({}),
                "send email",
            )
            .await?;
        Ok(EmailReceipt {
            success: receipt.success,
            summary: receipt.summary,
        })
    }
}
