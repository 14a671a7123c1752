//! Message log merger.
//!
//! Combines the last authoritative fetch with local echoes and placeholders.
//! The merged view is authoritative messages in fetch order, then echoes the
//! store has not confirmed yet, then placeholders.

use crate::producer::ProducerSet;
use crate::types::Message;
use serde::{Deserialize, Serialize};

/// A locally echoed message waiting for the store to confirm it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Echo {
    message: Message,
    revision: u64,
}

/// A placeholder standing in for a producer whose result has not arrived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placeholder {
    pub producer_id: String,
    pub message: Message,
}

/// The client's view of one session's conversation log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageLog {
    authoritative: Vec<Message>,
    echoes: Vec<Echo>,
    placeholders: Vec<Placeholder>,
    revision: u64,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current revision; capture this when issuing a fetch.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Mark the end of a mutating call. A fetch issued from now on reflects
    /// everything echoed so far.
    pub fn settle(&mut self) {
        self.revision += 1;
    }

    /// Show a message immediately, before the store confirms it.
    pub fn push_echo(&mut self, message: Message) {
        self.echoes.push(Echo {
            message,
            revision: self.revision,
        });
    }

    /// Withdraw an echo whose call never reached the store.
    /// Returns whether an echo was removed.
    pub fn remove_echo(&mut self, id: &str) -> bool {
        let before = self.echoes.len();
        self.echoes.retain(|echo| echo.message.id != id);
        before != self.echoes.len()
    }

    /// Echo backend-produced texts as system messages, in order.
    pub fn extend_echoes(&mut self, texts: impl IntoIterator<Item = String>) {
        for text in texts {
            self.push_echo(Message::system(text));
        }
    }

    /// Replace the authoritative part with a fetch issued at `fetched_at`.
    ///
    /// Echoes created before that revision are superseded by the fetch.
    pub fn apply_fetch(&mut self, messages: Vec<Message>, fetched_at: u64) {
        self.authoritative = messages;
        self.echoes.retain(|echo| echo.revision >= fetched_at);
    }

    pub fn placeholders(&self) -> &[Placeholder] {
        &self.placeholders
    }

    pub fn has_placeholder(&self, producer_id: &str) -> bool {
        self.placeholders.iter().any(|p| p.producer_id == producer_id)
    }

    /// Add a placeholder unless one already exists for this producer.
    /// Returns whether a placeholder was inserted.
    pub fn ensure_placeholder(&mut self, producer_id: &str, message: Message) -> bool {
        if self.has_placeholder(producer_id) {
            return false;
        }
        self.placeholders.push(Placeholder {
            producer_id: producer_id.to_string(),
            message,
        });
        true
    }

    /// Returns whether a placeholder was removed.
    pub fn remove_placeholder(&mut self, producer_id: &str) -> bool {
        let before = self.placeholders.len();
        self.placeholders.retain(|p| p.producer_id != producer_id);
        before != self.placeholders.len()
    }

    /// Non-placeholder messages currently visible: authoritative then echoes.
    pub fn real_messages(&self) -> impl Iterator<Item = &Message> {
        self.authoritative
            .iter()
            .chain(self.echoes.iter().map(|e| &e.message))
    }

    /// The merged view presented to consumers.
    ///
    /// Placeholders whose producer already has a real message are left out even
    /// if the synchronizer has not removed them yet.
    pub fn merged(&self, producers: &ProducerSet) -> Vec<Message> {
        let mut merged: Vec<Message> = self.real_messages().cloned().collect();
        let present = producers.presence(&merged);
        for placeholder in &self.placeholders {
            let superseded = producers
                .iter()
                .zip(&present)
                .any(|(p, &arrived)| arrived && p.id == placeholder.producer_id);
            if !superseded {
                merged.push(placeholder.message.clone());
            }
        }
        merged
    }

    /// Drop everything, e.g. when the active session changes.
    pub fn clear(&mut self) {
        self.authoritative.clear();
        self.echoes.clear();
        self.placeholders.clear();
        self.revision += 1;
    }
}
