//! Report producers and result-tag detection.
//!
//! A producer's result is recognized solely by the leading marker of a
//! non-user, non-placeholder message. There is no completion callback.

use crate::config::ProducerConfig;
use crate::types::{Message, MessageOrigin, local_id};

/// An ordered set of report producers.
#[derive(Debug, Clone)]
pub struct ProducerSet {
    producers: Vec<ProducerConfig>,
}

impl ProducerSet {
    pub fn new(producers: Vec<ProducerConfig>) -> Self {
        Self { producers }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProducerConfig> {
        self.producers.iter()
    }

    pub fn len(&self) -> usize {
        self.producers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.producers.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&ProducerConfig> {
        self.producers.iter().find(|p| p.id == id)
    }

    /// The producer whose result this message is, if any.
    pub fn tag_of(&self, message: &Message) -> Option<&ProducerConfig> {
        if message.is_user || message.origin == MessageOrigin::LocalPlaceholder {
            return None;
        }
        self.producers
            .iter()
            .find(|p| message.text.starts_with(p.marker.as_str()))
    }

    /// Per-producer arrival flags, in producer order.
    pub fn presence<'a>(&self, messages: impl IntoIterator<Item = &'a Message>) -> Vec<bool> {
        let mut present = vec![false; self.producers.len()];
        for message in messages {
            if let Some(producer) = self.tag_of(message)
                && let Some(idx) = self.producers.iter().position(|p| p.id == producer.id)
            {
                present[idx] = true;
            }
        }
        present
    }

    /// Producers that deserve a placeholder: not yet arrived, while some producer
    /// earlier in the order already has.
    pub fn pending_after_first_arrival(&self, present: &[bool]) -> Vec<&ProducerConfig> {
        let mut seen_arrival = false;
        let mut pending = Vec::new();
        for (producer, &arrived) in self.producers.iter().zip(present) {
            if arrived {
                seen_arrival = true;
            } else if seen_arrival {
                pending.push(producer);
            }
        }
        pending
    }
}

/// Build the placeholder message standing in for `producer`.
pub fn placeholder_for(producer: &ProducerConfig) -> Message {
    Message {
        id: local_id(&format!("{}-placeholder", producer.id)),
        text: producer.placeholder_text.clone(),
        is_user: false,
        origin: MessageOrigin::LocalPlaceholder,
    }
}
