//! Result synchronizer.
//!
//! Reconciles one poll snapshot against the client log: detects which producers
//! have reported, keeps exactly one placeholder per outstanding producer, and
//! reads the store's terminal flags.

use super::merger::MessageLog;
use crate::backend::ReportSnapshot;
use crate::producer::{ProducerSet, placeholder_for};
use tracing::debug;

/// What the store says about report generation after a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollVerdict {
    /// Neither flag is set; keep polling.
    Pending,
    /// `is_completed` is set.
    Completed,
    /// `has_error` is set. Takes precedence over `is_completed`.
    Failed,
}

impl PollVerdict {
    pub fn from_flags(is_completed: bool, has_error: bool) -> Self {
        if has_error {
            PollVerdict::Failed
        } else if is_completed {
            PollVerdict::Completed
        } else {
            PollVerdict::Pending
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PollVerdict::Pending)
    }
}

/// Placeholder bookkeeping performed by one refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaceholderChange {
    pub inserted: Vec<String>,
    pub removed: Vec<String>,
}

impl PlaceholderChange {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.removed.is_empty()
    }
}

/// Detects producer arrivals and maintains placeholders.
#[derive(Debug, Clone)]
pub struct ResultSynchronizer {
    producers: ProducerSet,
}

impl ResultSynchronizer {
    pub fn new(producers: ProducerSet) -> Self {
        Self { producers }
    }

    pub fn producers(&self) -> &ProducerSet {
        &self.producers
    }

    /// Which producers have a real result in the log, in producer order.
    pub fn presence(&self, log: &MessageLog) -> Vec<bool> {
        self.producers.presence(log.real_messages())
    }

    /// Bring placeholders in line with the messages currently in the log.
    pub fn refresh_placeholders(&self, log: &mut MessageLog) -> PlaceholderChange {
        let present = self.presence(log);
        let mut change = PlaceholderChange::default();

        for (producer, &arrived) in self.producers.iter().zip(&present) {
            if arrived && log.remove_placeholder(&producer.id) {
                debug!(
                    producer = %producer.display_name,
                    "Producer result arrived, placeholder removed"
                );
                change.removed.push(producer.id.clone());
            }
        }

        for producer in self.producers.pending_after_first_arrival(&present) {
            if log.ensure_placeholder(&producer.id, placeholder_for(producer)) {
                debug!(
                    producer = %producer.display_name,
                    "Producer result outstanding, placeholder added"
                );
                change.inserted.push(producer.id.clone());
            }
        }

        change
    }

    /// Merge a poll snapshot issued at log revision `fetched_at` and report the
    /// store's verdict.
    pub fn reconcile(
        &self,
        log: &mut MessageLog,
        snapshot: ReportSnapshot,
        fetched_at: u64,
    ) -> PollVerdict {
        log.apply_fetch(snapshot.messages, fetched_at);
        self.refresh_placeholders(log);
        PollVerdict::from_flags(snapshot.is_completed, snapshot.has_error)
    }
}
