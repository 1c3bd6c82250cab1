//! History compaction.
//!
//! When a history grows past the threshold, its oldest turns are replaced by
//! one synthetic user turn carrying a summary. The split point never
//! separates a tool invocation from its result.

use std::sync::Arc;

use chrono::Utc;
use learnpath_core::event::{DomainEvent, EventBus};
use learnpath_core::message::{Role, Turn, UserId};
use tracing::{info, warn};

use crate::summarizer::Summarizer;

pub const SUMMARY_PREFIX: &str = "[Previous conversation summary]: ";

/// Used when the summarizer fails or returns nothing.
pub const SUMMARY_PLACEHOLDER: &str = "Previous conversation summary.";

/// What a compaction pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionReport {
    /// Turns folded into the summary.
    pub turns_removed: usize,
    /// Whether the placeholder stood in for a real summary.
    pub used_placeholder: bool,
}

/// Compaction policy and the summarizer it calls.
pub struct CompactionPolicy {
    threshold: usize,
    summarizer: Arc<dyn Summarizer>,
    events: Option<Arc<EventBus>>,
}

impl CompactionPolicy {
    pub fn new(threshold: usize, summarizer: Arc<dyn Summarizer>) -> Self {
        Self {
            threshold,
            summarizer,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Where to split `turns`, or `None` when nothing should be compacted.
    ///
    /// The default split is `threshold`. If the turn right before it is an
    /// assistant turn with tool invocations, the split moves forward by one
    /// so the paired results land in the summarized prefix. A split that
    /// would leave nothing to retain is skipped.
    pub fn split_point(&self, turns: &[Turn]) -> Option<usize> {
        if turns.len() <= self.threshold || self.threshold == 0 {
            return None;
        }

        let mut split = self.threshold;
        let boundary = &turns[split - 1];
        if boundary.role == Role::Assistant && boundary.has_tool_invocations() {
            split += 1;
        }

        (split < turns.len()).then_some(split)
    }

    /// Compact `turns` in place if they exceed the threshold.
    ///
    /// Never fails: a summarizer error is logged and the placeholder is used.
    pub async fn compact(&self, user_id: UserId, turns: &mut Vec<Turn>) -> Option<CompactionReport> {
        let split = self.split_point(turns)?;

        let (summary, used_placeholder) = match self.summarizer.summarize(&turns[..split]).await {
            Ok(summary) => (summary, false),
            Err(e) => {
                warn!(user_id, error = %e, "Summarization failed, using placeholder");
                (SUMMARY_PLACEHOLDER.to_string(), true)
            }
        };

        let retained = turns.split_off(split);
        turns.clear();
        turns.push(Turn::user(format!("{SUMMARY_PREFIX}{summary}")));
        turns.extend(retained);

        info!(
            user_id,
            turns_removed = split,
            retained = turns.len() - 1,
            used_placeholder,
            "Compacted conversation history"
        );

        if let Some(events) = &self.events {
            events.publish(DomainEvent::HistoryCompacted {
                user_id,
                turns_removed: split,
                used_placeholder,
                timestamp: Utc::now(),
            });
        }

        Some(CompactionReport {
            turns_removed: split,
            used_placeholder,
        })
    }
}
