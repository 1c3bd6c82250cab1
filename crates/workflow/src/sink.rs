//! Where batch summaries go.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use learnpath_core::message::UserId;
use serde::{Deserialize, Serialize};
use tracing::info;

/// One user's output from a batch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub user_id: UserId,
    pub summary: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
}

/// Receives every successful per-user summary.
#[async_trait]
pub trait SummarySink: Send + Sync {
    async fn deliver(&self, summary: &BatchSummary);
}

/// Writes summaries to the log.
pub struct LogSink;

#[async_trait]
impl SummarySink for LogSink {
    async fn deliver(&self, summary: &BatchSummary) {
        info!(
            user_id = summary.user_id,
            chars = summary.summary.len(),
            "Weekly summary generated:\n{}",
            summary.summary
        );
    }
}

/// Keeps the most recent summary per user, for `GET /api/summaries/{userId}`.
#[derive(Default)]
pub struct LatestSummaries {
    by_user: RwLock<HashMap<UserId, BatchSummary>>,
}

impl LatestSummaries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, user_id: UserId) -> Option<BatchSummary> {
        let map = match self.by_user.read() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.get(&user_id).cloned()
    }

    pub fn len(&self) -> usize {
        match self.by_user.read() {
            Ok(map) => map.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SummarySink for LatestSummaries {
    async fn deliver(&self, summary: &BatchSummary) {
        let mut map = match self.by_user.write() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.insert(summary.user_id, summary.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(user_id: UserId, text: &str) -> BatchSummary {
        let now = Utc::now();
        BatchSummary {
            user_id,
            summary: text.into(),
            start_date: now - chrono::Duration::days(7),
            end_date: now,
            generated_at: now,
        }
    }

    #[tokio::test]
    async fn latest_summary_replaces_previous() {
        let sink = LatestSummaries::new();
        assert!(sink.get(1).is_none());

        sink.deliver(&summary(1, "week one")).await;
        sink.deliver(&summary(1, "week two")).await;
        sink.deliver(&summary(2, "other user")).await;

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.get(1).unwrap().summary, "week two");
    }

    #[test]
    fn summary_serializes_camel_case() {
        let json = serde_json::to_value(summary(5, "ok")).unwrap();
        assert_eq!(json["userId"], 5);
        assert!(json.get("startDate").is_some());
        assert!(json.get("generatedAt").is_some());
    }
}
