//! Per-user conversation state for LearnPath.
//!
//! Each user owns one ordered history of turns. Access goes through a
//! [`Session`]: an exclusive checkout of that user's history that edits a
//! working copy and only writes it back on [`Session::commit`]. Long
//! histories are compacted by summarizing their oldest turns without ever
//! separating a tool call from its result.

pub mod compaction;
pub mod store;
pub mod summarizer;

pub use compaction::{CompactionPolicy, CompactionReport, SUMMARY_PLACEHOLDER, SUMMARY_PREFIX};
pub use store::{ConversationStore, Session};
pub use summarizer::{ProviderSummarizer, Summarizer};
