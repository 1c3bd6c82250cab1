//! Turn and conversation history domain types.
//!
//! These are the value objects that flow through the whole system:
//! a user sends a message → the store appends a [`Turn`] → the orchestrator
//! hands the history to the model → tool calls and their results become
//! further turns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::tool::{ToolInvocation, ToolInvocationResult};

/// Identifier of an end user. Matches the integer ids of the persistence layer.
pub type UserId = i64;

/// The role of a turn's author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user (also carries directives and tool results)
    User,
    /// The language model
    Assistant,
}

/// A typed fragment of a turn's payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ToolInvocation(ToolInvocation),
    ToolResult(ToolInvocationResult),
}

/// A turn's payload: plain text or an ordered list of blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// One dialogue step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,

    pub content: Content,

    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    /// A plain-text user turn.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Content::Text(text.into()),
            timestamp: Utc::now(),
        }
    }

    /// A plain-text assistant turn.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Content::Text(text.into()),
            timestamp: Utc::now(),
        }
    }

    /// An assistant turn made of content blocks, as returned by the model.
    pub fn assistant_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content: Content::Blocks(blocks),
            timestamp: Utc::now(),
        }
    }

    /// A user turn batching every tool result of one round.
    pub fn tool_results(results: Vec<ToolInvocationResult>) -> Self {
        Self {
            role: Role::User,
            content: Content::Blocks(results.into_iter().map(ContentBlock::ToolResult).collect()),
            timestamp: Utc::now(),
        }
    }

    /// Every text fragment in this turn, in order.
    pub fn texts(&self) -> Vec<&str> {
        match &self.content {
            Content::Text(text) => vec![text.as_str()],
            Content::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect(),
        }
    }

    /// Tool invocations requested in this turn.
    pub fn tool_invocations(&self) -> Vec<&ToolInvocation> {
        match &self.content {
            Content::Text(_) => Vec::new(),
            Content::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolInvocation(inv) => Some(inv),
                    _ => None,
                })
                .collect(),
        }
    }

    /// Tool results carried by this turn.
    pub fn tool_results_in(&self) -> Vec<&ToolInvocationResult> {
        match &self.content {
            Content::Text(_) => Vec::new(),
            Content::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolResult(res) => Some(res),
                    _ => None,
                })
                .collect(),
        }
    }

    pub fn has_tool_invocations(&self) -> bool {
        self.role == Role::Assistant && !self.tool_invocations().is_empty()
    }

    /// Render as one `"User: ..."` / `"Assistant: ..."` line for summarization.
    ///
    /// Block content is rendered as JSON so tool traffic stays visible to
    /// the summarizer.
    pub fn flatten(&self) -> String {
        let speaker = match self.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
        };
        let body = match &self.content {
            Content::Text(text) => text.clone(),
            Content::Blocks(blocks) => {
                serde_json::to_string(blocks).unwrap_or_else(|_| self.texts().join(" "))
            }
        };
        format!("{speaker}: {body}")
    }
}

/// A broken tool call/result pairing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingViolation {
    /// An invocation with no matching result in the following turn.
    MissingResult { turn: usize, id: String },
    /// A result whose invocation is not in the preceding assistant turn.
    OrphanResult { turn: usize, id: String },
    /// More than one result for the same invocation.
    DuplicateResult { turn: usize, id: String },
}

/// Check the call/result pairing invariant over a sequence of turns.
///
/// Every `tool_invocation` in an assistant turn must be answered by exactly
/// one `tool_result` with the same id in the very next turn, and every
/// `tool_result` must answer an invocation of the turn right before it.
pub fn pairing_violations(turns: &[Turn]) -> Vec<PairingViolation> {
    let mut violations = Vec::new();

    for (index, turn) in turns.iter().enumerate() {
        let results = turn.tool_results_in();
        if !results.is_empty() {
            let expected: Vec<&str> = match index.checked_sub(1).map(|i| &turns[i]) {
                Some(prev) if prev.role == Role::Assistant => {
                    prev.tool_invocations().iter().map(|i| i.id.as_str()).collect()
                }
                _ => Vec::new(),
            };
            let mut seen: HashMap<&str, usize> = HashMap::new();
            for result in &results {
                let id = result.tool_invocation_id.as_str();
                if !expected.contains(&id) {
                    violations.push(PairingViolation::OrphanResult {
                        turn: index,
                        id: id.to_string(),
                    });
                }
                let count = seen.entry(id).or_default();
                *count += 1;
                if *count == 2 {
                    violations.push(PairingViolation::DuplicateResult {
                        turn: index,
                        id: id.to_string(),
                    });
                }
            }
        }

        if turn.role == Role::Assistant {
            let answered: Vec<&str> = turns
                .get(index + 1)
                .map(|next| {
                    next.tool_results_in()
                        .iter()
                        .map(|r| r.tool_invocation_id.as_str())
                        .collect()
                })
                .unwrap_or_default();
            for invocation in turn.tool_invocations() {
                if !answered.contains(&invocation.id.as_str()) {
                    violations.push(PairingViolation::MissingResult {
                        turn: index,
                        id: invocation.id.clone(),
                    });
                }
            }
        }
    }

    violations
}

/// The ordered dialogue of one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationHistory {
    pub user_id: UserId,

    pub turns: Vec<Turn>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl ConversationHistory {
    /// Create an empty history for a user.
    pub fn new(user_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            turns: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a turn.
    pub fn push(&mut self, turn: Turn) {
        self.updated_at = Utc::now();
        self.turns.push(turn);
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Get the total token count estimate (rough: 4 chars ≈ 1 token).
    pub fn estimated_tokens(&self) -> usize {
        self.turns.iter().map(|t| t.flatten().len() / 4).sum()
    }
}
