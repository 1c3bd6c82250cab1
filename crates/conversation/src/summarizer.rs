//! Summarization of a history prefix.

use std::sync::Arc;

use async_trait::async_trait;
use learnpath_core::error::SummarizationError;
use learnpath_core::message::Turn;
use learnpath_core::provider::{Provider, ProviderRequest};
use tracing::debug;

const SUMMARY_DIRECTIVE: &str = "Please provide a concise summary of the following conversation:";

/// Produces the text that replaces a compacted prefix.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, turns: &[Turn]) -> Result<String, SummarizationError>;
}

/// Summarizes with one call to the language model.
pub struct ProviderSummarizer {
    provider: Arc<dyn Provider>,
    model: String,
    max_tokens: u32,
}

impl ProviderSummarizer {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            provider,
            model: model.into(),
            max_tokens,
        }
    }

    /// The single user turn sent to the model.
    fn prompt(turns: &[Turn]) -> String {
        let transcript = turns
            .iter()
            .map(Turn::flatten)
            .collect::<Vec<_>>()
            .join("\n");
        format!("{SUMMARY_DIRECTIVE}\n\n{transcript}")
    }
}

#[async_trait]
impl Summarizer for ProviderSummarizer {
    async fn summarize(&self, turns: &[Turn]) -> Result<String, SummarizationError> {
        let request = ProviderRequest::new(
            self.model.clone(),
            vec![Turn::user(Self::prompt(turns))],
            self.max_tokens,
        );

        let response = self.provider.complete(request).await?;
        let summary = response.turn.texts().concat();
        let summary = summary.trim();
        debug!(turns = turns.len(), chars = summary.len(), "Summarized history prefix");

        if summary.is_empty() {
            return Err(SummarizationError::Empty);
        }
        Ok(summary.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use learnpath_core::error::ProviderError;
    use learnpath_core::provider::ProviderResponse;
    use std::sync::Mutex;

    /// Replies with a fixed text and records the prompt it was given.
    struct EchoProvider {
        reply: String,
        seen: Mutex<Vec<ProviderRequest>>,
    }

    #[async_trait]
    impl Provider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }

        async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            self.seen.lock().unwrap().push(request);
            Ok(ProviderResponse {
                turn: Turn::assistant(self.reply.clone()),
                usage: None,
                model: "echo".into(),
                stop_reason: Some("end_turn".into()),
            })
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl Provider for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }

        async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            Err(ProviderError::Network("connection reset".into()))
        }
    }

    #[tokio::test]
    async fn prompt_flattens_turns_and_uses_small_budget() {
        let provider = Arc::new(EchoProvider {
            reply: "  User studied graphs.  ".into(),
            seen: Mutex::new(Vec::new()),
        });
        let summarizer = ProviderSummarizer::new(provider.clone(), "claude-sonnet-4-20250514", 500);

        let summary = summarizer
            .summarize(&[Turn::user("I did BFS today"), Turn::assistant("Nice work!")])
            .await
            .unwrap();
        assert_eq!(summary, "User studied graphs.");

        let seen = provider.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].max_tokens, 500);
        assert!(seen[0].tools.is_empty());
        assert_eq!(
            seen[0].turns[0].texts(),
            vec![
                "Please provide a concise summary of the following conversation:\n\n\
                 User: I did BFS today\nAssistant: Nice work!"
            ]
        );
    }

    #[tokio::test]
    async fn blank_reply_is_empty_error() {
        let provider = Arc::new(EchoProvider {
            reply: "   ".into(),
            seen: Mutex::new(Vec::new()),
        });
        let summarizer = ProviderSummarizer::new(provider, "m", 500);
        let err = summarizer.summarize(&[Turn::user("x")]).await.unwrap_err();
        assert!(matches!(err, SummarizationError::Empty));
    }

    #[tokio::test]
    async fn model_failure_is_reported() {
        let summarizer = ProviderSummarizer::new(Arc::new(FailingProvider), "m", 500);
        let err = summarizer.summarize(&[Turn::user("x")]).await.unwrap_err();
        assert!(matches!(err, SummarizationError::Model(ProviderError::Network(_))));
    }
}
