//! Turn orchestrator.
//!
//! Runs the model/tool loop for one user message against that user's
//! history, and the stateless variant used by the batch agent.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use learnpath_config::AppConfig;
use learnpath_conversation::ConversationStore;
use learnpath_core::error::{Error, ProviderError, ToolError};
use learnpath_core::event::{DomainEvent, EventBus};
use learnpath_core::message::{Turn, UserId};
use learnpath_core::provider::{Provider, ProviderRequest, ProviderResponse};
use learnpath_core::tool::{ToolDescriptor, ToolGateway, ToolInvocation, ToolInvocationResult};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Knobs for the model/tool loop.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    /// Tool rounds allowed before the loop gives up.
    pub max_rounds: u32,
    pub model_timeout: Duration,
    pub tool_timeout: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for OrchestratorSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            model: config.model.name.clone(),
            max_tokens: config.model.max_tokens,
            temperature: config.model.temperature,
            max_rounds: config.orchestrator.max_rounds,
            model_timeout: Duration::from_secs(config.orchestrator.model_timeout_secs),
            tool_timeout: Duration::from_secs(config.orchestrator.tool_timeout_secs),
        }
    }
}

/// What one run of the loop produced.
struct LoopOutcome {
    /// Non-empty text blocks from every round, in order.
    texts: Vec<String>,
    /// Text of the round that ended the loop.
    final_text: String,
    rounds: u32,
    tokens_used: u32,
    model: String,
}

/// Drives the model/tool loop over the conversation store.
pub struct TurnOrchestrator {
    provider: Arc<dyn Provider>,
    gateway: Arc<dyn ToolGateway>,
    store: Arc<ConversationStore>,
    settings: OrchestratorSettings,
    event_bus: Arc<EventBus>,
}

impl TurnOrchestrator {
    pub fn new(
        provider: Arc<dyn Provider>,
        gateway: Arc<dyn ToolGateway>,
        store: Arc<ConversationStore>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            provider,
            gateway,
            store,
            settings: OrchestratorSettings::default(),
            event_bus,
        }
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.settings.max_rounds = max_rounds;
        self
    }

    pub fn with_timeouts(mut self, model: Duration, tool: Duration) -> Self {
        self.settings.model_timeout = model;
        self.settings.tool_timeout = tool;
        self
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn gateway(&self) -> &Arc<dyn ToolGateway> {
        &self.gateway
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Answer one user message.
    ///
    /// Returns every text block the model produced across all rounds,
    /// joined with newlines. The user's history is only updated when this
    /// returns `Ok`.
    pub async fn process_message(&self, user_id: UserId, text: &str) -> Result<String, Error> {
        info!(user_id, "Processing message");
        self.event_bus.publish(DomainEvent::MessageReceived {
            user_id,
            content_preview: text.chars().take(80).collect(),
            timestamp: Utc::now(),
        });

        let mut session = self.store.session(user_id).await;
        session.append(Turn::user(text));
        session.compact_if_needed().await;

        match self.run_loop(user_id, session.turns_mut()).await {
            Ok(outcome) => {
                session.commit();
                self.publish_response(user_id, &outcome);
                Ok(outcome.texts.join("\n"))
            }
            Err(e) => {
                // Dropping the uncommitted session leaves the history as it was
                drop(session);
                warn!(user_id, error = %e, "Message processing failed");
                self.event_bus.publish(DomainEvent::ErrorOccurred {
                    context: format!("process_message user={user_id}"),
                    error_message: e.to_string(),
                    timestamp: Utc::now(),
                });
                Err(e)
            }
        }
    }

    /// Run `directive` as a one-off request on behalf of `user_id`.
    ///
    /// Uses a fresh single-turn history and never touches the stored one,
    /// but still waits for the user's in-flight requests. Returns the text of
    /// the final round.
    pub async fn run_directive(&self, user_id: UserId, directive: &str) -> Result<String, Error> {
        let _session = self.store.session(user_id).await;
        debug!(user_id, "Running directive");

        let mut turns = vec![Turn::user(directive)];
        let outcome = self.run_loop(user_id, &mut turns).await?;
        self.publish_response(user_id, &outcome);

        if outcome.final_text.is_empty() {
            Ok(outcome.texts.last().cloned().unwrap_or_default())
        } else {
            Ok(outcome.final_text)
        }
    }

    /// Discard a user's history.
    pub async fn reset(&self, user_id: UserId) {
        self.store.reset(user_id).await;
    }

    /// The model/tool loop. Appends every model and tool-result turn to `turns`.
    ///
    /// The model is called at most `max_rounds + 1` times. If it still asks
    /// for tools after `max_rounds` executed rounds the loop fails with
    /// [`Error::LoopLimitExceeded`].
    async fn run_loop(&self, user_id: UserId, turns: &mut Vec<Turn>) -> Result<LoopOutcome, Error> {
        let tools = self.gateway.list_tools()?;
        let mut texts = Vec::new();
        let mut rounds = 0u32;
        let mut tokens_used = 0u32;

        loop {
            let response = self.generate(turns, &tools).await?;
            if let Some(usage) = &response.usage {
                tokens_used += usage.total();
            }

            let round_texts: Vec<String> = response
                .turn
                .texts()
                .into_iter()
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect();
            texts.extend(round_texts.iter().cloned());

            let invocations: Vec<ToolInvocation> = response
                .turn
                .tool_invocations()
                .into_iter()
                .cloned()
                .collect();

            if invocations.is_empty() && round_texts.is_empty() {
                // An empty assistant turn would be rejected on every later request
                warn!(user_id, round = rounds, "Model returned an empty reply, not recording it");
            } else {
                turns.push(response.turn);
            }

            if invocations.is_empty() {
                return Ok(LoopOutcome {
                    texts,
                    final_text: round_texts.join("\n"),
                    rounds,
                    tokens_used,
                    model: response.model,
                });
            }

            if rounds >= self.settings.max_rounds {
                warn!(
                    user_id,
                    max_rounds = self.settings.max_rounds,
                    "Tool loop did not converge"
                );
                return Err(Error::LoopLimitExceeded {
                    rounds: self.settings.max_rounds,
                });
            }
            rounds += 1;

            debug!(user_id, round = rounds, tool_count = invocations.len(), "Executing tool round");
            let mut results = Vec::with_capacity(invocations.len());
            for invocation in &invocations {
                results.push(self.execute(user_id, invocation).await);
            }
            turns.push(Turn::tool_results(results));
        }
    }

    async fn generate(
        &self,
        turns: &[Turn],
        tools: &[ToolDescriptor],
    ) -> Result<ProviderResponse, Error> {
        let request = ProviderRequest {
            model: self.settings.model.clone(),
            turns: turns.to_vec(),
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
            tools: tools.to_vec(),
        };

        match tokio::time::timeout(self.settings.model_timeout, self.provider.complete(request)).await
        {
            Ok(response) => Ok(response?),
            Err(_) => Err(ProviderError::Timeout(format!(
                "no response within {}s",
                self.settings.model_timeout.as_secs()
            ))
            .into()),
        }
    }

    /// Execute one invocation. Never fails: every problem becomes an error result.
    async fn execute(&self, user_id: UserId, invocation: &ToolInvocation) -> ToolInvocationResult {
        let mut call = invocation.clone();
        match &mut call.arguments {
            Value::Object(map) => {
                map.insert("userId".into(), Value::from(user_id));
            }
            Value::Null => call.arguments = serde_json::json!({ "userId": user_id }),
            // Left as-is; schema validation rejects it
            _ => {}
        }

        let start = Instant::now();
        let result =
            match tokio::time::timeout(self.settings.tool_timeout, self.gateway.call_tool(&call))
                .await
            {
                Ok(result) => result,
                Err(_) => ToolInvocationResult::from_error(
                    &call.id,
                    &ToolError::Timeout {
                        tool_name: call.name.clone(),
                        timeout_secs: self.settings.tool_timeout.as_secs(),
                    },
                ),
            };
        let duration_ms = start.elapsed().as_millis() as u64;

        if result.is_error {
            warn!(user_id, tool = %call.name, duration_ms, "Tool call failed");
        } else {
            debug!(user_id, tool = %call.name, duration_ms, "Tool call succeeded");
        }
        self.event_bus.publish(DomainEvent::ToolExecuted {
            user_id,
            tool_name: call.name.clone(),
            success: !result.is_error,
            duration_ms,
            timestamp: Utc::now(),
        });

        result
    }

    fn publish_response(&self, user_id: UserId, outcome: &LoopOutcome) {
        info!(
            user_id,
            rounds = outcome.rounds,
            tokens = outcome.tokens_used,
            "Response generated"
        );
        self.event_bus.publish(DomainEvent::ResponseGenerated {
            user_id,
            model: outcome.model.clone(),
            rounds: outcome.rounds,
            tokens_used: outcome.tokens_used,
            timestamp: Utc::now(),
        });
    }
}
