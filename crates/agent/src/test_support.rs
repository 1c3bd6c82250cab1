//! Scripted providers and stub gateways for tests.
//!
//! Compiled for this crate's own tests and, behind the `test-support`
//! feature, for downstream crates (gateway, workflow, CLI end-to-end tests).

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use learnpath_conversation::Summarizer;
use learnpath_core::error::{ConnectionError, ProviderError, SummarizationError};
use learnpath_core::message::{ContentBlock, Role, Turn};
use learnpath_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use learnpath_core::tool::{ToolDescriptor, ToolGateway, ToolInvocation, ToolInvocationResult};
use serde_json::Value;

/// A provider that returns a sequence of scripted responses.
///
/// Each call to `complete` returns the next entry and records the request.
/// Once the script runs out every call fails with `InvalidResponse`.
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<Result<ProviderResponse, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<ProviderResponse>) -> Self {
        Self::with_results(responses.into_iter().map(Ok).collect())
    }

    pub fn with_results(responses: Vec<Result<ProviderResponse, ProviderError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A provider that returns a single text response.
    pub fn single_text(text: &str) -> Self {
        Self::new(vec![text_response(text)])
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        self.responses.lock().unwrap().pop_front().unwrap_or_else(|| {
            Err(ProviderError::InvalidResponse(
                "scripted provider ran out of responses".into(),
            ))
        })
    }
}

/// A provider that asks for one more tool call, forever.
#[derive(Default)]
pub struct LoopingProvider {
    calls: AtomicUsize,
}

impl LoopingProvider {
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for LoopingProvider {
    fn name(&self) -> &str {
        "looping"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let mut invocation = make_invocation("getAllDomainsofUser", serde_json::json!({}));
        invocation.id = format!("call_loop_{n}");
        Ok(tool_call_response(vec![invocation], "Checking again"))
    }
}

/// Replies `"echo: <last user text>"` to any request.
pub struct EchoProvider {
    delay: Duration,
}

impl EchoProvider {
    pub fn new() -> Self {
        Self {
            delay: Duration::ZERO,
        }
    }

    /// Sleep before answering, to let concurrent requests interleave.
    pub fn with_delay(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for EchoProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for EchoProvider {
    fn name(&self) -> &str {
        "echo"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let last = request
            .turns
            .iter()
            .rev()
            .find(|t| t.role == Role::User && !t.texts().is_empty())
            .map(|t| t.texts().concat())
            .unwrap_or_default();
        Ok(text_response(&format!("echo: {last}")))
    }
}

/// Create a simple text response (no tool calls).
pub fn text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        turn: Turn::assistant_blocks(vec![ContentBlock::Text { text: text.into() }]),
        usage: Some(Usage {
            input_tokens: 10,
            output_tokens: 5,
        }),
        model: "mock-model".into(),
        stop_reason: Some("end_turn".into()),
    }
}

/// Create a response with tool invocations and optional thought text.
pub fn tool_call_response(invocations: Vec<ToolInvocation>, thought: &str) -> ProviderResponse {
    let mut blocks = Vec::new();
    if !thought.is_empty() {
        blocks.push(ContentBlock::Text {
            text: thought.into(),
        });
    }
    blocks.extend(invocations.into_iter().map(ContentBlock::ToolInvocation));
    ProviderResponse {
        turn: Turn::assistant_blocks(blocks),
        usage: Some(Usage {
            input_tokens: 10,
            output_tokens: 5,
        }),
        model: "mock-model".into(),
        stop_reason: Some("tool_use".into()),
    }
}

/// Helper to create a tool invocation with id `call_<name>`.
pub fn make_invocation(name: &str, arguments: Value) -> ToolInvocation {
    ToolInvocation {
        id: format!("call_{name}"),
        name: name.to_string(),
        arguments,
    }
}

/// A descriptor whose schema only requires a numeric `userId`.
pub fn descriptor(name: &str) -> ToolDescriptor {
    ToolDescriptor {
        name: name.into(),
        description: format!("{name} (stub)"),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": { "userId": { "type": "number" } },
            "required": ["userId"]
        }),
    }
}

/// An in-memory [`ToolGateway`] with canned replies.
pub struct StubGateway {
    tools: Vec<ToolDescriptor>,
    replies: HashMap<String, Result<String, String>>,
    delay: Duration,
    connected: AtomicBool,
    calls: Mutex<Vec<ToolInvocation>>,
}

impl StubGateway {
    /// A connected gateway advertising `tools`.
    pub fn new(tools: Vec<ToolDescriptor>) -> Self {
        Self {
            tools,
            replies: HashMap::new(),
            delay: Duration::ZERO,
            connected: AtomicBool::new(true),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// A gateway whose `connect()` has never succeeded.
    pub fn disconnected() -> Self {
        let gateway = Self::new(Vec::new());
        gateway.connected.store(false, Ordering::SeqCst);
        gateway
    }

    pub fn with_reply(mut self, tool: &str, text: &str) -> Self {
        self.replies.insert(tool.into(), Ok(text.into()));
        self
    }

    pub fn with_failure(mut self, tool: &str, text: &str) -> Self {
        self.replies.insert(tool.into(), Err(text.into()));
        self
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Every invocation received, as sent (after argument injection).
    pub fn calls(&self) -> Vec<ToolInvocation> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolGateway for StubGateway {
    fn name(&self) -> &str {
        "stub"
    }

    async fn connect(&self) -> Result<(), ConnectionError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ConnectionError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(self.tools.clone())
        } else {
            Err(ConnectionError::NotConnected)
        }
    }

    async fn call_tool(&self, invocation: &ToolInvocation) -> ToolInvocationResult {
        self.calls.lock().unwrap().push(invocation.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.replies.get(&invocation.name) {
            Some(Ok(text)) => ToolInvocationResult::success(&invocation.id, text),
            Some(Err(text)) => ToolInvocationResult::error(&invocation.id, text),
            None => ToolInvocationResult::error(
                &invocation.id,
                format!("Error: Tool not found: {}", invocation.name),
            ),
        }
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

/// A summarizer with a fixed answer.
pub struct StaticSummarizer(pub String);

#[async_trait]
impl Summarizer for StaticSummarizer {
    async fn summarize(&self, _turns: &[Turn]) -> Result<String, SummarizationError> {
        Ok(self.0.clone())
    }
}
