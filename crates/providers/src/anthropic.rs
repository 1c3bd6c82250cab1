//! Anthropic native provider implementation.
//!
//! Uses Anthropic's Messages API directly.
//!
//! Features:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - Native tool use with `tool_use` / `tool_result` content blocks
//! - `is_error` on tool results so the model sees failed calls as failures

use async_trait::async_trait;
use learnpath_core::error::ProviderError;
use learnpath_core::message::{Content, ContentBlock as TurnBlock, Role, Turn};
use learnpath_core::provider::*;
use learnpath_core::tool::{ToolDescriptor, ToolInvocation};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Anthropic native Messages API provider.
pub struct AnthropicProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            name: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client: build_client(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
        }
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Override the HTTP client timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = build_client(timeout);
        self
    }

    /// Convert turns to Anthropic API format with content blocks.
    ///
    /// Turns left with no content are omitted; the API rejects them.
    fn to_api_messages(turns: &[Turn]) -> Vec<AnthropicMessage> {
        turns
            .iter()
            .filter_map(|turn| {
                let role = match turn.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                let content = match &turn.content {
                    Content::Text(text) => AnthropicContent::Text(text.clone()),
                    Content::Blocks(blocks) => AnthropicContent::Blocks(
                        blocks
                            .iter()
                            .filter_map(|block| match block {
                                // The API rejects empty text blocks
                                TurnBlock::Text { text } if text.is_empty() => None,
                                TurnBlock::Text { text } => {
                                    Some(ContentBlock::Text { text: text.clone() })
                                }
                                TurnBlock::ToolInvocation(inv) => Some(ContentBlock::ToolUse {
                                    id: inv.id.clone(),
                                    name: inv.name.clone(),
                                    input: inv.arguments.clone(),
                                }),
                                TurnBlock::ToolResult(res) => Some(ContentBlock::ToolResult {
                                    tool_use_id: res.tool_invocation_id.clone(),
                                    content: res.text.clone(),
                                    is_error: res.is_error,
                                }),
                            })
                            .collect(),
                    ),
                };
                let empty = match &content {
                    AnthropicContent::Text(text) => text.is_empty(),
                    AnthropicContent::Blocks(blocks) => blocks.is_empty(),
                };
                if empty {
                    debug!(role, "Skipping turn with no content");
                    return None;
                }
                Some(AnthropicMessage {
                    role: role.into(),
                    content,
                })
            })
            .collect()
    }

    /// Convert tool descriptors to Anthropic format.
    fn to_api_tools(tools: &[ToolDescriptor]) -> Vec<AnthropicTool> {
        tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.input_schema.clone(),
            })
            .collect()
    }

    fn response_to_provider_response(
        resp: AnthropicResponse,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let blocks = resp
            .content
            .into_iter()
            .filter_map(|block| match block {
                ResponseContentBlock::Text { text } => Some(TurnBlock::Text { text }),
                ResponseContentBlock::ToolUse { id, name, input } => {
                    Some(TurnBlock::ToolInvocation(ToolInvocation {
                        id,
                        name,
                        arguments: input,
                    }))
                }
                ResponseContentBlock::Other => None,
            })
            .collect();

        let usage = Some(Usage {
            input_tokens: resp.usage.input_tokens,
            output_tokens: resp.usage.output_tokens,
        });

        Ok(ProviderResponse {
            turn: Turn::assistant_blocks(blocks),
            usage,
            model: resp.model,
            stop_reason: resp.stop_reason,
        })
    }
}

fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

#[async_trait]
impl learnpath_core::Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.turns),
            "max_tokens": request.max_tokens,
        });

        if let Some(temperature) = request.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }

        debug!(
            provider = "anthropic",
            model = %request.model,
            turns = request.turns.len(),
            tools = request.tools.len(),
            "Sending completion request"
        );

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(e.to_string())
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();

        if status == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(5);
            return Err(ProviderError::RateLimited { retry_after_secs });
        }
        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid Anthropic API key".into(),
            ));
        }
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Anthropic API error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let api_resp: AnthropicResponse = response.json().await.map_err(|e| {
            ProviderError::InvalidResponse(format!("Failed to parse Anthropic response: {e}"))
        })?;

        Self::response_to_provider_response(api_resp)
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: AnthropicContent,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum AnthropicContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    model: String,
    content: Vec<ResponseContentBlock>,
    usage: AnthropicUsage,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ResponseContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    /// thinking, redacted_thinking, server tool blocks
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}
