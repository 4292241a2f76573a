//! The reasoning-service client boundary . The reasoning
//! service itself — the thing that decides which tool to call next — is
//! explicitly out of scope ; this module is only the typed
//! contract a workflow uses to talk to it: a prompt plus a tool catalog in,
//! a text reply or a single tool-call request out.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::OpenAiConfig;
use crate::error::{AgentError, AgentResult};

const LLM_DEADLINE: Duration = Duration::from_secs(90);

/// The seam workflows program against, so tests can supply a
/// deterministic fake instead of calling the real reasoning service.
#[async_trait]
pub trait ReasoningClient: Send + Sync {
    async fn next_action(
        &self,
        system_prompt: &str,
        transcript: &[String],
        catalog: &[ToolCatalogEntry],
    ) -> AgentResult<(LlmTurn, TokenUsage)>;
}

/// One entry of the tool catalog handed to the reasoning service: name,
/// description, and the JSON shape of its arguments.
#[derive(Debug, Clone, Serialize)]
pub struct ToolCatalogEntry {
    pub name: String,
    pub description: String,
    pub parameters_schema: Value,
}

/// What the reasoning service hands back: either a final textual reply, or
/// a request to call exactly one registered tool with a JSON argument
/// object. Tool results are fed back as a subsequent turn.
#[derive(Debug, Clone)]
pub enum LlmTurn {
    ToolCall { tool: String, arguments: Value },
    FinalText(String),
}

/// Token accounting for a single round-trip, folded into a
/// `telemetry::TelemetryRecord` by the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    tools: Vec<ChatTool>,
}

#[derive(Debug, Serialize)]
struct ChatTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: ChatFunction,
}

#[derive(Debug, Serialize)]
struct ChatFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ChatToolCall>,
}

#[derive(Debug, Deserialize)]
struct ChatToolCall {
    function: ChatToolCallFunction,
}

#[derive(Debug, Deserialize)]
struct ChatToolCallFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

/// Trimmed to the prompt/tool-catalog contract this system actually needs:
/// send a prompt and the available tool descriptors, get back either a tool
/// call or final text.
pub struct LlmClient {
    http: reqwest::Client,
    config: OpenAiConfig,
}

impl LlmClient {
    pub fn new(config: OpenAiConfig) -> Self {
        let http = reqwest::Client::builder().timeout(LLM_DEADLINE).build().expect("reqwest client");
        Self { http, config }
    }

    /// A single reasoning round-trip: the system prompt, the running
    /// transcript, and the tool catalog in; one turn (text or tool call)
    /// plus token usage out.
    async fn next_action_impl(
        &self,
        system_prompt: &str,
        transcript: &[String],
        catalog: &[ToolCatalogEntry],
    ) -> AgentResult<(LlmTurn, TokenUsage)> {
        let mut messages = vec![ChatMessage { role: "system", content: system_prompt.to_string() }];
        for (i, turn) in transcript.iter().enumerate() {
            let role = if i % 2 == 0 { "user" } else { "assistant" };
            messages.push(ChatMessage { role, content: turn.clone() });
        }

        let tools = catalog
            .iter()
            .map(|entry| ChatTool {
                kind: "function",
                function: ChatFunction {
                    name: entry.name.clone(),
                    description: entry.description.clone(),
                    parameters: entry.parameters_schema.clone(),
                },
            })
            .collect();

        let request = ChatRequest { model: &self.config.model, messages, tools };

        let response = self
            .http
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| if e.is_timeout() { AgentError::Timeout(LLM_DEADLINE) } else { AgentError::Http(e) })?;

        if !response.status().is_success() {
            return Err(AgentError::backend_error(response.status().as_u16() as i32, "reasoning service error"));
        }

        let parsed: ChatResponse = response.json().await.map_err(AgentError::Http)?;
        let usage = parsed
            .usage
            .map(|u| TokenUsage { input_tokens: u.prompt_tokens, output_tokens: u.completion_tokens })
            .unwrap_or_default();

        let choice = parsed.choices.into_iter().next().ok_or_else(|| AgentError::backend_error(0, "empty reasoning response"))?;

        if let Some(call) = choice.message.tool_calls.into_iter().next() {
            let arguments: Value = serde_json::from_str(&call.function.arguments).unwrap_or(Value::Null);
            return Ok((LlmTurn::ToolCall { tool: call.function.name, arguments }, usage));
        }

        Ok((LlmTurn::FinalText(choice.message.content.unwrap_or_default()), usage))
    }
}

#[async_trait]
impl ReasoningClient for LlmClient {
    async fn next_action(
        &self,
        system_prompt: &str,
        transcript: &[String],
        catalog: &[ToolCatalogEntry],
    ) -> AgentResult<(LlmTurn, TokenUsage)> {
        self.next_action_impl(system_prompt, transcript, catalog).await
    }
}
