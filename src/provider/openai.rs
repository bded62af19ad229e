//! OpenAI-compatible capability provider
//!
//! Talks to any chat-completions endpoint that follows the OpenAI wire
//! format. Tool calls requested by the model are executed through the
//! dispatcher-supplied [`ToolExecutor`] and their results fed back until
//! the model produces a final answer or the round-trip budget runs out.

use super::{
    tools_to_schemas, CapabilityProvider, ChatMessage, ExecuteOptions, ExecutionResult,
    ToolCallRequest, ToolExecutor, ToolInvocation,
};
use crate::error::{McpError, ProviderError};
use crate::mcp::McpTool;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Settings for the OpenAI-compatible provider.
///
/// All configuration is explicit; the provider never reads environment
/// variables. The endpoint default targets the hosted API but any
/// compatible server works.
#[derive(Debug, Clone)]
pub struct OpenAiSettings {
    /// API key sent as a bearer token
    pub api_key: String,
    /// Model identifier
    pub model: String,
    /// Full chat-completions endpoint URL
    pub endpoint: String,
    /// HTTP request timeout
    pub timeout: Duration,
}

impl OpenAiSettings {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: "gpt-4".to_string(),
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Capability provider backed by an OpenAI-compatible chat-completions API.
pub struct OpenAiProvider {
    settings: OpenAiSettings,
    client: reqwest::Client,
}

/// Deserialized `choices[0].message` from a chat-completions response.
#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallRequest>>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
}

impl OpenAiProvider {
    /// Create a provider from explicit settings.
    pub fn new(settings: OpenAiSettings) -> Self {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self { settings, client }
    }

    /// One chat-completions round trip.
    async fn send_request(
        &self,
        messages: &[ChatMessage],
        tool_schemas: &[Value],
        options: &ExecuteOptions,
    ) -> Result<ApiMessage, ProviderError> {
        let mut body = serde_json::json!({
            "model": self.settings.model,
            "messages": messages,
        });
        if let Some(temperature) = options.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }
        if let Some(max_tokens) = options.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if !tool_schemas.is_empty() {
            body["tools"] = Value::Array(tool_schemas.to_vec());
        }

        debug!("Sending request to {} ({} messages)", self.settings.endpoint, messages.len());

        let response = self
            .client
            .post(&self.settings.endpoint)
            .header("Authorization", format!("Bearer {}", self.settings.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), &error_text));
        }

        let parsed: ApiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or_else(|| ProviderError::Parse("no choices in response".to_string()))
    }

    /// Drive the conversation until the model stops requesting tools.
    async fn run_conversation(
        &self,
        mut messages: Vec<ChatMessage>,
        tools: &[McpTool],
        executor: &dyn ToolExecutor,
        options: &ExecuteOptions,
    ) -> Result<ExecutionResult, ProviderError> {
        let tool_schemas = tools_to_schemas(tools);
        let mut invocations: Vec<ToolInvocation> = Vec::new();
        let mut rounds = 0u32;

        loop {
            let reply = self
                .send_request(&messages, &tool_schemas, options)
                .await?;

            let calls = reply.tool_calls.unwrap_or_default();
            if calls.is_empty() {
                return Ok(ExecutionResult {
                    text: reply.content.unwrap_or_default(),
                    request_id: Uuid::new_v4(),
                    created_at: Utc::now(),
                    tools_attached: !tools.is_empty(),
                    tool_invocations: invocations,
                    sources: Vec::new(),
                });
            }

            if rounds >= options.max_tool_rounds {
                return Err(ProviderError::ToolLoopExceeded {
                    limit: options.max_tool_rounds,
                });
            }
            rounds += 1;

            // Echo the assistant turn that requested the calls, then answer
            // each call before the next round trip.
            messages.push(ChatMessage {
                role: super::Role::Assistant,
                content: reply.content,
                tool_calls: Some(calls.clone()),
                tool_call_id: None,
            });

            for call in calls {
                let arguments: Value = serde_json::from_str(&call.function.arguments)
                    .unwrap_or_else(|_| serde_json::json!({}));

                debug!("Tool round {}: calling '{}'", rounds, call.function.name);

                match executor.call_tool(&call.function.name, arguments).await {
                    Ok(result) => {
                        invocations.push(ToolInvocation {
                            tool: call.function.name.clone(),
                            ok: true,
                        });
                        let content = serde_json::to_string(&result)
                            .map_err(|e| ProviderError::Parse(e.to_string()))?;
                        messages.push(ChatMessage::tool_result(call.id, content));
                    }
                    // A tool-level failure is reported back to the model so
                    // it can recover; transport failures end the execution.
                    Err(McpError::Tool { code, message }) => {
                        warn!(
                            "Tool '{}' failed ({}): {}",
                            call.function.name, code, message
                        );
                        invocations.push(ToolInvocation {
                            tool: call.function.name.clone(),
                            ok: false,
                        });
                        let content = serde_json::to_string(&serde_json::json!({
                            "error": {"code": code, "message": message},
                        }))
                        .map_err(|e| ProviderError::Parse(e.to_string()))?;
                        messages.push(ChatMessage::tool_result(call.id, content));
                    }
                    Err(other) => return Err(ProviderError::Tool(other)),
                }
            }
        }
    }
}

#[async_trait]
impl CapabilityProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn execute_command(
        &self,
        command_text: &str,
        user_input: &str,
        tools: &[McpTool],
        executor: &dyn ToolExecutor,
        options: &ExecuteOptions,
    ) -> Result<ExecutionResult, ProviderError> {
        let messages = vec![
            ChatMessage::system(format!(
                "You are executing a plugin command. Here is the command definition:\n\n{command_text}"
            )),
            ChatMessage::user(user_input),
        ];
        self.run_conversation(messages, tools, executor, options)
            .await
    }

    async fn execute_agent(
        &self,
        agent_text: &str,
        user_input: &str,
        tools: &[McpTool],
        executor: &dyn ToolExecutor,
        options: &ExecuteOptions,
    ) -> Result<ExecutionResult, ProviderError> {
        let messages = vec![
            ChatMessage::system(format!(
                "You are an AI agent. Here is your agent definition:\n\n{agent_text}"
            )),
            ChatMessage::user(user_input),
        ];
        self.run_conversation(messages, tools, executor, options)
            .await
    }

    async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        tools: &[McpTool],
        executor: &dyn ToolExecutor,
        options: &ExecuteOptions,
    ) -> Result<ExecutionResult, ProviderError> {
        self.run_conversation(messages, tools, executor, options)
            .await
    }
}
