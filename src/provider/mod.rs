//! Capability provider abstraction
//!
//! A capability provider wraps one LLM vendor's request/response and
//! tool-calling semantics behind a uniform interface. The dispatcher hands
//! it command or agent text plus user input; the provider returns generated
//! text, performing zero or more tool-call round trips through a
//! [`ToolExecutor`] along the way.

mod openai;

pub use openai::{OpenAiProvider, OpenAiSettings};

use crate::error::{McpError, ProviderError};
use crate::mcp::McpTool;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

/// Message role in a chat conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One turn in a chat conversation, in the shape the chat-completions wire
/// format expects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Tool calls requested by the assistant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRequest>>,
    /// For tool-result messages: the call this result answers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// The result of one tool invocation, answering `call_id`.
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(call_id.into()),
        }
    }
}

/// A tool call requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: FunctionCall,
}

/// Function name and JSON-encoded arguments of a tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// Arguments as a JSON-encoded string, per the wire format
    pub arguments: String,
}

/// How the dispatcher treats MCP connection failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolPolicy {
    /// Degrade to "no tools" and continue (logged, reflected in metadata)
    #[default]
    Optional,
    /// Fail the execution if tools cannot be attached
    Required,
}

/// Per-execution options.
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Sampling temperature, if the vendor supports it
    pub temperature: Option<f32>,
    /// Token budget for the response
    pub max_tokens: Option<u32>,
    /// Maximum tool-call round trips before giving up
    pub max_tool_rounds: u32,
    /// Whether tool attachment may degrade on MCP failure
    pub tool_policy: ToolPolicy,
    /// Outer deadline for the whole execution
    pub deadline: Option<Duration>,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            temperature: None,
            max_tokens: None,
            max_tool_rounds: 4,
            tool_policy: ToolPolicy::Optional,
            deadline: None,
        }
    }
}

/// Record of one tool invocation made during an execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Tool name as requested by the model
    pub tool: String,
    /// Whether the tool returned a result (false: its error was fed back)
    pub ok: bool,
}

/// Result of one command, agent, or chat execution.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Generated text
    pub text: String,
    /// Unique id for this execution, for logs and audit trails
    pub request_id: Uuid,
    /// When the result was produced
    pub created_at: DateTime<Utc>,
    /// Whether tool descriptors were offered to the backend
    pub tools_attached: bool,
    /// Tools the backend actually invoked, in order
    pub tool_invocations: Vec<ToolInvocation>,
    /// Source URLs consulted (filled by the routing layer)
    pub sources: Vec<String>,
}

impl ExecutionResult {
    /// A plain text result with no tool involvement.
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            request_id: Uuid::new_v4(),
            created_at: Utc::now(),
            tools_attached: false,
            tool_invocations: Vec::new(),
            sources: Vec::new(),
        }
    }

    /// Whether any tool was invoked while producing this result.
    pub fn used_tools(&self) -> bool {
        !self.tool_invocations.is_empty()
    }
}

/// Callback through which a provider executes tool calls requested by the
/// backend. The dispatcher implements this over its MCP connections.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Execute `tool` with `arguments` and return its result payload.
    async fn call_tool(&self, tool: &str, arguments: Value) -> Result<Value, McpError>;
}

/// A tool executor for executions with no tools attached. Any call is a
/// protocol violation by the backend.
pub struct NoTools;

#[async_trait]
impl ToolExecutor for NoTools {
    async fn call_tool(&self, tool: &str, _arguments: Value) -> Result<Value, McpError> {
        Err(McpError::Protocol(format!(
            "backend requested tool '{tool}' but no tools were offered"
        )))
    }
}

/// Uniform interface over vendor-specific LLM backends.
///
/// Implementations perform the tool-call loop themselves: when the backend
/// requests a tool, the provider invokes it through the supplied
/// [`ToolExecutor`], feeds the result back, and continues until the backend
/// produces a final answer or `max_tool_rounds` is exhausted
/// ([`ProviderError::ToolLoopExceeded`]).
#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    /// Provider name for logs and diagnostics.
    fn name(&self) -> &'static str;

    /// Execute a command: `command_text` is the instructional context,
    /// `user_input` the task.
    async fn execute_command(
        &self,
        command_text: &str,
        user_input: &str,
        tools: &[McpTool],
        executor: &dyn ToolExecutor,
        options: &ExecuteOptions,
    ) -> Result<ExecutionResult, ProviderError>;

    /// Execute an agent: like a command, but the text is a broader
    /// behavioral specification.
    async fn execute_agent(
        &self,
        agent_text: &str,
        user_input: &str,
        tools: &[McpTool],
        executor: &dyn ToolExecutor,
        options: &ExecuteOptions,
    ) -> Result<ExecutionResult, ProviderError>;

    /// Lower-level escape hatch for multi-turn use outside the plugin
    /// abstraction.
    async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        tools: &[McpTool],
        executor: &dyn ToolExecutor,
        options: &ExecuteOptions,
    ) -> Result<ExecutionResult, ProviderError>;
}

/// Convert MCP tool descriptors into function-calling tool schemas.
pub(crate) fn tools_to_schemas(tools: &[McpTool]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            let parameters = if tool.input_schema.is_null() {
                serde_json::json!({"type": "object", "properties": {}})
            } else {
                tool.input_schema.clone()
            };
            serde_json::json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": parameters,
                },
            })
        })
        .collect()
}
