//! Command dispatch
//!
//! Resolves a plugin command or agent by name, attaches any MCP tools the
//! plugin declares, and delegates execution to a capability provider. MCP
//! connections are established lazily on first use and memoized for the
//! dispatcher's lifetime; a failed connection is discarded and reconnected
//! on the next execution that needs it.

use crate::error::{DispatchError, McpError};
use crate::mcp::{ConnectionState, McpConnection, McpServerConfig, McpSettings, McpTool};
use crate::plugin::Plugin;
use crate::provider::{
    CapabilityProvider, ExecuteOptions, ExecutionResult, ToolExecutor, ToolPolicy,
};
use crate::registry::PluginRegistry;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, warn};

/// What kind of instruction text an execution resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextKind {
    Command,
    Agent,
}

impl TextKind {
    fn label(self) -> &'static str {
        match self {
            TextKind::Command => "command",
            TextKind::Agent => "agent",
        }
    }
}

/// Executes plugin commands and agents against a capability provider.
pub struct Dispatcher {
    registry: Arc<PluginRegistry>,
    mcp_settings: McpSettings,
    /// Live MCP connections, keyed by "plugin/server".
    connections: Mutex<HashMap<String, Arc<McpConnection>>>,
}

impl Dispatcher {
    /// Create a dispatcher over an already-loaded registry.
    pub fn new(registry: Arc<PluginRegistry>, mcp_settings: McpSettings) -> Self {
        Self {
            registry,
            mcp_settings,
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// The registry this dispatcher serves.
    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Execute a named command from a plugin.
    pub async fn execute_command(
        &self,
        plugin_name: &str,
        command_name: &str,
        input: &str,
        provider: &dyn CapabilityProvider,
        options: &ExecuteOptions,
    ) -> Result<ExecutionResult, DispatchError> {
        self.execute(
            plugin_name,
            TextKind::Command,
            command_name,
            input,
            provider,
            options,
        )
        .await
    }

    /// Execute a named agent from a plugin.
    pub async fn execute_agent(
        &self,
        plugin_name: &str,
        agent_name: &str,
        input: &str,
        provider: &dyn CapabilityProvider,
        options: &ExecuteOptions,
    ) -> Result<ExecutionResult, DispatchError> {
        self.execute(
            plugin_name,
            TextKind::Agent,
            agent_name,
            input,
            provider,
            options,
        )
        .await
    }

    async fn execute(
        &self,
        plugin_name: &str,
        kind: TextKind,
        name: &str,
        input: &str,
        provider: &dyn CapabilityProvider,
        options: &ExecuteOptions,
    ) -> Result<ExecutionResult, DispatchError> {
        match options.deadline {
            Some(deadline) => timeout(
                deadline,
                self.execute_inner(plugin_name, kind, name, input, provider, options),
            )
            .await
            .map_err(|_| DispatchError::DeadlineExceeded)?,
            None => {
                self.execute_inner(plugin_name, kind, name, input, provider, options)
                    .await
            }
        }
    }

    async fn execute_inner(
        &self,
        plugin_name: &str,
        kind: TextKind,
        name: &str,
        input: &str,
        provider: &dyn CapabilityProvider,
        options: &ExecuteOptions,
    ) -> Result<ExecutionResult, DispatchError> {
        let plugin = self.registry.get(plugin_name)?;

        let text = match kind {
            TextKind::Command => plugin.command(name),
            TextKind::Agent => plugin.agent(name),
        }
        .ok_or_else(|| DispatchError::CommandNotFound {
            kind: kind.label(),
            plugin: plugin_name.to_string(),
            name: name.to_string(),
        })?;

        let (tools, executor) = self.attach_tools(plugin, options).await?;

        debug!(
            "Dispatching {} '{}/{}' with {} tools via {}",
            kind.label(),
            plugin_name,
            name,
            tools.len(),
            provider.name()
        );

        let result = match kind {
            TextKind::Command => {
                provider
                    .execute_command(text, input, &tools, &executor, options)
                    .await?
            }
            TextKind::Agent => {
                provider
                    .execute_agent(text, input, &tools, &executor, options)
                    .await?
            }
        };

        Ok(result)
    }

    /// Connect the plugin's MCP servers (lazily, memoized) and collect
    /// their tool descriptors.
    ///
    /// With [`ToolPolicy::Optional`] a failing server degrades to "no
    /// tools from that server"; with [`ToolPolicy::Required`] the failure
    /// propagates.
    async fn attach_tools(
        &self,
        plugin: &Plugin,
        options: &ExecuteOptions,
    ) -> Result<(Vec<McpTool>, PluginToolExecutor), DispatchError> {
        let mut tools = Vec::new();
        let mut routes: HashMap<String, Arc<McpConnection>> = HashMap::new();

        if !plugin.has_mcp() {
            return Ok((tools, PluginToolExecutor { routes }));
        }

        // Server order is made deterministic by name.
        let mut servers: Vec<(&String, &McpServerConfig)> = plugin.mcp_servers().iter().collect();
        servers.sort_by(|a, b| a.0.cmp(b.0));

        for (server_name, config) in servers {
            let attached = self
                .attach_server(plugin.name(), server_name, config, &mut tools, &mut routes)
                .await;

            if let Err(e) = attached {
                if options.tool_policy == ToolPolicy::Required {
                    return Err(e.into());
                }
                warn!(
                    "MCP server '{}' unavailable for plugin '{}', continuing without its tools: {}",
                    server_name,
                    plugin.name(),
                    e
                );
            }
        }

        Ok((tools, PluginToolExecutor { routes }))
    }

    async fn attach_server(
        &self,
        plugin_name: &str,
        server_name: &str,
        config: &McpServerConfig,
        tools: &mut Vec<McpTool>,
        routes: &mut HashMap<String, Arc<McpConnection>>,
    ) -> Result<(), McpError> {
        let connection = self
            .connection_for(plugin_name, server_name, config)
            .await?;

        // Discovery is refreshed on every execution; servers may change
        // their tool set between calls.
        let server_tools = connection.list_tools().await?;
        for tool in server_tools {
            routes.insert(tool.name.clone(), Arc::clone(&connection));
            tools.push(tool);
        }
        Ok(())
    }

    /// Fetch or (re)establish the memoized connection for one server.
    async fn connection_for(
        &self,
        plugin_name: &str,
        server_name: &str,
        config: &McpServerConfig,
    ) -> Result<Arc<McpConnection>, McpError> {
        let key = format!("{plugin_name}/{server_name}");
        let mut pool = self.connections.lock().await;

        if let Some(existing) = pool.get(&key) {
            if existing.state() == ConnectionState::Ready {
                return Ok(Arc::clone(existing));
            }
            debug!("Discarding dead MCP connection '{}'", key);
            pool.remove(&key);
        }

        let connection = Arc::new(
            McpConnection::connect(server_name, config, self.mcp_settings.clone()).await?,
        );
        pool.insert(key, Arc::clone(&connection));
        Ok(connection)
    }

    /// Close every live MCP connection. Called at application shutdown.
    pub async fn shutdown(&self) {
        let mut pool = self.connections.lock().await;
        for (key, connection) in pool.drain() {
            debug!("Closing MCP connection '{}'", key);
            connection.close().await;
        }
    }
}

/// Routes tool calls to the MCP connection that advertised the tool.
pub struct PluginToolExecutor {
    routes: HashMap<String, Arc<McpConnection>>,
}

#[async_trait]
impl ToolExecutor for PluginToolExecutor {
    async fn call_tool(&self, tool: &str, arguments: Value) -> Result<Value, McpError> {
        let connection = self.routes.get(tool).ok_or_else(|| {
            McpError::Protocol(format!("backend requested unknown tool '{tool}'"))
        })?;
        connection.call_tool(tool, arguments).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{EmailMessage, EmailSender, SendOutcome};
    use crate::error::ProviderError;
    use crate::manifest::{MANIFEST_DIR, MANIFEST_FILE};
    use crate::provider::ChatMessage;
    use std::path::Path;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Provider that returns a canned reply and records what it saw.
    struct MockProvider {
        reply: String,
        delay: Option<Duration>,
        seen_system: StdMutex<Vec<String>>,
        seen_tool_count: StdMutex<Vec<usize>>,
    }

    impl MockProvider {
        fn replying(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                delay: None,
                seen_system: StdMutex::new(Vec::new()),
                seen_tool_count: StdMutex::new(Vec::new()),
            }
        }

        fn record(&self, text: &str, tools: &[McpTool]) -> ExecutionResult {
            self.seen_system.lock().unwrap().push(text.to_string());
            self.seen_tool_count.lock().unwrap().push(tools.len());
            let mut result = ExecutionResult::text_only(self.reply.clone());
            result.tools_attached = !tools.is_empty();
            result
        }
    }

    #[async_trait]
    impl CapabilityProvider for MockProvider {
        fn name(&self) -> &'static str {
            "mock"
        }

        async fn execute_command(
            &self,
            command_text: &str,
            _user_input: &str,
            tools: &[McpTool],
            _executor: &dyn ToolExecutor,
            _options: &ExecuteOptions,
        ) -> Result<ExecutionResult, ProviderError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(self.record(command_text, tools))
        }

        async fn execute_agent(
            &self,
            agent_text: &str,
            _user_input: &str,
            tools: &[McpTool],
            _executor: &dyn ToolExecutor,
            _options: &ExecuteOptions,
        ) -> Result<ExecutionResult, ProviderError> {
            Ok(self.record(agent_text, tools))
        }

        async fn chat(
            &self,
            _messages: Vec<ChatMessage>,
            tools: &[McpTool],
            _executor: &dyn ToolExecutor,
            _options: &ExecuteOptions,
        ) -> Result<ExecutionResult, ProviderError> {
            Ok(self.record("", tools))
        }
    }

    fn add_plugin(root: &Path, dir_name: &str, manifest: &str) -> std::path::PathBuf {
        let dir = root.join(dir_name);
        std::fs::create_dir_all(dir.join(MANIFEST_DIR)).unwrap();
        std::fs::write(dir.join(MANIFEST_DIR).join(MANIFEST_FILE), manifest).unwrap();
        dir
    }

    fn dispatcher_for(plugins_dir: &Path) -> Dispatcher {
        let mut registry = PluginRegistry::new();
        registry.load(plugins_dir);
        Dispatcher::new(Arc::new(registry), McpSettings::default())
    }

    #[tokio::test]
    async fn test_unknown_plugin() {
        let tmp = TempDir::new().unwrap();
        let dispatcher = dispatcher_for(tmp.path());
        let provider = MockProvider::replying("unused");

        let err = dispatcher
            .execute_command("ghost", "run", "input", &provider, &ExecuteOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::PluginNotFound(_)));
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let tmp = TempDir::new().unwrap();
        add_plugin(
            tmp.path(),
            "story",
            r#"{"name": "story-plugin", "version": "1.0.0"}"#,
        );
        let dispatcher = dispatcher_for(tmp.path());
        let provider = MockProvider::replying("unused");

        let err = dispatcher
            .execute_command(
                "story-plugin",
                "missing",
                "input",
                &provider,
                &ExecuteOptions::default(),
            )
            .await
            .unwrap_err();
        match err {
            DispatchError::CommandNotFound { kind, name, .. } => {
                assert_eq!(kind, "command");
                assert_eq!(name, "missing");
            }
            other => panic!("expected CommandNotFound, got {other:?}"),
        }
        // The failed dispatch left the registry untouched.
        assert_eq!(dispatcher.registry().len(), 1);
    }

    #[tokio::test]
    async fn test_story_command_without_mcp() {
        let tmp = TempDir::new().unwrap();
        let dir = add_plugin(
            tmp.path(),
            "story",
            r#"{"name": "story-plugin", "version": "1.0.0"}"#,
        );
        std::fs::create_dir(dir.join("commands")).unwrap();
        std::fs::write(
            dir.join("commands/write.md"),
            "Write a story matching the user's request.",
        )
        .unwrap();

        let dispatcher = dispatcher_for(tmp.path());
        let provider = MockProvider::replying("Rain fell all night. By morning it was gone.");

        let result = dispatcher
            .execute_command(
                "story-plugin",
                "write",
                "Write a two-sentence story about rain",
                &provider,
                &ExecuteOptions::default(),
            )
            .await
            .unwrap();

        assert!(!result.text.is_empty());
        assert!(!result.tools_attached);
        assert!(result.tool_invocations.is_empty());
        // The provider received the command text as its instruction.
        assert_eq!(
            provider.seen_system.lock().unwrap()[0],
            "Write a story matching the user's request."
        );
        assert_eq!(provider.seen_tool_count.lock().unwrap()[0], 0);
    }

    #[tokio::test]
    async fn test_agent_dispatch() {
        let tmp = TempDir::new().unwrap();
        let dir = add_plugin(
            tmp.path(),
            "story",
            r#"{"name": "story-plugin", "version": "1.0.0"}"#,
        );
        std::fs::create_dir(dir.join("agents")).unwrap();
        std::fs::write(dir.join("agents/critic.md"), "You critique stories.").unwrap();

        let dispatcher = dispatcher_for(tmp.path());
        let provider = MockProvider::replying("A fine story.");

        let result = dispatcher
            .execute_agent(
                "story-plugin",
                "critic",
                "Review my story",
                &provider,
                &ExecuteOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(result.text, "A fine story.");
        assert_eq!(
            provider.seen_system.lock().unwrap()[0],
            "You critique stories."
        );
    }

    #[tokio::test]
    async fn test_email_draft_and_send() {
        struct MockSender {
            sent: StdMutex<Vec<EmailMessage>>,
        }

        #[async_trait]
        impl EmailSender for MockSender {
            async fn send(&self, message: &EmailMessage) -> SendOutcome {
                self.sent.lock().unwrap().push(message.clone());
                SendOutcome {
                    success: true,
                    message: "queued".to_string(),
                }
            }
        }

        let tmp = TempDir::new().unwrap();
        let dir = add_plugin(
            tmp.path(),
            "email",
            r#"{"name": "email-plugin", "version": "1.0.0"}"#,
        );
        std::fs::create_dir(dir.join("commands")).unwrap();
        std::fs::write(
            dir.join("commands/draft.md"),
            "Draft an email with a subject line and body.",
        )
        .unwrap();

        let dispatcher = dispatcher_for(tmp.path());
        let provider = MockProvider::replying(
            "Subject: Following up\n\nHi Ada,\n\nJust following up on our conversation.\n\nBest",
        );

        let result = dispatcher
            .execute_command(
                "email-plugin",
                "draft",
                "recipient=Ada purpose=follow-up tone=professional",
                &provider,
                &ExecuteOptions::default(),
            )
            .await
            .unwrap();

        // The draft has a subject line and a body.
        let (subject, body) = result.text.split_once("\n\n").unwrap();
        assert!(subject.starts_with("Subject: "));
        assert!(body.contains("Ada"));

        let sender = MockSender {
            sent: StdMutex::new(Vec::new()),
        };
        let outcome = sender
            .send(&EmailMessage {
                to: "ada@example.com".to_string(),
                subject: subject.trim_start_matches("Subject: ").to_string(),
                body: body.to_string(),
                from: None,
            })
            .await;
        assert!(outcome.success);
        assert_eq!(sender.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_mcp_degrades_to_no_tools() {
        let tmp = TempDir::new().unwrap();
        let dir = add_plugin(
            tmp.path(),
            "tooled",
            r#"{"name": "tooled-plugin", "version": "1.0.0"}"#,
        );
        std::fs::create_dir(dir.join("commands")).unwrap();
        std::fs::write(dir.join("commands/go.md"), "Go.").unwrap();
        std::fs::write(
            dir.join(".mcp.json"),
            r#"{"mcpServers": {"broken": {"command": "/nonexistent/mcp-server"}}}"#,
        )
        .unwrap();

        let dispatcher = dispatcher_for(tmp.path());
        let provider = MockProvider::replying("done without tools");

        // Default policy: degrade and proceed.
        let result = dispatcher
            .execute_command(
                "tooled-plugin",
                "go",
                "input",
                &provider,
                &ExecuteOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(result.text, "done without tools");
        assert!(!result.tools_attached);
    }

    #[tokio::test]
    async fn test_failed_mcp_with_required_policy_is_error() {
        let tmp = TempDir::new().unwrap();
        let dir = add_plugin(
            tmp.path(),
            "tooled",
            r#"{"name": "tooled-plugin", "version": "1.0.0"}"#,
        );
        std::fs::create_dir(dir.join("commands")).unwrap();
        std::fs::write(dir.join("commands/go.md"), "Go.").unwrap();
        std::fs::write(
            dir.join(".mcp.json"),
            r#"{"mcpServers": {"broken": {"command": "/nonexistent/mcp-server"}}}"#,
        )
        .unwrap();

        let dispatcher = dispatcher_for(tmp.path());
        let provider = MockProvider::replying("unreached");

        let options = ExecuteOptions {
            tool_policy: ToolPolicy::Required,
            ..Default::default()
        };
        let err = dispatcher
            .execute_command("tooled-plugin", "go", "input", &provider, &options)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Mcp(McpError::Spawn { .. })));
    }

    #[tokio::test]
    async fn test_deadline_exceeded() {
        let tmp = TempDir::new().unwrap();
        let dir = add_plugin(
            tmp.path(),
            "slow",
            r#"{"name": "slow-plugin", "version": "1.0.0"}"#,
        );
        std::fs::create_dir(dir.join("commands")).unwrap();
        std::fs::write(dir.join("commands/wait.md"), "Wait.").unwrap();

        let dispatcher = dispatcher_for(tmp.path());
        let provider = MockProvider {
            delay: Some(Duration::from_millis(500)),
            ..MockProvider::replying("too late")
        };

        let options = ExecuteOptions {
            deadline: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let err = dispatcher
            .execute_command("slow-plugin", "wait", "input", &provider, &options)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_unknown_tool_call_rejected() {
        let executor = PluginToolExecutor {
            routes: HashMap::new(),
        };
        let err = executor
            .call_tool("phantom", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Protocol(_)));
    }
}
