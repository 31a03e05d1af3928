use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::debug;

use kode_config::{AgentConfig, AgentMode, Config};
use kode_tools::{
    events::ToolEvent,
    tool::{Tool, ToolCall, ToolContext, ToolOutput},
    EditFileTool, ReadFileTool, RunTerminalCommandTool, TodoWriteTool, ToolRegistry, WriteTool,
};

use crate::agent::Agent;
use crate::events::AgentEvent;
use crate::runtime_context::AgentRuntimeContext;

const MAX_DEPTH: usize = 3;

/// Spawns a nested agent loop with its own tool registry and a
/// `ToolContext` linked to the parent's cancellation token, so cancelling
/// the outer turn cancels every in-flight sub-agent too.
pub struct TaskTool {
    model: Arc<dyn kode_model::ModelProvider>,
    config: Arc<Config>,
    agent_config: Arc<AgentConfig>,
    depth: Arc<AtomicUsize>,
}

impl TaskTool {
    pub fn new(
        model: Arc<dyn kode_model::ModelProvider>,
        config: Arc<Config>,
        agent_config: Arc<AgentConfig>,
        depth: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            model,
            config,
            agent_config,
            depth,
        }
    }

    /// Build the sub-agent's own tool registry. `tool_event_tx` must be
    /// handed to the `Agent` constructed around this registry so the
    /// sub-agent's own todo updates are drained rather than silently
    /// dropped once the channel fills.
    fn build_sub_registry(&self, tool_event_tx: mpsc::Sender<ToolEvent>) -> ToolRegistry {
        let todos = Arc::new(tokio::sync::Mutex::new(Vec::new()));

        let mut reg = ToolRegistry::new();
        reg.register(ReadFileTool);
        reg.register(WriteTool);
        reg.register(EditFileTool);
        reg.register(TodoWriteTool::new(todos, tool_event_tx));
        reg.register(RunTerminalCommandTool {
            timeout_secs: self.config.tools.timeout_secs,
        });
        // Sub-agents cannot spawn further sub-agents directly through the
        // registry; depth is capped independently via `self.depth`.
        reg
    }
}

#[async_trait]
impl Tool for TaskTool {
    fn name(&self) -> &str {
        "task"
    }

    fn description(&self) -> &str {
        "Spawn a sub-agent to complete a focused task and return its final text output. \
         Useful for delegating isolated sub-tasks. The sub-agent has access to the standard \
         file and shell tools. Maximum nesting depth is 3."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "prompt": {
                    "type": "string",
                    "description": "The task description for the sub-agent"
                },
                "mode": {
                    "type": "string",
                    "enum": ["research", "plan", "agent"],
                    "description": "Operating mode for the sub-agent (default: agent)"
                },
                "max_rounds": {
                    "type": "integer",
                    "description": "Maximum tool-call rounds (default: from config)"
                }
            },
            "required": ["prompt"]
        })
    }

    fn modes(&self) -> &[AgentMode] {
        &[AgentMode::Agent]
    }

    fn validate(&self, input: &Value) -> Result<(), kode_tools::ValidationError> {
        match input.get("prompt").and_then(|v| v.as_str()) {
            Some(p) if !p.trim().is_empty() => Ok(()),
            _ => Err(kode_tools::ValidationError::schema("missing 'prompt'")),
        }
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        let prompt = call
            .args
            .get("prompt")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let mode_str = call
            .args
            .get("mode")
            .and_then(|v| v.as_str())
            .unwrap_or("agent");
        let mode = match mode_str {
            "research" => AgentMode::Research,
            "plan" => AgentMode::Plan,
            "agent" => AgentMode::Agent,
            other => return ToolOutput::err(&call.id, format!("unknown mode: {other}")),
        };

        let current_depth = self.depth.load(Ordering::Relaxed);
        if current_depth >= MAX_DEPTH {
            return ToolOutput::err(
                &call.id,
                format!("maximum sub-agent depth ({MAX_DEPTH}) reached"),
            );
        }

        self.depth.fetch_add(1, Ordering::Relaxed);
        let sub_ctx = ctx.child_for_agent(call.id.clone());
        debug!(
            prompt = %prompt,
            mode = %mode,
            depth = current_depth + 1,
            agent_id = %call.id,
            "task: spawning sub-agent"
        );

        let mut sub_config = (*self.agent_config).clone();
        if let Some(max_rounds) = call.args.get("max_rounds").and_then(|v| v.as_u64()) {
            sub_config.max_tool_rounds = max_rounds as u32;
        }

        let (tool_event_tx, tool_event_rx) = mpsc::channel::<ToolEvent>(16);
        let tools = Arc::new(self.build_sub_registry(tool_event_tx));
        let mode_lock = Arc::new(tokio::sync::Mutex::new(mode));

        let mut agent = Agent::new(
            self.model.clone(),
            tools,
            Arc::new(sub_config),
            AgentRuntimeContext::default(),
            mode_lock,
            tool_event_rx,
            128_000,
        );

        let (tx, mut rx) = mpsc::channel::<AgentEvent>(256);

        let submit_result = agent.submit_with_context(&prompt, tx, sub_ctx).await;

        let mut output = String::new();
        while let Ok(event) = rx.try_recv() {
            if let AgentEvent::TextDelta(delta) = event {
                output.push_str(&delta);
            }
        }

        self.depth.fetch_sub(1, Ordering::Relaxed);

        match submit_result {
            Ok(_) => {
                if output.is_empty() {
                    ToolOutput::ok(&call.id, "(sub-agent produced no text output)")
                } else {
                    ToolOutput::ok(&call.id, output)
                }
            }
            Err(e) => ToolOutput::err(&call.id, format!("sub-agent error: {e}")),
        }
    }
}
