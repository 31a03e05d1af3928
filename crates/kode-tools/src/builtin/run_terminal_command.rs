// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::debug;

use kode_config::AgentMode;

use crate::tool::{OutputCategory, PermissionSubjectKind, Tool, ToolCall, ToolContext, ToolOutput};

const OUTPUT_LIMIT: usize = 100_000;

/// Runs a shell command. This is the scheduler's reference "barrier" tool:
/// it never runs concurrently with any sibling in the same batch, since two
/// shell commands sharing a working directory can race on files neither
/// declared as an input.
pub struct RunTerminalCommandTool {
    pub timeout_secs: u64,
}

impl Default for RunTerminalCommandTool {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

#[async_trait]
impl Tool for RunTerminalCommandTool {
    fn name(&self) -> &str {
        "run_terminal_command"
    }

    fn description(&self) -> &str {
        "Executes a given command in a shell session.\n\n\
         IMPORTANT: This tool is for terminal operations like git, cargo, make, etc. \
         DO NOT use it for file operations — use specialized tools instead.\n\n\
         Default timeout is 30 seconds; set timeout_secs higher for slow builds or tests.\n\
         Output is limited to 100,000 characters and will be truncated if exceeded.\n\
         Non-zero exit codes are returned as errors; check the exit code in output.\n\n\
         This tool call never runs concurrently with any other tool call in the same \
         batch — it always isolates itself as a barrier."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "workdir": {
                    "type": "string",
                    "description": "Working directory (optional, defaults to cwd)"
                },
                "timeout_secs": {
                    "type": "integer",
                    "description": "Execution timeout in seconds (optional)"
                }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    fn output_category(&self) -> OutputCategory {
        OutputCategory::HeadTail
    }

    fn modes(&self) -> &[AgentMode] {
        &[AgentMode::Agent]
    }

    fn is_concurrency_unsafe(&self, _input: &Value) -> bool {
        true
    }

    fn permission_subject_kind(&self) -> PermissionSubjectKind {
        PermissionSubjectKind::Command
    }

    fn permission_subject(&self, input: &Value) -> Option<String> {
        input.get("command").and_then(|v| v.as_str()).map(str::to_string)
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        let command = match call.args.get("command").and_then(|v| v.as_str()) {
            Some(c) => c.to_string(),
            None => return ToolOutput::err(&call.id, "missing 'command' argument"),
        };
        let workdir = call.args.get("workdir").and_then(|v| v.as_str()).map(str::to_string);
        let timeout = call
            .args
            .get("timeout_secs")
            .and_then(|v| v.as_u64())
            .unwrap_or(self.timeout_secs);

        debug!(cmd = %command, "run_terminal_command tool");

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&command);
        if let Some(wd) = &workdir {
            cmd.current_dir(wd);
        }

        let run = async {
            tokio::time::timeout(std::time::Duration::from_secs(timeout), cmd.output()).await
        };

        let result = tokio::select! {
            r = run => r,
            _ = ctx.cancellation.cancelled() => {
                return ToolOutput::sibling_cancelled(&call.id);
            }
        };

        match result {
            Ok(Ok(output)) => {
                let mut content = String::new();
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);

                if !stdout.is_empty() {
                    content.push_str(&truncate(&stdout, OUTPUT_LIMIT));
                }
                if !stderr.is_empty() {
                    if !content.is_empty() {
                        content.push('\n');
                    }
                    content.push_str("[stderr]\n");
                    content.push_str(&truncate(&stderr, OUTPUT_LIMIT));
                }
                if content.is_empty() {
                    content = format!("[exit {}]", output.status.code().unwrap_or(-1));
                }

                if output.status.success() {
                    ToolOutput::ok(&call.id, content)
                } else {
                    let code = output.status.code().unwrap_or(-1);
                    ToolOutput::err(&call.id, format!("[exit {code}]\n{content}"))
                }
            }
            Ok(Err(e)) => ToolOutput::err(&call.id, format!("spawn error: {e}")),
            Err(_) => ToolOutput::err(&call.id, format!("timeout after {timeout}s")),
        }
    }
}

fn truncate(s: &str, limit: usize) -> String {
    if s.len() <= limit {
        s.to_string()
    } else {
        format!("{}...[truncated {} bytes]", &s[..limit], s.len() - limit)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use std::sync::Arc;

    use super::*;
    use crate::freshness::FreshnessRegistry;
    use crate::tool::{Tool, ToolCall};
    use kode_config::PermissionMode;

    fn call(args: serde_json::Value) -> ToolCall {
        ToolCall { id: "t1".into(), name: "run_terminal_command".into(), args }
    }

    fn ctx() -> ToolContext {
        ToolContext::new(Arc::new(FreshnessRegistry::new()), PermissionMode::Default)
    }

    #[tokio::test]
    async fn executes_echo_and_returns_stdout() {
        let t = RunTerminalCommandTool::default();
        let out = t.execute(&call(json!({"command": "echo hello"})), &ctx()).await;
        assert!(!out.is_error);
        assert!(out.content.contains("hello"));
    }

    #[tokio::test]
    async fn captures_stderr() {
        let t = RunTerminalCommandTool::default();
        let out = t.execute(&call(json!({"command": "echo err >&2"})), &ctx()).await;
        assert!(out.content.contains("err"));
    }

    #[tokio::test]
    async fn non_zero_exit_is_error() {
        let t = RunTerminalCommandTool::default();
        let out = t.execute(&call(json!({"command": "exit 1"})), &ctx()).await;
        assert!(out.is_error);
        assert!(out.content.contains("[exit 1]"));
    }

    #[tokio::test]
    async fn missing_command_is_error() {
        let t = RunTerminalCommandTool::default();
        let out = t.execute(&call(json!({})), &ctx()).await;
        assert!(out.is_error);
        assert!(out.content.contains("missing 'command'"));
    }

    #[tokio::test]
    async fn timeout_returns_error() {
        let t = RunTerminalCommandTool { timeout_secs: 1 };
        let out = t
            .execute(&call(json!({"command": "sleep 60", "timeout_secs": 1})), &ctx())
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("timeout"));
    }

    #[tokio::test]
    async fn cancellation_token_interrupts_the_call() {
        let t = RunTerminalCommandTool::default();
        let ctx = ctx();
        ctx.cancellation.cancel();
        let out = t.execute(&call(json!({"command": "sleep 5"})), &ctx).await;
        assert!(out.interrupted);
        assert_eq!(out.content, ToolOutput::SIBLING_ERROR_BODY);
    }

    #[test]
    fn only_available_in_agent_mode() {
        let t = RunTerminalCommandTool::default();
        assert_eq!(t.modes(), &[AgentMode::Agent]);
    }

    #[test]
    fn is_always_concurrency_unsafe() {
        let t = RunTerminalCommandTool::default();
        assert!(t.is_concurrency_unsafe(&json!({"command": "ls"})));
        assert!(!t.is_concurrency_safe(&json!({"command": "ls"})));
    }

    #[test]
    fn permission_subject_is_the_command_string() {
        let t = RunTerminalCommandTool::default();
        assert_eq!(
            t.permission_subject(&json!({"command": "git status"})),
            Some("git status".to_string())
        );
    }
}
