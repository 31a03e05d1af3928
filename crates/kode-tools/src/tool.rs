// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use kode_config::{AgentMode, PermissionMode};

use crate::freshness::FreshnessRegistry;

/// Everything a tool's `invoke`/`execute` body may need beyond its own
/// arguments: a per-call cancellation token, the id of the sub-agent this
/// invocation runs inside (if any), a handle to the shared Freshness
/// Registry, and the conversation's effective permission mode.
#[derive(Clone)]
pub struct ToolContext {
    pub cancellation: CancellationToken,
    pub agent_id: Option<String>,
    pub freshness: Arc<FreshnessRegistry>,
    pub permission_mode: PermissionMode,
}

impl ToolContext {
    /// A context with a fresh, unlinked cancellation token and no sub-agent
    /// id — what the top-level agent loop passes for a turn's tool calls.
    pub fn new(freshness: Arc<FreshnessRegistry>, permission_mode: PermissionMode) -> Self {
        Self {
            cancellation: CancellationToken::new(),
            agent_id: None,
            freshness,
            permission_mode,
        }
    }

    /// A child context for a nested sub-agent invocation, linked to this
    /// context's cancellation token so cancelling the parent cancels the
    /// child.
    pub fn child_for_agent(&self, agent_id: impl Into<String>) -> Self {
        Self {
            cancellation: self.cancellation.child_token(),
            agent_id: Some(agent_id.into()),
            freshness: self.freshness.clone(),
            permission_mode: self.permission_mode,
        }
    }
}

/// A single tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier returned by the model (forwarded verbatim)
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments
    pub args: Value,
}

/// A single content item in a rich tool output.
///
/// Most tools produce only `Text`.  Vision-capable tools (e.g. `read_image`)
/// may produce a mix of `Text` and `Image` items.
#[derive(Debug, Clone)]
pub enum ToolOutputPart {
    /// Plain UTF-8 text.
    Text(String),
    /// Base64 data URL: `data:<mime>;base64,<b64>`.
    Image(String),
}

/// The terminal result of a tool invocation.
///
/// `content` is always the plain-text representation of the output (the
/// concatenation of all `Text` parts).
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub call_id: String,
    /// Plain-text content — concatenation of all Text parts.
    pub content: String,
    /// Structured parts (text and/or images).  For tools that only return
    /// text this contains exactly one `Text` part mirroring `content`.
    pub parts: Vec<ToolOutputPart>,
    /// If true, the tool execution failed non-fatally (returned error message).
    pub is_error: bool,
    /// If true, the invocation was cancelled (a sibling failure or a turn
    /// interrupt) rather than completing or failing on its own terms.
    pub interrupted: bool,
}

impl ToolOutput {
    /// Successful plain-text result.
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let text = content.into();
        let call_id = call_id.into();
        Self {
            call_id,
            content: text.clone(),
            parts: vec![ToolOutputPart::Text(text)],
            is_error: false,
            interrupted: false,
        }
    }

    /// Error result containing a plain-text error message.
    pub fn err(call_id: impl Into<String>, msg: impl Into<String>) -> Self {
        let text = msg.into();
        let call_id = call_id.into();
        Self {
            call_id,
            content: text.clone(),
            parts: vec![ToolOutputPart::Text(text)],
            is_error: true,
            interrupted: false,
        }
    }

    /// The fixed sentinel body used when a sibling tool call in the same
    /// batch errored and this one was cancelled before completing.
    pub const SIBLING_ERROR_BODY: &'static str =
        "<tool_use_error>Sibling tool call errored</tool_use_error>";

    /// Result produced when the scheduler cancels this call because a
    /// sibling in the same batch errored.
    pub fn sibling_cancelled(call_id: impl Into<String>) -> Self {
        let call_id = call_id.into();
        Self {
            call_id,
            content: Self::SIBLING_ERROR_BODY.to_string(),
            parts: vec![ToolOutputPart::Text(Self::SIBLING_ERROR_BODY.to_string())],
            is_error: true,
            interrupted: true,
        }
    }

    /// Sentinel body for a tool-use that had already started when the user
    /// aborted the turn.
    pub const INTERRUPT_MESSAGE: &'static str = "[Request interrupted by user]";

    /// Sentinel body for a tool-use that never got a chance to start before
    /// the user aborted the turn.
    pub const INTERRUPT_MESSAGE_FOR_TOOL_USE: &'static str =
        "[Request interrupted by user for tool use]";

    /// Result produced for a tool-use that was running (or had just
    /// finished validation/gating) when the user aborted the turn.
    pub fn user_aborted(call_id: impl Into<String>) -> Self {
        let call_id = call_id.into();
        Self {
            call_id,
            content: Self::INTERRUPT_MESSAGE.to_string(),
            parts: vec![ToolOutputPart::Text(Self::INTERRUPT_MESSAGE.to_string())],
            is_error: true,
            interrupted: true,
        }
    }

    /// Result produced for a tool-use that never started because the user
    /// aborted the turn before the scheduler reached it.
    pub fn user_aborted_before_start(call_id: impl Into<String>) -> Self {
        let call_id = call_id.into();
        Self {
            call_id,
            content: Self::INTERRUPT_MESSAGE_FOR_TOOL_USE.to_string(),
            parts: vec![ToolOutputPart::Text(
                Self::INTERRUPT_MESSAGE_FOR_TOOL_USE.to_string(),
            )],
            is_error: true,
            interrupted: true,
        }
    }

    /// Result with arbitrary parts (text and/or images).
    ///
    /// `content` is set to the concatenation of all Text parts.
    pub fn with_parts(call_id: impl Into<String>, parts: Vec<ToolOutputPart>) -> Self {
        let text = parts
            .iter()
            .filter_map(|p| match p {
                ToolOutputPart::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n");
        Self {
            call_id: call_id.into(),
            content: text,
            parts,
            is_error: false,
            interrupted: false,
        }
    }

    /// Return `true` if this output contains at least one image part.
    pub fn has_images(&self) -> bool {
        self.parts
            .iter()
            .any(|p| matches!(p, ToolOutputPart::Image(_)))
    }
}

/// Describes the shape of a tool's text output for context-aware truncation.
///
/// When a tool result exceeds the configured token cap, `kode-core` uses
/// this category to pick the right extraction strategy.  Each tool declares
/// its own category; `kode-core` never hard-codes tool names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputCategory {
    /// Terminal / process output: keep the first 60 + last 40 lines so both
    /// the command preamble and the final result are visible.
    /// Suitable for: shell, run_terminal_command.
    HeadTail,
    /// Ordered match list: keep the leading matches so the model sees the
    /// highest-relevance results first.
    MatchList,
    /// File content: keep a head and tail window with a separator so the
    /// model sees both the top of the file (imports, declarations) and the
    /// end (recent changes).
    /// Suitable for: read_file.
    FileContent,
    /// Generic text: hard-truncate at the character boundary.
    /// Used for all tools that do not fit the categories above.
    #[default]
    Generic,
}

/// A validation failure kind, per the tool contract's closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationErrorKind {
    /// Input does not conform to `parameters_schema`.
    Schema,
    /// Input is well-formed but violates a tool-specific semantic rule.
    Semantic,
    /// Input is well-formed but a precondition the tool owns is unmet
    /// (e.g. referenced path does not exist).
    Precondition,
}

/// A validation failure: short-circuits the call with `is_error=true`
/// before the tool's `execute`/`invoke` body ever runs.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub kind: ValidationErrorKind,
    pub message: String,
}

impl ValidationError {
    pub fn schema(message: impl Into<String>) -> Self {
        Self { kind: ValidationErrorKind::Schema, message: message.into() }
    }
    pub fn semantic(message: impl Into<String>) -> Self {
        Self { kind: ValidationErrorKind::Semantic, message: message.into() }
    }
    pub fn precondition(message: impl Into<String>) -> Self {
        Self { kind: ValidationErrorKind::Precondition, message: message.into() }
    }
}

/// What kind of string a tool's permission pattern matches against.
/// Consulted by the Permission Gate when resolving `Tool(pattern)` rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PermissionSubjectKind {
    /// Pattern is a glob over an absolute filesystem path.
    Path,
    /// Pattern matches the first shell word, with an optional `:*` suffix
    /// meaning "any arguments".
    Command,
    /// Pattern matches a namespace prefix (`ns:*`).
    Namespace,
    /// Rule matching for this tool only supports the empty pattern.
    #[default]
    Opaque,
}

/// An event yielded while a tool invocation is in flight.
#[derive(Debug, Clone)]
pub enum ToolStreamEvent {
    /// Ephemeral progress content; never fed back to the model, shown to
    /// the user and superseded by later progress carrying the same id.
    Progress { content: String },
    /// The terminal event; exactly one is yielded per invocation.
    Result(ToolOutput),
}

/// Trait that every built-in and user-defined tool must implement.
///
/// The scheduler never inspects tool internals — it only calls through this
/// contract: `validate`, the concurrency/read-only/permission predicates,
/// and `invoke`'s event stream.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for parameters
    fn parameters_schema(&self) -> Value;
    /// The agent modes in which this tool is available.
    /// Default: all modes (Research, Plan, Agent).
    fn modes(&self) -> &[AgentMode] {
        &[AgentMode::Research, AgentMode::Plan, AgentMode::Agent]
    }
    /// Describes the shape of this tool's output for context-aware truncation.
    ///
    /// Override this when your tool produces output whose leading or trailing
    /// portion is more useful than a hard cut.  The default is
    /// [`OutputCategory::Generic`] (hard truncation).
    fn output_category(&self) -> OutputCategory {
        OutputCategory::Generic
    }

    /// Pure, synchronous input validation. The default accepts anything;
    /// override to reject malformed or semantically invalid input before
    /// `invoke` ever runs.
    fn validate(&self, _input: &Value) -> Result<(), ValidationError> {
        Ok(())
    }

    /// True if this tool never mutates state external to the conversation
    /// (no writes, no process spawns). Read-only tools remain Allow under
    /// `plan` mode.
    fn is_read_only(&self) -> bool {
        false
    }

    /// Whether this specific invocation must isolate itself from every
    /// sibling tool call in the same batch (a concurrency "barrier"). A
    /// malformed call (failing `validate`) is never concurrency-safe,
    /// regardless of this override, so a parse failure can't silently
    /// parallelize with later calls.
    fn is_concurrency_unsafe(&self, _input: &Value) -> bool {
        false
    }

    /// Final concurrency-safety verdict the scheduler consults.
    fn is_concurrency_safe(&self, input: &Value) -> bool {
        self.validate(input).is_ok() && !self.is_concurrency_unsafe(input)
    }

    /// Static w.r.t. input: whether the Permission Gate must be consulted
    /// at all for this tool. The gate is still consulted for rule
    /// evaluation even when this returns `false` for a read-only tool.
    fn needs_permissions(&self) -> bool {
        true
    }

    /// What kind of permission-pattern subject this tool exposes, and the
    /// subject string extracted from a given input (e.g. an absolute path
    /// or a shell command). Used by the Permission Gate's pattern matcher.
    fn permission_subject_kind(&self) -> PermissionSubjectKind {
        PermissionSubjectKind::Opaque
    }
    fn permission_subject(&self, _input: &Value) -> Option<String> {
        None
    }

    /// Execute the tool to completion. Errors should be wrapped in
    /// [`ToolOutput::err`]; this method never panics on tool-level failure.
    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput;

    /// Stream progress followed by exactly one terminal result. The default
    /// adapts `execute` for tools that have no intermediate progress to
    /// report; override for tools that stream partial output.
    async fn invoke(&self, call: &ToolCall, ctx: &ToolContext) -> BoxStream<'static, ToolStreamEvent> {
        let output = self.execute(call, ctx).await;
        stream::once(async move { ToolStreamEvent::Result(output) }).boxed()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;

    fn test_ctx() -> ToolContext {
        ToolContext::new(Arc::new(FreshnessRegistry::new()), PermissionMode::Default)
    }

    // -- OutputCategory --

    #[test]
    fn output_category_default_is_generic() {
        assert_eq!(OutputCategory::default(), OutputCategory::Generic);
    }

    #[test]
    fn output_category_variants_are_distinct() {
        assert_ne!(OutputCategory::HeadTail, OutputCategory::MatchList);
        assert_ne!(OutputCategory::HeadTail, OutputCategory::FileContent);
        assert_ne!(OutputCategory::HeadTail, OutputCategory::Generic);
        assert_ne!(OutputCategory::MatchList, OutputCategory::FileContent);
        assert_ne!(OutputCategory::MatchList, OutputCategory::Generic);
        assert_ne!(OutputCategory::FileContent, OutputCategory::Generic);
    }

    #[test]
    fn output_category_copy_semantics() {
        let a = OutputCategory::HeadTail;
        let b = a; // Copy — no move
        assert_eq!(a, b);
    }

    #[test]
    fn sibling_cancelled_carries_exact_sentinel_body() {
        let out = ToolOutput::sibling_cancelled("call-1");
        assert_eq!(out.content, ToolOutput::SIBLING_ERROR_BODY);
        assert!(out.is_error);
        assert!(out.interrupted);
    }

    #[test]
    fn user_aborted_carries_exact_sentinel_body() {
        let out = ToolOutput::user_aborted("call-1");
        assert_eq!(out.content, "[Request interrupted by user]");
        assert!(out.is_error);
        assert!(out.interrupted);
    }

    #[test]
    fn user_aborted_before_start_carries_exact_sentinel_body() {
        let out = ToolOutput::user_aborted_before_start("call-1");
        assert_eq!(out.content, "[Request interrupted by user for tool use]");
        assert!(out.is_error);
        assert!(out.interrupted);
    }

    // -- Tool trait defaults --

    struct MinimalTool;

    #[async_trait]
    impl Tool for MinimalTool {
        fn name(&self) -> &str {
            "minimal"
        }
        fn description(&self) -> &str {
            "a minimal tool"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> ToolOutput {
            ToolOutput::ok(&call.id, "ok")
        }
    }

    #[test]
    fn tool_default_output_category_is_generic() {
        assert_eq!(MinimalTool.output_category(), OutputCategory::Generic);
    }

    #[test]
    fn tool_default_is_not_read_only() {
        assert!(!MinimalTool.is_read_only());
    }

    #[test]
    fn tool_default_needs_permissions() {
        assert!(MinimalTool.needs_permissions());
    }

    #[test]
    fn tool_default_concurrency_safe_for_valid_input() {
        assert!(MinimalTool.is_concurrency_safe(&json!({})));
    }

    struct StrictTool;

    #[async_trait]
    impl Tool for StrictTool {
        fn name(&self) -> &str {
            "strict"
        }
        fn description(&self) -> &str {
            "rejects missing field"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object", "required": ["path"] })
        }
        fn validate(&self, input: &Value) -> Result<(), ValidationError> {
            if input.get("path").is_none() {
                return Err(ValidationError::schema("missing 'path'"));
            }
            Ok(())
        }
        fn is_concurrency_unsafe(&self, _input: &Value) -> bool {
            true
        }
        async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> ToolOutput {
            ToolOutput::ok(&call.id, "ok")
        }
    }

    #[test]
    fn malformed_input_is_never_concurrency_safe_even_without_barrier_override() {
        // validate() fails → is_concurrency_safe must be false regardless
        // of is_concurrency_unsafe's own answer.
        assert!(!StrictTool.is_concurrency_safe(&json!({})));
    }

    #[test]
    fn barrier_tool_is_concurrency_unsafe_even_with_valid_input() {
        let input = json!({"path": "/tmp/x"});
        assert!(StrictTool.validate(&input).is_ok());
        assert!(!StrictTool.is_concurrency_safe(&input));
    }

    #[tokio::test]
    async fn default_invoke_yields_single_result_event() {
        let call = ToolCall { id: "c1".into(), name: "minimal".into(), args: json!({}) };
        let mut events: Vec<ToolStreamEvent> =
            MinimalTool.invoke(&call, &test_ctx()).await.collect().await;
        assert_eq!(events.len(), 1);
        match events.pop().unwrap() {
            ToolStreamEvent::Result(out) => assert_eq!(out.content, "ok"),
            _ => panic!("expected Result event"),
        }
    }
}
