// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod builtin;
pub mod events;
pub mod freshness;
pub mod permissions;
pub mod registry;
pub mod tool;

pub use events::{TodoItem, ToolEvent};
pub use freshness::{FreshnessRegistry, FreshnessStatus, FRESHNESS_EPSILON};
pub use permissions::{
    DefaultPatternMatcher, PatternMatcher, PermissionDecision, PermissionGate,
    PersistDestination, RuleAction, RuleSet,
};
pub use registry::{ToolRegistry, ToolSchema};
pub use tool::{
    OutputCategory, PermissionSubjectKind, Tool, ToolCall, ToolContext, ToolOutput,
    ToolOutputPart, ToolStreamEvent, ValidationError, ValidationErrorKind,
};

pub use builtin::edit_file::EditFileTool;
pub use builtin::read_file::ReadFileTool;
pub use builtin::run_terminal_command::RunTerminalCommandTool;
pub use builtin::todo_write::TodoWriteTool;
pub use builtin::write_file::WriteTool;
