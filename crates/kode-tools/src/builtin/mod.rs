// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub mod edit_file;
pub mod read_file;
pub mod run_terminal_command;
pub mod todo_write;
pub mod write_file;

// ─── OutputCategory contract tests ───────────────────────────────────────────
//
// Each builtin tool that overrides `output_category()` is verified here so
// that renames or copy-paste errors are caught at compile time with a clear
// failure message.  Tools that intentionally use the default (Generic) are
// also listed so that adding an override never silently goes un-reviewed.
#[cfg(test)]
mod output_category_tests {
    use std::sync::Arc;

    use tokio::sync::Mutex;

    use crate::tool::OutputCategory;
    use crate::Tool;

    #[test]
    fn run_terminal_command_is_headtail() {
        let t = super::run_terminal_command::RunTerminalCommandTool::default();
        assert_eq!(t.output_category(), OutputCategory::HeadTail);
    }

    #[test]
    fn read_file_is_filecontent() {
        let t = super::read_file::ReadFileTool;
        assert_eq!(t.output_category(), OutputCategory::FileContent);
    }

    #[test]
    fn write_tool_is_generic() {
        let t = super::write_file::WriteTool;
        assert_eq!(t.output_category(), OutputCategory::Generic);
    }

    #[test]
    fn edit_file_is_generic() {
        let t = super::edit_file::EditFileTool;
        assert_eq!(t.output_category(), OutputCategory::Generic);
    }

    #[test]
    fn todo_write_is_generic() {
        let (event_tx, _event_rx) = tokio::sync::mpsc::channel(1);
        let t = super::todo_write::TodoWriteTool::new(Arc::new(Mutex::new(Vec::new())), event_tx);
        assert_eq!(t.output_category(), OutputCategory::Generic);
    }
}
