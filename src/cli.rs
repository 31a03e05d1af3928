// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::Parser;
use kode_config::{AgentMode, PermissionMode};

/// Headless driver for the tool-use scheduler core: runs one turn against a
/// prompt given as an argument or piped on stdin, streaming the model's
/// response and tool activity to the terminal.
#[derive(Parser, Debug)]
#[command(name = "kode", version, about)]
pub struct Cli {
    /// The user prompt. Read from stdin if omitted.
    pub prompt: Option<String>,

    /// Explicit config file, merged over the discovered config layers.
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Operating mode for this run (overrides the config default).
    #[arg(long, value_enum)]
    pub mode: Option<AgentMode>,

    /// Permission mode governing the Permission Gate for this run.
    #[arg(long, value_enum, default_value = "default")]
    pub permission_mode: PermissionMode,

    /// Emit the final response as a JSON object instead of plain text.
    #[arg(long)]
    pub json: bool,

    /// Print the merged configuration as YAML and exit.
    #[arg(long)]
    pub show_config: bool,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}
