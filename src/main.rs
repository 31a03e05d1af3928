// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::io::{self, Read, Write};
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::{mpsc, Mutex};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::Cli;
use kode_core::{Agent, AgentEvent, AgentRuntimeContext, TaskTool};
use kode_tools::{
    events::ToolEvent, EditFileTool, ReadFileTool, RunTerminalCommandTool, TodoWriteTool,
    ToolRegistry, WriteTool,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = kode_config::load(cli.config.as_deref())?;

    if cli.show_config {
        println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
        return Ok(());
    }

    let prompt = read_prompt(cli.prompt.as_deref())?;
    if prompt.trim().is_empty() {
        anyhow::bail!("no prompt given: pass one as an argument or pipe it on stdin");
    }

    let config = Arc::new(config);
    let mode = cli.mode.unwrap_or(config.agent.default_mode);

    let agent = build_agent(&config, mode)?;
    run_turn(agent, prompt, cli.permission_mode, cli.json).await
}

/// Build a top-level agent wired with the representative builtin tool set
/// plus `TaskTool` for sub-agent delegation, the same shape the gateway/TUI
/// entry points use.
fn build_agent(config: &Arc<kode_config::Config>, mode: kode_config::AgentMode) -> anyhow::Result<Agent> {
    let model: Arc<dyn kode_model::ModelProvider> = Arc::from(kode_model::from_config(&config.model)?);

    let (tool_tx, tool_rx) = mpsc::channel::<ToolEvent>(64);
    let todos = Arc::new(Mutex::new(Vec::new()));

    let mut registry = ToolRegistry::new();
    registry.register(ReadFileTool);
    registry.register(WriteTool);
    registry.register(EditFileTool);
    registry.register(RunTerminalCommandTool { timeout_secs: config.tools.timeout_secs });
    registry.register(TodoWriteTool::new(todos, tool_tx));
    registry.register(TaskTool::new(
        model.clone(),
        config.clone(),
        Arc::new(config.agent.clone()),
        Arc::new(AtomicUsize::new(0)),
    ));

    let runtime = AgentRuntimeContext {
        project_root: std::env::current_dir().ok(),
        ..Default::default()
    };
    let mode_lock = Arc::new(Mutex::new(mode));
    let max_tokens = config.model.max_tokens.unwrap_or(128_000) as usize;

    Ok(Agent::new(
        model,
        Arc::new(registry),
        Arc::new(config.agent.clone()),
        runtime,
        mode_lock,
        tool_rx,
        max_tokens,
    ))
}

/// Submit `prompt` and stream the turn's events to the terminal until the
/// turn completes, printing the final response as plain text or JSON.
async fn run_turn(
    mut agent: Agent,
    prompt: String,
    permission_mode: kode_config::PermissionMode,
    as_json: bool,
) -> anyhow::Result<()> {
    agent.set_permission_mode(permission_mode).await;

    let (tx, mut rx) = mpsc::channel::<AgentEvent>(256);
    let handle = tokio::spawn(async move { agent.submit(&prompt, tx).await });

    let mut final_text = String::new();
    let mut turn_error: Option<String> = None;

    while let Some(event) = rx.recv().await {
        match event {
            AgentEvent::TextDelta(delta) => {
                if !as_json {
                    print!("{delta}");
                    let _ = io::stdout().flush();
                }
                final_text.push_str(&delta);
            }
            AgentEvent::ToolCallStarted(call) => {
                tracing::info!(tool = %call.name, id = %call.id, "tool call started");
            }
            AgentEvent::ToolCallFinished { tool_name, is_error, .. } => {
                tracing::info!(tool = %tool_name, is_error, "tool call finished");
            }
            AgentEvent::Error(e) => {
                turn_error = Some(e);
            }
            AgentEvent::TurnComplete => break,
            AgentEvent::Aborted { partial_text } => {
                final_text = partial_text;
                break;
            }
            _ => {}
        }
    }

    let submit_result = handle.await.context("agent task panicked")?;
    submit_result.context("agent turn failed")?;

    if !as_json {
        println!();
    }

    if let Some(err) = &turn_error {
        eprintln!("[kode:warn] {err}");
    }

    if as_json {
        println!(
            "{}",
            serde_json::json!({ "response": final_text, "error": turn_error })
        );
    }

    Ok(())
}

fn read_prompt(arg: Option<&str>) -> anyhow::Result<String> {
    if let Some(p) = arg {
        return Ok(p.to_string());
    }
    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf).context("reading stdin")?;
    Ok(buf)
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(io::stderr))
        .with(filter)
        .try_init();
}
