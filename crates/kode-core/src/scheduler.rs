// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The Tool-Use Queue: dispatches one model turn's batch of tool calls while
//! respecting each tool's concurrency-safety verdict, the Permission Gate,
//! and cancellation — both turn-level user aborts and same-batch sibling
//! failures.
//!
//! Calls are grouped into maximal contiguous runs that are all
//! concurrency-safe ([`kode_tools::Tool::is_concurrency_safe`]); each such
//! run is dispatched with `tokio::spawn` and awaited together. A call that
//! is not concurrency-safe (a "barrier" — e.g. `run_terminal_command`) runs
//! alone: everything before it has already finished, and nothing after it
//! starts until it returns. This mirrors the ordering a strictly sequential
//! executor would produce while still parallelizing the calls that are safe
//! to run together.
//!
//! A single cancellation token spans the whole batch (not just one group),
//! so a genuine tool-internal failure anywhere cancels every not-yet-settled
//! sibling, whatever group or side of a barrier it's queued in. Calls that
//! never got a chance to start are settled immediately with the appropriate
//! sentinel; calls already in flight are settled as soon as their own
//! `invoke` stream ends.
//!
//! Output order always matches input order, regardless of dispatch order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use kode_tools::tool::{ToolContext, ToolStreamEvent};
use kode_tools::{PermissionDecision, PermissionGate, Tool, ToolCall, ToolOutput, ToolRegistry};

use crate::events::AgentEvent;

/// Minimum gap between two progress events for the same call id (the first
/// always passes regardless of timing).
const PROGRESS_THROTTLE: Duration = Duration::from_millis(200);

/// Progress body emitted for every tool-use queued behind a barrier, either
/// ahead of it or behind one that is already running.
const WAITING_PROGRESS: &str = "Waiting…";

fn wrap_progress(content: &str) -> String {
    format!("<tool-progress>{content}</tool-progress>")
}

enum Group {
    /// Indices into the original call list that may run concurrently.
    Safe(Vec<usize>),
    /// A single index that must run in isolation.
    Barrier(usize),
}

impl Group {
    fn indices(&self) -> &[usize] {
        match self {
            Group::Safe(v) => v,
            Group::Barrier(i) => std::slice::from_ref(i),
        }
    }
}

/// Partition `calls` into maximal contiguous safe runs separated by barriers.
fn group_calls(registry: &ToolRegistry, calls: &[ToolCall]) -> Vec<Group> {
    let mut groups = Vec::new();
    let mut current: Vec<usize> = Vec::new();
    for (i, call) in calls.iter().enumerate() {
        // A call naming an unknown tool can't block or race with anything —
        // it resolves to an error the moment it's dispatched — so it's safe
        // to fold into the surrounding group.
        let safe = registry
            .get(&call.name)
            .map(|t| t.is_concurrency_safe(&call.args))
            .unwrap_or(true);
        if safe {
            current.push(i);
        } else {
            if !current.is_empty() {
                groups.push(Group::Safe(std::mem::take(&mut current)));
            }
            groups.push(Group::Barrier(i));
        }
    }
    if !current.is_empty() {
        groups.push(Group::Safe(current));
    }
    groups
}

/// Result of dispatching one call: its settled output, plus whether that
/// output was a genuine tool-internal failure — the only kind that should
/// cancel this call's not-yet-settled siblings. Validation failures,
/// permission denials, unknown tools, and cancellations never trigger this.
struct DispatchOutcome {
    output: ToolOutput,
    triggers_sibling_cancel: bool,
}

impl DispatchOutcome {
    fn settled(output: ToolOutput) -> Self {
        Self { output, triggers_sibling_cancel: false }
    }
}

/// Resolve, permission-check, and run a single call, forwarding any
/// intermediate progress (throttled) to `progress_tx`.
///
/// `root_cancel` is the *outer* turn-level cancellation token the batch was
/// given — distinct from `ctx.cancellation`, which is this call's own child
/// token and may have been cancelled purely because a sibling errored. It is
/// consulted only to pick the right sentinel when cancellation is observed.
async fn dispatch_one(
    registry: &ToolRegistry,
    permissions: &PermissionGate,
    call: &ToolCall,
    ctx: ToolContext,
    root_cancel: CancellationToken,
    progress_tx: Option<mpsc::Sender<AgentEvent>>,
) -> DispatchOutcome {
    if ctx.cancellation.is_cancelled() {
        let output = if root_cancel.is_cancelled() {
            ToolOutput::user_aborted_before_start(&call.id)
        } else {
            ToolOutput::sibling_cancelled(&call.id)
        };
        return DispatchOutcome::settled(output);
    }
    let Some(tool) = registry.get(&call.name) else {
        return DispatchOutcome::settled(ToolOutput::err(
            &call.id,
            format!("unknown tool: {}", call.name),
        ));
    };
    if let Err(e) = tool.validate(&call.args) {
        return DispatchOutcome::settled(ToolOutput::err(
            &call.id,
            format!("{:?}: {}", e.kind, e.message),
        ));
    }
    if tool.needs_permissions() {
        match permissions.check(tool.as_ref(), &call.args, ctx.permission_mode) {
            PermissionDecision::Allow => {}
            PermissionDecision::Deny(reason) => {
                return DispatchOutcome::settled(ToolOutput::err(
                    &call.id,
                    format!("permission denied: {reason}"),
                ));
            }
            PermissionDecision::Ask(reason) => {
                // No interactive approval channel is wired into the scheduler;
                // an unresolved "ask" can never silently become a run.
                return DispatchOutcome::settled(ToolOutput::err(
                    &call.id,
                    format!("permission required, cannot proceed unattended: {reason}"),
                ));
            }
        }
    }

    let mut stream = tool.invoke(call, &ctx).await;
    let mut last_progress: Option<Instant> = None;
    loop {
        match stream.next().await {
            Some(ToolStreamEvent::Progress { content }) => {
                let now = Instant::now();
                let pass = match last_progress {
                    None => true,
                    Some(prev) => now.duration_since(prev) >= PROGRESS_THROTTLE,
                };
                if pass {
                    last_progress = Some(now);
                    if let Some(tx) = &progress_tx {
                        let _ = tx
                            .send(AgentEvent::ToolProgress {
                                call_id: call.id.clone(),
                                content: wrap_progress(&content),
                            })
                            .await;
                    }
                }
            }
            Some(ToolStreamEvent::Result(out)) => {
                // A cooperating tool that observed cancellation mid-flight
                // (e.g. a barrier racing `ctx.cancellation`) doesn't know
                // *why* it was cancelled; remap to the right sentinel here.
                let out = if out.is_error && out.interrupted && root_cancel.is_cancelled() {
                    ToolOutput::user_aborted(&call.id)
                } else {
                    out
                };
                let triggers_sibling_cancel = out.is_error && !out.interrupted;
                return DispatchOutcome { output: out, triggers_sibling_cancel };
            }
            None => {
                return DispatchOutcome::settled(ToolOutput::err(
                    &call.id,
                    "tool stream ended without a result",
                ));
            }
        }
    }
}

/// Run one turn's tool-call batch to completion, returning outputs in the
/// same order as `calls`. `progress_tx`, when given, receives
/// [`AgentEvent::ToolProgress`] for in-flight progress and for calls queued
/// behind a barrier.
pub async fn execute_batch(
    registry: Arc<ToolRegistry>,
    permissions: Arc<PermissionGate>,
    calls: Vec<ToolCall>,
    ctx: ToolContext,
    progress_tx: Option<mpsc::Sender<AgentEvent>>,
) -> Vec<ToolOutput> {
    let groups = group_calls(&registry, &calls);
    let mut by_id: HashMap<String, ToolOutput> = HashMap::with_capacity(calls.len());
    let root_cancel = ctx.cancellation.clone();
    // Shared across every group so a failure anywhere in the batch reaches
    // every not-yet-settled sibling, not just ones in the same contiguous run.
    let batch_token = ctx.cancellation.child_token();

    for (gi, group) in groups.iter().enumerate() {
        if matches!(group, Group::Barrier(_)) {
            if let Some(tx) = &progress_tx {
                for later in &groups[gi + 1..] {
                    for &j in later.indices() {
                        let _ = tx
                            .send(AgentEvent::ToolProgress {
                                call_id: calls[j].id.clone(),
                                content: wrap_progress(WAITING_PROGRESS),
                            })
                            .await;
                    }
                }
            }
        }

        match group {
            Group::Barrier(i) => {
                let i = *i;
                let call_ctx = ToolContext {
                    cancellation: batch_token.child_token(),
                    agent_id: ctx.agent_id.clone(),
                    freshness: ctx.freshness.clone(),
                    permission_mode: ctx.permission_mode,
                };
                let outcome = dispatch_one(
                    &registry,
                    &permissions,
                    &calls[i],
                    call_ctx,
                    root_cancel.clone(),
                    progress_tx.clone(),
                )
                .await;
                if outcome.triggers_sibling_cancel {
                    batch_token.cancel();
                }
                by_id.insert(calls[i].id.clone(), outcome.output);
            }
            Group::Safe(idxs) => {
                let mut tasks = Vec::with_capacity(idxs.len());
                for &i in idxs {
                    let registry = Arc::clone(&registry);
                    let permissions = Arc::clone(&permissions);
                    let call = calls[i].clone();
                    let call_ctx = ToolContext {
                        cancellation: batch_token.child_token(),
                        agent_id: ctx.agent_id.clone(),
                        freshness: ctx.freshness.clone(),
                        permission_mode: ctx.permission_mode,
                    };
                    let root_cancel = root_cancel.clone();
                    let progress_tx = progress_tx.clone();
                    tasks.push(tokio::spawn(async move {
                        dispatch_one(&registry, &permissions, &call, call_ctx, root_cancel, progress_tx)
                            .await
                    }));
                }
                for (&i, task) in idxs.iter().zip(tasks) {
                    let outcome = match task.await {
                        Ok(outcome) => outcome,
                        Err(e) => DispatchOutcome::settled(ToolOutput::err(
                            &calls[i].id,
                            format!("tool panicked: {e}"),
                        )),
                    };
                    if outcome.triggers_sibling_cancel {
                        batch_token.cancel();
                    }
                    by_id.insert(calls[i].id.clone(), outcome.output);
                }
            }
        }
    }

    calls
        .iter()
        .map(|c| by_id.remove(&c.id).expect("every call produces exactly one output"))
        .collect()
}
