// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Canonical ordering of a turn's messages: assigns each message a stable id,
//! splices tool results next to the tool calls that produced them, and
//! derives the unresolved/in-progress/errored tool-call sets the agent loop
//! and any UI consume.
//!
//! Tool-call messages already arrive one-block-per-[`Message`] from the
//! scheduler (unlike a wire format that packs several blocks into one
//! assistant turn), so the "flatten multi-block messages" step collapses to
//! assigning each message in the slice a deterministic id. Ids are derived
//! with `uuid_v5` over a fixed namespace so re-normalizing the same input
//! always reproduces the same ids — never `Uuid::new_v4`, which would make
//! the UI's append-only prefix regress on every re-render.

use std::collections::HashSet;

use kode_model::{Message, MessageContent, Role};
use uuid::Uuid;

/// Fixed namespace for deriving normalized-message ids. Arbitrary but stable;
/// changing it would reshuffle every previously rendered id.
const NAMESPACE: Uuid = Uuid::from_bytes([
    0x6b, 0x6f, 0x64, 0x65, 0x2d, 0x6e, 0x6f, 0x72, 0x6d, 0x61, 0x6c, 0x69, 0x7a, 0x65, 0x72, 0x00,
]);

/// A message tagged with a stable, content-derived id.
#[derive(Debug, Clone)]
pub struct NormalizedMessage {
    pub id: String,
    pub message: Message,
}

impl NormalizedMessage {
    /// The tool-use id this message is emitting a call for, if it's an
    /// assistant tool-call block.
    fn tool_call_id(&self) -> Option<&str> {
        match &self.message.content {
            MessageContent::ToolCall { tool_call_id, .. } if self.message.role == Role::Assistant => {
                Some(tool_call_id)
            }
            _ => None,
        }
    }

    /// The tool-use id this message resolves, if it's a tool result.
    fn tool_result_id(&self) -> Option<&str> {
        match &self.message.content {
            MessageContent::ToolResult { tool_call_id, .. } => Some(tool_call_id),
            _ => None,
        }
    }
}

/// A turn's messages after normalization: stable ids assigned, tool results
/// spliced next to their originating calls, and the derived id sets a caller
/// needs without re-walking the sequence.
#[derive(Debug, Clone)]
pub struct NormalizedThread {
    pub messages: Vec<NormalizedMessage>,
    /// Tool-use ids with no matching tool-result yet.
    pub unresolved_tool_use_ids: Vec<String>,
    /// The first unresolved id, plus any unresolved id that isn't still
    /// waiting to start (per the caller-supplied `waiting` set).
    pub in_progress_tool_use_ids: Vec<String>,
    /// Ids whose tool-result resolved with an error.
    pub errored_tool_use_ids: Vec<String>,
}

fn normalize(source_id: &str, messages: &[Message]) -> Vec<NormalizedMessage> {
    messages
        .iter()
        .enumerate()
        .map(|(index, message)| NormalizedMessage {
            id: Uuid::new_v5(&NAMESPACE, format!("{source_id}:{index}").as_bytes()).to_string(),
            message: message.clone(),
        })
        .collect()
}

/// Normalize `messages` and splice each tool result immediately after the
/// assistant block that requested it, so the result is a strict alternation
/// of tool-use-bearing assistant messages and their results, in call order.
///
/// `waiting_tool_use_ids` names tool-use ids whose most recent progress
/// event is a "waiting to start" sentinel; per the ordering rule, those
/// don't count as in-progress even though they're unresolved.
///
/// `errored_tool_use_ids` names ids whose tool-result resolved with
/// `is_error=true`. A plain [`Message::tool_result`] doesn't carry that flag
/// (it's truncated away along with the rest of the raw `ToolOutput` before
/// the message is built), so the caller — which still has the original
/// `ToolOutput`s at hand — passes the set through rather than this module
/// re-deriving it from message text.
pub fn reorder(
    source_id: &str,
    messages: &[Message],
    waiting_tool_use_ids: &HashSet<String>,
    errored_tool_use_ids: &HashSet<String>,
) -> NormalizedThread {
    let normalized = normalize(source_id, messages);

    let mut results_by_id = std::collections::HashMap::new();
    let mut ordered = Vec::with_capacity(normalized.len());
    for m in &normalized {
        if let Some(id) = m.tool_result_id() {
            results_by_id.insert(id.to_string(), m.clone());
        } else {
            ordered.push(m.clone());
        }
    }

    let mut spliced = Vec::with_capacity(normalized.len());
    for m in ordered {
        let call_id = m.tool_call_id().map(|s| s.to_string());
        spliced.push(m);
        if let Some(id) = call_id {
            if let Some(result) = results_by_id.remove(&id) {
                spliced.push(result);
            }
        }
    }
    // Any result left over names a call this slice doesn't contain (e.g. a
    // compacted history); append in their original relative order rather
    // than dropping them.
    for m in &normalized {
        if let Some(id) = m.tool_result_id() {
            if results_by_id.remove(id).is_some() {
                spliced.push(m.clone());
            }
        }
    }

    let call_ids: Vec<String> = normalized
        .iter()
        .filter_map(|m| m.tool_call_id().map(|s| s.to_string()))
        .collect();
    let resolved_ids: HashSet<String> = normalized
        .iter()
        .filter_map(|m| m.tool_result_id().map(|s| s.to_string()))
        .collect();

    let unresolved: Vec<String> = call_ids
        .iter()
        .filter(|id| !resolved_ids.contains(*id))
        .cloned()
        .collect();

    let in_progress: Vec<String> = unresolved
        .iter()
        .enumerate()
        .filter(|(i, id)| *i == 0 || !waiting_tool_use_ids.contains(*id))
        .map(|(_, id)| id.clone())
        .collect();

    let errored: Vec<String> = resolved_ids
        .iter()
        .filter(|id| errored_tool_use_ids.contains(*id))
        .cloned()
        .collect();

    NormalizedThread {
        messages: spliced,
        unresolved_tool_use_ids: unresolved,
        in_progress_tool_use_ids: in_progress,
        errored_tool_use_ids: errored,
    }
}

/// Length of the longest prefix of `thread` guaranteed never to change on a
/// later call with more messages appended: every message in it is either not
/// a tool call, or a tool call whose result is already present.
pub fn static_prefix_length(thread: &NormalizedThread) -> usize {
    let unresolved: HashSet<&str> =
        thread.unresolved_tool_use_ids.iter().map(|s| s.as_str()).collect();
    let mut len = 0;
    for m in &thread.messages {
        if let Some(id) = m.tool_call_id() {
            if unresolved.contains(id) {
                break;
            }
        }
        len += 1;
    }
    len
}

/// Prepare `messages` for the next model turn: drop empty synthetic
/// assistant messages (produced when a turn ends with only a tool call and
/// no narration), then merge consecutive same-role text messages so the
/// model sees one coherent block per speaker turn instead of a string of
/// single-sentence fragments.
pub fn normalize_for_api(messages: &[Message]) -> Vec<Message> {
    let mut out: Vec<Message> = Vec::with_capacity(messages.len());
    for m in messages {
        if m.role == Role::Assistant {
            if let MessageContent::Text(t) = &m.content {
                if t.is_empty() {
                    continue;
                }
            }
        }
        match (out.last_mut(), &m.content) {
            (Some(prev), MessageContent::Text(text))
                if prev.role == m.role && matches!(&prev.content, MessageContent::Text(_)) =>
            {
                if let MessageContent::Text(prev_text) = &mut prev.content {
                    prev_text.push('\n');
                    prev_text.push_str(text);
                }
            }
            _ => out.push(m.clone()),
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use kode_model::FunctionCall;

    fn tool_call(id: &str, name: &str) -> Message {
        Message {
            role: Role::Assistant,
            content: MessageContent::ToolCall {
                tool_call_id: id.into(),
                function: FunctionCall { name: name.into(), arguments: "{}".into() },
            },
        }
    }

    #[test]
    fn normalize_assigns_stable_ids_across_calls() {
        let msgs = vec![Message::user("hi"), Message::assistant("hello")];
        let a = normalize("s1", &msgs);
        let b = normalize("s1", &msgs);
        assert_eq!(a[0].id, b[0].id);
        assert_eq!(a[1].id, b[1].id);
        assert_ne!(a[0].id, a[1].id);
    }

    #[test]
    fn normalize_ids_depend_on_source_id() {
        let msgs = vec![Message::user("hi")];
        let a = normalize("s1", &msgs);
        let b = normalize("s2", &msgs);
        assert_ne!(a[0].id, b[0].id);
    }

    #[test]
    fn reorder_splices_result_immediately_after_its_call() {
        let msgs = vec![
            Message::user("do it"),
            tool_call("call-1", "read_file"),
            Message::tool_result("call-1", "contents"),
        ];
        let thread = reorder("s1", &msgs, &HashSet::new(), &HashSet::new());
        assert_eq!(thread.messages.len(), 3);
        assert!(thread.unresolved_tool_use_ids.is_empty());
    }

    #[test]
    fn reorder_handles_out_of_order_results() {
        let msgs = vec![
            tool_call("call-1", "read_file"),
            tool_call("call-2", "read_file"),
            Message::tool_result("call-2", "b"),
            Message::tool_result("call-1", "a"),
        ];
        let thread = reorder("s1", &msgs, &HashSet::new(), &HashSet::new());
        // call-1's result must sit right after call-1, regardless of arrival order.
        let idx_call1 = thread.messages.iter().position(|m| m.tool_call_id() == Some("call-1")).unwrap();
        let idx_result1 = thread
            .messages
            .iter()
            .position(|m| m.tool_result_id() == Some("call-1"))
            .unwrap();
        assert_eq!(idx_result1, idx_call1 + 1);
    }

    #[test]
    fn unresolved_tool_use_ids_tracks_missing_results() {
        let msgs = vec![tool_call("call-1", "read_file")];
        let thread = reorder("s1", &msgs, &HashSet::new(), &HashSet::new());
        assert_eq!(thread.unresolved_tool_use_ids, vec!["call-1".to_string()]);
    }

    #[test]
    fn in_progress_excludes_waiting_ids_except_the_first() {
        let msgs = vec![tool_call("call-1", "a"), tool_call("call-2", "b")];
        let mut waiting = HashSet::new();
        waiting.insert("call-1".to_string());
        waiting.insert("call-2".to_string());
        let thread = reorder("s1", &msgs, &waiting, &HashSet::new());
        // call-1 is first, so it counts even though it's waiting; call-2 does not.
        assert_eq!(thread.in_progress_tool_use_ids, vec!["call-1".to_string()]);
    }

    #[test]
    fn errored_tool_use_ids_detects_error_results() {
        let msgs = vec![
            tool_call("call-1", "read_file"),
            Message::tool_result("call-1", "file not found"),
        ];
        let mut errored = HashSet::new();
        errored.insert("call-1".to_string());
        let thread = reorder("s1", &msgs, &HashSet::new(), &errored);
        assert_eq!(thread.errored_tool_use_ids, vec!["call-1".to_string()]);
    }

    #[test]
    fn static_prefix_length_stops_before_unresolved_call() {
        let msgs = vec![
            Message::user("a"),
            tool_call("call-1", "read_file"),
            Message::tool_result("call-1", "done"),
            tool_call("call-2", "read_file"),
        ];
        let thread = reorder("s1", &msgs, &HashSet::new(), &HashSet::new());
        // user, call-1, result-1 are final; call-2 is unresolved and stops the prefix.
        assert_eq!(static_prefix_length(&thread), 3);
    }

    #[test]
    fn static_prefix_length_grows_monotonically_across_turns() {
        let turn1 = vec![Message::user("a"), tool_call("call-1", "x")];
        let thread1 = reorder("s1", &turn1, &HashSet::new(), &HashSet::new());
        let len1 = static_prefix_length(&thread1);

        let mut turn2 = turn1.clone();
        turn2.push(Message::tool_result("call-1", "done"));
        let thread2 = reorder("s1", &turn2, &HashSet::new(), &HashSet::new());
        let len2 = static_prefix_length(&thread2);

        assert!(len2 >= len1);
        for i in 0..len1 {
            assert_eq!(thread1.messages[i].id, thread2.messages[i].id);
        }
    }

    #[test]
    fn normalize_for_api_drops_empty_assistant_messages() {
        let msgs = vec![Message::assistant(""), Message::assistant("hi")];
        let out = normalize_for_api(&msgs);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_text(), Some("hi"));
    }

    #[test]
    fn normalize_for_api_merges_consecutive_same_role_text() {
        let msgs = vec![Message::user("first"), Message::user("second")];
        let out = normalize_for_api(&msgs);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_text(), Some("first\nsecond"));
    }

    #[test]
    fn normalize_for_api_does_not_merge_across_roles() {
        let msgs = vec![Message::user("hi"), Message::assistant("hello")];
        let out = normalize_for_api(&msgs);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn normalize_for_api_leaves_tool_calls_and_results_unmerged() {
        let msgs = vec![tool_call("call-1", "read_file"), Message::tool_result("call-1", "ok")];
        let out = normalize_for_api(&msgs);
        assert_eq!(out.len(), 2);
    }
}
