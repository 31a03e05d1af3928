// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The Permission Gate: evaluates a requested `(tool, input)` against a
//! layered rule store (session, local-project, project, user, policy) and
//! returns allow / deny / ask.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use regex::Regex;
use serde::{Deserialize, Serialize};

use kode_config::PermissionMode;

use crate::tool::{PermissionSubjectKind, Tool};

/// A single `Tool(pattern)` rule's effect once matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleAction {
    Allow,
    Deny,
}

/// Outcome of [`PermissionGate::check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionDecision {
    Allow,
    Deny(String),
    Ask(String),
}

/// Where a "remember my choice" rule gets written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistDestination {
    /// In-memory only, never written to disk.
    Session,
    LocalSettings,
    ProjectSettings,
    UserSettings,
}

/// Pluggable matcher between a rule's pattern and an invocation's subject
/// string. The grammar observed in practice: globs on paths, a `:*` suffix
/// on commands meaning "any arguments", and `ns:*` namespace prefixes on
/// skills — but the rule text itself is treated as opaque by the gate.
pub trait PatternMatcher: Send + Sync {
    fn matches(&self, kind: PermissionSubjectKind, pattern: &str, subject: &str) -> bool;
}

/// Default matcher implementing the grammar above.
#[derive(Debug, Default)]
pub struct DefaultPatternMatcher;

impl PatternMatcher for DefaultPatternMatcher {
    fn matches(&self, kind: PermissionSubjectKind, pattern: &str, subject: &str) -> bool {
        if pattern.is_empty() {
            return true;
        }
        match kind {
            PermissionSubjectKind::Path => glob_match(&shellexpand::tilde(pattern), subject),
            PermissionSubjectKind::Command => command_match(pattern, subject),
            PermissionSubjectKind::Namespace => namespace_match(pattern, subject),
            PermissionSubjectKind::Opaque => pattern == subject,
        }
    }
}

/// Compile a shell glob (`*`/`?`) over a full path into an anchored regex
/// and test it against `subject`.
fn glob_match(pattern: &str, subject: &str) -> bool {
    glob_to_regex(pattern)
        .map(|re| re.is_match(subject))
        .unwrap_or(false)
}

fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut re = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).ok()
}

/// `prefix:*` matches any command whose first shell word is `prefix`;
/// without the suffix the pattern must equal the whole command.
fn command_match(pattern: &str, subject: &str) -> bool {
    match pattern.strip_suffix(":*") {
        Some(prefix) => subject.split_whitespace().next() == Some(prefix),
        None => pattern == subject,
    }
}

/// `ns:*` matches any qualified name starting with `ns:`; without the
/// trailing `*` the pattern must equal the whole name.
fn namespace_match(pattern: &str, subject: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => subject.starts_with(prefix),
        None => pattern == subject,
    }
}

/// Parse `"ToolName(pattern)"` into `(tool, pattern)`. An empty pattern
/// (`"ToolName()"`) matches any input.
fn parse_rule(rule: &str) -> Option<(&str, &str)> {
    let open = rule.find('(')?;
    let close = rule.rfind(')')?;
    if close < open {
        return None;
    }
    Some((&rule[..open], &rule[open + 1..close]))
}

/// Rules accumulated from one source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SettingsFile {
    #[serde(default)]
    permissions: RuleSet,
}

fn read_rule_set_file(path: &Path) -> Option<RuleSet> {
    let text = std::fs::read_to_string(path).ok()?;
    let file: SettingsFile = serde_json::from_str(&text).ok()?;
    Some(file.permissions)
}

fn write_rule_set_file(path: &Path, rules: &RuleSet) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = SettingsFile { permissions: rules.clone() };
    std::fs::write(path, serde_json::to_string_pretty(&file)?)?;
    Ok(())
}

fn load_with_legacy_migration(primary: &Path, legacy: Option<&Path>) -> RuleSet {
    if primary.is_file() {
        return read_rule_set_file(primary).unwrap_or_default();
    }
    if let Some(legacy) = legacy {
        if legacy.is_file() {
            if let Some(rules) = read_rule_set_file(legacy) {
                let _ = write_rule_set_file(primary, &rules);
                return rules;
            }
        }
    }
    RuleSet::default()
}

fn local_settings_path(root: &Path) -> PathBuf {
    root.join(".kode/settings.local.json")
}
fn legacy_local_settings_path(root: &Path) -> PathBuf {
    root.join(".claude/settings.local.json")
}
fn project_settings_path(root: &Path) -> PathBuf {
    root.join(".kode/settings.json")
}
fn user_settings_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".kode/settings.json"))
}

/// Layered rule store plus the mode-aware precedence ladder from the
/// component's public contract: `check(tool, input, ctx) -> Allow | Deny |
/// Ask`.
pub struct PermissionGate {
    session: Mutex<RuleSet>,
    local: RuleSet,
    project: RuleSet,
    user: RuleSet,
    policy: RuleSet,
    matcher: Box<dyn PatternMatcher>,
    workspace_root: PathBuf,
}

impl PermissionGate {
    /// Build a gate with explicit rule sets (used by tests and by embedders
    /// that source `policySettings` from somewhere other than a file).
    pub fn new(
        workspace_root: PathBuf,
        local: RuleSet,
        project: RuleSet,
        user: RuleSet,
        policy: RuleSet,
    ) -> Self {
        Self {
            session: Mutex::new(RuleSet::default()),
            local,
            project,
            user,
            policy,
            matcher: Box::new(DefaultPatternMatcher),
            workspace_root,
        }
    }

    /// Load `localSettings`/`projectSettings`/`userSettings` from their
    /// standard locations under `workspace_root`, migrating the legacy
    /// `.claude/settings.local.json` into `.kode/settings.local.json` on
    /// read if present. `policySettings` starts empty; an embedder wires it
    /// in via [`Self::new`] if it has an admin-supplied policy file.
    pub fn load(workspace_root: impl Into<PathBuf>) -> Self {
        let workspace_root = workspace_root.into();
        let local = load_with_legacy_migration(
            &local_settings_path(&workspace_root),
            Some(&legacy_local_settings_path(&workspace_root)),
        );
        let project = read_rule_set_file(&project_settings_path(&workspace_root)).unwrap_or_default();
        let user = user_settings_path()
            .and_then(|p| read_rule_set_file(&p))
            .unwrap_or_default();
        Self::new(workspace_root, local, project, user, RuleSet::default())
    }

    /// Add a rule that lives only for this conversation.
    pub fn add_session_rule(&self, action: RuleAction, rule: impl Into<String>) {
        let mut session = self.session.lock().expect("session rules poisoned");
        match action {
            RuleAction::Allow => session.allow.push(rule.into()),
            RuleAction::Deny => session.deny.push(rule.into()),
        }
    }

    /// Persist a "remember my choice" rule to its destination. `Session`
    /// never touches disk; `policySettings` is not a valid destination and
    /// is rejected.
    pub fn persist(
        &self,
        destination: PersistDestination,
        action: RuleAction,
        rule: impl Into<String>,
    ) -> anyhow::Result<()> {
        let rule = rule.into();
        if destination == PersistDestination::Session {
            self.add_session_rule(action, rule);
            return Ok(());
        }
        let path = match destination {
            PersistDestination::Session => unreachable!(),
            PersistDestination::LocalSettings => local_settings_path(&self.workspace_root),
            PersistDestination::ProjectSettings => project_settings_path(&self.workspace_root),
            PersistDestination::UserSettings => user_settings_path()
                .ok_or_else(|| anyhow::anyhow!("no home directory to resolve user settings"))?,
        };
        let mut rules = read_rule_set_file(&path).unwrap_or_default();
        match action {
            RuleAction::Allow => rules.allow.push(rule),
            RuleAction::Deny => rules.deny.push(rule),
        }
        write_rule_set_file(&path, &rules)
    }

    fn first_match<'a>(
        &self,
        sets: &[&'a RuleSet],
        tool: &dyn Tool,
        subject: &str,
        pick: impl Fn(&'a RuleSet) -> &'a [String],
    ) -> bool {
        sets.iter().any(|set| {
            pick(set).iter().any(|rule| {
                parse_rule(rule).is_some_and(|(name, pattern)| {
                    name == tool.name()
                        && self
                            .matcher
                            .matches(tool.permission_subject_kind(), pattern, subject)
                })
            })
        })
    }

    /// Evaluate a requested `(tool, input)` under the given conversation
    /// mode. Follows the seven-step precedence ladder: bypass, plan-mode
    /// read-only gate, deny rules, allow rules, acceptEdits, dontAsk, ask.
    pub fn check(&self, tool: &dyn Tool, input: &serde_json::Value, mode: PermissionMode) -> PermissionDecision {
        if mode == PermissionMode::BypassPermissions {
            return PermissionDecision::Allow;
        }
        if mode == PermissionMode::Plan && !tool.is_read_only() {
            return PermissionDecision::Deny("plan-mode".to_string());
        }

        let subject = tool.permission_subject(input).unwrap_or_default();
        let session = self.session.lock().expect("session rules poisoned");
        let sets: [&RuleSet; 5] = [&session, &self.local, &self.project, &self.user, &self.policy];

        if self.first_match(&sets, tool, &subject, |s| &s.deny) {
            return PermissionDecision::Deny(format!("denied by rule for {}", tool.name()));
        }
        if self.first_match(&sets, tool, &subject, |s| &s.allow) {
            return PermissionDecision::Allow;
        }
        drop(session);

        if mode == PermissionMode::AcceptEdits && is_edit_class(tool) {
            return PermissionDecision::Allow;
        }
        if mode == PermissionMode::DontAsk {
            return PermissionDecision::Allow;
        }
        PermissionDecision::Ask(format!("allow {}?", tool.name()))
    }
}

/// A tool is "edit-class" for the `acceptEdits` mode rule when it mutates a
/// file-shaped target: not read-only, and its permission subject is a path.
fn is_edit_class(tool: &dyn Tool) -> bool {
    !tool.is_read_only() && tool.permission_subject_kind() == PermissionSubjectKind::Path
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tempfile::tempdir;

    use super::*;
    use crate::tool::{ToolCall, ToolContext, ToolOutput};

    struct PathTool(bool); // bool = read_only
    #[async_trait]
    impl Tool for PathTool {
        fn name(&self) -> &str {
            "edit_file"
        }
        fn description(&self) -> &str {
            "edits a file"
        }
        fn parameters_schema(&self) -> Value {
            json!({})
        }
        fn is_read_only(&self) -> bool {
            self.0
        }
        fn permission_subject_kind(&self) -> PermissionSubjectKind {
            PermissionSubjectKind::Path
        }
        fn permission_subject(&self, input: &Value) -> Option<String> {
            input.get("path").and_then(|v| v.as_str()).map(str::to_string)
        }
        async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> ToolOutput {
            ToolOutput::ok(&call.id, "ok")
        }
    }

    struct CommandTool;
    #[async_trait]
    impl Tool for CommandTool {
        fn name(&self) -> &str {
            "run_terminal_command"
        }
        fn description(&self) -> &str {
            "runs a command"
        }
        fn parameters_schema(&self) -> Value {
            json!({})
        }
        fn permission_subject_kind(&self) -> PermissionSubjectKind {
            PermissionSubjectKind::Command
        }
        fn permission_subject(&self, input: &Value) -> Option<String> {
            input.get("command").and_then(|v| v.as_str()).map(str::to_string)
        }
        async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> ToolOutput {
            ToolOutput::ok(&call.id, "ok")
        }
    }

    fn empty_gate() -> PermissionGate {
        PermissionGate::new(
            PathBuf::from("/tmp/does-not-exist"),
            RuleSet::default(),
            RuleSet::default(),
            RuleSet::default(),
            RuleSet::default(),
        )
    }

    // -- pattern matching --

    #[test]
    fn command_pattern_with_star_suffix_matches_any_args() {
        assert!(command_match("git push:*", "git push origin main"));
        assert!(!command_match("git push:*", "git pull"));
    }

    #[test]
    fn command_pattern_without_suffix_requires_exact_match() {
        assert!(command_match("ls -la", "ls -la"));
        assert!(!command_match("ls -la", "ls -la /tmp"));
    }

    #[test]
    fn namespace_pattern_matches_prefix() {
        assert!(namespace_match("scratch:*", "scratch:summarize"));
        assert!(!namespace_match("scratch:*", "other:summarize"));
    }

    #[test]
    fn glob_pattern_over_path() {
        assert!(glob_match("/home/*/project/*", "/home/bob/project/src/main.rs"));
        assert!(!glob_match("/home/*/project/*", "/etc/passwd"));
    }

    #[test]
    fn empty_pattern_matches_any_subject() {
        let m = DefaultPatternMatcher;
        assert!(m.matches(PermissionSubjectKind::Path, "", "/anything"));
    }

    #[test]
    fn parse_rule_extracts_tool_and_pattern() {
        assert_eq!(parse_rule("Bash(ls:*)"), Some(("Bash", "ls:*")));
        assert_eq!(parse_rule("Bash()"), Some(("Bash", "")));
        assert_eq!(parse_rule("not-a-rule"), None);
    }

    // -- check() precedence --

    #[test]
    fn bypass_mode_allows_everything() {
        let gate = empty_gate();
        let tool = PathTool(false);
        let decision = gate.check(&tool, &json!({"path": "/etc/shadow"}), PermissionMode::BypassPermissions);
        assert_eq!(decision, PermissionDecision::Allow);
    }

    #[test]
    fn plan_mode_denies_non_read_only_tool() {
        let gate = empty_gate();
        let tool = PathTool(false);
        let decision = gate.check(&tool, &json!({"path": "/tmp/x"}), PermissionMode::Plan);
        assert_eq!(decision, PermissionDecision::Deny("plan-mode".into()));
    }

    #[test]
    fn plan_mode_allows_read_only_tool_when_no_rules_say_otherwise() {
        let gate = empty_gate();
        let tool = PathTool(true);
        let decision = gate.check(&tool, &json!({"path": "/tmp/x"}), PermissionMode::Plan);
        // Read-only passes the plan-mode gate, falls through to Ask by default.
        assert!(matches!(decision, PermissionDecision::Ask(_)));
    }

    #[test]
    fn deny_rule_beats_allow_rule_for_same_pattern() {
        let gate = PermissionGate::new(
            PathBuf::from("/tmp/does-not-exist"),
            RuleSet {
                allow: vec!["edit_file(/tmp/*)".into()],
                deny: vec!["edit_file(/tmp/*)".into()],
            },
            RuleSet::default(),
            RuleSet::default(),
            RuleSet::default(),
        );
        let tool = PathTool(false);
        let decision = gate.check(&tool, &json!({"path": "/tmp/x"}), PermissionMode::Default);
        assert!(matches!(decision, PermissionDecision::Deny(_)));
    }

    #[test]
    fn deny_rule_beats_accept_edits_mode() {
        let gate = PermissionGate::new(
            PathBuf::from("/tmp/does-not-exist"),
            RuleSet::default(),
            RuleSet::default(),
            RuleSet { allow: vec![], deny: vec!["edit_file()".into()] },
            RuleSet::default(),
        );
        let tool = PathTool(false);
        let decision = gate.check(&tool, &json!({"path": "/tmp/x"}), PermissionMode::AcceptEdits);
        assert!(matches!(decision, PermissionDecision::Deny(_)));
    }

    #[test]
    fn allow_rule_matches_before_mode_fallback() {
        let gate = PermissionGate::new(
            PathBuf::from("/tmp/does-not-exist"),
            RuleSet { allow: vec!["run_terminal_command(ls:*)".into()], deny: vec![] },
            RuleSet::default(),
            RuleSet::default(),
            RuleSet::default(),
        );
        let tool = CommandTool;
        let decision = gate.check(&tool, &json!({"command": "ls -la"}), PermissionMode::Default);
        assert_eq!(decision, PermissionDecision::Allow);
    }

    #[test]
    fn accept_edits_allows_edit_class_tool() {
        let gate = empty_gate();
        let tool = PathTool(false);
        let decision = gate.check(&tool, &json!({"path": "/tmp/x"}), PermissionMode::AcceptEdits);
        assert_eq!(decision, PermissionDecision::Allow);
    }

    #[test]
    fn accept_edits_does_not_auto_allow_command_tool() {
        let gate = empty_gate();
        let tool = CommandTool;
        let decision = gate.check(&tool, &json!({"command": "rm -rf /"}), PermissionMode::AcceptEdits);
        assert!(matches!(decision, PermissionDecision::Ask(_)));
    }

    #[test]
    fn dont_ask_mode_allows_absent_any_rule() {
        let gate = empty_gate();
        let tool = CommandTool;
        let decision = gate.check(&tool, &json!({"command": "anything"}), PermissionMode::DontAsk);
        assert_eq!(decision, PermissionDecision::Allow);
    }

    #[test]
    fn dont_ask_mode_still_respects_deny() {
        let gate = PermissionGate::new(
            PathBuf::from("/tmp/does-not-exist"),
            RuleSet::default(),
            RuleSet::default(),
            RuleSet { allow: vec![], deny: vec!["run_terminal_command()".into()] },
            RuleSet::default(),
        );
        let tool = CommandTool;
        let decision = gate.check(&tool, &json!({"command": "anything"}), PermissionMode::DontAsk);
        assert!(matches!(decision, PermissionDecision::Deny(_)));
    }

    #[test]
    fn default_mode_with_no_rules_asks() {
        let gate = empty_gate();
        let tool = CommandTool;
        let decision = gate.check(&tool, &json!({"command": "echo hi"}), PermissionMode::Default);
        assert!(matches!(decision, PermissionDecision::Ask(_)));
    }

    #[test]
    fn session_rule_is_consulted_and_never_persisted() {
        let gate = empty_gate();
        gate.add_session_rule(RuleAction::Allow, "run_terminal_command(echo:*)".to_string());
        let tool = CommandTool;
        let decision = gate.check(&tool, &json!({"command": "echo hi"}), PermissionMode::Default);
        assert_eq!(decision, PermissionDecision::Allow);
    }

    // -- settings-file persistence --

    #[test]
    fn persist_to_project_settings_writes_json_file() {
        let dir = tempdir().unwrap();
        let gate = PermissionGate::load(dir.path());
        gate.persist(
            PersistDestination::ProjectSettings,
            RuleAction::Allow,
            "run_terminal_command(echo:*)",
        )
        .unwrap();
        let path = project_settings_path(dir.path());
        assert!(path.is_file());
        let rules = read_rule_set_file(&path).unwrap();
        assert_eq!(rules.allow, vec!["run_terminal_command(echo:*)".to_string()]);
    }

    #[test]
    fn legacy_claude_settings_are_migrated_on_read() {
        let dir = tempdir().unwrap();
        let legacy = legacy_local_settings_path(dir.path());
        std::fs::create_dir_all(legacy.parent().unwrap()).unwrap();
        std::fs::write(
            &legacy,
            r#"{"permissions":{"allow":["edit_file(/tmp/*)"],"deny":[]}}"#,
        )
        .unwrap();

        let gate = PermissionGate::load(dir.path());
        let tool = PathTool(false);
        let decision = gate.check(&tool, &json!({"path": "/tmp/x"}), PermissionMode::Default);
        assert_eq!(decision, PermissionDecision::Allow);

        // Migrated copy must now exist at the new location.
        assert!(local_settings_path(dir.path()).is_file());
    }
}
