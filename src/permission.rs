//! Permission Manager: mode + rule evaluation pipeline with session
//! allowlists (`spec.md` §4.4).
//!
//! State (mode, rule list, session allowlist) is shared across concurrent
//! requests behind a `parking_lot::RwLock`; [`PermissionManager::evaluate_tool_use`]
//! clones the rule list out from under the lock before matching so that rule
//! evaluation (which may run user-supplied glob/regex matchers) never holds
//! the lock, per `spec.md` §5.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{HookPhase, Result};
use crate::hooks::{run_phase, Hook, HookContext};
use crate::matcher::{
    command_prefix_match, domain_match, extract_field, glob_match, COMMAND_FIELDS, PATH_FIELDS,
    URL_FIELDS,
};
use crate::tool::ToolAnnotations;

/// Permission mode, evaluated at step 6 of [`PermissionManager::evaluate_tool_use`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Default,
    Plan,
    AcceptEdits,
    BypassPermissions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    Deny,
    Allow,
    Ask,
}

/// What a [`PermissionRule`] matches against.
#[derive(Debug, Clone)]
pub enum Specifier {
    /// Shell-style glob matched against the tool's name.
    NameGlob(String),
    /// Shell-style glob matched against a path-like input field
    /// (`path`/`file_path`/`file`).
    PathGlob(String),
    /// Hostname equality/suffix matched against a URL-like input field
    /// (`url`/`uri`).
    Domain(String),
    /// Prefix/word match against a command-like input field
    /// (`command`/`cmd`/`script`/`code`).
    CommandPrefix(String),
}

/// A declarative allow/deny/ask rule. Rules are order-preserving within each
/// `kind` (`spec.md` §3).
#[derive(Debug, Clone)]
pub struct PermissionRule {
    pub kind: RuleKind,
    pub specifier: Specifier,
    pub message: Option<String>,
}

impl PermissionRule {
    pub fn deny(specifier: Specifier, message: impl Into<String>) -> Self {
        Self {
            kind: RuleKind::Deny,
            specifier,
            message: Some(message.into()),
        }
    }

    pub fn allow(specifier: Specifier) -> Self {
        Self {
            kind: RuleKind::Allow,
            specifier,
            message: None,
        }
    }

    pub fn ask(specifier: Specifier, message: impl Into<String>) -> Self {
        Self {
            kind: RuleKind::Ask,
            specifier,
            message: Some(message.into()),
        }
    }

    fn matches(&self, tool_name: &str, input: &serde_json::Value) -> bool {
        match &self.specifier {
            Specifier::NameGlob(pattern) => glob_match(pattern, tool_name),
            Specifier::PathGlob(pattern) => extract_field(input, PATH_FIELDS)
                .map(|p| glob_match(pattern, p))
                .unwrap_or(false),
            Specifier::Domain(pattern) => extract_field(input, URL_FIELDS)
                .map(|u| domain_match(pattern, u))
                .unwrap_or(false),
            Specifier::CommandPrefix(prefix) => extract_field(input, COMMAND_FIELDS)
                .map(|c| command_prefix_match(prefix, c))
                .unwrap_or(false),
        }
    }
}

/// Outcome of [`PermissionManager::evaluate_tool_use`].
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Allow { category: Option<String> },
    Deny { message: String },
    Ask { message: Option<String>, category: Option<String> },
}

impl Decision {
    pub fn is_allow(&self) -> bool {
        matches!(self, Decision::Allow { .. })
    }
}

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Confirmer callback invoked for an `Ask` decision; `Ok(true)` approves.
pub type ConfirmerFn =
    Arc<dyn Fn(&str, &serde_json::Value, Option<&str>) -> BoxFuture<Result<bool>> + Send + Sync>;

/// Host-supplied override, consulted at step 7 when mode evaluation did not
/// produce a definitive decision. Returning `None` means "continue" (defer
/// to the step-8 fallback).
pub type CanUseToolFn = Arc<
    dyn Fn(&str, &serde_json::Value) -> BoxFuture<Result<Option<Decision>>> + Send + Sync,
>;

const BUILTIN_CATEGORIES: &[&str] = &["bash", "edit", "read", "search"];

/// Coarse category used for session-scoped "allow all" approvals
/// (`spec.md` glossary: Tool Category). Case-insensitive substring match
/// against the built-in keys; falls back to the tool's own name.
pub fn tool_category(name: &str) -> String {
    let lower = name.to_lowercase();
    for cat in BUILTIN_CATEGORIES {
        if lower.contains(cat) {
            return (*cat).to_string();
        }
    }
    name.to_string()
}

const EDIT_NAME_WORDS: &[&str] = &["edit", "write", "create", "mkdir", "touch", "mv", "cp", "rm"];
const EDIT_COMMAND_WORDS: &[&str] = &[
    "mkdir", "touch", "rm", "rmdir", "mv", "cp", "cat >", "echo >", "tee", "sed -i", "chmod",
    "chown",
];

fn is_edit_operation(name: &str, input: &serde_json::Value, annotations: &ToolAnnotations) -> bool {
    if annotations.edit_hint {
        return true;
    }
    let lower_name = name.to_lowercase();
    if EDIT_NAME_WORDS.iter().any(|w| lower_name.contains(w)) {
        return true;
    }
    if lower_name.contains("bash") {
        if let Some(command) = extract_field(input, COMMAND_FIELDS) {
            let lower_command = command.to_lowercase();
            return EDIT_COMMAND_WORDS
                .iter()
                .any(|w| lower_command.contains(w));
        }
    }
    false
}

struct Inner {
    mode: Mode,
    rules: Vec<PermissionRule>,
    allowlist: HashSet<String>,
}

/// Evaluates tool calls against mode, rules, and a session allowlist.
/// Cheap to clone (wraps an `Arc`-shared inner state), so one instance is
/// typically constructed once and shared across every `Agent` request.
pub struct PermissionManager {
    inner: RwLock<Inner>,
    confirmer: Option<ConfirmerFn>,
    can_use_tool: Option<CanUseToolFn>,
    pre_tool_use_hooks: Vec<Arc<dyn Hook>>,
}

impl PermissionManager {
    pub fn new(mode: Mode, rules: Vec<PermissionRule>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                mode,
                rules,
                allowlist: HashSet::new(),
            }),
            confirmer: None,
            can_use_tool: None,
            pre_tool_use_hooks: Vec::new(),
        }
    }

    pub fn with_confirmer(mut self, confirmer: ConfirmerFn) -> Self {
        self.confirmer = Some(confirmer);
        self
    }

    pub fn with_can_use_tool(mut self, can_use_tool: CanUseToolFn) -> Self {
        self.can_use_tool = Some(can_use_tool);
        self
    }

    /// Config-level `PreToolUse` hooks consulted at step 1, ahead of rules
    /// and mode. A hook that wants to short-circuit with a definitive
    /// decision sets `ctx.values["permission_decision"]` to a JSON-encoded
    /// `{"allow"|"deny"|"ask", "message"?, "category"?}` object; anything
    /// else (including `Ok(())` with no such key) is treated as "continue."
    pub fn with_pre_tool_use_hooks(mut self, hooks: Vec<Arc<dyn Hook>>) -> Self {
        self.pre_tool_use_hooks = hooks;
        self
    }

    pub fn set_mode(&self, mode: Mode) {
        self.inner.write().mode = mode;
    }

    pub fn mode(&self) -> Mode {
        self.inner.read().mode
    }

    pub fn add_rules(&self, rules: impl IntoIterator<Item = PermissionRule>) {
        self.inner.write().rules.extend(rules);
    }

    /// Adds `category_key` to the session allowlist. Any subsequent
    /// `evaluate_tool_use` call observes it (`spec.md` §8 invariant 7).
    pub fn allow_for_session(&self, category_key: impl Into<String>) {
        self.inner.write().allowlist.insert(category_key.into());
    }

    pub fn clear_session_allowlist(&self) {
        self.inner.write().allowlist.clear();
    }

    fn snapshot_rules(&self) -> Vec<PermissionRule> {
        self.inner.read().rules.clone()
    }

    /// Runs the eight-step pipeline of `spec.md` §4.4 and returns the final
    /// [`Decision`].
    pub async fn evaluate_tool_use(
        &self,
        name: &str,
        input: &serde_json::Value,
        annotations: &ToolAnnotations,
    ) -> Result<Decision> {
        // Step 1: config-level PreToolUse hooks.
        if !self.pre_tool_use_hooks.is_empty() {
            let mut ctx = HookContext::new("", vec![]);
            ctx.tool_name = Some(name.to_string());
            ctx.tool_input = Some(input.clone());
            run_phase(&self.pre_tool_use_hooks, &mut ctx, HookPhase::PreToolUse, true).await?;
            if let Some(raw) = ctx.values.get("permission_decision") {
                if let Some(decision) = parse_decision(raw) {
                    return Ok(decision);
                }
            }
        }

        // Step 2: session allowlist.
        let category = tool_category(name);
        if self.inner.read().allowlist.contains(&category) {
            return Ok(Decision::Allow {
                category: Some(category),
            });
        }

        let rules = self.snapshot_rules();

        // Step 3: deny rules.
        if let Some(rule) = rules
            .iter()
            .filter(|r| r.kind == RuleKind::Deny)
            .find(|r| r.matches(name, input))
        {
            return Ok(Decision::Deny {
                message: rule.message.clone().unwrap_or_default(),
            });
        }

        // Step 4: allow rules.
        if rules
            .iter()
            .filter(|r| r.kind == RuleKind::Allow)
            .any(|r| r.matches(name, input))
        {
            return Ok(Decision::Allow { category: None });
        }

        // Step 5: ask rules.
        if let Some(rule) = rules
            .iter()
            .filter(|r| r.kind == RuleKind::Ask)
            .find(|r| r.matches(name, input))
        {
            return Ok(Decision::Ask {
                message: rule.message.clone(),
                category: Some(category.clone()),
            });
        }

        // Step 6: mode check.
        let mode_decision = match self.mode() {
            Mode::BypassPermissions => Some(Decision::Allow { category: None }),
            Mode::Plan => Some(if annotations.read_only_hint {
                Decision::Allow { category: None }
            } else {
                Decision::Deny {
                    message: "plan mode only permits read-only tools".to_string(),
                }
            }),
            Mode::AcceptEdits => {
                if is_edit_operation(name, input, annotations) {
                    Some(Decision::Allow { category: None })
                } else {
                    None
                }
            }
            Mode::Default => None,
        };
        if let Some(decision) = mode_decision {
            return Ok(decision);
        }

        // Step 7: CanUseTool callback.
        if let Some(can_use_tool) = &self.can_use_tool {
            if let Some(decision) = (can_use_tool)(name, input).await? {
                return Ok(decision);
            }
        }

        // Step 8: fallback.
        Ok(Decision::Ask {
            message: None,
            category: Some(category),
        })
    }

    /// Invokes the confirmer for an `Ask` decision, if one is configured.
    /// Returns `Ok(true)` to approve. A caller with no confirmer configured
    /// should treat `Ask` as a denial (there is no one to ask).
    pub async fn confirm(
        &self,
        name: &str,
        input: &serde_json::Value,
        message: Option<&str>,
    ) -> Result<bool> {
        match &self.confirmer {
            Some(confirmer) => (confirmer)(name, input, message).await,
            None => Ok(false),
        }
    }
}

fn parse_decision(value: &serde_json::Value) -> Option<Decision> {
    let kind = value.get("kind")?.as_str()?;
    match kind {
        "allow" => Some(Decision::Allow {
            category: value
                .get("category")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        }),
        "deny" => Some(Decision::Deny {
            message: value
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        }),
        "ask" => Some(Decision::Ask {
            message: value
                .get("message")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            category: value
                .get("category")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        }),
        _ => None,
    }
}
