//! Hook pipeline: seven phases, a shared [`HookContext`], and the helper
//! hooks `spec.md` §4.3 requires.
//!
//! Every phase shares one hook signature, `async fn call(&self, ctx: &mut
//! HookContext) -> Result<()>`. The phases differ only in how the agent loop
//! interprets a returned error (see [`run_phase`]'s doc comment) and in which
//! `HookContext` fields are meaningful, not in the hook's shape. This keeps
//! one trait and one registration mechanism for all seven phases instead of
//! seven bespoke function types. It is the unified model `spec.md` §9 marks
//! as authoritative over the source's two incompatible hook generations.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, HookPhase, Result};
use crate::message::{Message, Role, Usage};
use crate::stream::Response;
use crate::tool::ToolResult;

/// Per-request scratch space threaded through every hook phase of one
/// `create_response` call. Created at request start, dropped at request end;
/// never shared across requests (`spec.md` §3).
#[derive(Debug, Clone, Default)]
pub struct HookContext {
    /// Mutable system prompt; hooks may rewrite it before the model call.
    pub system_prompt: String,
    /// Mutable working message history for this request.
    pub messages: Vec<Message>,

    /// Populated once the final `Response` exists (post-generation phases).
    pub response: Option<Response>,
    pub output_messages: Vec<Message>,
    pub usage: Usage,

    /// Tool-phase fields, populated only during `PreToolUse`/`PostToolUse`/
    /// `PostToolUseFailure`.
    pub tool_name: Option<String>,
    pub tool_use_id: Option<String>,
    pub tool_input: Option<serde_json::Value>,
    pub tool_result: Option<ToolResult>,
    /// A `PreToolUse` hook sets this to replace the input actually dispatched
    /// to the tool.
    pub updated_input: Option<serde_json::Value>,
    /// Extra context strings a tool-phase hook wants surfaced to the model
    /// alongside the tool result.
    pub additional_context: Vec<String>,

    /// Zero-based iteration counter of the agent loop.
    pub iteration: usize,
    /// True once a `Stop` hook has already requested one continuation, so
    /// the loop can bound repeated stop-hook continuations.
    pub stop_hook_active: bool,
    /// Set by a `Stop` hook to request the loop continue with this message
    /// appended as a new user turn. `None` means "let the request finish."
    pub stop_continuation: Option<String>,

    /// Free-form state carried across every hook phase of this request.
    pub values: HashMap<String, serde_json::Value>,
}

impl HookContext {
    pub fn new(system_prompt: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            messages,
            ..Default::default()
        }
    }
}

/// A single hook. All seven phases share this trait; the agent loop decides
/// how to react to an `Err` based on which phase is running (see
/// [`run_phase`]).
#[async_trait]
pub trait Hook: Send + Sync {
    async fn call(&self, ctx: &mut HookContext) -> Result<()>;
}

struct FnHook<F>(F);

#[async_trait]
impl<F, Fut> Hook for FnHook<F>
where
    F: Fn(&mut HookContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn call(&self, ctx: &mut HookContext) -> Result<()> {
        (self.0)(ctx).await
    }
}

/// Wraps a plain async closure as a [`Hook`] trait object, for callers who
/// don't want to name a type.
pub fn hook_fn<F, Fut>(f: F) -> Arc<dyn Hook>
where
    F: Fn(&mut HookContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnHook(f))
}

/// Registration table for the seven hook phases, run in registration order
/// within each phase.
#[derive(Clone, Default)]
pub struct Hooks {
    pub pre_generation: Vec<Arc<dyn Hook>>,
    pub pre_iteration: Vec<Arc<dyn Hook>>,
    pub pre_tool_use: Vec<Arc<dyn Hook>>,
    pub post_tool_use: Vec<Arc<dyn Hook>>,
    pub post_tool_use_failure: Vec<Arc<dyn Hook>>,
    pub post_generation: Vec<Arc<dyn Hook>>,
    pub stop: Vec<Arc<dyn Hook>>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, phase: HookPhase, hook: Arc<dyn Hook>) {
        self.phase_mut(phase).push(hook);
    }

    fn phase_mut(&mut self, phase: HookPhase) -> &mut Vec<Arc<dyn Hook>> {
        match phase {
            HookPhase::PreGeneration => &mut self.pre_generation,
            HookPhase::PreIteration => &mut self.pre_iteration,
            HookPhase::PreToolUse => &mut self.pre_tool_use,
            HookPhase::PostToolUse => &mut self.post_tool_use,
            HookPhase::PostToolUseFailure => &mut self.post_tool_use_failure,
            HookPhase::PostGeneration => &mut self.post_generation,
            HookPhase::Stop => &mut self.stop,
        }
    }

    pub fn phase(&self, phase: HookPhase) -> &[Arc<dyn Hook>] {
        match phase {
            HookPhase::PreGeneration => &self.pre_generation,
            HookPhase::PreIteration => &self.pre_iteration,
            HookPhase::PreToolUse => &self.pre_tool_use,
            HookPhase::PostToolUse => &self.post_tool_use,
            HookPhase::PostToolUseFailure => &self.post_tool_use_failure,
            HookPhase::PostGeneration => &self.post_generation,
            HookPhase::Stop => &self.stop,
        }
    }
}

/// Runs every hook registered for `phase`, in order, against `ctx`.
///
/// - A hook returning `Err(Error::HookAbort { .. })` always stops the phase
///   immediately and is returned to the caller, regardless of `phase`
///   (`spec.md` §4.3 table, "HookAbortError" column).
/// - Otherwise, when `short_circuit_on_error` is true (pre-phases and
///   `Stop`), the first non-abort error also stops the phase and is
///   returned, letting the caller decide whether to abort the request or
///   (for `PreToolUse`) convert it into a synthetic deny result.
/// - When `short_circuit_on_error` is false (the three post-phases), a
///   non-abort error is logged and the remaining hooks still run, matching
///   "log only" semantics. Only a `HookAbort` can stop a post-phase early.
pub async fn run_phase(
    hooks: &[Arc<dyn Hook>],
    ctx: &mut HookContext,
    phase: HookPhase,
    short_circuit_on_error: bool,
) -> Result<()> {
    for hook in hooks {
        match hook.call(ctx).await {
            Ok(()) => {}
            Err(e) if e.is_hook_abort() => return Err(e),
            Err(e) if short_circuit_on_error => return Err(e),
            Err(e) => {
                log::warn!("hook error in {phase} phase (logged, continuing): {e}");
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Helper hooks
// ---------------------------------------------------------------------------

/// Prepends a user-role message to `ctx.messages`. Typically registered at
/// `PreGeneration` to inject standing instructions or retrieved context
/// ahead of the caller's own input.
pub struct InjectContext {
    text: String,
}

impl InjectContext {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[async_trait]
impl Hook for InjectContext {
    async fn call(&self, ctx: &mut HookContext) -> Result<()> {
        ctx.messages.insert(0, Message::user(self.text.clone()));
        Ok(())
    }
}

/// Logs usage counters after each generation. Registered at `PostGeneration`.
pub struct UsageLogger;

#[async_trait]
impl Hook for UsageLogger {
    async fn call(&self, ctx: &mut HookContext) -> Result<()> {
        log::info!(
            "usage: input={} output={} cache_creation={} cache_read={} context={}",
            ctx.usage.input_tokens,
            ctx.usage.output_tokens,
            ctx.usage.cache_creation_input_tokens,
            ctx.usage.cache_read_input_tokens,
            ctx.usage.context_tokens(),
        );
        Ok(())
    }
}

/// Wraps any tool-phase hook so it only runs when the current tool's name
/// matches a regex (`spec.md` §4.3: "`MatchTool` (regex filter wrapper for
/// any tool-phase hook)").
pub struct MatchTool {
    pattern: regex::Regex,
    inner: Arc<dyn Hook>,
}

impl MatchTool {
    pub fn new(pattern: &str, inner: Arc<dyn Hook>) -> std::result::Result<Self, regex::Error> {
        Ok(Self {
            pattern: regex::Regex::new(pattern)?,
            inner,
        })
    }
}

#[async_trait]
impl Hook for MatchTool {
    async fn call(&self, ctx: &mut HookContext) -> Result<()> {
        let matches = ctx
            .tool_name
            .as_deref()
            .map(|name| self.pattern.is_match(name))
            .unwrap_or(false);
        if matches {
            self.inner.call(ctx).await
        } else {
            Ok(())
        }
    }
}

/// Signature for a compaction summarizer: given the messages to compact,
/// returns a short replacement list (`spec.md` §4.5).
pub type Summarizer = Arc<
    dyn Fn(
            Vec<Message>,
        ) -> std::pin::Pin<
            Box<dyn Future<Output = Result<Vec<Message>>> + Send>,
        > + Send
        + Sync,
>;

/// Threshold-triggered summarization, usable as a standalone `Hook` for
/// callers that wire compaction through the hook pipeline (e.g.
/// `PostGeneration`) instead of relying on the agent loop's built-in
/// compaction step (`spec.md` §4.1 step 5, §4.5). Both paths call
/// [`crate::context::should_compact`] so the deferred-while-tool-use-pending
/// rule is identical either way.
pub struct CompactionHook {
    pub threshold_tokens: u64,
    pub summarizer: Summarizer,
}

#[async_trait]
impl Hook for CompactionHook {
    async fn call(&self, ctx: &mut HookContext) -> Result<()> {
        if !crate::context::should_compact(&ctx.usage, self.threshold_tokens, ctx.messages.last()) {
            return Ok(());
        }
        let replacement = (self.summarizer)(std::mem::take(&mut ctx.messages)).await?;
        if replacement.is_empty() {
            return Err(Error::other("compaction summarizer produced no output"));
        }
        ctx.messages = replacement;
        Ok(())
    }
}

/// Extracts a `<summary>...</summary>` region from model output, per
/// `spec.md` §4.5's summarizer contract. Case-insensitive tags, trimmed
/// whitespace; a missing tag yields an empty string, which callers must
/// treat as a failed compaction.
pub fn extract_summary(model_text: &str) -> String {
    let lower = model_text.to_lowercase();
    let open = match lower.find("<summary>") {
        Some(i) => i + "<summary>".len(),
        None => return String::new(),
    };
    let close = match lower[open..].find("</summary>") {
        Some(i) => open + i,
        None => return String::new(),
    };
    model_text[open..close].trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn inject_context_prepends_user_message() {
        let hook = InjectContext::new("standing instructions");
        let mut ctx = HookContext::new("sys", vec![Message::user("hi")]);
        hook.call(&mut ctx).await.unwrap();
        assert_eq!(ctx.messages.len(), 2);
        assert_eq!(ctx.messages[0].role, Role::User);
        assert_eq!(ctx.messages[0].text(), "standing instructions");
    }

    #[tokio::test]
    async fn match_tool_only_runs_inner_hook_on_name_match() {
        let inner = hook_fn(|ctx: &mut HookContext| {
            ctx.values.insert("ran".into(), serde_json::json!(true));
            async move { Ok(()) }
        });
        let matcher = MatchTool::new("^bash.*", inner).unwrap();

        let mut ctx = HookContext::new("sys", vec![]);
        ctx.tool_name = Some("read_file".into());
        matcher.call(&mut ctx).await.unwrap();
        assert!(!ctx.values.contains_key("ran"));

        ctx.tool_name = Some("bash_exec".into());
        matcher.call(&mut ctx).await.unwrap();
        assert!(ctx.values.contains_key("ran"));
    }

    #[tokio::test]
    async fn run_phase_short_circuits_pre_phases_on_first_error() {
        let hook1 = hook_fn(|_ctx: &mut HookContext| async move { Err(Error::tool("nope")) });
        let hook2 = hook_fn(|ctx: &mut HookContext| {
            ctx.values.insert("ran2".into(), serde_json::json!(true));
            async move { Ok(()) }
        });
        let mut ctx = HookContext::new("sys", vec![]);
        let hooks: Vec<Arc<dyn Hook>> = vec![hook1, hook2];
        let result = run_phase(&hooks, &mut ctx, HookPhase::PreGeneration, true).await;
        assert!(result.is_err());
        assert!(!ctx.values.contains_key("ran2"));
    }

    #[tokio::test]
    async fn run_phase_logs_and_continues_for_post_phases() {
        let hook1 = hook_fn(|_ctx: &mut HookContext| async move { Err(Error::tool("nope")) });
        let hook2 = hook_fn(|ctx: &mut HookContext| {
            ctx.values.insert("ran2".into(), serde_json::json!(true));
            async move { Ok(()) }
        });
        let mut ctx = HookContext::new("sys", vec![]);
        let hooks: Vec<Arc<dyn Hook>> = vec![hook1, hook2];
        let result = run_phase(&hooks, &mut ctx, HookPhase::PostGeneration, false).await;
        assert!(result.is_ok());
        assert!(ctx.values.contains_key("ran2"));
    }

    #[tokio::test]
    async fn run_phase_always_stops_on_hook_abort_even_in_post_phase() {
        let hook1 = hook_fn(|_ctx: &mut HookContext| async move {
            Err(Error::hook_abort(HookPhase::PostGeneration, "fatal", None))
        });
        let hook2 = hook_fn(|ctx: &mut HookContext| {
            ctx.values.insert("ran2".into(), serde_json::json!(true));
            async move { Ok(()) }
        });
        let mut ctx = HookContext::new("sys", vec![]);
        let hooks: Vec<Arc<dyn Hook>> = vec![hook1, hook2];
        let result = run_phase(&hooks, &mut ctx, HookPhase::PostGeneration, false).await;
        assert!(result.is_err());
        assert!(!ctx.values.contains_key("ran2"));
    }

    #[test]
    fn extract_summary_is_case_insensitive_and_trims() {
        let text = "preamble\n<SUMMARY>\n  the gist  \n</Summary>\ntrailer";
        assert_eq!(extract_summary(text), "the gist");
    }

    #[test]
    fn extract_summary_missing_tags_yields_empty_string() {
        assert_eq!(extract_summary("no tags here"), "");
    }

    #[tokio::test]
    async fn compaction_hook_defers_when_last_message_has_unresolved_tool_use() {
        let summarizer: Summarizer = Arc::new(|_msgs| {
            Box::pin(async move { Ok(vec![Message::user("summary")]) })
        });
        let hook = CompactionHook {
            threshold_tokens: 10,
            summarizer,
        };
        let mut ctx = HookContext::new(
            "sys",
            vec![Message::assistant(vec![crate::message::Content::tool_use(
                "t1",
                "echo",
                serde_json::json!({}),
            )])],
        );
        ctx.usage.input_tokens = 100;
        hook.call(&mut ctx).await.unwrap();
        assert_eq!(ctx.messages.len(), 1);
        assert!(ctx.messages[0].has_tool_use());
    }

    #[tokio::test]
    async fn compaction_hook_replaces_history_when_over_threshold() {
        let summarizer: Summarizer =
            Arc::new(|_msgs| Box::pin(async move { Ok(vec![Message::user("summary")]) }));
        let hook = CompactionHook {
            threshold_tokens: 10,
            summarizer,
        };
        let mut ctx = HookContext::new("sys", vec![Message::user("old turn")]);
        ctx.usage.input_tokens = 100;
        hook.call(&mut ctx).await.unwrap();
        assert_eq!(ctx.messages.len(), 1);
        assert_eq!(ctx.messages[0].text(), "summary");
    }

    #[tokio::test]
    async fn compaction_hook_is_idempotent_below_threshold() {
        let summarizer: Summarizer =
            Arc::new(|_msgs| Box::pin(async move { Ok(vec![Message::user("summary")]) }));
        let hook = CompactionHook {
            threshold_tokens: 1000,
            summarizer,
        };
        let original = vec![Message::user("old turn")];
        let mut ctx = HookContext::new("sys", original.clone());
        ctx.usage.input_tokens = 5;
        hook.call(&mut ctx).await.unwrap();
        assert_eq!(ctx.messages, original);
    }
}
