//! Agent Loop: the iteration controller that glues the language model,
//! tools, hooks, permissions, and stores together (`spec.md` §4.1).
//!
//! [`Agent::create_response`] runs one request to completion and returns the
//! final [`Response`]; [`Agent::create_response_stream`] runs the same
//! algorithm on a background task and returns a [`ResponseStream`] that
//! observes it live. The loop calls [`crate::provider::LanguageModel::generate`]
//! rather than `stream`, since this crate's iteration step operates on whole
//! assistant messages ("append the assistant message; if it has no ToolUse,
//! break"), not token deltas, so the non-streaming call is the natural fit.
//! `LanguageModel::stream` remains available for callers who want raw
//! token-level access outside the loop.

use std::sync::Arc;

use futures::future::join_all;

use crate::error::{Error, HookPhase, Result};
use crate::hooks::{run_phase, Hook, HookContext, Hooks, Summarizer};
use crate::ids::{new_thread_id, now};
use crate::message::{Content, Message, Role, Usage};
use crate::permission::{Decision, Mode, PermissionManager};
use crate::provider::{GenerateConfig, LanguageModel, ToolDeclaration};
use crate::session::SessionStore;
use crate::stream::{channel, Response, ResponseEvent, ResponseItem, ResponseStream, ResponseStreamSender};
use crate::thread::{Thread, ThreadRepository};
use crate::tool::{call_with_panic_recovery, Tool, ToolContext, ToolRegistry, ToolResult};
use crate::retry::{retry, RetryConfig};

/// Threshold-triggered compaction wired into the Agent Loop's own iteration
/// step (`spec.md` §4.1 step 5), distinct from [`crate::hooks::CompactionHook`]
/// which wires the same [`crate::context::should_compact`] predicate through
/// the hook pipeline instead.
#[derive(Clone)]
pub struct CompactionConfig {
    pub threshold_tokens: u64,
    pub summarizer: Summarizer,
}

/// Assembled, immutable configuration for running requests (`SPEC_FULL.md`
/// §4.1.a).
pub struct Agent {
    model: Arc<dyn LanguageModel>,
    tools: Arc<ToolRegistry>,
    hooks: Hooks,
    permissions: Arc<PermissionManager>,
    thread_store: Option<Arc<dyn ThreadRepository>>,
    session_store: Option<Arc<dyn SessionStore>>,
    max_iterations: usize,
    max_stop_hook_iterations: usize,
    parallel_tool_use: bool,
    compaction: Option<CompactionConfig>,
    system_prompt: String,
    retry_config: RetryConfig,
}

/// Builder for [`Agent`], mirroring the reference crate's
/// `AgentOptions::builder()` shape.
#[derive(Default)]
pub struct AgentBuilder {
    model: Option<Arc<dyn LanguageModel>>,
    tools: Vec<Arc<dyn Tool>>,
    hooks: Hooks,
    permissions: Option<Arc<PermissionManager>>,
    thread_store: Option<Arc<dyn ThreadRepository>>,
    session_store: Option<Arc<dyn SessionStore>>,
    max_iterations: Option<usize>,
    max_stop_hook_iterations: Option<usize>,
    parallel_tool_use: bool,
    compaction: Option<CompactionConfig>,
    system_prompt: String,
}

impl AgentBuilder {
    pub fn model(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn tools(mut self, tools: Vec<Arc<dyn Tool>>) -> Self {
        self.tools.extend(tools);
        self
    }

    pub fn register_hook(mut self, phase: HookPhase, hook: Arc<dyn Hook>) -> Self {
        self.hooks.register(phase, hook);
        self
    }

    pub fn permissions(mut self, permissions: Arc<PermissionManager>) -> Self {
        self.permissions = Some(permissions);
        self
    }

    pub fn thread_store(mut self, store: Arc<dyn ThreadRepository>) -> Self {
        self.thread_store = Some(store);
        self
    }

    pub fn session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.session_store = Some(store);
        self
    }

    pub fn max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = Some(n);
        self
    }

    pub fn max_stop_hook_iterations(mut self, n: usize) -> Self {
        self.max_stop_hook_iterations = Some(n);
        self
    }

    pub fn parallel_tool_use(mut self, enabled: bool) -> Self {
        self.parallel_tool_use = enabled;
        self
    }

    pub fn compaction(mut self, config: CompactionConfig) -> Self {
        self.compaction = Some(config);
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn build(self) -> Result<Agent> {
        let model = self.model.ok_or_else(|| Error::config("Agent requires a model"))?;
        let tools = Arc::new(ToolRegistry::new(self.tools)?);
        let permissions = self
            .permissions
            .unwrap_or_else(|| Arc::new(PermissionManager::new(Mode::Default, vec![])));
        Ok(Agent {
            model,
            tools,
            hooks: self.hooks,
            permissions,
            thread_store: self.thread_store,
            session_store: self.session_store,
            max_iterations: self.max_iterations.unwrap_or(16),
            max_stop_hook_iterations: self.max_stop_hook_iterations.unwrap_or(4),
            parallel_tool_use: self.parallel_tool_use,
            compaction: self.compaction,
            system_prompt: self.system_prompt,
            retry_config: RetryConfig::default(),
        })
    }
}

/// Per-call input to [`Agent::create_response`] (`spec.md` §4.1 contract).
#[derive(Default)]
pub struct CreateResponseOptions {
    pub input: Option<String>,
    pub messages: Vec<Message>,
    pub thread_id: Option<String>,
    pub fork: bool,
    pub session_id: Option<String>,
    /// Overrides the agent's default system prompt for this call.
    pub instructions: Option<String>,
    /// Overrides the agent's tool set for this call only; the agent's own
    /// registry stays immutable (`spec.md` §5).
    pub tools: Option<Vec<Arc<dyn Tool>>>,
    /// Overrides the agent's model for this call only.
    pub model: Option<Arc<dyn LanguageModel>>,
}

impl CreateResponseOptions {
    pub fn input(text: impl Into<String>) -> Self {
        Self {
            input: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_fork(mut self, fork: bool) -> Self {
        self.fork = fork;
        self
    }
}

struct ToolOutcome {
    item_call: ResponseItem,
    item_result: ResponseItem,
    content: Vec<crate::message::ToolResultContent>,
    is_error: bool,
}

impl Agent {
    pub fn builder() -> AgentBuilder {
        AgentBuilder::default()
    }

    pub async fn create_response(&self, options: CreateResponseOptions) -> Result<Response> {
        self.run(options, None).await
    }

    /// Runs the request on a background task, returning a live
    /// [`ResponseStream`]. Requires `Arc<Agent>` since the task outlives this
    /// call.
    pub fn create_response_stream(self: &Arc<Self>, options: CreateResponseOptions) -> ResponseStream {
        let (tx, rx) = channel();
        let agent = self.clone();
        let tx_task = tx.clone();
        tokio::spawn(async move {
            match agent.run(options, Some(tx_task.clone())).await {
                Ok(response) => {
                    let _ = tx_task.send(ResponseEvent::Completed(response));
                }
                Err(e) => {
                    let _ = tx_task.send(ResponseEvent::Failed { message: e.to_string() });
                }
            }
        });
        rx
    }

    async fn run(&self, options: CreateResponseOptions, sender: Option<ResponseStreamSender>) -> Result<Response> {
        // Step 1: resolve thread id, load/fork existing messages.
        let mut thread_id = options.thread_id.clone().unwrap_or_else(new_thread_id);
        let mut messages: Vec<Message> = Vec::new();
        if let Some(store) = &self.thread_store {
            if options.fork {
                if store.get(&thread_id).await?.is_some() {
                    let forked = store.fork_thread(&thread_id).await?;
                    thread_id = forked.thread_id;
                    messages = forked.messages;
                }
            } else if let Some(existing) = store.get(&thread_id).await? {
                messages = existing.messages;
            }
        }

        // Step 2: append new input.
        let mut new_input_messages = Vec::new();
        if let Some(text) = &options.input {
            new_input_messages.push(Message::user(text.clone()));
        }
        new_input_messages.extend(options.messages.clone());
        if new_input_messages.is_empty() {
            return Err(Error::invalid_input("create_response requires input or messages"));
        }
        messages.extend(new_input_messages.clone());

        // Step 3: PreGeneration hooks.
        let system_prompt = options.instructions.clone().unwrap_or_else(|| self.system_prompt.clone());
        let mut ctx = HookContext::new(system_prompt, messages);
        run_phase(&self.hooks.pre_generation, &mut ctx, HookPhase::PreGeneration, true).await?;

        // Step 4: Init item / response.created event.
        if let Some(sender) = &sender {
            let _ = sender.send(ResponseEvent::Created { thread_id: thread_id.clone() });
        }
        let mut items = vec![ResponseItem::Init { thread_id: thread_id.clone() }];

        let tool_registry: Arc<ToolRegistry> = match &options.tools {
            Some(tools) => Arc::new(ToolRegistry::new(tools.clone())?),
            None => self.tools.clone(),
        };
        let model: Arc<dyn LanguageModel> = options.model.clone().unwrap_or_else(|| self.model.clone());

        let mut output_messages = Vec::new();
        let mut total_usage = Usage::default();
        let mut global_iteration = 0usize;
        let mut stop_hook_iterations = 0usize;

        loop {
            self.run_generation_iterations(
                &mut ctx,
                &tool_registry,
                &model,
                sender.as_ref(),
                &mut items,
                &mut output_messages,
                &mut total_usage,
                &mut global_iteration,
            )
            .await?;

            // Step 6: Stop hook.
            run_phase(&self.hooks.stop, &mut ctx, HookPhase::Stop, true).await?;
            match ctx.stop_continuation.take() {
                Some(reason) if stop_hook_iterations < self.max_stop_hook_iterations => {
                    stop_hook_iterations += 1;
                    ctx.stop_hook_active = true;
                    ctx.messages.push(Message::user(reason));
                }
                _ => break,
            }
        }

        // Step 7: PostGeneration hooks (log only, except HookAbort). The
        // would-be response is populated first so these hooks can inspect it.
        ctx.output_messages = output_messages.clone();
        ctx.response = Some(Response {
            thread_id: thread_id.clone(),
            items: items.clone(),
            usage: total_usage,
            output_messages: output_messages.clone(),
        });
        run_phase(&self.hooks.post_generation, &mut ctx, HookPhase::PostGeneration, false).await?;

        // Step 8: persist.
        if let Some(store) = &self.thread_store {
            let mut thread = store
                .get(&thread_id)
                .await?
                .unwrap_or_else(|| Thread::new(thread_id.clone()));
            thread.messages = ctx.messages.clone();
            thread.updated_at = now();
            store.put(thread).await?;
        }
        if let (Some(store), Some(session_id)) = (&self.session_store, &options.session_id) {
            store.open(session_id).await?;
            store
                .save_turn(session_id, new_input_messages, output_messages.clone(), total_usage)
                .await?;
        }

        // Step 9.
        Ok(Response {
            thread_id,
            items,
            usage: total_usage,
            output_messages,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_generation_iterations(
        &self,
        ctx: &mut HookContext,
        tool_registry: &Arc<ToolRegistry>,
        model: &Arc<dyn LanguageModel>,
        sender: Option<&ResponseStreamSender>,
        items: &mut Vec<ResponseItem>,
        output_messages: &mut Vec<Message>,
        total_usage: &mut Usage,
        global_iteration: &mut usize,
    ) -> Result<()> {
        let declarations: Vec<ToolDeclaration> = tool_registry
            .iter()
            .map(|t| ToolDeclaration {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.schema().clone(),
            })
            .collect();

        while *global_iteration < self.max_iterations {
            ctx.iteration = *global_iteration;
            *global_iteration += 1;

            run_phase(&self.hooks.pre_iteration, ctx, HookPhase::PreIteration, true).await?;

            let generate_config = GenerateConfig {
                messages: ctx.messages.clone(),
                system_prompt: Some(ctx.system_prompt.clone()),
                tools: declarations.clone(),
                ..Default::default()
            };
            let model_ref = model.clone();
            let config_ref = generate_config.clone();
            let generate_result = retry(&self.retry_config, || {
                let model_ref = model_ref.clone();
                let config_ref = config_ref.clone();
                async move { model_ref.generate(&config_ref).await }
            })
            .await?;

            *total_usage += generate_result.usage;
            ctx.usage = *total_usage;

            let assistant_message = Message::assistant(generate_result.content);
            ctx.messages.push(assistant_message.clone());
            output_messages.push(assistant_message.clone());
            items.push(ResponseItem::Message(assistant_message.clone()));

            if !assistant_message.has_tool_use() {
                return Ok(());
            }

            let tool_uses: Vec<(String, String, serde_json::Value)> = assistant_message
                .content
                .iter()
                .filter_map(|c| c.as_tool_use())
                .map(|(id, name, input)| (id.to_string(), name.to_string(), input.clone()))
                .collect();

            let can_parallelize = self.parallel_tool_use
                && tool_uses.len() > 1
                && tool_uses.iter().all(|(_, name, _)| {
                    tool_registry
                        .get(name)
                        .map(|t| !t.annotations().disable_parallel_use)
                        .unwrap_or(true)
                });

            let outcomes = if can_parallelize {
                let futures = tool_uses.into_iter().map(|(id, name, input)| {
                    let mut scratch = ctx.clone();
                    let tool_registry = tool_registry.clone();
                    async move {
                        let outcome = self.run_tool_phase(&mut scratch, &tool_registry, id, name, input, None).await;
                        (outcome, scratch.additional_context)
                    }
                });
                let mut new_context = Vec::new();
                let mut outcomes = Vec::new();
                for (outcome, additional) in join_all(futures).await {
                    outcomes.push(outcome?);
                    new_context.extend(additional);
                }
                ctx.additional_context.extend(new_context);
                outcomes
            } else {
                let mut outcomes = Vec::new();
                for (id, name, input) in tool_uses {
                    outcomes.push(self.run_tool_phase(ctx, tool_registry, id, name, input, sender).await?);
                }
                outcomes
            };

            for outcome in &outcomes {
                items.push(outcome.item_call.clone());
                items.push(outcome.item_result.clone());
            }
            let tool_result_content: Vec<Content> = outcomes
                .iter()
                .map(|o| {
                    let tool_use_id = match &o.item_call {
                        ResponseItem::ToolCall { id, .. } => id.clone(),
                        _ => unreachable!("item_call is always ToolCall"),
                    };
                    Content::tool_result(tool_use_id, o.content.clone(), o.is_error)
                })
                .collect();
            let tool_message = Message::new(Role::User, tool_result_content);
            ctx.messages.push(tool_message.clone());
            output_messages.push(tool_message);

            if let Some(compaction) = &self.compaction {
                if crate::context::should_compact(total_usage, compaction.threshold_tokens, ctx.messages.last()) {
                    let replacement = (compaction.summarizer)(ctx.messages.clone()).await?;
                    if !replacement.is_empty() {
                        ctx.messages = replacement;
                    }
                }
            }
        }
        Ok(())
    }

    async fn run_tool_phase(
        &self,
        ctx: &mut HookContext,
        tool_registry: &ToolRegistry,
        id: String,
        name: String,
        input: serde_json::Value,
        sender: Option<&ResponseStreamSender>,
    ) -> Result<ToolOutcome> {
        if let Some(sender) = sender {
            let _ = sender.send(ResponseEvent::ToolCall {
                id: id.clone(),
                name: name.clone(),
                input: input.clone(),
            });
        }
        let item_call = ResponseItem::ToolCall {
            id: id.clone(),
            name: name.clone(),
            input: input.clone(),
        };

        ctx.tool_name = Some(name.clone());
        ctx.tool_use_id = Some(id.clone());
        ctx.tool_input = Some(input.clone());
        ctx.updated_input = None;

        let Some(tool) = tool_registry.get(&name) else {
            return self
                .finish_tool_error(ctx, sender, id, item_call, format!("tool not found: {name}"))
                .await;
        };

        if let Err(e) = run_phase(&self.hooks.pre_tool_use, ctx, HookPhase::PreToolUse, true).await {
            if e.is_hook_abort() {
                return Err(e);
            }
            let text = match &e {
                Error::UserFeedback { text } => text.clone(),
                other => other.to_string(),
            };
            return self.finish_tool_error(ctx, sender, id, item_call, text).await;
        }

        let dispatch_input = ctx.updated_input.take().unwrap_or_else(|| input.clone());

        let decision = self
            .permissions
            .evaluate_tool_use(&name, &dispatch_input, tool.annotations())
            .await?;
        let approved_input = match decision {
            Decision::Deny { message } => {
                return self.finish_tool_error(ctx, sender, id, item_call, message).await;
            }
            Decision::Ask { message, .. } => {
                let approved = self.permissions.confirm(&name, &dispatch_input, message.as_deref()).await?;
                if !approved {
                    let text = message.unwrap_or_else(|| "user declined tool use".to_string());
                    return self.finish_tool_error(ctx, sender, id, item_call, text).await;
                }
                dispatch_input
            }
            Decision::Allow { .. } => dispatch_input,
        };

        let tool_ctx = ToolContext {
            cancellation: tokio_util::sync::CancellationToken::new(),
            additional_context: ctx.additional_context.clone(),
        };
        let result = call_with_panic_recovery(tool.as_ref(), &tool_ctx, approved_input).await;

        ctx.tool_result = Some(result.clone());
        let (hooks, phase) = if result.is_error {
            (&self.hooks.post_tool_use_failure, HookPhase::PostToolUseFailure)
        } else {
            (&self.hooks.post_tool_use, HookPhase::PostToolUse)
        };
        run_phase(hooks, ctx, phase, false).await?;

        let item_result = if result.is_error {
            ResponseItem::ToolError {
                tool_use_id: id.clone(),
                message: join_text(&result),
            }
        } else {
            ResponseItem::ToolCallResult {
                tool_use_id: id.clone(),
                result: result.clone(),
            }
        };
        if let Some(sender) = sender {
            let event = if result.is_error {
                ResponseEvent::ToolError {
                    tool_use_id: id.clone(),
                    message: join_text(&result),
                }
            } else {
                ResponseEvent::ToolResult {
                    tool_use_id: id.clone(),
                    result: result.clone(),
                }
            };
            let _ = sender.send(event);
        }

        Ok(ToolOutcome {
            item_call,
            item_result,
            content: result.content,
            is_error: result.is_error,
        })
    }

    async fn finish_tool_error(
        &self,
        ctx: &mut HookContext,
        sender: Option<&ResponseStreamSender>,
        id: String,
        item_call: ResponseItem,
        message: String,
    ) -> Result<ToolOutcome> {
        let result = ToolResult::error(message.clone());
        ctx.tool_result = Some(result.clone());
        run_phase(&self.hooks.post_tool_use_failure, ctx, HookPhase::PostToolUseFailure, false).await?;
        let item_result = ResponseItem::ToolError {
            tool_use_id: id.clone(),
            message: message.clone(),
        };
        if let Some(sender) = sender {
            let _ = sender.send(ResponseEvent::ToolError {
                tool_use_id: id,
                message,
            });
        }
        Ok(ToolOutcome {
            item_call,
            item_result,
            content: result.content,
            is_error: true,
        })
    }
}

fn join_text(result: &ToolResult) -> String {
    result
        .content
        .iter()
        .filter_map(|c| c.text.as_deref())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex as AsyncMutex;

    use serde::Deserialize;

    use crate::provider::{GenerateResult, StopReason};
    use crate::thread::InMemoryThreadStore;
    use crate::tool::{ToolAnnotations, TypedTool};

    #[derive(Deserialize)]
    struct EchoInput {
        msg: String,
    }

    struct ScriptedModel {
        calls: AtomicUsize,
        turns: Vec<GenerateResult>,
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn generate(&self, _config: &GenerateConfig) -> Result<GenerateResult> {
            let i = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.turns.get(i).cloned().expect("scripted model ran out of turns"))
        }
    }

    fn text_turn(text: &str) -> GenerateResult {
        GenerateResult {
            content: vec![Content::text(text)],
            usage: Usage {
                input_tokens: 10,
                output_tokens: 5,
                ..Default::default()
            },
            stop_reason: StopReason::EndTurn,
        }
    }

    #[tokio::test]
    async fn s1_simple_response_returns_init_and_message_items() {
        let model = Arc::new(ScriptedModel {
            calls: AtomicUsize::new(0),
            turns: vec![text_turn("Hello!")],
        });
        let agent = Agent::builder().model(model).build().unwrap();

        let response = agent.create_response(CreateResponseOptions::input("Hi")).await.unwrap();
        assert_eq!(response.items.len(), 2);
        assert!(matches!(response.items[0], ResponseItem::Init { .. }));
        match &response.items[1] {
            ResponseItem::Message(m) => assert_eq!(m.text(), "Hello!"),
            _ => panic!("expected Message item"),
        }
        assert_eq!(response.usage.input_tokens, 10);
    }

    #[tokio::test]
    async fn s2_tool_call_round_trip() {
        let tool_use_turn = GenerateResult {
            content: vec![Content::tool_use("t1", "echo", serde_json::json!({"msg": "hi"}))],
            usage: Usage::default(),
            stop_reason: StopReason::ToolUse,
        };
        let model = Arc::new(ScriptedModel {
            calls: AtomicUsize::new(0),
            turns: vec![tool_use_turn, text_turn("done")],
        });

        let echo = TypedTool::new(
            "echo",
            "echoes",
            serde_json::json!({"type": "object", "properties": {"msg": {"type": "string"}}, "required": ["msg"]}),
            ToolAnnotations {
                read_only_hint: true,
                ..Default::default()
            },
            |_ctx, input: EchoInput| async move { Ok(ToolResult::text(input.msg)) },
        )
        .unwrap();

        let agent = Agent::builder()
            .model(model)
            .tool(Arc::new(echo))
            .permissions(Arc::new(PermissionManager::new(Mode::BypassPermissions, vec![])))
            .build()
            .unwrap();

        let response = agent.create_response(CreateResponseOptions::input("use echo")).await.unwrap();
        assert_eq!(response.output_messages.len(), 3);
        assert_eq!(response.output_messages[0].role, Role::Assistant);
        assert_eq!(response.output_messages[1].role, Role::User);
        assert_eq!(response.output_messages[2].role, Role::Assistant);

        let has_tool_call = response.items.iter().any(|i| matches!(i, ResponseItem::ToolCall { .. }));
        let has_tool_result = response.items.iter().any(|i| matches!(i, ResponseItem::ToolCallResult { .. }));
        assert!(has_tool_call && has_tool_result);
    }

    #[tokio::test]
    async fn s3_permission_deny_blocks_execution_before_tool_call() {
        let tool_use_turn = GenerateResult {
            content: vec![Content::tool_use("t1", "bash", serde_json::json!({}))],
            usage: Usage::default(),
            stop_reason: StopReason::ToolUse,
        };
        let model = Arc::new(ScriptedModel {
            calls: AtomicUsize::new(0),
            turns: vec![tool_use_turn, text_turn("done")],
        });

        let invoked = Arc::new(AsyncMutex::new(false));
        let invoked_clone = invoked.clone();
        let bash = TypedTool::new(
            "bash",
            "runs a command",
            serde_json::json!({"type": "object"}),
            ToolAnnotations::default(),
            move |_ctx, _input: serde_json::Value| {
                let invoked = invoked_clone.clone();
                async move {
                    *invoked.lock().await = true;
                    Ok(ToolResult::text("ran"))
                }
            },
        )
        .unwrap();

        let permissions = Arc::new(PermissionManager::new(
            Mode::Default,
            vec![crate::permission::PermissionRule::deny(
                crate::permission::Specifier::NameGlob("bash".into()),
                "blocked",
            )],
        ));

        let agent = Agent::builder()
            .model(model)
            .tool(Arc::new(bash))
            .permissions(permissions)
            .build()
            .unwrap();

        let response = agent.create_response(CreateResponseOptions::input("run bash")).await.unwrap();
        assert!(!*invoked.lock().await);
        let error_item = response
            .items
            .iter()
            .find_map(|i| match i {
                ResponseItem::ToolError { message, .. } => Some(message.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(error_item, "blocked");
    }

    #[tokio::test]
    async fn s4_fork_isolates_history() {
        let model = Arc::new(ScriptedModel {
            calls: AtomicUsize::new(0),
            turns: vec![text_turn("first answer"), text_turn("second answer")],
        });
        let store = Arc::new(InMemoryThreadStore::new());
        let agent = Agent::builder()
            .model(model)
            .thread_store(store.clone())
            .build()
            .unwrap();

        let first = agent.create_response(CreateResponseOptions::input("hi")).await.unwrap();
        let thread_x = first.thread_id.clone();
        assert_eq!(store.get(&thread_x).await.unwrap().unwrap().messages.len(), 2);

        let second = agent
            .create_response(CreateResponseOptions::input("next").with_thread_id(thread_x.clone()).with_fork(true))
            .await
            .unwrap();
        assert_ne!(second.thread_id, thread_x);
        assert_eq!(store.get(&thread_x).await.unwrap().unwrap().messages.len(), 2);
        assert_eq!(store.get(&second.thread_id).await.unwrap().unwrap().messages.len(), 4);
    }

    #[tokio::test]
    async fn s6_panic_in_tool_becomes_error_result_and_request_completes() {
        let tool_use_turn = GenerateResult {
            content: vec![Content::tool_use("t1", "boom", serde_json::json!({}))],
            usage: Usage::default(),
            stop_reason: StopReason::ToolUse,
        };
        let model = Arc::new(ScriptedModel {
            calls: AtomicUsize::new(0),
            turns: vec![tool_use_turn, text_turn("done")],
        });

        let boom = TypedTool::new(
            "boom",
            "panics",
            serde_json::json!({"type": "object"}),
            ToolAnnotations::default(),
            |_ctx, _input: serde_json::Value| async move {
                panic!("boom");
                #[allow(unreachable_code)]
                Ok(ToolResult::text("unreachable"))
            },
        )
        .unwrap();

        let agent = Agent::builder()
            .model(model)
            .tool(Arc::new(boom))
            .permissions(Arc::new(PermissionManager::new(Mode::BypassPermissions, vec![])))
            .build()
            .unwrap();

        let response = agent.create_response(CreateResponseOptions::input("trigger")).await.unwrap();
        let tool_result = response.items.iter().find_map(|i| match i {
            ResponseItem::ToolCallResult { result, .. } => Some(result.clone()),
            _ => None,
        });
        let tool_result = tool_result.expect("expected a ToolCallResult item");
        assert!(tool_result.is_error);
        assert!(tool_result.content[0].text.as_deref().unwrap().contains("boom"));
    }

    #[test]
    fn build_fails_without_model() {
        let result = Agent::builder().build();
        assert!(result.is_err());
    }

    #[test]
    fn build_fails_on_duplicate_tool_names() {
        let model = Arc::new(ScriptedModel {
            calls: AtomicUsize::new(0),
            turns: vec![],
        });
        let make_tool = || {
            Arc::new(
                TypedTool::new(
                    "dup",
                    "d",
                    serde_json::json!({}),
                    ToolAnnotations::default(),
                    |_ctx, _input: serde_json::Value| async move { Ok(ToolResult::text("x")) },
                )
                .unwrap(),
            ) as Arc<dyn Tool>
        };
        let result = Agent::builder().model(model).tool(make_tool()).tool(make_tool()).build();
        assert!(result.is_err());
    }
}
