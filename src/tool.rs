//! Tool abstraction: typed tools, schemas, result/error shapes, panic
//! recovery.
//!
//! A [`Tool`] exposes a stable name, description, JSON Schema, annotations,
//! and an async `call`. Implementations receive input as a raw
//! `serde_json::Value` so the core never needs to know a tool's concrete
//! input type; [`TypedTool`] is the ergonomic adapter for tools whose native
//! handler takes a typed, `Deserialize` input.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};
use crate::message::ToolResultContent;

/// Annotations describing a tool's behavior to permission and UI layers.
///
/// `spec.md` §3 and §4.4: `read_only_hint` gates `plan` mode, `edit_hint`
/// (plus name/command heuristics) gates `acceptEdits` mode,
/// `disable_parallel_use` gates whether an iteration's tool calls may run
/// concurrently.
#[derive(Debug, Clone, Default)]
pub struct ToolAnnotations {
    pub title: Option<String>,
    pub read_only_hint: bool,
    pub destructive_hint: bool,
    pub idempotent_hint: bool,
    pub open_world_hint: bool,
    pub edit_hint: bool,
    pub disable_parallel_use: bool,
    pub extra: HashMap<String, serde_json::Value>,
}

/// The result of one tool invocation.
#[derive(Debug, Clone, Default)]
pub struct ToolResult {
    pub content: Vec<ToolResultContent>,
    pub is_error: bool,
}

impl ToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolResultContent::text(text)],
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolResultContent::text(text)],
            is_error: true,
        }
    }
}

/// Per-call context handed to a tool, carrying cancellation and any
/// additional context a `PreToolUse` hook injected.
#[derive(Clone)]
pub struct ToolContext {
    pub cancellation: tokio_util::sync::CancellationToken,
    pub additional_context: Vec<String>,
}

impl ToolContext {
    pub fn new() -> Self {
        Self {
            cancellation: tokio_util::sync::CancellationToken::new(),
            additional_context: Vec::new(),
        }
    }
}

impl Default for ToolContext {
    fn default() -> Self {
        Self::new()
    }
}

/// The public tool contract. `name`/`description`/`schema`/`annotations` are
/// synchronous accessors; `call` is the async dispatch operation.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema object describing the tool's input.
    fn schema(&self) -> &serde_json::Value;
    fn annotations(&self) -> &ToolAnnotations;
    async fn call(&self, ctx: &ToolContext, input: serde_json::Value) -> Result<ToolResult>;
}

/// Validates a tool name is a stable ASCII identifier (`spec.md` §3).
pub fn validate_tool_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::config("tool name must not be empty"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(Error::config(format!(
            "tool name '{name}' must be ASCII alphanumeric, '_' or '-'"
        )));
    }
    Ok(())
}

type HandlerFuture = Pin<Box<dyn Future<Output = Result<ToolResult>> + Send>>;

/// Adapts a tool whose native handler operates on a typed input
/// (`Fn(ToolContext, I) -> Future<Result<ToolResult>>`) into the raw
/// [`Tool`] trait.
///
/// Accepts raw bytes, a `serde_json::Value` of the right shape, or any JSON
/// value that can be deserialized into `I`; on deserialization failure it
/// returns an error result rather than raising, per `spec.md` §4.2. When a
/// JSON Schema is attached, input is validated against it before the
/// handler runs.
pub struct TypedTool<I> {
    name: String,
    description: String,
    schema: serde_json::Value,
    annotations: ToolAnnotations,
    validator: Option<jsonschema::JSONSchema>,
    handler: Arc<dyn Fn(ToolContext, I) -> HandlerFuture + Send + Sync>,
}

impl<I> TypedTool<I>
where
    I: DeserializeOwned + Send + 'static,
{
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: serde_json::Value,
        annotations: ToolAnnotations,
        handler: F,
    ) -> Result<Self>
    where
        F: Fn(ToolContext, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolResult>> + Send + 'static,
    {
        let name = name.into();
        validate_tool_name(&name)?;
        let validator = jsonschema::JSONSchema::compile(&schema)
            .map(Some)
            .unwrap_or(None);
        Ok(Self {
            name,
            description: description.into(),
            schema,
            annotations,
            validator,
            handler: Arc::new(move |ctx, input| Box::pin(handler(ctx, input))),
        })
    }
}

#[async_trait]
impl<I> Tool for TypedTool<I>
where
    I: DeserializeOwned + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn schema(&self) -> &serde_json::Value {
        &self.schema
    }

    fn annotations(&self) -> &ToolAnnotations {
        &self.annotations
    }

    async fn call(&self, ctx: &ToolContext, input: serde_json::Value) -> Result<ToolResult> {
        if let Some(validator) = &self.validator {
            if let Err(errors) = validator.validate(&input) {
                let messages: Vec<String> = errors.map(|e| e.to_string()).collect();
                return Ok(ToolResult::error(format!(
                    "input failed schema validation: {}",
                    messages.join("; ")
                )));
            }
        }
        let typed: I = match serde_json::from_value(input) {
            Ok(v) => v,
            Err(e) => return Ok(ToolResult::error(format!("invalid tool input: {e}"))),
        };
        (self.handler)(ctx.clone(), typed).await
    }
}

/// Invokes `tool.call`, catching any panic raised inside it and turning it
/// into an `is_error: true` result instead of letting it unwind through the
/// agent loop (`spec.md` §4.1 step 5, §4.2).
pub async fn call_with_panic_recovery(
    tool: &dyn Tool,
    ctx: &ToolContext,
    input: serde_json::Value,
) -> ToolResult {
    let result = AssertUnwindSafe(tool.call(ctx, input)).catch_unwind().await;
    match result {
        Ok(Ok(tool_result)) => tool_result,
        Ok(Err(e)) => ToolResult::error(e.to_string()),
        Err(panic) => ToolResult::error(format!("tool panicked: {}", panic_message(&panic))),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Immutable, construction-time registry of tools. Duplicate names fail at
/// construction (`spec.md` §3 invariant).
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new(tools: Vec<Arc<dyn Tool>>) -> Result<Self> {
        let mut map = HashMap::with_capacity(tools.len());
        let mut order = Vec::with_capacity(tools.len());
        for tool in tools {
            let name = tool.name().to_string();
            if map.contains_key(&name) {
                return Err(Error::config(format!("duplicate tool name: {name}")));
            }
            order.push(name.clone());
            map.insert(name, tool);
        }
        Ok(Self { tools: map, order })
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Tool>> {
        self.order.iter().filter_map(|n| self.tools.get(n))
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
