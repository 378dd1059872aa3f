//! # agent_core
//!
//! A tool-using agent loop for local, OpenAI-compatible language model
//! servers (LM Studio, Ollama, llama.cpp, vLLM).
//!
//! ## Key Features
//!
//! - **Tool Calling**: typed tools with JSON Schema validation and panic
//!   recovery ([`tool`])
//! - **Lifecycle Hooks**: intercept and control execution at seven points in
//!   the loop ([`hooks`])
//! - **Permissions**: allow/deny/ask rules with glob, domain, and
//!   command-prefix specifiers ([`permission`])
//! - **Threads and Sessions**: durable conversation history and turn logs,
//!   in-memory or file-backed ([`thread`], [`session`])
//! - **Streaming**: incremental response events alongside a plain
//!   request/response call ([`stream`])
//! - **Retry**: exponential backoff with jitter for transient model errors
//!   ([`retry`])
//!
//! ## Example
//!
//! ```rust,no_run
//! use agent_core::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn run(model: Arc<dyn LanguageModel>) -> Result<()> {
//! let agent = Agent::builder()
//!     .model(model)
//!     .system_prompt("You are a helpful assistant")
//!     .build()?;
//!
//! let response = agent
//!     .create_response(CreateResponseOptions::input("What's 2 + 2?"))
//!     .await?;
//! println!("{}", response.output_messages.last().unwrap().text());
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod config;
pub mod context;
pub mod error;
pub mod hooks;
pub mod ids;
pub mod matcher;
pub mod message;
pub mod permission;
pub mod provider;
pub mod retry;
pub mod session;
pub mod stream;
pub mod thread;
pub mod tool;

pub use agent::{Agent, AgentBuilder, CompactionConfig, CreateResponseOptions};
pub use config::{get_base_url, get_model, Provider};
pub use context::{estimate_tokens, is_approaching_limit, should_compact, truncate_messages};
pub use error::{Error, HookPhase, Result};
pub use hooks::{
    extract_summary, hook_fn, CompactionHook, Hook, HookContext, Hooks, InjectContext, MatchTool,
    Summarizer, UsageLogger,
};
pub use ids::{new_event_id, new_session_id, new_thread_id, new_tool_use_id, now};
pub use message::{Content, DocumentSource, ImageSource, Message, Role, ToolResultContent, Usage};
pub use permission::{
    tool_category, CanUseToolFn, ConfirmerFn, Decision, Mode, PermissionManager, PermissionRule,
    RuleKind, Specifier,
};
pub use provider::{
    openai_compatible, GenerateChunk, GenerateConfig, GenerateResult, GenerateStream,
    LanguageModel, StopReason, ToolDeclaration,
};
pub use retry::{retry, RetryConfig};
pub use session::{
    Event, FileSessionStore, InMemorySessionStore, Session, SessionStore, SessionSummary,
};
pub use stream::{channel, Response, ResponseEvent, ResponseItem, ResponseStream, ResponseStreamSender};
pub use thread::{FileThreadStore, InMemoryThreadStore, Thread, ThreadRepository};
pub use tool::{
    call_with_panic_recovery, validate_tool_name, Tool, ToolAnnotations, ToolContext, ToolRegistry,
    ToolResult, TypedTool,
};

/// Re-exports the common types needed to build and drive an [`Agent`].
pub mod prelude {
    pub use crate::agent::{Agent, AgentBuilder, CompactionConfig, CreateResponseOptions};
    pub use crate::error::{Error, Result};
    pub use crate::hooks::{Hook, HookContext, Hooks};
    pub use crate::message::{Content, Message, Role, Usage};
    pub use crate::permission::{Decision, Mode, PermissionManager, PermissionRule};
    pub use crate::provider::{GenerateConfig, GenerateResult, LanguageModel};
    pub use crate::stream::{Response, ResponseEvent, ResponseStream};
    pub use crate::tool::{Tool, ToolContext, ToolRegistry, ToolResult, TypedTool};
}
