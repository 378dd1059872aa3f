//! Language-model provider interface: the seam between the agent loop and a
//! concrete vendor client (`spec.md` §6, `SPEC_FULL.md` §1.1/§6).
//!
//! The core never talks HTTP directly. It depends on [`LanguageModel`], kept
//! vendor-neutral so host applications can plug in any chat-completions-style
//! backend; [`openai_compatible`] ships one reference implementation used by
//! this crate's own integration tests and examples.

pub mod openai_compatible;

use std::collections::HashMap;
use std::pin::Pin;

use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};

use crate::error::Result;
use crate::message::{Content, Message, Usage};

/// Wire shape for a tool the model may call: `{name, description, parameters}`
/// with annotations kept as a sibling object rather than folded in, matching
/// `SPEC_FULL.md` §6.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Everything a [`LanguageModel::generate`] call needs beyond the provider's
/// own connection settings.
#[derive(Debug, Clone, Default)]
pub struct GenerateConfig {
    pub messages: Vec<Message>,
    pub system_prompt: Option<String>,
    pub tools: Vec<ToolDeclaration>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// JSON Schema the model should constrain its final text output to, if
    /// the provider supports structured output.
    pub response_schema: Option<serde_json::Value>,
    /// Whether to mark the trailing context as cacheable, for providers that
    /// support prompt caching.
    pub cache_control: bool,
    /// Provider-specific options passed through verbatim.
    pub extra: HashMap<String, serde_json::Value>,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    Other(String),
}

/// The result of one non-streaming [`LanguageModel::generate`] call.
#[derive(Debug, Clone)]
pub struct GenerateResult {
    pub content: Vec<Content>,
    pub usage: Usage,
    pub stop_reason: StopReason,
}

/// One incremental piece of a streamed generation.
#[derive(Debug, Clone)]
pub enum GenerateChunk {
    TextDelta(String),
    ToolUseStart { id: String, name: String },
    ToolUseInputDelta { id: String, partial_json: String },
    Done(GenerateResult),
}

pub type GenerateStream = Pin<Box<dyn Stream<Item = Result<GenerateChunk>> + Send>>;

/// A chat-completions-style backend.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Runs one generation to completion and returns the full result.
    async fn generate(&self, config: &GenerateConfig) -> Result<GenerateResult>;

    /// Streams incremental chunks. The default implementation calls
    /// [`LanguageModel::generate`] and emits its result as a single
    /// [`GenerateChunk::Done`], a correct but non-incremental fallback for
    /// providers that don't support server-sent events.
    async fn stream(&self, config: &GenerateConfig) -> Result<GenerateStream> {
        let result = self.generate(config).await?;
        Ok(Box::pin(stream::once(async move { Ok(GenerateChunk::Done(result)) })))
    }
}
