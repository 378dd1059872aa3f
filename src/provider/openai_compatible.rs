//! Reference [`LanguageModel`] implementation for any OpenAI-compatible
//! chat-completions endpoint (LM Studio, Ollama, llama.cpp, vLLM). Used by
//! this crate's own integration tests and examples; host applications are
//! expected to bring their own provider adapter for anything else
//! (`SPEC_FULL.md` §1.1, Non-goals).

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use super::{GenerateChunk, GenerateConfig, GenerateResult, GenerateStream, LanguageModel, StopReason};
use crate::error::{Error, Result};
use crate::message::{Content, Message, Role, Usage};

/// Talks to a single OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiCompatibleProvider {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiCompatibleProvider {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            model: model.into(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn build_request(&self, config: &GenerateConfig, stream: bool) -> ChatRequest {
        let mut messages = Vec::new();
        if let Some(system) = &config.system_prompt {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: Some(system.clone()),
                tool_calls: None,
                tool_call_id: None,
            });
        }
        messages.extend(config.messages.iter().flat_map(to_wire_messages));

        let tools = (!config.tools.is_empty()).then(|| {
            config
                .tools
                .iter()
                .map(|t| WireTool {
                    kind: "function".to_string(),
                    function: WireFunction {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: t.parameters.clone(),
                    },
                })
                .collect()
        });

        ChatRequest {
            model: self.model.clone(),
            messages,
            tools,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            stream,
        }
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatibleProvider {
    async fn generate(&self, config: &GenerateConfig) -> Result<GenerateResult> {
        let request = self.build_request(config, false);
        let response = self
            .authed(self.http.post(self.endpoint()).json(&request))
            .send()
            .await
            .map_err(|e| Error::model(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::model(format!("http {status}: {body}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::model(format!("malformed response: {e}")))?;

        from_wire_response(parsed)
    }

    async fn stream(&self, config: &GenerateConfig) -> Result<GenerateStream> {
        let request = self.build_request(config, true);
        let response = self
            .authed(self.http.post(self.endpoint()).json(&request))
            .send()
            .await
            .map_err(|e| Error::model(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::model(format!("http {status}: {body}")));
        }

        let byte_stream = response
            .bytes_stream()
            .map(|r| r.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)));
        let events = byte_stream.eventsource();

        let mapped = events.filter_map(|event| async move {
            let event = match event {
                Ok(e) => e,
                Err(e) => return Some(Err(Error::model(format!("stream error: {e}")))),
            };
            if event.data == "[DONE]" {
                return None;
            }
            match serde_json::from_str::<ChatStreamChunk>(&event.data) {
                Ok(chunk) => chunk_to_event(chunk).map(Ok),
                Err(e) => Some(Err(Error::model(format!("malformed stream chunk: {e}")))),
            }
        });

        Ok(Box::pin(mapped))
    }
}

fn to_wire_messages(message: &Message) -> Vec<ChatMessage> {
    let role = match message.role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
    };

    let mut text_parts = Vec::new();
    let mut tool_calls = Vec::new();
    let mut tool_results = Vec::new();

    for content in &message.content {
        match content {
            Content::Text { text } => text_parts.push(text.clone()),
            Content::Thinking { text, .. } => text_parts.push(text.clone()),
            Content::ToolUse { id, name, input } => tool_calls.push(WireToolCall {
                id: id.clone(),
                kind: "function".to_string(),
                function: WireFunctionCall {
                    name: name.clone(),
                    arguments: input.to_string(),
                },
            }),
            Content::ToolResult {
                tool_use_id,
                content,
                ..
            } => {
                let text = content
                    .iter()
                    .filter_map(|c| c.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("\n");
                tool_results.push((tool_use_id.clone(), text));
            }
            Content::Image { .. } | Content::Document { .. } => {}
        }
    }

    let mut out = Vec::new();
    if !tool_calls.is_empty() || !text_parts.is_empty() {
        out.push(ChatMessage {
            role: role.to_string(),
            content: (!text_parts.is_empty()).then(|| text_parts.join("\n")),
            tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            tool_call_id: None,
        });
    }
    for (tool_call_id, text) in tool_results {
        out.push(ChatMessage {
            role: "tool".to_string(),
            content: Some(text),
            tool_calls: None,
            tool_call_id: Some(tool_call_id),
        });
    }
    out
}

fn from_wire_response(response: ChatResponse) -> Result<GenerateResult> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| Error::model("response had no choices"))?;

    let mut content = Vec::new();
    if let Some(text) = choice.message.content {
        if !text.is_empty() {
            content.push(Content::text(text));
        }
    }
    for call in choice.message.tool_calls.unwrap_or_default() {
        let input = serde_json::from_str(&call.function.arguments)
            .unwrap_or_else(|_| serde_json::Value::String(call.function.arguments.clone()));
        content.push(Content::tool_use(call.id, call.function.name, input));
    }

    let stop_reason = match choice.finish_reason.as_deref() {
        Some("tool_calls") => StopReason::ToolUse,
        Some("length") => StopReason::MaxTokens,
        Some("stop") | None => StopReason::EndTurn,
        Some(other) => StopReason::Other(other.to_string()),
    };

    let usage = response
        .usage
        .map(|u| Usage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
            cache_creation_input_tokens: 0,
            cache_read_input_tokens: 0,
        })
        .unwrap_or_default();

    Ok(GenerateResult {
        content,
        usage,
        stop_reason,
    })
}

fn chunk_to_event(chunk: ChatStreamChunk) -> Option<GenerateChunk> {
    let choice = chunk.choices.into_iter().next()?;
    if let Some(text) = choice.delta.content {
        if !text.is_empty() {
            return Some(GenerateChunk::TextDelta(text));
        }
    }
    if let Some(calls) = choice.delta.tool_calls {
        if let Some(call) = calls.into_iter().next() {
            if let (Some(id), Some(function)) = (call.id, call.function.as_ref()) {
                if let Some(name) = &function.name {
                    return Some(GenerateChunk::ToolUseStart {
                        id,
                        name: name.clone(),
                    });
                }
            }
        }
    }
    None
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: String,
    function: WireFunction,
}

#[derive(Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Serialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    function: WireFunctionCall,
}

#[derive(Serialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ChatToolCall>>,
}

#[derive(Deserialize)]
struct ChatToolCall {
    id: String,
    function: ChatFunctionCall,
}

#[derive(Deserialize)]
struct ChatFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Deserialize)]
struct ChatStreamChunk {
    choices: Vec<ChatStreamChoice>,
}

#[derive(Deserialize)]
struct ChatStreamChoice {
    delta: ChatStreamDelta,
}

#[derive(Deserialize, Default)]
struct ChatStreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<ChatStreamToolCall>>,
}

#[derive(Deserialize)]
struct ChatStreamToolCall {
    id: Option<String>,
    function: Option<ChatStreamFunctionCall>,
}

#[derive(Deserialize)]
struct ChatStreamFunctionCall {
    name: Option<String>,
}
