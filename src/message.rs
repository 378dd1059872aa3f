//! Message and content model.
//!
//! A [`Message`] is a `role` plus an ordered sequence of [`Content`] blocks.
//! `Content` is a tagged union so that a single message can mix plain text,
//! images, documents, tool invocations, tool results, and model "thinking"
//! traces, matching the polymorphic content model real provider APIs expose.
//!
//! Serialization uses an external `type` discriminator (`#[serde(tag =
//! "type")]`) rather than the source system's dynamic map-and-interface
//! typing, so that malformed wire payloads are rejected at deserialization
//! time instead of surfacing as a missing-field panic deep in the agent loop.

use std::collections::HashMap;
use std::ops::{Add, AddAssign};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Role of a message's author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// Where an image's bytes live: a remote/data URL, or inline base64.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageSource {
    Url { url: String },
    Base64 { media_type: String, data: String },
}

/// Where a document's bytes live. Mirrors [`ImageSource`] with an optional
/// display name (providers commonly want a filename for citations).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DocumentSource {
    Url {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    Base64 {
        media_type: String,
        data: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
}

/// Content-block type carried by a [`ToolResultContent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolResultContentKind {
    Text,
    Image,
    Audio,
}

/// One block of a tool's result payload.
///
/// `spec.md` §3 requires: a type, optional text, optional base64 data,
/// optional mime type, and a free annotations map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolResultContent {
    #[serde(rename = "type")]
    pub kind: Option<ToolResultContentKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub annotations: HashMap<String, serde_json::Value>,
}

impl ToolResultContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: Some(ToolResultContentKind::Text),
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn image_base64(bytes: impl AsRef<[u8]>, mime_type: impl Into<String>) -> Self {
        Self {
            kind: Some(ToolResultContentKind::Image),
            data: Some(BASE64.encode(bytes)),
            mime_type: Some(mime_type.into()),
            ..Default::default()
        }
    }
}

/// A single unit of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Content {
    Text {
        text: String,
    },
    Image {
        source: ImageSource,
    },
    Document {
        source: DocumentSource,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: Vec<ToolResultContent>,
        #[serde(default)]
        is_error: bool,
    },
    Thinking {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Content::Text { text: text.into() }
    }

    pub fn image_url(url: impl Into<String>) -> Self {
        Content::Image {
            source: ImageSource::Url { url: url.into() },
        }
    }

    pub fn image_base64(media_type: impl Into<String>, bytes: impl AsRef<[u8]>) -> Self {
        Content::Image {
            source: ImageSource::Base64 {
                media_type: media_type.into(),
                data: BASE64.encode(bytes),
            },
        }
    }

    pub fn tool_use(id: impl Into<String>, name: impl Into<String>, input: serde_json::Value) -> Self {
        Content::ToolUse {
            id: id.into(),
            name: name.into(),
            input,
        }
    }

    pub fn tool_result(
        tool_use_id: impl Into<String>,
        content: Vec<ToolResultContent>,
        is_error: bool,
    ) -> Self {
        Content::ToolResult {
            tool_use_id: tool_use_id.into(),
            content,
            is_error,
        }
    }

    pub fn tool_error_text(tool_use_id: impl Into<String>, text: impl Into<String>) -> Self {
        Content::tool_result(tool_use_id, vec![ToolResultContent::text(text)], true)
    }

    pub fn thinking(text: impl Into<String>, signature: Option<String>) -> Self {
        Content::Thinking {
            text: text.into(),
            signature,
        }
    }

    /// Returns the plain text of this block if it is a [`Content::Text`].
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text { text } => Some(text),
            _ => None,
        }
    }

    pub fn as_tool_use(&self) -> Option<(&str, &str, &serde_json::Value)> {
        match self {
            Content::ToolUse { id, name, input } => Some((id, name, input)),
            _ => None,
        }
    }

    pub fn as_tool_result(&self) -> Option<(&str, &[ToolResultContent], bool)> {
        match self {
            Content::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => Some((tool_use_id, content, *is_error)),
            _ => None,
        }
    }
}

/// A single conversation turn: a role plus ordered content blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<Content>,
}

impl Message {
    pub fn new(role: Role, content: Vec<Content>) -> Self {
        Self { role, content }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![Content::text(text)])
    }

    pub fn assistant(content: Vec<Content>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, vec![Content::text(text)])
    }

    /// Concatenates every [`Content::Text`] block with newlines, ignoring
    /// non-text content. Used for logging and for providers that only accept
    /// a flat string per message.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(Content::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Every `ToolUse` block's id in this message, in order.
    pub fn tool_use_ids(&self) -> Vec<&str> {
        self.content
            .iter()
            .filter_map(|c| c.as_tool_use().map(|(id, _, _)| id))
            .collect()
    }

    pub fn has_tool_use(&self) -> bool {
        self.content.iter().any(|c| matches!(c, Content::ToolUse { .. }))
    }

    /// `ToolResult` ids addressed by this message, in order.
    pub fn tool_result_ids(&self) -> Vec<&str> {
        self.content
            .iter()
            .filter_map(|c| c.as_tool_result().map(|(id, _, _)| id))
            .collect()
    }
}

/// Token counters returned by a model call.
///
/// Addition is componentwise (`spec.md` §3). `context_tokens` is
/// `input_tokens + cache_read_input_tokens`; output tokens are not counted
/// toward context pressure because they describe what the model just
/// produced, not what it had to read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_input_tokens: u64,
    pub cache_read_input_tokens: u64,
}

impl Usage {
    pub fn context_tokens(&self) -> u64 {
        self.input_tokens + self.cache_read_input_tokens
    }
}

impl Add for Usage {
    type Output = Usage;

    fn add(self, rhs: Usage) -> Usage {
        Usage {
            input_tokens: self.input_tokens + rhs.input_tokens,
            output_tokens: self.output_tokens + rhs.output_tokens,
            cache_creation_input_tokens: self.cache_creation_input_tokens
                + rhs.cache_creation_input_tokens,
            cache_read_input_tokens: self.cache_read_input_tokens + rhs.cache_read_input_tokens,
        }
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, rhs: Usage) {
        *self = *self + rhs;
    }
}
