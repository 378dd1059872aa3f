//! Response stream: a producer/consumer channel of [`ResponseEvent`]s
//! (`spec.md` §4.6).
//!
//! The Agent Loop is the producer; the caller's `event_callback` is the
//! consumer, pulling with [`ResponseStream::next`]. Closing is idempotent,
//! and sending a [`ResponseEvent::Completed`] or [`ResponseEvent::Failed`]
//! auto-closes the stream so "exactly one terminal event per request" is
//! enforced by construction rather than left to caller discipline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::message::{Message, Usage};
use crate::tool::ToolResult;

/// One item in a [`Response`]'s `items` list (`spec.md` §3).
#[derive(Debug, Clone)]
pub enum ResponseItem {
    Init { thread_id: String },
    Message(Message),
    ToolCall {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolCallResult {
        tool_use_id: String,
        result: ToolResult,
    },
    ToolError {
        tool_use_id: String,
        message: String,
    },
}

/// The result of one `create_response` call.
#[derive(Debug, Clone)]
pub struct Response {
    pub thread_id: String,
    pub items: Vec<ResponseItem>,
    pub usage: Usage,
    pub output_messages: Vec<Message>,
}

/// Event delivered to a [`ResponseStream`] consumer.
#[derive(Debug, Clone)]
pub enum ResponseEvent {
    Created { thread_id: String },
    InProgress,
    Completed(Response),
    Failed { message: String },
    ToolCall {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        result: ToolResult,
    },
    ToolError {
        tool_use_id: String,
        message: String,
    },
    LlmEvent(serde_json::Value),
    Error(String),
}

impl ResponseEvent {
    fn is_terminal(&self) -> bool {
        matches!(self, ResponseEvent::Completed(_) | ResponseEvent::Failed { .. })
    }
}

/// Producer handle for a [`ResponseStream`]. The Agent Loop holds this; it
/// is not exposed to callers.
#[derive(Clone)]
pub struct ResponseStreamSender {
    sender: mpsc::UnboundedSender<ResponseEvent>,
    closed: Arc<AtomicBool>,
}

impl ResponseStreamSender {
    /// Sends `event`. Returns [`Error::StreamClosed`] if the stream was
    /// already closed (explicitly, by a prior terminal event, or because the
    /// consumer dropped the receiver).
    pub fn send(&self, event: ResponseEvent) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::StreamClosed);
        }
        let terminal = event.is_terminal();
        if self.sender.send(event).is_err() {
            self.closed.store(true, Ordering::Release);
            return Err(Error::StreamClosed);
        }
        if terminal {
            self.close();
        }
        Ok(())
    }

    /// Idempotent: closing an already-closed stream is a no-op.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Consumer side of the channel: a pull-model iterator over
/// [`ResponseEvent`]s.
pub struct ResponseStream {
    receiver: mpsc::UnboundedReceiver<ResponseEvent>,
    current: Option<ResponseEvent>,
}

impl ResponseStream {
    /// Advances to the next event, returning `true` if one was delivered and
    /// `false` once the producer has closed the stream with nothing left
    /// buffered.
    pub async fn next(&mut self) -> bool {
        self.current = self.receiver.recv().await;
        self.current.is_some()
    }

    pub fn event(&self) -> Option<&ResponseEvent> {
        self.current.as_ref()
    }

    /// The error carried by the current event, if it is [`ResponseEvent::Error`]
    /// or [`ResponseEvent::Failed`].
    pub fn err(&self) -> Option<Error> {
        match &self.current {
            Some(ResponseEvent::Error(msg)) => Some(Error::other(msg.clone())),
            Some(ResponseEvent::Failed { message }) => Some(Error::model(message.clone())),
            _ => None,
        }
    }
}

/// Creates a connected sender/stream pair.
pub fn channel() -> (ResponseStreamSender, ResponseStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    let closed = Arc::new(AtomicBool::new(false));
    (
        ResponseStreamSender { sender: tx, closed },
        ResponseStream {
            receiver: rx,
            current: None,
        },
    )
}
