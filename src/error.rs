//! Error types for the agent core.
//!
//! ## Design philosophy
//!
//! - **Explicit error handling**: every fallible operation returns
//!   [`Result<T>`].
//! - **No silent failures**: tool and hook errors are converted into
//!   observable `ToolResult`/`Response` items per `spec.md` §7 rather than
//!   swallowed; only `PostGeneration`/`PostToolUse`/`PostToolUseFailure` hook
//!   errors are logged-and-dropped, and that is a deliberate, spec'd
//!   exception, not a default.
//! - **Rich context**: each variant carries the information a caller needs to
//!   decide what to do next.
//! - **Two abort sentinels are distinguished from ordinary errors**:
//!   [`Error::HookAbort`] always terminates the current request unchanged;
//!   [`Error::UserFeedback`] is caught by the agent loop and turned into an
//!   error tool result instead of propagating.

use thiserror::Error;

/// Type alias for `Result<T, Error>` used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The hook phase in which a [`Error::HookAbort`] originated, carried for
/// diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    PreGeneration,
    PreIteration,
    PreToolUse,
    PostToolUse,
    PostToolUseFailure,
    PostGeneration,
    Stop,
}

impl std::fmt::Display for HookPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HookPhase::PreGeneration => "pre_generation",
            HookPhase::PreIteration => "pre_iteration",
            HookPhase::PreToolUse => "pre_tool_use",
            HookPhase::PostToolUse => "post_tool_use",
            HookPhase::PostToolUseFailure => "post_tool_use_failure",
            HookPhase::PostGeneration => "post_generation",
            HookPhase::Stop => "stop",
        };
        f.write_str(s)
    }
}

/// Comprehensive error type covering every failure mode in the crate.
#[derive(Error, Debug)]
pub enum Error {
    /// A hook raised an unrecoverable error. Always terminates the current
    /// `create_response` call and is returned to the caller unchanged,
    /// regardless of which phase raised it.
    #[error("hook aborted request in {phase} phase: {reason}")]
    HookAbort {
        reason: String,
        phase: HookPhase,
        #[source]
        cause: Option<Box<Error>>,
    },

    /// The user (via a confirmer callback or a `PreToolUse` hook) declined a
    /// tool call. The agent loop converts this into an error `ToolResult`
    /// carrying `text` and continues the conversation; it never propagates
    /// out of `create_response`.
    #[error("user declined tool use: {text}")]
    UserFeedback { text: String },

    /// Tool execution or registration failed: a handler returned an error, a
    /// panic was caught, input failed schema validation, or a duplicate name
    /// was registered.
    #[error("tool error: {0}")]
    Tool(String),

    /// The permission manager denied a tool call.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A send was attempted on a [`crate::stream::ResponseStream`] after it
    /// was closed.
    #[error("stream closed")]
    StreamClosed,

    /// [`crate::thread::ThreadRepository`] has no thread with the given id.
    #[error("thread not found: {0}")]
    ThreadNotFound(String),

    /// [`crate::session::SessionStore`] has no session with the given id.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// The language-model provider's transport or API call failed.
    #[error("model error: {0}")]
    Model(String),

    /// Invalid configuration provided when building `Agent` or
    /// `AgentOptions`.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Invalid input provided by the caller (empty prompt, malformed
    /// options, etc.).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Filesystem I/O failure from a file-backed store.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Miscellaneous error that doesn't fit another category.
    #[error("error: {0}")]
    Other(String),
}

impl Error {
    pub fn hook_abort(phase: HookPhase, reason: impl Into<String>, cause: Option<Error>) -> Self {
        Error::HookAbort {
            reason: reason.into(),
            phase,
            cause: cause.map(Box::new),
        }
    }

    pub fn user_feedback(text: impl Into<String>) -> Self {
        Error::UserFeedback { text: text.into() }
    }

    pub fn tool(msg: impl Into<String>) -> Self {
        Error::Tool(msg.into())
    }

    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Error::PermissionDenied(msg.into())
    }

    pub fn thread_not_found(id: impl Into<String>) -> Self {
        Error::ThreadNotFound(id.into())
    }

    pub fn session_not_found(id: impl Into<String>) -> Self {
        Error::SessionNotFound(id.into())
    }

    pub fn model(msg: impl Into<String>) -> Self {
        Error::Model(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Whether this error is the kind `spec.md` §9 delegates retry policy
    /// for: only model/transport failures are ever retried by the agent
    /// loop's retry wrapper, never tool or permission errors.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Model(_))
    }

    /// True if this is the sentinel that must always terminate the request.
    pub fn is_hook_abort(&self) -> bool {
        matches!(self, Error::HookAbort { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_tool() {
        let err = Error::tool("not found");
        assert!(matches!(err, Error::Tool(_)));
        assert_eq!(err.to_string(), "tool error: not found");
    }

    #[test]
    fn test_error_permission_denied() {
        let err = Error::permission_denied("blocked by rule");
        assert_eq!(err.to_string(), "permission denied: blocked by rule");
    }

    #[test]
    fn test_error_hook_abort_display() {
        let err = Error::hook_abort(HookPhase::PreToolUse, "untrusted tool", None);
        assert_eq!(
            err.to_string(),
            "hook aborted request in pre_tool_use phase: untrusted tool"
        );
        assert!(err.is_hook_abort());
    }

    #[test]
    fn test_error_user_feedback_is_not_hook_abort() {
        let err = Error::user_feedback("no thanks");
        assert!(!err.is_hook_abort());
        assert_eq!(err.to_string(), "user declined tool use: no thanks");
    }

    #[test]
    fn test_model_error_is_retryable_tool_error_is_not() {
        assert!(Error::model("timeout").is_retryable());
        assert!(!Error::tool("boom").is_retryable());
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_result_type_alias() {
        fn _returns_result() -> Result<i32> {
            Ok(42)
        }
        fn _returns_error() -> Result<i32> {
            Err(Error::other("x"))
        }
    }
}
