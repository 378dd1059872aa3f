//! ID and timestamp helpers shared by the thread store, session store, and
//! response stream.
//!
//! Thread and session ids are globally unique (backed by `uuid::Uuid::new_v4`)
//! because they cross process boundaries through file-backed stores. Session
//! event ids additionally need to stay ordered within one process even when
//! generated faster than the system clock's resolution, so they pair a
//! timestamp with a process-wide monotonic counter.

use std::sync::atomic::{AtomicU64, Ordering};

static EVENT_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a new thread id with the `thread-` prefix required by
/// `spec.md` invariant 2 (`response.thread_id` begins with `thread-` and has
/// length >= 10).
pub fn new_thread_id() -> String {
    format!("thread-{}", uuid::Uuid::new_v4())
}

/// Generate a new session id with the `session-` prefix, mirroring the
/// thread id scheme.
pub fn new_session_id() -> String {
    format!("session-{}", uuid::Uuid::new_v4())
}

/// Generate a new tool-use id. Providers may supply their own ids; this is
/// used when a provider does not, or for synthesized tool-not-found results.
pub fn new_tool_use_id() -> String {
    format!("tooluse-{}", uuid::Uuid::new_v4())
}

/// Generate a session event id unique within this process.
///
/// Combines a nanosecond timestamp with a monotonic counter so that ids
/// generated within the same nanosecond (possible under concurrent turns)
/// remain pairwise distinct, satisfying `spec.md` invariant 8.
pub fn new_event_id() -> String {
    let ts = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0);
    let seq = EVENT_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("event-{ts:x}-{seq:x}")
}

/// Current UTC timestamp, used for `created_at`/`updated_at` fields.
pub fn now() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now()
}
