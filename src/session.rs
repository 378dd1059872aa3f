//! Session store: an append-only event log (turns and compaction markers)
//! separate from [`crate::thread::Thread`], for host applications that want
//! an audit trail independent of the live message history (`spec.md` §3,
//! §4.5, §6).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::ids::{new_session_id, now};
use crate::message::{Message, Usage};

/// One entry in a session's event log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// One `create_response` call's input/output messages and usage.
    Turn {
        input_messages: Vec<Message>,
        output_messages: Vec<Message>,
        usage: Usage,
        at: DateTime<Utc>,
    },
    /// A compaction replaced a prefix of the thread's history with a
    /// summary. `spec.md` §4.1 step 5: the event records the original
    /// message/event counts for auditability, since the live thread no
    /// longer carries that information after the rewrite.
    Compaction {
        summary: String,
        original_message_count: usize,
        original_event_count: usize,
        at: DateTime<Utc>,
    },
}

/// A session's identity and metadata, independent of its event log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub session_id: String,
    pub thread_id: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub forked_from: Option<String>,
}

impl Session {
    pub fn new(thread_id: impl Into<String>) -> Self {
        let now = now();
        Self {
            session_id: new_session_id(),
            thread_id: thread_id.into(),
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
            forked_from: None,
        }
    }
}

/// A session's identity plus a cheap summary of its event log, returned by
/// [`SessionStore::list`] so callers don't have to load every event to
/// browse sessions (`spec.md` §4.5: "lightweight summaries").
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub session: Session,
    pub event_count: usize,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Opens (creating if absent) the session for `session_id`.
    async fn open(&self, session_id: &str) -> Result<Session>;
    async fn put(&self, session: Session) -> Result<()>;
    async fn delete(&self, session_id: &str) -> Result<()>;
    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<SessionSummary>>;
    async fn fork_session(&self, session_id: &str) -> Result<Session>;
    /// Appends a [`Event::Turn`] to the session's log.
    async fn save_turn(
        &self,
        session_id: &str,
        input_messages: Vec<Message>,
        output_messages: Vec<Message>,
        usage: Usage,
    ) -> Result<()>;
    /// Replaces the session's event log with a single [`Event::Compaction`]
    /// summarizing everything recorded so far.
    async fn compact(&self, session_id: &str, summary: String) -> Result<()>;
    async fn events(&self, session_id: &str) -> Result<Vec<Event>>;
}

#[derive(Default)]
struct InMemorySessionData {
    sessions: HashMap<String, Session>,
    events: HashMap<String, Vec<Event>>,
    order: Vec<String>,
}

/// In-memory `SessionStore`.
#[derive(Default)]
pub struct InMemorySessionStore {
    data: parking_lot::RwLock<InMemorySessionData>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn open(&self, session_id: &str) -> Result<Session> {
        let mut data = self.data.write();
        if let Some(existing) = data.sessions.get(session_id) {
            return Ok(existing.clone());
        }
        let session = Session {
            session_id: session_id.to_string(),
            thread_id: String::new(),
            metadata: HashMap::new(),
            created_at: now(),
            updated_at: now(),
            forked_from: None,
        };
        data.order.push(session_id.to_string());
        data.events.insert(session_id.to_string(), Vec::new());
        data.sessions.insert(session_id.to_string(), session.clone());
        Ok(session)
    }

    async fn put(&self, session: Session) -> Result<()> {
        let mut data = self.data.write();
        if !data.sessions.contains_key(&session.session_id) {
            data.order.push(session.session_id.clone());
            data.events.entry(session.session_id.clone()).or_default();
        }
        data.sessions.insert(session.session_id.clone(), session);
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        let mut data = self.data.write();
        data.sessions.remove(session_id);
        data.events.remove(session_id);
        data.order.retain(|id| id != session_id);
        Ok(())
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<SessionSummary>> {
        let data = self.data.read();
        Ok(data
            .order
            .iter()
            .skip(offset)
            .take(limit)
            .filter_map(|id| {
                let session = data.sessions.get(id)?.clone();
                let event_count = data.events.get(id).map(Vec::len).unwrap_or(0);
                Some(SessionSummary { session, event_count })
            })
            .collect())
    }

    async fn fork_session(&self, session_id: &str) -> Result<Session> {
        let mut data = self.data.write();
        let source = data
            .sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| Error::session_not_found(session_id))?;
        let source_events = data.events.get(session_id).cloned().unwrap_or_default();
        let mut forked = source.clone();
        forked.session_id = new_session_id();
        forked.forked_from = Some(session_id.to_string());
        let now = now();
        forked.created_at = now;
        forked.updated_at = now;
        data.order.push(forked.session_id.clone());
        data.events.insert(forked.session_id.clone(), source_events);
        data.sessions.insert(forked.session_id.clone(), forked.clone());
        Ok(forked)
    }

    async fn save_turn(
        &self,
        session_id: &str,
        input_messages: Vec<Message>,
        output_messages: Vec<Message>,
        usage: Usage,
    ) -> Result<()> {
        let mut data = self.data.write();
        if !data.sessions.contains_key(session_id) {
            return Err(Error::session_not_found(session_id));
        }
        data.events.entry(session_id.to_string()).or_default().push(Event::Turn {
            input_messages,
            output_messages,
            usage,
            at: now(),
        });
        if let Some(session) = data.sessions.get_mut(session_id) {
            session.updated_at = now();
        }
        Ok(())
    }

    async fn compact(&self, session_id: &str, summary: String) -> Result<()> {
        let mut data = self.data.write();
        let existing = data
            .events
            .get(session_id)
            .ok_or_else(|| Error::session_not_found(session_id))?;
        let original_event_count = existing.len();
        let original_message_count = existing
            .iter()
            .map(|e| match e {
                Event::Turn {
                    input_messages,
                    output_messages,
                    ..
                } => input_messages.len() + output_messages.len(),
                Event::Compaction { .. } => 0,
            })
            .sum();
        data.events.insert(
            session_id.to_string(),
            vec![Event::Compaction {
                summary,
                original_message_count,
                original_event_count,
                at: now(),
            }],
        );
        if let Some(session) = data.sessions.get_mut(session_id) {
            session.updated_at = now();
        }
        Ok(())
    }

    async fn events(&self, session_id: &str) -> Result<Vec<Event>> {
        Ok(self.data.read().events.get(session_id).cloned().unwrap_or_default())
    }
}

#[derive(Serialize, Deserialize)]
struct SessionMeta {
    session_id: String,
    thread_id: String,
    metadata: HashMap<String, serde_json::Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    forked_from: Option<String>,
    event_count: usize,
}

/// File-backed `SessionStore`: one directory per session containing
/// `meta.json` (carrying `event_count` so [`SessionStore::list`] doesn't
/// need to parse `events.jsonl`) and `events.jsonl`. Compaction rewrites
/// `events.jsonl` via write-to-temp + rename (`spec.md` §6).
pub struct FileSessionStore {
    base_dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl FileSessionStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, session_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn dir_for(&self, session_id: &str) -> PathBuf {
        self.base_dir.join(session_id)
    }

    fn read_meta(dir: &Path) -> Result<Option<SessionMeta>> {
        let meta_path = dir.join("meta.json");
        if !meta_path.exists() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&std::fs::read_to_string(&meta_path)?)?))
    }

    fn write_meta_atomic(dir: &Path, meta: &SessionMeta) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        let tmp_path = dir.join("meta.json.tmp");
        std::fs::write(&tmp_path, serde_json::to_vec_pretty(meta)?)?;
        std::fs::rename(&tmp_path, dir.join("meta.json"))?;
        Ok(())
    }

    fn read_events(dir: &Path) -> Result<Vec<Event>> {
        let path = dir.join("events.jsonl");
        if !path.exists() {
            return Ok(Vec::new());
        }
        std::fs::read_to_string(&path)?
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| Ok(serde_json::from_str(l)?))
            .collect()
    }

    fn append_event(dir: &Path, event: &Event) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("events.jsonl"))?;
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        file.write_all(line.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    fn rewrite_events(dir: &Path, events: &[Event]) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        let tmp_path = dir.join("events.jsonl.tmp");
        let mut file = std::fs::File::create(&tmp_path)?;
        for event in events {
            let mut line = serde_json::to_string(event)?;
            line.push('\n');
            file.write_all(line.as_bytes())?;
        }
        file.sync_all()?;
        drop(file);
        std::fs::rename(&tmp_path, dir.join("events.jsonl"))?;
        Ok(())
    }

    fn meta_from(session: &Session, event_count: usize) -> SessionMeta {
        SessionMeta {
            session_id: session.session_id.clone(),
            thread_id: session.thread_id.clone(),
            metadata: session.metadata.clone(),
            created_at: session.created_at,
            updated_at: session.updated_at,
            forked_from: session.forked_from.clone(),
            event_count,
        }
    }

    fn session_from(meta: &SessionMeta) -> Session {
        Session {
            session_id: meta.session_id.clone(),
            thread_id: meta.thread_id.clone(),
            metadata: meta.metadata.clone(),
            created_at: meta.created_at,
            updated_at: meta.updated_at,
            forked_from: meta.forked_from.clone(),
        }
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn open(&self, session_id: &str) -> Result<Session> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock();
        let dir = self.dir_for(session_id);
        if let Some(meta) = Self::read_meta(&dir)? {
            return Ok(Self::session_from(&meta));
        }
        let session = Session {
            session_id: session_id.to_string(),
            thread_id: String::new(),
            metadata: HashMap::new(),
            created_at: now(),
            updated_at: now(),
            forked_from: None,
        };
        Self::write_meta_atomic(&dir, &Self::meta_from(&session, 0))?;
        Ok(session)
    }

    async fn put(&self, session: Session) -> Result<()> {
        let lock = self.lock_for(&session.session_id);
        let _guard = lock.lock();
        let dir = self.dir_for(&session.session_id);
        let event_count = Self::read_meta(&dir)?.map(|m| m.event_count).unwrap_or(0);
        Self::write_meta_atomic(&dir, &Self::meta_from(&session, event_count))
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock();
        match std::fs::remove_dir_all(self.dir_for(session_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<SessionSummary>> {
        if !self.base_dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids: Vec<String> = std::fs::read_dir(&self.base_dir)?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().into_string().ok())
            .collect();
        ids.sort();
        let mut out = Vec::new();
        for id in ids.into_iter().skip(offset).take(limit) {
            let lock = self.lock_for(&id);
            let _guard = lock.lock();
            if let Some(meta) = Self::read_meta(&self.dir_for(&id))? {
                out.push(SessionSummary {
                    event_count: meta.event_count,
                    session: Self::session_from(&meta),
                });
            }
        }
        Ok(out)
    }

    async fn fork_session(&self, session_id: &str) -> Result<Session> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock();
        let source_dir = self.dir_for(session_id);
        let meta =
            Self::read_meta(&source_dir)?.ok_or_else(|| Error::session_not_found(session_id))?;
        let events = Self::read_events(&source_dir)?;

        let mut forked = Self::session_from(&meta);
        forked.session_id = new_session_id();
        forked.forked_from = Some(session_id.to_string());
        let now = now();
        forked.created_at = now;
        forked.updated_at = now;
        drop(_guard);

        let fork_lock = self.lock_for(&forked.session_id);
        let _fork_guard = fork_lock.lock();
        let fork_dir = self.dir_for(&forked.session_id);
        Self::rewrite_events(&fork_dir, &events)?;
        Self::write_meta_atomic(&fork_dir, &Self::meta_from(&forked, events.len()))?;
        Ok(forked)
    }

    async fn save_turn(
        &self,
        session_id: &str,
        input_messages: Vec<Message>,
        output_messages: Vec<Message>,
        usage: Usage,
    ) -> Result<()> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock();
        let dir = self.dir_for(session_id);
        let mut meta = Self::read_meta(&dir)?.ok_or_else(|| Error::session_not_found(session_id))?;
        Self::append_event(
            &dir,
            &Event::Turn {
                input_messages,
                output_messages,
                usage,
                at: now(),
            },
        )?;
        meta.event_count += 1;
        meta.updated_at = now();
        Self::write_meta_atomic(&dir, &meta)
    }

    async fn compact(&self, session_id: &str, summary: String) -> Result<()> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock();
        let dir = self.dir_for(session_id);
        let mut meta = Self::read_meta(&dir)?.ok_or_else(|| Error::session_not_found(session_id))?;
        let events = Self::read_events(&dir)?;
        let original_event_count = events.len();
        let original_message_count = events
            .iter()
            .map(|e| match e {
                Event::Turn {
                    input_messages,
                    output_messages,
                    ..
                } => input_messages.len() + output_messages.len(),
                Event::Compaction { .. } => 0,
            })
            .sum();
        let compaction = Event::Compaction {
            summary,
            original_message_count,
            original_event_count,
            at: now(),
        };
        Self::rewrite_events(&dir, std::slice::from_ref(&compaction))?;
        meta.event_count = 1;
        meta.updated_at = now();
        Self::write_meta_atomic(&dir, &meta)
    }

    async fn events(&self, session_id: &str) -> Result<Vec<Event>> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock();
        Self::read_events(&self.dir_for(session_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_creates_then_returns_existing_session() {
        let store = InMemorySessionStore::new();
        let opened = store.open("session-1").await.unwrap();
        let reopened = store.open("session-1").await.unwrap();
        assert_eq!(opened.session_id, reopened.session_id);
        assert_eq!(opened.created_at, reopened.created_at);
    }

    #[tokio::test]
    async fn save_turn_appends_event_and_list_reports_event_count() {
        let store = InMemorySessionStore::new();
        store.open("session-1").await.unwrap();
        store
            .save_turn(
                "session-1",
                vec![Message::user("hi")],
                vec![Message::assistant(vec![crate::message::Content::text("hello")])],
                Usage::default(),
            )
            .await
            .unwrap();

        let summaries = store.list(10, 0).await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].event_count, 1);
    }

    #[tokio::test]
    async fn compact_replaces_log_with_single_summary_event_recording_originals() {
        let store = InMemorySessionStore::new();
        store.open("session-1").await.unwrap();
        for _ in 0..3 {
            store
                .save_turn(
                    "session-1",
                    vec![Message::user("hi")],
                    vec![Message::assistant(vec![crate::message::Content::text("ok")])],
                    Usage::default(),
                )
                .await
                .unwrap();
        }
        store.compact("session-1", "summary of three turns".into()).await.unwrap();

        let events = store.events("session-1").await.unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            Event::Compaction {
                summary,
                original_event_count,
                original_message_count,
                ..
            } => {
                assert_eq!(summary, "summary of three turns");
                assert_eq!(*original_event_count, 3);
                assert_eq!(*original_message_count, 6);
            }
            _ => panic!("expected compaction event"),
        }
    }

    #[tokio::test]
    async fn fork_session_copies_event_log_independently() {
        let store = InMemorySessionStore::new();
        store.open("session-1").await.unwrap();
        store
            .save_turn(
                "session-1",
                vec![Message::user("hi")],
                vec![Message::assistant(vec![crate::message::Content::text("hello")])],
                Usage::default(),
            )
            .await
            .unwrap();

        let forked = store.fork_session("session-1").await.unwrap();
        store
            .save_turn(
                &forked.session_id,
                vec![Message::user("more")],
                vec![Message::assistant(vec![crate::message::Content::text("more back")])],
                Usage::default(),
            )
            .await
            .unwrap();

        assert_eq!(store.events("session-1").await.unwrap().len(), 1);
        assert_eq!(store.events(&forked.session_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = InMemorySessionStore::new();
        store.delete("never-existed").await.unwrap();
        store.delete("never-existed").await.unwrap();
    }

    #[tokio::test]
    async fn file_store_roundtrips_turn_and_compaction() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path());
        store.open("session-file-1").await.unwrap();
        store
            .save_turn(
                "session-file-1",
                vec![Message::user("hi")],
                vec![Message::assistant(vec![crate::message::Content::text("hello")])],
                Usage::default(),
            )
            .await
            .unwrap();

        let summaries = store.list(10, 0).await.unwrap();
        assert_eq!(summaries[0].event_count, 1);

        store.compact("session-file-1", "summary".into()).await.unwrap();
        let events = store.events("session-file-1").await.unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Event::Compaction { .. }));

        let summaries_after = store.list(10, 0).await.unwrap();
        assert_eq!(summaries_after[0].event_count, 1);
    }

    #[tokio::test]
    async fn file_store_fork_is_independent_of_source() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path());
        store.open("session-file-2").await.unwrap();
        store
            .save_turn(
                "session-file-2",
                vec![Message::user("hi")],
                vec![Message::assistant(vec![crate::message::Content::text("hello")])],
                Usage::default(),
            )
            .await
            .unwrap();

        let forked = store.fork_session("session-file-2").await.unwrap();
        store
            .save_turn(&forked.session_id, vec![Message::user("x")], vec![], Usage::default())
            .await
            .unwrap();

        assert_eq!(store.events("session-file-2").await.unwrap().len(), 1);
        assert_eq!(store.events(&forked.session_id).await.unwrap().len(), 2);
    }
}
