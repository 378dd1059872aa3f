//! Thread store: append-only conversation history identified by
//! `thread_id`, with fork and both in-memory and file-backed
//! implementations (`spec.md` §3, §4.5, §6).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::ids::{new_thread_id, now};
use crate::message::Message;

/// An append-only conversation, exclusively owned by its store. The agent
/// borrows a cloned snapshot for one request and hands back the messages to
/// append (`SPEC_FULL.md` §9 ownership notes).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Thread {
    pub thread_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub agent_name: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub forked_from: Option<String>,
}

impl Thread {
    pub fn new(thread_id: impl Into<String>) -> Self {
        let now = now();
        Self {
            thread_id: thread_id.into(),
            user_id: None,
            agent_id: None,
            agent_name: None,
            title: None,
            messages: Vec::new(),
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
            forked_from: None,
        }
    }

    /// Deep-copies this thread under a freshly generated id with a
    /// `forked_from` back-reference. `spec.md` §3: the original is
    /// unchanged, and mutating the fork afterward must not affect the
    /// origin.
    pub fn deep_fork(&self) -> Thread {
        let mut copy = self.clone();
        copy.thread_id = new_thread_id();
        copy.forked_from = Some(self.thread_id.clone());
        let now = now();
        copy.created_at = now;
        copy.updated_at = now;
        copy
    }
}

/// Lightweight listing order: stable across reads as long as no thread is
/// added, removed, or forked in between (`spec.md` §4.5).
#[async_trait]
pub trait ThreadRepository: Send + Sync {
    async fn get(&self, thread_id: &str) -> Result<Option<Thread>>;
    /// Full overwrite of the stored thread.
    async fn put(&self, thread: Thread) -> Result<()>;
    /// Idempotent: deleting an absent thread is `Ok`.
    async fn delete(&self, thread_id: &str) -> Result<()>;
    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<Thread>>;
    /// Deep-copies `thread_id` under a new id and persists the fork.
    async fn fork_thread(&self, thread_id: &str) -> Result<Thread>;
}

/// In-memory `ThreadRepository`, backed by a `parking_lot::RwLock`-guarded
/// map. Suitable for tests and for host applications that don't need
/// durability across process restarts.
#[derive(Default)]
pub struct InMemoryThreadStore {
    threads: RwLock<HashMap<String, Thread>>,
    order: RwLock<Vec<String>>,
}

impl InMemoryThreadStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ThreadRepository for InMemoryThreadStore {
    async fn get(&self, thread_id: &str) -> Result<Option<Thread>> {
        Ok(self.threads.read().get(thread_id).cloned())
    }

    async fn put(&self, thread: Thread) -> Result<()> {
        let mut threads = self.threads.write();
        if !threads.contains_key(&thread.thread_id) {
            self.order.write().push(thread.thread_id.clone());
        }
        threads.insert(thread.thread_id.clone(), thread);
        Ok(())
    }

    async fn delete(&self, thread_id: &str) -> Result<()> {
        self.threads.write().remove(thread_id);
        self.order.write().retain(|id| id != thread_id);
        Ok(())
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<Thread>> {
        let order = self.order.read();
        let threads = self.threads.read();
        Ok(order
            .iter()
            .skip(offset)
            .take(limit)
            .filter_map(|id| threads.get(id).cloned())
            .collect())
    }

    async fn fork_thread(&self, thread_id: &str) -> Result<Thread> {
        let source = self
            .get(thread_id)
            .await?
            .ok_or_else(|| Error::thread_not_found(thread_id))?;
        let forked = source.deep_fork();
        self.put(forked.clone()).await?;
        Ok(forked)
    }
}

#[derive(Serialize, Deserialize)]
struct ThreadMeta {
    thread_id: String,
    user_id: Option<String>,
    agent_id: Option<String>,
    agent_name: Option<String>,
    title: Option<String>,
    metadata: HashMap<String, serde_json::Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    forked_from: Option<String>,
}

impl From<&Thread> for ThreadMeta {
    fn from(t: &Thread) -> Self {
        Self {
            thread_id: t.thread_id.clone(),
            user_id: t.user_id.clone(),
            agent_id: t.agent_id.clone(),
            agent_name: t.agent_name.clone(),
            title: t.title.clone(),
            metadata: t.metadata.clone(),
            created_at: t.created_at,
            updated_at: t.updated_at,
            forked_from: t.forked_from.clone(),
        }
    }
}

/// File-backed `ThreadRepository`: one directory per thread containing
/// `meta.json` and `messages.jsonl` (`spec.md` §6). Writes serialize per
/// thread id via a small lock registry so concurrent callers never
/// interleave a directory's meta/messages writes.
pub struct FileThreadStore {
    base_dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl FileThreadStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, thread_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .entry(thread_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn dir_for(&self, thread_id: &str) -> PathBuf {
        self.base_dir.join(thread_id)
    }

    fn read_thread_from_dir(dir: &Path) -> Result<Option<Thread>> {
        let meta_path = dir.join("meta.json");
        if !meta_path.exists() {
            return Ok(None);
        }
        let meta_raw = std::fs::read_to_string(&meta_path)?;
        let meta: ThreadMeta = serde_json::from_str(&meta_raw)?;
        let messages = read_jsonl(&dir.join("messages.jsonl"))?;
        Ok(Some(Thread {
            thread_id: meta.thread_id,
            user_id: meta.user_id,
            agent_id: meta.agent_id,
            agent_name: meta.agent_name,
            title: meta.title,
            messages,
            metadata: meta.metadata,
            created_at: meta.created_at,
            updated_at: meta.updated_at,
            forked_from: meta.forked_from,
        }))
    }

    fn write_thread_to_dir(dir: &Path, thread: &Thread) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        write_meta_atomic(dir, thread)?;
        write_messages(dir, &thread.messages)
    }
}

fn write_meta_atomic(dir: &Path, thread: &Thread) -> Result<()> {
    let meta = ThreadMeta::from(thread);
    let final_path = dir.join("meta.json");
    let tmp_path = dir.join("meta.json.tmp");
    std::fs::write(&tmp_path, serde_json::to_vec_pretty(&meta)?)?;
    std::fs::rename(&tmp_path, &final_path)?;
    Ok(())
}

fn existing_line_count(path: &Path) -> Result<usize> {
    if !path.exists() {
        return Ok(0);
    }
    let content = std::fs::read_to_string(path)?;
    Ok(content.lines().filter(|l| !l.trim().is_empty()).count())
}

fn read_jsonl(path: &Path) -> Result<Vec<Message>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path)?;
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| Ok(serde_json::from_str(l)?))
        .collect()
}

/// Appends new messages when `messages` extends what's on disk; otherwise
/// rewrites the file wholesale via temp+rename. Either path fsyncs before
/// returning (`spec.md` §6: "append-with-fsync").
fn write_messages(dir: &Path, messages: &[Message]) -> Result<()> {
    let path = dir.join("messages.jsonl");
    let existing = existing_line_count(&path)?;
    if existing <= messages.len() {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        for message in &messages[existing..] {
            let mut line = serde_json::to_string(message)?;
            line.push('\n');
            file.write_all(line.as_bytes())?;
        }
        file.sync_all()?;
        Ok(())
    } else {
        let tmp_path = dir.join("messages.jsonl.tmp");
        let mut file = std::fs::File::create(&tmp_path)?;
        for message in messages {
            let mut line = serde_json::to_string(message)?;
            line.push('\n');
            file.write_all(line.as_bytes())?;
        }
        file.sync_all()?;
        drop(file);
        std::fs::rename(&tmp_path, &path)?;
        Ok(())
    }
}

#[async_trait]
impl ThreadRepository for FileThreadStore {
    async fn get(&self, thread_id: &str) -> Result<Option<Thread>> {
        let lock = self.lock_for(thread_id);
        let _guard = lock.lock();
        Self::read_thread_from_dir(&self.dir_for(thread_id))
    }

    async fn put(&self, thread: Thread) -> Result<()> {
        let lock = self.lock_for(&thread.thread_id);
        let _guard = lock.lock();
        Self::write_thread_to_dir(&self.dir_for(&thread.thread_id), &thread)
    }

    async fn delete(&self, thread_id: &str) -> Result<()> {
        let lock = self.lock_for(thread_id);
        let _guard = lock.lock();
        let dir = self.dir_for(thread_id);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<Thread>> {
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
            if let Some(thread) = self.get(&id).await? {
                out.push(thread);
            }
        }
        Ok(out)
    }

    async fn fork_thread(&self, thread_id: &str) -> Result<Thread> {
        let source = self
            .get(thread_id)
            .await?
            .ok_or_else(|| Error::thread_not_found(thread_id))?;
        let forked = source.deep_fork();
        self.put(forked.clone()).await?;
        Ok(forked)
    }
}
