//! Session Management
//!
//! Checkpointing of conversation histories keyed by session id. The store is
//! the only place a paused research task lives between runs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{AgentError, Result};
use crate::message::History;

const MAX_SESSION_ID_LEN: usize = 128;

/// Unique session identifier
///
/// Restricted to `[A-Za-z0-9._-]` so it can double as a file name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn parse(s: impl Into<String>) -> Result<Self> {
        let s = s.into();
        let valid_chars = s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

        if s.is_empty() || s.len() > MAX_SESSION_ID_LEN || !valid_chars || s.starts_with('.') {
            return Err(AgentError::Validation(format!("invalid session id '{}'", s)));
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl TryFrom<String> for SessionId {
    type Error = AgentError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A persisted session
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Unique identifier
    pub id: SessionId,

    /// Conversation history
    pub history: History,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last save timestamp
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    fn new(id: SessionId, history: History) -> Self {
        let now = Utc::now();
        Self {
            id,
            history,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replace the history, keeping the creation time
    fn replaced(previous: Option<SessionRecord>, id: &SessionId, history: &History) -> Self {
        match previous {
            Some(mut record) => {
                record.history = history.clone();
                record.updated_at = Utc::now();
                record
            }
            None => Self::new(id.clone(), history.clone()),
        }
    }

    /// Number of turns
    pub fn turn_count(&self) -> usize {
        self.history.len()
    }
}

/// Session store trait for persistence
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetch the full record, if any
    async fn record(&self, id: &SessionId) -> Result<Option<SessionRecord>>;

    /// Replace the stored history for `id`
    async fn save(&self, id: &SessionId, history: &History) -> Result<()>;

    /// Delete a session, returning whether it existed
    async fn delete(&self, id: &SessionId) -> Result<bool>;

    /// Most recently updated sessions first
    async fn list(&self, limit: usize) -> Result<Vec<SessionRecord>>;

    /// Load the history for `id`; unseen sessions start empty
    async fn load(&self, id: &SessionId) -> Result<History> {
        Ok(self.record(id).await?.map(|r| r.history).unwrap_or_default())
    }

    /// Whether records survive a restart
    fn is_persistent(&self) -> bool;
}

fn newest_first(mut records: Vec<SessionRecord>, limit: usize) -> Vec<SessionRecord> {
    records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    records.truncate(limit);
    records
}

/// In-memory session store (for development/testing)
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<SessionId, SessionRecord>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn record(&self, id: &SessionId) -> Result<Option<SessionRecord>> {
        Ok(self.sessions.read().await.get(id).cloned())
    }

    async fn save(&self, id: &SessionId, history: &History) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let record = SessionRecord::replaced(sessions.remove(id), id, history);
        sessions.insert(id.clone(), record);
        Ok(())
    }

    async fn delete(&self, id: &SessionId) -> Result<bool> {
        Ok(self.sessions.write().await.remove(id).is_some())
    }

    async fn list(&self, limit: usize) -> Result<Vec<SessionRecord>> {
        let records = self.sessions.read().await.values().cloned().collect();
        Ok(newest_first(records, limit))
    }

    fn is_persistent(&self) -> bool {
        false
    }
}

/// One JSON file per session in a directory
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    /// Open (creating if needed) a store rooted at `dir`
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        tracing::info!(dir = %dir.display(), "Opened file session store");
        Ok(Self { dir })
    }

    fn path_for(&self, id: &SessionId) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    async fn read_record(path: &Path) -> Result<Option<SessionRecord>> {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => serde_json::from_str(&contents)
                .map(Some)
                .map_err(|e| AgentError::Store(format!("corrupt session file {}: {}", path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AgentError::Store(format!("reading {}: {}", path.display(), e))),
        }
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn record(&self, id: &SessionId) -> Result<Option<SessionRecord>> {
        Self::read_record(&self.path_for(id)).await
    }

    async fn save(&self, id: &SessionId, history: &History) -> Result<()> {
        let path = self.path_for(id);
        let record = SessionRecord::replaced(Self::read_record(&path).await?, id, history);
        let contents = serde_json::to_string_pretty(&record)?;

        // Write aside, then rename over the old file
        let tmp = self.dir.join(format!(".{}.{}.tmp", id, Uuid::new_v4()));
        tokio::fs::write(&tmp, contents)
            .await
            .map_err(|e| AgentError::Store(format!("writing {}: {}", tmp.display(), e)))?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(AgentError::Store(format!("replacing {}: {}", path.display(), e)));
        }

        tracing::debug!(session = %id, turns = history.len(), "Session saved");
        Ok(())
    }

    async fn delete(&self, id: &SessionId) -> Result<bool> {
        match tokio::fs::remove_file(self.path_for(id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(AgentError::Store(e.to_string())),
        }
    }

    async fn list(&self, limit: usize) -> Result<Vec<SessionRecord>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut records = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_record = path.extension().is_some_and(|ext| ext == "json")
                && !entry.file_name().to_string_lossy().starts_with('.');
            if !is_record {
                continue;
            }
            match Self::read_record(&path).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "Skipping unreadable session file"),
            }
        }

        Ok(newest_first(records, limit))
    }

    fn is_persistent(&self) -> bool {
        true
    }
}
