// ABOUTME: Session persistence — one storage interface with in-memory and file-backed implementations.
// ABOUTME: The file backend keeps one JSON document per conversation, written via tmp + rename.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::SessionError;
use crate::session::types::Session;

/// Durable backing for sessions.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Load a session, or `None` if the identifier has never been saved.
    async fn load(&self, id: &str) -> Result<Option<Session>, SessionError>;

    /// Store a session, replacing any previous document for its identifier.
    async fn save(&self, session: &Session) -> Result<(), SessionError>;

    /// Remove a stored session. Returns whether anything was removed.
    async fn delete(&self, id: &str) -> Result<bool, SessionError>;

    /// Identifiers of all stored sessions, sorted.
    async fn list(&self) -> Result<Vec<String>, SessionError>;
}

/// Sessions held in a process-local map.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    sessions: RwLock<HashMap<String, Session>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionBackend for MemoryBackend {
    async fn load(&self, id: &str) -> Result<Option<Session>, SessionError> {
        Ok(self.sessions.read().await.get(id).cloned())
    }

    async fn save(&self, session: &Session) -> Result<(), SessionError> {
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, SessionError> {
        Ok(self.sessions.write().await.remove(id).is_some())
    }

    async fn list(&self) -> Result<Vec<String>, SessionError> {
        let mut ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

/// One `<id>.json` document per conversation inside a directory.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    /// Create a backend rooted at `dir`. The directory is created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path to the document for a conversation identifier.
    pub fn session_path(&self, id: &str) -> Result<PathBuf, SessionError> {
        validate_id(id)?;
        Ok(self.dir.join(format!("{}.json", id)))
    }
}

/// Identifiers become file stems, so they must not escape the directory.
fn validate_id(id: &str) -> Result<(), SessionError> {
    if id.is_empty() || id == "." || id.contains("..") || id.contains(['/', '\\', '\0']) {
        return Err(SessionError::InvalidConversationId(id.to_string()));
    }
    Ok(())
}

/// Load a session document from an explicit path.
pub async fn load_session_from(path: &Path, id: &str) -> Result<Option<Session>, SessionError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut session: Session = serde_json::from_str(&content)?;
    session.id = id.to_string();
    Ok(Some(session))
}

/// Save a session document to an explicit path (atomic write via tmp + rename).
pub async fn save_session_to(path: &Path, session: &Session) -> Result<(), SessionError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp_path = path.with_extension("json.tmp");
    let content = serde_json::to_vec(session)?;
    tokio::fs::write(&tmp_path, &content).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

#[async_trait]
impl SessionBackend for FileBackend {
    async fn load(&self, id: &str) -> Result<Option<Session>, SessionError> {
        let path = self.session_path(id)?;
        load_session_from(&path, id).await
    }

    async fn save(&self, session: &Session) -> Result<(), SessionError> {
        let path = self.session_path(&session.id)?;
        save_session_to(&path, session).await
    }

    async fn delete(&self, id: &str) -> Result<bool, SessionError> {
        let path = self.session_path(id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<String>, SessionError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}
