//! File-based chat session persistence: one JSON file per session under
//! the sessions directory, plus an index file with per-session metadata.
//!
//! Writes are plain read-modify-write with no locking; last writer
//! wins. Corrupt files log a warning and read as absent.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMessage {
    pub role: String, // "user" or "assistant"
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionData {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub messages: Vec<SessionMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionIndexEntry {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
}

/// Listing row for `GET /sessions`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionListing {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
    pub preview: String,
}

#[derive(Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        // Session IDs come from clients; keep them on one path component.
        let safe: String = session_id
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join("sessions_index.json")
    }

    fn ensure_dir(&self) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    fn load_index(&self) -> HashMap<String, SessionIndexEntry> {
        match std::fs::read_to_string(self.index_path()) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(index) => index,
                Err(e) => {
                    warn!("Could not parse sessions index: {}", e);
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        }
    }

    fn save_index(&self, index: &HashMap<String, SessionIndexEntry>) -> anyhow::Result<()> {
        self.ensure_dir()?;
        let content = serde_json::to_string_pretty(index)?;
        std::fs::write(self.index_path(), content)?;
        Ok(())
    }

    pub fn create(&self, session_id: &str) -> anyhow::Result<SessionData> {
        self.ensure_dir()?;
        let now = Utc::now();
        let data = SessionData {
            session_id: session_id.to_string(),
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
        };
        self.save(&data)?;
        Ok(data)
    }

    pub fn load(&self, session_id: &str) -> Option<SessionData> {
        let path = self.session_path(session_id);
        if !path.exists() {
            return None;
        }
        match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(data) => Some(data),
                Err(e) => {
                    warn!(session_id, "Could not parse session file: {}", e);
                    None
                }
            },
            Err(e) => {
                warn!(session_id, "Could not read session file: {}", e);
                None
            }
        }
    }

    pub fn save(&self, data: &SessionData) -> anyhow::Result<()> {
        self.ensure_dir()?;
        let mut data = data.clone();
        data.updated_at = Utc::now();

        let content = serde_json::to_string_pretty(&data)?;
        std::fs::write(self.session_path(&data.session_id), content)?;

        let mut index = self.load_index();
        index.insert(
            data.session_id.clone(),
            SessionIndexEntry {
                created_at: data.created_at,
                updated_at: data.updated_at,
                message_count: data.messages.len(),
            },
        );
        self.save_index(&index)?;
        Ok(())
    }

    /// Append a user/assistant message pair. Sessions are created on
    /// first write.
    pub fn log_interaction(
        &self,
        session_id: &str,
        user_message: &str,
        assistant_message: &str,
    ) -> anyhow::Result<()> {
        let mut data = match self.load(session_id) {
            Some(data) => data,
            None => self.create(session_id)?,
        };

        let now = Utc::now();
        data.messages.push(SessionMessage {
            role: "user".to_string(),
            message: user_message.to_string(),
            timestamp: now,
        });
        data.messages.push(SessionMessage {
            role: "assistant".to_string(),
            message: assistant_message.to_string(),
            timestamp: now,
        });

        self.save(&data)
    }

    /// The most recent `limit` messages of a session, oldest first.
    pub fn recent_messages(&self, session_id: &str, limit: usize) -> Vec<SessionMessage> {
        let Some(data) = self.load(session_id) else {
            return Vec::new();
        };
        let skip = data.messages.len().saturating_sub(limit);
        data.messages.into_iter().skip(skip).collect()
    }

    /// All sessions with previews, most recently updated first.
    pub fn list(&self) -> Vec<SessionListing> {
        let index = self.load_index();
        let mut sessions: Vec<SessionListing> = index
            .into_iter()
            .filter_map(|(session_id, meta)| {
                let data = self.load(&session_id)?;
                let first = data.messages.first()?;
                let preview: String = first.message.chars().take(100).collect();
                Some(SessionListing {
                    session_id,
                    created_at: meta.created_at,
                    updated_at: meta.updated_at,
                    message_count: meta.message_count,
                    preview,
                })
            })
            .collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        sessions
    }

    pub fn delete(&self, session_id: &str) -> anyhow::Result<()> {
        let path = self.session_path(session_id);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        let mut index = self.load_index();
        if index.remove(session_id).is_some() {
            self.save_index(&index)?;
        }
        Ok(())
    }

    pub fn delete_all(&self) -> anyhow::Result<()> {
        if self.dir.exists() {
            for entry in std::fs::read_dir(&self.dir)? {
                let entry = entry?;
                if entry.path().extension().is_some_and(|ext| ext == "json") {
                    std::fs::remove_file(entry.path())?;
                }
            }
        }
        Ok(())
    }
}
