//! Conversation history persistence.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::error::ChatError;
use crate::types::ConversationHistory;

/// Loads and saves whole-conversation snapshots.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Load a conversation; an unknown id is an empty history.
    async fn load(&self, conversation_id: &str) -> Result<ConversationHistory, ChatError>;

    /// Replace the stored snapshot.
    async fn save(&self, conversation_id: &str, history: &ConversationHistory) -> Result<(), ChatError>;
}

/// Process-local store, mostly for tests and embedding.
#[derive(Debug, Default)]
pub struct InMemoryHistoryStore {
    conversations: RwLock<HashMap<String, ConversationHistory>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn load(&self, conversation_id: &str) -> Result<ConversationHistory, ChatError> {
        Ok(self
            .conversations
            .read()
            .await
            .get(conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save(&self, conversation_id: &str, history: &ConversationHistory) -> Result<(), ChatError> {
        self.conversations
            .write()
            .await
            .insert(conversation_id.to_string(), history.clone());
        Ok(())
    }
}

/// One pretty-printed JSON file per conversation.
#[derive(Debug, Clone)]
pub struct FileHistoryStore {
    dir: PathBuf,
}

impl FileHistoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `~/.toolchat/history`, or `.toolchat/history` without a home directory.
    pub fn default_dir() -> PathBuf {
        directories::UserDirs::new()
            .map(|dirs| dirs.home_dir().join(".toolchat"))
            .unwrap_or_else(|| PathBuf::from(".toolchat"))
            .join("history")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File backing `conversation_id`.
    pub fn path_for(&self, conversation_id: &str) -> Result<PathBuf, ChatError> {
        if conversation_id.trim().is_empty() {
            return Err(ChatError::persistence(conversation_id, "conversation id is empty"));
        }
        Ok(self.dir.join(format!("{}.json", encode_id(conversation_id))))
    }
}

#[async_trait]
impl HistoryStore for FileHistoryStore {
    async fn load(&self, conversation_id: &str) -> Result<ConversationHistory, ChatError> {
        let path = self.path_for(conversation_id)?;
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ConversationHistory::new());
            }
            Err(err) => return Err(ChatError::persistence(conversation_id, err.to_string())),
        };
        serde_json::from_str(&raw).map_err(|err| {
            ChatError::persistence(conversation_id, format!("corrupt history file {}: {err}", path.display()))
        })
    }

    async fn save(&self, conversation_id: &str, history: &ConversationHistory) -> Result<(), ChatError> {
        let path = self.path_for(conversation_id)?;
        let data = serde_json::to_vec_pretty(history)?;
        atomic_write(&path, &data)
            .await
            .map_err(|err| ChatError::persistence(conversation_id, err.to_string()))?;
        tracing::debug!(conversation_id, path = %path.display(), messages = history.len(), "history saved");
        Ok(())
    }
}

/// Filesystem-safe, collision-free file stem for an id.
fn encode_id(conversation_id: &str) -> String {
    let mut out = String::with_capacity(conversation_id.len());
    for byte in conversation_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("_{byte:02x}"));
        }
    }
    out
}

/// Write to a sibling temp file, then rename over `path`.
async fn atomic_write(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "history".to_string());
    let temp_path = path.with_file_name(format!(".{file_name}.tmp-{}", uuid::Uuid::new_v4()));

    let write_result = async {
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        Ok::<_, std::io::Error>(())
    }
    .await;

    if let Err(err) = write_result {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(err);
    }
    if let Err(err) = tokio::fs::rename(&temp_path, path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(err);
    }
    Ok(())
}
