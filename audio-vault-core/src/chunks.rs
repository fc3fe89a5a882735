use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, warn};

use crate::error::{Result, VaultError};

const CHUNK_PREFIX: &str = "chunk_";
const MAX_SESSION_ID_LEN: usize = 128;

/// Session ids become directory names, so only a conservative alphabet is accepted.
pub fn validate_session_id(session_id: &str) -> Result<()> {
    let valid = !session_id.is_empty()
        && session_id.len() <= MAX_SESSION_ID_LEN
        && session_id != "."
        && session_id != ".."
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(VaultError::Validation(format!(
            "invalid upload session id '{session_id}'"
        )))
    }
}

/// Per-session chunk persistence under `<root>/<session_id>/chunk_<index>`.
#[derive(Debug, Clone)]
pub struct ChunkStore {
    root: PathBuf,
}

impl ChunkStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(session_id)
    }

    pub fn chunk_path(&self, session_id: &str, index: u32) -> PathBuf {
        self.session_dir(session_id)
            .join(format!("{CHUNK_PREFIX}{index}"))
    }

    /// Store one chunk. A retry at the same index replaces the previous bytes.
    pub async fn put_chunk(&self, session_id: &str, index: u32, bytes: &[u8]) -> Result<()> {
        validate_session_id(session_id)?;

        let dir = self.session_dir(session_id);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| VaultError::io(format!("failed to create {}", dir.display()), e))?;

        // Write aside and rename so a concurrent listing never sees a half-written chunk.
        let final_path = self.chunk_path(session_id, index);
        let part_path = dir.join(format!(
            ".{CHUNK_PREFIX}{index}.part-{}",
            uuid::Uuid::new_v4().simple()
        ));

        if let Err(e) = fs::write(&part_path, bytes).await {
            let _ = fs::remove_file(&part_path).await;
            return Err(VaultError::io(
                format!("failed to write chunk {index} for session {session_id}"),
                e,
            ));
        }
        if let Err(e) = fs::rename(&part_path, &final_path).await {
            let _ = fs::remove_file(&part_path).await;
            return Err(VaultError::io(
                format!("failed to store chunk {index} for session {session_id}"),
                e,
            ));
        }

        debug!(
            file_id = %session_id,
            chunk = index,
            bytes = bytes.len(),
            "Stored upload chunk"
        );
        Ok(())
    }

    /// Indices currently on disk; empty when the session is unknown or unreadable.
    pub async fn list_chunks(&self, session_id: &str) -> BTreeSet<u32> {
        let mut chunks = BTreeSet::new();
        if validate_session_id(session_id).is_err() {
            return chunks;
        }

        let dir = self.session_dir(session_id);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(_) => return chunks,
        };

        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    if let Some(index) = entry
                        .file_name()
                        .to_str()
                        .and_then(|name| name.strip_prefix(CHUNK_PREFIX))
                        .and_then(|n| n.parse::<u32>().ok())
                    {
                        chunks.insert(index);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(file_id = %session_id, error = %e, "Failed while listing chunks");
                    break;
                }
            }
        }

        chunks
    }

    /// Best-effort removal of everything stored for a session.
    pub async fn remove_session(&self, session_id: &str) {
        if validate_session_id(session_id).is_err() {
            return;
        }
        let dir = self.session_dir(session_id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => debug!(file_id = %session_id, "Removed upload session directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                file_id = %session_id,
                dir = %dir.display(),
                error = %e,
                "Failed to remove upload session directory"
            ),
        }
    }
}
