use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::info;

use crate::deletion::DeletePolicy;
use crate::jobs::{DEFAULT_JOB_RETENTION, DEFAULT_MAX_FINISHED_JOBS};

/// Storage layout and external tool settings for one vault instance.
#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Per-session chunk directories and assembled inputs live here.
    pub uploads_dir: PathBuf,
    /// Produced WAV files.
    pub processed_dir: PathBuf,
    /// JSON catalog store.
    pub catalog_path: PathBuf,
    pub ffmpeg_bin: String,
    pub ffprobe_bin: String,
    /// Hard limit for a single probe or extraction run.
    pub tool_timeout: Duration,
    pub delete_policy: DeletePolicy,
    /// How long failed or dropped jobs stay queryable.
    pub job_retention: Duration,
    /// Cap on finished jobs kept in memory.
    pub max_finished_jobs: usize,
}

impl VaultConfig {
    /// Layout rooted at `root`: `uploads/`, `processed/` and `history.json`.
    pub fn with_root(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            uploads_dir: root.join("uploads"),
            processed_dir: root.join("processed"),
            catalog_path: root.join("history.json"),
            ffmpeg_bin: "ffmpeg".to_string(),
            ffprobe_bin: "ffprobe".to_string(),
            tool_timeout: Duration::from_secs(3600),
            delete_policy: DeletePolicy::default(),
            job_retention: DEFAULT_JOB_RETENTION,
            max_finished_jobs: DEFAULT_MAX_FINISHED_JOBS,
        }
    }

    pub fn from_env() -> Self {
        let root = std::env::var("AUDIO_STORAGE_DIR")
            .map(|v| v.trim().to_string())
            .unwrap_or_else(|_| "./server_storage".to_string());

        let mut config = Self::with_root(&root);

        if let Ok(bin) = std::env::var("FFMPEG_BIN") {
            config.ffmpeg_bin = bin.trim().to_string();
        }
        if let Ok(bin) = std::env::var("FFPROBE_BIN") {
            config.ffprobe_bin = bin.trim().to_string();
        }

        config.tool_timeout = Duration::from_secs(
            std::env::var("AUDIO_TOOL_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3600),
        );

        config.delete_policy = DeletePolicy {
            attempts: std::env::var("AUDIO_DELETE_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            initial_backoff: Duration::from_millis(
                std::env::var("AUDIO_DELETE_BACKOFF_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(100),
            ),
            ..DeletePolicy::default()
        };

        config.job_retention = std::env::var("AUDIO_JOB_RETENTION_SECS")
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_JOB_RETENTION);

        info!(
            storage_root = %root,
            ffmpeg = %config.ffmpeg_bin,
            ffprobe = %config.ffprobe_bin,
            tool_timeout_secs = config.tool_timeout.as_secs(),
            "Loaded vault configuration"
        );

        config
    }

    /// Create the storage directories if they do not exist yet.
    pub async fn ensure_dirs(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.uploads_dir).await?;
        tokio::fs::create_dir_all(&self.processed_dir).await?;
        if let Some(parent) = self.catalog_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_root_layout() {
        let config = VaultConfig::with_root("/srv/audio");
        assert_eq!(config.uploads_dir, PathBuf::from("/srv/audio/uploads"));
        assert_eq!(config.processed_dir, PathBuf::from("/srv/audio/processed"));
        assert_eq!(config.catalog_path, PathBuf::from("/srv/audio/history.json"));
        assert_eq!(config.ffmpeg_bin, "ffmpeg");
    }

    #[tokio::test]
    async fn test_ensure_dirs_creates_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let config = VaultConfig::with_root(tmp.path().join("storage"));
        config.ensure_dirs().await.unwrap();
        assert!(config.uploads_dir.is_dir());
        assert!(config.processed_dir.is_dir());
    }
}
