//! Durable catalog of produced audio files.
//!
//! The store is one JSON array rewritten in full on every mutation. All
//! mutations go through [`CatalogWriter`], which holds the catalog's single
//! writer lock for the whole load → modify → commit sequence, so concurrent
//! conversions, renames and deletions never overwrite each other's updates.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::error::{Result, VaultError};
use crate::options::ConversionOptions;

const TMP_MARKER: &str = ".tmp-";

/// One successfully produced output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogRecord {
    pub id: String,
    /// Display name, mutable through rename.
    pub original_name: String,
    /// Physical file in the processed directory.
    pub filename: String,
    pub size: u64,
    pub date: String,
    #[serde(default)]
    pub options: ConversionOptions,
}

#[derive(Debug)]
pub struct Catalog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

/// Exclusive access to the catalog for a read-modify-write sequence.
pub struct CatalogWriter<'a> {
    catalog: &'a Catalog,
    _guard: MutexGuard<'a, ()>,
}

impl Catalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Prepare the store location and sweep temp files left by an interrupted commit.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let catalog = Self::new(path);
        let dir = catalog.dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| VaultError::io(format!("failed to create {}", dir.display()), e))?;

        let prefix = format!("{}{TMP_MARKER}", catalog.file_name());
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if name.to_string_lossy().starts_with(&prefix) {
                warn!(path = %entry.path().display(), "Removing stale catalog temp file");
                let _ = tokio::fs::remove_file(entry.path()).await;
            }
        }

        info!(path = %catalog.path.display(), "Catalog opened");
        Ok(catalog)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn dir(&self) -> PathBuf {
        self.path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "history.json".to_string())
    }

    /// Full ordered list. A missing or corrupt store reads as empty.
    pub async fn load_all(&self) -> Vec<CatalogRecord> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read catalog, treating as empty");
                return Vec::new();
            }
        };
        if raw.trim().is_empty() {
            return Vec::new();
        }
        match serde_json::from_str(&raw) {
            Ok(records) => records,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Catalog is not valid JSON, treating as empty");
                Vec::new()
            }
        }
    }

    pub async fn find(&self, id: &str) -> Option<CatalogRecord> {
        self.load_all().await.into_iter().find(|r| r.id == id)
    }

    /// Wait for exclusive write access.
    pub async fn writer(&self) -> CatalogWriter<'_> {
        CatalogWriter {
            catalog: self,
            _guard: self.write_lock.lock().await,
        }
    }

    /// Insert or replace by id, placing the record first.
    pub async fn upsert(&self, record: CatalogRecord) -> Result<()> {
        let writer = self.writer().await;
        let mut records = writer.load().await;
        records.retain(|r| r.id != record.id);
        let id = record.id.clone();
        records.insert(0, record);
        writer.commit(&records).await?;
        debug!(file_id = %id, total = records.len(), "Catalog upsert committed");
        Ok(())
    }

    /// Remove the record with `id` and return the remaining list.
    pub async fn delete_by_id(&self, id: &str) -> Result<Vec<CatalogRecord>> {
        let writer = self.writer().await;
        let mut records = writer.load().await;
        let before = records.len();
        records.retain(|r| r.id != id);
        if records.len() == before {
            return Err(VaultError::NotFound(format!("no catalog record with id '{id}'")));
        }
        writer.commit(&records).await?;
        Ok(records)
    }

    pub async fn replace_all(&self, records: &[CatalogRecord]) -> Result<()> {
        self.writer().await.commit(records).await
    }
}

impl CatalogWriter<'_> {
    pub async fn load(&self) -> Vec<CatalogRecord> {
        self.catalog.load_all().await
    }

    /// Atomically replace the store with `records`, durable before returning.
    pub async fn commit(&self, records: &[CatalogRecord]) -> Result<()> {
        let catalog = self.catalog;
        let dir = catalog.dir();
        let tmp_path = dir.join(format!(
            "{}{TMP_MARKER}{}",
            catalog.file_name(),
            uuid::Uuid::new_v4().simple()
        ));

        let raw = serde_json::to_vec_pretty(records)?;

        let written = async {
            let mut f = tokio::fs::File::create(&tmp_path).await?;
            f.write_all(&raw).await?;
            f.flush().await?;
            f.sync_all().await?;
            tokio::fs::rename(&tmp_path, &catalog.path).await
        }
        .await;

        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(VaultError::io(
                format!("failed to commit catalog {}", catalog.path.display()),
                e,
            ));
        }

        // Persist the directory entry too; not every platform allows opening a directory.
        if let Ok(d) = tokio::fs::File::open(&dir).await {
            let _ = d.sync_all().await;
        }
        Ok(())
    }
}
