use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use crate::catalog::{Catalog, CatalogRecord};
use crate::error::{Result, VaultError};

/// Characters rejected by common filesystems (Windows being the strictest).
const ILLEGAL_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Physical rename seam.
#[async_trait]
pub trait FileMover: Send + Sync {
    async fn rename(&self, from: &Path, to: &Path) -> std::io::Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioFileMover;

#[async_trait]
impl FileMover for TokioFileMover {
    async fn rename(&self, from: &Path, to: &Path) -> std::io::Result<()> {
        tokio::fs::rename(from, to).await
    }
}

pub fn sanitize_stem(raw: &str) -> String {
    raw.chars()
        .filter(|c| !ILLEGAL_CHARS.contains(c) && !c.is_control())
        .collect::<String>()
        .trim()
        .to_string()
}

#[derive(Clone)]
pub struct RenameService {
    catalog: Arc<Catalog>,
    processed_dir: PathBuf,
    mover: Arc<dyn FileMover>,
}

impl RenameService {
    pub fn new(catalog: Arc<Catalog>, processed_dir: impl Into<PathBuf>) -> Self {
        Self::with_mover(catalog, processed_dir, Arc::new(TokioFileMover))
    }

    pub fn with_mover(
        catalog: Arc<Catalog>,
        processed_dir: impl Into<PathBuf>,
        mover: Arc<dyn FileMover>,
    ) -> Self {
        Self {
            catalog,
            processed_dir: processed_dir.into(),
            mover,
        }
    }

    /// Rename record `id` to `new_stem` + its current extension.
    ///
    /// The catalog is only rewritten after the file on disk has been renamed.
    pub async fn rename(&self, id: &str, new_stem: &str) -> Result<CatalogRecord> {
        let id = id.trim();
        if new_stem.trim().is_empty() {
            return Err(VaultError::Validation("a new file name is required".to_string()));
        }
        let stem = sanitize_stem(new_stem);
        if stem.is_empty() || stem == "." || stem == ".." {
            return Err(VaultError::Validation(format!(
                "'{}' is not a usable file name",
                new_stem.trim()
            )));
        }

        let writer = self.catalog.writer().await;
        let mut records = writer.load().await;

        let position = records
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| VaultError::NotFound(format!("no catalog record with id '{id}'")))?;

        let old_filename = records[position].filename.clone();
        let new_filename = match Path::new(&old_filename).extension() {
            Some(ext) => format!("{stem}.{}", ext.to_string_lossy()),
            None => stem.clone(),
        };

        if new_filename == old_filename {
            return Ok(records[position].clone());
        }
        if records.iter().any(|r| r.id != id && r.filename == new_filename) {
            return Err(VaultError::Conflict(format!(
                "'{new_filename}' is already used by another file"
            )));
        }

        let old_path = self.processed_dir.join(&old_filename);
        let new_path = self.processed_dir.join(&new_filename);

        if tokio::fs::try_exists(&new_path).await.unwrap_or(true) {
            return Err(VaultError::Conflict(format!(
                "'{new_filename}' already exists on the server"
            )));
        }
        if !tokio::fs::try_exists(&old_path).await.unwrap_or(false) {
            return Err(VaultError::NotFound(format!(
                "backing file '{old_filename}' is missing"
            )));
        }

        if let Err(e) = self.mover.rename(&old_path, &new_path).await {
            error!(file_id = %id, error = %e, "Physical rename failed");
            return Err(VaultError::io("rename failed (file locked?)", e));
        }

        let record = &mut records[position];
        record.filename = new_filename;
        record.original_name = stem;
        let updated = record.clone();

        if let Err(e) = writer.commit(&records).await {
            // Put the file back so the unchanged catalog still points at it.
            if let Err(undo) = self.mover.rename(&new_path, &old_path).await {
                error!(file_id = %id, error = %undo, "Failed to roll back physical rename");
            }
            return Err(e);
        }

        info!(
            file_id = %id,
            from = %old_filename,
            to = %updated.filename,
            "Renamed file"
        );
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::ConversionOptions;

    struct FailingMover;

    #[async_trait]
    impl FileMover for FailingMover {
        async fn rename(&self, _from: &Path, _to: &Path) -> std::io::Result<()> {
            Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "file is in use",
            ))
        }
    }

    struct Fixture {
        _tmp: tempfile::TempDir,
        processed: PathBuf,
        catalog: Arc<Catalog>,
    }

    async fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let processed = tmp.path().join("processed");
        tokio::fs::create_dir_all(&processed).await.unwrap();
        let catalog = Arc::new(Catalog::new(tmp.path().join("history.json")));

        for (id, filename) in [("one", "intro_one.wav"), ("two", "outro_two.wav")] {
            tokio::fs::write(processed.join(filename), id).await.unwrap();
            catalog
                .upsert(CatalogRecord {
                    id: id.to_string(),
                    original_name: format!("{id}.mp4"),
                    filename: filename.to_string(),
                    size: 3,
                    date: "2026-01-01 00:00:00".to_string(),
                    options: ConversionOptions::default(),
                })
                .await
                .unwrap();
        }

        Fixture {
            _tmp: tmp,
            processed,
            catalog,
        }
    }

    #[test]
    fn test_sanitize_stem() {
        assert_eq!(sanitize_stem("my:song?*"), "mysong");
        assert_eq!(sanitize_stem(" a/b\\c "), "abc");
        assert_eq!(sanitize_stem("<>|"), "");
        assert_eq!(sanitize_stem("เพลง 1"), "เพลง 1");
    }

    #[tokio::test]
    async fn test_rename_success_updates_disk_and_catalog() {
        let fx = fixture().await;
        let service = RenameService::new(fx.catalog.clone(), &fx.processed);

        let updated = service.rename("one", "Opening: Theme").await.unwrap();
        assert_eq!(updated.filename, "Opening Theme.wav");
        assert_eq!(updated.original_name, "Opening Theme");

        assert!(fx.processed.join("Opening Theme.wav").exists());
        assert!(!fx.processed.join("intro_one.wav").exists());
        assert_eq!(fx.catalog.find("one").await.unwrap(), updated);
    }

    #[tokio::test]
    async fn test_rename_conflict_with_other_record() {
        let fx = fixture().await;
        let service = RenameService::new(fx.catalog.clone(), &fx.processed);
        let before = tokio::fs::read(fx.catalog.path()).await.unwrap();

        let err = service.rename("one", "outro_two").await.unwrap_err();
        assert!(matches!(err, VaultError::Conflict(_)));

        assert_eq!(tokio::fs::read(fx.catalog.path()).await.unwrap(), before);
        assert!(fx.processed.join("intro_one.wav").exists());
        assert_eq!(tokio::fs::read(fx.processed.join("outro_two.wav")).await.unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_rename_conflict_with_untracked_file_on_disk() {
        let fx = fixture().await;
        tokio::fs::write(fx.processed.join("stray.wav"), b"?").await.unwrap();
        let service = RenameService::new(fx.catalog.clone(), &fx.processed);

        let err = service.rename("one", "stray").await.unwrap_err();
        assert!(matches!(err, VaultError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_failed_physical_rename_leaves_catalog_untouched() {
        let fx = fixture().await;
        let service =
            RenameService::with_mover(fx.catalog.clone(), &fx.processed, Arc::new(FailingMover));
        let before = tokio::fs::read(fx.catalog.path()).await.unwrap();

        let err = service.rename("one", "fresh").await.unwrap_err();
        assert!(matches!(err, VaultError::Io(_)));
        assert_eq!(tokio::fs::read(fx.catalog.path()).await.unwrap(), before);
        assert!(fx.processed.join("intro_one.wav").exists());
    }

    #[tokio::test]
    async fn test_validation_and_not_found() {
        let fx = fixture().await;
        let service = RenameService::new(fx.catalog.clone(), &fx.processed);

        assert!(matches!(
            service.rename("one", "   ").await.unwrap_err(),
            VaultError::Validation(_)
        ));
        assert!(matches!(
            service.rename("one", "???").await.unwrap_err(),
            VaultError::Validation(_)
        ));
        assert!(matches!(
            service.rename("missing", "name").await.unwrap_err(),
            VaultError::NotFound(_)
        ));

        tokio::fs::remove_file(fx.processed.join("intro_one.wav")).await.unwrap();
        assert!(matches!(
            service.rename("one", "name").await.unwrap_err(),
            VaultError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_rename_to_current_name_is_noop() {
        let fx = fixture().await;
        let service = RenameService::new(fx.catalog.clone(), &fx.processed);
        let record = service.rename("one", "intro_one").await.unwrap();
        assert_eq!(record.filename, "intro_one.wav");
        assert!(fx.processed.join("intro_one.wav").exists());
    }
}
