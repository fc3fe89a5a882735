use std::path::{Path, PathBuf};

use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::chunks::{validate_session_id, ChunkStore};
use crate::error::{Result, VaultError};

/// Reduce a client supplied filename to its last path component.
pub fn safe_file_name(filename: &str) -> Result<String> {
    let name = filename
        .trim()
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or("")
        .trim();
    if name.is_empty() || name == "." || name == ".." {
        return Err(VaultError::Validation(format!(
            "invalid upload filename '{filename}'"
        )));
    }
    Ok(name.to_string())
}

/// Concatenates the chunks of one session into a single input file.
#[derive(Debug, Clone)]
pub struct Assembler {
    chunks: ChunkStore,
}

impl Assembler {
    pub fn new(chunks: ChunkStore) -> Self {
        Self { chunks }
    }

    /// Where the assembled file for `session_id` lands.
    pub fn output_path(&self, session_id: &str, filename: &str) -> PathBuf {
        self.chunks
            .root()
            .join(format!("{session_id}_{filename}"))
    }

    /// Join chunks `0..total_chunks` in index order. A gap aborts the assembly.
    ///
    /// The session directory is removed whatever the outcome; on success the
    /// returned file belongs to the caller.
    pub async fn assemble(
        &self,
        session_id: &str,
        total_chunks: u32,
        filename: &str,
    ) -> Result<PathBuf> {
        validate_session_id(session_id)?;
        let result = self.assemble_inner(session_id, total_chunks, filename).await;
        self.chunks.remove_session(session_id).await;
        result
    }

    async fn assemble_inner(
        &self,
        session_id: &str,
        total_chunks: u32,
        filename: &str,
    ) -> Result<PathBuf> {
        if total_chunks == 0 {
            return Err(VaultError::Validation(
                "total_chunks must be at least 1".to_string(),
            ));
        }
        let filename = safe_file_name(filename)?;

        let present = self.chunks.list_chunks(session_id).await;
        let missing: Vec<u32> = (0..total_chunks)
            .filter(|i| !present.contains(i))
            .collect();
        if !missing.is_empty() {
            warn!(
                file_id = %session_id,
                total_chunks = total_chunks,
                missing = missing.len(),
                "Refusing to assemble incomplete upload"
            );
            return Err(VaultError::MissingChunks(missing));
        }

        let output = self.output_path(session_id, &filename);
        match self.concatenate(session_id, total_chunks, &output).await {
            Ok(bytes) => {
                info!(
                    file_id = %session_id,
                    total_chunks = total_chunks,
                    bytes = bytes,
                    output = %output.display(),
                    "Assembled upload"
                );
                Ok(output)
            }
            Err(e) => {
                let _ = fs::remove_file(&output).await;
                Err(e)
            }
        }
    }

    async fn concatenate(&self, session_id: &str, total_chunks: u32, output: &Path) -> Result<u64> {
        let mut out = File::create(output)
            .await
            .map_err(|e| VaultError::io(format!("failed to create {}", output.display()), e))?;

        let mut written = 0u64;
        for index in 0..total_chunks {
            let path = self.chunks.chunk_path(session_id, index);
            let mut chunk = File::open(&path)
                .await
                .map_err(|e| VaultError::io(format!("failed to open chunk {index}"), e))?;
            written += tokio::io::copy(&mut chunk, &mut out)
                .await
                .map_err(|e| VaultError::io(format!("failed to append chunk {index}"), e))?;
        }

        out.flush().await?;
        out.sync_all().await?;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_bytes(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    #[tokio::test]
    async fn test_reassembles_regardless_of_arrival_order() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ChunkStore::new(tmp.path());
        let assembler = Assembler::new(store.clone());

        let original = sample_bytes(10_000);
        let pieces: Vec<&[u8]> = original.chunks(1_024).collect();
        let order = [7usize, 2, 9, 0, 4, 1, 8, 3, 6, 5];
        assert_eq!(order.len(), pieces.len());
        for i in order {
            store.put_chunk("ordered", i as u32, pieces[i]).await.unwrap();
        }

        let out = assembler
            .assemble("ordered", pieces.len() as u32, "movie.mp4")
            .await
            .unwrap();

        assert_eq!(tokio::fs::read(&out).await.unwrap(), original);
        assert_eq!(out.file_name().unwrap(), "ordered_movie.mp4");
        assert!(!store.session_dir("ordered").exists());
    }

    #[tokio::test]
    async fn test_gap_aborts_and_cleans_up() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ChunkStore::new(tmp.path());
        let assembler = Assembler::new(store.clone());

        store.put_chunk("gappy", 0, b"aaa").await.unwrap();
        store.put_chunk("gappy", 2, b"ccc").await.unwrap();

        let err = assembler.assemble("gappy", 3, "clip.mov").await.unwrap_err();
        match err {
            VaultError::MissingChunks(missing) => assert_eq!(missing, vec![1]),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!store.session_dir("gappy").exists());
        assert!(!assembler.output_path("gappy", "clip.mov").exists());
    }

    #[tokio::test]
    async fn test_zero_total_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ChunkStore::new(tmp.path());
        store.put_chunk("empty", 0, b"a").await.unwrap();
        let err = Assembler::new(store.clone())
            .assemble("empty", 0, "a.mp4")
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::Validation(_)));
        assert!(!store.session_dir("empty").exists());
    }

    #[test]
    fn test_safe_file_name_strips_directories() {
        assert_eq!(safe_file_name("../../etc/passwd").unwrap(), "passwd");
        assert_eq!(safe_file_name("C:\\videos\\trip.mkv").unwrap(), "trip.mkv");
        assert_eq!(safe_file_name("plain.mp4").unwrap(), "plain.mp4");
        assert!(safe_file_name("folder/").is_err());
        assert!(safe_file_name("   ").is_err());
    }
}
