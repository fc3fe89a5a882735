// End-to-end tests for the upload → assembly → conversion → catalog loop.
//
// ffmpeg is replaced by a transcoder that copies the assembled input verbatim,
// which lets the produced file be compared byte for byte with the upload.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use audio_vault_core::options::ExtractionParams;
use audio_vault_core::{
    AssembleRequest, AudioVault, ConversionOptions, JobState, Transcoder, VaultConfig, VaultError,
};
use tokio::time::sleep;

const POLL_INTERVAL_MS: u64 = 10;
const POLL_ATTEMPTS: u32 = 500;

/// Treats every input containing the byte `0xAA` as carrying audio.
struct CopyTranscoder;

#[async_trait]
impl Transcoder for CopyTranscoder {
    async fn has_audio(&self, input: &Path) -> audio_vault_core::Result<bool> {
        let bytes = tokio::fs::read(input).await?;
        Ok(bytes.contains(&0xAA))
    }

    async fn extract(
        &self,
        input: &Path,
        _params: &ExtractionParams,
        output: &Path,
    ) -> audio_vault_core::Result<()> {
        tokio::fs::copy(input, output).await?;
        Ok(())
    }
}

async fn open_vault(root: &Path) -> AudioVault {
    AudioVault::with_transcoder(VaultConfig::with_root(root), Arc::new(CopyTranscoder))
        .await
        .expect("vault opens")
}

async fn upload(vault: &AudioVault, file_id: &str, payload: &[u8], chunk_size: usize, order: &[usize]) {
    let pieces: Vec<&[u8]> = payload.chunks(chunk_size).collect();
    for &i in order {
        vault
            .put_chunk(file_id, i as u32, pieces[i])
            .await
            .expect("chunk stored");
    }
}

async fn wait_for_terminal(vault: &AudioVault, id: &str) -> JobState {
    for _ in 0..POLL_ATTEMPTS {
        if let Some(job) = vault.job_status(id).await {
            if job.state.is_terminal() {
                return job.state;
            }
        }
        sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
    }
    panic!("job {id} did not finish in time");
}

fn dir_entries(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .map(|rd| {
            rd.map(|e| e.unwrap().file_name().to_string_lossy().to_string())
                .collect()
        })
        .unwrap_or_default()
}

fn payload(len: usize) -> Vec<u8> {
    let mut bytes: Vec<u8> = (0..len).map(|i| (i % 200) as u8).collect();
    bytes[len / 2] = 0xAA;
    bytes
}

#[tokio::test]
async fn test_out_of_order_upload_produces_identical_output() {
    let tmp = tempfile::tempdir().unwrap();
    let vault = open_vault(tmp.path()).await;
    let original = payload(50_000);

    upload(&vault, "sess-a", &original, 8_192, &[6, 3, 0, 5, 1, 4, 2]).await;
    let listed: Vec<u32> = vault.list_chunks("sess-a").await.into_iter().collect();
    assert_eq!(listed, vec![0, 1, 2, 3, 4, 5, 6]);

    let job = vault
        .schedule_assembly(AssembleRequest {
            file_id: "sess-a".into(),
            total_chunks: 7,
            filename: "concert.mkv".into(),
            options: ConversionOptions::default(),
        })
        .await
        .unwrap();
    assert_eq!(job.state, JobState::Queued);

    assert_eq!(wait_for_terminal(&vault, "sess-a").await, JobState::Succeeded);

    let history = vault.history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].filename, "concert_sess-a.wav");
    assert_eq!(history[0].size, original.len() as u64);

    let produced = tokio::fs::read(vault.config().processed_dir.join("concert_sess-a.wav"))
        .await
        .unwrap();
    assert_eq!(produced, original);
    assert!(dir_entries(&vault.config().uploads_dir).is_empty());
}

#[tokio::test]
async fn test_input_without_audio_leaves_nothing_behind() {
    let tmp = tempfile::tempdir().unwrap();
    let vault = open_vault(tmp.path()).await;
    let silent = vec![0u8; 4_096];

    upload(&vault, "silent", &silent, 1_024, &[0, 1, 2, 3]).await;
    vault
        .schedule_assembly(AssembleRequest {
            file_id: "silent".into(),
            total_chunks: 4,
            filename: "slides.mp4".into(),
            options: ConversionOptions::default(),
        })
        .await
        .unwrap();

    assert_eq!(wait_for_terminal(&vault, "silent").await, JobState::DroppedNoAudio);
    assert!(vault.history().await.is_empty());
    assert!(dir_entries(&vault.config().uploads_dir).is_empty());
    assert!(dir_entries(&vault.config().processed_dir).is_empty());
}

#[tokio::test]
async fn test_parallel_conversions_are_all_cataloged() {
    let tmp = tempfile::tempdir().unwrap();
    let vault = open_vault(tmp.path()).await;

    let ids: Vec<String> = (0..8).map(|i| format!("job-{i}")).collect();
    for id in &ids {
        upload(&vault, id, &payload(2_048), 1_024, &[1, 0]).await;
    }
    for id in &ids {
        vault
            .schedule_assembly(AssembleRequest {
                file_id: id.clone(),
                total_chunks: 2,
                // Same original filename for every upload: outputs must not collide.
                filename: "take.mov".into(),
                options: ConversionOptions::default(),
            })
            .await
            .unwrap();
    }
    for id in &ids {
        assert_eq!(wait_for_terminal(&vault, id).await, JobState::Succeeded);
    }

    let history = vault.history().await;
    assert_eq!(history.len(), ids.len());
    for id in &ids {
        assert!(history.iter().any(|r| &r.id == id && r.filename == format!("take_{id}.wav")));
    }
}

#[tokio::test]
async fn test_resubmitting_active_job_conflicts() {
    let tmp = tempfile::tempdir().unwrap();
    let vault = open_vault(tmp.path()).await;
    vault.jobs().register("busy", "a.mp4").await.unwrap();

    let err = vault
        .schedule_assembly(AssembleRequest {
            file_id: "busy".into(),
            total_chunks: 1,
            filename: "a.mp4".into(),
            options: ConversionOptions::default(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::Conflict(_)));
}

#[tokio::test]
async fn test_catalog_survives_reopen() {
    let tmp = tempfile::tempdir().unwrap();
    {
        let vault = open_vault(tmp.path()).await;
        upload(&vault, "keep", &payload(100), 100, &[0]).await;
        vault
            .run_assembly("keep".into(), 1, "memo.m4a".into(), ConversionOptions::default())
            .await;
        vault.rename("keep", "Voice memo").await.unwrap();
    }

    let reopened = open_vault(tmp.path()).await;
    let history = reopened.history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].filename, "Voice memo.wav");
    assert_eq!(history[0].original_name, "Voice memo");

    let stream = reopened.stream("Voice memo.wav", Some("bytes=10-")).await.unwrap();
    assert_eq!(stream.plan.content_range().as_deref(), Some("bytes 10-99/100"));
}

#[tokio::test]
async fn test_renamed_record_keeps_its_file_when_a_later_upload_wants_the_name() {
    let tmp = tempfile::tempdir().unwrap();
    let vault = open_vault(tmp.path()).await;

    let song = payload(64);
    upload(&vault, "sess-a", &song, 64, &[0]).await;
    vault
        .run_assembly("sess-a".into(), 1, "song.mp4".into(), ConversionOptions::default())
        .await;
    // Take the exact name the next upload would produce.
    vault.rename("sess-a", "clip_sess-b").await.unwrap();

    let clip = payload(96);
    upload(&vault, "sess-b", &clip, 96, &[0]).await;
    assert_eq!(
        vault
            .run_assembly("sess-b".into(), 1, "clip.mp4".into(), ConversionOptions::default())
            .await,
        JobState::Succeeded
    );

    let history = vault.history().await;
    let a = history.iter().find(|r| r.id == "sess-a").unwrap();
    let b = history.iter().find(|r| r.id == "sess-b").unwrap();
    assert_eq!(a.filename, "clip_sess-b.wav");
    assert_ne!(a.filename, b.filename);

    let processed = &vault.config().processed_dir;
    assert_eq!(tokio::fs::read(processed.join(&a.filename)).await.unwrap(), song);
    assert_eq!(tokio::fs::read(processed.join(&b.filename)).await.unwrap(), clip);

    vault.remove("sess-b").await.unwrap();
    assert!(processed.join("clip_sess-b.wav").exists());
    assert_eq!(vault.history().await.len(), 1);
}

#[tokio::test]
async fn test_reused_session_id_never_orphans_a_file() {
    let tmp = tempfile::tempdir().unwrap();
    let vault = open_vault(tmp.path()).await;

    upload(&vault, "S", &payload(32), 32, &[0]).await;
    vault
        .run_assembly("S".into(), 1, "first.mp4".into(), ConversionOptions::default())
        .await;

    upload(&vault, "S", &payload(48), 48, &[0]).await;
    let err = vault
        .schedule_assembly(AssembleRequest {
            file_id: "S".into(),
            total_chunks: 1,
            filename: "second.mp4".into(),
            options: ConversionOptions::default(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::Conflict(_)));

    // Calling the worker directly is refused by the catalog as well.
    assert_eq!(
        vault
            .run_assembly("S".into(), 1, "second.mp4".into(), ConversionOptions::default())
            .await,
        JobState::Failed
    );

    let mut on_disk = dir_entries(&vault.config().processed_dir);
    on_disk.sort();
    let records: Vec<String> = vault.history().await.into_iter().map(|r| r.filename).collect();
    assert_eq!(on_disk, records);
    assert_eq!(records, vec!["first_S.wav".to_string()]);
}
