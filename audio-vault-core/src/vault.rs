use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::assembler::{safe_file_name, Assembler};
use crate::catalog::{Catalog, CatalogRecord};
use crate::chunks::{validate_session_id, ChunkStore};
use crate::config::VaultConfig;
use crate::deletion::{secure_delete, DeleteOutcome};
use crate::error::{Result, VaultError};
use crate::jobs::{Job, JobRegistry, JobState};
use crate::options::ConversionOptions;
use crate::pipeline::{ConversionOutcome, ConversionPipeline};
use crate::rename::RenameService;
use crate::streaming::{AudioStream, StreamingGateway};
use crate::transcoder::{FfmpegTranscoder, Transcoder};

/// Body of an assembly request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssembleRequest {
    pub file_id: String,
    pub total_chunks: u32,
    pub filename: String,
    #[serde(default)]
    pub options: ConversionOptions,
}

/// Owns every storage component; cheap to clone into request handlers and tasks.
#[derive(Clone)]
pub struct AudioVault {
    config: Arc<VaultConfig>,
    chunks: ChunkStore,
    assembler: Assembler,
    catalog: Arc<Catalog>,
    pipeline: ConversionPipeline,
    renamer: RenameService,
    streaming: StreamingGateway,
    jobs: JobRegistry,
}

impl AudioVault {
    /// Vault backed by ffmpeg / ffprobe as configured.
    pub async fn open(config: VaultConfig) -> Result<Self> {
        let transcoder = Arc::new(FfmpegTranscoder::new(
            config.ffmpeg_bin.clone(),
            config.ffprobe_bin.clone(),
            config.tool_timeout,
        ));
        Self::with_transcoder(config, transcoder).await
    }

    pub async fn with_transcoder(
        config: VaultConfig,
        transcoder: Arc<dyn Transcoder>,
    ) -> Result<Self> {
        config.ensure_dirs().await?;

        let catalog = Arc::new(Catalog::open(config.catalog_path.clone()).await?);
        let chunks = ChunkStore::new(config.uploads_dir.clone());
        let assembler = Assembler::new(chunks.clone());
        let pipeline =
            ConversionPipeline::new(catalog.clone(), transcoder, config.processed_dir.clone());
        let renamer = RenameService::new(catalog.clone(), config.processed_dir.clone());
        let streaming = StreamingGateway::new(config.processed_dir.clone());
        let jobs = JobRegistry::with_limits(config.job_retention, config.max_finished_jobs);

        Ok(Self {
            config: Arc::new(config),
            chunks,
            assembler,
            catalog,
            pipeline,
            renamer,
            streaming,
            jobs,
        })
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn jobs(&self) -> &JobRegistry {
        &self.jobs
    }

    pub async fn put_chunk(&self, session_id: &str, index: u32, bytes: &[u8]) -> Result<()> {
        self.chunks.put_chunk(session_id, index, bytes).await
    }

    pub async fn list_chunks(&self, session_id: &str) -> BTreeSet<u32> {
        self.chunks.list_chunks(session_id).await
    }

    /// Validate and queue a background assembly + conversion. Returns immediately.
    pub async fn schedule_assembly(&self, request: AssembleRequest) -> Result<Job> {
        validate_session_id(&request.file_id)?;
        if request.total_chunks == 0 {
            return Err(VaultError::Validation(
                "total_chunks must be at least 1".to_string(),
            ));
        }
        let filename = safe_file_name(&request.filename)?;

        if self.catalog.find(&request.file_id).await.is_some() {
            return Err(VaultError::Conflict(format!(
                "upload '{}' was already converted; delete it before reusing the id",
                request.file_id
            )));
        }

        let job = self.jobs.register(&request.file_id, &filename).await?;
        info!(
            file_id = %request.file_id,
            total_chunks = request.total_chunks,
            filename = %filename,
            "Scheduled assembly"
        );

        let vault = self.clone();
        tokio::spawn(async move { vault.supervise(request, filename).await });

        Ok(job)
    }

    /// Run the assembly in its own task so a panic still ends the job as failed.
    async fn supervise(self, request: AssembleRequest, filename: String) {
        let file_id = request.file_id.clone();
        let worker = self.clone();
        let task_filename = filename.clone();
        let handle = tokio::spawn(async move {
            worker
                .run_assembly(request.file_id, request.total_chunks, task_filename, request.options)
                .await
        });

        if let Err(e) = handle.await {
            error!(file_id = %file_id, error = %e, "Assembly task aborted");
            let leftover = self.assembler.output_path(&file_id, &filename);
            if let Err(rm) = tokio::fs::remove_file(&leftover).await {
                if rm.kind() != std::io::ErrorKind::NotFound {
                    warn!(file_id = %file_id, error = %rm, "Failed to remove assembled input");
                }
            }
            self.chunks.remove_session(&file_id).await;
            self.jobs
                .mark_failed(&file_id, format!("assembly task aborted: {e}"))
                .await;
        }
    }

    /// Body of the background task; the outcome is only visible through the job table.
    pub async fn run_assembly(
        &self,
        file_id: String,
        total_chunks: u32,
        filename: String,
        options: ConversionOptions,
    ) -> JobState {
        self.jobs.mark_running(&file_id).await;

        let assembled = match self
            .assembler
            .assemble(&file_id, total_chunks, &filename)
            .await
        {
            Ok(path) => path,
            Err(e) => {
                error!(file_id = %file_id, error = %e, "Assembly error");
                self.jobs.mark_failed(&file_id, e.to_string()).await;
                return JobState::Failed;
            }
        };

        match self
            .pipeline
            .process(&assembled, &filename, &options, &file_id)
            .await
        {
            ConversionOutcome::Converted(record) => {
                self.jobs.mark_succeeded(&file_id, &record.filename).await;
                JobState::Succeeded
            }
            ConversionOutcome::NoAudio => {
                self.jobs.mark_dropped(&file_id).await;
                JobState::DroppedNoAudio
            }
            ConversionOutcome::Failed(reason) => {
                self.jobs.mark_failed(&file_id, reason).await;
                JobState::Failed
            }
        }
    }

    /// Job status, falling back to the catalog for work finished before a restart.
    pub async fn job_status(&self, id: &str) -> Option<Job> {
        if let Some(job) = self.jobs.get(id).await {
            return Some(job);
        }
        self.catalog.find(id).await.map(|record| Job {
            id: record.id,
            state: JobState::Succeeded,
            filename: record.original_name,
            detail: Some(record.filename),
            updated_at: record.date,
        })
    }

    pub async fn history(&self) -> Vec<CatalogRecord> {
        self.catalog.load_all().await
    }

    pub async fn rename(&self, id: &str, new_name: &str) -> Result<CatalogRecord> {
        self.renamer.rename(id, new_name).await
    }

    /// Delete a record and its backing file. The record survives if the file cannot be removed.
    pub async fn remove(&self, id: &str) -> Result<Vec<CatalogRecord>> {
        let id = id.trim();
        let writer = self.catalog.writer().await;
        let mut records = writer.load().await;
        let position = records
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| VaultError::NotFound(format!("no catalog record with id '{id}'")))?;

        let path = self.config.processed_dir.join(&records[position].filename);
        match secure_delete(&path, &self.config.delete_policy).await? {
            DeleteOutcome::Removed => {}
            DeleteOutcome::AlreadyAbsent => {
                warn!(file_id = %id, path = %path.display(), "Backing file was already gone")
            }
            DeleteOutcome::Quarantined(trash) => {
                warn!(file_id = %id, trash = %trash.display(), "Backing file removed via quarantine")
            }
        }

        records.remove(position);
        writer.commit(&records).await?;
        info!(file_id = %id, remaining = records.len(), "Deleted file");
        Ok(records)
    }

    pub async fn stream(&self, filename: &str, range_header: Option<&str>) -> Result<AudioStream> {
        self.streaming.open(filename, range_header).await
    }
}
