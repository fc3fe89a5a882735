use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tracing::{error, info, warn};

use crate::catalog::{Catalog, CatalogRecord};
use crate::error::{Result, VaultError};
use crate::options::ConversionOptions;
use crate::transcoder::Transcoder;

pub const OUTPUT_EXTENSION: &str = "wav";

/// Terminal result of one conversion attempt.
#[derive(Debug, Clone)]
pub enum ConversionOutcome {
    Converted(CatalogRecord),
    /// The input had no audio stream; dropped without a catalog entry.
    NoAudio,
    Failed(String),
}

/// Upper bound on `-N` suffixes tried when the preferred output name is taken.
const MAX_NAME_SUFFIX: u32 = 1000;

/// Output stem for a conversion: original stem plus the record id.
fn output_stem(original_filename: &str, record_id: &str) -> String {
    let stem = Path::new(original_filename)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "audio".to_string());
    format!("{stem}_{record_id}")
}

/// Preferred output name for a conversion.
pub fn output_file_name(original_filename: &str, record_id: &str) -> String {
    format!("{}.{OUTPUT_EXTENSION}", output_stem(original_filename, record_id))
}

#[derive(Clone)]
pub struct ConversionPipeline {
    catalog: Arc<Catalog>,
    transcoder: Arc<dyn Transcoder>,
    processed_dir: PathBuf,
}

impl ConversionPipeline {
    pub fn new(
        catalog: Arc<Catalog>,
        transcoder: Arc<dyn Transcoder>,
        processed_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            catalog,
            transcoder,
            processed_dir: processed_dir.into(),
        }
    }

    /// Convert `input` and record the result. `input` is removed on every path.
    pub async fn process(
        &self,
        input: &Path,
        display_name: &str,
        options: &ConversionOptions,
        record_id: &str,
    ) -> ConversionOutcome {
        info!(file_id = %record_id, name = %display_name, "Start conversion");

        let outcome = match self.convert(input, display_name, options, record_id).await {
            Ok(Some(record)) => ConversionOutcome::Converted(record),
            Ok(None) => {
                info!(file_id = %record_id, "No audio stream found, dropping upload");
                ConversionOutcome::NoAudio
            }
            Err(e) => {
                error!(file_id = %record_id, error = %e, "Conversion failed");
                ConversionOutcome::Failed(e.to_string())
            }
        };

        if let Err(e) = fs::remove_file(input).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(file_id = %record_id, input = %input.display(), error = %e, "Failed to remove conversion input");
            }
        }

        outcome
    }

    async fn convert(
        &self,
        input: &Path,
        display_name: &str,
        options: &ConversionOptions,
        record_id: &str,
    ) -> Result<Option<CatalogRecord>> {
        if !self.transcoder.has_audio(input).await? {
            return Ok(None);
        }

        // Extract under a private name; the final name is claimed under the catalog lock.
        let params = options.extraction_params();
        let staging = self.processed_dir.join(format!(
            ".{}.partial.{OUTPUT_EXTENSION}",
            uuid::Uuid::new_v4().simple()
        ));

        let result = match self.transcoder.extract(input, &params, &staging).await {
            Ok(()) => self.publish(&staging, display_name, options, record_id).await,
            Err(e) => Err(e),
        };

        if result.is_err() {
            let _ = fs::remove_file(&staging).await;
        }
        result.map(Some)
    }

    /// Move a finished extraction to a unique name and record it, as one catalog write.
    async fn publish(
        &self,
        staging: &Path,
        display_name: &str,
        options: &ConversionOptions,
        record_id: &str,
    ) -> Result<CatalogRecord> {
        let size = match fs::metadata(staging).await {
            Ok(meta) => meta.len(),
            Err(e) => {
                return Err(VaultError::Tool(format!(
                    "extraction reported success but its output is unreadable: {e}"
                )))
            }
        };

        let writer = self.catalog.writer().await;
        let mut records = writer.load().await;

        if records.iter().any(|r| r.id == record_id) {
            return Err(VaultError::Conflict(format!(
                "a catalog record with id '{record_id}' already exists"
            )));
        }

        let filename = self
            .claim_name(&output_stem(display_name, record_id), &records)
            .await?;
        let output = self.processed_dir.join(&filename);
        fs::rename(staging, &output)
            .await
            .map_err(|e| VaultError::io(format!("failed to move output to {filename}"), e))?;

        let record = CatalogRecord {
            id: record_id.to_string(),
            original_name: display_name.to_string(),
            filename,
            size,
            date: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            options: options.clone(),
        };
        records.insert(0, record.clone());

        if let Err(e) = writer.commit(&records).await {
            // No output without a record.
            let _ = fs::remove_file(&output).await;
            return Err(e);
        }

        info!(
            file_id = %record_id,
            filename = %record.filename,
            size = record.size,
            "Conversion recorded in catalog"
        );
        Ok(record)
    }

    /// First of `stem.wav`, `stem-1.wav`, ... owned by no record and absent on disk.
    async fn claim_name(&self, stem: &str, records: &[CatalogRecord]) -> Result<String> {
        for n in 0..=MAX_NAME_SUFFIX {
            let candidate = if n == 0 {
                format!("{stem}.{OUTPUT_EXTENSION}")
            } else {
                format!("{stem}-{n}.{OUTPUT_EXTENSION}")
            };
            if records.iter().any(|r| r.filename == candidate) {
                continue;
            }
            if fs::try_exists(self.processed_dir.join(&candidate))
                .await
                .unwrap_or(true)
            {
                continue;
            }
            if n > 0 {
                warn!(preferred = %stem, chosen = %candidate, "Output name taken, using suffixed name");
            }
            return Ok(candidate);
        }
        Err(VaultError::Conflict(format!(
            "no free output name for '{stem}'"
        )))
    }
}
