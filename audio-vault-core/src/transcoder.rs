use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::error::{Result, VaultError};
use crate::options::ExtractionParams;

/// Boundary around the external audio probing / extraction tool.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Whether `input` carries at least one audio stream.
    async fn has_audio(&self, input: &Path) -> Result<bool>;

    /// Extract the audio of `input` into `output` using `params`.
    async fn extract(&self, input: &Path, params: &ExtractionParams, output: &Path) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    ffmpeg_bin: String,
    ffprobe_bin: String,
    timeout: Duration,
}

#[derive(Debug)]
struct CmdOutput {
    stdout: String,
    stderr: String,
    exit_code: Option<i32>,
    success: bool,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg_bin: impl Into<String>, ffprobe_bin: impl Into<String>, timeout: Duration) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.into(),
            ffprobe_bin: ffprobe_bin.into(),
            timeout,
        }
    }

    async fn run(&self, program: &str, args: &[String]) -> Result<CmdOutput> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(program = %program, args = ?args, "Running external tool");

        let out = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(out)) => out,
            Ok(Err(e)) => {
                error!(program = %program, error = %e, "Failed to spawn external tool");
                return Err(VaultError::Tool(format!("failed to run {program}: {e}")));
            }
            Err(_) => {
                return Err(VaultError::Tool(format!(
                    "{program} timed out after {}s",
                    self.timeout.as_secs()
                )));
            }
        };

        Ok(CmdOutput {
            stdout: String::from_utf8_lossy(&out.stdout).to_string(),
            stderr: String::from_utf8_lossy(&out.stderr).to_string(),
            exit_code: out.status.code(),
            success: out.status.success(),
        })
    }
}

pub fn probe_args(input: &Path) -> Vec<String> {
    vec![
        "-v".into(),
        "error".into(),
        "-select_streams".into(),
        "a".into(),
        "-show_entries".into(),
        "stream=index".into(),
        "-of".into(),
        "csv=p=0".into(),
        input.to_string_lossy().to_string(),
    ]
}

pub fn extract_args(input: &Path, params: &ExtractionParams, output: &Path) -> Vec<String> {
    vec![
        "-y".into(),
        "-i".into(),
        input.to_string_lossy().to_string(),
        "-vn".into(),
        "-acodec".into(),
        params.codec.to_string(),
        "-ar".into(),
        params.sample_rate.to_string(),
        "-ac".into(),
        params.channels.to_string(),
        "-b:a".into(),
        format!("{}k", params.bitrate_kbps),
        output.to_string_lossy().to_string(),
    ]
}

/// Keep only the tail of a tool's stderr for log lines and job details.
fn stderr_tail(stderr: &str) -> String {
    const MAX: usize = 512;
    let trimmed = stderr.trim();
    let count = trimmed.chars().count();
    if count <= MAX {
        return trimmed.to_string();
    }
    trimmed.chars().skip(count - MAX).collect()
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn has_audio(&self, input: &Path) -> Result<bool> {
        let out = self.run(&self.ffprobe_bin, &probe_args(input)).await?;
        if !out.success {
            return Err(VaultError::Tool(format!(
                "ffprobe exited with {:?}: {}",
                out.exit_code,
                stderr_tail(&out.stderr)
            )));
        }
        Ok(!out.stdout.trim().is_empty())
    }

    async fn extract(&self, input: &Path, params: &ExtractionParams, output: &Path) -> Result<()> {
        let out = self
            .run(&self.ffmpeg_bin, &extract_args(input, params, output))
            .await?;
        if !out.success {
            return Err(VaultError::Tool(format!(
                "ffmpeg exited with {:?}: {}",
                out.exit_code,
                stderr_tail(&out.stderr)
            )));
        }
        info!(
            input = %input.display(),
            output = %output.display(),
            channels = params.channels,
            codec = params.codec,
            "Audio extraction finished"
        );
        Ok(())
    }
}
