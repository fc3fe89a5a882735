//! Removal of backing files that may be held open by a reader.
//!
//! `Direct(attempt)` retries a plain remove with exponential backoff while the
//! file is locked; once retries run out (or a non-lock error occurs) the file
//! is moved aside to a quarantine name and removed best-effort from there. A
//! failed quarantine rename is the only terminal failure.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{Result, VaultError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletePolicy {
    /// Direct remove attempts before falling back to quarantine.
    pub attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for DeletePolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl DeletePolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Removed,
    AlreadyAbsent,
    /// Moved aside to this path; it may still exist if the final remove failed.
    Quarantined(PathBuf),
}

enum Step {
    Direct(u32),
    Quarantine,
}

pub fn quarantine_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".deleted_{}", uuid::Uuid::new_v4().simple()));
    path.with_file_name(name)
}

pub async fn secure_delete(path: &Path, policy: &DeletePolicy) -> Result<DeleteOutcome> {
    let mut step = Step::Direct(0);
    loop {
        step = match step {
            Step::Direct(attempt) => match tokio::fs::remove_file(path).await {
                Ok(()) => return Ok(DeleteOutcome::Removed),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    return Ok(DeleteOutcome::AlreadyAbsent)
                }
                Err(e) if e.kind() == ErrorKind::PermissionDenied && attempt + 1 < policy.attempts => {
                    let delay = policy.backoff(attempt);
                    debug!(
                        path = %path.display(),
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "File locked, retrying delete"
                    );
                    tokio::time::sleep(delay).await;
                    Step::Direct(attempt + 1)
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Direct delete failed, quarantining");
                    Step::Quarantine
                }
            },
            Step::Quarantine => {
                let trash = quarantine_path(path);
                if let Err(e) = tokio::fs::rename(path, &trash).await {
                    if e.kind() == ErrorKind::NotFound {
                        return Ok(DeleteOutcome::AlreadyAbsent);
                    }
                    return Err(VaultError::io(
                        format!("failed to delete {}", path.display()),
                        e,
                    ));
                }
                if let Err(e) = tokio::fs::remove_file(&trash).await {
                    warn!(path = %trash.display(), error = %e, "Quarantined file left on disk");
                }
                return Ok(DeleteOutcome::Quarantined(trash));
            }
        };
    }
}
