use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{Result, VaultError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
    DroppedNoAudio,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::DroppedNoAudio
        )
    }
}

/// Lifecycle of one assembly + conversion submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub state: JobState,
    /// Original upload filename.
    pub filename: String,
    /// Output filename on success, failure reason otherwise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub updated_at: String,
}

pub const DEFAULT_JOB_RETENTION: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_MAX_FINISHED_JOBS: usize = 1024;

#[derive(Debug, Clone)]
struct Entry {
    job: Job,
    touched: Instant,
}

/// In-memory job table keyed by the upload session id.
///
/// Finished jobs are evicted once older than the retention window, and the
/// oldest go first when more than `max_finished` are held. Active jobs are
/// never evicted.
#[derive(Debug, Clone)]
pub struct JobRegistry {
    jobs: Arc<RwLock<HashMap<String, Entry>>>,
    retention: Duration,
    max_finished: usize,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::with_limits(DEFAULT_JOB_RETENTION, DEFAULT_MAX_FINISHED_JOBS)
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(retention: Duration, max_finished: usize) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            retention,
            max_finished,
        }
    }

    /// Queue a job. Re-submitting an id is allowed only once its previous run finished.
    pub async fn register(&self, id: &str, filename: &str) -> Result<Job> {
        let mut jobs = self.jobs.write().await;
        if let Some(existing) = jobs.get(id) {
            if !existing.job.state.is_terminal() {
                return Err(VaultError::Conflict(format!(
                    "upload '{id}' is already being processed"
                )));
            }
        }
        let job = Job {
            id: id.to_string(),
            state: JobState::Queued,
            filename: filename.to_string(),
            detail: None,
            updated_at: chrono::Utc::now().to_rfc3339(),
        };
        jobs.insert(
            id.to_string(),
            Entry {
                job: job.clone(),
                touched: Instant::now(),
            },
        );
        self.evict_finished(&mut jobs);
        Ok(job)
    }

    pub async fn get(&self, id: &str) -> Option<Job> {
        self.jobs.read().await.get(id).map(|e| e.job.clone())
    }

    pub async fn mark_running(&self, id: &str) {
        self.transition(id, JobState::Running, None).await;
    }

    pub async fn mark_succeeded(&self, id: &str, output_filename: &str) {
        self.transition(id, JobState::Succeeded, Some(output_filename.to_string()))
            .await;
    }

    pub async fn mark_failed(&self, id: &str, reason: impl Into<String>) {
        self.transition(id, JobState::Failed, Some(reason.into())).await;
    }

    pub async fn mark_dropped(&self, id: &str) {
        self.transition(
            id,
            JobState::DroppedNoAudio,
            Some("input has no audio stream".to_string()),
        )
        .await;
    }

    async fn transition(&self, id: &str, state: JobState, detail: Option<String>) {
        let mut jobs = self.jobs.write().await;
        if let Some(entry) = jobs.get_mut(id) {
            entry.job.state = state;
            entry.job.detail = detail;
            entry.job.updated_at = chrono::Utc::now().to_rfc3339();
            entry.touched = Instant::now();
        }
        if state.is_terminal() {
            self.evict_finished(&mut jobs);
        }
    }

    fn evict_finished(&self, jobs: &mut HashMap<String, Entry>) {
        let now = Instant::now();
        let before = jobs.len();
        jobs.retain(|_, e| {
            !e.job.state.is_terminal() || now.duration_since(e.touched) < self.retention
        });

        let mut finished: Vec<(Instant, String)> = jobs
            .iter()
            .filter(|(_, e)| e.job.state.is_terminal())
            .map(|(id, e)| (e.touched, id.clone()))
            .collect();
        if finished.len() > self.max_finished {
            finished.sort();
            let excess = finished.len() - self.max_finished;
            for (_, id) in finished.into_iter().take(excess) {
                jobs.remove(&id);
            }
        }

        let evicted = before - jobs.len();
        if evicted > 0 {
            debug!(evicted, remaining = jobs.len(), "Evicted finished jobs");
        }
    }
}
