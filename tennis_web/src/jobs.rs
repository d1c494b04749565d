use parking_lot::Mutex;
use serde::Serialize;
use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};
use tempfile::TempDir;
use tennis_annotator::{ProcessReport, ProcessStatus, StopReason};
use thiserror::Error;
use tokio::sync::watch;

pub const OUTPUT_FILE_NAME: &str = "processed_video.mp4";
pub const ALLOWED_EXTENSIONS: [&str; 3] = ["mp4", "avi", "mov"];
const FAILURE_MESSAGE: &str = "Processing failed. Could not generate output video.";

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Job {0} not found")]
    NotFound(String),
    #[error("Unsupported file {0:?}, expected one of: mp4, avi, mov")]
    UnsupportedFileType(String),
    #[error("Job {0} is still processing")]
    StillProcessing(String),
    #[error("Job {0} has no output video")]
    NoOutput(String),
    #[error("Failed to create job workspace: {0}")]
    Workspace(#[from] io::Error),
}

/// Returns the lowercased extension of `file_name` if uploads of that type are accepted.
pub fn accepted_extension(file_name: &str) -> Result<String, JobError> {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|extension| extension.to_str())
        .map(|extension| extension.to_ascii_lowercase());

    match extension {
        Some(extension) if ALLOWED_EXTENSIONS.contains(&extension.as_str()) => Ok(extension),
        _ => Err(JobError::UnsupportedFileType(file_name.to_string())),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Truncated,
    Failed,
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Truncated | JobStatus::Failed
        )
    }

    pub fn has_output(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Truncated)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Truncated => "truncated",
            JobStatus::Failed => "failed",
        }
    }
}

impl From<ProcessStatus> for JobStatus {
    fn from(status: ProcessStatus) -> Self {
        match status {
            ProcessStatus::Complete => JobStatus::Completed,
            ProcessStatus::Truncated => JobStatus::Truncated,
            ProcessStatus::Failed => JobStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSnapshot {
    pub id: String,
    pub status: JobStatus,
    /// Only present while the job is being processed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    pub frames_written: usize,
    pub expected_frames: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<StopReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl JobSnapshot {
    fn queued(id: &str) -> Self {
        Self {
            id: id.to_string(),
            status: JobStatus::Queued,
            progress: None,
            frames_written: 0,
            expected_frames: 0,
            stop: None,
            message: None,
        }
    }
}

pub type JobUpdates = Arc<watch::Sender<JobSnapshot>>;

/// Handles for a freshly registered job.
#[derive(Debug)]
pub struct NewJob {
    pub id: String,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub updates: JobUpdates,
}

struct Job {
    updates: JobUpdates,
    workspace: TempDir,
    input_path: PathBuf,
    output_path: PathBuf,
    finished_at: Option<Instant>,
}

impl Job {
    fn status(&self) -> JobStatus {
        self.updates.borrow().status
    }
}

fn remove_file_if_present(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!("Removed {:?}", path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove {:?}: {}", path, e),
    }
}

/// Registry of uploaded videos. Every job owns a temporary directory that is deleted
/// together with the job.
#[derive(Default)]
pub struct JobStore {
    jobs: Mutex<HashMap<String, Job>>,
    temp_root: Option<PathBuf>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates job workspaces under `temp_root` instead of the system temporary directory.
    pub fn with_temp_root(temp_root: impl Into<PathBuf>) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            temp_root: Some(temp_root.into()),
        }
    }

    pub fn create(&self, extension: &str) -> Result<NewJob, JobError> {
        let id = format!("{:032x}", rand::random::<u128>());

        let mut builder = tempfile::Builder::new();
        builder.prefix("tennis-job-");
        let workspace = match &self.temp_root {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };

        let input_path = workspace.path().join(format!("input.{}", extension));
        let output_path = workspace.path().join(OUTPUT_FILE_NAME);
        let (updates, _) = watch::channel(JobSnapshot::queued(&id));
        let updates = Arc::new(updates);

        let job = Job {
            updates: updates.clone(),
            workspace,
            input_path: input_path.clone(),
            output_path: output_path.clone(),
            finished_at: None,
        };
        self.jobs.lock().insert(id.clone(), job);
        tracing::debug!("Registered job {}", id);

        Ok(NewJob {
            id,
            input_path,
            output_path,
            updates,
        })
    }

    pub fn snapshot(&self, id: &str) -> Result<JobSnapshot, JobError> {
        let jobs = self.jobs.lock();
        let job = jobs
            .get(id)
            .ok_or_else(|| JobError::NotFound(id.to_string()))?;
        let snapshot = job.updates.borrow().clone();
        Ok(snapshot)
    }

    pub fn subscribe(&self, id: &str) -> Result<watch::Receiver<JobSnapshot>, JobError> {
        let jobs = self.jobs.lock();
        let job = jobs
            .get(id)
            .ok_or_else(|| JobError::NotFound(id.to_string()))?;
        Ok(job.updates.subscribe())
    }

    pub fn output_path(&self, id: &str) -> Result<PathBuf, JobError> {
        let jobs = self.jobs.lock();
        let job = jobs
            .get(id)
            .ok_or_else(|| JobError::NotFound(id.to_string()))?;

        let status = job.status();
        if !status.is_finished() {
            return Err(JobError::StillProcessing(id.to_string()));
        }
        if !status.has_output() {
            return Err(JobError::NoOutput(id.to_string()));
        }
        Ok(job.output_path.clone())
    }

    pub fn start(&self, id: &str) -> Result<(), JobError> {
        let jobs = self.jobs.lock();
        let job = jobs
            .get(id)
            .ok_or_else(|| JobError::NotFound(id.to_string()))?;
        job.updates.send_modify(|snapshot| {
            snapshot.status = JobStatus::Processing;
            snapshot.progress = Some(0.0);
        });
        Ok(())
    }

    /// Records the outcome of a job. The uploaded input is deleted in every case, the output
    /// only survives when the run produced one.
    pub fn finish(
        &self,
        id: &str,
        outcome: Result<ProcessReport, String>,
    ) -> Result<JobSnapshot, JobError> {
        let mut jobs = self.jobs.lock();
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| JobError::NotFound(id.to_string()))?;

        remove_file_if_present(&job.input_path);

        let (status, frames_written, expected_frames, stop, message) = match outcome {
            Ok(report) => {
                let status = JobStatus::from(report.status());
                let message = (status == JobStatus::Failed).then(|| FAILURE_MESSAGE.to_string());
                (
                    status,
                    report.frames_written,
                    report.expected_frames,
                    Some(report.stop),
                    message,
                )
            }
            Err(message) => (JobStatus::Failed, 0, 0, None, Some(message)),
        };

        if status == JobStatus::Failed {
            remove_file_if_present(&job.output_path);
        }

        job.finished_at = Some(Instant::now());
        job.updates.send_modify(|snapshot| {
            snapshot.status = status;
            snapshot.progress = None;
            snapshot.frames_written = frames_written;
            snapshot.expected_frames = expected_frames;
            snapshot.stop = stop;
            snapshot.message = message;
        });

        let snapshot = job.updates.borrow().clone();
        Ok(snapshot)
    }

    /// Deletes a finished job and everything in its workspace.
    pub fn remove(&self, id: &str) -> Result<(), JobError> {
        let job = {
            let mut jobs = self.jobs.lock();
            let status = jobs
                .get(id)
                .map(Job::status)
                .ok_or_else(|| JobError::NotFound(id.to_string()))?;
            if !status.is_finished() {
                return Err(JobError::StillProcessing(id.to_string()));
            }
            jobs.remove(id)
        };

        if let Some(job) = job {
            close_workspace(id, job);
        }
        Ok(())
    }

    /// Deletes a job that never got to run, e.g. because its upload failed.
    pub fn discard(&self, id: &str) {
        let job = self.jobs.lock().remove(id);
        if let Some(job) = job {
            close_workspace(id, job);
        }
    }

    /// Deletes finished jobs older than `ttl`, returns how many were removed.
    pub fn sweep(&self, ttl: Duration) -> usize {
        let expired: Vec<(String, Job)> = {
            let mut jobs = self.jobs.lock();
            let expired_ids: Vec<String> = jobs
                .iter()
                .filter(|(_, job)| {
                    job.finished_at
                        .is_some_and(|finished_at| finished_at.elapsed() >= ttl)
                })
                .map(|(id, _)| id.clone())
                .collect();
            expired_ids
                .into_iter()
                .filter_map(|id| jobs.remove(&id).map(|job| (id, job)))
                .collect()
        };

        let count = expired.len();
        for (id, job) in expired {
            close_workspace(&id, job);
        }
        count
    }

    /// Deletes every job, running or not.
    pub fn clear(&self) -> usize {
        let jobs: Vec<(String, Job)> = self.jobs.lock().drain().collect();
        let count = jobs.len();
        for (id, job) in jobs {
            close_workspace(&id, job);
        }
        count
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }
}

fn close_workspace(id: &str, job: Job) {
    let path = job.workspace.path().to_path_buf();
    match job.workspace.close() {
        Ok(()) => tracing::debug!("Removed workspace of job {} at {:?}", id, path),
        Err(e) => tracing::warn!("Failed to remove workspace {:?} of job {}: {}", path, id, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tennis_annotator::StopReason;

    fn report(expected_frames: usize, frames_written: usize, stop: StopReason) -> ProcessReport {
        ProcessReport {
            metadata: None,
            expected_frames,
            frames_written,
            output_exists: true,
            stop,
        }
    }

    #[test]
    fn test_accepted_extension() {
        assert_eq!(accepted_extension("rally.MP4").unwrap(), "mp4");
        assert_eq!(accepted_extension("serve.mov").unwrap(), "mov");
        assert!(matches!(
            accepted_extension("notes.txt"),
            Err(JobError::UnsupportedFileType(_))
        ));
        assert!(accepted_extension("no_extension").is_err());
    }

    #[test]
    fn test_job_lifecycle_cleans_up_files() -> Result<(), Box<dyn std::error::Error>> {
        let root = tempfile::tempdir()?;
        let store = JobStore::with_temp_root(root.path());

        let job = store.create("mp4")?;
        std::fs::write(&job.input_path, b"upload")?;
        assert_eq!(store.snapshot(&job.id)?.status, JobStatus::Queued);
        assert!(matches!(
            store.output_path(&job.id),
            Err(JobError::StillProcessing(_))
        ));

        store.start(&job.id)?;
        job.updates.send_modify(|snapshot| snapshot.progress = Some(0.5));
        assert_eq!(store.snapshot(&job.id)?.progress, Some(0.5));
        assert!(matches!(
            store.remove(&job.id),
            Err(JobError::StillProcessing(_))
        ));

        std::fs::write(&job.output_path, b"annotated")?;
        let snapshot = store.finish(&job.id, Ok(report(10, 10, StopReason::Exhausted)))?;

        assert_eq!(snapshot.status, JobStatus::Completed);
        assert_eq!(snapshot.progress, None);
        assert!(!job.input_path.exists());
        assert_eq!(store.output_path(&job.id)?, job.output_path);

        let workspace = job.output_path.parent().unwrap().to_path_buf();
        store.remove(&job.id)?;
        assert!(!workspace.exists());
        assert!(matches!(store.snapshot(&job.id), Err(JobError::NotFound(_))));

        Ok(())
    }

    #[test]
    fn test_failed_job_removes_output() -> Result<(), Box<dyn std::error::Error>> {
        let root = tempfile::tempdir()?;
        let store = JobStore::with_temp_root(root.path());
        let job = store.create("avi")?;
        std::fs::write(&job.input_path, b"upload")?;

        store.start(&job.id)?;
        let snapshot = store.finish(&job.id, Err("Failed to load model: corrupt".to_string()))?;

        assert_eq!(snapshot.status, JobStatus::Failed);
        assert_eq!(snapshot.message.as_deref(), Some("Failed to load model: corrupt"));
        assert!(!job.input_path.exists());
        assert!(matches!(store.output_path(&job.id), Err(JobError::NoOutput(_))));

        Ok(())
    }

    #[test]
    fn test_truncated_report() -> Result<(), Box<dyn std::error::Error>> {
        let root = tempfile::tempdir()?;
        let store = JobStore::with_temp_root(root.path());
        let job = store.create("mp4")?;

        let snapshot = store.finish(
            &job.id,
            Ok(report(10, 4, StopReason::ReadFailed { index: 4 })),
        )?;

        assert_eq!(snapshot.status, JobStatus::Truncated);
        assert_eq!(snapshot.frames_written, 4);
        assert_eq!(snapshot.expected_frames, 10);
        assert_eq!(snapshot.stop, Some(StopReason::ReadFailed { index: 4 }));

        Ok(())
    }

    #[test]
    fn test_sweep_only_removes_expired_finished_jobs() -> Result<(), Box<dyn std::error::Error>> {
        let root = tempfile::tempdir()?;
        let store = JobStore::with_temp_root(root.path());
        let finished = store.create("mp4")?;
        let running = store.create("mp4")?;
        store.start(&running.id)?;
        store.finish(&finished.id, Err("boom".to_string()))?;

        assert_eq!(store.sweep(Duration::from_secs(3600)), 0);
        assert_eq!(store.sweep(Duration::ZERO), 1);
        assert_eq!(store.len(), 1);
        assert!(store.snapshot(&running.id).is_ok());

        Ok(())
    }

    #[test]
    fn test_discard_removes_unstarted_job() -> Result<(), Box<dyn std::error::Error>> {
        let root = tempfile::tempdir()?;
        let store = JobStore::with_temp_root(root.path());
        let job = store.create("mov")?;

        store.discard(&job.id);

        assert!(store.is_empty());
        assert!(!job.input_path.parent().unwrap().exists());
        Ok(())
    }
}
