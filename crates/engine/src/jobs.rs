//! Job model and the consumer-side job board.
//!
//! A [`Job`] is one submitted URL moving through the pipeline. The
//! [`JobBoard`] owns the active job set and is only ever mutated by the
//! single consumer thread, which applies [`JobUpdate`]s drained from the
//! update channel.

use crate::updates::JobUpdate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Title shown until metadata arrives
pub const PLACEHOLDER_TITLE: &str = "Fetching info...";

/// Status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job is waiting for a queue run.
    Pending,
    /// Media is being fetched by the extractor.
    Downloading,
    /// The downloaded file is being re-encoded.
    Encoding,
    /// Job completed successfully.
    Finished,
    /// Job failed with an error.
    Failed,
}

impl Default for JobStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Downloading => write!(f, "downloading"),
            JobStatus::Encoding => write!(f, "encoding"),
            JobStatus::Finished => write!(f, "finished"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

impl JobStatus {
    /// Check if the status is terminal (finished or failed).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Failed)
    }

    /// Check if the status is a working phase that reports progress.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Downloading | JobStatus::Encoding)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// `pending -> downloading -> (encoding) -> finished`, with `failed`
    /// reachable from every non-terminal state. Staying put is not a transition.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Downloading)
                | (Downloading, Encoding)
                | (Downloading, Finished)
                | (Encoding, Finished)
                | (Pending, Failed)
                | (Downloading, Failed)
                | (Encoding, Failed)
        )
    }
}

/// One submitted URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Identity of the job within the active set.
    pub url: String,
    /// Display label; placeholder until metadata arrives.
    pub title: String,
    pub status: JobStatus,
    /// Percentage of the current phase, meaningful while downloading or encoding.
    pub progress: f64,
    pub thumbnail: Option<String>,
    /// Platform identifier, used to name temporary files.
    pub external_id: Option<String>,
    /// Last failure message, if any.
    pub error: Option<String>,
    /// Set once the metadata fetch has reported, successfully or not.
    pub metadata_ready: bool,
}

impl Job {
    /// Create a new pending job for `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: PLACEHOLDER_TITLE.to_string(),
            status: JobStatus::Pending,
            progress: 0.0,
            thumbnail: None,
            external_id: None,
            error: None,
            metadata_ready: false,
        }
    }

    /// Snapshot handed to the queue worker.
    pub fn to_queued(&self) -> QueuedJob {
        QueuedJob {
            url: self.url.clone(),
            title: self.title.clone(),
            external_id: self.external_id.clone(),
        }
    }
}

/// Immutable view of a job as the queue worker sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedJob {
    pub url: String,
    pub title: String,
    pub external_id: Option<String>,
}

/// Reasons a submission is refused.
#[derive(Debug, Error, PartialEq)]
pub enum SubmitError {
    #[error("URL is empty")]
    Empty,

    #[error("URL is already in the queue: {0}")]
    Duplicate(String),
}

/// Number of jobs in each status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobCounts {
    pub pending: usize,
    pub downloading: usize,
    pub encoding: usize,
    pub finished: usize,
    pub failed: usize,
}

/// The active job set, keyed by URL and kept in submission order.
#[derive(Debug, Default)]
pub struct JobBoard {
    jobs: Vec<Job>,
    total_progress: f64,
}

impl JobBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a job for `url`, rejecting empty and already tracked URLs.
    pub fn submit(&mut self, url: &str) -> Result<&Job, SubmitError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(SubmitError::Empty);
        }
        if self.contains(url) {
            return Err(SubmitError::Duplicate(url.to_string()));
        }
        self.jobs.push(Job::new(url));
        Ok(&self.jobs[self.jobs.len() - 1])
    }

    pub fn contains(&self, url: &str) -> bool {
        self.jobs.iter().any(|job| job.url == url)
    }

    pub fn get(&self, url: &str) -> Option<&Job> {
        self.jobs.iter().find(|job| job.url == url)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Aggregate progress of the current or last run.
    pub fn total_progress(&self) -> f64 {
        self.total_progress
    }

    /// Reset the aggregate progress for a new run.
    pub fn begin_run(&mut self) {
        self.total_progress = 0.0;
    }

    /// Snapshot of every pending job, in submission order.
    pub fn pending_jobs(&self) -> Vec<QueuedJob> {
        self.jobs
            .iter()
            .filter(|job| job.status == JobStatus::Pending)
            .map(Job::to_queued)
            .collect()
    }

    /// Number of jobs still waiting on their metadata fetch.
    pub fn awaiting_metadata(&self) -> usize {
        self.jobs.iter().filter(|job| !job.metadata_ready).count()
    }

    pub fn counts(&self) -> JobCounts {
        let mut counts = JobCounts::default();
        for job in &self.jobs {
            match job.status {
                JobStatus::Pending => counts.pending += 1,
                JobStatus::Downloading => counts.downloading += 1,
                JobStatus::Encoding => counts.encoding += 1,
                JobStatus::Finished => counts.finished += 1,
                JobStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// Remove finished jobs and reset the aggregate progress.
    ///
    /// Returns the number of jobs removed. Failed jobs stay visible.
    pub fn clear_finished(&mut self) -> usize {
        let before = self.jobs.len();
        self.jobs.retain(|job| job.status != JobStatus::Finished);
        self.total_progress = 0.0;
        before - self.jobs.len()
    }

    /// Apply one update field by field.
    ///
    /// Unknown URLs are ignored. Status changes that the state machine does
    /// not allow are dropped, and progress never moves backwards within a
    /// phase. Returns true if anything changed.
    pub fn apply(&mut self, update: &JobUpdate) -> bool {
        let mut changed = false;

        if let Some(total) = update.total_progress {
            self.total_progress = total.clamp(0.0, 100.0);
            changed = true;
        }

        let Some(url) = update.url.as_deref() else {
            return changed;
        };
        let Some(job) = self.jobs.iter_mut().find(|job| job.url == url) else {
            tracing::debug!(url, "update for unknown job ignored");
            return changed;
        };

        if let Some(title) = &update.title {
            job.title = title.clone();
            job.metadata_ready = true;
            changed = true;
        }

        if let Some(thumbnail) = &update.thumbnail {
            job.thumbnail = Some(thumbnail.clone());
            changed = true;
        }

        if let Some(id) = &update.external_id {
            job.external_id = Some(id.clone());
            changed = true;
        }

        if let Some(error) = &update.error {
            job.error = Some(error.clone());
            changed = true;
        }

        if let Some(status) = update.status {
            if status != job.status {
                if job.status.can_transition_to(status) {
                    job.status = status;
                    job.progress = 0.0;
                    changed = true;
                } else {
                    tracing::debug!(url, from = %job.status, to = %status, "illegal status change ignored");
                }
            }
        }

        if let Some(progress) = update.progress {
            let progress = progress.clamp(0.0, 100.0);
            if progress > job.progress {
                job.progress = progress;
                changed = true;
            }
        }

        changed
    }
}
