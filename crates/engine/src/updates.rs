//! Update channel between background workers and the presentation consumer
//!
//! Workers never touch job state directly. They post partial [`JobUpdate`]
//! records, keyed by job URL, and the single consumer applies them to its
//! [`JobBoard`](crate::jobs::JobBoard) after draining the channel.

use crate::jobs::JobStatus;
use tokio::sync::mpsc::{self, error::TryRecvError};

/// A partial update for one job, or a run-level signal
///
/// Any subset of fields may be present; absent fields leave the
/// corresponding job attribute untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    /// Job the update refers to (None for run-level signals)
    pub url: Option<String>,
    pub title: Option<String>,
    pub status: Option<JobStatus>,
    /// Percentage in [0, 100] for the current phase
    pub progress: Option<f64>,
    pub thumbnail: Option<String>,
    /// Platform identifier or URL-derived fallback
    pub external_id: Option<String>,
    /// Aggregate run progress, resolved jobs / total jobs * 100
    pub total_progress: Option<f64>,
    /// User-facing failure message
    pub error: Option<String>,
    /// Terminal signal for a queue run, posted exactly once per run
    pub all_complete: bool,
    /// Set together with `all_complete` when the run was cut short
    pub aborted: bool,
}

impl JobUpdate {
    /// Start an update for the job identified by `url`
    pub fn for_job(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Terminal signal for a run that processed every job
    pub fn all_complete() -> Self {
        Self {
            all_complete: true,
            ..Self::default()
        }
    }

    /// Terminal signal for a run that stopped before its last job
    pub fn run_aborted(message: impl Into<String>) -> Self {
        Self {
            all_complete: true,
            aborted: true,
            error: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn progress(mut self, percent: f64) -> Self {
        self.progress = Some(percent);
        self
    }

    pub fn thumbnail(mut self, thumbnail: Option<String>) -> Self {
        self.thumbnail = thumbnail;
        self
    }

    pub fn external_id(mut self, id: impl Into<String>) -> Self {
        self.external_id = Some(id.into());
        self
    }

    pub fn total_progress(mut self, percent: f64) -> Self {
        self.total_progress = Some(percent);
        self
    }

    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.error = Some(message.into());
        self
    }
}

/// Producer half of the update channel; cheap to clone, one per worker
#[derive(Debug, Clone)]
pub struct UpdateSender {
    tx: mpsc::UnboundedSender<JobUpdate>,
}

impl UpdateSender {
    /// Post an update. Never blocks; a closed consumer drops the update.
    pub fn send(&self, update: JobUpdate) {
        if self.tx.send(update).is_err() {
            tracing::debug!("update channel closed, dropping update");
        }
    }
}

/// Consumer half of the update channel
#[derive(Debug)]
pub struct UpdateReceiver {
    rx: mpsc::UnboundedReceiver<JobUpdate>,
}

impl UpdateReceiver {
    /// Take every update currently queued, in posting order, without waiting
    pub fn drain(&mut self) -> Vec<JobUpdate> {
        let mut updates = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(update) => updates.push(update),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        updates
    }
}

/// Create a new unbounded update channel
pub fn update_channel() -> (UpdateSender, UpdateReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (UpdateSender { tx }, UpdateReceiver { rx })
}
