//! Presentation-facing session
//!
//! A [`Session`] owns the job board and the consumer end of the update
//! channel. Front-ends submit URLs, start runs and call [`Session::pump`] on
//! a fixed tick; workers only ever talk back through the channel.
//!
//! Methods that spawn work must be called from within a tokio runtime.

use crate::config::FormatMode;
use crate::context::EngineContext;
use crate::format;
use crate::jobs::{JobBoard, SubmitError};
use crate::metadata;
use crate::queue::{process_queue, QueueSummary, RunPlan, ToolRunner};
use crate::updates::{update_channel, JobUpdate, UpdateReceiver, UpdateSender};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;

/// Reasons a run cannot start
#[derive(Debug, Error, PartialEq)]
pub enum StartError {
    #[error("a run is already in progress")]
    AlreadyRunning,

    #[error("no pending jobs to process")]
    NothingPending,

    #[error("still fetching metadata for {0} job(s)")]
    AwaitingMetadata(usize),
}

/// How the most recent run ended
#[derive(Debug, Clone, PartialEq)]
pub enum RunEnd {
    Completed,
    Aborted(String),
}

pub struct Session {
    ctx: Arc<EngineContext>,
    board: JobBoard,
    tx: UpdateSender,
    rx: UpdateReceiver,
    worker: Option<JoinHandle<QueueSummary>>,
    last_run: Option<RunEnd>,
}

impl Session {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        let (tx, rx) = update_channel();
        Self {
            ctx,
            board: JobBoard::new(),
            tx,
            rx,
            worker: None,
            last_run: None,
        }
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    pub fn board(&self) -> &JobBoard {
        &self.board
    }

    /// Track `url` and fetch its metadata in the background
    pub fn submit(&mut self, url: &str) -> Result<(), SubmitError> {
        let url = self.board.submit(url)?.url.clone();
        tracing::info!(url = %url, "job submitted");

        let ctx = Arc::clone(&self.ctx);
        let tx = self.tx.clone();
        tokio::task::spawn_blocking(move || metadata::fetch(&ctx, &url, &tx));
        Ok(())
    }

    /// Start a queue run over every pending job
    ///
    /// Refused while any metadata fetch is outstanding, so every job enters
    /// the run with its real title and id. Returns the number of jobs in the
    /// run.
    pub fn start(
        &mut self,
        mode: FormatMode,
        resolution: &str,
        output_dir: PathBuf,
    ) -> Result<usize, StartError> {
        if self.is_running() {
            return Err(StartError::AlreadyRunning);
        }
        let awaiting = self.board.awaiting_metadata();
        if awaiting > 0 {
            return Err(StartError::AwaitingMetadata(awaiting));
        }
        let jobs = self.board.pending_jobs();
        if jobs.is_empty() {
            return Err(StartError::NothingPending);
        }

        let plan = RunPlan {
            mode,
            format_expression: format::resolve(resolution),
            output_dir,
        };
        let count = jobs.len();
        let budget = self.ctx.config.retry_budget();
        let runner = ToolRunner::new(Arc::clone(&self.ctx));
        let tx = self.tx.clone();

        tracing::info!(count, %mode, resolution, "starting queue run");
        self.last_run = None;
        self.board.begin_run();
        self.worker = Some(tokio::task::spawn_blocking(move || {
            process_queue(&runner, &jobs, &plan, budget, &tx)
        }));
        Ok(count)
    }

    /// Drain the update channel and apply everything to the board
    ///
    /// Returns the drained updates in posting order for display.
    pub fn pump(&mut self) -> Vec<JobUpdate> {
        // Checked before draining so a finished worker's last events are included
        let worker_done = self.worker.as_ref().is_some_and(|w| w.is_finished());
        let updates = self.rx.drain();
        for update in &updates {
            self.board.apply(update);
            if update.all_complete {
                self.worker = None;
                self.last_run = Some(if update.aborted {
                    RunEnd::Aborted(update.error.clone().unwrap_or_default())
                } else {
                    RunEnd::Completed
                });
            }
        }

        if worker_done && self.worker.is_some() {
            tracing::warn!("queue worker stopped without a completion signal");
            self.worker = None;
        }
        updates
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// How the last run ended, if one has ended since the last start
    pub fn last_run(&self) -> Option<&RunEnd> {
        self.last_run.as_ref()
    }

    pub fn awaiting_metadata(&self) -> usize {
        self.board.awaiting_metadata()
    }

    pub fn clear_finished(&mut self) -> usize {
        self.board.clear_finished()
    }
}
