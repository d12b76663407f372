//! Job queue processor
//!
//! Runs a snapshot of pending jobs strictly in order on one worker thread.
//! Each job gets a bounded number of attempts; a resource lock (browser
//! cookie store held by another process) stops the run instead of retrying.
//! All state changes leave the worker as [`JobUpdate`]s.

use crate::config::FormatMode;
use crate::context::EngineContext;
use crate::diagnose::truncate_message;
use crate::download::{download, DownloadError, DownloadTarget};
use crate::encode::{transcode, EncodeError, EncodeProfile};
use crate::jobs::{JobStatus, QueuedJob, PLACEHOLDER_TITLE};
use crate::metadata::fallback_external_id;
use crate::updates::{JobUpdate, UpdateSender};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Longest failure message stored on a job
pub const MAX_ERROR_CHARS: usize = 200;

/// Longest file name stem produced by [`sanitize_filename`]
pub const MAX_FILENAME_CHARS: usize = 200;

const LOCK_ABORT_MESSAGE: &str =
    "Browser cookie store is locked by another process; close the browser and start again";

/// Error from one attempt at a job
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("output directory error: {0}")]
    Io(#[from] std::io::Error),
}

impl JobError {
    /// Whether retrying is pointless until an external process lets go
    pub fn is_resource_lock(&self) -> bool {
        match self {
            JobError::Download(e) => e.is_resource_lock(),
            JobError::Encode(e) => e.is_resource_lock(),
            JobError::Io(_) => false,
        }
    }
}

/// Settings shared by every job of a run
#[derive(Debug, Clone, PartialEq)]
pub struct RunPlan {
    pub mode: FormatMode,
    pub format_expression: String,
    pub output_dir: PathBuf,
}

/// Outcome of a queue run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueSummary {
    pub total: usize,
    pub finished: usize,
    pub failed: usize,
    /// Jobs left pending because the run stopped early
    pub not_attempted: usize,
    /// Set when a resource lock stopped the run
    pub aborted: Option<String>,
}

impl QueueSummary {
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.aborted.is_none()
    }
}

/// Forwards one job's status and progress, never moving backwards
///
/// Status is only forwarded when it advances along the job state machine.
/// Progress is only forwarded for the current phase and only when it grows.
#[derive(Debug)]
pub struct JobReporter<'a> {
    url: String,
    tx: &'a UpdateSender,
    status: JobStatus,
    progress: f64,
}

impl<'a> JobReporter<'a> {
    pub fn new(url: impl Into<String>, tx: &'a UpdateSender) -> Self {
        Self {
            url: url.into(),
            tx,
            status: JobStatus::Pending,
            progress: 0.0,
        }
    }

    /// Enter a new phase; ignored unless it is a legal forward transition
    pub fn status(&mut self, next: JobStatus) {
        if next == self.status || !self.status.can_transition_to(next) {
            return;
        }
        self.status = next;
        self.progress = 0.0;
        self.tx.send(JobUpdate::for_job(&self.url).status(next).progress(0.0));
    }

    /// Report progress for `phase`; dropped if the job has moved past it
    pub fn progress(&mut self, phase: JobStatus, percent: f64) {
        if phase != self.status || !phase.is_active() {
            return;
        }
        let percent = percent.clamp(0.0, 100.0);
        if percent <= self.progress {
            return;
        }
        self.progress = percent;
        self.tx.send(JobUpdate::for_job(&self.url).progress(percent));
    }

    fn finish(&mut self) {
        if self.status == JobStatus::Pending {
            self.status(JobStatus::Downloading);
        }
        self.status(JobStatus::Finished);
    }

    fn fail(&mut self, message: &str) {
        if !self.status.is_terminal() {
            self.status = JobStatus::Failed;
            self.tx.send(
                JobUpdate::for_job(&self.url)
                    .status(JobStatus::Failed)
                    .error(message),
            );
        }
    }
}

/// Executes one attempt of a job
pub trait JobRunner {
    fn run_job(
        &self,
        job: &QueuedJob,
        plan: &RunPlan,
        reporter: &mut JobReporter<'_>,
    ) -> Result<(), JobError>;
}

/// Strip characters that are invalid in file names on common platforms
///
/// Removes `<>:"/\|?*` and control characters, trims whitespace and keeps
/// at most 200 characters.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*'))
        .filter(|c| !c.is_control())
        .collect();
    cleaned.trim().chars().take(MAX_FILENAME_CHARS).collect::<String>().trim().to_string()
}

/// File name of a transcode output
///
/// Falls back to the external id when the title is missing or unusable.
pub fn output_file_name(title: &str, external_id: &str, profile: EncodeProfile) -> String {
    let stem = if title == PLACEHOLDER_TITLE {
        String::new()
    } else {
        sanitize_filename(title)
    };
    let stem = if stem.is_empty() {
        sanitize_filename(external_id)
    } else {
        stem
    };
    format!("{}{}", stem, profile.output_suffix())
}

/// [`JobRunner`] backed by yt-dlp and ffmpeg
#[derive(Debug, Clone)]
pub struct ToolRunner {
    ctx: Arc<EngineContext>,
}

impl ToolRunner {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    fn transcode_job(
        &self,
        job: &QueuedJob,
        plan: &RunPlan,
        profile: EncodeProfile,
        reporter: &mut JobReporter<'_>,
    ) -> Result<(), JobError> {
        let external_id = job
            .external_id
            .clone()
            .unwrap_or_else(|| fallback_external_id(&job.url));
        let target = DownloadTarget::Temp {
            external_id: external_id.clone(),
        };

        reporter.status(JobStatus::Downloading);
        let temp = download(
            &self.ctx,
            &job.url,
            &plan.format_expression,
            &plan.output_dir,
            &target,
            &mut |p| reporter.progress(JobStatus::Downloading, p),
        )?;

        reporter.status(JobStatus::Encoding);
        let output = plan
            .output_dir
            .join(output_file_name(&job.title, &external_id, profile));
        let result = transcode(&self.ctx, &temp, &output, profile, &mut |p| {
            reporter.progress(JobStatus::Encoding, p)
        });

        remove_temp(&temp);
        result?;
        Ok(())
    }
}

fn remove_temp(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "removed temporary download"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove temporary download"),
    }
}

impl JobRunner for ToolRunner {
    fn run_job(
        &self,
        job: &QueuedJob,
        plan: &RunPlan,
        reporter: &mut JobReporter<'_>,
    ) -> Result<(), JobError> {
        fs::create_dir_all(&plan.output_dir)?;

        match plan.mode {
            FormatMode::Passthrough => {
                reporter.status(JobStatus::Downloading);
                download(
                    &self.ctx,
                    &job.url,
                    &plan.format_expression,
                    &plan.output_dir,
                    &DownloadTarget::Final,
                    &mut |p| reporter.progress(JobStatus::Downloading, p),
                )?;
                Ok(())
            }
            FormatMode::H264Cfr => self.transcode_job(job, plan, EncodeProfile::H264Cfr, reporter),
            FormatMode::Prores => self.transcode_job(job, plan, EncodeProfile::Prores, reporter),
        }
    }
}

/// Process `jobs` in order and post the run's events to `tx`
///
/// Each job gets up to `retry_budget` attempts (at least one). After every
/// resolved job the aggregate progress is posted. The run always ends with
/// exactly one `all_complete` event; a resource lock ends it early with the
/// aborted flag set and leaves the remaining jobs pending.
pub fn process_queue<R: JobRunner + ?Sized>(
    runner: &R,
    jobs: &[QueuedJob],
    plan: &RunPlan,
    retry_budget: u32,
    tx: &UpdateSender,
) -> QueueSummary {
    let total = jobs.len();
    let budget = retry_budget.max(1);
    let mut summary = QueueSummary {
        total,
        ..QueueSummary::default()
    };

    tracing::info!(total, mode = %plan.mode, budget, "queue run started");

    for (index, job) in jobs.iter().enumerate() {
        let mut reporter = JobReporter::new(&job.url, tx);
        let mut last_error: Option<JobError> = None;
        let mut locked = false;

        for attempt in 1..=budget {
            match runner.run_job(job, plan, &mut reporter) {
                Ok(()) => {
                    last_error = None;
                    break;
                }
                Err(e) => {
                    tracing::warn!(url = %job.url, attempt, budget, error = %e, "job attempt failed");
                    locked = e.is_resource_lock();
                    last_error = Some(e);
                    if locked {
                        break;
                    }
                }
            }
        }

        match &last_error {
            None => {
                reporter.finish();
                summary.finished += 1;
                tracing::info!(url = %job.url, "job finished");
            }
            Some(e) if locked => {
                reporter.fail(&truncate_message(&format!("{}: {}", LOCK_ABORT_MESSAGE, e), MAX_ERROR_CHARS));
                summary.failed += 1;
            }
            Some(e) => {
                let message = format!("Failed after {} attempts: {}", budget, e);
                reporter.fail(&truncate_message(&message, MAX_ERROR_CHARS));
                summary.failed += 1;
                tracing::error!(url = %job.url, error = %e, "job failed");
            }
        }

        let resolved = index + 1;
        tx.send(JobUpdate::default().total_progress(resolved as f64 / total as f64 * 100.0));

        if locked {
            summary.not_attempted = total - resolved;
            summary.aborted = Some(LOCK_ABORT_MESSAGE.to_string());
            tracing::error!(
                url = %job.url,
                not_attempted = summary.not_attempted,
                "resource lock, stopping queue run"
            );
            tx.send(JobUpdate::run_aborted(LOCK_ABORT_MESSAGE));
            return summary;
        }
    }

    tracing::info!(finished = summary.finished, failed = summary.failed, "queue run complete");
    tx.send(JobUpdate::all_complete());
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobBoard;
    use crate::updates::update_channel;
    use proptest::prelude::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    fn job(url: &str) -> QueuedJob {
        QueuedJob {
            url: url.to_string(),
            title: format!("Title of {}", url),
            external_id: None,
        }
    }

    fn plan(mode: FormatMode) -> RunPlan {
        RunPlan {
            mode,
            format_expression: crate::format::resolve("1080p"),
            output_dir: PathBuf::from("/tmp/cutready-test"),
        }
    }

    fn failure(message: &str) -> JobError {
        JobError::Download(DownloadError::Failed {
            code: Some(1),
            message: message.to_string(),
        })
    }

    #[derive(Clone, Copy, Debug)]
    enum Outcome {
        Ok,
        Fail,
        Lock,
    }

    /// Runner that plays back scripted outcomes per URL and records attempts
    #[derive(Default)]
    struct ScriptedRunner {
        script: Mutex<HashMap<String, VecDeque<Outcome>>>,
        attempts: Mutex<Vec<String>>,
        encode: bool,
    }

    impl ScriptedRunner {
        fn with(script: &[(&str, &[Outcome])]) -> Self {
            let map = script
                .iter()
                .map(|(url, outcomes)| (url.to_string(), outcomes.iter().copied().collect()))
                .collect();
            Self {
                script: Mutex::new(map),
                ..Self::default()
            }
        }

        fn attempts(&self) -> Vec<String> {
            self.attempts.lock().unwrap().clone()
        }
    }

    impl JobRunner for ScriptedRunner {
        fn run_job(
            &self,
            job: &QueuedJob,
            _plan: &RunPlan,
            reporter: &mut JobReporter<'_>,
        ) -> Result<(), JobError> {
            self.attempts.lock().unwrap().push(job.url.clone());
            let outcome = self
                .script
                .lock()
                .unwrap()
                .get_mut(&job.url)
                .and_then(VecDeque::pop_front)
                .unwrap_or(Outcome::Ok);

            reporter.status(JobStatus::Downloading);
            reporter.progress(JobStatus::Downloading, 40.0);
            reporter.progress(JobStatus::Downloading, 100.0);
            if self.encode {
                reporter.status(JobStatus::Encoding);
                reporter.progress(JobStatus::Encoding, 50.0);
            }

            match outcome {
                Outcome::Ok => Ok(()),
                Outcome::Fail => Err(failure("ERROR: Connection reset by peer")),
                Outcome::Lock => Err(failure("ERROR: Could not copy Chrome cookie database")),
            }
        }
    }

    fn run(runner: &ScriptedRunner, urls: &[&str], budget: u32) -> (QueueSummary, Vec<JobUpdate>, JobBoard) {
        let (tx, mut rx) = update_channel();
        let mut board = JobBoard::new();
        for url in urls {
            board.submit(url).unwrap();
        }
        let jobs = board.pending_jobs();
        let summary = process_queue(runner, &jobs, &plan(FormatMode::Passthrough), budget, &tx);
        let updates = rx.drain();
        for update in &updates {
            board.apply(update);
        }
        (summary, updates, board)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        // Aggregate progress after N of M jobs is N/M*100 and never decreases.
        #[test]
        fn prop_total_progress_monotonic(outcomes in prop::collection::vec(prop_oneof![Just(Outcome::Ok), Just(Outcome::Fail)], 1..8)) {
            let urls: Vec<String> = (0..outcomes.len()).map(|i| format!("https://v/{}", i)).collect();
            let script: Vec<(&str, &[Outcome])> = urls
                .iter()
                .zip(outcomes.iter())
                .map(|(u, o)| (u.as_str(), std::slice::from_ref(o)))
                .collect();
            let runner = ScriptedRunner::with(&script);
            let url_refs: Vec<&str> = urls.iter().map(String::as_str).collect();
            let (summary, updates, _) = run(&runner, &url_refs, 1);

            let totals: Vec<f64> = updates.iter().filter_map(|u| u.total_progress).collect();
            prop_assert_eq!(totals.len(), outcomes.len());
            for (n, total) in totals.iter().enumerate() {
                let expected = (n + 1) as f64 / outcomes.len() as f64 * 100.0;
                prop_assert!((total - expected).abs() < 1e-9);
            }
            prop_assert!(totals.windows(2).all(|w| w[1] >= w[0]));
            prop_assert_eq!(updates.iter().filter(|u| u.all_complete).count(), 1);
            prop_assert_eq!(summary.finished + summary.failed, outcomes.len());
        }

        #[test]
        fn prop_sanitize_removes_forbidden(name in "\\PC{0,300}") {
            let clean = sanitize_filename(&name);
            prop_assert!(clean.chars().count() <= MAX_FILENAME_CHARS);
            prop_assert!(!clean.chars().any(|c| "<>:\"/\\|?*".contains(c) || c.is_control()));
        }
    }

    #[test]
    fn test_two_passthrough_jobs_complete_once() {
        let runner = ScriptedRunner::default();
        let (summary, updates, board) = run(&runner, &["https://a", "https://b"], 3);

        assert!(summary.is_success());
        assert_eq!(summary.finished, 2);
        assert_eq!(updates.iter().filter(|u| u.all_complete).count(), 1);
        assert!(updates.last().unwrap().all_complete);
        assert!(board.iter().all(|j| j.status == JobStatus::Finished));
        assert_eq!(board.total_progress(), 100.0);
    }

    #[test]
    fn test_retry_then_success() {
        let runner = ScriptedRunner::with(&[("https://a", &[Outcome::Fail, Outcome::Fail, Outcome::Ok][..])]);
        let (summary, _, board) = run(&runner, &["https://a"], 3);

        assert_eq!(runner.attempts().len(), 3);
        assert_eq!(summary.finished, 1);
        assert_eq!(board.get("https://a").unwrap().status, JobStatus::Finished);
    }

    #[test]
    fn test_retry_budget_exhausted() {
        let runner = ScriptedRunner::with(&[("https://a", &[Outcome::Fail, Outcome::Fail, Outcome::Fail][..])]);
        let (summary, updates, board) = run(&runner, &["https://a", "https://b"], 2);

        assert_eq!(runner.attempts(), vec!["https://a", "https://a", "https://b"]);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.finished, 1);

        let failed = board.get("https://a").unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        let error = failed.error.as_deref().unwrap();
        assert!(error.starts_with("Failed after 2 attempts"));
        assert!(error.chars().count() <= MAX_ERROR_CHARS);
        assert_eq!(updates.iter().filter(|u| u.all_complete).count(), 1);
    }

    #[test]
    fn test_zero_budget_still_attempts_once() {
        let runner = ScriptedRunner::default();
        let (summary, _, _) = run(&runner, &["https://a"], 0);
        assert_eq!(runner.attempts().len(), 1);
        assert_eq!(summary.finished, 1);
    }

    #[test]
    fn test_resource_lock_stops_run() {
        let runner = ScriptedRunner::with(&[("https://b", &[Outcome::Lock][..])]);
        let (summary, updates, board) = run(&runner, &["https://a", "https://b", "https://c"], 3);

        // Job 3 never attempted, job 2 not retried
        assert_eq!(runner.attempts(), vec!["https://a", "https://b"]);
        assert_eq!(summary.finished, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.not_attempted, 1);
        assert!(summary.aborted.is_some());
        assert!(!summary.is_success());

        assert_eq!(board.get("https://b").unwrap().status, JobStatus::Failed);
        assert_eq!(board.get("https://c").unwrap().status, JobStatus::Pending);

        let terminal: Vec<&JobUpdate> = updates.iter().filter(|u| u.all_complete).collect();
        assert_eq!(terminal.len(), 1);
        assert!(terminal[0].aborted);
        assert!(updates.last().unwrap().aborted);
    }

    #[test]
    fn test_empty_queue_completes() {
        let runner = ScriptedRunner::default();
        let (summary, updates, _) = run(&runner, &[], 3);
        assert_eq!(summary.total, 0);
        assert_eq!(updates, vec![JobUpdate::all_complete()]);
    }

    #[test]
    fn test_reporter_never_moves_backwards() {
        let (tx, mut rx) = update_channel();
        let mut reporter = JobReporter::new("https://a", &tx);

        reporter.status(JobStatus::Downloading);
        reporter.progress(JobStatus::Downloading, 60.0);
        reporter.progress(JobStatus::Downloading, 30.0);
        reporter.status(JobStatus::Encoding);
        reporter.progress(JobStatus::Encoding, 20.0);
        // Retry re-downloads: no backwards status, stale phase dropped
        reporter.status(JobStatus::Downloading);
        reporter.progress(JobStatus::Downloading, 90.0);
        reporter.progress(JobStatus::Encoding, 10.0);
        reporter.progress(JobStatus::Encoding, 45.0);

        let updates = rx.drain();
        let statuses: Vec<JobStatus> = updates.iter().filter_map(|u| u.status).collect();
        assert_eq!(statuses, vec![JobStatus::Downloading, JobStatus::Encoding]);
        let progress: Vec<f64> = updates.iter().filter_map(|u| u.progress).collect();
        assert_eq!(progress, vec![0.0, 60.0, 0.0, 20.0, 45.0]);
    }

    #[test]
    fn test_encode_phase_reported_for_transcodes() {
        let runner = ScriptedRunner {
            encode: true,
            ..ScriptedRunner::default()
        };
        let (_, updates, board) = run(&runner, &["https://a"], 1);
        assert!(updates.iter().any(|u| u.status == Some(JobStatus::Encoding)));
        assert_eq!(board.get("https://a").unwrap().status, JobStatus::Finished);
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("What? A \"Video\": Part 1/2"), "What A Video Part 12");
        assert_eq!(sanitize_filename("tab\there\n"), "tabhere");
        assert_eq!(sanitize_filename(&"x".repeat(300)).len(), 200);
    }

    #[test]
    fn test_output_file_name_fallbacks() {
        assert_eq!(
            output_file_name("My Clip", "abc", EncodeProfile::H264Cfr),
            "My Clip_CFR.mp4"
        );
        assert_eq!(
            output_file_name(PLACEHOLDER_TITLE, "abc", EncodeProfile::Prores),
            "abc_ProRes.mov"
        );
        assert_eq!(output_file_name("???", "abc", EncodeProfile::Prores), "abc_ProRes.mov");
    }

    #[test]
    fn test_job_error_lock_detection() {
        assert!(failure("sqlite3.OperationalError: database is locked").is_resource_lock());
        assert!(!failure("HTTP Error 429").is_resource_lock());
        let io = JobError::Io(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"));
        assert!(!io.is_resource_lock());
    }

    #[test]
    fn test_tool_runner_missing_yt_dlp_fails_job() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = crate::config::Config::default();
        config.tools.yt_dlp = "/nonexistent/cutready/yt-dlp".into();
        let runner = ToolRunner::new(Arc::new(EngineContext::new(config, Default::default())));

        let (tx, mut rx) = update_channel();
        let out = dir.path().join("nested").join("out");
        let plan = RunPlan {
            mode: FormatMode::H264Cfr,
            format_expression: "best".to_string(),
            output_dir: out.clone(),
        };
        let summary = process_queue(&runner, &[job("https://a")], &plan, 2, &tx);

        assert_eq!(summary.failed, 1);
        assert!(out.is_dir());
        let updates = rx.drain();
        assert!(updates.iter().any(|u| u.status == Some(JobStatus::Failed)));
        assert_eq!(updates.iter().filter(|u| u.all_complete).count(), 1);
    }
}
