//! The per-task stage pipeline.
//!
//! Stages run in order: download, locate the downloaded file, transcode or
//! rename it, move the thumbnail, clean up, persist. A fatal stage error
//! moves the task to `Error`, records the failure and stops; nothing is
//! retried.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use process_utils::{ProcessError, run_streaming};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use super::artifacts::{self, DiscoveryError};
use super::ffmpeg::{Ffmpeg, TranscodeOptions};
use super::matchers::{FfmpegProgressMatcher, YtDlpProgressMatcher};
use super::progress::{DownloadStatus, ProgressSnapshot, ProgressState};
use super::ytdlp::YtDlp;
use crate::database::VideoRepository;
use crate::utils::fs::remove_file_if_exists;

const YTDLP_LABEL: &str = "yt-dlp";
const FFMPEG_LABEL: &str = "ffmpeg";

/// Pipeline stage a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    Download,
    Discovery,
    Transcode,
    Rename,
    Cancel,
}

/// A fatal pipeline failure, persisted as an error record.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{stage} failed: {message}")]
pub struct StageError {
    pub stage: Stage,
    /// Label stored in the error record, e.g. `yt-dlp (start)`.
    pub command: String,
    pub message: String,
    /// Captured process output, empty for non-process failures.
    pub output: String,
}

impl StageError {
    fn new(stage: Stage, command: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            stage,
            command: command.into(),
            message: message.into(),
            output: String::new(),
        }
    }

    fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    fn cancelled(output: impl Into<String>) -> Self {
        Self::new(Stage::Cancel, "cancel", "Task cancelled").with_output(output)
    }

    /// Map a process failure; `tool` names the binary in the record label.
    fn from_process(stage: Stage, tool: &str, verb: &str, err: ProcessError) -> Self {
        match &err {
            ProcessError::Spawn { source, .. } => {
                Self::new(stage, format!("{tool} (start)"), format!("Failed to start {tool}: {source}"))
            }
            ProcessError::Cancelled { output, .. } => Self::cancelled(output.clone()),
            ProcessError::Exit { status, output, .. } => {
                Self::new(stage, tool, format!("{verb} failed: {status}")).with_output(output.clone())
            }
            ProcessError::Wait { source, output, .. } => {
                Self::new(stage, tool, format!("{verb} failed: {source}")).with_output(output.clone())
            }
        }
    }

    fn from_discovery(err: DiscoveryError) -> Self {
        let command = match err {
            DiscoveryError::OnlyThumbnails => "file-glob-check",
            DiscoveryError::NotFound | DiscoveryError::Io { .. } => "file-glob",
        };
        Self::new(Stage::Discovery, command, err.to_string())
    }

    fn rename(what: &str, source: std::io::Error) -> Self {
        Self::new(Stage::Rename, "rename", format!("Failed to rename {what}: {source}"))
    }
}

/// Shared, read-only pieces every task uses.
pub struct PipelineContext {
    pub downloads_dir: PathBuf,
    pub ffmpeg: Ffmpeg,
    pub repository: Arc<dyn VideoRepository>,
}

/// Everything one task needs, resolved at submission time.
#[derive(Debug, Clone)]
pub struct TaskPlan {
    pub id: Uuid,
    pub url: String,
    /// Sanitized base name of the final files.
    pub base_name: String,
    pub format_id: Option<String>,
    /// `None` skips transcoding.
    pub transcode: Option<TranscodeOptions>,
    pub ytdlp: YtDlp,
}

/// Final file names of a finished task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    pub file_name: String,
    pub thumbnail_file_name: Option<String>,
}

/// Run one task to its terminal state.
pub async fn run_pipeline(
    ctx: &PipelineContext,
    plan: &TaskPlan,
    progress: &ProgressState,
    cancel: &CancellationToken,
) -> Result<TaskOutcome, StageError> {
    match execute(ctx, plan, progress, cancel).await {
        Ok(outcome) => {
            finalize(ctx, plan, progress, &outcome).await;
            Ok(outcome)
        }
        Err(err) => {
            if err.stage == Stage::Cancel {
                discard_temp_files(&ctx.downloads_dir, plan.id).await;
            }
            record_failure(ctx, plan.id, progress, &err).await;
            Err(err)
        }
    }
}

async fn execute(
    ctx: &PipelineContext,
    plan: &TaskPlan,
    progress: &ProgressState,
    cancel: &CancellationToken,
) -> Result<TaskOutcome, StageError> {
    ensure_active(cancel)?;
    download(ctx, plan, progress, cancel).await?;

    ensure_active(cancel)?;
    let artifact = artifacts::discover_artifact(&ctx.downloads_dir, plan.id)
        .await
        .map_err(StageError::from_discovery)?;
    info!(file = %artifact.display(), "Found downloaded file");

    let file_name = match &plan.transcode {
        Some(options) => transcode(ctx, plan, progress, cancel, &artifact, options).await?,
        None => {
            progress.update(
                ProgressSnapshot::new(DownloadStatus::Encoding)
                    .with_percent(100.0)
                    .with_encoding_percent(100.0)
                    .with_last_output("Skipping encoding..."),
            );
            let file_name = final_name(&plan.base_name, artifact.extension().and_then(|e| e.to_str()));
            ensure_active(cancel)?;
            tokio::fs::rename(&artifact, ctx.downloads_dir.join(&file_name))
                .await
                .map_err(|e| StageError::rename("downloaded file", e))?;
            file_name
        }
    };
    info!(file = %file_name, "Media file in place");

    let thumbnail_file_name =
        artifacts::relocate_thumbnail(&ctx.downloads_dir, plan.id, &plan.base_name).await;

    let removed = artifacts::cleanup_temp_files(&ctx.downloads_dir, plan.id).await;
    debug!(removed, "Temporary files cleaned up");

    Ok(TaskOutcome {
        file_name,
        thumbnail_file_name,
    })
}

async fn download(
    ctx: &PipelineContext,
    plan: &TaskPlan,
    progress: &ProgressState,
    cancel: &CancellationToken,
) -> Result<(), StageError> {
    let template = artifacts::temp_output_template(&ctx.downloads_dir, plan.id);
    let spec = plan
        .ytdlp
        .download_command(&plan.url, plan.format_id.as_deref(), &template);

    progress.update(
        ProgressSnapshot::new(DownloadStatus::Downloading).with_last_output("Starting download..."),
    );
    info!(command = %spec.describe(), "Starting download");

    let output = run_streaming(&spec, cancel, YtDlpProgressMatcher, |line, matched| {
        trace!(line, "yt-dlp");
        match matched {
            Some(p) => {
                progress.update(
                    ProgressSnapshot::new(DownloadStatus::Downloading)
                        .with_percent(p.percent)
                        .with_speed(p.speed)
                        .with_eta(p.eta)
                        .with_last_output(line),
                );
            }
            None => progress.set_last_output(line),
        }
    })
    .await
    .map_err(|e| StageError::from_process(Stage::Download, YTDLP_LABEL, "Download", e))?;

    info!(
        elapsed_ms = output.duration.as_millis() as u64,
        progress_lines = output.matched_lines,
        "Download completed"
    );
    Ok(())
}

async fn transcode(
    ctx: &PipelineContext,
    plan: &TaskPlan,
    progress: &ProgressState,
    cancel: &CancellationToken,
    input: &Path,
    options: &TranscodeOptions,
) -> Result<String, StageError> {
    let encoded = artifacts::encode_temp_path(&ctx.downloads_dir, plan.id);

    progress.update(
        ProgressSnapshot::new(DownloadStatus::Encoding)
            .with_percent(100.0)
            .with_last_output("Getting video duration..."),
    );
    let duration = ctx.ffmpeg.probe_duration(input, cancel).await;
    info!(duration, "Video duration");

    ensure_active(cancel)?;
    progress.update(
        ProgressSnapshot::new(DownloadStatus::Encoding)
            .with_percent(100.0)
            .with_last_output(format!("Encoding to {}...", options.video_codec)),
    );

    let spec = ctx.ffmpeg.transcode_command(input, &encoded, options);
    info!(command = %spec.describe(), "Starting encode");

    let result = run_streaming(&spec, cancel, FfmpegProgressMatcher::new(duration), |line, matched| {
        trace!(line, "ffmpeg");
        match matched {
            Some(percent) => {
                progress.update(
                    ProgressSnapshot::new(DownloadStatus::Encoding)
                        .with_percent(100.0)
                        .with_encoding_percent(percent)
                        .with_last_output(line),
                );
            }
            None => progress.set_last_output(line),
        }
    })
    .await;

    if let Err(e) = result {
        discard(&encoded).await;
        return Err(StageError::from_process(
            Stage::Transcode,
            FFMPEG_LABEL,
            "Encoding",
            e,
        ));
    }

    let file_name = final_name(&plan.base_name, Some("mp4"));
    if let Err(e) = tokio::fs::rename(&encoded, ctx.downloads_dir.join(&file_name)).await {
        discard(&encoded).await;
        return Err(StageError::rename("encoded file", e));
    }
    Ok(file_name)
}

async fn finalize(
    ctx: &PipelineContext,
    plan: &TaskPlan,
    progress: &ProgressState,
    outcome: &TaskOutcome,
) {
    progress.update(
        ProgressSnapshot::new(DownloadStatus::Finished)
            .with_percent(100.0)
            .with_encoding_percent(100.0)
            .with_last_output("Processing complete"),
    );

    let id = plan.id.to_string();
    if let Err(e) = ctx
        .repository
        .update_files(&id, &outcome.file_name, outcome.thumbnail_file_name.as_deref())
        .await
    {
        error!(error = %e, "Failed to update video file names");
    }
    if let Err(e) = ctx.repository.update_status(&id, DownloadStatus::Finished).await {
        error!(error = %e, "Failed to update video status");
    }

    info!(
        file = %outcome.file_name,
        thumbnail = outcome.thumbnail_file_name.as_deref().unwrap_or(""),
        "Video download and processing finished"
    );
}

async fn record_failure(ctx: &PipelineContext, id: Uuid, progress: &ProgressState, err: &StageError) {
    error!(
        stage = %err.stage,
        command = %err.command,
        output = %err.output,
        "{}",
        err.message
    );
    progress.fail(err.message.clone());

    let id = id.to_string();
    if let Err(e) = ctx
        .repository
        .create_error(&id, &err.message, &err.command, &err.output)
        .await
    {
        error!(error = %e, "Failed to record error");
    }
    if let Err(e) = ctx.repository.update_status(&id, DownloadStatus::Error).await {
        error!(error = %e, "Failed to update video status");
    }
}

/// `<base>.<ext>`, or just `<base>` when there is no extension.
fn final_name(base_name: &str, extension: Option<&str>) -> String {
    match extension.filter(|ext| !ext.is_empty()) {
        Some(ext) => format!("{base_name}.{ext}"),
        None => base_name.to_string(),
    }
}

fn ensure_active(cancel: &CancellationToken) -> Result<(), StageError> {
    if cancel.is_cancelled() {
        Err(StageError::cancelled(""))
    } else {
        Ok(())
    }
}

async fn discard(path: &Path) {
    if let Err(e) = remove_file_if_exists(path).await {
        warn!(error = %e, "Failed to remove partial output");
    }
}

async fn discard_temp_files(dir: &Path, id: Uuid) {
    discard(&artifacts::encode_temp_path(dir, id)).await;
    artifacts::cleanup_temp_files(dir, id).await;
}
