//! Download service: accepts tasks, runs their pipelines and answers
//! progress queries.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use process_utils::run_capture;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use super::artifacts;
use super::ffmpeg::{Ffmpeg, TranscodeOptions};
use super::pipeline::{PipelineContext, TaskPlan, run_pipeline};
use super::progress::{ProgressSnapshot, ProgressState};
use super::registry::TaskRegistry;
use super::ytdlp::{VideoMetadata, YtDlp};
use crate::config::{AppConfig, ConfigProvider};
use crate::database::VideoRepository;
use crate::events::EventPublisher;
use crate::utils::filename::sanitize_filename;
use crate::utils::fs::{dir_size, ensure_dir_all_with_op};
use crate::{Error, Result};

/// How long `remove_task` waits for a cancelled task to wind down.
const TASK_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Static configuration of the download service.
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    pub downloads_dir: PathBuf,
    pub ytdlp_path: String,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    /// Tasks allowed to run at once; the rest wait in `Pending`.
    /// `None` runs every task immediately.
    pub max_concurrent_tasks: Option<usize>,
    pub metadata_timeout: Duration,
}

impl From<&AppConfig> for DownloaderConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            downloads_dir: config.downloads_dir.clone(),
            ytdlp_path: config.ytdlp_path.clone(),
            ffmpeg_path: config.ffmpeg_path.clone(),
            ffprobe_path: config.ffprobe_path.clone(),
            max_concurrent_tasks: config.max_concurrent_tasks,
            metadata_timeout: config.metadata_timeout,
        }
    }
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

/// A request to download one video.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub id: Uuid,
    pub url: String,
    /// User-supplied name; sanitized before use.
    pub name: String,
    /// yt-dlp format id; best video + best audio when unset.
    pub format_id: Option<String>,
    /// Re-encode after download; the configured default when unset.
    pub re_encode: Option<bool>,
}

/// Runs download tasks, one tokio task each.
pub struct DownloaderService {
    config: DownloaderConfig,
    registry: Arc<TaskRegistry>,
    settings: Arc<dyn ConfigProvider>,
    publisher: Option<Arc<dyn EventPublisher>>,
    context: Arc<PipelineContext>,
    limiter: Option<Arc<Semaphore>>,
}

impl DownloaderService {
    pub fn new(
        config: DownloaderConfig,
        registry: Arc<TaskRegistry>,
        repository: Arc<dyn VideoRepository>,
        settings: Arc<dyn ConfigProvider>,
        publisher: Option<Arc<dyn EventPublisher>>,
    ) -> Self {
        let context = Arc::new(PipelineContext {
            downloads_dir: config.downloads_dir.clone(),
            ffmpeg: Ffmpeg::new(&config.ffmpeg_path, &config.ffprobe_path),
            repository,
        });
        let limiter = config
            .max_concurrent_tasks
            .filter(|permits| *permits > 0)
            .map(|permits| Arc::new(Semaphore::new(permits)));

        Self {
            config,
            registry,
            settings,
            publisher,
            context,
            limiter,
        }
    }

    pub fn config(&self) -> &DownloaderConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Create the downloads directory if it is missing.
    pub async fn ensure_downloads_dir(&self) -> Result<()> {
        ensure_dir_all_with_op("creating downloads directory", &self.config.downloads_dir).await
    }

    fn ytdlp(&self) -> YtDlp {
        YtDlp::new(&self.config.ytdlp_path).with_proxy(self.settings.proxy_url())
    }

    /// Register a task and start its pipeline in the background.
    ///
    /// Returns as soon as the task is registered; the outcome is only
    /// observable through progress queries and events.
    pub fn start_download(&self, request: DownloadRequest) -> Result<()> {
        let url = request.url.trim();
        if url.is_empty() {
            return Err(Error::validation("URL must not be empty"));
        }

        let settings = self.settings.settings();
        let re_encode = request.re_encode.unwrap_or(settings.default_re_encode);
        let plan = TaskPlan {
            id: request.id,
            url: url.to_string(),
            base_name: sanitize_filename(&request.name),
            format_id: request.format_id.filter(|f| !f.trim().is_empty()),
            transcode: re_encode.then(|| TranscodeOptions {
                video_codec: settings.default_video_codec.clone(),
                audio_codec: settings.default_audio_codec.clone(),
                crf: settings.default_crf,
            }),
            ytdlp: YtDlp::new(&self.config.ytdlp_path).with_proxy(settings.proxy_url.clone()),
        };

        let progress = Arc::new(ProgressState::new(plan.id, self.publisher.clone()));
        let entry = self.registry.register(plan.id, progress)?;

        info!(
            task_id = %plan.id,
            url = %plan.url,
            name = %plan.base_name,
            re_encode,
            active_tasks = self.registry.len(),
            "Initializing download task"
        );

        let context = self.context.clone();
        let limiter = self.limiter.clone();
        let span = info_span!("task", task_id = %plan.id);
        let tracker = entry.tracker.clone();

        tracker.spawn(
            async move {
                let _permit = match limiter {
                    Some(limiter) => {
                        debug!("Waiting for a free task slot");
                        tokio::select! {
                            // The pipeline notices the cancellation itself.
                            _ = entry.cancel.cancelled() => None,
                            permit = limiter.acquire_owned() => permit.ok(),
                        }
                    }
                    None => None,
                };

                if let Err(e) = run_pipeline(&context, &plan, &entry.progress, &entry.cancel).await {
                    // Already recorded against the video.
                    debug!(stage = %e.stage, "Task ended with an error");
                }
            }
            .instrument(span),
        );
        tracker.close();

        Ok(())
    }

    /// Ask a running task to stop. Returns `false` for unknown ids.
    pub fn cancel(&self, id: &Uuid) -> bool {
        let found = self.registry.cancel(id);
        if found {
            info!(task_id = %id, "Cancellation requested");
        }
        found
    }

    /// Cancel a task, forget it and wait until its pipeline has returned.
    ///
    /// Once this returns the task no longer writes files or records.
    pub async fn remove_task(&self, id: &Uuid) {
        let Some(entry) = self.registry.remove(id) else {
            return;
        };
        entry.cancel.cancel();

        if tokio::time::timeout(TASK_STOP_TIMEOUT, entry.tracker.wait())
            .await
            .is_err()
        {
            warn!(task_id = %id, "Task did not stop in time");
        }
    }

    pub fn get_progress(&self, id: &Uuid) -> Option<ProgressSnapshot> {
        self.registry.snapshot(id)
    }

    pub fn get_all_progress(&self) -> HashMap<Uuid, ProgressSnapshot> {
        self.registry.list_all()
    }

    /// Look up title, duration and available formats without downloading.
    pub async fn fetch_metadata(&self, url: &str) -> Result<VideoMetadata> {
        let spec = self.ytdlp().metadata_command(url.trim());
        debug!(command = %spec.describe(), "Fetching metadata");

        // Dropping the run on timeout kills the child.
        let cancel = CancellationToken::new();
        let output = tokio::time::timeout(self.config.metadata_timeout, run_capture(&spec, &cancel))
            .await
            .map_err(|_| {
                Error::Other(format!(
                    "Metadata request timed out after {}s",
                    self.config.metadata_timeout.as_secs()
                ))
            })??;

        VideoMetadata::from_output(&output.transcript)
    }

    /// Run `yt-dlp -U` and return its output.
    pub async fn update_ytdlp(&self) -> Result<String> {
        let spec = self.ytdlp().update_command();
        info!(command = %spec.describe(), "Updating yt-dlp");
        let output = run_capture(&spec, &CancellationToken::new()).await?;
        Ok(output.transcript)
    }

    /// Delete a video's media and thumbnail files. Missing files are ignored.
    pub async fn delete_video_files(&self, file_name: Option<&str>, thumbnail: Option<&str>) {
        artifacts::remove_video_files(&self.config.downloads_dir, file_name, thumbnail).await;
    }

    /// Bytes used by everything under the downloads directory.
    pub async fn downloads_size(&self) -> Result<u64> {
        dir_size(&self.config.downloads_dir).await
    }
}
