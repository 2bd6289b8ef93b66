//! Download and transcode orchestration.
//!
//! [`DownloaderService`] accepts [`DownloadRequest`]s, registers a
//! [`ProgressState`] for each in the shared [`TaskRegistry`] and runs the
//! stage [`pipeline`] on its own tokio task. yt-dlp and ffmpeg run through
//! `process_utils`, with [`matchers`] turning their output into progress.

pub mod artifacts;
pub mod ffmpeg;
pub mod matchers;
pub mod pipeline;
pub mod progress;
pub mod registry;
pub mod service;
pub mod ytdlp;

pub use ffmpeg::{Ffmpeg, TranscodeOptions};
pub use matchers::{DownloadProgress, FfmpegProgressMatcher, YtDlpProgressMatcher};
pub use pipeline::{Stage, StageError, TaskOutcome};
pub use progress::{DownloadStatus, ProgressSnapshot, ProgressState};
pub use registry::{TaskEntry, TaskRegistry};
pub use service::{DownloadRequest, DownloaderConfig, DownloaderService};
pub use ytdlp::{VideoMetadata, VideoOption, YtDlp};
