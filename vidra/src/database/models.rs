//! Row types for the SQLite schema.
//!
//! Timestamps are stored as `INTEGER` Unix epoch milliseconds (UTC).

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::now_ms;
use crate::downloader::DownloadStatus;

/// A submitted video.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct VideoDbModel {
    /// Task identifier (UUID), shared with the download task and its events.
    pub id: String,
    pub name: String,
    pub original_url: String,
    /// Final media file name inside the downloads directory.
    pub file_name: Option<String>,
    pub thumbnail_file_name: Option<String>,
    /// One of `pending`, `downloading`, `encoding`, `completed`, `error`.
    pub download_status: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl VideoDbModel {
    pub fn new(
        id: Uuid,
        name: impl Into<String>,
        original_url: impl Into<String>,
        status: DownloadStatus,
    ) -> Self {
        let now = now_ms();
        Self {
            id: id.to_string(),
            name: name.into(),
            original_url: original_url.into(),
            file_name: None,
            thumbnail_file_name: None,
            download_status: status.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Parsed status; unknown values read as `Error`.
    pub fn status(&self) -> DownloadStatus {
        self.download_status.parse().unwrap_or(DownloadStatus::Error)
    }
}

/// A failure recorded for a video.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct VideoErrorDbModel {
    pub id: i64,
    pub video_id: String,
    pub error_message: String,
    /// Label of the failing step, e.g. `yt-dlp` or `file-glob`.
    pub command: String,
    /// Captured process output, empty when there was none.
    pub output: String,
    pub created_at: i64,
}

/// The single settings row.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct SettingsDbModel {
    pub id: i64,
    pub proxy_url: String,
    pub default_re_encode: bool,
    pub default_video_codec: String,
    pub default_audio_codec: String,
    pub default_crf: i64,
    pub theme: String,
}
