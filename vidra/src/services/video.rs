//! Video lifecycle: create (and start downloading), query, delete.

use std::sync::Arc;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::database::VideoRepository;
use crate::database::models::{VideoDbModel, VideoErrorDbModel};
use crate::downloader::{DownloadRequest, DownloadStatus, DownloaderService, VideoMetadata};
use crate::events::{EventPublisher, VidraEvent};
use crate::utils::url::sanitize_url;
use crate::{Error, Result};

/// A new video to download.
#[derive(Debug, Clone, Default)]
pub struct CreateVideoRequest {
    pub name: String,
    pub url: String,
    pub format_id: Option<String>,
    pub re_encode: Option<bool>,
}

impl CreateVideoRequest {
    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::validation("name is required"));
        }
        if self.url.trim().is_empty() {
            return Err(Error::validation("url is required"));
        }
        Ok(())
    }
}

/// Ties the video records, the download service and the event publisher
/// together.
pub struct VideoService {
    repository: Arc<dyn VideoRepository>,
    downloader: Arc<DownloaderService>,
    publisher: Arc<dyn EventPublisher>,
}

impl VideoService {
    pub fn new(
        repository: Arc<dyn VideoRepository>,
        downloader: Arc<DownloaderService>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            repository,
            downloader,
            publisher,
        }
    }

    /// Store a new video and start downloading it.
    ///
    /// Returns the stored record as soon as the download is running.
    pub async fn create_video(&self, request: CreateVideoRequest) -> Result<VideoDbModel> {
        request.validate()?;
        let url = sanitize_url(&request.url)?;
        let name = request.name.trim().to_string();

        let id = Uuid::new_v4();
        let video = VideoDbModel::new(id, &name, &url, DownloadStatus::Downloading);
        self.repository.create_video(&video).await?;
        info!(video_id = %id, name = %name, url = %url, "Created video");

        let started = self.downloader.start_download(DownloadRequest {
            id,
            url,
            name,
            format_id: request.format_id,
            re_encode: request.re_encode,
        });
        if let Err(e) = started {
            warn!(video_id = %id, error = %e, "Failed to start download");
            let video_id = id.to_string();
            if let Err(err) = self
                .repository
                .create_error(&video_id, &e.to_string(), "start", "")
                .await
            {
                error!(video_id = %id, error = %err, "Failed to record start failure");
            }
            if let Err(err) = self
                .repository
                .update_status(&video_id, DownloadStatus::Error)
                .await
            {
                error!(video_id = %id, error = %err, "Failed to update video status");
            }
            return Err(e);
        }

        self.publisher.publish(VidraEvent::VideoCreated(video.clone()));
        Ok(video)
    }

    pub async fn get_video(&self, id: &Uuid) -> Result<VideoDbModel> {
        self.repository.get_video(&id.to_string()).await
    }

    pub async fn list_videos(&self) -> Result<Vec<VideoDbModel>> {
        self.repository.list_videos().await
    }

    pub async fn list_errors(&self, id: &Uuid) -> Result<Vec<VideoErrorDbModel>> {
        // Unknown ids are an error rather than an empty list.
        self.repository.get_video(&id.to_string()).await?;
        self.repository.list_errors(&id.to_string()).await
    }

    /// Stop any running download, delete the files and the record.
    pub async fn delete_video(&self, id: &Uuid) -> Result<()> {
        self.repository.get_video(&id.to_string()).await?;

        self.downloader.remove_task(id).await;
        // Re-read: the task may have stored its file names before stopping.
        let video = self.repository.get_video(&id.to_string()).await?;
        self.downloader
            .delete_video_files(
                video.file_name.as_deref(),
                video.thumbnail_file_name.as_deref(),
            )
            .await;
        self.repository.delete_video(&video.id).await?;

        info!(video_id = %id, "Deleted video");
        self.publisher.publish(VidraEvent::VideoDeleted { id: *id });
        Ok(())
    }

    /// Metadata for `url`, after the same URL clean-up as downloads.
    pub async fn fetch_metadata(&self, url: &str) -> Result<VideoMetadata> {
        if url.trim().is_empty() {
            return Err(Error::validation("url is required"));
        }
        let url = sanitize_url(url)?;
        self.downloader.fetch_metadata(&url).await
    }
}
