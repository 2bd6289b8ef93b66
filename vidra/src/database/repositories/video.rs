//! Video and video-error repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::{VideoDbModel, VideoErrorDbModel};
use crate::database::now_ms;
use crate::downloader::DownloadStatus;
use crate::{Error, Result};

/// Data access for videos and their error records.
#[async_trait]
pub trait VideoRepository: Send + Sync {
    async fn create_video(&self, video: &VideoDbModel) -> Result<()>;

    async fn get_video(&self, id: &str) -> Result<VideoDbModel>;

    /// All videos, newest first.
    async fn list_videos(&self) -> Result<Vec<VideoDbModel>>;

    /// Delete a video and, by cascade, its error records.
    async fn delete_video(&self, id: &str) -> Result<()>;

    async fn update_status(&self, id: &str, status: DownloadStatus) -> Result<()>;

    /// Set the final media and thumbnail file names.
    async fn update_files(
        &self,
        id: &str,
        file_name: &str,
        thumbnail_file_name: Option<&str>,
    ) -> Result<()>;

    /// Record a failure for a video.
    async fn create_error(
        &self,
        video_id: &str,
        message: &str,
        command: &str,
        output: &str,
    ) -> Result<()>;

    /// Error records for a video, newest first.
    async fn list_errors(&self, video_id: &str) -> Result<Vec<VideoErrorDbModel>>;
}

/// SQLx implementation of [`VideoRepository`].
pub struct SqlxVideoRepository {
    pool: SqlitePool,
}

impl SqlxVideoRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VideoRepository for SqlxVideoRepository {
    async fn create_video(&self, video: &VideoDbModel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO videos (
                id, name, original_url, file_name, thumbnail_file_name,
                download_status, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&video.id)
        .bind(&video.name)
        .bind(&video.original_url)
        .bind(&video.file_name)
        .bind(&video.thumbnail_file_name)
        .bind(&video.download_status)
        .bind(video.created_at)
        .bind(video.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_video(&self, id: &str) -> Result<VideoDbModel> {
        sqlx::query_as::<_, VideoDbModel>("SELECT * FROM videos WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("Video", id))
    }

    async fn list_videos(&self) -> Result<Vec<VideoDbModel>> {
        let videos = sqlx::query_as::<_, VideoDbModel>(
            "SELECT * FROM videos ORDER BY created_at DESC, id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(videos)
    }

    async fn delete_video(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM videos WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("Video", id));
        }
        Ok(())
    }

    async fn update_status(&self, id: &str, status: DownloadStatus) -> Result<()> {
        let result =
            sqlx::query("UPDATE videos SET download_status = ?, updated_at = ? WHERE id = ?")
                .bind(status.as_ref())
                .bind(now_ms())
                .bind(id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("Video", id));
        }
        Ok(())
    }

    async fn update_files(
        &self,
        id: &str,
        file_name: &str,
        thumbnail_file_name: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE videos SET
                file_name = ?,
                thumbnail_file_name = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(file_name)
        .bind(thumbnail_file_name)
        .bind(now_ms())
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("Video", id));
        }
        Ok(())
    }

    async fn create_error(
        &self,
        video_id: &str,
        message: &str,
        command: &str,
        output: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO video_errors (video_id, error_message, command, output, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(video_id)
        .bind(message)
        .bind(command)
        .bind(output)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_errors(&self, video_id: &str) -> Result<Vec<VideoErrorDbModel>> {
        let errors = sqlx::query_as::<_, VideoErrorDbModel>(
            "SELECT * FROM video_errors WHERE video_id = ? ORDER BY created_at DESC, id DESC",
        )
        .bind(video_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(errors)
    }
}
