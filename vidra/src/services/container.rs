//! Service container wiring every component together.

use std::sync::Arc;

use sqlx::SqlitePool;
use tracing::info;

use crate::Result;
use crate::config::{AppConfig, ConfigService};
use crate::database::{self, SqlxSettingsRepository, SqlxVideoRepository, VideoRepository};
use crate::downloader::{DownloaderConfig, DownloaderService, TaskRegistry};
use crate::events::EventBroadcaster;

use super::video::VideoService;

/// Owns the shared services of one running instance.
pub struct ServiceContainer {
    /// Database connection pool.
    pub pool: SqlitePool,
    pub config: AppConfig,
    pub config_service: Arc<ConfigService>,
    pub video_repository: Arc<dyn VideoRepository>,
    /// Shared between the download pipeline and the video service.
    pub event_broadcaster: Arc<EventBroadcaster>,
    pub task_registry: Arc<TaskRegistry>,
    pub downloader: Arc<DownloaderService>,
    pub video_service: Arc<VideoService>,
}

impl ServiceContainer {
    /// Open the database, run migrations and build every service.
    pub async fn new(config: AppConfig) -> Result<Self> {
        let pool = database::init_pool(&config.database_url).await?;
        database::run_migrations(&pool).await?;
        Self::with_pool(pool, config).await
    }

    /// Build every service on top of an already migrated pool.
    pub async fn with_pool(pool: SqlitePool, config: AppConfig) -> Result<Self> {
        info!("Initializing service container");

        let video_repository: Arc<dyn VideoRepository> =
            Arc::new(SqlxVideoRepository::new(pool.clone()));
        let settings_repository = Arc::new(SqlxSettingsRepository::new(pool.clone()));
        let config_service = Arc::new(ConfigService::load(settings_repository).await);

        let event_broadcaster = Arc::new(EventBroadcaster::new());
        let task_registry = Arc::new(TaskRegistry::new());

        let downloader = Arc::new(DownloaderService::new(
            DownloaderConfig::from(&config),
            task_registry.clone(),
            video_repository.clone(),
            config_service.clone(),
            Some(event_broadcaster.clone()),
        ));
        downloader.ensure_downloads_dir().await?;

        let video_service = Arc::new(VideoService::new(
            video_repository.clone(),
            downloader.clone(),
            event_broadcaster.clone(),
        ));

        info!(
            downloads_dir = %config.downloads_dir.display(),
            max_concurrent_tasks = ?config.max_concurrent_tasks,
            "Service container initialized"
        );

        Ok(Self {
            pool,
            config,
            config_service,
            video_repository,
            event_broadcaster,
            task_registry,
            downloader,
            video_service,
        })
    }
}
