//! Settings repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::config::Settings;
use crate::database::models::SettingsDbModel;

const SETTINGS_ROW_ID: i64 = 1;

/// Data access for the single settings row.
#[async_trait]
pub trait SettingsRepository: Send + Sync {
    /// Current settings. A missing row reads as defaults.
    async fn get_settings(&self) -> Result<Settings>;

    /// Replace the stored settings.
    async fn update_settings(&self, settings: &Settings) -> Result<()>;
}

/// SQLx implementation of [`SettingsRepository`].
pub struct SqlxSettingsRepository {
    pool: SqlitePool,
}

impl SqlxSettingsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SettingsRepository for SqlxSettingsRepository {
    async fn get_settings(&self) -> Result<Settings> {
        let row = sqlx::query_as::<_, SettingsDbModel>("SELECT * FROM settings WHERE id = ?")
            .bind(SETTINGS_ROW_ID)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Settings::from).unwrap_or_default())
    }

    async fn update_settings(&self, settings: &Settings) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (
                id, proxy_url, default_re_encode, default_video_codec,
                default_audio_codec, default_crf, theme
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                proxy_url = excluded.proxy_url,
                default_re_encode = excluded.default_re_encode,
                default_video_codec = excluded.default_video_codec,
                default_audio_codec = excluded.default_audio_codec,
                default_crf = excluded.default_crf,
                theme = excluded.theme
            "#,
        )
        .bind(SETTINGS_ROW_ID)
        .bind(&settings.proxy_url)
        .bind(settings.default_re_encode)
        .bind(&settings.default_video_codec)
        .bind(&settings.default_audio_codec)
        .bind(i64::from(settings.default_crf))
        .bind(&settings.theme)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
