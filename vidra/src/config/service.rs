//! Cached settings service.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use super::settings::{ConfigProvider, Settings};
use crate::Result;
use crate::database::SettingsRepository;

/// Partial settings change; `None` keeps the current value.
#[derive(Debug, Clone, Default)]
pub struct SettingsUpdate {
    pub proxy_url: Option<String>,
    pub default_re_encode: Option<bool>,
    pub default_video_codec: Option<String>,
    pub default_audio_codec: Option<String>,
    pub default_crf: Option<u8>,
    pub theme: Option<String>,
}

impl SettingsUpdate {
    pub fn is_empty(&self) -> bool {
        self.proxy_url.is_none()
            && self.default_re_encode.is_none()
            && self.default_video_codec.is_none()
            && self.default_audio_codec.is_none()
            && self.default_crf.is_none()
            && self.theme.is_none()
    }

    pub fn apply(self, mut settings: Settings) -> Settings {
        if let Some(proxy_url) = self.proxy_url {
            settings.proxy_url = proxy_url.trim().to_string();
        }
        if let Some(re_encode) = self.default_re_encode {
            settings.default_re_encode = re_encode;
        }
        if let Some(codec) = self.default_video_codec {
            settings.default_video_codec = codec;
        }
        if let Some(codec) = self.default_audio_codec {
            settings.default_audio_codec = codec;
        }
        if let Some(crf) = self.default_crf {
            settings.default_crf = crf;
        }
        if let Some(theme) = self.theme {
            settings.theme = theme;
        }
        settings
    }
}

/// Serves settings from an in-memory copy of the database row.
///
/// The copy is loaded once at startup and replaced on every successful
/// update, so readers never touch the database.
pub struct ConfigService {
    repo: Arc<dyn SettingsRepository>,
    cache: RwLock<Settings>,
}

impl ConfigService {
    /// Load settings from `repo`. A failed read starts from defaults.
    pub async fn load(repo: Arc<dyn SettingsRepository>) -> Self {
        let settings = match repo.get_settings().await {
            Ok(settings) => settings,
            Err(e) => {
                warn!(error = %e, "Failed to load settings, using defaults");
                Settings::default()
            }
        };

        Self {
            repo,
            cache: RwLock::new(settings),
        }
    }

    /// Re-read the stored row into the cache.
    pub async fn refresh(&self) -> Result<Settings> {
        let settings = self.repo.get_settings().await?;
        *self.cache.write() = settings.clone();
        Ok(settings)
    }

    /// Validate and store new settings. The cache only changes once the
    /// write succeeded.
    pub async fn update(&self, settings: Settings) -> Result<Settings> {
        settings.validate()?;
        self.repo.update_settings(&settings).await?;
        *self.cache.write() = settings.clone();
        info!(
            re_encode = settings.default_re_encode,
            video_codec = %settings.default_video_codec,
            audio_codec = %settings.default_audio_codec,
            crf = settings.default_crf,
            proxy = !settings.proxy_url.is_empty(),
            "Settings updated"
        );
        Ok(settings)
    }

    /// Apply a partial change on top of the current settings.
    pub async fn apply(&self, update: SettingsUpdate) -> Result<Settings> {
        let next = update.apply(self.settings());
        self.update(next).await
    }
}

impl ConfigProvider for ConfigService {
    fn settings(&self) -> Settings {
        self.cache.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct MemoryRepo {
        stored: Mutex<Option<Settings>>,
        broken: bool,
    }

    #[async_trait]
    impl SettingsRepository for MemoryRepo {
        async fn get_settings(&self) -> Result<Settings> {
            if self.broken {
                return Err(Error::Other("database is gone".to_string()));
            }
            Ok(self.stored.lock().clone().unwrap_or_default())
        }

        async fn update_settings(&self, settings: &Settings) -> Result<()> {
            if self.broken {
                return Err(Error::Other("database is gone".to_string()));
            }
            *self.stored.lock() = Some(settings.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_broken_repository_degrades_to_defaults() {
        let service = ConfigService::load(Arc::new(MemoryRepo {
            broken: true,
            ..Default::default()
        }))
        .await;

        assert_eq!(service.settings(), Settings::default());
        assert!(service.refresh().await.is_err());
        assert_eq!(service.default_crf(), 23);
    }

    #[tokio::test]
    async fn test_update_refreshes_cache() {
        let repo = Arc::new(MemoryRepo::default());
        let service = ConfigService::load(repo.clone()).await;

        let updated = service
            .apply(SettingsUpdate {
                proxy_url: Some(" socks5://127.0.0.1:1080 ".to_string()),
                default_crf: Some(28),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(updated.proxy_url, "socks5://127.0.0.1:1080");
        assert_eq!(service.proxy_url(), "socks5://127.0.0.1:1080");
        assert_eq!(service.default_crf(), 28);
        assert_eq!(repo.stored.lock().as_ref().unwrap().default_crf, 28);
    }

    #[tokio::test]
    async fn test_invalid_update_leaves_cache_alone() {
        let service = ConfigService::load(Arc::new(MemoryRepo::default())).await;

        let err = service
            .apply(SettingsUpdate {
                default_crf: Some(99),
                ..Default::default()
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(service.default_crf(), 23);
    }

    #[test]
    fn test_empty_update() {
        assert!(SettingsUpdate::default().is_empty());
        let update = SettingsUpdate {
            theme: Some("light".to_string()),
            ..Default::default()
        };
        assert!(!update.is_empty());
        assert_eq!(update.apply(Settings::default()).theme, "light");
    }
}
