//! User-editable settings and the provider trait the pipeline reads them through.

use serde::{Deserialize, Serialize};

use crate::database::models::SettingsDbModel;
use crate::{Error, Result};

pub const DEFAULT_VIDEO_CODEC: &str = "libx264";
pub const DEFAULT_AUDIO_CODEC: &str = "aac";
pub const DEFAULT_CRF: u8 = 23;
pub const DEFAULT_THEME: &str = "dark";
/// Highest CRF accepted by x264/x265.
pub const MAX_CRF: u8 = 51;

/// Runtime settings stored in the single `settings` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Proxy passed to yt-dlp. Empty means no proxy.
    pub proxy_url: String,
    pub default_re_encode: bool,
    pub default_video_codec: String,
    pub default_audio_codec: String,
    pub default_crf: u8,
    pub theme: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            proxy_url: String::new(),
            default_re_encode: false,
            default_video_codec: DEFAULT_VIDEO_CODEC.to_string(),
            default_audio_codec: DEFAULT_AUDIO_CODEC.to_string(),
            default_crf: DEFAULT_CRF,
            theme: DEFAULT_THEME.to_string(),
        }
    }
}

impl Settings {
    /// Check values before they are stored.
    pub fn validate(&self) -> Result<()> {
        if self.default_crf > MAX_CRF {
            return Err(Error::validation(format!(
                "CRF must be between 0 and {MAX_CRF}, got {}",
                self.default_crf
            )));
        }
        if self.default_video_codec.trim().is_empty() {
            return Err(Error::validation("Video codec must not be empty"));
        }
        if self.default_audio_codec.trim().is_empty() {
            return Err(Error::validation("Audio codec must not be empty"));
        }
        let proxy = self.proxy_url.trim();
        if !proxy.is_empty() && url::Url::parse(proxy).is_err() {
            return Err(Error::validation(format!("Invalid proxy URL '{proxy}'")));
        }
        Ok(())
    }
}

impl From<SettingsDbModel> for Settings {
    fn from(row: SettingsDbModel) -> Self {
        Self {
            proxy_url: row.proxy_url,
            default_re_encode: row.default_re_encode,
            default_video_codec: row.default_video_codec,
            default_audio_codec: row.default_audio_codec,
            default_crf: u8::try_from(row.default_crf)
                .ok()
                .filter(|crf| *crf <= MAX_CRF)
                .unwrap_or(DEFAULT_CRF),
            theme: row.theme,
        }
    }
}

/// Read access to the current settings.
///
/// Implementations never fail; when settings cannot be loaded they answer
/// with defaults.
pub trait ConfigProvider: Send + Sync {
    fn settings(&self) -> Settings;

    fn proxy_url(&self) -> String {
        self.settings().proxy_url
    }

    fn default_re_encode(&self) -> bool {
        self.settings().default_re_encode
    }

    fn default_video_codec(&self) -> String {
        self.settings().default_video_codec
    }

    fn default_audio_codec(&self) -> String {
        self.settings().default_audio_codec
    }

    fn default_crf(&self) -> u8 {
        self.settings().default_crf
    }
}

/// Fixed settings, for tests and one-off CLI runs.
#[derive(Debug, Clone, Default)]
pub struct StaticConfig(pub Settings);

impl ConfigProvider for StaticConfig {
    fn settings(&self) -> Settings {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.proxy_url, "");
        assert!(!settings.default_re_encode);
        assert_eq!(settings.default_video_codec, "libx264");
        assert_eq!(settings.default_audio_codec, "aac");
        assert_eq!(settings.default_crf, 23);
        assert_eq!(settings.theme, "dark");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_json_field_names() {
        let json = serde_json::to_value(Settings::default()).unwrap();
        assert_eq!(json["proxyUrl"], "");
        assert_eq!(json["defaultReEncode"], false);
        assert_eq!(json["defaultVideoCodec"], "libx264");
        assert_eq!(json["defaultCrf"], 23);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let crf = Settings {
            default_crf: 52,
            ..Default::default()
        };
        assert!(crf.validate().is_err());

        let codec = Settings {
            default_audio_codec: " ".to_string(),
            ..Default::default()
        };
        assert!(codec.validate().is_err());

        let proxy = Settings {
            proxy_url: "not a proxy".to_string(),
            ..Default::default()
        };
        assert!(proxy.validate().is_err());

        let ok = Settings {
            proxy_url: "http://127.0.0.1:8080".to_string(),
            default_crf: 0,
            ..Default::default()
        };
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_out_of_range_crf_row_falls_back() {
        let row = SettingsDbModel {
            id: 1,
            proxy_url: String::new(),
            default_re_encode: true,
            default_video_codec: "libx265".to_string(),
            default_audio_codec: "opus".to_string(),
            default_crf: 300,
            theme: "light".to_string(),
        };
        let settings = Settings::from(row);
        assert_eq!(settings.default_crf, DEFAULT_CRF);
        assert!(settings.default_re_encode);
        assert_eq!(settings.default_video_codec, "libx265");
    }

    #[test]
    fn test_static_config() {
        let config = StaticConfig(Settings {
            proxy_url: "http://proxy:3128".to_string(),
            default_crf: 30,
            ..Default::default()
        });
        assert_eq!(config.proxy_url(), "http://proxy:3128");
        assert_eq!(config.default_crf(), 30);
        assert_eq!(config.default_video_codec(), "libx264");
    }
}
