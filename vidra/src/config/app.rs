//! Process-level configuration read from the environment.

use std::path::PathBuf;
use std::time::Duration;

use crate::{Error, Result};

pub const DEFAULT_DATABASE_URL: &str = "sqlite:vidra.db?mode=rwc";
pub const DEFAULT_DOWNLOADS_DIR: &str = "downloads";
pub const DEFAULT_METADATA_TIMEOUT_SECS: u64 = 60;

/// Startup configuration. Changing it requires a restart; user-facing
/// options live in [`super::Settings`] instead.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub database_url: String,
    pub downloads_dir: PathBuf,
    pub ytdlp_path: String,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub log_dir: Option<PathBuf>,
    /// Upper bound on tasks running at once. `None` means unbounded.
    pub max_concurrent_tasks: Option<usize>,
    pub metadata_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            downloads_dir: PathBuf::from(DEFAULT_DOWNLOADS_DIR),
            ytdlp_path: "yt-dlp".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            log_dir: None,
            max_concurrent_tasks: None,
            metadata_timeout: Duration::from_secs(DEFAULT_METADATA_TIMEOUT_SECS),
        }
    }
}

impl AppConfig {
    /// Read configuration from the process environment.
    ///
    /// Call `dotenvy::dotenv()` first to pick up a `.env` file.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let defaults = Self::default();

        let max_concurrent_tasks = match get("MAX_CONCURRENT_TASKS") {
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(0) => None,
                Ok(n) => Some(n),
                Err(_) => {
                    return Err(Error::config(format!(
                        "MAX_CONCURRENT_TASKS must be a non-negative integer, got '{raw}'"
                    )));
                }
            },
            None => None,
        };

        let metadata_timeout = match get("METADATA_TIMEOUT_SECS") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .ok_or_else(|| {
                    Error::config(format!(
                        "METADATA_TIMEOUT_SECS must be a positive integer, got '{raw}'"
                    ))
                })?,
            None => defaults.metadata_timeout,
        };

        Ok(Self {
            database_url: get("DATABASE_URL").unwrap_or(defaults.database_url),
            downloads_dir: get("DOWNLOADS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.downloads_dir),
            ytdlp_path: get("YTDLP_PATH").unwrap_or(defaults.ytdlp_path),
            ffmpeg_path: get("FFMPEG_PATH").unwrap_or(defaults.ffmpeg_path),
            ffprobe_path: get("FFPROBE_PATH").unwrap_or(defaults.ffprobe_path),
            log_dir: get("LOG_DIR").map(PathBuf::from),
            max_concurrent_tasks,
            metadata_timeout,
        })
    }
}
