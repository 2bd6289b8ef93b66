//! yt-dlp command construction and metadata parsing.

use std::path::Path;

use process_utils::CommandSpec;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// Format selector used when the caller did not pick a format.
pub const DEFAULT_FORMAT: &str = "bestvideo+bestaudio/best";

/// Image format yt-dlp converts thumbnails to.
pub const THUMBNAIL_FORMAT: &str = "jpg";

/// Builds yt-dlp invocations.
#[derive(Debug, Clone)]
pub struct YtDlp {
    binary: String,
    proxy_url: String,
}

impl YtDlp {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            proxy_url: String::new(),
        }
    }

    /// Route every invocation through `proxy_url`. Empty means direct.
    pub fn with_proxy(mut self, proxy_url: impl Into<String>) -> Self {
        self.proxy_url = proxy_url.into();
        self
    }

    /// `<format>+bestaudio/best`, or [`DEFAULT_FORMAT`] when no format is set.
    pub fn format_selector(format_id: Option<&str>) -> String {
        match format_id.map(str::trim).filter(|f| !f.is_empty()) {
            Some(format) => format!("{format}+bestaudio/best"),
            None => DEFAULT_FORMAT.to_string(),
        }
    }

    /// Download `url` to `output_template`, writing a jpg thumbnail next to it.
    pub fn download_command(
        &self,
        url: &str,
        format_id: Option<&str>,
        output_template: &Path,
    ) -> CommandSpec {
        self.command()
            .arg("-f")
            .arg(Self::format_selector(format_id))
            .arg("-o")
            .arg(output_template.to_string_lossy())
            .args(["--newline", "--write-thumbnail", "--convert-thumbnails"])
            .arg(THUMBNAIL_FORMAT)
            .args(self.proxy_args())
            .arg(url)
    }

    pub fn metadata_command(&self, url: &str) -> CommandSpec {
        self.command()
            .args(["--dump-json", "--flat-playlist", "--no-warnings"])
            .args(self.proxy_args())
            .arg(url)
    }

    pub fn update_command(&self) -> CommandSpec {
        self.command().arg("-U").args(self.proxy_args())
    }

    fn command(&self) -> CommandSpec {
        CommandSpec::new(&self.binary)
    }

    fn proxy_args(&self) -> Vec<String> {
        if self.proxy_url.is_empty() {
            Vec::new()
        } else {
            vec!["--proxy".to_string(), self.proxy_url.clone()]
        }
    }
}

/// One downloadable format offered by the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoOption {
    pub format_id: String,
    pub extension: String,
    pub resolution: String,
    pub note: String,
    pub file_size: f64,
    pub vcodec: String,
    pub acodec: String,
}

/// Information about a remote video, as reported by `--dump-json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub title: String,
    pub description: String,
    pub duration: f64,
    pub thumbnail: String,
    pub options: Vec<VideoOption>,
}

impl VideoMetadata {
    /// Parse the first JSON object line of yt-dlp output.
    ///
    /// Other lines (warnings, progress noise) are skipped. Missing or
    /// mistyped fields fall back to empty values.
    pub fn from_output(output: &str) -> Result<Self> {
        let raw = output
            .lines()
            .map(str::trim)
            .filter(|line| line.starts_with('{'))
            .find_map(|line| serde_json::from_str::<Value>(line).ok())
            .ok_or_else(|| Error::Other("No JSON object in yt-dlp output".to_string()))?;

        let options = raw
            .get("formats")
            .and_then(Value::as_array)
            .map(|formats| {
                formats
                    .iter()
                    .filter(|f| f.is_object())
                    .map(|f| VideoOption {
                        format_id: string_field(f, "format_id"),
                        extension: string_field(f, "ext"),
                        resolution: string_field(f, "resolution"),
                        note: string_field(f, "format_note"),
                        file_size: number_field(f, "filesize"),
                        vcodec: string_field(f, "vcodec"),
                        acodec: string_field(f, "acodec"),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            title: string_field(&raw, "title"),
            description: string_field(&raw, "description"),
            duration: number_field(&raw, "duration"),
            thumbnail: string_field(&raw, "thumbnail"),
            options,
        })
    }
}

fn string_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn number_field(value: &Value, key: &str) -> f64 {
    value.get(key).and_then(Value::as_f64).unwrap_or_default()
}
