//! ffmpeg / ffprobe command construction.

use std::path::Path;

use process_utils::{CommandSpec, run_capture};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Codec and quality settings for a re-encode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeOptions {
    pub video_codec: String,
    pub audio_codec: String,
    pub crf: u8,
}

/// Builds ffmpeg and ffprobe invocations.
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    ffmpeg: String,
    ffprobe: String,
}

impl Ffmpeg {
    pub fn new(ffmpeg: impl Into<String>, ffprobe: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    /// Re-encode `input` into `output`, overwriting it.
    ///
    /// Machine-readable progress goes to stdout (`-progress pipe:1`); the
    /// periodic stats line is disabled so stderr only carries diagnostics.
    pub fn transcode_command(
        &self,
        input: &Path,
        output: &Path,
        options: &TranscodeOptions,
    ) -> CommandSpec {
        CommandSpec::new(&self.ffmpeg)
            .args(["-y", "-hide_banner", "-nostats", "-i"])
            .arg(input.to_string_lossy())
            .arg("-c:v")
            .arg(&options.video_codec)
            .arg("-crf")
            .arg(options.crf.to_string())
            .arg("-c:a")
            .arg(&options.audio_codec)
            .args(["-progress", "pipe:1"])
            .arg(output.to_string_lossy())
    }

    pub fn probe_command(&self, input: &Path) -> CommandSpec {
        CommandSpec::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(input.to_string_lossy())
    }

    /// Media duration of `input` in seconds, or `0.0` if it cannot be probed.
    pub async fn probe_duration(&self, input: &Path, cancel: &CancellationToken) -> f64 {
        let spec = self.probe_command(input);
        match run_capture(&spec, cancel).await {
            Ok(output) => match parse_duration(&output.transcript) {
                Some(duration) => {
                    debug!(path = %input.display(), duration, "Probed media duration");
                    duration
                }
                None => {
                    warn!(
                        path = %input.display(),
                        output = %output.transcript.trim(),
                        "ffprobe returned no usable duration"
                    );
                    0.0
                }
            },
            Err(e) => {
                warn!(path = %input.display(), error = %e, "Failed to probe duration");
                0.0
            }
        }
    }
}

/// Last line that reads as a positive number of seconds.
///
/// The transcript interleaves stderr, so warnings such as `timescale not set`
/// may come before or after the value.
fn parse_duration(output: &str) -> Option<f64> {
    output
        .lines()
        .rev()
        .filter_map(|line| line.trim().parse::<f64>().ok())
        .find(|d| d.is_finite() && *d > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn options() -> TranscodeOptions {
        TranscodeOptions {
            video_codec: "libx264".to_string(),
            audio_codec: "aac".to_string(),
            crf: 23,
        }
    }

    #[test]
    fn test_transcode_command() {
        let spec = Ffmpeg::new("ffmpeg", "ffprobe").transcode_command(
            &PathBuf::from("downloads/abc.webm"),
            &PathBuf::from("downloads/abc_encoded.mp4"),
            &options(),
        );

        assert_eq!(spec.program(), "ffmpeg");
        assert_eq!(
            spec.get_args(),
            [
                "-y",
                "-hide_banner",
                "-nostats",
                "-i",
                "downloads/abc.webm",
                "-c:v",
                "libx264",
                "-crf",
                "23",
                "-c:a",
                "aac",
                "-progress",
                "pipe:1",
                "downloads/abc_encoded.mp4",
            ]
        );
    }

    #[test]
    fn test_probe_command() {
        let spec = Ffmpeg::new("ffmpeg", "/usr/bin/ffprobe").probe_command(&PathBuf::from("a.mp4"));
        assert_eq!(spec.program(), "/usr/bin/ffprobe");
        assert_eq!(spec.get_args().last().map(String::as_str), Some("a.mp4"));
        assert!(spec.get_args().contains(&"format=duration".to_string()));
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("12.480000\n"), Some(12.48));
        assert_eq!(parse_duration("\n  10\n"), Some(10.0));
        assert_eq!(parse_duration("N/A\n"), None);
        assert_eq!(parse_duration("0.000000\n"), None);
        assert_eq!(parse_duration(""), None);
    }

    #[test]
    fn test_parse_duration_skips_diagnostics() {
        assert_eq!(parse_duration("timescale not set\n10.000000\n"), Some(10.0));
        assert_eq!(
            parse_duration("10.000000\n[mov,mp4 @ 0x1] stream 1, missing mandatory atoms\n"),
            Some(10.0)
        );
        assert_eq!(parse_duration("timescale not set\nN/A\n"), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_duration_ignores_stderr_noise() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let script = dir.path().join("ffprobe");
        std::fs::write(
            &script,
            "#!/bin/sh\necho 'timescale not set' 1>&2\nsleep 0.2\necho 10.000000\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let ffmpeg = Ffmpeg::new("ffmpeg", script.to_string_lossy());
        let duration = ffmpeg
            .probe_duration(&dir.path().join("a.mp4"), &CancellationToken::new())
            .await;
        assert_eq!(duration, 10.0);
    }

    #[tokio::test]
    async fn test_duration_with_missing_binary_is_zero() {
        let ffmpeg = Ffmpeg::new("ffmpeg", "/nonexistent/vidra-ffprobe");
        let duration = ffmpeg
            .probe_duration(&PathBuf::from("a.mp4"), &CancellationToken::new())
            .await;
        assert_eq!(duration, 0.0);
    }
}
