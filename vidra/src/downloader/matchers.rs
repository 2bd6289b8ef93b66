//! Line matchers that pull progress out of yt-dlp and ffmpeg output.

use std::sync::LazyLock;

use process_utils::LineMatcher;
use regex::Regex;

use super::progress::clamp_percent;

static YTDLP_PROGRESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[download\]\s+(\d+(?:\.\d+)?)%\s+of\s+.*?\s+at\s+(.+?)\s+ETA\s+(.+)")
        .unwrap_or_else(|e| panic!("invalid yt-dlp progress regex: {e}"))
});

const FFMPEG_OUT_TIME_KEY: &str = "out_time_ms=";

/// Download progress reported by one yt-dlp line.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadProgress {
    pub percent: f64,
    pub speed: String,
    pub eta: String,
}

/// Matches `[download]  42.5% of 10.00MiB at 1.20MiB/s ETA 00:08`.
#[derive(Debug, Clone, Copy, Default)]
pub struct YtDlpProgressMatcher;

impl LineMatcher for YtDlpProgressMatcher {
    type Output = DownloadProgress;

    fn match_line(&self, line: &str) -> Option<DownloadProgress> {
        let caps = YTDLP_PROGRESS_RE.captures(line)?;
        let percent = caps.get(1)?.as_str().parse::<f64>().ok()?;

        Some(DownloadProgress {
            percent: clamp_percent(percent),
            speed: caps.get(2)?.as_str().trim().to_string(),
            eta: caps.get(3)?.as_str().trim().to_string(),
        })
    }
}

/// Turns ffmpeg `-progress` output into an encoding percentage.
///
/// ffmpeg reports `out_time_ms` in microseconds despite the name.
#[derive(Debug, Clone, Copy)]
pub struct FfmpegProgressMatcher {
    duration_secs: f64,
}

impl FfmpegProgressMatcher {
    pub fn new(duration_secs: f64) -> Self {
        Self { duration_secs }
    }
}

impl LineMatcher for FfmpegProgressMatcher {
    type Output = f64;

    fn match_line(&self, line: &str) -> Option<f64> {
        if !(self.duration_secs > 0.0) {
            return None;
        }

        let value = line.trim().strip_prefix(FFMPEG_OUT_TIME_KEY)?;
        let micros = value.trim().parse::<f64>().ok()?;
        if !micros.is_finite() {
            return None;
        }

        Some(clamp_percent(micros / 1_000_000.0 / self.duration_secs * 100.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ytdlp_progress_line() {
        let progress = YtDlpProgressMatcher
            .match_line("[download]  42.5% of 10.00MiB at 1.20MiB/s ETA 00:08")
            .unwrap();

        assert_eq!(
            progress,
            DownloadProgress {
                percent: 42.5,
                speed: "1.20MiB/s".to_string(),
                eta: "00:08".to_string(),
            }
        );
    }

    #[test]
    fn test_ytdlp_estimated_size_and_unknown_speed() {
        let progress = YtDlpProgressMatcher
            .match_line("[download]   3.0% of ~ 120.50MiB at  Unknown B/s ETA Unknown")
            .unwrap();

        assert_eq!(progress.percent, 3.0);
        assert_eq!(progress.speed, "Unknown B/s");
        assert_eq!(progress.eta, "Unknown");
    }

    #[test]
    fn test_ytdlp_non_progress_lines() {
        for line in [
            "[youtube] Extracting URL",
            "[download] Destination: downloads/abc.mp4",
            "[download] 100% of 10.00MiB in 00:00:05",
            "",
        ] {
            assert!(YtDlpProgressMatcher.match_line(line).is_none(), "{line}");
        }
    }

    #[test]
    fn test_ffmpeg_progress_line() {
        let matcher = FfmpegProgressMatcher::new(10.0);
        assert_eq!(matcher.match_line("out_time_ms=5000000"), Some(50.0));
        assert_eq!(matcher.match_line("out_time_ms=0"), Some(0.0));
    }

    #[test]
    fn test_ffmpeg_progress_is_clamped() {
        let matcher = FfmpegProgressMatcher::new(10.0);
        assert_eq!(matcher.match_line("out_time_ms=25000000"), Some(100.0));
        assert_eq!(matcher.match_line("out_time_ms=-100"), Some(0.0));
    }

    #[test]
    fn test_ffmpeg_without_duration_reports_nothing() {
        assert!(FfmpegProgressMatcher::new(0.0)
            .match_line("out_time_ms=5000000")
            .is_none());
        assert!(FfmpegProgressMatcher::new(f64::NAN)
            .match_line("out_time_ms=5000000")
            .is_none());
    }

    #[test]
    fn test_ffmpeg_other_keys_and_na() {
        let matcher = FfmpegProgressMatcher::new(10.0);
        assert!(matcher.match_line("out_time_ms=N/A").is_none());
        assert!(matcher.match_line("out_time=00:00:05.000000").is_none());
        assert!(matcher.match_line("progress=continue").is_none());
    }
}
