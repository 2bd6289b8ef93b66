//! Live progress of a single download task.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::events::{EventPublisher, ProgressEvent, VidraEvent};

/// Pipeline stage of a download task.
///
/// `Finished` is stored and sent over the wire as `completed`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DownloadStatus {
    #[default]
    Pending,
    Downloading,
    Encoding,
    #[serde(rename = "completed")]
    #[strum(serialize = "completed")]
    Finished,
    Error,
}

impl DownloadStatus {
    /// Position in the pipeline order. Both terminal states share the last rank.
    pub fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Downloading => 1,
            Self::Encoding => 2,
            Self::Finished | Self::Error => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Error)
    }

    /// Whether a task in `self` may move to `next`.
    ///
    /// Staying in the same non-terminal stage is allowed (progress ticks).
    /// Nothing leaves a terminal state.
    pub fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == Self::Error || next.rank() >= self.rank()
    }
}

/// Point-in-time copy of a task's progress.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub percent: f64,
    #[serde(rename = "encodingPercent")]
    pub encoding_percent: f64,
    pub speed: String,
    pub eta: String,
    pub status: DownloadStatus,
    pub last_output: String,
}

impl ProgressSnapshot {
    pub fn new(status: DownloadStatus) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    pub fn with_percent(mut self, percent: f64) -> Self {
        self.percent = percent;
        self
    }

    pub fn with_encoding_percent(mut self, percent: f64) -> Self {
        self.encoding_percent = percent;
        self
    }

    pub fn with_speed(mut self, speed: impl Into<String>) -> Self {
        self.speed = speed.into();
        self
    }

    pub fn with_eta(mut self, eta: impl Into<String>) -> Self {
        self.eta = eta.into();
        self
    }

    pub fn with_last_output(mut self, line: impl Into<String>) -> Self {
        self.last_output = line.into();
        self
    }

    fn clamped(mut self) -> Self {
        self.percent = clamp_percent(self.percent);
        self.encoding_percent = clamp_percent(self.encoding_percent);
        self
    }
}

/// Clamp a percentage into `[0, 100]`; NaN becomes 0.
pub fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

/// Mutable progress record shared between a task and its observers.
///
/// All fields are replaced together under one write lock, so readers never
/// see a mix of old and new values. Accepted updates are published while the
/// lock is still held, which keeps a task's events in update order.
pub struct ProgressState {
    id: Uuid,
    inner: RwLock<ProgressSnapshot>,
    publisher: Option<Arc<dyn EventPublisher>>,
}

impl ProgressState {
    /// A new `Pending` state.
    pub fn new(id: Uuid, publisher: Option<Arc<dyn EventPublisher>>) -> Self {
        Self {
            id,
            inner: RwLock::new(ProgressSnapshot::new(DownloadStatus::Pending)),
            publisher,
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.inner.read().clone()
    }

    pub fn status(&self) -> DownloadStatus {
        self.inner.read().status
    }

    /// Replace every field with `next`.
    ///
    /// Returns `false` (and changes nothing) when the status transition is
    /// not allowed.
    pub fn update(&self, next: ProgressSnapshot) -> bool {
        let next = next.clamped();
        let mut guard = self.inner.write();

        if !guard.status.can_transition_to(next.status) {
            debug!(
                task_id = %self.id,
                from = %guard.status,
                to = %next.status,
                "Ignoring progress update"
            );
            return false;
        }

        *guard = next;
        if let Some(publisher) = &self.publisher {
            publisher.publish(VidraEvent::Progress(ProgressEvent {
                id: self.id,
                snapshot: guard.clone(),
            }));
        }
        true
    }

    /// Record an output line without touching anything else.
    pub fn set_last_output(&self, line: &str) {
        let mut guard = self.inner.write();
        if !guard.status.is_terminal() {
            guard.last_output.clear();
            guard.last_output.push_str(line);
        }
    }

    /// Move to `Error`, keeping the percentages reached so far.
    pub fn fail(&self, message: impl Into<String>) -> bool {
        let current = self.snapshot();
        self.update(
            ProgressSnapshot::new(DownloadStatus::Error)
                .with_percent(current.percent)
                .with_encoding_percent(current.encoding_percent)
                .with_last_output(message),
        )
    }
}

impl std::fmt::Debug for ProgressState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressState")
            .field("id", &self.id)
            .field("progress", &*self.inner.read())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBroadcaster;
    use proptest::prelude::*;
    use std::str::FromStr;

    fn state() -> ProgressState {
        ProgressState::new(Uuid::new_v4(), None)
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(DownloadStatus::Finished.to_string(), "completed");
        assert_eq!(DownloadStatus::Encoding.as_ref(), "encoding");
        assert_eq!(
            DownloadStatus::from_str("completed").unwrap(),
            DownloadStatus::Finished
        );
        assert_eq!(
            serde_json::to_string(&DownloadStatus::Finished).unwrap(),
            "\"completed\""
        );
    }

    #[test]
    fn test_transitions() {
        use DownloadStatus::*;

        assert!(Pending.can_transition_to(Downloading));
        assert!(Downloading.can_transition_to(Downloading));
        assert!(Downloading.can_transition_to(Encoding));
        assert!(Encoding.can_transition_to(Finished));
        assert!(Pending.can_transition_to(Error));
        assert!(Encoding.can_transition_to(Error));

        assert!(!Encoding.can_transition_to(Downloading));
        assert!(!Downloading.can_transition_to(Pending));
        assert!(!Finished.can_transition_to(Error));
        assert!(!Error.can_transition_to(Finished));
        assert!(!Error.can_transition_to(Error));
    }

    #[test]
    fn test_new_state_is_pending() {
        let snapshot = state().snapshot();
        assert_eq!(snapshot.status, DownloadStatus::Pending);
        assert_eq!(snapshot.percent, 0.0);
        assert!(snapshot.last_output.is_empty());
    }

    #[test]
    fn test_update_replaces_all_fields() {
        let progress = state();
        assert!(progress.update(
            ProgressSnapshot::new(DownloadStatus::Downloading)
                .with_percent(42.5)
                .with_speed("1.20MiB/s")
                .with_eta("00:08")
                .with_last_output("[download] 42.5%"),
        ));

        let snapshot = progress.snapshot();
        assert_eq!(snapshot.percent, 42.5);
        assert_eq!(snapshot.speed, "1.20MiB/s");
        assert_eq!(snapshot.eta, "00:08");
        assert_eq!(snapshot.last_output, "[download] 42.5%");
    }

    #[test]
    fn test_regression_is_rejected() {
        let progress = state();
        assert!(progress.update(ProgressSnapshot::new(DownloadStatus::Encoding)));
        assert!(!progress.update(ProgressSnapshot::new(DownloadStatus::Downloading)));
        assert_eq!(progress.status(), DownloadStatus::Encoding);
    }

    #[test]
    fn test_terminal_state_is_frozen() {
        let progress = state();
        assert!(progress.update(
            ProgressSnapshot::new(DownloadStatus::Finished)
                .with_percent(100.0)
                .with_encoding_percent(100.0)
        ));

        assert!(!progress.fail("late failure"));
        progress.set_last_output("late line");

        let snapshot = progress.snapshot();
        assert_eq!(snapshot.status, DownloadStatus::Finished);
        assert!(snapshot.last_output.is_empty());
    }

    #[test]
    fn test_set_last_output_keeps_numbers() {
        let progress = state();
        progress.update(ProgressSnapshot::new(DownloadStatus::Downloading).with_percent(10.0));
        progress.set_last_output("[youtube] Extracting URL");

        let snapshot = progress.snapshot();
        assert_eq!(snapshot.last_output, "[youtube] Extracting URL");
        assert_eq!(snapshot.percent, 10.0);
        assert_eq!(snapshot.status, DownloadStatus::Downloading);
    }

    #[test]
    fn test_fail_keeps_percentages_and_clears_rate() {
        let progress = state();
        progress.update(
            ProgressSnapshot::new(DownloadStatus::Downloading)
                .with_percent(64.0)
                .with_speed("2MiB/s")
                .with_eta("00:01"),
        );

        assert!(progress.fail("Download failed"));
        let snapshot = progress.snapshot();
        assert_eq!(snapshot.status, DownloadStatus::Error);
        assert_eq!(snapshot.percent, 64.0);
        assert!(snapshot.speed.is_empty());
        assert!(snapshot.eta.is_empty());
        assert_eq!(snapshot.last_output, "Download failed");
    }

    #[tokio::test]
    async fn test_updates_are_published_in_order() {
        let broadcaster = Arc::new(EventBroadcaster::new());
        let mut rx = broadcaster.subscribe();
        let id = Uuid::new_v4();
        let progress = ProgressState::new(id, Some(broadcaster.clone()));

        for percent in [10.0, 20.0, 30.0] {
            progress.update(ProgressSnapshot::new(DownloadStatus::Downloading).with_percent(percent));
        }
        // Rejected and output-only changes are not published.
        progress.update(ProgressSnapshot::new(DownloadStatus::Pending));
        progress.set_last_output("noise");
        progress.update(ProgressSnapshot::new(DownloadStatus::Finished));

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            match event {
                VidraEvent::Progress(event) => {
                    assert_eq!(event.id, id);
                    seen.push((event.snapshot.status, event.snapshot.percent));
                }
                other => panic!("unexpected event {other:?}"),
            }
        }

        assert_eq!(
            seen,
            vec![
                (DownloadStatus::Downloading, 10.0),
                (DownloadStatus::Downloading, 20.0),
                (DownloadStatus::Downloading, 30.0),
                (DownloadStatus::Finished, 0.0),
            ]
        );
    }

    #[test]
    fn test_concurrent_updates_never_mix_fields() {
        let progress = Arc::new(state());
        let writers: Vec<_> = (0..4)
            .map(|n| {
                let progress = progress.clone();
                std::thread::spawn(move || {
                    for i in 0..500 {
                        let value = (n * 10 + i % 10) as f64;
                        progress.update(
                            ProgressSnapshot::new(DownloadStatus::Downloading)
                                .with_percent(value)
                                .with_encoding_percent(value)
                                .with_speed(value.to_string()),
                        );
                    }
                })
            })
            .collect();

        for _ in 0..2000 {
            let snapshot = progress.snapshot();
            assert_eq!(snapshot.percent, snapshot.encoding_percent);
            if snapshot.status == DownloadStatus::Downloading {
                assert_eq!(snapshot.speed, snapshot.percent.to_string());
            }
        }

        for writer in writers {
            writer.join().unwrap();
        }
    }

    proptest! {
        #[test]
        fn prop_percentages_always_clamped(percent in any::<f64>(), encoding in any::<f64>()) {
            let progress = state();
            progress.update(
                ProgressSnapshot::new(DownloadStatus::Encoding)
                    .with_percent(percent)
                    .with_encoding_percent(encoding),
            );
            let snapshot = progress.snapshot();
            prop_assert!((0.0..=100.0).contains(&snapshot.percent));
            prop_assert!((0.0..=100.0).contains(&snapshot.encoding_percent));
        }

        #[test]
        fn prop_status_never_regresses(steps in proptest::collection::vec(0u8..5, 1..20)) {
            let progress = state();
            let mut previous = progress.status();
            for step in steps {
                let next = match step {
                    0 => DownloadStatus::Pending,
                    1 => DownloadStatus::Downloading,
                    2 => DownloadStatus::Encoding,
                    3 => DownloadStatus::Finished,
                    _ => DownloadStatus::Error,
                };
                progress.update(ProgressSnapshot::new(next));
                let current = progress.status();
                prop_assert!(current == previous || previous.can_transition_to(current));
                previous = current;
            }
        }
    }
}
