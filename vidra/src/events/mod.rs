//! Event fan-out for live progress and video lifecycle changes.
//!
//! Events are published through the [`EventPublisher`] trait. The default
//! implementation, [`EventBroadcaster`], is a tokio `broadcast` channel:
//! publishing never blocks, events with no subscriber are dropped and a
//! subscriber that falls behind skips the oldest events. Events for one task
//! are published from that task only, so their relative order is kept.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::database::models::VideoDbModel;
use crate::downloader::ProgressSnapshot;

/// Default channel capacity for published events.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Kind of a published event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum EventType {
    Progress,
    VideoCreated,
    VideoDeleted,
}

/// Progress of one task, as sent to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub id: Uuid,
    #[serde(flatten)]
    pub snapshot: ProgressSnapshot,
}

/// Events published by the application.
///
/// Serialized as `{"type": "...", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum VidraEvent {
    Progress(ProgressEvent),
    VideoCreated(VideoDbModel),
    VideoDeleted { id: Uuid },
}

impl VidraEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::Progress(_) => EventType::Progress,
            Self::VideoCreated(_) => EventType::VideoCreated,
            Self::VideoDeleted { .. } => EventType::VideoDeleted,
        }
    }

    /// Task or video id this event concerns.
    pub fn subject_id(&self) -> Option<Uuid> {
        match self {
            Self::Progress(event) => Some(event.id),
            Self::VideoCreated(video) => Uuid::parse_str(&video.id).ok(),
            Self::VideoDeleted { id } => Some(*id),
        }
    }
}

/// Sink for application events.
///
/// Implementations must not block the caller; delivery is best-effort.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: VidraEvent);
}

/// Broadcast-channel backed publisher.
#[derive(Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<VidraEvent>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to all events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<VidraEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl EventPublisher for EventBroadcaster {
    fn publish(&self, event: VidraEvent) {
        // Broadcast send is synchronous, ignore if no receivers
        let _ = self.sender.send(event);
    }
}
