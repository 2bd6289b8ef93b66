//! Repository traits and their sqlx implementations.

pub mod settings;
pub mod video;

pub use settings::{SettingsRepository, SqlxSettingsRepository};
pub use video::{SqlxVideoRepository, VideoRepository};
