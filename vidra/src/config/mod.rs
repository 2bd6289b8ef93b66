//! Configuration: startup options from the environment and runtime
//! settings from the database.

mod app;
mod service;
mod settings;

pub use app::AppConfig;
pub use service::{ConfigService, SettingsUpdate};
pub use settings::{
    ConfigProvider, DEFAULT_AUDIO_CODEC, DEFAULT_CRF, DEFAULT_VIDEO_CODEC, MAX_CRF, Settings,
    StaticConfig,
};
