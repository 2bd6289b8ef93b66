//! Vidra: download remote media with yt-dlp, optionally re-encode it with
//! ffmpeg, and follow every task's progress live.

pub mod config;
pub mod database;
pub mod downloader;
pub mod error;
pub mod events;
pub mod logging;
pub mod services;
pub mod utils;

pub use error::{Error, Result};
