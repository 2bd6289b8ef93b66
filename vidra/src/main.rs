use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use vidra::config::{AppConfig, ConfigProvider, SettingsUpdate};
use vidra::downloader::{DownloadStatus, ProgressSnapshot};
use vidra::events::VidraEvent;
use vidra::logging::{self, LoggingOptions};
use vidra::services::{CreateVideoRequest, ServiceContainer};

/// How long to wait for the final database write after a task ends.
const PERSIST_WAIT: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(author, version, about = "Download and re-encode online videos", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Download a video and follow its progress until it finishes
    Download {
        /// URL of the video page
        url: String,
        /// Base name of the final files
        #[arg(short, long)]
        name: String,
        /// yt-dlp format id (best video + best audio when omitted)
        #[arg(short, long)]
        format: Option<String>,
        /// Re-encode after downloading
        #[arg(long, conflicts_with = "no_re_encode")]
        re_encode: bool,
        /// Keep the downloaded file as is
        #[arg(long)]
        no_re_encode: bool,
    },
    /// Print title, duration and available formats as JSON
    Metadata {
        url: String,
    },
    /// Show or change settings
    Settings {
        /// Proxy URL for yt-dlp (empty string to disable)
        #[arg(long)]
        proxy: Option<String>,
        /// Re-encode by default
        #[arg(long)]
        re_encode: Option<bool>,
        #[arg(long)]
        video_codec: Option<String>,
        #[arg(long)]
        audio_codec: Option<String>,
        /// Constant rate factor, 0-51
        #[arg(long)]
        crf: Option<u8>,
        #[arg(long)]
        theme: Option<String>,
    },
    /// List stored videos
    List,
    /// Update yt-dlp to the latest release
    UpdateYtdlp,
    /// Show recorded errors of a video
    Errors {
        id: Uuid,
    },
    /// Delete a video and its files
    Delete {
        id: Uuid,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    dotenvy::dotenv().ok();
    let config = AppConfig::from_env().context("Invalid configuration")?;

    let _log_guard = logging::init_logging(LoggingOptions {
        log_dir: config.log_dir.clone(),
        default_filter: None,
    })?;
    let shutdown = CancellationToken::new();
    if let Some(dir) = &config.log_dir {
        logging::start_retention_cleanup(dir.clone(), shutdown.clone());
    }

    let container = ServiceContainer::new(config)
        .await
        .context("Failed to initialize services")?;

    let code = run(cli.command, &container).await;
    shutdown.cancel();
    container.pool.close().await;
    code
}

async fn run(command: Commands, container: &ServiceContainer) -> anyhow::Result<ExitCode> {
    match command {
        Commands::Download {
            url,
            name,
            format,
            re_encode,
            no_re_encode,
        } => {
            let re_encode = match (re_encode, no_re_encode) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            download(container, url, name, format, re_encode).await
        }
        Commands::Metadata { url } => {
            let metadata = container.video_service.fetch_metadata(&url).await?;
            println!("{}", serde_json::to_string_pretty(&metadata)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Settings {
            proxy,
            re_encode,
            video_codec,
            audio_codec,
            crf,
            theme,
        } => {
            let update = SettingsUpdate {
                proxy_url: proxy,
                default_re_encode: re_encode,
                default_video_codec: video_codec,
                default_audio_codec: audio_codec,
                default_crf: crf,
                theme,
            };
            let settings = if update.is_empty() {
                container.config_service.settings()
            } else {
                container.config_service.apply(update).await?
            };
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::List => {
            for video in container.video_service.list_videos().await? {
                println!(
                    "{}  {:<11}  {}  {}",
                    video.id,
                    video.download_status,
                    video.name,
                    video.file_name.as_deref().unwrap_or("-")
                );
            }
            let bytes = container.downloader.downloads_size().await?;
            println!("Downloads directory: {:.1} MiB", bytes as f64 / 1024.0 / 1024.0);
            Ok(ExitCode::SUCCESS)
        }
        Commands::UpdateYtdlp => {
            let output = container.downloader.update_ytdlp().await?;
            print!("{output}");
            Ok(ExitCode::SUCCESS)
        }
        Commands::Errors { id } => {
            let errors = container.video_service.list_errors(&id).await?;
            if errors.is_empty() {
                println!("No errors recorded for {id}");
            }
            for error in errors {
                println!("[{}] {}: {}", error.created_at, error.command, error.error_message);
                if !error.output.is_empty() {
                    println!("{}", error.output.trim_end());
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Delete { id } => {
            container.video_service.delete_video(&id).await?;
            println!("Deleted {id}");
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn download(
    container: &ServiceContainer,
    url: String,
    name: String,
    format_id: Option<String>,
    re_encode: Option<bool>,
) -> anyhow::Result<ExitCode> {
    // Subscribe first so no event of the new task is missed.
    let mut events = container.event_broadcaster.subscribe();

    let video = container
        .video_service
        .create_video(CreateVideoRequest {
            name,
            url,
            format_id,
            re_encode,
        })
        .await?;
    let id = Uuid::parse_str(&video.id)?;
    println!("Started {id}");

    let mut last_line = String::new();
    let status = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, cancelling download");
                container.downloader.cancel(&id);
            }
            event = events.recv() => match event {
                Ok(VidraEvent::Progress(event)) if event.id == id => {
                    print_progress(&event.snapshot, &mut last_line);
                    if event.snapshot.status.is_terminal() {
                        break event.snapshot.status;
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Progress output fell behind");
                    if let Some(snapshot) = container.downloader.get_progress(&id)
                        && snapshot.status.is_terminal()
                    {
                        break snapshot.status;
                    }
                }
                Err(RecvError::Closed) => anyhow::bail!("Event channel closed"),
            }
        }
    };

    wait_for_record(container, &id).await;

    if status == DownloadStatus::Error {
        if let Some(snapshot) = container.downloader.get_progress(&id) {
            eprintln!("Download failed: {}", snapshot.last_output);
        }
        eprintln!("Run `vidra errors {id}` for details");
        return Ok(ExitCode::FAILURE);
    }

    let video = container.video_service.get_video(&id).await?;
    println!(
        "Saved {}",
        video.file_name.as_deref().unwrap_or("(unknown file)")
    );
    Ok(ExitCode::SUCCESS)
}

fn print_progress(snapshot: &ProgressSnapshot, last_line: &mut String) {
    let line = match snapshot.status {
        DownloadStatus::Downloading if !snapshot.speed.is_empty() => format!(
            "downloading {:>5.1}%  {}  ETA {}",
            snapshot.percent, snapshot.speed, snapshot.eta
        ),
        DownloadStatus::Encoding => format!("encoding {:>5.1}%", snapshot.encoding_percent),
        status => format!("{status}: {}", snapshot.last_output),
    };
    if *last_line != line {
        println!("{line}");
        *last_line = line;
    }
}

/// The pipeline writes the database after publishing its final event; give
/// that write a moment so the record is up to date before exiting.
async fn wait_for_record(container: &ServiceContainer, id: &Uuid) {
    let deadline = tokio::time::Instant::now() + PERSIST_WAIT;
    while tokio::time::Instant::now() < deadline {
        match container.video_service.get_video(id).await {
            Ok(video) if video.status().is_terminal() => return,
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "Failed to read video record");
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    info!("Timed out waiting for the video record to be updated");
}
