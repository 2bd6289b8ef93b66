//! Files a task leaves in the downloads directory.
//!
//! While a task runs every file it owns is named after the task id
//! (`<id>.<ext>`, `<id>_encoded.mp4`), so concurrent tasks sharing one
//! directory never touch each other's files. Only the final rename moves
//! files to their user-facing names.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::ytdlp::THUMBNAIL_FORMAT;
use crate::utils::fs::remove_file_if_exists;

/// Extensions that never count as the downloaded media file.
const THUMBNAIL_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];
const PARTIAL_EXTENSIONS: &[&str] = &["part", "ytdl"];

/// Why no media file could be picked after a download.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Downloaded file not found in downloads directory")]
    NotFound,

    #[error("Downloaded video file not found in downloads directory (only found thumbnails)")]
    OnlyThumbnails,

    #[error("Failed to read downloads directory {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// `<dir>/<id>.%(ext)s`, the yt-dlp output template for a task.
pub fn temp_output_template(dir: &Path, id: Uuid) -> PathBuf {
    dir.join(format!("{id}.%(ext)s"))
}

/// `<dir>/<id>_encoded.mp4`, where the re-encode is written before the final rename.
pub fn encode_temp_path(dir: &Path, id: Uuid) -> PathBuf {
    dir.join(format!("{id}_encoded.mp4"))
}

/// Lowercased last extension of `name`.
fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
}

fn is_thumbnail(name: &str) -> bool {
    extension_of(name).is_some_and(|ext| THUMBNAIL_EXTENSIONS.contains(&ext.as_str()))
}

fn is_partial(name: &str) -> bool {
    extension_of(name).is_some_and(|ext| PARTIAL_EXTENSIONS.contains(&ext.as_str()))
}

/// All `<id>.*` entries in `dir`, sorted by name.
async fn task_files(dir: &Path, id: Uuid) -> std::io::Result<Vec<(String, PathBuf)>> {
    let prefix = format!("{id}.");
    let mut matches = Vec::new();

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(matches),
        Err(e) => return Err(e),
    };

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(&prefix) {
            matches.push((name, entry.path()));
        }
    }

    matches.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(matches)
}

/// Pick the media file a download produced.
///
/// Thumbnails and partial downloads are skipped. When several candidates
/// remain the lexicographically first one wins.
pub async fn discover_artifact(dir: &Path, id: Uuid) -> Result<PathBuf, DiscoveryError> {
    let files = task_files(dir, id)
        .await
        .map_err(|source| DiscoveryError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

    if let Some((name, path)) = files
        .iter()
        .find(|(name, _)| !is_thumbnail(name) && !is_partial(name))
    {
        debug!(task_id = %id, file = %name, "Found downloaded file");
        return Ok(path.clone());
    }

    if files.iter().any(|(name, _)| is_thumbnail(name)) {
        Err(DiscoveryError::OnlyThumbnails)
    } else {
        Err(DiscoveryError::NotFound)
    }
}

/// Move `<id>.jpg` to `<base>.jpg`.
///
/// Returns the new file name, or `None` if there was no thumbnail or it
/// could not be moved.
pub async fn relocate_thumbnail(dir: &Path, id: Uuid, base_name: &str) -> Option<String> {
    let source = dir.join(format!("{id}.{THUMBNAIL_FORMAT}"));
    let file_name = format!("{base_name}.{THUMBNAIL_FORMAT}");
    let target = dir.join(&file_name);

    match tokio::fs::try_exists(&source).await {
        Ok(true) => {}
        Ok(false) => {
            warn!(task_id = %id, path = %source.display(), "Thumbnail not found");
            return None;
        }
        Err(e) => {
            warn!(task_id = %id, path = %source.display(), error = %e, "Failed to check thumbnail");
            return None;
        }
    }

    match tokio::fs::rename(&source, &target).await {
        Ok(()) => {
            debug!(task_id = %id, thumbnail = %file_name, "Thumbnail moved");
            Some(file_name)
        }
        Err(e) => {
            warn!(task_id = %id, error = %e, "Failed to rename thumbnail");
            None
        }
    }
}

/// Remove every `<id>.*` file still left in `dir`.
///
/// Returns how many files were removed. Failures are logged and skipped.
pub async fn cleanup_temp_files(dir: &Path, id: Uuid) -> usize {
    let files = match task_files(dir, id).await {
        Ok(files) => files,
        Err(e) => {
            warn!(task_id = %id, error = %e, "Failed to list temporary files");
            return 0;
        }
    };

    let mut removed = 0;
    for (name, path) in files {
        match remove_file_if_exists(&path).await {
            Ok(true) => {
                debug!(task_id = %id, file = %name, "Removed temporary file");
                removed += 1;
            }
            Ok(false) => {}
            Err(e) => warn!(task_id = %id, error = %e, "Failed to remove temporary file"),
        }
    }
    removed
}

/// Delete a finished video's media file and thumbnail. Missing files are ignored.
pub async fn remove_video_files(dir: &Path, file_name: Option<&str>, thumbnail: Option<&str>) {
    for name in [file_name, thumbnail].into_iter().flatten() {
        if name.is_empty() {
            continue;
        }
        // Stored names are bare file names; never follow one out of `dir`.
        if Path::new(name).file_name() != Some(std::ffi::OsStr::new(name)) {
            warn!(file = %name, "Refusing to delete file outside downloads directory");
            continue;
        }

        let path = dir.join(name);
        match remove_file_if_exists(&path).await {
            Ok(true) => info!(path = %path.display(), "Deleted file"),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "Failed to delete file"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), b"x").unwrap();
    }

    #[test]
    fn test_temp_paths() {
        let id = Uuid::new_v4();
        let dir = Path::new("downloads");
        assert_eq!(
            temp_output_template(dir, id),
            PathBuf::from(format!("downloads/{id}.%(ext)s"))
        );
        assert_eq!(
            encode_temp_path(dir, id),
            PathBuf::from(format!("downloads/{id}_encoded.mp4"))
        );
    }

    #[tokio::test]
    async fn test_discover_skips_thumbnails_and_partials() {
        let temp = TempDir::new().unwrap();
        let id = Uuid::new_v4();
        touch(temp.path(), &format!("{id}.jpg"));
        touch(temp.path(), &format!("{id}.f137.mp4.part"));
        touch(temp.path(), &format!("{id}.webm"));
        touch(temp.path(), &format!("{}.mp4", Uuid::new_v4()));

        let found = discover_artifact(temp.path(), id).await.unwrap();
        assert_eq!(found, temp.path().join(format!("{id}.webm")));
    }

    #[tokio::test]
    async fn test_discover_is_deterministic() {
        let temp = TempDir::new().unwrap();
        let id = Uuid::new_v4();
        touch(temp.path(), &format!("{id}.webm"));
        touch(temp.path(), &format!("{id}.mkv"));
        touch(temp.path(), &format!("{id}.mp4"));

        let found = discover_artifact(temp.path(), id).await.unwrap();
        assert_eq!(found, temp.path().join(format!("{id}.mkv")));
    }

    #[tokio::test]
    async fn test_discover_only_thumbnails() {
        let temp = TempDir::new().unwrap();
        let id = Uuid::new_v4();
        touch(temp.path(), &format!("{id}.jpg"));

        let err = discover_artifact(temp.path(), id).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::OnlyThumbnails));
    }

    #[tokio::test]
    async fn test_discover_nothing() {
        let temp = TempDir::new().unwrap();
        let id = Uuid::new_v4();
        touch(temp.path(), &format!("{id}_encoded.mp4"));
        touch(temp.path(), &format!("{id}.mp4.part"));

        let err = discover_artifact(temp.path(), id).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::NotFound));

        let missing = temp.path().join("missing");
        let err = discover_artifact(&missing, id).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::NotFound));
    }

    #[tokio::test]
    async fn test_relocate_thumbnail() {
        let temp = TempDir::new().unwrap();
        let id = Uuid::new_v4();
        touch(temp.path(), &format!("{id}.jpg"));

        let name = relocate_thumbnail(temp.path(), id, "My Video").await;
        assert_eq!(name.as_deref(), Some("My Video.jpg"));
        assert!(temp.path().join("My Video.jpg").exists());
        assert!(!temp.path().join(format!("{id}.jpg")).exists());

        assert!(relocate_thumbnail(temp.path(), id, "My Video").await.is_none());
    }

    #[tokio::test]
    async fn test_cleanup_only_touches_own_files() {
        let temp = TempDir::new().unwrap();
        let id = Uuid::new_v4();
        let other = Uuid::new_v4();
        touch(temp.path(), &format!("{id}.webp"));
        touch(temp.path(), &format!("{id}.mp4"));
        touch(temp.path(), &format!("{other}.mp4"));
        touch(temp.path(), "final.mp4");

        assert_eq!(cleanup_temp_files(temp.path(), id).await, 2);
        assert!(temp.path().join(format!("{other}.mp4")).exists());
        assert!(temp.path().join("final.mp4").exists());
    }

    #[tokio::test]
    async fn test_remove_video_files() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "a.mp4");
        touch(temp.path(), "a.jpg");

        remove_video_files(temp.path(), Some("a.mp4"), Some("a.jpg")).await;
        assert!(!temp.path().join("a.mp4").exists());
        assert!(!temp.path().join("a.jpg").exists());

        // Already gone, and traversal attempts, are ignored.
        remove_video_files(temp.path(), Some("a.mp4"), Some("../a.jpg")).await;
    }
}
