use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// What a media path points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaKind {
    /// A single video file
    Video,
    /// A directory of still images
    Image,
}

impl MediaKind {
    pub fn from_flag(flag: &str) -> Option<Self> {
        match flag {
            "-v" => Some(MediaKind::Video),
            "-i" => Some(MediaKind::Image),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum MediaPathError {
    #[error("media path does not exist: {0}")]
    Missing(PathBuf),
    #[error("video path is not a regular file: {0}")]
    NotAFile(PathBuf),
    #[error("image path is not a directory: {0}")]
    NotADirectory(PathBuf),
}

/// Check that `path` exists and has the shape `kind` needs
pub fn validate_media_path(kind: MediaKind, path: &Path) -> Result<PathBuf, MediaPathError> {
    if let Ok(cwd) = std::env::current_dir() {
        info!("Working directory: {}", cwd.display());
    }
    info!("Media path: {}", path.display());

    let meta = std::fs::metadata(path).map_err(|_| MediaPathError::Missing(path.to_path_buf()))?;
    match kind {
        MediaKind::Video if !meta.is_file() => Err(MediaPathError::NotAFile(path.to_path_buf())),
        MediaKind::Image if !meta.is_dir() => {
            Err(MediaPathError::NotADirectory(path.to_path_buf()))
        }
        _ => Ok(path.to_path_buf()),
    }
}

/// Sleep for `duration` with sub-millisecond accuracy
///
/// The OS sleep covers all but the last `spin_threshold`; the rest is spent
/// yielding until the deadline. Returns early once `stop` is set, checking it
/// at least every `stop_check`.
pub fn precise_sleep(
    duration: Duration,
    spin_threshold: Duration,
    stop_check: Duration,
    stop: &AtomicBool,
) {
    let deadline = Instant::now() + duration;
    let stop_check = stop_check.max(Duration::from_millis(1));

    loop {
        if stop.load(Ordering::Acquire) {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        let remaining = deadline - now;
        if remaining > spin_threshold {
            std::thread::sleep((remaining - spin_threshold).min(stop_check));
        } else {
            std::thread::yield_now();
        }
    }
}
