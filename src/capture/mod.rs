//! Frame sources: video files and still-image directories

pub mod frame;
pub mod image_dir;

#[cfg(feature = "gstreamer-pipeline")]
pub mod gst_video;

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::utils::MediaKind;
use crate::Settings;

pub use frame::Frame;
pub use image_dir::ImageDirSource;

#[cfg(feature = "gstreamer-pipeline")]
pub use gst_video::GstVideoSource;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to open {path}: {reason}")]
    Open { path: PathBuf, reason: String },
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("rewind failed: {0}")]
    Rewind(String),
    #[error("{0} input is not supported by this build")]
    Unsupported(&'static str),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One step of a source
#[derive(Debug)]
pub enum SourceItem {
    /// A decoded frame
    Frame(Frame),
    /// An input that could not be decoded and was passed over
    Skipped(PathBuf),
    /// The current pass is exhausted
    EndOfPass,
}

/// Something that decodes frames one at a time
pub trait FrameSource: Send {
    /// Frame rate reported by the media, if it has one
    fn native_fps(&self) -> Option<f64>;

    /// Decode the next item of the current pass
    fn next_item(&mut self) -> Result<SourceItem, SourceError>;

    /// Go back to the first frame
    fn rewind(&mut self) -> Result<(), SourceError>;

    /// File the last item came from, for status display
    fn origin(&self) -> Option<&Path> {
        None
    }
}

/// Open the source variant for `kind`
pub fn open_source(
    kind: MediaKind,
    path: &Path,
    settings: &Settings,
) -> Result<Box<dyn FrameSource>, SourceError> {
    let (width, height) = (settings.output.width, settings.output.height);
    match kind {
        MediaKind::Image => Ok(Box::new(ImageDirSource::open(path, width, height)?)),
        #[cfg(feature = "gstreamer-pipeline")]
        MediaKind::Video => Ok(Box::new(GstVideoSource::open(path, width, height)?)),
        #[cfg(not(feature = "gstreamer-pipeline"))]
        MediaKind::Video => Err(SourceError::Unsupported("video")),
    }
}
