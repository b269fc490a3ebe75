//! Still-image directory source
//!
//! Every regular file in the directory is a candidate frame. Files are played
//! in lexicographic path order; anything the `image` crate cannot decode is
//! skipped.

use std::path::{Path, PathBuf};
use std::time::Instant;

use bytes::Bytes;
use image::imageops::FilterType;
use tracing::{debug, info, instrument};

use super::frame::{Frame, BYTES_PER_PIXEL};
use super::{FrameSource, SourceError, SourceItem};

pub struct ImageDirSource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    cursor: usize,
    current: Option<PathBuf>,
    width: u32,
    height: u32,
}

impl ImageDirSource {
    #[instrument]
    pub fn open(dir: &Path, width: u32, height: u32) -> Result<Self, SourceError> {
        let files = scan(dir).map_err(|e| SourceError::Open {
            path: dir.to_path_buf(),
            reason: e.to_string(),
        })?;
        info!("Found {} candidate images in {}", files.len(), dir.display());

        Ok(Self {
            dir: dir.to_path_buf(),
            files,
            cursor: 0,
            current: None,
            width,
            height,
        })
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    fn decode(&self, path: &Path) -> Result<Frame, SourceError> {
        let image = image::open(path).map_err(|e| SourceError::Decode(e.to_string()))?;

        let image = if image.width() != self.width || image.height() != self.height {
            image.resize_exact(self.width, self.height, FilterType::Triangle)
        } else {
            image
        };

        let mut pixels = image.into_rgb8().into_raw();
        for px in pixels.chunks_exact_mut(BYTES_PER_PIXEL as usize) {
            px.swap(0, 2);
        }

        Ok(Frame {
            data: Bytes::from(pixels),
            width: self.width,
            height: self.height,
            stride: self.width * BYTES_PER_PIXEL,
            sequence: 0,
            timestamp: Instant::now(),
        })
    }
}

impl FrameSource for ImageDirSource {
    fn native_fps(&self) -> Option<f64> {
        None
    }

    fn next_item(&mut self) -> Result<SourceItem, SourceError> {
        let Some(path) = self.files.get(self.cursor).cloned() else {
            return Ok(SourceItem::EndOfPass);
        };
        self.cursor += 1;
        self.current = Some(path.clone());

        match self.decode(&path) {
            Ok(frame) => Ok(SourceItem::Frame(frame)),
            Err(e) => {
                debug!("Skipping {}: {}", path.display(), e);
                Ok(SourceItem::Skipped(path))
            }
        }
    }

    fn rewind(&mut self) -> Result<(), SourceError> {
        self.files = scan(&self.dir).map_err(|e| SourceError::Rewind(e.to_string()))?;
        self.cursor = 0;
        Ok(())
    }

    fn origin(&self) -> Option<&Path> {
        self.current.as_deref()
    }
}

/// Regular files in `dir`, sorted by path
fn scan(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}
