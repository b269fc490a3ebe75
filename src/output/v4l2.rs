//! v4l2loopback output
//!
//! Needs the `v4l2loopback` module loaded, e.g.
//! `modprobe v4l2loopback devices=1 video_nr=10 card_label="vcam" exclusive_caps=1`.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use tracing::{info, instrument, warn};
use v4l::video::Output;
use v4l::{Device, FourCC};

use super::{check_frame, OutputSink, SinkError};
use crate::{Frame, OutputConfig};

/// Writes packed BGR24 frames to a loopback device
pub struct V4l2LoopbackSink {
    path: PathBuf,
    file: File,
    width: u32,
    height: u32,
    scratch: Vec<u8>,
}

impl V4l2LoopbackSink {
    #[instrument(skip(config), fields(device = %config.v4l2_device))]
    pub fn open(config: &OutputConfig) -> Result<Self, SinkError> {
        let path = PathBuf::from(&config.v4l2_device);
        if !path.exists() {
            return Err(SinkError::NoDevice(config.v4l2_device.clone()));
        }

        let device = Device::with_path(&path)?;
        let mut fmt = Output::format(&device)?;
        fmt.width = config.width;
        fmt.height = config.height;
        fmt.fourcc = FourCC::new(b"BGR3");
        fmt.stride = config.width * 3;
        fmt.size = config.width * config.height * 3;

        match Output::set_format(&device, &fmt) {
            Ok(actual) if actual.fourcc != fmt.fourcc => {
                warn!("Device negotiated {} instead of BGR3", actual.fourcc);
            }
            Ok(_) => {}
            // Some loopback configurations only accept the format through write()
            Err(e) => warn!("Could not set output format (may still work): {}", e),
        }

        let file = OpenOptions::new().write(true).open(&path)?;
        info!(
            "Opened loopback device {} ({}x{} BGR3)",
            path.display(),
            config.width,
            config.height
        );

        Ok(Self {
            path,
            file,
            width: config.width,
            height: config.height,
            scratch: Vec::with_capacity((config.width * config.height * 3) as usize),
        })
    }
}

impl OutputSink for V4l2LoopbackSink {
    fn publish(&mut self, frame: &Frame) -> Result<(), SinkError> {
        check_frame(frame, self.width, self.height)?;

        if frame.stride as usize == frame.row_bytes() {
            let len = frame.row_bytes() * frame.height as usize;
            self.file.write_all(&frame.data[..len])?;
        } else {
            // Strip row padding, the device takes packed rows
            self.scratch.clear();
            for row in frame.rows() {
                self.scratch.extend_from_slice(row);
            }
            self.file.write_all(&self.scratch)?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "v4l2"
    }
}

impl std::fmt::Debug for V4l2LoopbackSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("V4l2LoopbackSink")
            .field("path", &self.path)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}
