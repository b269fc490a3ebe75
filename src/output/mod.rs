//! Virtual camera outputs

pub mod driver;
pub mod memory;

#[cfg(target_os = "linux")]
pub mod v4l2;

use thiserror::Error;
use tracing::{info, instrument};

use crate::{Frame, OutputConfig, SinkBackend};

pub use driver::DriverSink;
pub use memory::{MemorySink, NullSink, PublishedFrame};

#[cfg(target_os = "linux")]
pub use v4l2::V4l2LoopbackSink;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to load driver library {library}: {reason}")]
    Library { library: String, reason: String },
    #[error("driver library is missing symbol {0}")]
    MissingSymbol(&'static str),
    #[error("driver call {0} failed")]
    DriverCall(&'static str),
    #[error("no virtual camera device matched {0}")]
    NoDevice(String),
    #[error("invalid device pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("frame is {got_width}x{got_height}, device expects {width}x{height}")]
    Resolution {
        width: u32,
        height: u32,
        got_width: u32,
        got_height: u32,
    },
    #[error("frame buffer is shorter than stride * height")]
    Truncated,
    #[error("{0} output is not available on this platform")]
    Unsupported(&'static str),
    #[error("publish rejected: {0}")]
    Rejected(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Receives published frames for the virtual camera
pub trait OutputSink: Send {
    /// Copy one frame into the device
    fn publish(&mut self, frame: &Frame) -> Result<(), SinkError>;

    fn name(&self) -> &str;
}

/// Reject frames the device cannot take as-is
pub(crate) fn check_frame(frame: &Frame, width: u32, height: u32) -> Result<(), SinkError> {
    if frame.width != width || frame.height != height {
        return Err(SinkError::Resolution {
            width,
            height,
            got_width: frame.width,
            got_height: frame.height,
        });
    }
    if !frame.is_complete() {
        return Err(SinkError::Truncated);
    }
    Ok(())
}

/// Discover and bind the configured output
#[instrument(skip(config), fields(backend = ?config.backend))]
pub fn bind(config: &OutputConfig) -> Result<Box<dyn OutputSink>, SinkError> {
    let sink: Box<dyn OutputSink> = match config.backend {
        SinkBackend::Driver => Box::new(DriverSink::bind(config)?),
        #[cfg(target_os = "linux")]
        SinkBackend::V4l2 => Box::new(V4l2LoopbackSink::open(config)?),
        #[cfg(not(target_os = "linux"))]
        SinkBackend::V4l2 => return Err(SinkError::Unsupported("v4l2")),
        SinkBackend::Null => Box::new(NullSink::default()),
    };
    info!("Bound output {}", sink.name());
    Ok(sink)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Settings;

    #[test]
    fn null_backend_always_binds() {
        let mut config = Settings::default().output;
        config.backend = SinkBackend::Null;
        let mut sink = bind(&config).unwrap();
        assert_eq!(sink.name(), "null");
        assert!(sink.publish(&Frame::packed(vec![0u8; 3], 1, 1)).is_ok());
    }

    #[test]
    fn missing_driver_library_fails_to_bind() {
        let mut config = Settings::default().output;
        config.driver_library = "/nonexistent/vcam-driver-interface.so".into();
        assert!(matches!(bind(&config), Err(SinkError::Library { .. })));
    }

    #[test]
    fn check_frame_rejects_wrong_resolution() {
        let frame = Frame::packed(vec![0u8; 12], 2, 2);
        assert!(check_frame(&frame, 2, 2).is_ok());
        assert!(matches!(
            check_frame(&frame, 4, 2),
            Err(SinkError::Resolution { got_width: 2, .. })
        ));
    }
}
