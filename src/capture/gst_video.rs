//! GStreamer-based video file decoding

use std::path::{Path, PathBuf};
use std::time::Instant;

use bytes::Bytes;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use tracing::{debug, info, instrument, warn};

use super::frame::Frame;
use super::{FrameSource, SourceError, SourceItem};

/// Decodes a video file to BGR frames at the output resolution
pub struct GstVideoSource {
    path: PathBuf,
    pipeline: gst::Pipeline,
    appsink: gst_app::AppSink,
    fps: Option<f64>,
}

impl GstVideoSource {
    /// Build the decode pipeline and wait for it to preroll
    #[instrument]
    pub fn open(path: &Path, width: u32, height: u32) -> Result<Self, SourceError> {
        let open_err = |reason: String| SourceError::Open {
            path: path.to_path_buf(),
            reason,
        };

        gst::init().map_err(|e| open_err(format!("failed to initialize GStreamer: {}", e)))?;

        let pipeline_str = Self::build_pipeline_string(path, width, height);
        debug!("Pipeline: {}", pipeline_str);

        let pipeline = gst::parse::launch(&pipeline_str)
            .map_err(|e| open_err(e.to_string()))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| open_err("failed to create pipeline".into()))?;

        let appsink = pipeline
            .by_name("appsink")
            .ok_or_else(|| open_err("failed to find appsink element".into()))?
            .downcast::<gst_app::AppSink>()
            .map_err(|_| open_err("failed to cast to AppSink".into()))?;

        // Keep every frame and let the producer pull as fast as it wants
        appsink.set_property("emit-signals", false);
        appsink.set_property("max-buffers", 4u32);
        appsink.set_property("drop", false);
        appsink.set_property("sync", false);

        let mut source = Self {
            path: path.to_path_buf(),
            pipeline,
            appsink,
            fps: None,
        };
        source.start()?;
        source.fps = source.probe_fps();
        info!("Opened {} ({:?} fps)", path.display(), source.fps);

        Ok(source)
    }

    fn build_pipeline_string(path: &Path, width: u32, height: u32) -> String {
        let location = path.to_string_lossy().replace('\\', "/").replace('"', "\\\"");
        format!(
            "filesrc location=\"{}\" ! \
             decodebin ! \
             videoconvert ! \
             videoscale ! \
             video/x-raw,format=BGR,width={},height={} ! \
             appsink name=appsink",
            location, width, height
        )
    }

    fn start(&mut self) -> Result<(), SourceError> {
        self.pipeline
            .set_state(gst::State::Paused)
            .map_err(|e| self.open_error(format!("failed to preroll: {:?}", e)))?;

        // Preroll surfaces demux and decoder errors before playback starts
        let (state_change, _, _) = self.pipeline.state(Some(gst::ClockTime::from_seconds(5)));
        match state_change {
            Ok(gst::StateChangeSuccess::Success) | Ok(gst::StateChangeSuccess::NoPreroll) => {}
            Ok(gst::StateChangeSuccess::Async) => {
                warn!("Pipeline still prerolling after 5s, continuing");
            }
            Err(_) => {
                let reason = self
                    .bus_error()
                    .unwrap_or_else(|| "failed to preroll".into());
                let _ = self.pipeline.set_state(gst::State::Null);
                return Err(self.open_error(reason));
            }
        }

        self.pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| self.open_error(format!("failed to start pipeline: {:?}", e)))?;
        Ok(())
    }

    fn open_error(&self, reason: String) -> SourceError {
        SourceError::Open {
            path: self.path.clone(),
            reason,
        }
    }

    fn bus_error(&self) -> Option<String> {
        let bus = self.pipeline.bus()?;
        bus.pop_filtered(&[gst::MessageType::Error])
            .and_then(|msg| match msg.view() {
                gst::MessageView::Error(err) => Some(err.error().to_string()),
                _ => None,
            })
    }

    /// Frame rate from the negotiated caps
    fn probe_fps(&self) -> Option<f64> {
        let caps = self.appsink.static_pad("sink")?.current_caps()?;
        let info = gst_video::VideoInfo::from_caps(&caps).ok()?;
        let fps = info.fps();
        if fps.numer() <= 0 || fps.denom() <= 0 {
            return None;
        }
        Some(fps.numer() as f64 / fps.denom() as f64)
    }
}

impl FrameSource for GstVideoSource {
    fn native_fps(&self) -> Option<f64> {
        self.fps
    }

    fn next_item(&mut self) -> Result<SourceItem, SourceError> {
        // EOS and pull errors both end the pass
        let sample = match self.appsink.pull_sample() {
            Ok(sample) => sample,
            Err(_) => return Ok(SourceItem::EndOfPass),
        };

        let buffer = sample
            .buffer()
            .ok_or_else(|| SourceError::Decode("sample contains no buffer".into()))?;
        let caps = sample
            .caps()
            .ok_or_else(|| SourceError::Decode("sample has no caps".into()))?;
        let info = gst_video::VideoInfo::from_caps(caps)
            .map_err(|_| SourceError::Decode("failed to parse video info from caps".into()))?;

        let map = buffer
            .map_readable()
            .map_err(|_| SourceError::Decode("failed to map buffer".into()))?;

        // The decoder recycles its buffers, so take a copy
        let data = Bytes::copy_from_slice(map.as_slice());
        let stride = info.stride().first().copied().unwrap_or(0).max(0) as u32;

        Ok(SourceItem::Frame(Frame {
            data,
            width: info.width(),
            height: info.height(),
            stride,
            sequence: 0,
            timestamp: Instant::now(),
        }))
    }

    fn rewind(&mut self) -> Result<(), SourceError> {
        self.pipeline
            .seek_simple(
                gst::SeekFlags::FLUSH | gst::SeekFlags::KEY_UNIT,
                gst::ClockTime::ZERO,
            )
            .map_err(|e| SourceError::Rewind(e.to_string()))?;
        debug!("Rewound {}", self.path.display());
        Ok(())
    }

    fn origin(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

impl Drop for GstVideoSource {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Encoder and muxer pairs that decodebin reads back, in order of preference
    const CLIP_FORMATS: &[(&str, &str, &str)] = &[
        ("jpegenc", "avimux", "avi"),
        ("vp8enc", "webmmux", "webm"),
        ("x264enc", "mp4mux", "mp4"),
    ];

    fn has_elements(names: &[&str]) -> bool {
        names.iter().all(|n| gst::ElementFactory::find(n).is_some())
    }

    /// Render a short 25 fps clip, or None when no usable plugins are installed
    fn render_clip(dir: &Path, frames: u32) -> Option<PathBuf> {
        gst::init().ok()?;
        if !has_elements(&["videotestsrc", "videoconvert", "filesink", "decodebin", "appsink"]) {
            return None;
        }
        let (encoder, muxer, ext) = CLIP_FORMATS
            .iter()
            .find(|(enc, mux, _)| has_elements(&[*enc, *mux]))?;

        let path = dir.join(format!("clip.{}", ext));
        let description = format!(
            "videotestsrc num-buffers={} ! \
             video/x-raw,width=64,height=48,framerate=25/1 ! \
             videoconvert ! {} ! {} ! filesink location=\"{}\"",
            frames,
            encoder,
            muxer,
            path.display()
        );
        let pipeline = gst::parse::launch(&description).ok()?;
        pipeline.set_state(gst::State::Playing).ok()?;

        let bus = pipeline.bus()?;
        let done = bus.timed_pop_filtered(
            gst::ClockTime::from_seconds(10),
            &[gst::MessageType::Eos, gst::MessageType::Error],
        );
        let _ = pipeline.set_state(gst::State::Null);
        match done?.view() {
            gst::MessageView::Eos(_) => Some(path),
            _ => None,
        }
    }

    fn drain_pass(source: &mut GstVideoSource) -> Vec<Frame> {
        let mut frames = Vec::new();
        loop {
            match source.next_item().unwrap() {
                SourceItem::Frame(frame) => frames.push(frame),
                SourceItem::EndOfPass => return frames,
                SourceItem::Skipped(path) => panic!("unexpected skip of {}", path.display()),
            }
        }
    }

    #[test]
    fn decodes_clip_and_rewinds_to_first_frame() {
        let dir = tempfile::tempdir().unwrap();
        let Some(clip) = render_clip(dir.path(), 10) else {
            eprintln!("skipping: no GStreamer encoder/muxer available to render a clip");
            return;
        };

        let mut source = GstVideoSource::open(&clip, 32, 24).unwrap();
        let fps = source.native_fps().expect("clip carries a frame rate");
        assert!((fps - 25.0).abs() < 0.01, "fps was {}", fps);
        assert_eq!(source.origin(), Some(clip.as_path()));

        let first = drain_pass(&mut source);
        assert_eq!(first.len(), 10);
        for frame in &first {
            assert_eq!((frame.width, frame.height), (32, 24));
            assert!(frame.stride >= frame.width * 3);
            assert!(frame.is_complete());
        }
        // the pass stays ended until rewound
        assert!(matches!(source.next_item().unwrap(), SourceItem::EndOfPass));

        source.rewind().unwrap();
        let second = drain_pass(&mut source);
        assert_eq!(second.len(), 10);
        assert_eq!(second[0].data, first[0].data);
    }

    #[test]
    fn missing_file_fails_to_open() {
        if gst::init().is_err() || !has_elements(&["filesrc", "decodebin", "appsink"]) {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let result = GstVideoSource::open(&dir.path().join("absent.avi"), 32, 24);
        assert!(matches!(result, Err(SourceError::Open { .. })));
    }
}
