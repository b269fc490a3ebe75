//! End-to-end pipeline behaviour with a synthetic source and a recording sink

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use image::{Rgb, RgbImage};
use vcam::capture::{FrameSource, SourceError, SourceItem};
use vcam::output::MemorySink;
use vcam::pipeline::PipelineContext;
use vcam::{Frame, MediaKind, PlaybackHandle, Session, Settings};

fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.status.enabled = false;
    settings.output.width = 2;
    settings.output.height = 1;
    settings.pipeline.drain_poll_ms = 2;
    settings
}

/// Observations shared between a test and its source
#[derive(Default)]
struct Probe {
    ctx: OnceLock<Arc<PipelineContext>>,
    handle: OnceLock<PlaybackHandle>,
    /// (iteration, queue empty) at each rewind
    rewinds: Mutex<Vec<(u64, bool)>>,
    max_queue_len: AtomicUsize,
}

struct SyntheticSource {
    frames_per_pass: u64,
    emitted: u64,
    fps: Option<f64>,
    /// Turn looping off after this many rewinds
    stop_looping_after: Option<usize>,
    probe: Arc<Probe>,
}

impl SyntheticSource {
    fn new(frames_per_pass: u64, fps: Option<f64>, probe: &Arc<Probe>) -> Self {
        Self {
            frames_per_pass,
            emitted: 0,
            fps,
            stop_looping_after: None,
            probe: Arc::clone(probe),
        }
    }
}

impl FrameSource for SyntheticSource {
    fn native_fps(&self) -> Option<f64> {
        self.fps
    }

    fn next_item(&mut self) -> Result<SourceItem, SourceError> {
        if let Some(ctx) = self.probe.ctx.get() {
            self.probe
                .max_queue_len
                .fetch_max(ctx.queue.len(), Ordering::Relaxed);
        }
        if self.emitted == self.frames_per_pass {
            return Ok(SourceItem::EndOfPass);
        }
        self.emitted += 1;
        Ok(SourceItem::Frame(Frame::packed(vec![0u8; 6], 2, 1)))
    }

    fn rewind(&mut self) -> Result<(), SourceError> {
        let ctx = self.probe.ctx.get().expect("context registered");
        let mut rewinds = self.probe.rewinds.lock().unwrap();
        rewinds.push((ctx.iteration(), ctx.queue.is_empty()));

        if Some(rewinds.len()) == self.stop_looping_after {
            self.probe.handle.get().expect("handle registered").set_looping(false);
        }
        self.emitted = 0;
        Ok(())
    }
}

fn session(source: SyntheticSource, looping: bool, settings: &Settings) -> Session {
    let probe = Arc::clone(&source.probe);
    let session = Session::with_source(Box::new(source), looping, settings);
    let _ = probe.ctx.set(session.context());
    let _ = probe.handle.set(session.handle());
    session
}

#[test]
fn publishes_every_decoded_frame_in_order_then_terminates() {
    let probe = Arc::new(Probe::default());
    let sink = MemorySink::new();
    let session = session(
        SyntheticSource::new(20, Some(500.0), &probe),
        false,
        &test_settings(),
    );

    let report = session.run(Box::new(sink.clone())).unwrap();

    assert_eq!(report.decoded, 20);
    assert_eq!(report.published, 20);
    assert_eq!(report.iterations, 1);
    assert_eq!(sink.sequences(), (1..=20).collect::<Vec<u64>>());
    assert!(probe.ctx.get().unwrap().producer_finished());
    assert!(probe.ctx.get().unwrap().queue.is_empty());
}

#[test]
fn failed_publishes_are_dropped_and_counted() {
    let probe = Arc::new(Probe::default());
    let sink = MemorySink::new();
    sink.fail_next(3);
    let session = session(
        SyntheticSource::new(10, Some(500.0), &probe),
        false,
        &test_settings(),
    );

    let report = session.run(Box::new(sink.clone())).unwrap();

    assert_eq!(report.consumed, 10);
    assert_eq!(report.publish_failures, 3);
    assert_eq!(report.published, 7);
    assert!(report.published <= report.decoded);
    // the first three frames were lost, order of the rest is kept
    assert_eq!(sink.sequences(), (4..=10).collect::<Vec<u64>>());
}

#[test]
fn loop_restarts_only_after_queue_drains() {
    let probe = Arc::new(Probe::default());
    let sink = MemorySink::new();
    let mut source = SyntheticSource::new(5, Some(500.0), &probe);
    source.stop_looping_after = Some(3);
    let session = session(source, true, &test_settings());

    let report = session.run(Box::new(sink.clone())).unwrap();

    let rewinds = probe.rewinds.lock().unwrap().clone();
    assert_eq!(rewinds, vec![(1, true), (2, true), (3, true)]);
    assert_eq!(report.iterations, 4);
    assert_eq!(report.decoded, 20);
    assert_eq!(sink.sequences(), (1..=20).collect::<Vec<u64>>());
}

#[test]
fn stop_ends_both_workers_promptly() {
    let probe = Arc::new(Probe::default());
    let sink = MemorySink::new();
    let session = session(
        SyntheticSource::new(10_000, Some(30.0), &probe),
        true,
        &test_settings(),
    );
    let handle = session.handle();

    let worker = {
        let sink = sink.clone();
        thread::spawn(move || session.run(Box::new(sink)))
    };

    thread::sleep(Duration::from_millis(200));
    let stopped_at = Instant::now();
    let published_at_stop = sink.len();
    handle.stop();
    let report = worker.join().unwrap().unwrap();

    assert!(stopped_at.elapsed() < Duration::from_secs(1));
    assert!(handle.is_stopped());
    // frames were still queued, but at most an in-flight publish follows the stop
    assert!(report.decoded > report.consumed);
    assert!(published_at_stop > 0);
    assert!(
        sink.len() <= published_at_stop + 1,
        "{} published at stop, {} after",
        published_at_stop,
        sink.len()
    );
    assert_eq!(sink.len() as u64, report.published);
}

#[test]
fn paces_publishes_at_source_rate() {
    let probe = Arc::new(Probe::default());
    let sink = MemorySink::new();
    let session = session(
        SyntheticSource::new(40, Some(30.0), &probe),
        false,
        &test_settings(),
    );
    let target = Duration::from_secs_f64(1.0 / 30.0);
    assert_eq!(session.frame_duration(), target);

    session.run(Box::new(sink.clone())).unwrap();

    let frames = sink.frames();
    assert_eq!(frames.len(), 40);
    // skip warm-up; every steady interval stays within 2 ms of the period
    let steady = &frames[5..];
    let intervals: Vec<f64> = steady
        .windows(2)
        .map(|w| (w[1].at - w[0].at).as_secs_f64() * 1000.0)
        .collect();
    let target_ms = target.as_secs_f64() * 1000.0;
    for (i, interval) in intervals.iter().enumerate() {
        assert!(
            (interval - target_ms).abs() < 2.0,
            "interval {} was {:.3} ms",
            i,
            interval
        );
    }
    // no systematic shortening of the period
    let mean_ms = intervals.iter().sum::<f64>() / intervals.len() as f64;
    assert!(
        (mean_ms - target_ms).abs() < 0.5,
        "mean publish interval {:.3} ms",
        mean_ms
    );
}

#[test]
fn unknown_rate_falls_back_to_default() {
    let probe = Arc::new(Probe::default());
    let settings = test_settings();

    let session_a = session(SyntheticSource::new(1, None, &probe), false, &settings);
    assert_eq!(session_a.frame_duration(), Duration::from_secs_f64(1.0 / 30.0));

    let probe = Arc::new(Probe::default());
    let session_b = session(SyntheticSource::new(1, Some(0.0), &probe), false, &settings);
    assert_eq!(session_b.frame_duration(), Duration::from_secs_f64(1.0 / 30.0));
}

#[test]
fn producer_respects_queue_high_water_mark() {
    let probe = Arc::new(Probe::default());
    let sink = MemorySink::new();
    let mut settings = test_settings();
    settings.pipeline.max_queued_frames = Some(3);
    let session = session(SyntheticSource::new(12, Some(500.0), &probe), false, &settings);

    let report = session.run(Box::new(sink.clone())).unwrap();

    assert_eq!(report.published, 12);
    assert!(probe.max_queue_len.load(Ordering::Relaxed) <= 3);
}

#[test]
fn image_directory_plays_each_decodable_file_once() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["b.png", "a.png", "c.png"] {
        RgbImage::from_pixel(2, 1, Rgb([9, 9, 9]))
            .save(dir.path().join(name))
            .unwrap();
    }
    std::fs::write(dir.path().join("notes.txt"), b"skip me").unwrap();

    let mut settings = test_settings();
    settings.pipeline.default_fps = 200.0;
    let sink = MemorySink::new();
    let session = Session::open(MediaKind::Image, dir.path(), false, &settings).unwrap();

    let report = session.run(Box::new(sink.clone())).unwrap();

    assert_eq!(report.decoded, 3);
    assert_eq!(sink.sequences(), [1, 2, 3]);
    assert!(sink.frames().iter().all(|f| (f.width, f.height) == (2, 1)));
}

#[test]
fn empty_image_directory_does_not_loop_forever() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = test_settings();
    settings.pipeline.default_fps = 200.0;

    let session = Session::open(MediaKind::Image, dir.path(), true, &settings).unwrap();
    let report = session.run(Box::new(MemorySink::new())).unwrap();

    assert_eq!(report.decoded, 0);
    assert_eq!(report.iterations, 1);
}
