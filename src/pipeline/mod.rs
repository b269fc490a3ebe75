//! Producer/pacer frame pipeline

pub mod pacer;
pub mod producer;
pub mod queue;
pub mod status;

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::utils::CachePadded;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::capture::{self, FrameSource, SourceError};
use crate::output::OutputSink;
use crate::utils::MediaKind;
use crate::Settings;

pub use queue::FrameQueue;
pub use status::StatusEvent;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("failed to spawn {0} thread: {1}")]
    Spawn(&'static str, #[source] std::io::Error),
    #[error("{0} thread panicked")]
    WorkerPanicked(&'static str),
}

/// State shared by the producer and the pacer for one session
pub struct PipelineContext {
    pub queue: FrameQueue,
    stop: AtomicBool,
    loop_enabled: AtomicBool,
    producer_finished: AtomicBool,
    frame_duration: Duration,
    counters: CachePadded<Counters>,
    status: flume::Sender<StatusEvent>,
    settings: Settings,
}

#[derive(Default)]
struct Counters {
    decoded: AtomicU64,
    consumed: AtomicU64,
    published: AtomicU64,
    publish_failures: AtomicU64,
    iteration: AtomicU64,
}

impl PipelineContext {
    fn new(
        frame_duration: Duration,
        looping: bool,
        settings: &Settings,
        status: flume::Sender<StatusEvent>,
    ) -> Self {
        let counters = Counters::default();
        counters.iteration.store(1, Ordering::Relaxed);
        Self {
            queue: FrameQueue::new(),
            stop: AtomicBool::new(false),
            loop_enabled: AtomicBool::new(looping),
            producer_finished: AtomicBool::new(false),
            frame_duration,
            counters: CachePadded::new(counters),
            status,
            settings: settings.clone(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn frame_duration(&self) -> Duration {
        self.frame_duration
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub fn stop_flag(&self) -> &AtomicBool {
        &self.stop
    }

    pub fn is_looping(&self) -> bool {
        self.loop_enabled.load(Ordering::Acquire)
    }

    pub fn producer_finished(&self) -> bool {
        self.producer_finished.load(Ordering::Acquire)
    }

    /// Set once, when the producer loop exits
    pub(crate) fn mark_producer_finished(&self) {
        let already = self.producer_finished.swap(true, Ordering::AcqRel);
        debug_assert!(!already, "producer finished twice");
    }

    pub fn iteration(&self) -> u64 {
        self.counters.iteration.load(Ordering::Relaxed)
    }

    pub(crate) fn next_iteration(&self) -> u64 {
        self.counters.iteration.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn record_decoded(&self) -> u64 {
        self.counters.decoded.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn record_consumed(&self) -> u64 {
        self.counters.consumed.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn record_published(&self) {
        self.counters.published.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the failure count including this one
    pub(crate) fn record_publish_failure(&self) -> u64 {
        self.counters.publish_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn report_status(&self, event: StatusEvent) {
        // No reporter means status is disabled
        let _ = self.status.send(event);
    }

    pub fn report(&self) -> SessionReport {
        SessionReport {
            decoded: self.counters.decoded.load(Ordering::Relaxed),
            consumed: self.counters.consumed.load(Ordering::Relaxed),
            published: self.counters.published.load(Ordering::Relaxed),
            publish_failures: self.counters.publish_failures.load(Ordering::Relaxed),
            iterations: self.iteration(),
            frame_duration: self.frame_duration,
        }
    }
}

/// Cloneable control over a running session
#[derive(Clone)]
pub struct PlaybackHandle {
    ctx: Arc<PipelineContext>,
}

impl PlaybackHandle {
    /// Ask both workers to exit at their next loop check
    pub fn stop(&self) {
        self.ctx.stop.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.ctx.is_stopped()
    }

    /// Turn looping on or off; takes effect at the next end of pass
    pub fn set_looping(&self, looping: bool) {
        self.ctx.loop_enabled.store(looping, Ordering::Release);
    }
}

/// Final counters of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub decoded: u64,
    pub consumed: u64,
    pub published: u64,
    pub publish_failures: u64,
    pub iterations: u64,
    pub frame_duration: Duration,
}

/// One playback of one media path
pub struct Session {
    ctx: Arc<PipelineContext>,
    source: Box<dyn FrameSource>,
    status_rx: flume::Receiver<StatusEvent>,
}

impl Session {
    /// Open the media and derive the frame duration from its rate
    #[instrument(skip(settings))]
    pub fn open(
        kind: MediaKind,
        path: &Path,
        looping: bool,
        settings: &Settings,
    ) -> Result<Self, PipelineError> {
        let source = capture::open_source(kind, path, settings)?;
        Ok(Self::with_source(source, looping, settings))
    }

    /// Build a session around an already opened source
    pub fn with_source(source: Box<dyn FrameSource>, looping: bool, settings: &Settings) -> Self {
        let fps = match source.native_fps() {
            Some(fps) if fps > 0.0 && fps.is_finite() => fps,
            Some(fps) => {
                warn!(
                    "Source reported {} fps, using {}",
                    fps, settings.pipeline.default_fps
                );
                settings.pipeline.default_fps
            }
            None => settings.pipeline.default_fps,
        };
        let frame_duration = Duration::from_secs_f64(1.0 / fps);
        info!(
            "Pacing at {:.3} fps ({:.3} ms per frame)",
            fps,
            frame_duration.as_secs_f64() * 1000.0
        );

        let (status_tx, status_rx) = flume::unbounded();
        let ctx = Arc::new(PipelineContext::new(
            frame_duration,
            looping,
            settings,
            status_tx,
        ));

        Self {
            ctx,
            source,
            status_rx,
        }
    }

    pub fn handle(&self) -> PlaybackHandle {
        PlaybackHandle {
            ctx: Arc::clone(&self.ctx),
        }
    }

    pub fn context(&self) -> Arc<PipelineContext> {
        Arc::clone(&self.ctx)
    }

    pub fn frame_duration(&self) -> Duration {
        self.ctx.frame_duration
    }

    /// Run producer and pacer to completion, reporting status on stdout
    pub fn run(self, sink: Box<dyn OutputSink>) -> Result<SessionReport, PipelineError> {
        self.run_with_status(sink, Box::new(std::io::stdout()))
    }

    pub fn run_with_status(
        self,
        sink: Box<dyn OutputSink>,
        out: Box<dyn std::io::Write + Send>,
    ) -> Result<SessionReport, PipelineError> {
        let Session {
            ctx,
            source,
            status_rx,
        } = self;

        let reporter = if ctx.settings.status.enabled {
            Some(status::spawn(status_rx, &ctx.settings.status, out)?)
        } else {
            drop(status_rx);
            None
        };

        info!("Starting pipeline with sink {}", sink.name());

        let producer = {
            let ctx = Arc::clone(&ctx);
            thread::Builder::new()
                .name("vcam-producer".into())
                .spawn(move || producer::run(source, &ctx))
                .map_err(|e| PipelineError::Spawn("producer", e))?
        };

        let pacer = {
            let pacer_ctx = Arc::clone(&ctx);
            match thread::Builder::new()
                .name("vcam-pacer".into())
                .spawn(move || pacer::run(sink, &pacer_ctx))
            {
                Ok(handle) => handle,
                Err(e) => {
                    ctx.stop.store(true, Ordering::Release);
                    let _ = producer.join();
                    return Err(PipelineError::Spawn("pacer", e));
                }
            }
        };

        let producer_result = producer.join();
        let pacer_result = pacer.join();

        if let Some(reporter) = reporter {
            ctx.report_status(StatusEvent::Finished);
            if reporter.join().is_err() {
                warn!("Status reporter panicked");
            }
        }

        producer_result.map_err(|_| PipelineError::WorkerPanicked("producer"))?;
        pacer_result.map_err(|_| PipelineError::WorkerPanicked("pacer"))?;

        let report = ctx.report();
        debug!("Session finished: {:?}", report);
        Ok(report)
    }
}
