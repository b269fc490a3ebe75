//! Pacer: publishes queued frames at the source frame rate
//!
//! Each loop publishes at most one frame and then sleeps out the rest of the
//! frame period. There is no catch-up: if decoding or publishing falls behind,
//! the lag persists.

use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::{PipelineContext, StatusEvent};
use crate::output::OutputSink;
use crate::utils::precise_sleep;

/// Stops the session if the pacer dies, so the producer does not wait on a
/// queue nobody drains
struct PanicGuard<'a>(&'a PipelineContext);

impl Drop for PanicGuard<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.stop_flag().store(true, Ordering::Release);
        }
    }
}

pub fn run(mut sink: Box<dyn OutputSink>, ctx: &PipelineContext) {
    let _guard = PanicGuard(ctx);

    let pacing = &ctx.settings().pacing;
    let correction = Duration::from_micros(pacing.correction_us);
    let spin_threshold = Duration::from_micros(pacing.spin_threshold_us);
    let stop_check = Duration::from_millis(pacing.stop_check_ms);
    let frame_duration = ctx.frame_duration();

    loop {
        if ctx.is_stopped() {
            debug!("Pacer stopped");
            break;
        }
        // Finished is read before the queue so no late push is missed
        if ctx.producer_finished() && ctx.queue.is_empty() {
            debug!("Producer finished and queue drained");
            break;
        }

        let loop_start = Instant::now();

        let consumed = match ctx.queue.try_pop() {
            Some(frame) => {
                let consumed = ctx.record_consumed();
                metrics::histogram!("vcam_frame_latency_ms")
                    .record(frame.timestamp.elapsed().as_secs_f64() * 1000.0);
                match sink.publish(&frame) {
                    Ok(()) => {
                        ctx.record_published();
                        metrics::counter!("vcam_frames_published").increment(1);
                    }
                    Err(e) => {
                        let failures = ctx.record_publish_failure();
                        metrics::counter!("vcam_publish_failures").increment(1);
                        if failures == 1 {
                            warn!("Failed to publish frame {}: {}", frame.sequence, e);
                        } else {
                            debug!("Failed to publish frame {}: {}", frame.sequence, e);
                        }
                    }
                }
                Some(consumed)
            }
            None => None,
        };

        let elapsed = loop_start.elapsed();
        let remaining = match consumed {
            Some(_) => {
                metrics::histogram!("vcam_publish_time_us").record(elapsed.as_micros() as f64);
                frame_duration
                    .saturating_sub(elapsed)
                    .saturating_sub(correction)
            }
            // Nothing queued yet; idle one frame period instead of spinning
            None => frame_duration,
        };

        if !remaining.is_zero() {
            precise_sleep(remaining, spin_threshold, stop_check, ctx.stop_flag());
        }

        if let Some(frames) = consumed {
            let loop_duration = loop_start.elapsed();
            let fps = 1.0 / loop_duration.as_secs_f64().max(f64::EPSILON);
            metrics::histogram!("vcam_frame_time_ms").record(loop_duration.as_secs_f64() * 1000.0);
            ctx.report_status(StatusEvent::Consumed {
                frames,
                frame_time: loop_duration,
                fps,
            });
        }
    }
}
