//! Producer loop: drives a frame source into the queue

use std::thread;

use tracing::{debug, error, info, warn};

use super::{PipelineContext, StatusEvent};
use crate::capture::{FrameSource, SourceItem};

/// Marks the producer finished however the loop exits, panics included
struct FinishGuard<'a>(&'a PipelineContext);

impl Drop for FinishGuard<'_> {
    fn drop(&mut self) {
        self.0.mark_producer_finished();
    }
}

/// Decode until the media ends, looping if enabled, or until stopped
pub fn run(mut source: Box<dyn FrameSource>, ctx: &PipelineContext) {
    let _finished = FinishGuard(ctx);

    let mut sequence = 0u64;
    let mut pass_frames = 0u64;

    while !ctx.is_stopped() {
        let item = match source.next_item() {
            Ok(item) => item,
            Err(e) => {
                debug!("Decode failed, treating as end of stream: {}", e);
                SourceItem::EndOfPass
            }
        };

        match item {
            SourceItem::Frame(mut frame) => {
                if !wait_for_room(ctx) {
                    break;
                }

                sequence += 1;
                frame.sequence = sequence;
                ctx.queue.push(frame);
                pass_frames += 1;

                let decoded = ctx.record_decoded();
                metrics::counter!("vcam_frames_decoded").increment(1);

                ctx.report_status(StatusEvent::Decoded {
                    frames: decoded,
                    iteration: ctx.is_looping().then(|| ctx.iteration()),
                    origin: source.origin().map(|p| p.to_path_buf()),
                });
            }
            SourceItem::Skipped(path) => {
                debug!("Skipped undecodable input {}", path.display());
            }
            SourceItem::EndOfPass => {
                if !ctx.is_looping() {
                    info!("End of media after {} frames", pass_frames);
                    break;
                }
                if pass_frames == 0 {
                    warn!("Pass produced no frames, not looping");
                    break;
                }
                if !wait_for_drain(ctx) {
                    break;
                }
                if let Err(e) = source.rewind() {
                    error!("Failed to restart media: {}", e);
                    break;
                }

                pass_frames = 0;
                let iteration = ctx.next_iteration();
                debug!("Starting iteration {}", iteration);
            }
        }
    }

    debug!("Producer exiting after {} frames", sequence);
}

/// Wait until the pacer has emptied the queue; false if stopped first
fn wait_for_drain(ctx: &PipelineContext) -> bool {
    let poll = ctx.settings().drain_poll();
    while !ctx.queue.is_empty() {
        if ctx.is_stopped() {
            return false;
        }
        thread::sleep(poll);
    }
    !ctx.is_stopped()
}

/// Wait for space below the high-water mark, if one is set; false if stopped first
fn wait_for_room(ctx: &PipelineContext) -> bool {
    let Some(limit) = ctx.settings().pipeline.max_queued_frames else {
        return true;
    };
    let poll = ctx.settings().drain_poll();
    while ctx.queue.len() >= limit {
        if ctx.is_stopped() {
            return false;
        }
        thread::sleep(poll);
    }
    true
}
