//! Status display owned by a single reporter thread
//!
//! Workers send events over a channel; only the reporter writes to the
//! terminal, so lines from the producer and the pacer never interleave.

use std::io::Write;
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::debug;

use super::PipelineError;
use crate::StatusConfig;

#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    /// Producer pushed a frame
    Decoded {
        frames: u64,
        /// Current pass, only in loop mode
        iteration: Option<u64>,
        origin: Option<PathBuf>,
    },
    /// Pacer finished one publish cycle
    Consumed {
        frames: u64,
        frame_time: Duration,
        fps: f64,
    },
    /// Session is over; render the final line and exit
    Finished,
}

/// Latest known values
#[derive(Debug, Default, Clone, PartialEq)]
pub struct StatusLine {
    pub decoded: u64,
    pub consumed: u64,
    pub iteration: Option<u64>,
    pub frame_time: Duration,
    pub fps: f64,
    pub origin: Option<PathBuf>,
}

impl StatusLine {
    pub fn apply(&mut self, event: StatusEvent) {
        match event {
            StatusEvent::Decoded {
                frames,
                iteration,
                origin,
            } => {
                self.decoded = frames;
                self.iteration = iteration;
                if origin.is_some() {
                    self.origin = origin;
                }
            }
            StatusEvent::Consumed {
                frames,
                frame_time,
                fps,
            } => {
                self.consumed = frames;
                self.frame_time = frame_time;
                self.fps = fps;
            }
            StatusEvent::Finished => {}
        }
    }

    pub fn render(&self) -> String {
        let mut line = String::new();
        if let Some(iteration) = self.iteration {
            line.push_str(&format!("Iteration #: {} | ", iteration));
        }
        line.push_str(&format!(
            "Decoded: {} | Consumed: {} | Frame time: {} ms | FPS: {:.2}",
            self.decoded,
            self.consumed,
            self.frame_time.as_millis(),
            self.fps
        ));
        if let Some(origin) = &self.origin {
            line.push_str(&format!(" | {}", origin.display()));
        }
        line
    }
}

/// Start the reporter thread
pub fn spawn(
    rx: flume::Receiver<StatusEvent>,
    config: &StatusConfig,
    out: Box<dyn Write + Send>,
) -> Result<JoinHandle<()>, PipelineError> {
    let refresh = Duration::from_millis(config.refresh_ms);
    thread::Builder::new()
        .name("vcam-status".into())
        .spawn(move || report(rx, refresh, out))
        .map_err(|e| PipelineError::Spawn("status", e))
}

fn report(rx: flume::Receiver<StatusEvent>, refresh: Duration, mut out: Box<dyn Write + Send>) {
    let mut line = StatusLine::default();
    let mut last_render: Option<Instant> = None;
    let mut width = 0usize;

    // Ends on Finished or when every sender is gone
    while let Ok(event) = rx.recv() {
        let finished = event == StatusEvent::Finished;
        line.apply(event);

        let due = last_render.map_or(true, |at| at.elapsed() >= refresh);
        if due || finished {
            let text = line.render();
            // Pad so a shorter line fully covers the previous one
            let pad = width.saturating_sub(text.chars().count());
            width = width.max(text.chars().count());
            if write!(out, "\r{}{}", text, " ".repeat(pad))
                .and_then(|_| out.flush())
                .is_err()
            {
                debug!("Status output closed");
                return;
            }
            last_render = Some(Instant::now());
        }

        if finished {
            let _ = writeln!(out);
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn renders_iteration_only_in_loop_mode() {
        let mut line = StatusLine::default();
        line.apply(StatusEvent::Decoded {
            frames: 12,
            iteration: None,
            origin: None,
        });
        line.apply(StatusEvent::Consumed {
            frames: 10,
            frame_time: Duration::from_millis(33),
            fps: 30.3,
        });
        assert_eq!(
            line.render(),
            "Decoded: 12 | Consumed: 10 | Frame time: 33 ms | FPS: 30.30"
        );

        line.apply(StatusEvent::Decoded {
            frames: 13,
            iteration: Some(2),
            origin: Some(PathBuf::from("a.png")),
        });
        let text = line.render();
        assert!(text.starts_with("Iteration #: 2 | Decoded: 13"));
        assert!(text.ends_with("| a.png"));
    }

    #[test]
    fn reporter_writes_final_line_and_exits() {
        let (tx, rx) = flume::unbounded();
        let buf = SharedBuf::default();
        let config = StatusConfig {
            enabled: true,
            refresh_ms: 10_000,
        };
        let handle = spawn(rx, &config, Box::new(buf.clone())).unwrap();

        for frames in 1..=5 {
            tx.send(StatusEvent::Consumed {
                frames,
                frame_time: Duration::from_millis(33),
                fps: 30.0,
            })
            .unwrap();
        }
        tx.send(StatusEvent::Finished).unwrap();
        handle.join().unwrap();

        let output = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        // first event renders immediately, the rest are throttled until Finished
        assert_eq!(output.matches('\r').count(), 2);
        assert!(output.contains("Consumed: 5"));
        assert!(output.ends_with('\n'));
    }

    #[test]
    fn reporter_exits_when_senders_drop() {
        let (tx, rx) = flume::unbounded::<StatusEvent>();
        let config = StatusConfig {
            enabled: true,
            refresh_ms: 0,
        };
        let handle = spawn(rx, &config, Box::new(std::io::sink())).unwrap();
        drop(tx);
        handle.join().unwrap();
    }
}
