//! The asynchronous output worker and its queue messages.
//!
//! Exactly one worker thread consumes encoded frames and writes them to the
//! terminal, so the simulation loop never blocks on I/O. The two bounded
//! queues feeding it are the only state shared across the thread boundary;
//! every message is an owned value handed over by the producer.

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::thread::JoinHandle;

use crossterm::cursor::MoveTo;
use crossterm::queue;

/// One encoded frame in submission order.
#[derive(Debug)]
pub(crate) struct FrameMessage {
    pub seq: u64,
    pub payload: String,
}

/// Per-frame timing telemetry.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PerfSample {
    /// Frame sequence number.
    pub seq: u64,
    /// Simulation tick delta handed to `present`, in seconds.
    pub tick_secs: f64,
    /// Time spent running tasks and compositing, in seconds.
    pub draw_secs: f64,
    /// Total `present` duration, in seconds.
    pub frame_secs: f64,
    /// Encoded bytes submitted for the frame.
    pub bytes: usize,
}

/// Fixed terminal position of the perf overlay line.
#[derive(Clone, Copy, Debug)]
pub(crate) struct OverlayPos {
    /// 0-based terminal row, the line below the canvas.
    pub row: u16,
}

pub type BoxedSink = Box<dyn Write + Send>;

/// Handle to the consumer thread.
pub(crate) struct Worker {
    handle: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
}

impl Worker {
    pub fn spawn(
        frames: Receiver<FrameMessage>,
        perf: Receiver<PerfSample>,
        mut sink: BoxedSink,
        overlay: Option<OverlayPos>,
    ) -> Worker {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let handle = std::thread::spawn(move || {
            run(frames, perf, &mut sink, overlay, &stop_flag);
        });
        Worker {
            handle: Some(handle),
            stop,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Requests a forced stop: pending frames are discarded once the thread
    /// observes the flag.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Joins the thread. The worker must have been asked to stop or had its
    /// senders dropped first.
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("output worker terminated by panic");
            }
        }
    }
}

fn run(
    frames: Receiver<FrameMessage>,
    perf: Receiver<PerfSample>,
    sink: &mut BoxedSink,
    overlay: Option<OverlayPos>,
    stop: &AtomicBool,
) {
    let mut last_sample = None;
    loop {
        let msg = match frames.recv() {
            Ok(msg) => msg,
            // producer gone, nothing more will arrive
            Err(_) => break,
        };
        // checked after the dequeue so a blocked recv wakes up on disconnect,
        // and pending frames are discarded rather than drained
        if stop.load(Ordering::Relaxed) {
            break;
        }
        if let Err(err) = sink.write_all(msg.payload.as_bytes()).and_then(|()| sink.flush()) {
            log::warn!("dropping frame {}: terminal write failed: {err}", msg.seq);
            continue;
        }
        // drain telemetry even with the overlay off, so a full perf queue can
        // never stall a strict-mode producer
        while let Ok(sample) = perf.try_recv() {
            last_sample = Some(sample);
        }
        if let (Some(pos), Some(sample)) = (overlay, last_sample) {
            if let Err(err) = write_overlay(sink, pos, sample) {
                log::warn!("perf overlay write failed: {err}");
            }
        }
    }
}

fn write_overlay(sink: &mut BoxedSink, pos: OverlayPos, s: PerfSample) -> std::io::Result<()> {
    queue!(sink, MoveTo(0, pos.row))?;
    write!(
        sink,
        "tick:{:7.3} ms draw:{:7.3} ms frame:{:7.3} ms bytes:{:<8}",
        s.tick_secs * 1000.0,
        s.draw_secs * 1000.0,
        s.frame_secs * 1000.0,
        s.bytes
    )?;
    sink.flush()
}
