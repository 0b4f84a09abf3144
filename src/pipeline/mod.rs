//! The draw pipeline: backbuffer ring, task composition, frame submission.
//!
//! A [`Pipeline`] owns a ring of backbuffers and exactly one output
//! [`worker`]. Each [`present`](Pipeline::present) call selects the next
//! buffer in the ring, lets the registered tasks draw into it, encodes the
//! result and hands the encoded string to the worker through a bounded
//! queue. With `M` buffers and a queue of capacity `M`, the producer can
//! never run more than `M` frames ahead of the terminal.
//!
//! Two submission disciplines exist for a full queue: [`SubmitMode::Strict`]
//! blocks the caller until space frees (no frame is ever lost), while
//! [`SubmitMode::Permissive`] drops the newest frame and keeps the simulation
//! going. Frames are delivered strictly in submission order either way.

pub mod worker;

use std::io::{self, Write};
use std::sync::mpsc::{SyncSender, TrySendError, sync_channel};
use std::time::Instant;

use crossterm::{cursor, execute, terminal};

use crate::RenderError;
use crate::rendering::buffer::PixelBuffer;
use crate::rendering::color::{ColorMode, Rgb};
use crate::rendering::encode;
use crate::rendering::sprite::Sprite;
use crate::task::RenderTask;
use self::worker::{BoxedSink, FrameMessage, OverlayPos, PerfSample, Worker};

/// How `present` behaves when the frame queue is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SubmitMode {
    /// Non-blocking: the newest frame is dropped when the queue is full.
    #[default]
    Permissive,
    /// Blocking: `present` waits for queue space; no frame is ever lost.
    Strict,
}

/// How the write target is encoded each frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EncodePolicy {
    /// Re-encode the whole frame, homing the cursor first in exclusive mode.
    #[default]
    Full,
    /// Encode only the coalesced non-background spans, each cursor-addressed.
    Spans,
}

/// Pipeline construction parameters.
#[derive(Clone, Debug)]
pub struct PipelineDesc {
    /// Canvas width in virtual pixels.
    pub width: usize,
    /// Canvas height in virtual pixels; must be even.
    pub height: usize,
    pub color_mode: ColorMode,
    /// Backbuffers in the ring; also the capacity of both queues.
    pub buffer_count: usize,
    pub submit_mode: SubmitMode,
    pub encode_policy: EncodePolicy,
    /// Renders the perf overlay on the line below the canvas.
    pub debug: bool,
}

impl Default for PipelineDesc {
    fn default() -> Self {
        Self {
            width: 80,
            height: 48,
            color_mode: ColorMode::default(),
            buffer_count: 2,
            submit_mode: SubmitMode::default(),
            encode_policy: EncodePolicy::default(),
            debug: false,
        }
    }
}

/// Handle to a sprite registered with [`Pipeline::add_sprite`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpriteId(usize);

/// Owner of the backbuffer ring, the registered sprites and the output
/// worker.
pub struct Pipeline {
    desc: PipelineDesc,
    buffers: Vec<PixelBuffer>,
    current: usize,
    frame_counter: u64,
    sprites: Vec<Sprite>,
    frame_tx: Option<SyncSender<FrameMessage>>,
    perf_tx: Option<SyncSender<PerfSample>>,
    worker: Option<Worker>,
    sink_factory: Box<dyn Fn() -> BoxedSink>,
    exclusive: bool,
    stopped: bool,
    resync: bool,
    dropped_frames: u64,
}

impl Pipeline {
    /// Creates a pipeline writing to stdout.
    pub fn new(desc: PipelineDesc) -> Result<Self, RenderError> {
        Self::new_with_sink_factory(desc, || Box::new(io::stdout()))
    }

    /// Creates a pipeline with a custom sink, e.g. an in-memory buffer in
    /// tests.
    ///
    /// The factory runs once per worker spawn; a respawned worker gets a
    /// fresh sink.
    pub fn new_with_sink_factory(
        desc: PipelineDesc,
        sink_factory: impl Fn() -> BoxedSink + 'static,
    ) -> Result<Self, RenderError> {
        if desc.width == 0 || desc.height == 0 || desc.height % 2 != 0 {
            return Err(RenderError::InvalidDimensions {
                width: desc.width,
                height: desc.height,
            });
        }
        if desc.buffer_count == 0 {
            return Err(RenderError::InvalidBufferCount);
        }
        let buffers = (0..desc.buffer_count)
            .map(|_| PixelBuffer::new(desc.width, desc.height, desc.color_mode))
            .collect();
        let mut pipeline = Self {
            desc,
            buffers,
            current: 0,
            frame_counter: 0,
            sprites: Vec::new(),
            frame_tx: None,
            perf_tx: None,
            worker: None,
            sink_factory: Box::new(sink_factory),
            exclusive: false,
            stopped: false,
            resync: false,
            dropped_frames: 0,
        };
        pipeline.spawn_worker();
        Ok(pipeline)
    }

    fn spawn_worker(&mut self) {
        let (frame_tx, frame_rx) = sync_channel(self.desc.buffer_count);
        let (perf_tx, perf_rx) = sync_channel(self.desc.buffer_count);
        let overlay = self.desc.debug.then(|| OverlayPos {
            row: (self.desc.height / 2) as u16,
        });
        let sink = (self.sink_factory)();
        self.frame_tx = Some(frame_tx);
        self.perf_tx = Some(perf_tx);
        self.worker = Some(Worker::spawn(frame_rx, perf_rx, sink, overlay));
    }

    /// Canvas width in virtual pixels.
    pub fn width(&self) -> usize {
        self.desc.width
    }

    /// Canvas height in virtual pixels.
    pub fn height(&self) -> usize {
        self.desc.height
    }

    pub fn color_mode(&self) -> ColorMode {
        self.desc.color_mode
    }

    /// Index of the backbuffer the next drawing op writes to.
    pub fn current_index(&self) -> usize {
        self.current
    }

    /// Frames presented so far.
    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    /// Frames rejected because the queue was full or the worker was stopped.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    /// The write target's stored color at `(x, y)`.
    pub fn pixel(&self, x: usize, y: usize) -> Rgb {
        self.buffers[self.current].pixel(x, y)
    }

    /// Registers a sprite for [`draw_sprites`](Self::draw_sprites); sprites
    /// draw in registration order.
    pub fn add_sprite(&mut self, sprite: Sprite) -> SpriteId {
        self.sprites.push(sprite);
        SpriteId(self.sprites.len() - 1)
    }

    pub fn sprite(&self, id: SpriteId) -> Option<&Sprite> {
        self.sprites.get(id.0)
    }

    /// Mutable access for tasks that move sprites between frames.
    pub fn sprite_mut(&mut self, id: SpriteId) -> Option<&mut Sprite> {
        self.sprites.get_mut(id.0)
    }

    pub fn sprite_count(&self) -> usize {
        self.sprites.len()
    }

    /// Binds a task: invokes its `on_init` with this pipeline.
    pub fn bind_task(&mut self, task: &mut dyn RenderTask) {
        task.on_init(self);
    }

    /// Composites one frame and submits it to the output worker.
    ///
    /// `delta` is the simulation tick in seconds; `tasks` run in order against
    /// the frame's write target. A full queue never fails: strict mode blocks,
    /// permissive mode drops the frame and counts it.
    pub fn present(&mut self, delta: f64, tasks: &mut [Box<dyn RenderTask>]) {
        let frame_start = Instant::now();
        self.current = (self.frame_counter % self.desc.buffer_count as u64) as usize;
        let seq = self.frame_counter;
        self.frame_counter += 1;
        self.ensure_worker();

        let draw_start = Instant::now();
        for task in tasks.iter_mut() {
            task.on_draw(self, delta);
        }
        let draw_secs = draw_start.elapsed().as_secs_f64();

        let payload = self.encode_current();
        let bytes = payload.len();
        self.submit_frame(FrameMessage { seq, payload });

        let frame_secs = frame_start.elapsed().as_secs_f64();
        self.submit_perf(PerfSample {
            seq,
            tick_secs: delta,
            draw_secs,
            frame_secs,
            bytes,
        });
    }

    fn encode_current(&mut self) -> String {
        let full = self.resync || self.desc.encode_policy == EncodePolicy::Full;
        self.resync = false;
        let exclusive = self.exclusive;
        let target = &mut self.buffers[self.current];
        if full {
            let mut out = String::new();
            if exclusive {
                encode::cursor_address(1, 1, &mut out);
            }
            out.push_str(target.encode_full());
            out
        } else {
            target.encode_spans_at(0, 0)
        }
    }

    fn submit_frame(&mut self, msg: FrameMessage) {
        let Some(tx) = &self.frame_tx else {
            self.dropped_frames += 1;
            return;
        };
        match self.desc.submit_mode {
            SubmitMode::Strict => {
                if tx.send(msg).is_err() {
                    // worker died mid-send; the next present respawns it
                    self.dropped_frames += 1;
                }
            }
            SubmitMode::Permissive => match tx.try_send(msg) {
                Ok(()) => {}
                Err(TrySendError::Full(msg)) => {
                    self.dropped_frames += 1;
                    log::debug!("frame queue full, dropping frame {}", msg.seq);
                }
                Err(TrySendError::Disconnected(_)) => {
                    self.dropped_frames += 1;
                }
            },
        }
    }

    fn submit_perf(&mut self, sample: PerfSample) {
        let Some(tx) = &self.perf_tx else { return };
        match self.desc.submit_mode {
            SubmitMode::Strict => {
                let _ = tx.send(sample);
            }
            SubmitMode::Permissive => {
                let _ = tx.try_send(sample);
            }
        }
    }

    /// Respawns the worker if it died unexpectedly, forcing one full encode so
    /// the terminal resynchronizes with the ring contents.
    fn ensure_worker(&mut self) {
        if self.stopped {
            return;
        }
        let alive = self.worker.as_ref().is_some_and(|w| !w.is_finished());
        if alive {
            return;
        }
        if let Some(worker) = self.worker.take() {
            log::warn!("output worker died, respawning");
            worker.join();
        }
        self.spawn_worker();
        self.resync = true;
    }

    /// Writes one pixel into the write target; out-of-range coordinates are
    /// ignored.
    pub fn draw_pixel(&mut self, x: usize, y: usize, color: Rgb) {
        if x < self.desc.width && y < self.desc.height {
            self.buffers[self.current].fill_at(x, y, color);
        }
    }

    /// Fills the write target with `color`. O(W x H).
    pub fn clear_scene(&mut self, color: Rgb) {
        self.buffers[self.current].fill(color);
    }

    /// Fills every cell within `radius` of `center`.
    ///
    /// Scans the whole target against the squared radius; fine at terminal
    /// resolutions, no spatial acceleration.
    pub fn draw_solid_circle_2d(&mut self, center: (f32, f32), radius: f32, color: Rgb) {
        let (cx, cy) = self.clamp_point(center);
        let r_sq = radius * radius;
        for y in 0..self.desc.height {
            for x in 0..self.desc.width {
                let dx = x as f32 - cx as f32;
                let dy = y as f32 - cy as f32;
                if dx * dx + dy * dy <= r_sq {
                    self.draw_pixel(x, y, color);
                }
            }
        }
    }

    /// Draws a line segment by DDA stepping.
    ///
    /// Endpoints are rounded and clamped into the target; the end point itself
    /// is exclusive.
    pub fn draw_line_2d(&mut self, start: (f32, f32), end: (f32, f32), color: Rgb) {
        let (sx, sy) = self.clamp_point(start);
        let (ex, ey) = self.clamp_point(end);
        let dx = ex - sx;
        let dy = ey - sy;
        let steps = dx.abs().max(dy.abs());
        if steps == 0 {
            return;
        }
        let inc_x = dx as f32 / steps as f32;
        let inc_y = dy as f32 / steps as f32;
        let mut x = sx as f32;
        let mut y = sy as f32;
        for _ in 0..steps {
            self.draw_pixel(x as usize, y as usize, color);
            x += inc_x;
            y += inc_y;
        }
    }

    fn clamp_point(&self, (x, y): (f32, f32)) -> (i64, i64) {
        let cx = x.clamp(0.0, (self.desc.width - 1) as f32).round() as i64;
        let cy = y.clamp(0.0, (self.desc.height - 1) as f32).round() as i64;
        (cx, cy)
    }

    /// Advances every registered sprite by `delta` and blits its current frame
    /// into the write target.
    ///
    /// Only pixels differing from the sprite background are written,
    /// translated by the sprite's rounded position and clipped to the target.
    pub fn draw_sprites(&mut self, delta: f64) {
        let current = self.current;
        let target = &mut self.buffers[current];
        for sprite in &mut self.sprites {
            sprite.play_at_rate(delta);
            let (px, py) = sprite.rounded_pos();
            sprite.current_frame_mut().blit_into(target, px, py);
        }
    }

    /// Whether exclusive (alternate screen) mode is active.
    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    /// Switches between the alternate screen and the main screen.
    ///
    /// Clears the display, enters or leaves the alternate screen and toggles
    /// cursor visibility. Written straight to stdout rather than through the
    /// worker, so the terminal can still be restored after [`stop`].
    ///
    /// [`stop`]: Self::stop
    pub fn use_exclusive_screen(&mut self, exclusive: bool) -> io::Result<()> {
        self.exclusive = exclusive;
        let mut stdout = io::stdout();
        execute!(stdout, terminal::Clear(terminal::ClearType::All))?;
        if exclusive {
            execute!(stdout, terminal::EnterAlternateScreen, cursor::Hide)?;
        } else {
            execute!(
                stdout,
                terminal::LeaveAlternateScreen,
                cursor::Show,
                cursor::MoveTo(0, 0)
            )?;
        }
        stdout.flush()
    }

    /// Stops the output worker and joins it. Idempotent; pending frames are
    /// discarded, not drained.
    pub fn stop(&mut self) {
        self.stopped = true;
        if let Some(worker) = self.worker.take() {
            worker.request_stop();
            // closing the queues wakes a worker blocked on an empty dequeue
            self.frame_tx = None;
            self.perf_tx = None;
            worker.join();
        } else {
            self.frame_tx = None;
            self.perf_tx = None;
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
        if self.exclusive {
            let _ = self.use_exclusive_screen(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Clone)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn capture_pipeline(desc: PipelineDesc) -> (Pipeline, Arc<Mutex<Vec<u8>>>) {
        let bytes = Arc::new(Mutex::new(Vec::new()));
        let sink_bytes = bytes.clone();
        let pipeline = Pipeline::new_with_sink_factory(desc, move || {
            Box::new(SharedSink(sink_bytes.clone()))
        })
        .unwrap();
        (pipeline, bytes)
    }

    fn wait_until(mut ready: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !ready() {
            assert!(Instant::now() < deadline, "worker did not catch up in time");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    struct PixelTask {
        x: usize,
        y: usize,
        color: Rgb,
    }

    impl RenderTask for PixelTask {
        fn on_draw(&mut self, pipeline: &mut Pipeline, _delta: f64) {
            pipeline.draw_pixel(self.x, self.y, self.color);
        }
    }

    #[test]
    fn desc_validation_rejects_bad_dimensions() {
        let desc = PipelineDesc {
            height: 7,
            ..Default::default()
        };
        assert!(matches!(
            Pipeline::new_with_sink_factory(desc, || Box::new(io::sink())),
            Err(RenderError::InvalidDimensions { height: 7, .. })
        ));
        let desc = PipelineDesc {
            buffer_count: 0,
            ..Default::default()
        };
        assert!(matches!(
            Pipeline::new_with_sink_factory(desc, || Box::new(io::sink())),
            Err(RenderError::InvalidBufferCount)
        ));
    }

    #[test]
    fn ring_cycles_buffers_in_order() {
        let desc = PipelineDesc {
            width: 4,
            height: 2,
            buffer_count: 3,
            submit_mode: SubmitMode::Strict,
            ..Default::default()
        };
        let (mut pipeline, _bytes) = capture_pipeline(desc);
        for i in 0..1000u64 {
            pipeline.present(0.016, &mut []);
            assert_eq!(pipeline.current_index(), (i % 3) as usize);
        }
        assert_eq!(pipeline.frame_counter(), 1000);
        assert_eq!(pipeline.dropped_frames(), 0);
        pipeline.stop();
    }

    #[test]
    fn present_runs_tasks_against_the_write_target() {
        let desc = PipelineDesc {
            width: 4,
            height: 4,
            color_mode: ColorMode::TrueColor,
            buffer_count: 1,
            submit_mode: SubmitMode::Strict,
            ..Default::default()
        };
        let (mut pipeline, bytes) = capture_pipeline(desc);
        let mut tasks: Vec<Box<dyn RenderTask>> = vec![Box::new(PixelTask {
            x: 1,
            y: 0,
            color: Rgb::new(255.0, 0.0, 0.0),
        })];
        pipeline.present(0.016, &mut tasks);
        assert_eq!(pipeline.pixel(1, 0), Rgb::new(255.0, 0.0, 0.0));
        wait_until(|| !bytes.lock().unwrap().is_empty());
        let written = String::from_utf8(bytes.lock().unwrap().clone()).unwrap();
        assert!(written.contains("\x1b[38;2;255;0;0m▀"));
        // full policy: one encoded cell per column, newline-terminated rows
        assert_eq!(written.matches('▀').count(), 8);
        assert_eq!(written.matches('\n').count(), 2);
        pipeline.stop();
    }

    #[test]
    fn span_policy_emits_only_addressed_fragments() {
        let desc = PipelineDesc {
            width: 8,
            height: 2,
            color_mode: ColorMode::TrueColor,
            buffer_count: 1,
            submit_mode: SubmitMode::Strict,
            encode_policy: EncodePolicy::Spans,
            ..Default::default()
        };
        let (mut pipeline, bytes) = capture_pipeline(desc);
        let mut tasks: Vec<Box<dyn RenderTask>> = vec![Box::new(PixelTask {
            x: 5,
            y: 1,
            color: Rgb::WHITE,
        })];
        pipeline.present(0.016, &mut tasks);
        wait_until(|| !bytes.lock().unwrap().is_empty());
        let written = String::from_utf8(bytes.lock().unwrap().clone()).unwrap();
        assert_eq!(
            written,
            "\x1b[1;6H\x1b[48;2;255;255;255m\x1b[38;2;0;0;0m▀"
        );
        pipeline.stop();
    }

    #[test]
    fn sprites_advance_and_blit_at_their_rounded_position() {
        let desc = PipelineDesc {
            width: 8,
            height: 4,
            color_mode: ColorMode::TrueColor,
            buffer_count: 1,
            submit_mode: SubmitMode::Strict,
            ..Default::default()
        };
        let (mut pipeline, _bytes) = capture_pipeline(desc);
        let mut sprite = Sprite::new(2, 2, 2, 10.0, ColorMode::TrueColor, Rgb::BLACK);
        sprite.fill_pixel(0, 0, Rgb::new(0.0, 255.0, 0.0), 0);
        sprite.fill_pixel(1, 1, Rgb::new(0.0, 0.0, 255.0), 1);
        let id = pipeline.add_sprite(sprite);
        pipeline.sprite_mut(id).unwrap().set_pos(2.4, 1.6);

        struct SpriteTask;
        impl RenderTask for SpriteTask {
            fn on_draw(&mut self, pipeline: &mut Pipeline, delta: f64) {
                pipeline.draw_sprites(delta);
            }
        }
        let mut tasks: Vec<Box<dyn RenderTask>> = vec![Box::new(SpriteTask)];

        // delta 0.05 at 10 fps: cursor 0.5, still frame 0
        pipeline.present(0.05, &mut tasks);
        assert_eq!(pipeline.sprite(id).unwrap().frame_index(), 0);
        assert_eq!(pipeline.pixel(2, 2), Rgb::new(0.0, 255.0, 0.0));

        // another 0.05: cursor 1.0, frame 1 blits its own pixel
        pipeline.present(0.05, &mut tasks);
        assert_eq!(pipeline.sprite(id).unwrap().frame_index(), 1);
        assert_eq!(pipeline.pixel(3, 3), Rgb::new(0.0, 0.0, 255.0));
        pipeline.stop();
    }

    #[test]
    fn clear_scene_and_shapes_mutate_the_target() {
        let desc = PipelineDesc {
            width: 10,
            height: 10,
            color_mode: ColorMode::TrueColor,
            buffer_count: 1,
            submit_mode: SubmitMode::Strict,
            ..Default::default()
        };
        let (mut pipeline, _bytes) = capture_pipeline(desc);
        let gray = Rgb::gray(128.0);
        pipeline.clear_scene(gray);
        assert_eq!(pipeline.pixel(9, 9), gray);

        let red = Rgb::new(255.0, 0.0, 0.0);
        pipeline.draw_solid_circle_2d((5.0, 5.0), 2.0, red);
        assert_eq!(pipeline.pixel(5, 5), red);
        assert_eq!(pipeline.pixel(5, 3), red);
        assert_eq!(pipeline.pixel(0, 0), gray);

        let blue = Rgb::new(0.0, 0.0, 255.0);
        pipeline.draw_line_2d((0.0, 0.0), (3.0, 0.0), blue);
        assert_eq!(pipeline.pixel(0, 0), blue);
        assert_eq!(pipeline.pixel(2, 0), blue);
        // DDA excludes the end point
        assert_eq!(pipeline.pixel(3, 0), gray);
        // zero-length lines draw nothing
        pipeline.draw_line_2d((7.0, 7.0), (7.0, 7.0), blue);
        assert_eq!(pipeline.pixel(7, 7), gray);
        pipeline.stop();
    }

    #[test]
    fn stop_is_idempotent_and_later_presents_count_drops() {
        let (mut pipeline, _bytes) = capture_pipeline(PipelineDesc {
            width: 2,
            height: 2,
            buffer_count: 2,
            ..Default::default()
        });
        pipeline.stop();
        pipeline.stop();
        pipeline.present(0.016, &mut []);
        pipeline.present(0.016, &mut []);
        assert_eq!(pipeline.dropped_frames(), 2);
    }

    #[test]
    fn out_of_range_draws_are_absorbed() {
        let (mut pipeline, _bytes) = capture_pipeline(PipelineDesc {
            width: 4,
            height: 4,
            ..Default::default()
        });
        pipeline.draw_pixel(100, 100, Rgb::WHITE);
        // endpoints far outside clamp onto the edge
        pipeline.draw_line_2d((-50.0, 2.0), (50.0, 2.0), Rgb::WHITE);
        assert_eq!(pipeline.pixel(0, 2), Rgb::WHITE);
        pipeline.stop();
    }
}
