//! Animated sprites: an ordered sequence of pixel buffers with playback state.

use crate::rendering::buffer::PixelBuffer;
use crate::rendering::color::{ColorMode, Rgb};

/// Axis-aligned box accumulated over every non-background sprite write.
///
/// Informational only: blitting clips against the target, never against this
/// box.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BoundingBox {
    bounds: Option<(usize, usize, usize, usize)>,
}

impl BoundingBox {
    /// Widens the box to include `(x, y)`.
    pub fn add_point(&mut self, x: usize, y: usize) {
        self.bounds = Some(match self.bounds {
            None => (x, y, x, y),
            Some((min_x, min_y, max_x, max_y)) => {
                (min_x.min(x), min_y.min(y), max_x.max(x), max_y.max(y))
            }
        });
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_none()
    }

    /// `(min_x, min_y, max_x, max_y)`, or `None` while empty.
    pub fn extents(&self) -> Option<(usize, usize, usize, usize)> {
        self.bounds
    }
}

/// A sequence of equally sized frames with a playback rate and a screen
/// position.
///
/// Frames are populated once at load time through [`fill_pixel`]; afterwards
/// the playback cursor advances every tick and wraps around the frame count.
///
/// [`fill_pixel`]: Sprite::fill_pixel
pub struct Sprite {
    frames: Vec<PixelBuffer>,
    fps: f64,
    background: Rgb,
    pos: (f32, f32),
    cursor: f64,
    bounds: BoundingBox,
}

impl Sprite {
    /// Creates a sprite of `frame_count` blank frames.
    ///
    /// `frame_count` must be at least 1 and `height` even. `background` fills
    /// every frame and doubles as the transparent sentinel when blitting.
    pub fn new(
        width: usize,
        height: usize,
        frame_count: usize,
        fps: f64,
        mode: ColorMode,
        background: Rgb,
    ) -> Self {
        assert!(frame_count >= 1, "sprite needs at least one frame");
        let frames = (0..frame_count)
            .map(|_| PixelBuffer::with_background(width, height, mode, background))
            .collect();
        Self {
            frames,
            fps,
            background,
            pos: (0.0, 0.0),
            cursor: 0.0,
            bounds: BoundingBox::default(),
        }
    }

    pub fn width(&self) -> usize {
        self.frames[0].width()
    }

    pub fn height(&self) -> usize {
        self.frames[0].height()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn background(&self) -> Rgb {
        self.background
    }

    /// Screen position in virtual pixels. Fractional; rounded when blitting.
    pub fn pos(&self) -> (f32, f32) {
        self.pos
    }

    pub fn set_pos(&mut self, x: f32, y: f32) {
        self.pos = (x, y);
    }

    /// The position rounded to whole virtual pixels, as used by the blit.
    pub fn rounded_pos(&self) -> (i64, i64) {
        (self.pos.0.round() as i64, self.pos.1.round() as i64)
    }

    /// Load-time per-pixel write into frame `frame`.
    ///
    /// Colors differing from the background widen the accumulated bounding
    /// box. `frame` must be a valid frame index.
    pub fn fill_pixel(&mut self, x: usize, y: usize, color: Rgb, frame: usize) {
        self.frames[frame].fill_at(x, y, color);
        if !color.approx_eq(self.background) {
            self.bounds.add_point(x, y);
        }
    }

    /// Advances the playback cursor by `delta * fps`, wrapping it around the
    /// frame count, and returns the new frame index.
    pub fn play_at_rate(&mut self, delta: f64) -> usize {
        self.cursor = (self.cursor + delta * self.fps).rem_euclid(self.frames.len() as f64);
        self.frame_index()
    }

    /// The current frame index: the playback cursor truncated and clamped
    /// into `0..frame_count`.
    pub fn frame_index(&self) -> usize {
        (self.cursor as usize).min(self.frames.len() - 1)
    }

    /// Rewinds playback to the first frame.
    pub fn reset(&mut self) {
        self.cursor = 0.0;
    }

    /// The frame at `index`, clamped into range.
    pub fn frame(&self, index: usize) -> &PixelBuffer {
        &self.frames[index.min(self.frames.len() - 1)]
    }

    /// The frame under the playback cursor.
    pub fn current_frame(&self) -> &PixelBuffer {
        self.frame(self.frame_index())
    }

    pub(crate) fn current_frame_mut(&mut self) -> &mut PixelBuffer {
        let index = self.frame_index();
        &mut self.frames[index]
    }

    /// The accumulated bounding box of non-background writes.
    pub fn bounds(&self) -> BoundingBox {
        self.bounds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sprite(frame_count: usize, fps: f64) -> Sprite {
        Sprite::new(4, 4, frame_count, fps, ColorMode::TrueColor, Rgb::BLACK)
    }

    #[test]
    fn playback_truncates_the_wrapped_cursor() {
        let mut s = sprite(5, 10.0);
        // 0.7s at 10 fps: cursor 7.0, wrapped to 2.0
        assert_eq!(s.play_at_rate(0.7), 2);
        // another 0.35s: cursor 2.0 + 3.5 = 5.5, wrapped to 0.5, truncated to 0
        assert_eq!(s.play_at_rate(0.35), 0);
    }

    #[test]
    fn playback_accumulates_across_small_deltas() {
        let mut s = sprite(5, 10.0);
        for _ in 0..7 {
            s.play_at_rate(0.1);
        }
        assert_eq!(s.frame_index(), 2);
    }

    #[test]
    fn reset_rewinds_to_the_first_frame() {
        let mut s = sprite(3, 30.0);
        s.play_at_rate(0.05);
        assert_eq!(s.frame_index(), 1);
        s.reset();
        assert_eq!(s.frame_index(), 0);
    }

    #[test]
    fn frame_lookup_clamps_out_of_range_indices() {
        let s = sprite(3, 10.0);
        assert_eq!(s.frame(99).width(), 4);
    }

    #[test]
    fn bounds_accumulate_only_non_background_writes() {
        let mut s = sprite(2, 10.0);
        assert!(s.bounds().is_empty());
        s.fill_pixel(1, 1, Rgb::BLACK, 0); // background, ignored
        assert!(s.bounds().is_empty());
        s.fill_pixel(1, 1, Rgb::WHITE, 0);
        s.fill_pixel(3, 2, Rgb::WHITE, 1);
        assert_eq!(s.bounds().extents(), Some((1, 1, 3, 2)));
    }

    #[test]
    fn rounded_pos_rounds_each_axis() {
        let mut s = sprite(1, 0.0);
        s.set_pos(3.6, -1.4);
        assert_eq!(s.rounded_pos(), (4, -1));
    }
}
