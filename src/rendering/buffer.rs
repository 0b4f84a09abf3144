//! 2D pixel buffer with dirty tracking and cached ANSI encodings.
//!
//! A [`PixelBuffer`] is a grid of virtual pixels: two vertically adjacent
//! virtual rows share one terminal cell, encoded as a half-block glyph. The
//! buffer tracks a dirty flag and two lazily computed caches:
//!
//! *   the full-frame encoding (one string covering every physical row), and
//! *   the coalesced non-background [`Span`]s per physical row, used for
//!     cursor-addressed partial updates and sprite blitting.
//!
//! Every write marks the buffer dirty and invalidates both caches; each cache
//! is recomputed at most once before the next read.

use smallvec::SmallVec;

use crate::rendering::color::{ColorMode, Rgb};
use crate::rendering::encode::{self, encode_pixel_pair};

/// A maximal run of contiguous non-background x positions in one physical row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Span {
    /// First x position of the run.
    pub start: usize,
    /// Number of contiguous positions.
    pub len: usize,
}

/// Spans of one physical row. Rows rarely fragment into more than a handful of
/// runs, so they stay inline.
pub type RowSpans = SmallVec<[Span; 4]>;

/// A 2D grid of virtual pixels plus its encoding caches.
pub struct PixelBuffer {
    width: usize,
    height: usize,
    mode: ColorMode,
    /// Sentinel treated as "nothing here": cells equal to it (within epsilon)
    /// never produce spans and are skipped when blitting.
    background: Rgb,
    grid: Vec<Rgb>,
    dirty: bool,
    encoded: Option<String>,
    spans: Option<Vec<RowSpans>>,
}

impl PixelBuffer {
    /// Creates a `width` x `height` buffer filled with black.
    ///
    /// `height` counts virtual pixels and must be an even nonzero number; each
    /// pair of virtual rows maps onto one terminal row.
    pub fn new(width: usize, height: usize, mode: ColorMode) -> Self {
        Self::with_background(width, height, mode, Rgb::BLACK)
    }

    /// Creates a buffer filled with `background`, which also becomes the
    /// buffer's sentinel color.
    pub fn with_background(width: usize, height: usize, mode: ColorMode, background: Rgb) -> Self {
        assert!(width > 0, "buffer width must be nonzero");
        assert!(
            height > 0 && height % 2 == 0,
            "buffer height must be a nonzero multiple of 2"
        );
        Self {
            width,
            height,
            mode,
            background,
            grid: vec![background; width * height],
            dirty: false,
            encoded: None,
            spans: None,
        }
    }

    #[inline]
    fn index(&self, x: usize, y: usize) -> usize {
        y * self.width + x
    }

    /// Width in virtual pixels.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Height in virtual pixels.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Number of terminal rows covered by this buffer.
    pub fn physical_height(&self) -> usize {
        self.height / 2
    }

    pub fn mode(&self) -> ColorMode {
        self.mode
    }

    pub fn background(&self) -> Rgb {
        self.background
    }

    /// Replaces the background sentinel. Invalidates the caches, since span
    /// membership depends on it.
    pub fn set_background(&mut self, background: Rgb) {
        self.background = background;
        self.touch();
    }

    /// Whether the buffer has been written since the last full encode.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn touch(&mut self) {
        self.dirty = true;
        self.encoded = None;
        self.spans = None;
    }

    /// Writes one virtual pixel and marks the buffer dirty.
    ///
    /// Coordinates must be in bounds; the pipeline's drawing ops clamp before
    /// calling this.
    pub fn fill_at(&mut self, x: usize, y: usize, color: Rgb) {
        let idx = self.index(x, y);
        self.grid[idx] = color;
        self.touch();
    }

    /// Fills the whole grid with `color`. O(W x H).
    pub fn fill(&mut self, color: Rgb) {
        self.grid.fill(color);
        self.touch();
    }

    /// The stored color at `(x, y)`.
    pub fn pixel(&self, x: usize, y: usize) -> Rgb {
        self.grid[self.index(x, y)]
    }

    /// The stored color, or `None` when it matches the background sentinel
    /// within epsilon.
    pub fn effective_pixel(&self, x: usize, y: usize) -> Option<Rgb> {
        let color = self.pixel(x, y);
        (!color.approx_eq(self.background)).then_some(color)
    }

    /// Runs a per-pixel kernel `(x, y, (width, height)) -> Rgb` over the whole
    /// grid, writing every cell.
    pub fn compute(&mut self, mut kernel: impl FnMut(usize, usize, (usize, usize)) -> Rgb) {
        let (w, h) = (self.width, self.height);
        for y in 0..h {
            for x in 0..w {
                self.fill_at(x, y, kernel(x, y, (w, h)));
            }
        }
    }

    /// Coalesced non-background spans, one list per physical row.
    ///
    /// A column belongs to a span when either of the row's two virtual pixels
    /// differs from the background. Recomputed lazily after writes.
    pub fn dirty_spans(&mut self) -> &[RowSpans] {
        self.ensure_spans();
        self.spans.as_deref().unwrap_or(&[])
    }

    fn ensure_spans(&mut self) {
        if self.spans.is_none() {
            self.spans = Some(self.compute_spans());
        }
    }

    fn compute_spans(&self) -> Vec<RowSpans> {
        let mut rows = vec![RowSpans::new(); self.physical_height()];
        for (r, row) in rows.iter_mut().enumerate() {
            let top = 2 * r;
            let mut run: Option<Span> = None;
            for x in 0..self.width {
                let hit = !self.pixel(x, top).approx_eq(self.background)
                    || !self.pixel(x, top + 1).approx_eq(self.background);
                match (&mut run, hit) {
                    (Some(span), true) => span.len += 1,
                    (Some(span), false) => {
                        row.push(*span);
                        run = None;
                    }
                    (None, true) => run = Some(Span { start: x, len: 1 }),
                    (None, false) => {}
                }
            }
            if let Some(span) = run {
                row.push(span);
            }
        }
        rows
    }

    /// The full-frame encoding.
    ///
    /// Re-encodes when dirty, then caches: repeated calls without intervening
    /// writes return the byte-identical string. Each physical row is encoded
    /// left to right with a newline after the last column.
    pub fn encode_full(&mut self) -> &str {
        if self.dirty || self.encoded.is_none() {
            let mut out = String::with_capacity(self.width * self.physical_height() * 40);
            for r in 0..self.physical_height() {
                let top = 2 * r;
                for x in 0..self.width {
                    encode_pixel_pair(self.pixel(x, top), self.pixel(x, top + 1), self.mode, &mut out);
                }
                out.push('\n');
            }
            self.encoded = Some(out);
            self.dirty = false;
        }
        self.encoded.as_deref().unwrap_or("")
    }

    /// Cursor-addressed encoding of only the dirty spans.
    ///
    /// `origin_x` and `origin_y` translate the buffer in virtual pixels. Each
    /// span is prefixed with a 1-based `ESC[row;colH` address; spans whose
    /// address would land before the first row or column are skipped.
    pub fn encode_spans_at(&mut self, origin_x: i64, origin_y: i64) -> String {
        self.ensure_spans();
        let spans = self.spans.take().unwrap_or_default();
        let mut out = String::new();
        for (r, row) in spans.iter().enumerate() {
            let top = 2 * r;
            for span in row {
                let term_row = (origin_y + top as i64).div_euclid(2) + 1;
                let term_col = origin_x + span.start as i64 + 1;
                if term_row < 1 || term_col < 1 {
                    continue;
                }
                encode::cursor_address(term_row as usize, term_col as usize, &mut out);
                for x in span.start..span.start + span.len {
                    encode_pixel_pair(self.pixel(x, top), self.pixel(x, top + 1), self.mode, &mut out);
                }
            }
        }
        self.spans = Some(spans);
        out
    }

    /// Copies every non-background pixel into `target`, translated by
    /// `(origin_x, origin_y)` virtual pixels. Pixels falling outside the
    /// target are clipped.
    pub fn blit_into(&mut self, target: &mut PixelBuffer, origin_x: i64, origin_y: i64) {
        self.ensure_spans();
        let spans = self.spans.take().unwrap_or_default();
        for (r, row) in spans.iter().enumerate() {
            for span in row {
                // a span covers both virtual rows; copy only true foreground
                for vy in [2 * r, 2 * r + 1] {
                    for x in span.start..span.start + span.len {
                        let color = self.pixel(x, vy);
                        if color.approx_eq(self.background) {
                            continue;
                        }
                        let tx = origin_x + x as i64;
                        let ty = origin_y + vy as i64;
                        if tx < 0 || ty < 0 || tx >= target.width() as i64 || ty >= target.height() as i64 {
                            continue;
                        }
                        target.fill_at(tx as usize, ty as usize, color);
                    }
                }
            }
        }
        self.spans = Some(spans);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_dirty_the_buffer_until_encoded() {
        let mut buffer = PixelBuffer::new(2, 2, ColorMode::TrueColor);
        assert!(!buffer.is_dirty());
        buffer.fill_at(0, 0, Rgb::new(255.0, 0.0, 0.0));
        assert!(buffer.is_dirty());
        buffer.encode_full();
        assert!(!buffer.is_dirty());
    }

    #[test]
    fn repeated_encodes_return_identical_bytes() {
        let mut buffer = PixelBuffer::new(3, 4, ColorMode::EightBit);
        buffer.fill_at(1, 2, Rgb::new(0.0, 255.0, 0.0));
        let first = buffer.encode_full().to_owned();
        let second = buffer.encode_full().to_owned();
        assert_eq!(first, second);
        // a new write invalidates the cache and changes the encoding
        buffer.fill_at(0, 0, Rgb::new(255.0, 255.0, 255.0));
        assert!(buffer.is_dirty());
        assert_ne!(buffer.encode_full(), first);
    }

    #[test]
    fn full_encode_pairs_virtual_rows_with_trailing_newlines() {
        let mut buffer = PixelBuffer::new(2, 2, ColorMode::TrueColor);
        for x in 0..2 {
            buffer.fill_at(x, 0, Rgb::new(255.0, 0.0, 0.0));
            buffer.fill_at(x, 1, Rgb::new(0.0, 255.0, 0.0));
        }
        let cell = "\x1b[48;2;0;255;0m\x1b[38;2;255;0;0m▀";
        assert_eq!(buffer.encode_full(), format!("{cell}{cell}\n"));
    }

    #[test]
    fn spans_coalesce_contiguous_dirty_columns() {
        let mut buffer = PixelBuffer::new(17, 2, ColorMode::TrueColor);
        for x in [2, 3, 4, 9, 10, 15] {
            buffer.fill_at(x, 0, Rgb::WHITE);
        }
        let spans = buffer.dirty_spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(
            spans[0].as_slice(),
            &[
                Span { start: 2, len: 3 },
                Span { start: 9, len: 2 },
                Span { start: 15, len: 1 },
            ]
        );
    }

    #[test]
    fn spans_cover_either_virtual_row() {
        let mut buffer = PixelBuffer::new(4, 4, ColorMode::TrueColor);
        // physical row 0: bottom virtual row only
        buffer.fill_at(1, 1, Rgb::WHITE);
        // physical row 1: top virtual row only
        buffer.fill_at(3, 2, Rgb::WHITE);
        let spans = buffer.dirty_spans();
        assert_eq!(spans[0].as_slice(), &[Span { start: 1, len: 1 }]);
        assert_eq!(spans[1].as_slice(), &[Span { start: 3, len: 1 }]);
    }

    #[test]
    fn span_cache_is_invalidated_by_writes() {
        let mut buffer = PixelBuffer::new(8, 2, ColorMode::TrueColor);
        buffer.fill_at(0, 0, Rgb::WHITE);
        assert_eq!(buffer.dirty_spans()[0].len(), 1);
        buffer.fill_at(4, 0, Rgb::WHITE);
        assert_eq!(
            buffer.dirty_spans()[0].as_slice(),
            &[Span { start: 0, len: 1 }, Span { start: 4, len: 1 }]
        );
    }

    #[test]
    fn effective_pixel_hides_the_background() {
        let background = Rgb::new(10.0, 20.0, 30.0);
        let mut buffer = PixelBuffer::with_background(2, 2, ColorMode::TrueColor, background);
        assert_eq!(buffer.effective_pixel(0, 0), None);
        buffer.fill_at(0, 0, Rgb::new(10.0005, 20.0, 30.0));
        // within epsilon of the background: still hidden
        assert_eq!(buffer.effective_pixel(0, 0), None);
        buffer.fill_at(1, 1, Rgb::WHITE);
        assert_eq!(buffer.effective_pixel(1, 1), Some(Rgb::WHITE));
    }

    #[test]
    fn encode_spans_addresses_each_fragment() {
        let mut buffer = PixelBuffer::new(8, 2, ColorMode::TrueColor);
        buffer.fill_at(2, 0, Rgb::new(255.0, 0.0, 0.0));
        let out = buffer.encode_spans_at(0, 0);
        assert_eq!(out, "\x1b[1;3H\x1b[48;2;0;0;0m\x1b[38;2;255;0;0m▀");
        // translation shifts both the row and the column address
        let out = buffer.encode_spans_at(5, 4);
        assert_eq!(out, "\x1b[3;8H\x1b[48;2;0;0;0m\x1b[38;2;255;0;0m▀");
    }

    #[test]
    fn compute_runs_the_kernel_over_every_pixel() {
        let mut buffer = PixelBuffer::new(3, 2, ColorMode::TrueColor);
        buffer.compute(|x, y, (w, h)| {
            assert_eq!((w, h), (3, 2));
            Rgb::new(x as f32, y as f32, 0.0)
        });
        assert_eq!(buffer.pixel(2, 1), Rgb::new(2.0, 1.0, 0.0));
        assert!(buffer.is_dirty());
    }

    #[test]
    fn blit_copies_foreground_and_clips_at_the_target_edge() {
        let mut sprite = PixelBuffer::with_background(4, 2, ColorMode::TrueColor, Rgb::BLACK);
        sprite.fill_at(0, 0, Rgb::WHITE);
        sprite.fill_at(3, 1, Rgb::WHITE);
        let mut target = PixelBuffer::new(4, 4, ColorMode::TrueColor);
        sprite.blit_into(&mut target, 2, 2);
        // (0,0) lands at (2,2); (3,1) would land at (5,3), clipped
        assert_eq!(target.effective_pixel(2, 2), Some(Rgb::WHITE));
        assert_eq!(target.effective_pixel(3, 3), None);
        // background pixels inside the span are not stamped onto the target
        let mut marked = PixelBuffer::new(4, 4, ColorMode::TrueColor);
        marked.fill(Rgb::new(9.0, 9.0, 9.0));
        sprite.blit_into(&mut marked, 0, 0);
        assert_eq!(marked.pixel(1, 0), Rgb::new(9.0, 9.0, 9.0));
        assert_eq!(marked.pixel(0, 0), Rgb::WHITE);
    }
}
