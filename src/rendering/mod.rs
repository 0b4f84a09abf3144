//! Pixel-level rendering: colors, buffers, sprites and the ANSI encoder.
//!
//! **Sub-modules:**
//!
//! *   [`color`]: the [`Rgb`] color type, quantization and the [`ColorMode`]
//!     depth selection.
//! *   [`encode`]: byte-exact ANSI fragments for half-block pixel pairs.
//! *   [`buffer`]: the [`PixelBuffer`], its dirty tracking and its cached
//!     encodings.
//! *   [`sprite`]: the [`Sprite`] frame sequence and its playback state.
//!
//! **Key concepts:**
//!
//! *   **Virtual pixel:** one `(x, y)` cell of the logical RGB grid. Two
//!     vertically adjacent virtual pixels share one terminal cell through the
//!     `▀` half block: the glyph's foreground paints the top pixel, its
//!     background paints the bottom one.
//! *   **Physical row:** a terminal character row, covering two virtual rows.
//! *   **Span:** a maximal run of contiguous non-background columns within
//!     one physical row; the unit of partial updates.
//!
//! [`Rgb`]: color::Rgb
//! [`ColorMode`]: color::ColorMode
//! [`PixelBuffer`]: buffer::PixelBuffer
//! [`Sprite`]: sprite::Sprite

pub mod buffer;
pub mod color;
pub mod encode;
pub mod sprite;
