//! ANSI escape sequence encoding for half-block pixel pairs.
//!
//! One terminal cell shows two vertically stacked virtual pixels through the
//! upper half block `▀`: the foreground SGR paints the top pixel, the
//! background SGR paints the bottom one. Every fragment rewrites both SGR
//! parameters, so no attribute leaks between cells and no per-cell reset is
//! needed.

use std::fmt::Write;

use crate::rendering::color::{ColorMode, Rgb};

/// Upper half block; foreground = top virtual pixel, background = bottom.
pub const HALF_BLOCK: char = '\u{2580}';

/// Appends the fragment for one physical cell to `out`.
///
/// Both colors are quantized (clamped to 0..=255 and rounded) before the mode
/// specific palette mapping is applied.
pub fn encode_pixel_pair(top: Rgb, bottom: Rgb, mode: ColorMode, out: &mut String) {
    let t = top.quantize();
    let b = bottom.quantize();
    match mode {
        ColorMode::FourBit => {
            let _ = write!(out, "\x1b[{};{}m{}", base_hue(t), base_hue(b) + 10, HALF_BLOCK);
        }
        ColorMode::EightBit => {
            let _ = write!(
                out,
                "\x1b[48;5;{}m\x1b[38;5;{}m{}",
                cube_index(b),
                cube_index(t),
                HALF_BLOCK
            );
        }
        ColorMode::TrueColor => {
            let _ = write!(
                out,
                "\x1b[48;2;{};{};{}m\x1b[38;2;{};{};{}m{}",
                b[0], b[1], b[2], t[0], t[1], t[2], HALF_BLOCK
            );
        }
    }
}

/// Appends a 1-based `ESC[row;colH` cursor address to `out`.
pub fn cursor_address(row: usize, col: usize, out: &mut String) {
    let _ = write!(out, "\x1b[{row};{col}H");
}

/// Foreground SGR code 30..=37 for the 3-bit hue `R<<2 | G<<1 | B`.
///
/// Channels threshold to {0, 1}; any nonzero channel counts as set. The
/// background code is this value plus 10.
fn base_hue([r, g, b]: [u8; 3]) -> u8 {
    let code = (u8::from(r > 0) << 2) | (u8::from(g > 0) << 1) | u8::from(b > 0);
    match code {
        7 => 37, // white
        6 => 33, // yellow
        5 => 35, // magenta
        4 => 31, // red
        3 => 36, // cyan
        2 => 32, // green
        1 => 34, // blue
        _ => 30, // black
    }
}

/// 256-color palette index on the 6x6x6 cube: `16 + 36r' + 6g' + b'` with each
/// channel scaled to 0..=5 by rounding.
pub fn cube_index([r, g, b]: [u8; 3]) -> u8 {
    let scale = |c: u8| (c as f32 / 255.0 * 5.0).round() as u8;
    16 + 36 * scale(r) + 6 * scale(g) + scale(b)
}

/// Index into the 24-step grayscale ramp at 232..=255. Levels clamp to 0..=23.
pub fn gray_ramp_index(level: u8) -> u8 {
    232 + level.min(23)
}
