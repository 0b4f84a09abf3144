//! Color representation and quantization for terminal rendering.

use crate::RenderError;

/// Tolerance for channel comparisons on the 0..=255 scale.
///
/// Well below one quantization step, so two colors that compare equal always
/// encode to the same bytes.
pub const CHANNEL_EPSILON: f32 = 1e-3;

/// An RGB color with floating point channels on a 0..=255 scale.
///
/// Shader kernels and blend math are free to push channels out of range;
/// values are clamped and rounded only when a cell is encoded.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Rgb {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0.0, 0.0, 0.0);
    pub const WHITE: Rgb = Rgb::new(255.0, 255.0, 255.0);

    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    /// A gray level, `v` in 0..=255.
    pub const fn gray(v: f32) -> Self {
        Self::new(v, v, v)
    }

    /// Channel-wise comparison within [`CHANNEL_EPSILON`].
    pub fn approx_eq(self, other: Rgb) -> bool {
        (self.r - other.r).abs() <= CHANNEL_EPSILON
            && (self.g - other.g).abs() <= CHANNEL_EPSILON
            && (self.b - other.b).abs() <= CHANNEL_EPSILON
    }

    /// Clamps each channel to 0..=255 independently and rounds to the nearest
    /// integer.
    pub fn quantize(self) -> [u8; 3] {
        [
            quantize_channel(self.r),
            quantize_channel(self.g),
            quantize_channel(self.b),
        ]
    }
}

impl From<[u8; 3]> for Rgb {
    fn from([r, g, b]: [u8; 3]) -> Self {
        Self::new(r as f32, g as f32, b as f32)
    }
}

fn quantize_channel(c: f32) -> u8 {
    c.clamp(0.0, 255.0).round() as u8
}

/// Color depth used when encoding pixel pairs.
///
/// Each variant selects its own encode path in
/// [`encode`](crate::rendering::encode); there is no runtime inspection of
/// color values to pick a palette.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ColorMode {
    /// 8 base hues via SGR codes 30..=37 (foreground) and 40..=47 (background).
    FourBit,
    /// 256-color palette: the 6x6x6 cube plus the 232..=255 gray ramp.
    #[default]
    EightBit,
    /// 24-bit truecolor, no quantization loss.
    TrueColor,
}

impl ColorMode {
    /// Parses a numeric color depth in bits.
    ///
    /// Anything other than 4, 8 or 24 is rejected with
    /// [`RenderError::UnsupportedColorDepth`].
    pub fn from_depth(bits: u8) -> Result<Self, RenderError> {
        match bits {
            4 => Ok(ColorMode::FourBit),
            8 => Ok(ColorMode::EightBit),
            24 => Ok(ColorMode::TrueColor),
            other => Err(RenderError::UnsupportedColorDepth(other)),
        }
    }

    /// The depth in bits.
    pub fn depth(self) -> u8 {
        match self {
            ColorMode::FourBit => 4,
            ColorMode::EightBit => 8,
            ColorMode::TrueColor => 24,
        }
    }
}
