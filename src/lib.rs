//! # termshade
//!
//! A terminal "pixel" renderer. An in-memory RGB grid is encoded into ANSI
//! escape sequences, two virtual pixels per terminal cell via the `▀` half
//! block, with dirty-span tracking to keep the byte stream small and a
//! dedicated output worker so slow terminal writes never stall the
//! simulation tick.
//!
//! The crate is driven from the outside: a driver loop supplies the elapsed
//! time each tick and a list of [`RenderTask`]s, and calls
//! [`Pipeline::present`]. Frame pacing, signal handling and input stay in
//! the driver.
//!
//! ```rust ,no_run
//! use termshade::{Pipeline, PipelineDesc, RenderTask, Rgb};
//!
//! struct Scene;
//!
//! impl RenderTask for Scene {
//!     fn on_draw(&mut self, pipeline: &mut Pipeline, _delta: f64) {
//!         pipeline.clear_scene(Rgb::new(16.0, 16.0, 32.0));
//!         pipeline.draw_solid_circle_2d((20.0, 14.0), 9.0, Rgb::new(255.0, 255.0, 0.0));
//!     }
//! }
//!
//! termshade::install_panic_handler();
//! let mut pipeline = Pipeline::new(PipelineDesc {
//!     width: 42,
//!     height: 28,
//!     ..Default::default()
//! })
//! .unwrap();
//! pipeline.use_exclusive_screen(true).unwrap();
//!
//! let mut tasks: Vec<Box<dyn RenderTask>> = vec![Box::new(Scene)];
//! for _ in 0..300 {
//!     // the driver paces ticks; present never blocks on the terminal
//!     pipeline.present(1.0 / 30.0, &mut tasks);
//! }
//!
//! pipeline.use_exclusive_screen(false).unwrap();
//! ```

use std::io::{self, stdout};

use crossterm::{cursor, execute, terminal};
use thiserror::Error;

pub mod pipeline;
pub mod rendering;
pub mod task;

pub use pipeline::worker::{BoxedSink, PerfSample};
pub use pipeline::{EncodePolicy, Pipeline, PipelineDesc, SpriteId, SubmitMode};
pub use rendering::buffer::{PixelBuffer, Span};
pub use rendering::color::{ColorMode, Rgb};
pub use rendering::sprite::{BoundingBox, Sprite};
pub use task::RenderTask;

/// Errors surfaced by pipeline setup and terminal mode switching.
///
/// Rendering-time faults never appear here: a full queue blocks or drops
/// depending on [`SubmitMode`], and worker write failures degrade to skipped
/// frames.
#[derive(Debug, Error)]
pub enum RenderError {
    /// A color depth other than 4, 8 or 24 bits.
    #[error("unsupported color depth: {0} bits")]
    UnsupportedColorDepth(u8),
    /// Zero-sized canvas, or a virtual height that is not a multiple of 2.
    #[error("invalid canvas dimensions {width}x{height}: width must be nonzero and height an even nonzero number")]
    InvalidDimensions { width: usize, height: usize },
    /// The backbuffer ring needs at least one buffer.
    #[error("buffer count must be at least 1")]
    InvalidBufferCount,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Restores the terminal to its regular state: shows the cursor, clears the
/// display and leaves the alternate screen.
pub fn restore_terminal() -> io::Result<()> {
    let mut stdout = stdout();
    execute!(stdout, cursor::Show)?;
    execute!(stdout, terminal::Clear(terminal::ClearType::All))?;
    execute!(stdout, terminal::LeaveAlternateScreen)?;
    Ok(())
}

/// Installs a panic handler that restores the terminal before printing the
/// panic.
///
/// Without this the message lands on the alternate screen and disappears
/// with it, while the main screen keeps a hidden cursor.
pub fn install_panic_handler() {
    let old_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |pinfo| {
        let _ = restore_terminal();
        eprintln!("{}", pinfo);
        old_hook(pinfo);
    }));
}
