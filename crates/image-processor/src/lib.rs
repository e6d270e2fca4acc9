//! Image processing for the label printer's 1-bit print head.
//!
//! Turns an arbitrary raster image into a packed [`Bitmap`] that fits the
//! printable area, is dithered, and satisfies the head's thermal-safety
//! constraint (no long solid-burn runs).

pub mod barcode;
pub mod bitmap;
pub mod dither;
pub mod pattern;
pub mod qr;
pub mod render;
pub mod resize;
pub mod rotate;
pub mod thermal;

// Re-exports for convenience
pub use barcode::{BarcodeOptions, Symbology, generate_barcode};
pub use bitmap::Bitmap;
pub use dither::{DitherMethod, bayer_dither, floyd_steinberg_dither};
pub use pattern::coverage_pattern;
pub use qr::{ErrorCorrection, QrSize, generate_qr};
pub use render::{RenderOptions, render};
pub use resize::fit_to_canvas;
pub use rotate::auto_rotate_portrait;
pub use thermal::SafetyConfig;

/// Printable width of the head in dots (~15 mm at 203 DPI).
pub const MAX_WIDTH_PX: u32 = 120;

/// Printable height in dots (40 mm label at 203 DPI).
pub const MAX_HEIGHT_PX: u32 = 320;

/// Errors produced by the image pipeline.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("Source image has zero area ({width}x{height})")]
    ImageTooSmall { width: u32, height: u32 },

    #[error("Bitmap {width}x{height} exceeds device limit {max_width}x{max_height}")]
    TooLarge {
        width: u32,
        height: u32,
        max_width: u32,
        max_height: u32,
    },

    #[error("Bitmap data length {actual} does not match {expected} bytes")]
    DataLength { expected: usize, actual: usize },

    #[error("Cannot encode {symbology}: {reason}")]
    Encode {
        symbology: &'static str,
        reason: String,
    },
}

/// Result type alias for image pipeline operations.
pub type Result<T> = std::result::Result<T, RenderError>;
