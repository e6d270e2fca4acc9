//! Dithering from grayscale to black-and-white.
//!
//! The print head cannot render gray, and a flat threshold turns mid-tones
//! into solid burn areas the printer refuses. Both methods here spread the
//! burn dots spatially:
//! - Floyd-Steinberg error diffusion (default)
//! - Bayer 8x8 ordered dithering

use image::{GrayImage, Luma};
use tracing::debug;

/// Quantization midpoint for error diffusion.
const THRESHOLD: i16 = 128;

/// Bayer 8x8 threshold matrix (values 0..=63).
const BAYER8: [[u8; 8]; 8] = [
    [0, 32, 8, 40, 2, 34, 10, 42],
    [48, 16, 56, 24, 50, 18, 58, 26],
    [12, 44, 4, 36, 14, 46, 6, 38],
    [60, 28, 52, 20, 62, 30, 54, 22],
    [3, 35, 11, 43, 1, 33, 9, 41],
    [51, 19, 59, 27, 49, 17, 57, 25],
    [15, 47, 7, 39, 13, 45, 5, 37],
    [63, 31, 55, 23, 61, 29, 53, 21],
];

/// Dithering algorithm used by the render pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DitherMethod {
    #[default]
    FloydSteinberg,
    Bayer,
}

impl DitherMethod {
    /// Parse a configuration value (`floyd-steinberg` / `bayer`).
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "floyd-steinberg" | "floyd_steinberg" | "fs" => Some(Self::FloydSteinberg),
            "bayer" | "ordered" => Some(Self::Bayer),
            _ => None,
        }
    }

    pub fn apply(self, img: &GrayImage) -> GrayImage {
        match self {
            Self::FloydSteinberg => floyd_steinberg_dither(img),
            Self::Bayer => bayer_dither(img),
        }
    }
}

/// Apply Floyd-Steinberg dithering to a grayscale image.
///
/// Output pixels are exactly 0 (burn) or 255 (blank). Error distribution:
/// right 7/16, bottom-left 3/16, bottom 5/16, bottom-right 1/16.
pub fn floyd_steinberg_dither(img: &GrayImage) -> GrayImage {
    let (width, height) = img.dimensions();
    debug!(width, height, "Applying Floyd-Steinberg dithering");

    let (w, h) = (width as usize, height as usize);
    // i16 working buffer absorbs diffused error beyond 0..=255
    let mut buffer: Vec<i16> = img.pixels().map(|p| i16::from(p.0[0])).collect();

    for y in 0..h {
        for x in 0..w {
            let idx = y * w + x;
            let old = buffer[idx];
            let new = if old >= THRESHOLD { 255 } else { 0 };
            let error = old - new;
            buffer[idx] = new;

            if x + 1 < w {
                buffer[idx + 1] += error * 7 / 16;
            }
            if y + 1 < h {
                if x > 0 {
                    buffer[idx + w - 1] += error * 3 / 16;
                }
                buffer[idx + w] += error * 5 / 16;
                if x + 1 < w {
                    buffer[idx + w + 1] += error / 16;
                }
            }
        }
    }

    GrayImage::from_fn(width, height, |x, y| {
        Luma([buffer[y as usize * w + x as usize].clamp(0, 255) as u8])
    })
}

/// Apply Bayer 8x8 ordered dithering to a grayscale image.
///
/// A pixel stays blank when its intensity exceeds the matrix threshold at
/// its position, so pure white and pure black map to themselves.
pub fn bayer_dither(img: &GrayImage) -> GrayImage {
    let (width, height) = img.dimensions();
    debug!(width, height, "Applying Bayer ordered dithering");

    GrayImage::from_fn(width, height, |x, y| {
        let value = f32::from(img.get_pixel(x, y).0[0]) / 255.0;
        let cell = BAYER8[(y % 8) as usize][(x % 8) as usize];
        let threshold = (f32::from(cell) + 0.5) / 64.0;
        Luma([if value > threshold { 255 } else { 0 }])
    })
}
