//! Orientation helpers.
//!
//! Labels feed portrait (TSPL width is the head direction, height is the
//! feed direction), so landscape artwork is turned before fitting.

use image::DynamicImage;
use tracing::debug;

/// Rotate a landscape image 90 degrees clockwise so it becomes portrait.
///
/// Portrait and square images are returned unchanged.
pub fn auto_rotate_portrait(img: &DynamicImage) -> DynamicImage {
    let (w, h) = (img.width(), img.height());

    if w > h {
        debug!(w, h, "Landscape image detected, rotating to portrait");
        img.rotate90()
    } else {
        img.clone()
    }
}
