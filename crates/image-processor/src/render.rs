//! Image-to-bitmap pipeline.
//!
//! fit onto canvas -> grayscale -> dither -> thermal safety -> pack.
//! The safety pass runs after dithering: dithering alone leaves synthetic
//! solid fills untouched.

use image::DynamicImage;
use tracing::{debug, info};

use crate::bitmap::Bitmap;
use crate::dither::DitherMethod;
use crate::resize::fit_to_canvas;
use crate::rotate::auto_rotate_portrait;
use crate::thermal::{self, SafetyConfig};
use crate::{MAX_HEIGHT_PX, MAX_WIDTH_PX, RenderError, Result};

/// Options controlling the render pipeline.
#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    /// Rotate landscape sources to portrait before fitting.
    pub auto_rotate: bool,

    /// Dithering algorithm (a flat threshold is intentionally not offered).
    pub dither: DitherMethod,

    /// Thermal-safety settings.
    pub safety: SafetyConfig,
}

impl RenderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: set auto-rotate flag.
    pub fn with_auto_rotate(mut self, val: bool) -> Self {
        self.auto_rotate = val;
        self
    }

    /// Builder: set dithering method.
    pub fn with_dither(mut self, method: DitherMethod) -> Self {
        self.dither = method;
        self
    }

    /// Builder: set the burn-run threshold (clamped to 2..=8).
    pub fn with_max_burn_run(mut self, dots: usize) -> Self {
        self.safety = SafetyConfig::new(dots);
        self
    }
}

/// Render `image` into a bitmap of exactly `target_w x target_h` dots.
///
/// The target is clamped to the device limits (120x320) and to at least one
/// dot per side. Fails only when the source has zero area.
pub fn render(
    image: &DynamicImage,
    target_w: u32,
    target_h: u32,
    options: &RenderOptions,
) -> Result<Bitmap> {
    let (src_w, src_h) = (image.width(), image.height());
    if src_w == 0 || src_h == 0 {
        return Err(RenderError::ImageTooSmall {
            width: src_w,
            height: src_h,
        });
    }

    let canvas_w = target_w.clamp(1, MAX_WIDTH_PX);
    let canvas_h = target_h.clamp(1, MAX_HEIGHT_PX);
    if (canvas_w, canvas_h) != (target_w, target_h) {
        debug!(target_w, target_h, canvas_w, canvas_h, "Clamped render target");
    }

    let rotated;
    let source = if options.auto_rotate {
        rotated = auto_rotate_portrait(image);
        &rotated
    } else {
        image
    };

    let canvas = fit_to_canvas(source, canvas_w, canvas_h);
    let dithered = options.dither.apply(&canvas);

    let mut mask: Vec<bool> = dithered.pixels().map(|p| p.0[0] == 0).collect();
    let cleared = thermal::enforce(&mut mask, canvas_w as usize, &options.safety);

    let bitmap = Bitmap::from_burn_mask(canvas_w, canvas_h, &mask)?;
    info!(
        src_w,
        src_h,
        width = canvas_w,
        height = canvas_h,
        bytes = bitmap.data().len(),
        safety_cleared = cleared,
        "Rendered label bitmap"
    );
    Ok(bitmap)
}
