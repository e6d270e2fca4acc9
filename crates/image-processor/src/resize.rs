//! Aspect-preserving fit onto the label canvas.
//!
//! Uses Lanczos3 filtering for downsampling and centers the result on a white
//! canvas of exactly the requested size.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, Luma};
use tracing::debug;

/// Compute the largest size that fits inside `max_w x max_h` while keeping
/// the aspect ratio of `w x h`. Both results are at least 1.
pub fn fit_dimensions(w: u32, h: u32, max_w: u32, max_h: u32) -> (u32, u32) {
    let scale = f64::min(
        f64::from(max_w) / f64::from(w),
        f64::from(max_h) / f64::from(h),
    );
    let fw = (f64::from(w) * scale).round() as u32;
    let fh = (f64::from(h) * scale).round() as u32;
    (fw.clamp(1, max_w.max(1)), fh.clamp(1, max_h.max(1)))
}

/// Convert to grayscale, compositing transparent pixels over white.
///
/// Transparent PNG backgrounds would otherwise read as black and burn the
/// whole label.
pub fn to_gray_on_white(img: &DynamicImage) -> GrayImage {
    if !img.color().has_alpha() {
        return img.to_luma8();
    }
    let la = img.to_luma_alpha8();
    GrayImage::from_fn(la.width(), la.height(), |x, y| {
        let [l, a] = la.get_pixel(x, y).0;
        let (l, a) = (u32::from(l), u32::from(a));
        Luma([((l * a + 255 * (255 - a)) / 255) as u8])
    })
}

/// Resize `img` to fit within `canvas_w x canvas_h` and center it on a white
/// canvas of exactly that size.
///
/// The image is left untouched when it already has the canvas dimensions.
pub fn fit_to_canvas(img: &DynamicImage, canvas_w: u32, canvas_h: u32) -> GrayImage {
    let gray = to_gray_on_white(img);
    let (orig_w, orig_h) = gray.dimensions();

    if (orig_w, orig_h) == (canvas_w, canvas_h) {
        debug!(canvas_w, canvas_h, "Image already at canvas size, skipping resize");
        return gray;
    }

    let (new_w, new_h) = fit_dimensions(orig_w, orig_h, canvas_w, canvas_h);
    debug!(
        orig_w,
        orig_h, new_w, new_h, canvas_w, canvas_h, "Fitting image onto canvas"
    );

    let scaled = if (new_w, new_h) == (orig_w, orig_h) {
        gray
    } else {
        imageops::resize(&gray, new_w, new_h, FilterType::Lanczos3)
    };

    let mut canvas = GrayImage::from_pixel(canvas_w, canvas_h, Luma([255]));
    let left = i64::from((canvas_w - new_w) / 2);
    let top = i64::from((canvas_h - new_h) / 2);
    imageops::overlay(&mut canvas, &scaled, left, top);
    canvas
}
