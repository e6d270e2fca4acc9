//! Coverage test pattern for validating the printable area.
//!
//! Border, corner markers, a centre crosshair and edge tick marks every
//! `GRID_SPACING` dots. Corner markers are solid on purpose: they exercise
//! the thermal-safety pass when rendered.

use image::{GrayImage, Luma};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;

/// Default pattern width (dots), matching the vendor app's print area.
pub const DEFAULT_WIDTH: u32 = 96;

/// Default pattern height (dots).
pub const DEFAULT_HEIGHT: u32 = 304;

const BORDER_WIDTH: u32 = 2;
const GRID_SPACING: u32 = 20;
const CORNER_SIZE: u32 = 8;
const CROSSHAIR: f32 = 10.0;
const TICK_LENGTH: f32 = 4.0;

const BLACK: Luma<u8> = Luma([0]);
const WHITE: Luma<u8> = Luma([255]);

/// Generate a coverage pattern of `width x height` dots (grayscale, 0/255).
pub fn coverage_pattern(width: u32, height: u32) -> GrayImage {
    let mut img = GrayImage::from_pixel(width.max(1), height.max(1), WHITE);
    let (w, h) = img.dimensions();

    for inset in 0..BORDER_WIDTH.min(w / 2).min(h / 2) {
        let rect = Rect::at(inset as i32, inset as i32).of_size(w - 2 * inset, h - 2 * inset);
        draw_hollow_rect_mut(&mut img, rect, BLACK);
    }

    let corner = CORNER_SIZE.min(w).min(h);
    for (cx, cy) in [(0, 0), (w - corner, 0), (0, h - corner), (w - corner, h - corner)] {
        draw_filled_rect_mut(
            &mut img,
            Rect::at(cx as i32, cy as i32).of_size(corner, corner),
            BLACK,
        );
    }

    let (mx, my) = ((w / 2) as f32, (h / 2) as f32);
    draw_line_segment_mut(&mut img, (mx - CROSSHAIR, my), (mx + CROSSHAIR, my), BLACK);
    draw_line_segment_mut(&mut img, (mx, my - CROSSHAIR), (mx, my + CROSSHAIR), BLACK);

    let (right, bottom) = ((w - 1) as f32, (h - 1) as f32);
    for x in (GRID_SPACING..w).step_by(GRID_SPACING as usize) {
        let x = x as f32;
        draw_line_segment_mut(&mut img, (x, 0.0), (x, TICK_LENGTH), BLACK);
        draw_line_segment_mut(&mut img, (x, bottom - TICK_LENGTH), (x, bottom), BLACK);
    }
    for y in (GRID_SPACING..h).step_by(GRID_SPACING as usize) {
        let y = y as f32;
        draw_line_segment_mut(&mut img, (0.0, y), (TICK_LENGTH, y), BLACK);
        draw_line_segment_mut(&mut img, (right - TICK_LENGTH, y), (right, y), BLACK);
    }

    img
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_dimensions() {
        let img = coverage_pattern(DEFAULT_WIDTH, DEFAULT_HEIGHT);
        assert_eq!(img.dimensions(), (96, 304));
    }

    #[test]
    fn test_pattern_has_border_and_corners() {
        let img = coverage_pattern(96, 304);
        assert_eq!(img.get_pixel(0, 150).0[0], 0);
        assert_eq!(img.get_pixel(95, 150).0[0], 0);
        assert_eq!(img.get_pixel(5, 5).0[0], 0);
        assert_eq!(img.get_pixel(90, 298).0[0], 0);
    }

    #[test]
    fn test_pattern_interior_is_mostly_white() {
        let img = coverage_pattern(96, 304);
        assert_eq!(img.get_pixel(30, 60).0[0], 255);
        // Crosshair centre burns.
        assert_eq!(img.get_pixel(48, 152).0[0], 0);
    }
}
