//! Thermal-safety pass for the print head.
//!
//! The printer silently drops jobs containing large solid-burn regions. After
//! dithering, every horizontal burn run of `max_burn_run` dots or more is
//! broken up with a brick-offset near-black pattern: one blank dot per
//! `max_burn_run` dots, shifted by half a period on odd lines. With the
//! threshold capped at 8, no packed byte can end up fully burned.

use tracing::debug;

use crate::Result;
use crate::bitmap::Bitmap;

/// Smallest allowed run threshold (a 1-dot limit would blank everything).
pub const MIN_BURN_RUN: usize = 2;

/// Largest allowed run threshold; keeps every packed byte partially blank.
pub const MAX_BURN_RUN: usize = 8;

/// Thermal-safety settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafetyConfig {
    max_burn_run: usize,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_burn_run: MAX_BURN_RUN,
        }
    }
}

impl SafetyConfig {
    /// Create a config; the threshold is clamped to `2..=8`.
    pub fn new(max_burn_run: usize) -> Self {
        Self {
            max_burn_run: max_burn_run.clamp(MIN_BURN_RUN, MAX_BURN_RUN),
        }
    }

    /// Burn runs of this length or longer are not allowed in the output.
    pub fn max_burn_run(&self) -> usize {
        self.max_burn_run
    }
}

/// Break every burn run of at least `max_burn_run` dots in a row-major burn
/// mask (`true` = burn). Returns the number of dots switched to blank.
pub fn enforce(mask: &mut [bool], width: usize, config: &SafetyConfig) -> usize {
    if width == 0 {
        return 0;
    }
    let period = config.max_burn_run;
    let mut cleared = 0;

    for (y, row) in mask.chunks_mut(width).enumerate() {
        let offset = (y % 2) * (period / 2);
        let mut x = 0;
        while x < row.len() {
            if !row[x] {
                x += 1;
                continue;
            }
            let start = x;
            while x < row.len() && row[x] {
                x += 1;
            }
            if x - start < period {
                continue;
            }
            for (i, dot) in row[start..x].iter_mut().enumerate() {
                if (start + i + offset) % period == period - 1 {
                    *dot = false;
                    cleared += 1;
                }
            }
        }
    }

    if cleared > 0 {
        debug!(cleared, period, "Broke up solid burn runs");
    }
    cleared
}

/// Apply [`enforce`] to an already packed bitmap.
///
/// Bitmaps produced by `render` pass through unchanged; caller-built ones
/// get their solid runs broken up the same way. Returns the safe bitmap and
/// the number of dots cleared.
pub fn make_safe(bitmap: &Bitmap, config: &SafetyConfig) -> Result<(Bitmap, usize)> {
    let mut mask = bitmap.to_burn_mask();
    let cleared = enforce(&mut mask, bitmap.width() as usize, config);
    let safe = Bitmap::from_burn_mask(bitmap.width(), bitmap.height(), &mask)?;
    Ok((safe, cleared))
}

/// Length of the longest horizontal burn run in a row-major mask.
pub fn longest_burn_run(mask: &[bool], width: usize) -> usize {
    if width == 0 {
        return 0;
    }
    mask.chunks(width)
        .map(|row| {
            row.split(|&burn| !burn)
                .map(<[bool]>::len)
                .max()
                .unwrap_or(0)
        })
        .max()
        .unwrap_or(0)
}
