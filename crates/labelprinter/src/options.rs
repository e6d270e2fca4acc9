//! Print job parameters.
//!
//! A [`PrintJobSpec`] describes the label stock and how one bitmap is placed
//! and printed on it. Values are checked by [`PrintJobSpec::validate`] when
//! the job is encoded.

use crate::{DOTS_PER_MM, LabelPrinterError, Result};

/// Highest `DENSITY` level the printer accepts.
pub const MAX_DENSITY: u8 = 15;

/// Label stock dimensions in millimetres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabelSize {
    pub width_mm: f32,
    pub height_mm: f32,
}

impl Default for LabelSize {
    fn default() -> Self {
        Self {
            width_mm: 14.0,
            height_mm: 40.0,
        }
    }
}

impl LabelSize {
    pub fn new(width_mm: f32, height_mm: f32) -> Self {
        Self {
            width_mm,
            height_mm,
        }
    }

    /// Printable size in dots at 203 dpi.
    pub fn dots(&self) -> (u32, u32) {
        let to_dots = |mm: f32| (mm.max(0.0) * DOTS_PER_MM).round() as u32;
        (to_dots(self.width_mm), to_dots(self.height_mm))
    }
}

/// How the printer finds the start of the next label.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MediaMode {
    /// Die-cut labels separated by a gap.
    Gap { gap_mm: f32, offset_mm: f32 },
    /// Stock with a printed black mark on the back.
    BlackMark { height_mm: f32, offset_mm: f32 },
    /// Continuous roll, no separator.
    Continuous,
}

impl Default for MediaMode {
    fn default() -> Self {
        MediaMode::Gap {
            gap_mm: 2.0,
            offset_mm: 0.0,
        }
    }
}

/// Feed direction of the printout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Direction {
    #[default]
    Forward = 0,
    Reversed = 1,
}

/// How `BITMAP` data is combined with the image buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BitmapMode {
    Overwrite = 0,
    #[default]
    Or = 1,
    Xor = 2,
}

/// How more than one copy is produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CopyStrategy {
    /// Resend the whole SIZE..PRINT sequence once per label.
    #[default]
    Resend,
    /// Send the job once and let the printer repeat it with `PRINT n`.
    DeviceCount,
}

/// Parameters for one print job.
#[derive(Debug, Clone, PartialEq)]
pub struct PrintJobSpec {
    pub label: LabelSize,
    pub media: MediaMode,
    pub direction: Direction,
    pub mirror: bool,
    /// `None` leaves the printer's current density untouched.
    pub density: Option<u8>,
    pub bitmap_mode: BitmapMode,
    pub copies: u32,
    pub copy_strategy: CopyStrategy,
    /// Bitmap origin in dots.
    pub x: u32,
    pub y: u32,
}

impl Default for PrintJobSpec {
    fn default() -> Self {
        Self {
            label: LabelSize::default(),
            media: MediaMode::default(),
            direction: Direction::default(),
            mirror: false,
            density: None,
            bitmap_mode: BitmapMode::default(),
            copies: 1,
            copy_strategy: CopyStrategy::default(),
            x: 0,
            y: 0,
        }
    }
}

impl PrintJobSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: set label dimensions.
    pub fn with_label_size(mut self, width_mm: f32, height_mm: f32) -> Self {
        self.label = LabelSize::new(width_mm, height_mm);
        self
    }

    /// Builder: set media mode.
    pub fn with_media(mut self, media: MediaMode) -> Self {
        self.media = media;
        self
    }

    /// Builder: set print direction.
    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    /// Builder: set mirror flag.
    pub fn with_mirror(mut self, mirror: bool) -> Self {
        self.mirror = mirror;
        self
    }

    /// Builder: set density (0..=15, checked on validate).
    pub fn with_density(mut self, level: u8) -> Self {
        self.density = Some(level);
        self
    }

    /// Builder: set bitmap mode.
    pub fn with_bitmap_mode(mut self, mode: BitmapMode) -> Self {
        self.bitmap_mode = mode;
        self
    }

    /// Builder: set copy count.
    pub fn with_copies(mut self, copies: u32) -> Self {
        self.copies = copies;
        self
    }

    /// Builder: set copy strategy.
    pub fn with_copy_strategy(mut self, strategy: CopyStrategy) -> Self {
        self.copy_strategy = strategy;
        self
    }

    /// Builder: set bitmap origin in dots.
    pub fn with_origin(mut self, x: u32, y: u32) -> Self {
        self.x = x;
        self.y = y;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let positive = |v: f32| v.is_finite() && v > 0.0;
        let non_negative = |v: f32| v.is_finite() && v >= 0.0;

        if !positive(self.label.width_mm) || !positive(self.label.height_mm) {
            return Err(invalid(format!(
                "label size {}x{} mm must be positive",
                self.label.width_mm, self.label.height_mm
            )));
        }
        match self.media {
            MediaMode::Gap { gap_mm, offset_mm } if !non_negative(gap_mm) || !non_negative(offset_mm) => {
                return Err(invalid("gap and offset must be non-negative".into()));
            }
            MediaMode::BlackMark {
                height_mm,
                offset_mm,
            } if !non_negative(height_mm) || !non_negative(offset_mm) => {
                return Err(invalid("black mark height and offset must be non-negative".into()));
            }
            _ => {}
        }
        if let Some(level) = self.density {
            if level > MAX_DENSITY {
                return Err(invalid(format!(
                    "density {level} out of range 0..={MAX_DENSITY}"
                )));
            }
        }
        if self.copies == 0 {
            return Err(invalid("copies must be at least 1".into()));
        }
        Ok(())
    }
}

fn invalid(msg: String) -> LabelPrinterError {
    LabelPrinterError::InvalidJob(msg)
}
