//! 1D barcode images.
//!
//! Bars are encoded with `barcoders` and drawn as full-height columns on a
//! white canvas with a quiet zone on both sides. The result is an ordinary
//! grayscale image that goes through `render` like any other artwork.

use barcoders::sym::code39::Code39;
use barcoders::sym::code128::Code128;
use barcoders::sym::ean13::EAN13;
use image::{GrayImage, Luma};
use tracing::debug;

use crate::{RenderError, Result};

/// Code 128 character set B prefix (printable ASCII).
const CODE128_SET_B: char = '\u{0181}';

/// Supported barcode symbologies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Symbology {
    #[default]
    Code128,
    Code39,
    Ean13,
    UpcA,
}

impl Symbology {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "code128" => Some(Self::Code128),
            "code39" => Some(Self::Code39),
            "ean13" => Some(Self::Ean13),
            "upca" => Some(Self::UpcA),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Code128 => "Code 128",
            Self::Code39 => "Code 39",
            Self::Ean13 => "EAN-13",
            Self::UpcA => "UPC-A",
        }
    }
}

/// Barcode geometry in dots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarcodeOptions {
    /// Width of the narrowest bar.
    pub module_width: u32,
    /// Bar height.
    pub height: u32,
    /// Blank modules left and right of the symbol.
    pub quiet_zone: u32,
}

impl Default for BarcodeOptions {
    fn default() -> Self {
        Self {
            module_width: 2,
            height: 50,
            quiet_zone: 10,
        }
    }
}

/// Draw `data` as a barcode.
pub fn generate_barcode(
    data: &str,
    symbology: Symbology,
    options: &BarcodeOptions,
) -> Result<GrayImage> {
    let modules = encode(data, symbology)?;
    let module_width = options.module_width.max(1);
    let height = options.height.max(1);
    let total_modules = modules.len() as u32 + 2 * options.quiet_zone;

    let mut img = GrayImage::from_pixel(total_modules * module_width, height, Luma([255u8]));
    for (i, &module) in modules.iter().enumerate() {
        if module != 1 {
            continue;
        }
        let x0 = (options.quiet_zone + i as u32) * module_width;
        for x in x0..x0 + module_width {
            for y in 0..height {
                img.put_pixel(x, y, Luma([0u8]));
            }
        }
    }

    debug!(
        symbology = symbology.name(),
        modules = modules.len(),
        width = img.width(),
        height,
        "Generated barcode"
    );
    Ok(img)
}

fn encode(data: &str, symbology: Symbology) -> Result<Vec<u8>> {
    if data.is_empty() {
        return Err(encode_error(symbology, "no data".into()));
    }
    let encoded = match symbology {
        Symbology::Code128 => {
            let prefixed = format!("{CODE128_SET_B}{data}");
            Code128::new(&prefixed).map(|b| b.encode())
        }
        Symbology::Code39 => Code39::new(data).map(|b| b.encode()),
        Symbology::Ean13 => {
            let payload = ean_payload(data, symbology)?;
            EAN13::new(&payload).map(|b| b.encode())
        }
        // UPC-A is EAN-13 with a leading zero.
        Symbology::UpcA => {
            let payload = ean_payload(&format!("0{data}"), symbology)?;
            EAN13::new(&payload).map(|b| b.encode())
        }
    };
    encoded.map_err(|e| encode_error(symbology, format!("{e:?}")))
}

/// The 12 data digits of an EAN-13, verifying the check digit if present.
fn ean_payload(digits: &str, symbology: Symbology) -> Result<String> {
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(encode_error(symbology, "digits only".into()));
    }
    match digits.len() {
        12 => Ok(digits.to_string()),
        13 => {
            let (payload, check) = digits.split_at(12);
            let expected = ean_check_digit(payload);
            if check.as_bytes()[0] - b'0' != expected {
                return Err(encode_error(
                    symbology,
                    format!("check digit {check}, expected {expected}"),
                ));
            }
            Ok(payload.to_string())
        }
        n => Err(encode_error(symbology, format!("{n} digits"))),
    }
}

fn ean_check_digit(payload: &str) -> u8 {
    let sum: u32 = payload
        .bytes()
        .enumerate()
        .map(|(i, b)| u32::from(b - b'0') * if i % 2 == 0 { 1 } else { 3 })
        .sum();
    ((10 - sum % 10) % 10) as u8
}

fn encode_error(symbology: Symbology, reason: String) -> RenderError {
    RenderError::Encode {
        symbology: symbology.name(),
        reason,
    }
}
