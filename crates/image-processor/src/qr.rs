//! QR code images.

use image::{GrayImage, Luma};
use qrcode::{EcLevel, QrCode};
use tracing::debug;

use crate::{RenderError, Result};

/// Error correction level (roughly 7/15/25/30 % recoverable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorCorrection {
    L,
    #[default]
    M,
    Q,
    H,
}

impl ErrorCorrection {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "L" => Some(Self::L),
            "M" => Some(Self::M),
            "Q" => Some(Self::Q),
            "H" => Some(Self::H),
            _ => None,
        }
    }

    fn level(self) -> EcLevel {
        match self {
            Self::L => EcLevel::L,
            Self::M => EcLevel::M,
            Self::Q => EcLevel::Q,
            Self::H => EcLevel::H,
        }
    }
}

/// Size preset: dots per module and border width in modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QrSize {
    Small,
    #[default]
    Medium,
    Large,
}

impl QrSize {
    /// `(module size in dots, border in modules)`.
    pub fn geometry(self) -> (u32, u32) {
        match self {
            Self::Small => (2, 2),
            Self::Medium => (4, 4),
            Self::Large => (6, 4),
        }
    }
}

/// Draw `data` as a QR code.
pub fn generate_qr(data: &str, size: QrSize, ec: ErrorCorrection) -> Result<GrayImage> {
    let code = QrCode::with_error_correction_level(data.as_bytes(), ec.level()).map_err(|e| {
        RenderError::Encode {
            symbology: "QR code",
            reason: e.to_string(),
        }
    })?;
    let modules = code.to_colors();
    let module_count = code.width() as u32;
    let (scale, border) = size.geometry();
    let img_size = (module_count + 2 * border) * scale;

    let mut img = GrayImage::from_pixel(img_size, img_size, Luma([255u8]));
    for (i, color) in modules.iter().enumerate() {
        if *color != qrcode::Color::Dark {
            continue;
        }
        let x = (i as u32 % module_count + border) * scale;
        let y = (i as u32 / module_count + border) * scale;
        for dy in 0..scale {
            for dx in 0..scale {
                img.put_pixel(x + dx, y + dy, Luma([0u8]));
            }
        }
    }

    debug!(module_count, img_size, ec = ?ec, "Generated QR code");
    Ok(img)
}
