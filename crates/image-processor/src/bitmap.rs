//! Packed 1-bit bitmap in the printer's native layout.
//!
//! Rows are packed MSB-first (leftmost pixel in bit 7) and each row is
//! rounded up to a whole byte. Polarity follows the device: a set bit is
//! no-burn (white), a cleared bit is burn (black). Padding bits at the end
//! of a row are always white.

use crate::{MAX_HEIGHT_PX, MAX_WIDTH_PX, RenderError, Result};

/// Immutable 1-bit bitmap ready to be embedded in a `BITMAP` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    width: u32,
    height: u32,
    bytes_per_row: usize,
    data: Vec<u8>,
}

impl Bitmap {
    /// Wrap already-packed row data.
    ///
    /// `data` must hold exactly `ceil(width / 8) * height` bytes and the
    /// dimensions must fit the printable area.
    pub fn from_packed(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        check_limits(width, height)?;
        let bytes_per_row = row_bytes(width);
        let expected = bytes_per_row * height as usize;
        if data.len() != expected {
            return Err(RenderError::DataLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            bytes_per_row,
            data,
        })
    }

    /// Pack a row-major burn mask (`true` = burn/black).
    pub fn from_burn_mask(width: u32, height: u32, mask: &[bool]) -> Result<Self> {
        check_limits(width, height)?;
        let expected = width as usize * height as usize;
        if mask.len() != expected {
            return Err(RenderError::DataLength {
                expected,
                actual: mask.len(),
            });
        }

        let bytes_per_row = row_bytes(width);
        let mut data = vec![0xFFu8; bytes_per_row * height as usize];
        if width > 0 {
            for (y, row) in mask.chunks(width as usize).enumerate() {
                let out = &mut data[y * bytes_per_row..(y + 1) * bytes_per_row];
                for (x, &burn) in row.iter().enumerate() {
                    if burn {
                        out[x / 8] &= !(0x80 >> (x % 8));
                    }
                }
            }
        }

        Ok(Self {
            width,
            height,
            bytes_per_row,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Row stride in bytes (`widthBytes` in the `BITMAP` command).
    pub fn bytes_per_row(&self) -> usize {
        self.bytes_per_row
    }

    /// Packed payload, row after row.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// True when the bitmap has no rows.
    pub fn is_empty(&self) -> bool {
        self.height == 0 || self.width == 0
    }

    /// Iterate over packed rows.
    pub fn rows(&self) -> impl Iterator<Item = &[u8]> {
        self.data.chunks(self.bytes_per_row.max(1))
    }

    /// Unpack into a row-major burn mask. Padding bits are dropped.
    pub fn to_burn_mask(&self) -> Vec<bool> {
        let width = self.width as usize;
        let mut mask = Vec::with_capacity(width * self.height as usize);
        for row in self.rows().take(self.height as usize) {
            mask.extend((0..width).map(|x| row[x / 8] & (0x80 >> (x % 8)) == 0));
        }
        mask
    }

    /// Whether the pixel at (x, y) burns. Out-of-range pixels are white.
    pub fn is_burn(&self, x: u32, y: u32) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        let byte = self.data[y as usize * self.bytes_per_row + x as usize / 8];
        byte & (0x80 >> (x % 8)) == 0
    }
}

fn row_bytes(width: u32) -> usize {
    (width as usize).div_ceil(8)
}

fn check_limits(width: u32, height: u32) -> Result<()> {
    if width > MAX_WIDTH_PX || height > MAX_HEIGHT_PX {
        return Err(RenderError::TooLarge {
            width,
            height,
            max_width: MAX_WIDTH_PX,
            max_height: MAX_HEIGHT_PX,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_full_rows() {
        // Row 0 burns completely, row 1 stays white.
        let mut mask = vec![true; 8];
        mask.extend(vec![false; 8]);
        let bmp = Bitmap::from_burn_mask(8, 2, &mask).unwrap();
        assert_eq!(bmp.data(), &[0x00, 0xFF]);
    }

    #[test]
    fn test_pack_alternating_is_msb_first() {
        // B W B W B W B W -> burn bits cleared -> 01010101
        let mask: Vec<bool> = (0..8).map(|x| x % 2 == 0).collect();
        let bmp = Bitmap::from_burn_mask(8, 1, &mask).unwrap();
        assert_eq!(bmp.data(), &[0x55]);
    }

    #[test]
    fn test_pack_partial_byte_pads_white() {
        let mask = vec![true; 12];
        let bmp = Bitmap::from_burn_mask(12, 1, &mask).unwrap();
        assert_eq!(bmp.bytes_per_row(), 2);
        assert_eq!(bmp.data(), &[0x00, 0x0F]);
    }

    #[test]
    fn test_first_pixel_is_high_bit() {
        let mut mask = vec![false; 8];
        mask[0] = true;
        let bmp = Bitmap::from_burn_mask(8, 1, &mask).unwrap();
        assert_eq!(bmp.data(), &[0x7F]);
        assert!(bmp.is_burn(0, 0));
        assert!(!bmp.is_burn(1, 0));
    }

    #[test]
    fn test_rejects_oversized() {
        let err = Bitmap::from_packed(121, 1, vec![0xFF; 16]).unwrap_err();
        assert!(matches!(err, RenderError::TooLarge { width: 121, .. }));

        let err = Bitmap::from_packed(8, 321, vec![0xFF; 321]).unwrap_err();
        assert!(matches!(err, RenderError::TooLarge { height: 321, .. }));
    }

    #[test]
    fn test_rejects_wrong_length() {
        let err = Bitmap::from_packed(16, 2, vec![0xFF; 3]).unwrap_err();
        assert!(matches!(
            err,
            RenderError::DataLength {
                expected: 4,
                actual: 3
            }
        ));
    }

    #[test]
    fn test_burn_mask_round_trip_drops_padding() {
        // 12 dots wide: second byte carries 4 padding bits.
        let bmp = Bitmap::from_packed(12, 2, vec![0x00, 0x00, 0xFF, 0xF0]).unwrap();
        let mask = bmp.to_burn_mask();
        assert_eq!(mask.len(), 24);
        assert!(mask[..12].iter().all(|&b| b));
        assert!(mask[12..].iter().all(|&b| !b));

        let repacked = Bitmap::from_burn_mask(12, 2, &mask).unwrap();
        assert_eq!(repacked.data(), &[0x00, 0x0F, 0xFF, 0xFF]);
    }

    #[test]
    fn test_zero_rows_is_empty() {
        let bmp = Bitmap::from_packed(8, 0, Vec::new()).unwrap();
        assert!(bmp.is_empty());
        assert_eq!(bmp.rows().count(), 0);
    }
}
