//! # Row Encoder
//!
//! Converts a raster into the printer's row format: one bit per dot,
//! identical adjacent rows collapsed into a repeat count.
//!
//! ## Bit Packing
//!
//! Each device row is packed as bytes where each bit represents one dot:
//! - Bit 7 (MSB) = first column of the group
//! - Bit 0 (LSB) = last column of the group
//! - 1 = black (print), 0 = white (no print)
//!
//! ```text
//! Byte value 0xF0 = 11110000 = ████░░░░
//! Byte value 0x0F = 00001111 = ░░░░████
//! Byte value 0x81 = 10000001 = █░░░░░░█
//! ```
//!
//! The device column count must be a multiple of 8; anything else is
//! rejected before a single row is produced.
//!
//! ## Row Merging
//!
//! ```text
//! row 0  ░░░░░░░░  void                 ┐
//! row 1  ░░░░░░░░  void                 ┘ → Void,            repeat 2
//! row 2  █░░░░░░█  pixels [0x81]        ┐
//! row 3  █░░░░░░█  pixels [0x81]        ┘ → Pixels([0x81]),  repeat 2
//! row 4  ░░░░░░░░  void                   → Void,            repeat 1
//! ```
//!
//! Only a row equal to the one directly before it is merged; a duplicate
//! further back starts a new entry.
//!
//! ## Example
//!
//! ```
//! use image::{GrayImage, Luma};
//! use niimlink::raster::{PrintDirection, RasterImage, encode};
//!
//! let white = GrayImage::from_pixel(16, 2, Luma([255]));
//! let encoded = encode(&RasterImage::from(&white), PrintDirection::Top)?;
//!
//! assert_eq!(encoded.columns, 16);
//! assert_eq!(encoded.rows, 2);
//! assert_eq!(encoded.row_data.len(), 1);
//! assert_eq!(encoded.row_data[0].repeat_count, 2);
//! # Ok::<(), niimlink::NiimlinkError>(())
//! ```

use image::{GrayImage, Luma};
use serde::Serialize;

use super::{PrintDirection, RasterImage};
use crate::error::{NiimlinkError, Result};

/// Payload of one encoded row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "bits", rename_all = "lowercase")]
pub enum RowData {
    /// No dot set; carries no bitmap
    Void,
    /// Packed bits, `columns / 8` bytes
    Pixels(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageRow {
    pub data: RowData,
    /// Device row this entry starts at
    pub row_index: usize,
    /// Consecutive device rows this entry covers (>= 1)
    pub repeat_count: usize,
    /// Black dots in one of the covered rows
    pub set_pixel_count: usize,
}

impl ImageRow {
    #[inline]
    pub fn is_void(&self) -> bool {
        matches!(self.data, RowData::Void)
    }

    pub fn packed_bits(&self) -> Option<&[u8]> {
        match &self.data {
            RowData::Void => None,
            RowData::Pixels(bits) => Some(bits),
        }
    }
}

/// Printer-ready image
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncodedImage {
    /// Dots per row, multiple of 8
    pub columns: usize,
    /// Device rows before merging
    pub rows: usize,
    pub row_data: Vec<ImageRow>,
}

impl EncodedImage {
    #[inline]
    pub fn bytes_per_row(&self) -> usize {
        self.columns / 8
    }

    /// Black dots over the whole image, repeats included.
    pub fn total_set_pixels(&self) -> usize {
        self.row_data
            .iter()
            .map(|row| row.set_pixel_count * row.repeat_count)
            .sum()
    }

    /// Render back to a black/white image in device orientation
    /// (`columns` wide, `rows` tall).
    pub fn to_gray_image(&self) -> GrayImage {
        let mut image = GrayImage::from_pixel(self.columns as u32, self.rows as u32, Luma([255]));

        for row in &self.row_data {
            let Some(bits) = row.packed_bits() else {
                continue;
            };
            for y in row.row_index..row.row_index + row.repeat_count {
                for x in 0..self.columns {
                    if bits[x / 8] & (0x80 >> (x % 8)) != 0 {
                        image.put_pixel(x as u32, y as u32, Luma([0]));
                    }
                }
            }
        }
        image
    }
}

/// Encode `image` for printing in `direction`.
///
/// ## Errors
///
/// [`NiimlinkError::EncodeConstraint`] when the device column count is not
/// a multiple of 8.
pub fn encode(image: &RasterImage<'_>, direction: PrintDirection) -> Result<EncodedImage> {
    let (columns, rows) = match direction {
        PrintDirection::Top => (image.width(), image.height()),
        PrintDirection::Left => (image.height(), image.width()),
    };

    if columns % 8 != 0 {
        return Err(NiimlinkError::EncodeConstraint(format!(
            "column count {} must be a multiple of 8",
            columns
        )));
    }

    let mut row_data: Vec<ImageRow> = Vec::new();

    for row in 0..rows {
        let mut packed = vec![0u8; columns / 8];
        let mut set_pixel_count = 0;

        for (octet, byte) in packed.iter_mut().enumerate() {
            for bit in 0..8 {
                if pixel_set(image, octet * 8 + bit, row, direction) {
                    *byte |= 0x80 >> bit;
                    set_pixel_count += 1;
                }
            }
        }

        let data = if set_pixel_count == 0 {
            RowData::Void
        } else {
            RowData::Pixels(packed)
        };

        match row_data.last_mut() {
            Some(last) if last.data == data => last.repeat_count += 1,
            _ => row_data.push(ImageRow {
                data,
                row_index: row,
                repeat_count: 1,
                set_pixel_count,
            }),
        }
    }

    Ok(EncodedImage {
        columns,
        rows,
        row_data,
    })
}

/// Device (column, row) to image lookup.
#[inline]
fn pixel_set(image: &RasterImage<'_>, x: usize, y: usize, direction: PrintDirection) -> bool {
    match direction {
        PrintDirection::Top => image.is_set(x, y),
        PrintDirection::Left => image.is_set(y, image.height() - 1 - x),
    }
}

/// Positions of every set bit in `packed`, each as a big-endian `u16`.
///
/// Used by the command family that addresses dots by index rather than by
/// packed row.
///
/// ```
/// use niimlink::raster::index_pixels;
///
/// assert_eq!(index_pixels(&[0b1000_0001]), vec![0x00, 0x00, 0x00, 0x07]);
/// ```
pub fn index_pixels(packed: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    for (byte_pos, byte) in packed.iter().enumerate() {
        for bit_pos in 0..8 {
            if byte & (0x80 >> bit_pos) != 0 {
                let index = (byte_pos * 8 + bit_pos) as u16;
                out.extend_from_slice(&index.to_be_bytes());
            }
        }
    }
    out
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::PixelFormat;

    fn gray(width: u32, height: u32, black: &[(u32, u32)]) -> GrayImage {
        let mut image = GrayImage::from_pixel(width, height, Luma([255]));
        for &(x, y) in black {
            image.put_pixel(x, y, Luma([0]));
        }
        image
    }

    #[test]
    fn test_white_image_single_void_row() {
        let image = gray(16, 2, &[]);
        let encoded = encode(&RasterImage::from(&image), PrintDirection::Top).unwrap();

        assert_eq!(encoded.columns, 16);
        assert_eq!(encoded.rows, 2);
        assert_eq!(
            encoded.row_data,
            vec![ImageRow {
                data: RowData::Void,
                row_index: 0,
                repeat_count: 2,
                set_pixel_count: 0,
            }]
        );
    }

    #[test]
    fn test_msb_first_packing() {
        let image = gray(16, 1, &[(0, 0), (7, 0), (9, 0)]);
        let encoded = encode(&RasterImage::from(&image), PrintDirection::Top).unwrap();

        assert_eq!(encoded.row_data.len(), 1);
        assert_eq!(encoded.row_data[0].packed_bits(), Some(&[0x81, 0x40][..]));
        assert_eq!(encoded.row_data[0].set_pixel_count, 3);
    }

    #[test]
    fn test_width_not_multiple_of_eight() {
        let image = gray(10, 4, &[]);
        let err = encode(&RasterImage::from(&image), PrintDirection::Top).unwrap_err();
        assert!(matches!(err, NiimlinkError::EncodeConstraint(_)));
    }

    #[test]
    fn test_transposed_checks_height() {
        // 10 wide is fine when the head runs along the 8-dot height.
        let image = gray(10, 8, &[]);
        let encoded = encode(&RasterImage::from(&image), PrintDirection::Left).unwrap();
        assert_eq!((encoded.columns, encoded.rows), (8, 10));

        let image = gray(8, 10, &[]);
        assert!(encode(&RasterImage::from(&image), PrintDirection::Left).is_err());
    }

    #[test]
    fn test_transposed_mapping() {
        // Image bottom-left lands on device row 0, column 0.
        // Image top, second column lands on device row 1, column 7.
        let image = gray(2, 8, &[(0, 7), (1, 0)]);
        let encoded = encode(&RasterImage::from(&image), PrintDirection::Left).unwrap();

        assert_eq!(encoded.row_data.len(), 2);
        assert_eq!(encoded.row_data[0].packed_bits(), Some(&[0x80][..]));
        assert_eq!(encoded.row_data[1].packed_bits(), Some(&[0x01][..]));
        assert_eq!(encoded.row_data[1].row_index, 1);
    }

    #[test]
    fn test_merge_only_adjacent() {
        // rows: A, A, void, A
        let image = gray(8, 4, &[(0, 0), (0, 1), (0, 3)]);
        let encoded = encode(&RasterImage::from(&image), PrintDirection::Top).unwrap();

        let summary: Vec<(usize, usize, bool)> = encoded
            .row_data
            .iter()
            .map(|r| (r.row_index, r.repeat_count, r.is_void()))
            .collect();
        assert_eq!(summary, vec![(0, 2, false), (2, 1, true), (3, 1, false)]);
    }

    #[test]
    fn test_different_pixels_not_merged() {
        let image = gray(8, 2, &[(0, 0), (1, 1)]);
        let encoded = encode(&RasterImage::from(&image), PrintDirection::Top).unwrap();
        assert_eq!(encoded.row_data.len(), 2);
    }

    #[test]
    fn test_total_set_pixels_counts_repeats() {
        let image = gray(8, 3, &[(0, 0), (1, 0), (0, 1), (1, 1), (5, 2)]);
        let encoded = encode(&RasterImage::from(&image), PrintDirection::Top).unwrap();
        assert_eq!(encoded.total_set_pixels(), 5);
    }

    #[test]
    fn test_preview_round_trip() {
        let image = gray(16, 3, &[(3, 0), (3, 1), (15, 2)]);
        let encoded = encode(&RasterImage::from(&image), PrintDirection::Top).unwrap();

        let preview = encoded.to_gray_image();
        assert_eq!(preview, image);
    }

    #[test]
    fn test_rgb_input() {
        let data = [
            255, 255, 255, 10, 20, 30, 255, 255, 255, 255, 255, 255, 255, 255, 255, 255, 255, 255,
            255, 255, 255, 255, 255, 255,
        ];
        let image = RasterImage::new(8, 1, PixelFormat::Rgb8, &data).unwrap();
        let encoded = encode(&image, PrintDirection::Top).unwrap();
        assert_eq!(encoded.row_data[0].packed_bits(), Some(&[0x40][..]));
    }

    #[test]
    fn test_index_pixels_single_byte() {
        assert_eq!(index_pixels(&[0b1000_0001]), vec![0, 0, 0, 7]);
    }

    #[test]
    fn test_index_pixels_big_endian() {
        let mut packed = vec![0u8; 33];
        packed[32] = 0x80; // dot 256
        assert_eq!(index_pixels(&packed), vec![0x01, 0x00]);
        assert!(index_pixels(&[0, 0]).is_empty());
    }

    #[test]
    fn test_row_data_json_shape() {
        let json = serde_json::to_value(RowData::Pixels(vec![0x81])).unwrap();
        assert_eq!(json, serde_json::json!({ "kind": "pixels", "bits": [129] }));
        let json = serde_json::to_value(RowData::Void).unwrap();
        assert_eq!(json, serde_json::json!({ "kind": "void" }));
    }
}
