//! # Raster Input
//!
//! Decoded images as the encoder sees them, plus the print direction.
//!
//! ## Pixel Formats
//!
//! | Format | Bytes/pixel | "Set" (black) when |
//! |--------|-------------|--------------------|
//! | `Gray8` | 1 | value != 255 |
//! | `Rgb8` | 3 | any channel != 255 |
//! | `Rgba8` | 4 | any colour channel != 255 (alpha ignored) |
//!
//! Alpha is expected to be flattened onto white before encoding; see
//! [`flatten_onto_white`].
//!
//! ## Print Direction
//!
//! ```text
//! Top (direct)                    Left (transposed, head rotated 90°)
//!
//! image x ──► device column       image y (bottom→top) ──► device column
//! image y ──► device row          image x              ──► device row
//!
//! ┌──────────┐                    ┌──────────┐
//! │ ▓▓       │  prints as-is      │ ▓▓       │  columns = image height
//! │          │                    │          │  rows    = image width
//! └──────────┘                    └──────────┘
//! ```

pub mod encoder;

use std::fmt;
use std::str::FromStr;

use image::{DynamicImage, GrayImage, RgbImage, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::error::{NiimlinkError, Result};

pub use encoder::{EncodedImage, ImageRow, RowData, encode, index_pixels};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Gray8,
    Rgb8,
    Rgba8,
}

impl PixelFormat {
    #[inline]
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Gray8 => 1,
            Self::Rgb8 => 3,
            Self::Rgba8 => 4,
        }
    }
}

/// Which image axis runs along the print head.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrintDirection {
    /// Device columns follow image width
    Top,
    /// Device columns follow image height (rotated head)
    #[default]
    Left,
}

impl fmt::Display for PrintDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Top => "top",
            Self::Left => "left",
        })
    }
}

impl FromStr for PrintDirection {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "top" => Ok(Self::Top),
            "left" => Ok(Self::Left),
            other => Err(format!("unknown direction '{}' (expected top or left)", other)),
        }
    }
}

/// # Borrowed Raster
///
/// A decoded, row-major pixel buffer.
///
/// ```
/// use niimlink::raster::{PixelFormat, RasterImage};
///
/// let pixels = [255, 0, 255, 255];
/// let image = RasterImage::new(2, 2, PixelFormat::Gray8, &pixels)?;
/// assert!(!image.is_set(0, 0));
/// assert!(image.is_set(1, 0));
/// # Ok::<(), niimlink::NiimlinkError>(())
/// ```
#[derive(Debug, Clone, Copy)]
pub struct RasterImage<'a> {
    width: usize,
    height: usize,
    format: PixelFormat,
    data: &'a [u8],
}

impl<'a> RasterImage<'a> {
    /// ## Errors
    ///
    /// [`NiimlinkError::Image`] when `data` does not hold exactly
    /// `width * height` pixels of `format`, or that size overflows.
    pub fn new(width: usize, height: usize, format: PixelFormat, data: &'a [u8]) -> Result<Self> {
        let expected = width
            .checked_mul(height)
            .and_then(|pixels| pixels.checked_mul(format.bytes_per_pixel()))
            .ok_or_else(|| {
                NiimlinkError::Image(format!("{}x{} {:?} is too large", width, height, format))
            })?;
        if data.len() != expected {
            return Err(NiimlinkError::Image(format!(
                "{}x{} {:?} needs {} bytes, got {}",
                width,
                height,
                format,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            format,
            data,
        })
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Whether the pixel at image coordinate (x, y) prints black.
    #[inline]
    pub fn is_set(&self, x: usize, y: usize) -> bool {
        let bpp = self.format.bytes_per_pixel();
        let idx = (y * self.width + x) * bpp;
        match self.format {
            PixelFormat::Gray8 => self.data[idx] != 255,
            PixelFormat::Rgb8 | PixelFormat::Rgba8 => self.data[idx..idx + 3].iter().any(|c| *c != 255),
        }
    }
}

impl<'a> From<&'a GrayImage> for RasterImage<'a> {
    fn from(image: &'a GrayImage) -> Self {
        Self {
            width: image.width() as usize,
            height: image.height() as usize,
            format: PixelFormat::Gray8,
            data: image.as_raw(),
        }
    }
}

impl<'a> From<&'a RgbImage> for RasterImage<'a> {
    fn from(image: &'a RgbImage) -> Self {
        Self {
            width: image.width() as usize,
            height: image.height() as usize,
            format: PixelFormat::Rgb8,
            data: image.as_raw(),
        }
    }
}

impl<'a> From<&'a RgbaImage> for RasterImage<'a> {
    fn from(image: &'a RgbaImage) -> Self {
        Self {
            width: image.width() as usize,
            height: image.height() as usize,
            format: PixelFormat::Rgba8,
            data: image.as_raw(),
        }
    }
}

/// Composite any alpha channel onto a white background.
///
/// Fully transparent pixels become white and so never print.
pub fn flatten_onto_white(image: &DynamicImage) -> RgbImage {
    let rgba = image.to_rgba8();
    let mut out = RgbImage::new(rgba.width(), rgba.height());

    for (src, dst) in rgba.pixels().zip(out.pixels_mut()) {
        let [r, g, b, a] = src.0;
        let alpha = a as u32;
        let blend = |c: u8| ((c as u32 * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
        dst.0 = [blend(r), blend(g), blend(b)];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgba};

    #[test]
    fn test_buffer_length_checked() {
        let data = [0u8; 5];
        assert!(RasterImage::new(2, 2, PixelFormat::Gray8, &data).is_err());
        assert!(RasterImage::new(1, 5, PixelFormat::Gray8, &data).is_ok());
    }

    #[test]
    fn test_oversized_dimensions_rejected() {
        let data = [0u8; 6];
        let err = RasterImage::new(usize::MAX / 2 + 1, 2, PixelFormat::Rgb8, &data).unwrap_err();
        assert!(matches!(err, NiimlinkError::Image(_)));
        assert!(RasterImage::new(usize::MAX, usize::MAX, PixelFormat::Gray8, &[]).is_err());
    }

    #[test]
    fn test_rgb_any_channel_sets_pixel() {
        let data = [255, 255, 255, 255, 254, 255];
        let image = RasterImage::new(2, 1, PixelFormat::Rgb8, &data).unwrap();
        assert!(!image.is_set(0, 0));
        assert!(image.is_set(1, 0));
    }

    #[test]
    fn test_rgba_ignores_alpha() {
        let data = [255, 255, 255, 0, 0, 0, 0, 0];
        let image = RasterImage::new(2, 1, PixelFormat::Rgba8, &data).unwrap();
        assert!(!image.is_set(0, 0));
        assert!(image.is_set(1, 0));
    }

    #[test]
    fn test_from_gray_image() {
        let mut gray = GrayImage::from_pixel(3, 2, Luma([255]));
        gray.put_pixel(2, 1, Luma([0]));
        let image = RasterImage::from(&gray);
        assert_eq!((image.width(), image.height()), (3, 2));
        assert!(image.is_set(2, 1));
        assert!(!image.is_set(0, 0));
    }

    #[test]
    fn test_flatten_transparent_is_white() {
        let mut rgba = RgbaImage::from_pixel(2, 1, Rgba([0, 0, 0, 0]));
        rgba.put_pixel(1, 0, Rgba([0, 0, 0, 255]));
        let flat = flatten_onto_white(&DynamicImage::ImageRgba8(rgba));
        assert_eq!(flat.get_pixel(0, 0).0, [255, 255, 255]);
        assert_eq!(flat.get_pixel(1, 0).0, [0, 0, 0]);
    }

    #[test]
    fn test_direction_parse() {
        assert_eq!("TOP".parse::<PrintDirection>(), Ok(PrintDirection::Top));
        assert_eq!("left".parse::<PrintDirection>(), Ok(PrintDirection::Left));
        assert!("right".parse::<PrintDirection>().is_err());
        assert_eq!(PrintDirection::default(), PrintDirection::Left);
    }
}
