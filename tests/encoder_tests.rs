//! # Encoder Tests
//!
//! Whole-image properties of the row encoder, exercised through the
//! `image` crate types the CLI feeds it.

use image::{DynamicImage, GrayImage, Luma, Rgba, RgbaImage};
use niimlink::NiimlinkError;
use niimlink::raster::{PrintDirection, RasterImage, RowData, encode, flatten_onto_white};
use pretty_assertions::assert_eq;

/// Diagonal stripes with a solid band, so both merged and unique rows occur.
fn label(width: u32, height: u32) -> GrayImage {
    GrayImage::from_fn(width, height, |x, y| {
        if y < 4 || (x + y) % 5 == 0 {
            Luma([0])
        } else {
            Luma([255])
        }
    })
}

#[test]
fn test_rows_cover_every_device_row() {
    for direction in [PrintDirection::Top, PrintDirection::Left] {
        let image = label(24, 40);
        let encoded = encode(&RasterImage::from(&image), direction).unwrap();

        let mut next = 0;
        for row in &encoded.row_data {
            assert_eq!(row.row_index, next);
            assert!(row.repeat_count >= 1);
            next += row.repeat_count;
        }
        assert_eq!(next, encoded.rows, "{}", direction);
    }
}

#[test]
fn test_no_adjacent_entries_equal() {
    let image = label(32, 48);
    let encoded = encode(&RasterImage::from(&image), PrintDirection::Top).unwrap();

    for pair in encoded.row_data.windows(2) {
        assert!(pair[0].data != pair[1].data);
    }
}

#[test]
fn test_void_rows_carry_no_bits() {
    let image = label(16, 16);
    let encoded = encode(&RasterImage::from(&image), PrintDirection::Top).unwrap();

    for row in &encoded.row_data {
        match &row.data {
            RowData::Void => assert_eq!(row.set_pixel_count, 0),
            RowData::Pixels(bits) => {
                assert_eq!(bits.len(), encoded.bytes_per_row());
                let ones: u32 = bits.iter().map(|b| b.count_ones()).sum();
                assert_eq!(ones as usize, row.set_pixel_count);
                assert!(row.set_pixel_count > 0);
            }
        }
    }
}

#[test]
fn test_top_preview_matches_source() {
    let image = label(24, 30);
    let encoded = encode(&RasterImage::from(&image), PrintDirection::Top).unwrap();
    assert_eq!(encoded.to_gray_image(), image);
}

#[test]
fn test_left_preview_is_rotated_source() {
    let image = label(30, 16);
    let encoded = encode(&RasterImage::from(&image), PrintDirection::Left).unwrap();

    // Device row r, column c shows image pixel (r, height - 1 - c).
    let rotated = image::imageops::rotate90(&image);
    assert_eq!(encoded.to_gray_image(), rotated);
}

#[test]
fn test_reencoding_preview_is_stable() {
    let image = label(16, 24);
    let first = encode(&RasterImage::from(&image), PrintDirection::Top).unwrap();
    let preview = first.to_gray_image();
    let second = encode(&RasterImage::from(&preview), PrintDirection::Top).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_constraint_rejects_before_output() {
    let image = label(12, 8);
    let err = encode(&RasterImage::from(&image), PrintDirection::Top).unwrap_err();
    assert!(matches!(err, NiimlinkError::EncodeConstraint(_)));
}

#[test]
fn test_transparent_background_prints_nothing() {
    let mut rgba = RgbaImage::from_pixel(8, 3, Rgba([0, 0, 0, 0]));
    rgba.put_pixel(2, 1, Rgba([0, 0, 0, 255]));

    let rgb = flatten_onto_white(&DynamicImage::ImageRgba8(rgba));
    let encoded = encode(&RasterImage::from(&rgb), PrintDirection::Top).unwrap();

    assert_eq!(encoded.total_set_pixels(), 1);
    assert_eq!(encoded.row_data[1].packed_bits(), Some(&[0x20][..]));
}
