//! Image decoding for search queries and ingested drive files
//!
//! Every decoded image comes out as 8-bit RGB with its longer side capped,
//! which bounds memory and latency in the detector.

use std::io::Cursor;
use std::path::Path;

use image::{DynamicImage, GenericImageView};
use tracing::debug;

use crate::error::DecodeError;

/// Longest side allowed for search queries
pub const SEARCH_MAX_SIDE: u32 = 1024;

/// Longest side allowed for ingested drive images
pub const INGEST_MAX_SIDE: u32 = 1000;

/// Extensions decoded through the raster fast path during ingestion
pub const RASTER_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Extensions decoded through RAW post-processing during ingestion
pub const RAW_DECODE_EXTENSIONS: [&str; 1] = ["arw"];

/// Decode arbitrary image bytes into canonical RGB, capped at `max_side`
///
/// The `image` crate handles the common raster formats; anything it rejects
/// goes to the fallback decoder (HEIF/HEIC when the `heif` feature is on).
pub fn decode_image(data: &[u8], max_side: u32) -> Result<DynamicImage, DecodeError> {
    let image = match image::load_from_memory(data) {
        Ok(image) => apply_exif_orientation(data, image),
        Err(e) => {
            debug!("Fast-path decode failed ({}), trying fallback decoder", e);
            decode_fallback(data)?
        }
    };

    Ok(downscale(to_canonical(image), max_side))
}

/// Decode a camera RAW file into canonical RGB, capped at `max_side`
#[cfg(feature = "raw")]
pub fn decode_raw(data: &[u8], max_side: u32) -> Result<DynamicImage, DecodeError> {
    let raw = rawloader::decode(&mut Cursor::new(data))
        .map_err(|e| DecodeError::Raw(format!("{:?}", e)))?;

    let mut pipeline = imagepipe::Pipeline::new_from_source(imagepipe::ImageSource::Raw(raw))
        .map_err(DecodeError::Raw)?;
    let srgb = pipeline.output_8bit(None).map_err(DecodeError::Raw)?;

    let width = u32::try_from(srgb.width).map_err(|_| DecodeError::InvalidLength)?;
    let height = u32::try_from(srgb.height).map_err(|_| DecodeError::InvalidLength)?;
    let buffer = image::RgbImage::from_raw(width, height, srgb.data)
        .ok_or(DecodeError::InvalidLength)?;

    Ok(downscale(DynamicImage::ImageRgb8(buffer), max_side))
}

#[cfg(not(feature = "raw"))]
pub fn decode_raw(_data: &[u8], _max_side: u32) -> Result<DynamicImage, DecodeError> {
    Err(DecodeError::Unsupported)
}

/// Pick the decode route for an ingested file by its extension
pub fn decode_for_ingest(
    file_name: &str,
    data: &[u8],
    max_side: u32,
) -> Result<DynamicImage, DecodeError> {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    if RASTER_EXTENSIONS.contains(&ext.as_str()) {
        decode_image(data, max_side)
    } else if RAW_DECODE_EXTENSIONS.contains(&ext.as_str()) {
        decode_raw(data, max_side)
    } else {
        Err(DecodeError::UnsupportedExtension(ext))
    }
}

/// Shrink so the longer side is at most `max_side`, preserving aspect ratio
///
/// Uses an area-averaging filter; images already within bounds are returned as-is.
pub fn downscale(image: DynamicImage, max_side: u32) -> DynamicImage {
    let (w, h) = image.dimensions();
    let longest = w.max(h);
    if longest <= max_side {
        return image;
    }

    let scale = max_side as f64 / longest as f64;
    let new_w = ((w as f64 * scale) as u32).max(1);
    let new_h = ((h as f64 * scale) as u32).max(1);

    image.thumbnail_exact(new_w, new_h)
}

fn to_canonical(image: DynamicImage) -> DynamicImage {
    match image {
        DynamicImage::ImageRgb8(_) => image,
        other => DynamicImage::ImageRgb8(other.to_rgb8()),
    }
}

#[cfg(feature = "heif")]
fn decode_fallback(data: &[u8]) -> Result<DynamicImage, DecodeError> {
    use libheif_rs::{ColorSpace, HeifContext, LibHeif, RgbChroma};

    let ctx = HeifContext::read_from_bytes(data)?;
    let handle = ctx.primary_image_handle()?;
    let img = LibHeif::new().decode(&handle, ColorSpace::Rgb(RgbChroma::Rgb), None)?;

    let plane = img.planes().interleaved.ok_or(DecodeError::Unsupported)?;
    let (width, height) = (plane.width, plane.height);
    let row_len = width as usize * 3;

    // rows may be padded past width * 3
    let mut pixels = Vec::with_capacity(row_len * height as usize);
    for y in 0..height as usize {
        let start = y * plane.stride;
        let row = plane
            .data
            .get(start..start + row_len)
            .ok_or(DecodeError::InvalidLength)?;
        pixels.extend_from_slice(row);
    }

    let buffer = image::RgbImage::from_raw(width, height, pixels).ok_or(DecodeError::InvalidLength)?;
    Ok(DynamicImage::ImageRgb8(buffer))
}

#[cfg(not(feature = "heif"))]
fn decode_fallback(_data: &[u8]) -> Result<DynamicImage, DecodeError> {
    Err(DecodeError::Unsupported)
}

/// Apply EXIF orientation to correct image rotation
/// Phones often store images with an orientation tag instead of rotating pixels
fn apply_exif_orientation(data: &[u8], image: DynamicImage) -> DynamicImage {
    let orientation = match exif::Reader::new().read_from_container(&mut Cursor::new(data)) {
        Ok(exif_data) => exif_data
            .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
            .and_then(|field| field.value.get_uint(0))
            .unwrap_or(1),
        Err(_) => 1,
    };

    // See https://exiftool.org/TagNames/EXIF.html (Orientation)
    match orientation {
        2 => image.fliph(),
        3 => image.rotate180(),
        4 => image.flipv(),
        5 => image.rotate90().fliph(),
        6 => image.rotate90(),
        7 => image.rotate270().fliph(),
        8 => image.rotate270(),
        _ => image,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};

    fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        image.write_to(&mut buffer, format).unwrap();
        buffer.into_inner()
    }

    #[test]
    fn test_decode_png_within_bounds() {
        let png = encode(
            DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 32, Rgb([10, 20, 30]))),
            ImageFormat::Png,
        );
        let decoded = decode_image(&png, SEARCH_MAX_SIDE).unwrap();
        assert_eq!(decoded.dimensions(), (64, 32));
        assert_eq!(decoded.to_rgb8().get_pixel(0, 0), &Rgb([10, 20, 30]));
    }

    #[test]
    fn test_decode_converts_to_rgb() {
        let png = encode(
            DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 8, Rgba([1, 2, 3, 255]))),
            ImageFormat::Png,
        );
        let decoded = decode_image(&png, SEARCH_MAX_SIDE).unwrap();
        assert!(matches!(decoded, DynamicImage::ImageRgb8(_)));
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(decode_image(b"definitely not an image", SEARCH_MAX_SIDE).is_err());
        assert!(decode_image(&[], SEARCH_MAX_SIDE).is_err());
    }

    #[test]
    fn test_decode_truncated_jpeg_fails() {
        let jpeg = encode(
            DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 64, Rgb([200, 100, 50]))),
            ImageFormat::Jpeg,
        );
        assert!(decode_image(&jpeg[..jpeg.len() / 3], SEARCH_MAX_SIDE).is_err());
    }

    #[test]
    fn test_search_path_downscales_large_image() {
        let png = encode(
            DynamicImage::ImageRgb8(RgbImage::new(2048, 1536)),
            ImageFormat::Png,
        );
        let decoded = decode_image(&png, SEARCH_MAX_SIDE).unwrap();
        assert_eq!(decoded.dimensions(), (1024, 768));
    }

    #[test]
    fn test_downscale_preserves_aspect_ratio() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(1500, 2048));
        let scaled = downscale(image, SEARCH_MAX_SIDE);
        let (w, h) = scaled.dimensions();
        assert_eq!(h, 1024);
        assert_eq!(w, 750);
    }

    #[test]
    fn test_ingest_path_uses_its_own_bound() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(2000, 1000));
        let scaled = downscale(image, INGEST_MAX_SIDE);
        assert_eq!(scaled.dimensions(), (1000, 500));
    }

    #[test]
    fn test_decode_for_ingest_routes_by_extension() {
        let jpeg = encode(
            DynamicImage::ImageRgb8(RgbImage::new(16, 16)),
            ImageFormat::Jpeg,
        );
        assert!(decode_for_ingest("IMG_0001.JPG", &jpeg, INGEST_MAX_SIDE).is_ok());
        assert!(matches!(
            decode_for_ingest("clip.mp4", &jpeg, INGEST_MAX_SIDE),
            Err(DecodeError::UnsupportedExtension(ext)) if ext == "mp4"
        ));
        assert!(decode_for_ingest("DSC0001.ARW", b"not raw", INGEST_MAX_SIDE).is_err());
    }
}
