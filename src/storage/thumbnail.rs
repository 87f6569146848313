use image::codecs::jpeg::JpegEncoder;
use image::error::{LimitError, LimitErrorKind};
use image::{ColorType, DynamicImage, GrayImage, ImageFormat, ImageReader, Limits, RgbImage};
use jpeg_decoder::PixelFormat;
use std::io::Cursor;

use super::types::{CacheError, TargetSize};

/// Decode `bytes` under an allocation cap.
pub fn decode(bytes: &[u8], max_alloc: u64) -> Result<DynamicImage, CacheError> {
    let mut reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    let mut limits = Limits::default();
    limits.max_alloc = Some(max_alloc);
    reader.limits(limits);
    Ok(reader.decode()?)
}

/// Decode a JPEG at the smallest DCT scale (1/1, 1/2, 1/4 or 1/8) whose output
/// still covers `want_w` x `want_h`.
///
/// Returns `Ok(None)` for pixel formats the scaled path does not handle, so
/// the caller can fall back to a full decode.
fn decode_jpeg_scaled(
    bytes: &[u8],
    want_w: u32,
    want_h: u32,
    max_alloc: u64,
) -> Result<Option<DynamicImage>, CacheError> {
    let (Ok(want_w), Ok(want_h)) = (u16::try_from(want_w), u16::try_from(want_h)) else {
        return Ok(None);
    };

    let mut decoder = jpeg_decoder::Decoder::new(Cursor::new(bytes));
    let (w, h) = decoder.scale(want_w, want_h)?;
    let Some(info) = decoder.info() else {
        return Ok(None);
    };
    let channels: u64 = match info.pixel_format {
        PixelFormat::L8 => 1,
        PixelFormat::RGB24 => 3,
        _ => return Ok(None),
    };

    if u64::from(w) * u64::from(h) * channels > max_alloc {
        return Err(CacheError::Image(image::ImageError::Limits(
            LimitError::from_kind(LimitErrorKind::InsufficientMemory),
        )));
    }

    let (w, h) = (u32::from(w), u32::from(h));
    let pixels = decoder.decode()?;
    tracing::trace!(w, h, "Decoded JPEG at reduced scale");

    let image = match info.pixel_format {
        PixelFormat::L8 => GrayImage::from_raw(w, h, pixels).map(DynamicImage::ImageLuma8),
        _ => RgbImage::from_raw(w, h, pixels).map(DynamicImage::ImageRgb8),
    };
    Ok(image)
}

/// Downsample `bytes` so its longest edge fits `size` at `scale`, then
/// re-encode as JPEG.
///
/// The header is read first so oversized sources are rejected before any
/// pixel buffer is allocated. Oversized JPEGs are decoded straight to a
/// reduced scale, so `max_alloc` bounds the reduced buffer rather than the
/// full-resolution one. Images already inside the bound keep their
/// dimensions; nothing is upscaled.
pub fn render(
    bytes: &[u8],
    size: TargetSize,
    scale: f64,
    quality: u8,
    max_alloc: u64,
) -> Result<Vec<u8>, CacheError> {
    let bound = size.pixel_bound(scale).ok_or(CacheError::EmptyBound {
        width: size.width,
        height: size.height,
        scale,
    })?;

    let (src_w, src_h) = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .into_dimensions()?;
    tracing::trace!(src_w, src_h, bound, "Rendering thumbnail");

    let longest = src_w.max(src_h);
    let thumb = if longest > bound {
        let scaled = if image::guess_format(bytes).ok() == Some(ImageFormat::Jpeg) {
            let want_w = (u64::from(src_w) * u64::from(bound)).div_ceil(u64::from(longest));
            let want_h = (u64::from(src_h) * u64::from(bound)).div_ceil(u64::from(longest));
            decode_jpeg_scaled(bytes, want_w as u32, want_h as u32, max_alloc)?
        } else {
            None
        };
        let image = match scaled {
            Some(image) => image,
            None => decode(bytes, max_alloc)?,
        };
        if image.width().max(image.height()) > bound {
            image.thumbnail(bound, bound)
        } else {
            image
        }
    } else {
        decode(bytes, max_alloc)?
    };

    let rgb = thumb.to_rgb8();
    let (w, h) = rgb.dimensions();
    let mut out = Cursor::new(Vec::new());
    let mut encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
    encoder.encode(rgb.as_raw(), w, h, ColorType::Rgb8.into())?;

    Ok(out.into_inner())
}
