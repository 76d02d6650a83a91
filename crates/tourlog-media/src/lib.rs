//! Photo downscale/transcode pipeline producing bounded data-URI embeds.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use serde::Serialize;
use tracing::debug;

pub const CRATE_NAME: &str = "tourlog-media";

pub const DEFAULT_MAX_DIMENSION: u32 = 1600;
pub const DEFAULT_QUALITY: u8 = 80;

#[derive(Debug, Clone, Copy)]
pub struct TranscodeOptions {
    /// Upper bound for the longer image side. Smaller images are never
    /// upscaled.
    pub max_dimension: u32,
    /// JPEG quality, 1-100.
    pub quality: u8,
}

impl Default for TranscodeOptions {
    fn default() -> Self {
        Self {
            max_dimension: DEFAULT_MAX_DIMENSION,
            quality: DEFAULT_QUALITY,
        }
    }
}

/// An embeddable photo reference ready to be attached to a visit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhotoEmbed {
    pub data_uri: String,
    pub byte_len: usize,
    /// `jpeg` for transcoded embeds, `unknown` for the raw fallback.
    pub format: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Downscale and recompress a user-supplied photo into a bounded embed.
///
/// Decode or encode failures fall back to embedding the original bytes
/// verbatim with an `unknown` format marker; this function never fails, so
/// a broken photo cannot block the visit record it belongs to.
pub fn transcode(raw: &[u8], options: TranscodeOptions) -> PhotoEmbed {
    match try_transcode(raw, options) {
        Ok(embed) => embed,
        Err(err) => {
            debug!(error = %err, "photo transcode failed; embedding original bytes");
            raw_fallback(raw)
        }
    }
}

fn try_transcode(raw: &[u8], options: TranscodeOptions) -> anyhow::Result<PhotoEmbed> {
    let img = image::load_from_memory(raw)?;
    let (width, height) = bounded_dimensions(img.width(), img.height(), options.max_dimension);
    let img = if (width, height) != (img.width(), img.height()) {
        img.resize_exact(width, height, FilterType::Triangle)
    } else {
        img
    };

    let rgb = img.to_rgb8();
    let mut encoded = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut encoded, options.quality);
    encoder.encode_image(&rgb)?;

    Ok(PhotoEmbed {
        data_uri: format!("data:image/jpeg;base64,{}", BASE64.encode(&encoded)),
        byte_len: encoded.len(),
        format: "jpeg".to_string(),
        width: Some(width),
        height: Some(height),
    })
}

fn raw_fallback(raw: &[u8]) -> PhotoEmbed {
    PhotoEmbed {
        data_uri: format!(
            "data:application/octet-stream;base64,{}",
            BASE64.encode(raw)
        ),
        byte_len: raw.len(),
        format: "unknown".to_string(),
        width: None,
        height: None,
    }
}

/// New dimensions preserving aspect ratio with the longer side capped at
/// `max`. Returns the input unchanged when it already fits.
fn bounded_dimensions(width: u32, height: u32, max: u32) -> (u32, u32) {
    if width > height && width > max {
        let scaled = (height as f64 * max as f64 / width as f64).round() as u32;
        (max, scaled.max(1))
    } else if height > max {
        let scaled = (width as f64 * max as f64 / height as f64).round() as u32;
        (scaled.max(1), max)
    } else {
        (width, height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, RgbImage};
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).expect("encode png");
        out.into_inner()
    }

    #[test]
    fn downscales_landscape_to_the_max_dimension() {
        let raw = png_bytes(64, 32);
        let embed = transcode(
            &raw,
            TranscodeOptions {
                max_dimension: 16,
                quality: 80,
            },
        );
        assert_eq!(embed.format, "jpeg");
        assert_eq!((embed.width, embed.height), (Some(16), Some(8)));
        assert!(embed.data_uri.starts_with("data:image/jpeg;base64,"));
        assert!(embed.byte_len > 0);
    }

    #[test]
    fn never_upscales_small_images() {
        let raw = png_bytes(8, 6);
        let embed = transcode(&raw, TranscodeOptions::default());
        assert_eq!((embed.width, embed.height), (Some(8), Some(6)));
        assert_eq!(embed.format, "jpeg");
    }

    #[test]
    fn portrait_images_cap_the_height() {
        assert_eq!(bounded_dimensions(300, 1000, 100), (30, 100));
        assert_eq!(bounded_dimensions(1000, 300, 100), (100, 30));
        assert_eq!(bounded_dimensions(50, 80, 100), (50, 80));
        // Extreme ratios never collapse a side to zero.
        assert_eq!(bounded_dimensions(10_000, 1, 100), (100, 1));
    }

    #[test]
    fn undecodable_bytes_fall_back_to_a_raw_embed() {
        let raw = b"definitely not an image";
        let embed = transcode(raw, TranscodeOptions::default());
        assert_eq!(embed.format, "unknown");
        assert_eq!(embed.byte_len, raw.len());
        assert!(embed.data_uri.starts_with("data:application/octet-stream;base64,"));
        assert_eq!(embed.width, None);
    }
}
