//! Image ingestion
//!
//! Normalizes an uploaded crop photo into a bounded-size JPEG suitable for
//! both the oracle call and history storage: fixed target width, proportional
//! height, fixed lossy quality. Decoding failures (corrupt file, unsupported
//! format) fall back to the original bytes unchanged - ingestion always
//! delivers an encoded image to the caller.

use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Fixed output width in pixels; height scales proportionally
pub const TARGET_WIDTH: u32 = 400;

/// Fixed JPEG quality for re-encoded images
pub const JPEG_QUALITY: u8 = 72;

/// An encoded image payload ready for transmission and storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedImage {
    /// Encoded bytes (JPEG after normalization, original encoding on fallback)
    #[serde(with = "base64_bytes")]
    pub bytes: Vec<u8>,
    /// MIME type of `bytes`
    pub mime: String,
}

impl EncodedImage {
    /// Inline data URL form used for the oracle message and history entries
    pub fn data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.mime,
            base64::engine::general_purpose::STANDARD.encode(&self.bytes)
        )
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Normalize a raw upload into a bounded JPEG.
///
/// Never fails: if the image cannot be decoded or re-encoded, the original
/// bytes and MIME type are passed through untouched.
pub fn prepare_image(bytes: Vec<u8>, mime: &str) -> EncodedImage {
    match reencode(&bytes) {
        Ok(jpeg) => {
            debug!(
                original_bytes = bytes.len(),
                encoded_bytes = jpeg.len(),
                "Normalized upload to {}px JPEG",
                TARGET_WIDTH
            );
            EncodedImage {
                bytes: jpeg,
                mime: "image/jpeg".to_string(),
            }
        }
        Err(e) => {
            warn!(error = %e, mime = %mime, "Image normalization failed, passing original through");
            EncodedImage {
                bytes,
                mime: mime.to_string(),
            }
        }
    }
}

fn reencode(bytes: &[u8]) -> Result<Vec<u8>, image::ImageError> {
    let decoded = image::load_from_memory(bytes)?;

    // Downscale only; small images keep their native resolution
    let resized = if decoded.width() > TARGET_WIDTH {
        decoded.resize(TARGET_WIDTH, u32::MAX, FilterType::Triangle)
    } else {
        decoded
    };

    // JPEG has no alpha channel
    let rgb = DynamicImage::ImageRgb8(resized.to_rgb8());

    let mut out = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
    rgb.write_with_encoder(encoder)?;
    Ok(out)
}

mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(de)?;
        base64::engine::general_purpose::STANDARD
            .decode(raw)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    fn sample_png(width: u32, height: u32) -> Vec<u8> {
        let img = ImageBuffer::from_fn(width, height, |x, _| Rgb([(x % 256) as u8, 80, 40]));
        let mut out = std::io::Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut out, image::ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn wide_image_is_downscaled_to_target_width() {
        let encoded = prepare_image(sample_png(800, 600), "image/png");
        assert_eq!(encoded.mime, "image/jpeg");
        let decoded = image::load_from_memory(&encoded.bytes).unwrap();
        assert_eq!(decoded.width(), TARGET_WIDTH);
        assert_eq!(decoded.height(), 300);
    }

    #[test]
    fn small_image_is_not_upscaled() {
        let encoded = prepare_image(sample_png(100, 50), "image/png");
        let decoded = image::load_from_memory(&encoded.bytes).unwrap();
        assert_eq!(decoded.width(), 100);
    }

    #[test]
    fn corrupt_bytes_fall_back_to_original() {
        let garbage = vec![0xde, 0xad, 0xbe, 0xef];
        let encoded = prepare_image(garbage.clone(), "image/webp");
        assert_eq!(encoded.bytes, garbage);
        assert_eq!(encoded.mime, "image/webp");
    }

    #[test]
    fn data_url_carries_mime_prefix() {
        let encoded = prepare_image(vec![1, 2, 3], "image/gif");
        assert!(encoded.data_url().starts_with("data:image/gif;base64,"));
    }
}
