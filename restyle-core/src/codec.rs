//! Conversions between base64 / data-URI strings and in-memory images.

use base64::{prelude::BASE64_STANDARD, Engine};
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;

use crate::error::{GenerateError, Result};

const PNG_DATA_URI_PREFIX: &str = "data:image/png;base64,";

/// Splits a `data:<mime>;base64,<payload>` string. Bare base64 comes back with no MIME type.
pub fn split_data_uri(value: &str) -> (Option<&str>, &str) {
    let Some(rest) = value.strip_prefix("data:") else {
        return (None, value);
    };
    match rest.split_once(',') {
        Some((header, payload)) => {
            let mime = header.split(';').next().filter(|m| !m.is_empty());
            (mime, payload)
        }
        None => (None, rest),
    }
}

pub fn is_remote_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

pub fn decode_base64(value: &str) -> Result<Vec<u8>> {
    let (_, payload) = split_data_uri(value.trim());
    BASE64_STANDARD
        .decode(payload)
        .map_err(|e| GenerateError::decode(format!("invalid base64 image data: {e}")))
}

/// Decodes a base64 or data-URI image, sniffing the format from its bytes.
pub fn decode_image(value: &str) -> Result<DynamicImage> {
    let bytes = decode_base64(value)?;
    image::load_from_memory(&bytes)
        .map_err(|e| GenerateError::decode(format!("unreadable image: {e}")))
}

/// Encodes an image as bare base64 PNG.
pub fn encode_png(img: &DynamicImage) -> anyhow::Result<String> {
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(BASE64_STANDARD.encode(&bytes))
}

pub fn encode_png_data_uri(img: &DynamicImage) -> anyhow::Result<String> {
    Ok(format!("{PNG_DATA_URI_PREFIX}{}", encode_png(img)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb, Rgba};

    fn gradient() -> DynamicImage {
        DynamicImage::ImageRgb8(ImageBuffer::from_fn(7, 5, |x, y| {
            Rgb([(x * 30) as u8, (y * 40) as u8, ((x + y) * 10) as u8])
        }))
    }

    #[test]
    fn png_data_uri_round_trips_pixels() {
        let original = gradient();
        let uri = encode_png_data_uri(&original).unwrap();
        assert!(uri.starts_with("data:image/png;base64,"));

        let decoded = decode_image(&uri).unwrap();
        assert_eq!(decoded.to_rgb8().as_raw(), original.to_rgb8().as_raw());
        assert_eq!((decoded.width(), decoded.height()), (7, 5));
    }

    #[test]
    fn alpha_survives_round_trip() {
        let original = DynamicImage::ImageRgba8(ImageBuffer::from_fn(3, 3, |x, y| {
            Rgba([x as u8, y as u8, 200, (x * y * 20) as u8])
        }));
        let decoded = decode_image(&encode_png_data_uri(&original).unwrap()).unwrap();
        assert_eq!(decoded.to_rgba8().as_raw(), original.to_rgba8().as_raw());
    }

    #[test]
    fn bare_base64_is_accepted() {
        let original = gradient();
        let decoded = decode_image(&encode_png(&original).unwrap()).unwrap();
        assert_eq!(decoded.to_rgb8().as_raw(), original.to_rgb8().as_raw());
    }

    #[test]
    fn split_reports_mime_type() {
        assert_eq!(
            split_data_uri("data:image/jpeg;base64,AAAA"),
            (Some("image/jpeg"), "AAAA")
        );
        assert_eq!(split_data_uri("AAAA"), (None, "AAAA"));
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let err = decode_image("data:image/png;base64,!!!not base64!!!").unwrap_err();
        assert!(matches!(err, GenerateError::Decode(_)));
        assert_eq!(err.http_status(), 400);

        let not_an_image = BASE64_STANDARD.encode(b"hello world");
        assert!(matches!(
            decode_image(&not_an_image),
            Err(GenerateError::Decode(_))
        ));
    }

    #[test]
    fn remote_urls_are_recognised() {
        assert!(is_remote_url("https://cdn.example.com/room.png"));
        assert!(!is_remote_url("data:image/png;base64,AAAA"));
    }
}
