//! Login challenges rendered as images callers can display directly.

use std::io::Cursor;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use image::{ImageFormat, Luma};
use qrcode::QrCode;

const PNG_DATA_URL_PREFIX: &str = "data:image/png;base64,";

/// Smallest edge of the rendered image, in pixels.
const MIN_EDGE: u32 = 256;

/// Encode `payload` as a QR code PNG wrapped in a `data:` URL.
pub fn to_data_url(payload: &str) -> anyhow::Result<String> {
    let code = QrCode::new(payload.as_bytes())?;
    let image = code
        .render::<Luma<u8>>()
        .min_dimensions(MIN_EDGE, MIN_EDGE)
        .build();

    let mut png = Vec::new();
    image.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
    Ok(format!("{}{}", PNG_DATA_URL_PREFIX, BASE64.encode(&png)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_png_data_url() {
        let url = to_data_url("2@AbCdEf,ghIjKl==,mNoP==").unwrap();
        let encoded = url.strip_prefix("data:image/png;base64,").unwrap();

        let png = BASE64.decode(encoded).unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");

        let decoded = image::load_from_memory_with_format(&png, ImageFormat::Png).unwrap();
        assert!(decoded.width() >= MIN_EDGE);
        assert_eq!(decoded.width(), decoded.height());
    }

    #[test]
    fn oversized_payload_is_an_error() {
        assert!(to_data_url(&"x".repeat(8_000)).is_err());
    }
}
