//! Image encoding for OCR transports: `DynamicImage` → PNG bytes / base64.
//!
//! PNG is lossless, which keeps the binarised strokes of a preprocessed page
//! intact. JPEG ringing around thin glyphs measurably hurts OCR.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode an image as PNG.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}

/// Encode an image as a base64 PNG, ready to embed in a JSON body.
pub fn encode_png_base64(img: &DynamicImage) -> Result<String, image::ImageError> {
    let b64 = STANDARD.encode(encode_png(img)?);
    debug!("Encoded image → {} bytes base64", b64.len());
    Ok(b64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    #[test]
    fn encode_small_image() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(10, 10, Luma([0])));
        let b64 = encode_png_base64(&img).expect("encode should succeed");
        let decoded = STANDARD.decode(&b64).expect("valid base64");
        let back = image::load_from_memory(&decoded).unwrap();
        assert_eq!((back.width(), back.height()), (10, 10));
    }
}
