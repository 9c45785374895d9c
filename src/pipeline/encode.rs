//! Image encoding: composite raster → base64 PNG wrapped in `ImageData`.
//!
//! PNG keeps rendered text crisp; JPEG artefacts on small print confuse
//! vision models. `detail: "high"` lets tiling providers use their full
//! image budget on tall stacked documents.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::{ImageFormat, RgbaImage};
use std::io::Cursor;
use tracing::debug;

/// PNG-encode `img` into memory.
pub fn encode_png(img: &RgbaImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
    Ok(buf)
}

/// Encode a raster as a base64 PNG ready for the generation request.
pub fn encode_raster(img: &RgbaImage) -> Result<ImageData, image::ImageError> {
    let png = encode_png(img)?;
    let b64 = STANDARD.encode(&png);
    debug!(
        "Encoded {}x{} raster → {} bytes base64",
        img.width(),
        img.height(),
        b64.len()
    );
    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}
