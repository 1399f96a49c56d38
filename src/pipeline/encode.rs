//! Image encoding: `DynamicImage` → PNG bytes, fingerprint, and the
//! base64 `ImageData` the vision API consumes.
//!
//! PNG is chosen over JPEG because it is lossless — text crispness matters
//! far more than file size for recognition accuracy, both for the local
//! OCR engine and for the vision model. The fingerprint is the blake3 hash
//! of the PNG bytes: the encoder is deterministic at fixed settings, so
//! identical pixel content always produces identical bytes and therefore
//! an identical fingerprint.

use crate::record::Fingerprint;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// A page ready for the escalation path: encoded once, fingerprinted once.
pub struct EncodedPage {
    /// 1-based page number.
    pub page_num: usize,
    pub fingerprint: Fingerprint,
    pub png: Vec<u8>,
}

impl EncodedPage {
    /// Wrap the PNG as a base64 attachment for the vision API.
    ///
    /// `detail: "high"` instructs GPT-4-class models to use the full image
    /// tile budget; without it fine print and small line-item tables are
    /// lost.
    pub fn to_image_data(&self) -> ImageData {
        let b64 = STANDARD.encode(&self.png);
        debug!("Encoded page {} → {} bytes base64", self.page_num, b64.len());
        ImageData::new(b64, "image/png").with_detail("high")
    }
}

/// PNG-encode a rasterised page and fingerprint the result.
pub fn encode_page(page_num: usize, img: &DynamicImage) -> Result<EncodedPage, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    let fingerprint = Fingerprint::of_bytes(&buf);

    Ok(EncodedPage {
        page_num,
        fingerprint,
        png: buf,
    })
}
