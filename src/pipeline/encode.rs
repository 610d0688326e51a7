//! Page images → PNG bytes + base64 `ImageData` for the VLM request.
//!
//! PNG because it is lossless; JPEG ringing around glyphs costs accuracy.
//! `detail: "high"` lets tile-based vision models see fine print.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;

/// One page ready to send, plus the PNG in case the bundle keeps it.
#[derive(Debug, Clone)]
pub struct EncodedPage {
    pub png: Vec<u8>,
    pub image: ImageData,
}

pub fn encode_page(img: &DynamicImage) -> Result<EncodedPage, image::ImageError> {
    let mut png = Vec::new();
    img.write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)?;
    let image = ImageData::new(STANDARD.encode(&png), "image/png").with_detail("high");
    Ok(EncodedPage { png, image })
}

/// Bundle file name for a kept page render.
pub fn page_image_name(page_num: usize) -> String {
    format!("page-{page_num:03}.png")
}
