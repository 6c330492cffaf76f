//! Image payloads for the vision endpoints.

use std::io::Cursor;
use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, ImageFormat};

use super::VisionError;

const JPEG_MIME: &str = "image/jpeg";

/// A JPEG-encoded image, ready to be sent as a data URL.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageData {
    bytes: Vec<u8>,
}

impl std::fmt::Debug for ImageData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageData")
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

impl ImageData {
    /// Accept any decodable image and normalise it to JPEG.
    ///
    /// JPEG input is passed through untouched; other formats are decoded and
    /// re-encoded (alpha is dropped).
    pub fn from_upload(bytes: Vec<u8>) -> Result<Self, VisionError> {
        let mime = infer::get(&bytes)
            .map(|kind| kind.mime_type())
            .unwrap_or("application/octet-stream");

        if mime == JPEG_MIME {
            return Ok(Self { bytes });
        }
        if !mime.starts_with("image/") {
            return Err(VisionError::UnsupportedImage(mime.to_string()));
        }

        log::debug!("Re-encoding {mime} upload as JPEG");
        let decoded = image::load_from_memory(&bytes)?;
        let rgb = DynamicImage::ImageRgb8(decoded.to_rgb8());

        let mut out = Vec::new();
        rgb.write_to(&mut Cursor::new(&mut out), ImageFormat::Jpeg)?;
        Ok(Self { bytes: out })
    }

    pub fn from_file(path: &Path) -> Result<Self, VisionError> {
        Self::from_upload(std::fs::read(path)?)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{JPEG_MIME};base64,{}", STANDARD.encode(&self.bytes))
    }
}
