//! Image attachments for vision requests

use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::{LlmError, Result};

/// An image read from disk along with its MIME type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedImage {
    pub mime_type: &'static str,
    pub data: Vec<u8>,
}

impl LoadedImage {
    /// Read an image, picking the MIME type from the file extension
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mime_type = mime_type_for(path)?;
        let data = std::fs::read(path)?;
        Ok(Self { mime_type, data })
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.data)
    }

    /// `data:` URL embedding the image bytes
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.to_base64())
    }
}

fn mime_type_for(path: &Path) -> Result<&'static str> {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default();
    match ext {
        "jpg" | "jpeg" => Ok("image/jpeg"),
        "png" => Ok("image/png"),
        _ => Err(LlmError::UnknownImageType(format!(".{}", ext))),
    }
}
