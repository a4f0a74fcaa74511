use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::ImageFormat;

const FALLBACK_MIME: &str = "image/png";

/// Locator of a generated sheet: a remote URL or a self-contained data URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference(String);

impl ImageReference {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Accepts only `http(s)://` URLs and `data:` URIs.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if is_http_url(trimmed) || trimmed.starts_with("data:") {
            Some(Self(trimmed.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_data_uri(&self) -> bool {
        self.0.starts_with("data:")
    }

    /// Short form for logs; data URIs are reduced to their header.
    pub fn abbreviated(&self) -> String {
        if !self.is_data_uri() {
            return self.0.clone();
        }
        let header = self.0.split(',').next().unwrap_or("data:");
        format!("{header},… ({} chars)", self.0.len())
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Raw image bytes plus the MIME type reported by whoever produced them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBytes {
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
}

impl ImageBytes {
    pub fn extension(&self) -> &'static str {
        self.mime_type
            .as_deref()
            .and_then(|mime| mime.split(';').next())
            .and_then(|mime| ImageFormat::from_mime_type(mime.trim()))
            .or_else(|| image::guess_format(&self.bytes).ok())
            .and_then(|format| format.extensions_str().first().copied())
            .unwrap_or("png")
    }
}

/// The user's photo, ready to be inlined into a completion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl SourceImage {
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed reading source image {}", path.display()))?;
        let from_extension = ImageFormat::from_path(path)
            .ok()
            .map(|format| format.to_mime_type().to_string());
        let mut image = Self::from_bytes(bytes);
        if let Some(mime) = from_extension {
            image.mime_type = mime;
        }
        Ok(image)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let mime_type = image::guess_format(&bytes)
            .map(|format| format.to_mime_type().to_string())
            .unwrap_or_else(|_| FALLBACK_MIME.to_string());
        Self { bytes, mime_type }
    }

    pub fn base64_payload(&self) -> String {
        BASE64.encode(&self.bytes)
    }

    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64_payload())
    }
}
