use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use reqwest::blocking::Client as HttpClient;
use reqwest::header::{CACHE_CONTROL, CONTENT_TYPE, PRAGMA};
use sticker_contracts::config::DEFAULT_PROXY_PREFIX;
use sticker_contracts::events::EventWriter;
use sticker_contracts::reference::{ImageBytes, ImageReference};
use sticker_contracts::StickerError;

use crate::{error_chain_text, truncate_text};

const FALLBACK_MIME: &str = "image/png";

/// Model output wraps long payloads and sometimes drops the `=` padding.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decodes `data:<mime>;base64,<payload>` without touching the network.
pub fn decode_data_uri(value: &str) -> Result<ImageBytes> {
    let (meta, payload) = value
        .split_once(',')
        .ok_or_else(|| StickerError::Decode("data URI has no payload".to_string()))?;
    let mime = meta
        .trim()
        .strip_prefix("data:")
        .and_then(|rest| rest.split(';').next())
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .unwrap_or(FALLBACK_MIME)
        .to_string();
    let compact: Vec<u8> = payload
        .bytes()
        .filter(|byte| !byte.is_ascii_whitespace())
        .collect();
    let bytes = LENIENT_BASE64
        .decode(&compact)
        .map_err(|err| StickerError::Decode(format!("data URI base64 payload: {err}")))?;
    Ok(ImageBytes {
        bytes,
        mime_type: Some(mime),
    })
}

pub fn proxy_url(prefix: &str, target: &str) -> String {
    format!("{prefix}{}", urlencoding::encode(target))
}

/// Where a single-image download ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved(PathBuf),
    /// The bytes could not be fetched; the user has to open the URL and save it by hand.
    OpenManually(String),
}

/// Downloads image bytes, retrying once through a CORS-style proxy when the
/// direct request fails.
#[derive(Debug, Clone)]
pub struct ResilientFetcher {
    http: HttpClient,
    proxy_prefix: String,
    events: EventWriter,
}

impl ResilientFetcher {
    pub fn new(http: HttpClient, events: EventWriter) -> Self {
        Self {
            http,
            proxy_prefix: DEFAULT_PROXY_PREFIX.to_string(),
            events,
        }
    }

    pub fn with_proxy_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.proxy_prefix = prefix.into();
        self
    }

    pub fn fetch(&self, reference: &ImageReference) -> Result<ImageBytes> {
        if reference.is_data_uri() {
            return decode_data_uri(reference.as_str());
        }

        let target = reference.as_str();
        let direct_error = match self.fetch_once(target) {
            Ok(image) => return Ok(image),
            Err(err) => err,
        };
        let reason = error_chain_text(&direct_error, 512);
        // A broken event log must not cancel the proxy retry.
        let _ = self.events.emit(
            "fetch_fallback",
            serde_json::json!({
                "url": target,
                "reason": reason,
            }),
        );

        let proxied = proxy_url(&self.proxy_prefix, target);
        self.fetch_once(&proxied).map_err(|proxy_error| {
            anyhow::Error::new(StickerError::Download(format!(
                "direct: {reason}; proxy: {}",
                error_chain_text(&proxy_error, 512)
            )))
        })
    }

    /// Writes the referenced image to `path`. Remote references that cannot
    /// be fetched come back as [`SaveOutcome::OpenManually`].
    pub fn save(&self, reference: &ImageReference, path: &Path) -> Result<SaveOutcome> {
        let image = match self.fetch(reference) {
            Ok(image) => image,
            Err(err) if !reference.is_data_uri() => {
                let _ = self.events.emit(
                    "download_fallback",
                    serde_json::json!({
                        "reference": reference.as_str(),
                        "reason": error_chain_text(&err, 512),
                    }),
                );
                return Ok(SaveOutcome::OpenManually(reference.as_str().to_string()));
            }
            Err(err) => return Err(err),
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, &image.bytes)
            .with_context(|| format!("failed writing image {}", path.display()))?;
        Ok(SaveOutcome::Saved(path.to_path_buf()))
    }

    fn fetch_once(&self, url: &str) -> Result<ImageBytes> {
        let response = self
            .http
            .get(url)
            .header(CACHE_CONTROL, "no-cache")
            .header(PRAGMA, "no-cache")
            .send()
            .with_context(|| format!("image request failed ({url})"))?;
        if !response.status().is_success() {
            let code = response.status().as_u16();
            let body = response.text().unwrap_or_default();
            bail!("image download failed ({code}): {}", truncate_text(&body, 200));
        }
        let mime_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let bytes = response
            .bytes()
            .context("image bytes read failed")?
            .to_vec();
        Ok(ImageBytes { bytes, mime_type })
    }
}
