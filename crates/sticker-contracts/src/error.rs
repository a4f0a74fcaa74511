use thiserror::Error;

/// Failure kinds surfaced by the sticker pipeline.
///
/// Engine code wraps these in `anyhow::Error` with extra context; callers
/// recover the kind with `err.downcast_ref::<StickerError>()`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StickerError {
    #[error("request failed{}: {message}", status_suffix(.status))]
    Network {
        status: Option<u16>,
        message: String,
    },
    #[error("completion response was empty: {0}")]
    EmptyResponse(String),
    #[error("malformed stream event: {0}")]
    Parse(String),
    #[error("no generated image detected in the response; the model must return an image link or base64 data")]
    Extraction,
    #[error("image could not be decoded: {0}")]
    Decode(String),
    #[error("cannot download image data ({0}); try saving the original image manually")]
    Download(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl StickerError {
    pub fn kind(&self) -> &'static str {
        match self {
            StickerError::Network { .. } => "network",
            StickerError::EmptyResponse(_) => "empty_response",
            StickerError::Parse(_) => "parse",
            StickerError::Extraction => "extraction",
            StickerError::Decode(_) => "decode",
            StickerError::Download(_) => "download",
            StickerError::Config(_) => "config",
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|code| format!(" ({code})")).unwrap_or_default()
}
