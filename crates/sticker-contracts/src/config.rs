use std::env;

use crate::error::StickerError;

pub const DEFAULT_API_BASE: &str = "https://api.openai.com";
pub const DEFAULT_PROXY_PREFIX: &str = "https://corsproxy.io/?";

/// Connection settings for the chat-completions endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

impl ApiConfig {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    pub fn from_env() -> Self {
        Self {
            base_url: non_empty_env("STICKER_API_BASE")
                .or_else(|| non_empty_env("OPENAI_BASE_URL"))
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            api_key: non_empty_env("STICKER_API_KEY")
                .or_else(|| non_empty_env("OPENAI_API_KEY"))
                .unwrap_or_default(),
            model: non_empty_env("STICKER_MODEL").unwrap_or_default(),
        }
    }

    /// Applies explicit values over the current ones; blank overrides are ignored.
    pub fn with_overrides(
        mut self,
        base_url: Option<&str>,
        api_key: Option<&str>,
        model: Option<&str>,
    ) -> Self {
        if let Some(value) = non_blank(base_url) {
            self.base_url = value;
        }
        if let Some(value) = non_blank(api_key) {
            self.api_key = value;
        }
        if let Some(value) = non_blank(model) {
            self.model = value;
        }
        self
    }

    pub fn validate(&self) -> Result<(), StickerError> {
        if self.base_url.trim().is_empty() {
            return Err(StickerError::Config("api base url is empty".to_string()));
        }
        if self.api_key.trim().is_empty() {
            return Err(StickerError::Config(
                "api key is missing (set STICKER_API_KEY or pass --api-key)".to_string(),
            ));
        }
        if self.model.trim().is_empty() {
            return Err(StickerError::Config(
                "model is missing (set STICKER_MODEL or pass --model)".to_string(),
            ));
        }
        Ok(())
    }
}

pub fn proxy_prefix_from_env() -> String {
    non_empty_env("STICKER_PROXY_PREFIX").unwrap_or_else(|| DEFAULT_PROXY_PREFIX.to_string())
}

pub fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
