use std::io::{ErrorKind, Read};

use anyhow::{Context, Result};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde_json::{json, Value};
use sticker_contracts::config::ApiConfig;
use sticker_contracts::reference::SourceImage;
use sticker_contracts::StickerError;

use crate::endpoint::normalize_completions_url;
use crate::truncate_text;

pub const DEFAULT_PROMPT: &str = "
Generate a sticker sheet featuring a Chibi-style, LINE sticker-like character based on the input image.
The character should maintain key features like headwear from the original image.
Style: Hand-drawn color illustration.
Layout: 4x6 grid (24 stickers total).
Content: Various common chat expressions and fun memes.
Language: All text must be in Handwritten Simplified Chinese.
Do not just copy the original image. Create expressive, stylized stickers.
";

const READ_CHUNK_BYTES: usize = 8 * 1024;

pub fn build_request_payload(config: &ApiConfig, image: &SourceImage, prompt: &str) -> Value {
    json!({
        "model": config.model,
        "messages": [
            {
                "role": "user",
                "content": [
                    { "type": "text", "text": prompt },
                    {
                        "type": "image_url",
                        "image_url": { "url": image.to_data_uri() }
                    }
                ]
            }
        ],
        "stream": true
    })
}

/// What one event-stream line contributes to the assembled content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    Ignored,
    Done,
    Delta(String),
    Malformed(String),
}

pub fn parse_event_line(line: &str) -> LineOutcome {
    let Some(data) = line.trim().strip_prefix("data:") else {
        return LineOutcome::Ignored;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return LineOutcome::Done;
    }
    match serde_json::from_str::<Value>(data) {
        Ok(payload) => match payload
            .pointer("/choices/0/delta/content")
            .and_then(Value::as_str)
        {
            Some(text) if !text.is_empty() => LineOutcome::Delta(text.to_string()),
            _ => LineOutcome::Ignored,
        },
        Err(err) => LineOutcome::Malformed(err.to_string()),
    }
}

/// Read-loop state for an event stream: assembled text plus the bytes of the
/// line that has not been terminated yet.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    content: String,
    carry: Vec<u8>,
    skipped: usize,
    saw_done: bool,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.carry.extend_from_slice(bytes);
        let Some(last_newline) = self.carry.iter().rposition(|byte| *byte == b'\n') else {
            return;
        };
        let rest = self.carry.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.carry, rest);
        for line in complete.split(|byte| *byte == b'\n') {
            self.consume_line(line);
        }
    }

    /// Flushes an unterminated final line and returns the assembled stream.
    pub fn finish(mut self) -> StreamOutput {
        if !self.carry.is_empty() {
            let tail = std::mem::take(&mut self.carry);
            self.consume_line(&tail);
        }
        StreamOutput {
            content: self.content,
            skipped_chunks: self.skipped,
            saw_done: self.saw_done,
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn skipped_chunks(&self) -> usize {
        self.skipped
    }

    fn consume_line(&mut self, raw: &[u8]) {
        let line = String::from_utf8_lossy(raw);
        match parse_event_line(&line) {
            LineOutcome::Delta(text) => self.content.push_str(&text),
            LineOutcome::Malformed(_) => self.skipped += 1,
            LineOutcome::Done => self.saw_done = true,
            LineOutcome::Ignored => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOutput {
    pub content: String,
    pub skipped_chunks: usize,
    pub saw_done: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseBranch {
    Json,
    EventStream,
}

impl ResponseBranch {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseBranch::Json => "json",
            ResponseBranch::EventStream => "event_stream",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub endpoint: String,
    pub content: String,
    pub branch: ResponseBranch,
    pub skipped_chunks: usize,
    /// False when an event stream closed without its `[DONE]` marker.
    pub finished_cleanly: bool,
}

#[derive(Debug, Clone)]
pub struct CompletionClient {
    http: HttpClient,
}

impl CompletionClient {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }

    /// Sends the photo with `prompt` and returns the assembled response text.
    pub fn complete(
        &self,
        config: &ApiConfig,
        image: &SourceImage,
        prompt: &str,
    ) -> Result<Completion> {
        config.validate()?;
        let endpoint = normalize_completions_url(&config.base_url);
        let payload = build_request_payload(config, image, prompt);

        let mut response = self
            .http
            .post(&endpoint)
            .header(AUTHORIZATION, format!("Bearer {}", config.api_key))
            .json(&payload)
            .send()
            .map_err(|err| StickerError::Network {
                status: None,
                message: err.to_string(),
            })
            .with_context(|| format!("completion request failed ({endpoint})"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(StickerError::Network {
                status: Some(status.as_u16()),
                message: truncate_text(&body, 512),
            })
            .with_context(|| format!("completion request failed ({endpoint})"));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.contains("application/json") {
            let document: Value = response
                .json()
                .map_err(|err| StickerError::Parse(err.to_string()))
                .context("completion JSON response could not be parsed")?;
            let content = document
                .pointer("/choices/0/message/content")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            return Ok(Completion {
                endpoint,
                content,
                branch: ResponseBranch::Json,
                skipped_chunks: 0,
                finished_cleanly: true,
            });
        }

        let mut accumulator = StreamAccumulator::new();
        let mut buffer = vec![0u8; READ_CHUNK_BYTES];
        loop {
            let read = match response.read(&mut buffer) {
                Ok(0) => break,
                Ok(read) => read,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    return Err(StickerError::Network {
                        status: None,
                        message: err.to_string(),
                    })
                    .context("completion stream was interrupted");
                }
            };
            accumulator.feed(&buffer[..read]);
        }
        let output = accumulator.finish();
        Ok(Completion {
            endpoint,
            content: output.content,
            branch: ResponseBranch::EventStream,
            skipped_chunks: output.skipped_chunks,
            finished_cleanly: output.saw_done,
        })
    }
}

#[cfg(test)]
mod tests {
    use mockito::Matcher;
    use serde_json::json;
    use sticker_contracts::config::ApiConfig;
    use sticker_contracts::reference::SourceImage;
    use sticker_contracts::StickerError;

    use super::{
        build_request_payload, parse_event_line, CompletionClient, LineOutcome, ResponseBranch,
        StreamAccumulator,
    };

    fn source_image() -> SourceImage {
        SourceImage {
            bytes: b"photo".to_vec(),
            mime_type: "image/jpeg".to_string(),
        }
    }

    fn client() -> CompletionClient {
        CompletionClient::new(crate::http_client().expect("http client"))
    }

    #[test]
    fn accumulator_concatenates_deltas_in_order() {
        let mut accumulator = StreamAccumulator::new();
        accumulator.feed(b"data: {\"choices\":[{\"delta\":{\"content\":\"A\"}}]}\n");
        accumulator.feed(b"data: {\"choices\":[{\"delta\":{\"content\":\"B\"}}]}\n");
        accumulator.feed(b"data: [DONE]\n");
        let output = accumulator.finish();
        assert_eq!(output.content, "AB");
        assert!(output.saw_done);
        assert_eq!(output.skipped_chunks, 0);
    }

    #[test]
    fn accumulator_carries_partial_lines_between_reads() {
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"贴纸\"}}]}\n".as_bytes();
        let mut accumulator = StreamAccumulator::new();
        // Split inside the multi-byte characters as well as inside the JSON.
        for piece in line.chunks(5) {
            accumulator.feed(piece);
        }
        assert_eq!(accumulator.content(), "贴纸");
    }

    #[test]
    fn accumulator_skips_malformed_events_and_keeps_going() {
        let mut accumulator = StreamAccumulator::new();
        accumulator.feed(
            b": keep-alive\n\nevent: ping\ndata: {not json\ndata: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n",
        );
        assert_eq!(accumulator.skipped_chunks(), 1);
        let output = accumulator.finish();
        assert_eq!(output.content, "ok");
        assert!(!output.saw_done);
    }

    #[test]
    fn accumulator_flushes_unterminated_last_line() {
        let mut accumulator = StreamAccumulator::new();
        accumulator.feed(b"data: {\"choices\":[{\"delta\":{\"content\":\"tail\"}}]}");
        assert_eq!(accumulator.content(), "");
        assert_eq!(accumulator.finish().content, "tail");
    }

    #[test]
    fn event_lines_classify() {
        assert_eq!(parse_event_line(""), LineOutcome::Ignored);
        assert_eq!(parse_event_line("id: 4"), LineOutcome::Ignored);
        assert_eq!(parse_event_line("data: [DONE]\r"), LineOutcome::Done);
        assert_eq!(
            parse_event_line("data: {\"choices\":[{\"delta\":{}}]}"),
            LineOutcome::Ignored
        );
        assert_eq!(
            parse_event_line("data:{\"choices\":[{\"delta\":{\"content\":\"x\"}}]}"),
            LineOutcome::Delta("x".to_string())
        );
        assert!(matches!(
            parse_event_line("data: {\"choices\""),
            LineOutcome::Malformed(_)
        ));
    }

    #[test]
    fn request_payload_inlines_image_as_data_uri() {
        let config = ApiConfig::new("http://h", "k", "sticker-model");
        let payload = build_request_payload(&config, &source_image(), "make stickers");
        assert_eq!(payload["model"], json!("sticker-model"));
        assert_eq!(payload["stream"], json!(true));
        assert_eq!(payload["messages"][0]["role"], json!("user"));
        assert_eq!(
            payload["messages"][0]["content"][0],
            json!({ "type": "text", "text": "make stickers" })
        );
        assert_eq!(
            payload["messages"][0]["content"][1]["image_url"]["url"],
            json!("data:image/jpeg;base64,cGhvdG8=")
        );
    }

    #[test]
    fn complete_reads_event_stream() -> anyhow::Result<()> {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer test-key")
            .match_body(Matcher::PartialJson(json!({ "model": "m", "stream": true })))
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(concat!(
                "data: {\"choices\":[{\"delta\":{\"content\":\"![s](https://img\"}}]}\n\n",
                "data: garbage\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\".test/a.png)\"}}]}\n\n",
                "data: [DONE]\n\n"
            ))
            .create();

        let config = ApiConfig::new(format!("{}/", server.url()), "test-key", "m");
        let completion = client().complete(&config, &source_image(), "p")?;
        mock.assert();
        assert_eq!(completion.branch, ResponseBranch::EventStream);
        assert_eq!(completion.content, "![s](https://img.test/a.png)");
        assert_eq!(completion.skipped_chunks, 1);
        assert!(completion.finished_cleanly);
        assert!(completion.endpoint.ends_with("/v1/chat/completions"));
        Ok(())
    }

    #[test]
    fn stream_closed_without_done_marker_keeps_content() -> anyhow::Result<()> {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body("data: {\"choices\":[{\"delta\":{\"content\":\"cut short\"}}]}\n\n")
            .create();

        let config = ApiConfig::new(server.url(), "k", "m");
        let completion = client().complete(&config, &source_image(), "p")?;
        assert_eq!(completion.content, "cut short");
        assert!(!completion.finished_cleanly);
        Ok(())
    }

    #[test]
    fn complete_reads_json_document() -> anyhow::Result<()> {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json; charset=utf-8")
            .with_body(r#"{"choices":[{"message":{"content":"https://img.test/b.png"}}]}"#)
            .create();

        let config = ApiConfig::new(format!("{}/v1", server.url()), "k", "m");
        let completion = client().complete(&config, &source_image(), "p")?;
        assert_eq!(completion.branch, ResponseBranch::Json);
        assert_eq!(completion.content, "https://img.test/b.png");
        assert!(completion.finished_cleanly);
        Ok(())
    }

    #[test]
    fn complete_surfaces_status_and_body_on_failure() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(429)
            .with_body("rate limited")
            .create();

        let config = ApiConfig::new(server.url(), "k", "m");
        let err = client()
            .complete(&config, &source_image(), "p")
            .expect_err("429 must fail");
        assert_eq!(
            err.downcast_ref::<StickerError>(),
            Some(&StickerError::Network {
                status: Some(429),
                message: "rate limited".to_string(),
            })
        );
        assert!(format!("{err:#}").contains("429"));
    }

    #[test]
    fn complete_rejects_incomplete_config_before_sending() {
        let config = ApiConfig::new("http://127.0.0.1:9", "", "m");
        let err = client()
            .complete(&config, &source_image(), "p")
            .expect_err("missing key");
        assert!(matches!(
            err.downcast_ref::<StickerError>(),
            Some(StickerError::Config(_))
        ));
    }
}
