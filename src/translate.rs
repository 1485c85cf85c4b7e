use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use thiserror::Error;

use crate::cli::{TranslateEngine, TranslatorArgs};

/// Fixed system instruction for the translation call. Paragraph preservation
/// is part of the contract: the renderer splits on blank lines.
const INSTRUCTIONS: &str = "Translate the Chinese web novel text you are given into fluent English. \
Preserve the paragraph structure: keep paragraphs separated by blank lines, in their original order. \
Preserve the storytelling tone. Do not summarize and do not add content of your own.";

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("translation request failed: {0}")]
    Request(String),
    #[error("translation service returned no usable text")]
    Empty,
}

#[async_trait]
pub trait Translator: Send + Sync {
    /// Translates one whole chapter in a single attempt. No retry, no
    /// chunking; failures are propagated, never swallowed.
    async fn translate(&self, text: &str) -> Result<String, TranslateError>;
}

pub fn from_args(args: &TranslatorArgs) -> anyhow::Result<Arc<dyn Translator>> {
    match args.engine {
        TranslateEngine::Noop => Ok(Arc::new(NoopTranslator)),
        TranslateEngine::Openai => Ok(Arc::new(OpenAiTranslator::from_env(
            &args.openai_base_url,
            args.openai_model.clone(),
        )?)),
    }
}

/// Passes text through unchanged. Used by tests and dry runs.
pub struct NoopTranslator;

#[async_trait]
impl Translator for NoopTranslator {
    async fn translate(&self, text: &str) -> Result<String, TranslateError> {
        Ok(text.to_owned())
    }
}

pub struct OpenAiTranslator {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAiTranslator {
    pub fn new(base_url: &str, api_key: String, model: String) -> anyhow::Result<Self> {
        // No request timeout: a full chapter can legitimately take minutes,
        // and the call is made exactly once.
        let client = reqwest::Client::builder()
            .build()
            .context("build translation http client")?;

        Ok(Self {
            client,
            endpoint: format!("{}/responses", base_url.trim_end_matches('/')),
            api_key,
            model,
        })
    }

    pub fn from_env(base_url: &str, model: String) -> anyhow::Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY is not set"))?;
        Self::new(base_url, api_key, model)
    }
}

#[async_trait]
impl Translator for OpenAiTranslator {
    async fn translate(&self, text: &str) -> Result<String, TranslateError> {
        let body = serde_json::json!({
            "model": self.model,
            "instructions": INSTRUCTIONS,
            "input": text,
            "text": { "format": { "type": "text" } },
            "store": false,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| TranslateError::Request(format!("POST {}: {err}", self.endpoint)))?;

        let status = response.status();
        let raw = response
            .text()
            .await
            .map_err(|err| TranslateError::Request(format!("read response body: {err}")))?;
        if !status.is_success() {
            let message = api_error_message(&raw).unwrap_or(raw);
            return Err(TranslateError::Request(format!(
                "service error ({status}): {message}"
            )));
        }

        let value: serde_json::Value = serde_json::from_str(&raw)
            .map_err(|err| TranslateError::Request(format!("parse response: {err}")))?;
        let text = output_text(&value).ok_or(TranslateError::Empty)?;
        Ok(text)
    }
}

fn api_error_message(raw: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    Some(value.pointer("/error/message")?.as_str()?.to_owned())
}

/// Concatenates the `output_text` parts of the response's message items and
/// trims the result; `None` when nothing usable came back.
fn output_text(value: &serde_json::Value) -> Option<String> {
    let output = value.get("output")?.as_array()?;

    let mut text = String::new();
    for item in output {
        if item.get("type").and_then(|v| v.as_str()) != Some("message") {
            continue;
        }
        let Some(content) = item.get("content").and_then(|v| v.as_array()) else {
            continue;
        };
        for part in content {
            if part.get("type").and_then(|v| v.as_str()) != Some("output_text") {
                continue;
            }
            if let Some(part_text) = part.get("text").and_then(|v| v.as_str()) {
                text.push_str(part_text);
            }
        }
    }

    let text = text.trim();
    (!text.is_empty()).then(|| text.to_owned())
}
