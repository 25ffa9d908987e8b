//! Chat models used to generate documents and patches.

use std::{thread, time::Duration};

use color_eyre::{
    Result, Section, SectionExt,
    eyre::{Context, bail, eyre},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use serde_plain::{derive_display_from_serialize, derive_fromstr_from_deserialize};

use crate::config::{Credentials, LlmConfig};

/// A hosted model API.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Google Gemini `generateContent`.
    #[default]
    Gemini,

    /// DeepSeek's OpenAI-compatible chat completions.
    Deepseek,
}

derive_display_from_serialize!(Provider);
derive_fromstr_from_deserialize!(Provider);

impl Provider {
    pub fn default_model(self) -> &'static str {
        match self {
            Provider::Gemini => "gemini-2.5-flash",
            Provider::Deepseek => "deepseek-chat",
        }
    }

    /// Environment variable the API key is read from.
    pub fn api_key_env(self) -> &'static str {
        match self {
            Provider::Gemini => "GEMINI_API_KEY",
            Provider::Deepseek => "DEEPSEEK_API_KEY",
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            Provider::Gemini => "https://generativelanguage.googleapis.com/v1beta",
            Provider::Deepseek => "https://api.deepseek.com",
        }
    }
}

/// Something that turns a system instruction and a prompt into text.
pub trait Model {
    /// Name recorded alongside generated artifacts.
    fn name(&self) -> &str;

    fn generate(&self, system: &str, prompt: &str) -> Result<String>;
}

/// A model reached over HTTPS.
#[derive(Debug)]
pub struct HttpModel {
    provider: Provider,
    model: String,
    base_url: String,
    credentials: Credentials,
    temperature: f32,
    attempts: u32,
    backoff: Duration,
    client: reqwest::blocking::Client,
}

impl HttpModel {
    pub fn new(config: &LlmConfig, credentials: Credentials) -> Result<Self> {
        let mut builder = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .user_agent(concat!("feabench/", env!("CARGO_PKG_VERSION")));
        if config.timeout_secs > 0 {
            builder = builder.timeout(Duration::from_secs(config.timeout_secs));
        }
        let client = builder.build().context("build HTTP client")?;

        Ok(Self {
            provider: config.provider,
            model: config.model(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| config.provider.default_base_url().to_string())
                .trim_end_matches('/')
                .to_string(),
            credentials,
            temperature: config.temperature,
            attempts: config.attempts.max(1),
            backoff: Duration::from_millis(config.backoff_ms),
            client,
        })
    }

    /// The endpoint and JSON body for one request.
    fn request(&self, system: &str, prompt: &str) -> (String, Value) {
        match self.provider {
            Provider::Gemini => (
                format!("{}/models/{}:generateContent", self.base_url, self.model),
                json!({
                    "systemInstruction": { "parts": [{ "text": system }] },
                    "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
                    "generationConfig": { "temperature": self.temperature },
                }),
            ),
            Provider::Deepseek => (
                format!("{}/chat/completions", self.base_url),
                json!({
                    "model": self.model,
                    "messages": [
                        { "role": "system", "content": system },
                        { "role": "user", "content": prompt },
                    ],
                    "temperature": self.temperature,
                    "stream": false,
                }),
            ),
        }
    }

    fn send(&self, url: &str, body: &Value) -> Result<String, Attempt> {
        let request = self.client.post(url).json(body);
        let request = match self.provider {
            Provider::Gemini => request.header("x-goog-api-key", self.credentials.api_key()),
            Provider::Deepseek => request.bearer_auth(self.credentials.api_key()),
        };

        let response = request
            .send()
            .with_context(|| format!("send request to {url}"))
            .map_err(Attempt::Retry)?;
        let status = response.status();
        let text = response
            .text()
            .context("read response body")
            .map_err(Attempt::Retry)?;

        if status.is_success() {
            return extract_text(self.provider, &text).map_err(Attempt::Fatal);
        }

        let error = eyre!("{} returned {status}", self.provider).section(text.header("Response:"));
        if status.as_u16() == 429 || status.is_server_error() {
            Err(Attempt::Retry(error))
        } else {
            Err(Attempt::Fatal(error))
        }
    }
}

/// Why a request attempt failed.
enum Attempt {
    /// Transient: rate limited, server error, or transport failure.
    Retry(color_eyre::Report),
    Fatal(color_eyre::Report),
}

impl Model for HttpModel {
    fn name(&self) -> &str {
        &self.model
    }

    #[tracing::instrument(skip_all, fields(provider = %self.provider, model = %self.model))]
    fn generate(&self, system: &str, prompt: &str) -> Result<String> {
        let (url, body) = self.request(system, prompt);
        let mut attempt = 0;
        loop {
            match self.send(&url, &body) {
                Ok(text) => return Ok(text),
                Err(Attempt::Fatal(error)) => return Err(error),
                Err(Attempt::Retry(error)) if attempt + 1 >= self.attempts => return Err(error),
                Err(Attempt::Retry(error)) => {
                    let delay = self.backoff.saturating_mul(1 << attempt.min(16));
                    tracing::warn!(attempt, ?delay, "request failed, retrying: {error:#}");
                    thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}

/// Pull the generated text out of a successful response body.
fn extract_text(provider: Provider, body: &str) -> Result<String> {
    let value = serde_json::from_str::<Value>(body)
        .context("parse response JSON")
        .with_section(|| body.to_string().header("Response:"))?;

    let text = match provider {
        Provider::Gemini => value["candidates"][0]["content"]["parts"]
            .as_array()
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|part| part["text"].as_str())
                    .collect::<String>()
            }),
        Provider::Deepseek => value["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string),
    };

    match text {
        Some(text) if !text.trim().is_empty() => Ok(text),
        _ => bail!("{provider} response contained no text"),
    }
}
