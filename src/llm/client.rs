use super::sse::{parse_delta, SseDecoder, SseEvent};
use crate::error::{Service, VoiceError};
use futures_util::{Stream, StreamExt};
use reqwest::Client;
use serde::Serialize;
use serde_json::json;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LLMError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<LLMError> for VoiceError {
    fn from(err: LLMError) -> Self {
        match err {
            LLMError::Request(e) => VoiceError::from_request(Service::TextGeneration, &e),
            LLMError::ApiError { status, message } => {
                VoiceError::from_status(Service::TextGeneration, status, &message)
            }
            LLMError::Config(msg) => VoiceError::Unknown(msg),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LLMConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub request_timeout: Duration,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.groq.com/openai/v1".to_string(),
            model: "meta-llama/llama-4-maverick-17b-128e-instruct".to_string(),
            temperature: 0.3,
            // Spoken replies are short
            max_tokens: Some(1024),
            request_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Reply fragments in arrival order. Nothing is sent until first polled.
pub type ReplyStream = Pin<Box<dyn Stream<Item = Result<String, LLMError>> + Send>>;

/// Streaming chat completion endpoint
pub trait ChatBackend: Send + Sync {
    fn stream_completion(&self, messages: Vec<Message>) -> ReplyStream;
}

/// OpenAI-compatible streaming client (Groq by default)
pub struct ChatClient {
    client: Client,
    api_key: String,
    config: LLMConfig,
}

impl ChatClient {
    pub fn new(api_key: String, config: LLMConfig) -> Result<Self, LLMError> {
        if api_key.trim().is_empty() {
            return Err(LLMError::Config("API key is empty".to_string()));
        }
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            api_key,
            config,
        })
    }

    pub fn config(&self) -> &LLMConfig {
        &self.config
    }

    fn payload(&self, messages: &[Message]) -> serde_json::Value {
        let mut payload = json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": self.config.temperature,
            "stream": true
        });
        if let Some(max_tokens) = self.config.max_tokens {
            payload["max_tokens"] = json!(max_tokens);
        }
        payload
    }
}

impl ChatBackend for ChatClient {
    fn stream_completion(&self, messages: Vec<Message>) -> ReplyStream {
        let client = self.client.clone();
        let url = format!("{}/chat/completions", self.config.base_url);
        let api_key = self.api_key.clone();
        let payload = self.payload(&messages);
        log::debug!("LLM: Requesting completion for {} messages", messages.len());

        Box::pin(completion_stream(client, url, api_key, payload))
    }
}

fn completion_stream(
    client: Client,
    url: String,
    api_key: String,
    payload: serde_json::Value,
) -> impl Stream<Item = Result<String, LLMError>> + Send {
    async_stream::try_stream! {
        let response = send(&client, &url, &api_key, &payload).await?;
        let mut body = Box::pin(response.bytes_stream());
        let mut decoder = SseDecoder::new();
        let mut finished = false;

        while !finished {
            let Some(chunk) = body.next().await else {
                break;
            };
            for event in decoder.push(&chunk?) {
                match event {
                    SseEvent::Data(data) => {
                        if let Some(delta) = parse_delta(&data) {
                            if !delta.is_empty() {
                                yield delta;
                            }
                        }
                    }
                    SseEvent::Done => {
                        finished = true;
                        break;
                    }
                }
            }
        }

        if !finished {
            if let Some(SseEvent::Data(data)) = decoder.finish() {
                if let Some(delta) = parse_delta(&data) {
                    if !delta.is_empty() {
                        yield delta;
                    }
                }
            }
        }
    }
}

async fn send(
    client: &Client,
    url: &str,
    api_key: &str,
    payload: &serde_json::Value,
) -> Result<reqwest::Response, LLMError> {
    let response = client
        .post(url)
        .header("Authorization", format!("Bearer {}", api_key))
        .header("Content-Type", "application/json")
        .json(payload)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(LLMError::ApiError {
            status: status.as_u16(),
            message: error_text,
        });
    }
    Ok(response)
}
