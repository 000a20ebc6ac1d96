//! HTTP chat-completion generator.
//!
//! Talks to an Ollama-compatible `/api/chat` endpoint with NDJSON
//! streaming. Session history maps directly onto chat messages; the
//! persona rides along as the system message and is never parsed.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use parley_config::GeneratorProviderConfig;
use parley_core::{
    Error, GenerateRequest, ReplyChunk, ResponseGenerator, Result, Speaker, StageKind,
};

use crate::ProviderError;

pub struct ChatHttpGenerator {
    client: Client,
    config: GeneratorProviderConfig,
}

impl ChatHttpGenerator {
    pub fn new(config: &GeneratorProviderConfig) -> std::result::Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| {
                ProviderError::Configuration(format!("failed to create HTTP client: {e}"))
            })?;
        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api{}", self.config.endpoint.trim_end_matches('/'), path)
    }

    fn messages(request: &GenerateRequest) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(request.history.len() + 1);
        messages.push(ChatMessage {
            role: "system".to_string(),
            content: request.persona.clone(),
        });
        // Interrupted agent fragments are included as-is; the model sees
        // exactly what the participant heard.
        for utterance in &request.history {
            let role = match utterance.speaker {
                Speaker::Participant => "user",
                Speaker::Agent => "assistant",
            };
            messages.push(ChatMessage {
                role: role.to_string(),
                content: utterance.text.clone(),
            });
        }
        messages
    }

    fn request_error(&self, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::Timeout(self.config.timeout_ms)
        } else {
            Error::stage(StageKind::Generator, err.to_string())
        }
    }

    /// Issue the chat request and map HTTP failures to stage errors
    /// before the body stream is consumed.
    async fn send_chat(&self, body: &ChatRequest) -> Result<reqwest::Response> {
        let mut builder = self.client.post(self.api_url("/chat")).json(body);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await.map_err(|e| self.request_error(e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let detail = response.text().await.unwrap_or_default();
        // 5xx are retryable, 4xx are not
        if status.is_server_error() {
            Err(Error::stage(
                StageKind::Generator,
                format!("server error {status}: {detail}"),
            ))
        } else {
            Err(Error::stage_fatal(
                StageKind::Generator,
                format!("request rejected {status}: {detail}"),
            ))
        }
    }
}

#[async_trait]
impl ResponseGenerator for ChatHttpGenerator {
    fn generate_stream<'a>(
        &'a self,
        request: GenerateRequest,
    ) -> Pin<Box<dyn Stream<Item = Result<ReplyChunk>> + Send + 'a>> {
        Box::pin(async_stream::try_stream! {
            let body = ChatRequest {
                model: self.config.model.clone(),
                messages: Self::messages(&request),
                stream: true,
                options: Some(ChatOptions {
                    temperature: Some(request.temperature),
                    num_predict: Some(request.max_tokens as i32),
                }),
            };

            let response = self.send_chat(&body).await?;
            let mut bytes = response.bytes_stream();
            // NDJSON lines can split across network chunks
            let mut pending = String::new();
            'read: while let Some(chunk) = bytes.next().await {
                let chunk = chunk.map_err(|e| self.request_error(e))?;
                pending.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(pos) = pending.find('\n') {
                    let line: String = pending.drain(..=pos).collect();
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    let parsed: ChatStreamChunk = serde_json::from_str(line).map_err(|e| {
                        Error::stage_fatal(
                            StageKind::Generator,
                            format!("malformed stream chunk: {e}"),
                        )
                    })?;
                    if !parsed.message.content.is_empty() {
                        yield ReplyChunk::delta(parsed.message.content);
                    }
                    if parsed.done {
                        break 'read;
                    }
                }
            }
            yield ReplyChunk::done();
        })
    }

    async fn is_available(&self) -> bool {
        self.client
            .get(self.api_url("/tags"))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<ChatOptions>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct ChatStreamChunk {
    message: ChatMessage,
    done: bool,
}
