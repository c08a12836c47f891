use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::provider::{DeltaReceiver, GenerativeModel};
use super::types::ChatRequest;
use crate::core::errors::ProviderError;
use crate::embedding::EmbeddingProvider;

/// Client for any OpenAI-compatible `/chat/completions` + `/embeddings` API.
#[derive(Clone)]
pub struct OpenAiProvider {
    base_url: String,
    model: String,
    api_key: Option<String>,
    dimensions: Option<usize>,
    client: Client,
}

impl OpenAiProvider {
    pub fn new(
        base_url: &str,
        model: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Unreachable(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            dimensions: None,
            client,
        })
    }

    /// Requests shortened embeddings from models that support it.
    pub fn with_dimensions(mut self, dimensions: Option<usize>) -> Self {
        self.dimensions = dimensions;
        self
    }

    fn post(&self, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, path);
        let builder = self.client.post(url);
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    fn chat_body(&self, request: &ChatRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": request.messages,
            "stream": stream,
        });

        if let Some(obj) = body.as_object_mut() {
            if let Some(t) = request.temperature {
                obj.insert("temperature".to_string(), json!(t));
            }
            if let Some(t) = request.max_tokens {
                obj.insert("max_tokens".to_string(), json!(t));
            }
        }
        body
    }
}

async fn ensure_success(res: Response) -> Result<Response, ProviderError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let text = res.text().await.unwrap_or_default();
    Err(ProviderError::from_status(status, text))
}

/// One parsed line of an SSE completion stream.
#[derive(Debug, PartialEq)]
enum StreamLine {
    Delta(String),
    Done,
    Skip,
}

fn parse_stream_line(line: &str) -> StreamLine {
    let line = line.trim();
    let Some(data) = line.strip_prefix("data:") else {
        return StreamLine::Skip;
    };
    let data = data.trim_start();
    if data == "[DONE]" {
        return StreamLine::Done;
    }
    match serde_json::from_str::<Value>(data) {
        Ok(json) => match json["choices"][0]["delta"]["content"].as_str() {
            Some(content) if !content.is_empty() => StreamLine::Delta(content.to_string()),
            _ => StreamLine::Skip,
        },
        Err(_) => StreamLine::Skip,
    }
}

/// Reassembles lines from arbitrarily split network chunks.
#[derive(Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

#[async_trait]
impl GenerativeModel for OpenAiProvider {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: ChatRequest) -> Result<String, ProviderError> {
        let body = self.chat_body(&request, false);
        let res = self.post("chat/completions").json(&body).send().await?;
        let res = ensure_success(res).await?;

        let payload: Value = res.json().await?;
        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ProviderError::Malformed("completion has no message content".to_string()))
    }

    async fn generate_stream(&self, request: ChatRequest) -> Result<DeltaReceiver, ProviderError> {
        let body = self.chat_body(&request, true);
        let res = self.post("chat/completions").json(&body).send().await?;
        let res = ensure_success(res).await?;

        let (tx, rx) = mpsc::channel(32);
        let mut stream = res.bytes_stream();

        tokio::spawn(async move {
            let mut buffer = LineBuffer::default();
            loop {
                // Dropping the stream here closes the upstream connection.
                let item = tokio::select! {
                    _ = tx.closed() => return,
                    item = stream.next() => item,
                };
                let Some(item) = item else {
                    break;
                };
                match item {
                    Ok(bytes) => {
                        for line in buffer.push(&bytes) {
                            match parse_stream_line(&line) {
                                StreamLine::Done => return,
                                StreamLine::Delta(content) => {
                                    if tx.send(Ok(content)).await.is_err() {
                                        return;
                                    }
                                }
                                StreamLine::Skip => {}
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(ProviderError::from(e))).await;
                        return;
                    }
                }
            }
            if let Some(StreamLine::Delta(content)) =
                buffer.finish().map(|line| parse_stream_line(&line))
            {
                let _ = tx.send(Ok(content)).await;
            }
        });

        Ok(rx)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let mut body = json!({
            "model": self.model,
            "input": text,
        });
        if let (Some(dimensions), Some(obj)) = (self.dimensions, body.as_object_mut()) {
            obj.insert("dimensions".to_string(), json!(dimensions));
        }

        let res = self.post("embeddings").json(&body).send().await?;
        let res = ensure_success(res).await?;

        let payload: Value = res.json().await?;
        let values = payload["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| ProviderError::Malformed("response has no embedding".to_string()))?;

        let vector: Vec<f32> = values
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect();
        if vector.is_empty() || vector.len() != values.len() {
            return Err(ProviderError::Malformed("embedding is empty or non-numeric".to_string()));
        }
        Ok(vector)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
