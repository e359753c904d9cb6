use futures_util::StreamExt;
use log::debug;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::DataQuestionError;

const OPENAI_BASE_URL: &str = "https://api.openai.com";

/// Ephemeral prompt hand-off from the UI side to the relay. No identity, no
/// persistence.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ChatRequest {
    pub prompt: String,
    pub model: String,
}

#[derive(serde::Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
    stream: bool,
}

#[derive(serde::Serialize)]
struct ApiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(serde::Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(serde::Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(serde::Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

#[derive(serde::Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(serde::Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(serde::Deserialize, Default)]
struct StreamDelta {
    content: Option<String>,
}

/// The privileged side of the completion boundary. Holds the HTTP client; the
/// API key is read from the store per call and never crosses to the UI side.
pub struct CompletionRelay {
    client: reqwest::Client,
    base_url: String,
}

impl CompletionRelay {
    pub fn new() -> CompletionRelay {
        CompletionRelay {
            client: reqwest::Client::new(),
            base_url: OPENAI_BASE_URL.to_string(),
        }
    }

    #[cfg(test)]
    pub fn with_base_url(base_url: String) -> CompletionRelay {
        CompletionRelay {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    fn post(
        &self,
        api_key: &str,
        request: &ChatRequest,
        stream: bool,
    ) -> Result<reqwest::RequestBuilder, DataQuestionError> {
        if api_key.is_empty() {
            return Err(DataQuestionError::Auth(
                "No OpenAI API key is configured".into(),
            ));
        }
        let auth = HeaderValue::from_str(&format!("Bearer {}", api_key))
            .map_err(|_| DataQuestionError::Auth("OpenAI API key is not a valid header".into()))?;
        let body = ApiRequest {
            model: &request.model,
            messages: vec![ApiMessage {
                role: "user",
                content: &request.prompt,
            }],
            stream,
        };
        Ok(self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header(AUTHORIZATION, auth)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .json(&body))
    }

    /// One blocking completion: returns the whole response text at once.
    pub async fn complete_once(
        &self,
        api_key: &str,
        request: &ChatRequest,
    ) -> Result<String, DataQuestionError> {
        let response = self.post(api_key, request, false)?.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(error_for_status(status, body));
        }
        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|err| DataQuestionError::Upstream(format!("bad completion body: {}", err)))?;
        Ok(completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default())
    }

    /// One streaming completion. Fragments go into `sink` in arrival order,
    /// at-most-once, until the server sends `[DONE]` or the body ends. A dropped
    /// sink or a fired cancellation token stops relaying and drops the upstream
    /// response, which closes the connection. A mid-stream transport error stops
    /// delivery and surfaces once; nothing is retried or resumed.
    pub async fn complete_streaming(
        &self,
        api_key: &str,
        request: &ChatRequest,
        sink: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<(), DataQuestionError> {
        let response = self.post(api_key, request, true)?.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(error_for_status(status, body));
        }

        let mut stream = response.bytes_stream();
        // Transport chunks split at arbitrary byte boundaries, which can land
        // mid-way through a multi-byte character. Buffer raw bytes and only
        // decode complete lines; a UTF-8 continuation byte can never be '\n'.
        let mut buffer: Vec<u8> = Vec::new();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("completion stream cancelled");
                    return Ok(());
                }
                item = stream.next() => match item {
                    Some(Ok(chunk)) => {
                        buffer.extend_from_slice(&chunk);
                        while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                            let line_bytes: Vec<u8> = buffer.drain(..=pos).collect();
                            let line = String::from_utf8_lossy(&line_bytes);
                            let line = line.trim();
                            let Some(data) = line.strip_prefix("data:") else {
                                continue;
                            };
                            let data = data.trim();
                            if data == "[DONE]" {
                                return Ok(());
                            }
                            let parsed: StreamChunk = match serde_json::from_str(data) {
                                Ok(parsed) => parsed,
                                Err(err) => {
                                    debug!("skipping unparseable stream line: {}", err);
                                    continue;
                                }
                            };
                            let fragment = parsed
                                .choices
                                .into_iter()
                                .next()
                                .and_then(|choice| choice.delta.content);
                            if let Some(fragment) = fragment {
                                if !fragment.is_empty() && sink.send(fragment).await.is_err() {
                                    // Receiver is gone; treat like cancellation.
                                    debug!("fragment sink closed, dropping upstream stream");
                                    return Ok(());
                                }
                            }
                        }
                    }
                    Some(Err(err)) => {
                        return Err(DataQuestionError::Upstream(err.to_string()));
                    }
                    None => return Ok(()),
                }
            }
        }
    }
}

fn error_for_status(status: StatusCode, body: String) -> DataQuestionError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            DataQuestionError::Auth(format!("OpenAI rejected the API key: {}", body))
        }
        _ => DataQuestionError::Upstream(format!("OpenAI returned {}: {}", status, body)),
    }
}
