use super::stream::{LineDecoder, parse_sse_line};
use super::{
    ChatEventStream, ChatMessage, GenerationClient, GenerationError, GenerationRequest,
    TimeoutPolicy, build_http, error_for_status, map_transport_error,
};
use async_stream::try_stream;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Generation client for OpenAI-compatible `/chat/completions` endpoints.
pub struct OpenAiGenerationClient {
    http: Client,
    base_url: String,
    api_key: String,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiGenerationClient {
    /// Build a client for `base_url` authenticated with `api_key`.
    pub fn new(
        base_url: String,
        api_key: String,
        timeout: impl Into<TimeoutPolicy>,
    ) -> Result<Self, GenerationError> {
        if api_key.trim().is_empty() {
            return Err(GenerationError::Misconfigured("missing OpenAI API key".into()));
        }
        Ok(Self {
            http: build_http(timeout.into())?,
            base_url,
            api_key: api_key.trim().to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    async fn send(
        &self,
        request: &GenerationRequest,
        stream: bool,
    ) -> Result<reqwest::Response, GenerationError> {
        let body = CompletionRequest {
            model: &request.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream,
        };
        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|error| map_transport_error(&self.base_url, error))?;
        error_for_status("OpenAI", response).await
    }
}

#[async_trait]
impl GenerationClient for OpenAiGenerationClient {
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError> {
        let response = self.send(&request, false).await?;
        let body: CompletionResponse = response.json().await.map_err(|error| {
            GenerationError::InvalidResponse(format!("failed to decode OpenAI response: {error}"))
        })?;
        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| GenerationError::InvalidResponse("response had no choices".into()))
    }

    async fn generate_stream(
        &self,
        request: GenerationRequest,
    ) -> Result<ChatEventStream, GenerationError> {
        let response = self.send(&request, true).await?;
        let base_url = self.base_url.clone();

        let events = try_stream! {
            let mut bytes = response.bytes_stream();
            let mut decoder = LineDecoder::default();
            let mut finished = false;

            'read: while let Some(chunk) = bytes.next().await {
                let chunk = chunk.map_err(|error| map_transport_error(&base_url, error))?;
                for line in decoder.push(&chunk) {
                    if let Some(event) = parse_sse_line(&line) {
                        finished = event.done;
                        yield event;
                        if finished {
                            break 'read;
                        }
                    }
                }
            }

            if !finished {
                if let Some(event) = decoder.finish().as_deref().and_then(parse_sse_line) {
                    yield event;
                }
            }
        };

        Ok(Box::pin(events))
    }
}
