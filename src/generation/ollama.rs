use super::stream::{LineDecoder, parse_ollama_line};
use super::{
    ChatEventStream, GenerationClient, GenerationError, GenerationRequest, TimeoutPolicy,
    build_http, error_for_status, map_transport_error,
};
use async_stream::try_stream;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};

/// Generation client for a local Ollama runtime (`/api/chat`).
pub struct OllamaGenerationClient {
    http: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

impl OllamaGenerationClient {
    /// Build a client for `base_url` bounded by `timeout`; a bare `Duration` is a total limit.
    pub fn new(
        base_url: String,
        timeout: impl Into<TimeoutPolicy>,
    ) -> Result<Self, GenerationError> {
        Ok(Self {
            http: build_http(timeout.into())?,
            base_url,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/chat", self.base_url.trim_end_matches('/'))
    }

    fn payload(request: &GenerationRequest, stream: bool) -> Value {
        let mut options = json!({ "temperature": request.temperature });
        if let Some(max_tokens) = request.max_tokens {
            options["num_predict"] = json!(max_tokens);
        }
        json!({
            "model": request.model,
            "messages": request.messages,
            "stream": stream,
            "options": options,
        })
    }

    async fn send(
        &self,
        request: &GenerationRequest,
        stream: bool,
    ) -> Result<reqwest::Response, GenerationError> {
        tracing::debug!(
            model = %request.model,
            turns = request.messages.len(),
            stream,
            "Calling Ollama chat"
        );
        let response = self
            .http
            .post(self.endpoint())
            .json(&Self::payload(request, stream))
            .send()
            .await
            .map_err(|error| map_transport_error(&self.base_url, error))?;
        error_for_status("Ollama", response).await
    }
}

#[async_trait]
impl GenerationClient for OllamaGenerationClient {
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError> {
        let response = self.send(&request, false).await?;
        let body: ChatResponse = response.json().await.map_err(|error| {
            GenerationError::InvalidResponse(format!("failed to decode Ollama response: {error}"))
        })?;

        if !body.done {
            return Err(GenerationError::InvalidResponse(
                "Ollama response incomplete".into(),
            ));
        }

        Ok(body.message.content.trim().to_string())
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
                    if let Some(event) = parse_ollama_line(&line) {
                        finished = event.done;
                        yield event;
                        if finished {
                            break 'read;
                        }
                    }
                }
            }

            if !finished {
                if let Some(event) = decoder.finish().as_deref().and_then(parse_ollama_line) {
                    yield event;
                }
            }
        };

        Ok(Box::pin(events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::ChatMessage;
    use httpmock::{Method::POST, MockServer};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn single_turn(model: &str, prompt: &str) -> GenerationRequest {
        GenerationRequest {
            model: model.to_string(),
            messages: vec![ChatMessage::user(prompt)],
            max_tokens: None,
            temperature: 0.1,
        }
    }

    fn client_for(server: &MockServer) -> OllamaGenerationClient {
        OllamaGenerationClient::new(server.base_url(), Duration::from_secs(5)).expect("client")
    }

    #[tokio::test]
    async fn generate_sends_bounded_low_temperature_request() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/chat")
                    .body_contains("\"stream\":false")
                    .body_contains("\"num_predict\":256");
                then.status(200).json_body(json!({
                    "message": { "role": "assistant", "content": "  Respuesta  " },
                    "done": true
                }));
            })
            .await;

        let mut request = single_turn("llama3", "¿Qué es RIPS?");
        request.max_tokens = Some(256);
        let text = client_for(&server).generate(request).await.expect("text");

        mock.assert();
        assert_eq!(text, "Respuesta");
    }

    #[tokio::test]
    async fn generate_maps_server_errors_to_unavailable() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/chat");
                then.status(503).body("loading model");
            })
            .await;

        let error = client_for(&server)
            .generate(single_turn("llama3", "hola"))
            .await
            .expect_err("unavailable");
        assert!(matches!(error, GenerationError::ProviderUnavailable(_)));
    }

    #[tokio::test]
    async fn stream_skips_malformed_lines_and_stops_on_done() {
        let server = MockServer::start_async().await;
        let body = [
            r#"{"message":{"content":"La "},"done":false}"#,
            "esto no es json",
            r#"{"message":{"content":"glosa"},"done":false}"#,
            r#"{"message":{"content":""},"done":true}"#,
            r#"{"message":{"content":"ignorado"},"done":false}"#,
        ]
        .join("\n");
        server
            .mock_async(move |when, then| {
                when.method(POST)
                    .path("/api/chat")
                    .body_contains("\"stream\":true");
                then.status(200).body(body.clone());
            })
            .await;

        let mut stream = client_for(&server)
            .generate_stream(single_turn("llama3", "hola"))
            .await
            .expect("stream");
        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            events.push(event.expect("event"));
        }

        let text: String = events.iter().map(|event| event.content.as_str()).collect();
        assert_eq!(text, "La glosa");
        assert!(events.last().expect("last").done);
        assert_eq!(events.len(), 3);
    }

    async fn read_request(socket: &mut TcpStream) {
        let mut received = Vec::new();
        let mut buffer = [0u8; 4096];
        loop {
            let read = socket.read(&mut buffer).await.expect("read request");
            if read == 0 {
                return;
            }
            received.extend_from_slice(&buffer[..read]);
            let text = String::from_utf8_lossy(&received).to_string();
            if let Some(header_end) = text.find("\r\n\r\n") {
                let body_len = text[..header_end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if received.len() >= header_end + 4 + body_len {
                    return;
                }
            }
        }
    }

    /// Serve one NDJSON reply whose lines arrive `pause` apart.
    async fn serve_paced_reply(lines: Vec<&'static str>, pause: Duration) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("address");
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            read_request(&mut socket).await;
            socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\ncontent-type: application/x-ndjson\r\nconnection: close\r\n\r\n",
                )
                .await
                .expect("headers");
            for line in lines {
                tokio::time::sleep(pause).await;
                if socket.write_all(format!("{line}\n").as_bytes()).await.is_err() {
                    return;
                }
            }
            let _ = socket.shutdown().await;
        });
        format!("http://{address}")
    }

    fn paced_lines() -> Vec<&'static str> {
        vec![
            r#"{"message":{"content":"La glosa "},"done":false}"#,
            r#"{"message":{"content":"se responde "},"done":false}"#,
            r#"{"message":{"content":"en 15 días."},"done":false}"#,
            r#"{"message":{"content":""},"done":true}"#,
        ]
    }

    #[tokio::test]
    async fn idle_timeout_lets_a_long_stream_finish() {
        let base_url = serve_paced_reply(paced_lines(), Duration::from_millis(300)).await;
        let client =
            OllamaGenerationClient::new(base_url, TimeoutPolicy::Idle(Duration::from_millis(800)))
                .expect("client");

        let mut stream = client
            .generate_stream(single_turn("llama3", "¿Plazo de respuesta?"))
            .await
            .expect("stream");
        let mut text = String::new();
        while let Some(event) = stream.next().await {
            text.push_str(&event.expect("event").content);
        }

        assert_eq!(text, "La glosa se responde en 15 días.");
    }

    #[tokio::test]
    async fn total_timeout_cuts_a_long_stream() {
        let base_url = serve_paced_reply(paced_lines(), Duration::from_millis(300)).await;
        let client = OllamaGenerationClient::new(base_url, Duration::from_millis(800))
            .expect("client");

        let outcome = async {
            let mut stream = client
                .generate_stream(single_turn("llama3", "¿Plazo de respuesta?"))
                .await?;
            while let Some(event) = stream.next().await {
                event?;
            }
            Ok::<_, GenerationError>(())
        }
        .await;

        assert!(outcome.is_err(), "a total limit must stop a stream that outlives it");
    }
}
