//! HTTP surface for Ripsy.
//!
//! This module exposes a compact Axum router:
//!
//! - `GET /` – Service status with the active prompt settings version.
//! - `POST /ask` – Answer a regulatory question from retrieved fragments. Returns
//!   `{ "answer": string, "sources": [string] }`.
//! - `POST /chat` – Stream a chat reply as NDJSON (`{"content": ...}` lines, then `{"done": true}`).
//! - `POST /glosa` – Multipart upload (`factura`, `historia_clinica`, optional `validaciones`)
//!   scored for glosa risk.
//! - `POST /glosa/texto` – Score already-extracted invoice and clinical record text.
//! - `GET /sources` – Distinct regulatory documents present in the fragment store.
//! - `POST /admin/reload` – Re-read the system prompt and glossary.
//! - `GET /metrics` – Question, chat, and assessment counters.
//! - `GET /commands` – Machine-readable command catalog.
//!
//! Errors are returned as `{"error": string}` with a status that reflects the failing stage.

use crate::{
    generation::ChatEventStream,
    glosa::{GlosaError, RiskAssessment, ValidationReport},
    metrics::MetricsSnapshot,
    processing::{AssistantApi, ChatExchange, GlosaDocuments, RetrievalError},
    storage::ObjectStoreError,
};
use axum::{
    Json, Router,
    body::Body,
    extract::{DefaultBodyLimit, Multipart, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::convert::Infallible;
use std::sync::Arc;

const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

/// Build the HTTP router exposing the assistant.
pub fn create_router<S>(service: Arc<S>) -> Router
where
    S: AssistantApi + 'static,
{
    Router::new()
        .route("/", get(get_status::<S>))
        .route("/ask", post(ask_question::<S>))
        .route("/chat", post(chat::<S>))
        .route("/glosa", post(assess_glosa::<S>))
        .route("/glosa/texto", post(assess_glosa_text::<S>))
        .route("/sources", get(list_sources::<S>))
        .route("/admin/reload", post(reload_settings::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .route("/commands", get(get_commands))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(service)
}

/// Response body for `GET /`.
#[derive(Serialize)]
struct StatusResponse {
    service: &'static str,
    status: &'static str,
    settings_version: u64,
    settings_digest: String,
}

async fn get_status<S>(State(service): State<Arc<S>>) -> Json<StatusResponse>
where
    S: AssistantApi,
{
    let settings = service.settings_snapshot();
    Json(StatusResponse {
        service: "ripsy",
        status: "ok",
        settings_version: settings.version,
        settings_digest: settings.digest.clone(),
    })
}

/// Request body for `POST /ask`.
#[derive(Deserialize)]
struct AskRequest {
    question: String,
}

/// Answer a question grounded in the regulatory fragments.
async fn ask_question<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<AskRequest>,
) -> Result<Response, AppError>
where
    S: AssistantApi,
{
    let answer = service.answer_question(request.question).await?;
    tracing::info!(sources = answer.sources.len(), "Ask request completed");
    Ok(Json(answer).into_response())
}

/// Request body for `POST /chat`.
#[derive(Deserialize)]
struct ChatRequest {
    message: String,
    #[serde(default)]
    history: Vec<ChatExchange>,
}

/// Stream a chat reply as newline-delimited JSON.
///
/// Dropping the response body (client disconnect) drops the provider stream.
async fn chat<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<ChatRequest>,
) -> Result<Response, AppError>
where
    S: AssistantApi,
{
    let events = service
        .chat_stream(request.message, request.history)
        .await?;
    Ok((
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        ndjson_body(events),
    )
        .into_response())
}

fn ndjson_line(value: &Value) -> String {
    let mut line = value.to_string();
    line.push('\n');
    line
}

fn ndjson_body(mut events: ChatEventStream) -> Body {
    let lines = async_stream::stream! {
        let mut failed = false;
        while let Some(event) = events.next().await {
            match event {
                Ok(event) => {
                    if !event.content.is_empty() {
                        yield Ok::<_, Infallible>(ndjson_line(&json!({ "content": event.content })));
                    }
                    if event.done {
                        break;
                    }
                }
                Err(error) => {
                    tracing::warn!(error = %error, "Chat stream interrupted");
                    yield Ok(ndjson_line(&json!({ "error": error.to_string() })));
                    failed = true;
                    break;
                }
            }
        }
        if !failed {
            yield Ok(ndjson_line(&json!({ "done": true })));
        }
    };
    Body::from_stream(lines)
}

/// Score an invoice and clinical record uploaded as PDFs.
async fn assess_glosa<S>(
    State(service): State<Arc<S>>,
    mut multipart: Multipart,
) -> Result<Json<RiskAssessment>, AppError>
where
    S: AssistantApi,
{
    let mut invoice = None;
    let mut clinical = None;
    let mut validations = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::BadRequest(format!("invalid multipart body: {err}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|err| AppError::BadRequest(format!("failed to read `{name}`: {err}")))?;
        match name.as_str() {
            "factura" => invoice = Some(bytes.to_vec()),
            "historia_clinica" => clinical = Some(bytes.to_vec()),
            "validaciones" if !bytes.is_empty() => {
                validations = Some(ValidationReport::from_json(&bytes)?);
            }
            other => tracing::debug!(field = other, "Ignoring multipart field"),
        }
    }

    let invoice_pdf = invoice.ok_or_else(|| AppError::BadRequest("missing `factura`".into()))?;
    let clinical_pdf =
        clinical.ok_or_else(|| AppError::BadRequest("missing `historia_clinica`".into()))?;
    tracing::info!(
        invoice_bytes = invoice_pdf.len(),
        clinical_bytes = clinical_pdf.len(),
        with_validations = validations.is_some(),
        "Glosa upload received"
    );

    let assessment = service
        .assess_glosa_documents(GlosaDocuments {
            invoice_pdf,
            clinical_pdf,
            validations,
        })
        .await?;
    Ok(Json(assessment))
}

/// Request body for `POST /glosa/texto`.
#[derive(Deserialize)]
struct GlosaTextRequest {
    factura: String,
    historia_clinica: String,
}

async fn assess_glosa_text<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<GlosaTextRequest>,
) -> Json<RiskAssessment>
where
    S: AssistantApi,
{
    Json(
        service
            .assess_glosa_risk(request.factura, request.historia_clinica)
            .await,
    )
}

/// Response body for `GET /sources`.
#[derive(Serialize)]
struct SourcesResponse {
    sources: Vec<String>,
}

async fn list_sources<S>(State(service): State<Arc<S>>) -> Result<Json<SourcesResponse>, AppError>
where
    S: AssistantApi,
{
    let sources = service.list_sources().await?;
    Ok(Json(SourcesResponse {
        sources: sources.into_iter().collect(),
    }))
}

/// Response body for `POST /admin/reload`.
#[derive(Serialize)]
struct ReloadResponse {
    version: u64,
    digest: String,
    loaded_at: String,
}

async fn reload_settings<S>(
    State(service): State<Arc<S>>,
) -> Result<Json<ReloadResponse>, AppError>
where
    S: AssistantApi,
{
    let snapshot = service.reload_settings().await?;
    Ok(Json(ReloadResponse {
        version: snapshot.version,
        digest: snapshot.digest.clone(),
        loaded_at: snapshot.loaded_at.clone(),
    }))
}

async fn get_metrics<S>(State(service): State<Arc<S>>) -> Json<MetricsSnapshot>
where
    S: AssistantApi,
{
    Json(service.metrics_snapshot())
}

/// Descriptor for a single command in the discovery catalog.
#[derive(Serialize)]
struct CommandDescriptor {
    name: &'static str,
    method: &'static str,
    path: &'static str,
    description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_example: Option<Value>,
}

/// Response body for `GET /commands`.
#[derive(Serialize)]
struct CommandsResponse {
    commands: Vec<CommandDescriptor>,
}

/// Enumerate supported HTTP commands for discovery.
async fn get_commands() -> Json<CommandsResponse> {
    Json(CommandsResponse {
        commands: vec![
            CommandDescriptor {
                name: "ask",
                method: "POST",
                path: "/ask",
                description: "Answer a health-billing regulatory question from retrieved fragments, citing source documents.",
                request_example: Some(json!({ "question": "¿Qué es RIPS?" })),
            },
            CommandDescriptor {
                name: "chat",
                method: "POST",
                path: "/chat",
                description: "Stream a chat reply as NDJSON using the system prompt, glossary, and recent history.",
                request_example: Some(json!({
                    "message": "¿Cuándo procede una glosa por pertinencia?",
                    "history": [{ "user_message": "Hola", "bot_response": "¡Hola! ¿En qué te ayudo?" }]
                })),
            },
            CommandDescriptor {
                name: "glosa",
                method: "POST",
                path: "/glosa",
                description: "Multipart upload of `factura` and `historia_clinica` PDFs (optional `validaciones` JSON); returns a glosa risk assessment.",
                request_example: None,
            },
            CommandDescriptor {
                name: "glosa_texto",
                method: "POST",
                path: "/glosa/texto",
                description: "Score already-extracted invoice and clinical record text.",
                request_example: Some(json!({
                    "factura": "CUPS 890201 12/03/2024 $45,000",
                    "historia_clinica": "Diagnóstico: cefalea. CUPS 890201 12/03/2024"
                })),
            },
            CommandDescriptor {
                name: "sources",
                method: "GET",
                path: "/sources",
                description: "List regulatory documents present in the fragment store.",
                request_example: None,
            },
            CommandDescriptor {
                name: "reload",
                method: "POST",
                path: "/admin/reload",
                description: "Re-read the system prompt and glossary; the previous settings stay active on failure.",
                request_example: None,
            },
            CommandDescriptor {
                name: "metrics",
                method: "GET",
                path: "/metrics",
                description: "Return question, chat, and assessment counters.",
                request_example: None,
            },
        ],
    })
}

enum AppError {
    Retrieval(RetrievalError),
    Glosa(GlosaError),
    Settings(ObjectStoreError),
    BadRequest(String),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Retrieval(RetrievalError::EmptyQuestion) => StatusCode::BAD_REQUEST,
            Self::Retrieval(RetrievalError::Configuration(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Retrieval(RetrievalError::EmbeddingUnavailable(_))
            | Self::Retrieval(RetrievalError::GenerationUnavailable(_)) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::Retrieval(RetrievalError::Ranking(_)) => StatusCode::BAD_GATEWAY,
            Self::Glosa(GlosaError::Extraction(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Glosa(GlosaError::InvalidValidations(_)) => StatusCode::BAD_REQUEST,
            Self::Settings(_) => StatusCode::BAD_GATEWAY,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Retrieval(error) => error.to_string(),
            Self::Glosa(error) => error.to_string(),
            Self::Settings(error) => error.to_string(),
            Self::BadRequest(message) => message.clone(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.message() }))).into_response()
    }
}

impl From<RetrievalError> for AppError {
    fn from(inner: RetrievalError) -> Self {
        Self::Retrieval(inner)
    }
}

impl From<GlosaError> for AppError {
    fn from(inner: GlosaError) -> Self {
        Self::Glosa(inner)
    }
}

impl From<ObjectStoreError> for AppError {
    fn from(inner: ObjectStoreError) -> Self {
        Self::Settings(inner)
    }
}

#[cfg(test)]
mod tests {
    use super::{create_router, get_commands};
    use crate::extraction::ExtractionError;
    use crate::generation::{ChatEvent, ChatEventStream, GenerationError};
    use crate::glosa::{
        AssessmentSource, GlosaError, RiskAssessment, RiskLevel, ScoreBreakdown, StaticDefault,
    };
    use crate::metrics::MetricsSnapshot;
    use crate::processing::{
        Answer, AssistantApi, ChatExchange, GlosaDocuments, RetrievalError,
    };
    use crate::settings::PromptSettings;
    use crate::storage::ObjectStoreError;
    use async_trait::async_trait;
    use axum::{
        body::{Body, to_bytes},
        http::{Method, Request, StatusCode},
    };
    use serde_json::{Value, json};
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use tokio::sync::Mutex;
    use tower::ServiceExt;

    const BOUNDARY: &str = "ripsy-boundary";

    #[tokio::test]
    async fn commands_catalog_exposes_core_endpoints() {
        let response = get_commands().await;
        let commands = response.0.commands;
        let ask = commands
            .iter()
            .find(|cmd| cmd.name == "ask")
            .expect("ask command present");
        assert_eq!(ask.method, "POST");
        assert_eq!(ask.path, "/ask");
        assert!(commands.iter().any(|cmd| cmd.path == "/glosa"));
        assert!(commands.iter().any(|cmd| cmd.path == "/admin/reload"));
    }

    #[tokio::test]
    async fn ask_route_returns_answer_and_sources() {
        let service = Arc::new(StubAssistant::default());
        let app = create_router(service.clone());

        let response = app
            .oneshot(json_request("/ask", json!({ "question": "¿Qué es RIPS?" })))
            .await
            .expect("router response");

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["answer"], "RIPS es el registro individual de prestación de servicios.");
        assert_eq!(json["sources"], json!(["resolucion_2275.pdf"]));
        assert_eq!(*service.questions.lock().await, vec!["¿Qué es RIPS?".to_string()]);
    }

    #[tokio::test]
    async fn empty_question_maps_to_bad_request() {
        let app = create_router(Arc::new(StubAssistant::default()));
        let response = app
            .oneshot(json_request("/ask", json!({ "question": "   " })))
            .await
            .expect("router response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert!(json["error"].as_str().expect("error text").contains("empty"));
    }

    #[tokio::test]
    async fn glosa_route_accepts_multipart_documents() {
        let service = Arc::new(StubAssistant::default());
        let app = create_router(service.clone());

        let body = multipart_body(&[
            ("factura", "factura.pdf", b"%PDF-factura".as_slice()),
            ("historia_clinica", "historia.pdf", b"%PDF-historia".as_slice()),
            (
                "validaciones",
                "validaciones.json",
                br#"{"ResultadosValidacion":[{"Codigo":"RVC033","Clase":"ERROR"}]}"#.as_slice(),
            ),
        ]);
        let response = app
            .oneshot(multipart_request(body))
            .await
            .expect("router response");

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["nivel_riesgo"], "MEDIO");
        assert_eq!(json["source"], "valor_por_defecto");

        let uploads = service.uploads.lock().await;
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].invoice_pdf, b"%PDF-factura");
        let report = uploads[0].validations.as_ref().expect("validations");
        assert_eq!(report.results[0].code, "RVC033");
    }

    #[tokio::test]
    async fn unreadable_document_maps_to_unprocessable_entity() {
        let app = create_router(Arc::new(StubAssistant::default()));
        let body = multipart_body(&[
            ("factura", "factura.pdf", b"corrupt".as_slice()),
            ("historia_clinica", "historia.pdf", b"%PDF-historia".as_slice()),
        ]);
        let response = app
            .oneshot(multipart_request(body))
            .await
            .expect("router response");

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let json = body_json(response).await;
        assert!(json["error"].as_str().expect("error").contains("factura"));
    }

    #[tokio::test]
    async fn missing_document_is_bad_request() {
        let app = create_router(Arc::new(StubAssistant::default()));
        let body = multipart_body(&[("factura", "factura.pdf", b"%PDF".as_slice())]);
        let response = app
            .oneshot(multipart_request(body))
            .await
            .expect("router response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn chat_route_streams_ndjson() {
        let service = Arc::new(StubAssistant::default());
        let app = create_router(service.clone());

        let response = app
            .oneshot(json_request(
                "/chat",
                json!({
                    "message": "Hola",
                    "history": [{ "user_message": "¿Qué es CUPS?", "bot_response": "Códigos de procedimientos." }]
                }),
            ))
            .await
            .expect("router response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"],
            "application/x-ndjson"
        );
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        let lines: Vec<Value> = String::from_utf8(bytes.to_vec())
            .expect("utf8")
            .lines()
            .map(|line| serde_json::from_str(line).expect("json line"))
            .collect();
        assert_eq!(
            lines,
            vec![
                json!({ "content": "Hola, " }),
                json!({ "content": "soy Ripsy." }),
                json!({ "done": true }),
            ]
        );
        assert_eq!(*service.histories.lock().await, vec![1]);
    }

    #[tokio::test]
    async fn chat_stream_error_is_reported_inline() {
        let app = create_router(Arc::new(StubAssistant::default()));
        let response = app
            .oneshot(json_request("/chat", json!({ "message": "falla" })))
            .await
            .expect("router response");
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        let text = String::from_utf8(bytes.to_vec()).expect("utf8");
        let last: Value = serde_json::from_str(text.lines().last().expect("line")).expect("json");
        assert!(last["error"].as_str().expect("error").contains("timeout"));
        assert!(!text.contains("\"done\""));
    }

    #[tokio::test]
    async fn sources_and_reload_routes() {
        let app = create_router(Arc::new(StubAssistant::default()));
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/sources")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router response");
        assert_eq!(body_json(response).await["sources"], json!(["decreto_441.pdf"]));

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/admin/reload")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router response");
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    fn json_request(uri: &str, payload: Value) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))
            .expect("request")
    }

    fn multipart_request(body: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri("/glosa")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .expect("request")
    }

    fn multipart_body(parts: &[(&str, &str, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, filename, bytes) in parts {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[derive(Default)]
    struct StubAssistant {
        questions: Mutex<Vec<String>>,
        uploads: Mutex<Vec<GlosaDocuments>>,
        histories: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl AssistantApi for StubAssistant {
        async fn answer_question(&self, question: String) -> Result<Answer, RetrievalError> {
            if question.trim().is_empty() {
                return Err(RetrievalError::EmptyQuestion);
            }
            self.questions.lock().await.push(question);
            Ok(Answer {
                answer: "RIPS es el registro individual de prestación de servicios.".into(),
                sources: vec!["resolucion_2275.pdf".into()],
            })
        }

        async fn chat_stream(
            &self,
            message: String,
            history: Vec<ChatExchange>,
        ) -> Result<ChatEventStream, RetrievalError> {
            self.histories.lock().await.push(history.len());
            let events = if message == "falla" {
                vec![
                    Ok(ChatEvent {
                        content: "Parcial".into(),
                        done: false,
                    }),
                    Err(GenerationError::ProviderUnavailable("timeout".into())),
                ]
            } else {
                vec![
                    Ok(ChatEvent {
                        content: "Hola, ".into(),
                        done: false,
                    }),
                    Ok(ChatEvent {
                        content: "soy Ripsy.".into(),
                        done: false,
                    }),
                    Ok(ChatEvent {
                        content: String::new(),
                        done: true,
                    }),
                ]
            };
            let stream: ChatEventStream = Box::pin(futures_util::stream::iter(events));
            Ok(stream)
        }

        async fn assess_glosa_risk(
            &self,
            _invoice_text: String,
            _clinical_text: String,
        ) -> RiskAssessment {
            RiskAssessment {
                probability: 20,
                level: RiskLevel::Low,
                risk_factors: vec![],
                recommendations: vec![],
                breakdown: ScoreBreakdown::uniform(80),
                source: AssessmentSource::Heuristic,
            }
        }

        async fn assess_glosa_documents(
            &self,
            documents: GlosaDocuments,
        ) -> Result<RiskAssessment, GlosaError> {
            if documents.invoice_pdf == b"corrupt" {
                return Err(GlosaError::Extraction(ExtractionError::Unreadable {
                    name: "factura".into(),
                    reason: "invalid header".into(),
                }));
            }
            self.uploads.lock().await.push(documents);
            Ok(StaticDefault.assessment())
        }

        async fn reload_settings(&self) -> Result<Arc<PromptSettings>, ObjectStoreError> {
            Err(ObjectStoreError::Http {
                key: "config/system_prompt.txt".into(),
                reason: "connection refused".into(),
            })
        }

        async fn list_sources(&self) -> Result<BTreeSet<String>, RetrievalError> {
            Ok(BTreeSet::from(["decreto_441.pdf".to_string()]))
        }

        fn settings_snapshot(&self) -> Arc<PromptSettings> {
            Arc::new(PromptSettings::builtin())
        }

        fn metrics_snapshot(&self) -> MetricsSnapshot {
            MetricsSnapshot::default()
        }
    }
}
