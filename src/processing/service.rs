//! Assistant service coordinating retrieval, chat, and glosa scoring.

use crate::{
    config::Config,
    embedding::{EmbeddingClient, EmbeddingClientError, get_embedding_client},
    extraction::{PdfTextExtractor, TextExtractor},
    generation::{
        ChatEventStream, ChatMessage, GenerationClient, GenerationRequest, get_chat_client,
        get_generation_client,
    },
    glosa::{
        GenerativeRiskModel, GlosaCase, GlosaError, HeuristicRiskModel, RiskAssessment,
        RiskDispatcher, RiskTier,
    },
    metrics::{AssistantMetrics, MetricsSnapshot},
    processing::{
        chunking::chunk,
        context::{assemble_context, build_answer_prompt, distinct_sources},
        types::{Answer, ChatExchange, GlosaDocuments, RetrievalError, ServiceInitError},
    },
    qdrant::QdrantService,
    settings::{PromptSettings, SettingsStore},
    storage::{ObjectStore, ObjectStoreError, get_object_store},
    store::{FragmentStore, QdrantFragmentStore},
};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Prior exchanges replayed into a chat request.
pub const CHAT_HISTORY_EXCHANGES: usize = 5;

/// Tunables for the retrieval and chat pipelines.
#[derive(Debug, Clone)]
pub struct AssistantOptions {
    /// Fragments retrieved per question.
    pub top_k: usize,
    /// Expected embedding dimension.
    pub embedding_dimension: usize,
    /// Model used for grounded answers.
    pub generation_model: String,
    /// Model used for streaming chat.
    pub chat_model: String,
    /// Output bound for answers and chat.
    pub max_tokens: u32,
    /// Sampling temperature for answers and chat.
    pub temperature: f32,
    /// Maximum characters per glossary turn.
    pub context_chunk_chars: usize,
}

impl AssistantOptions {
    /// Derive options from configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            top_k: config.retrieval_top_k,
            embedding_dimension: config.embedding_dimension,
            generation_model: config.generation_model.clone(),
            chat_model: config.chat_model.clone(),
            max_tokens: config.generation_max_tokens,
            temperature: config.generation_temperature,
            context_chunk_chars: config.context_chunk_chars,
        }
    }
}

/// Collaborators required to assemble an [`AssistantService`].
pub struct AssistantParts {
    /// Embeds questions.
    pub embedding: Box<dyn EmbeddingClient + Send + Sync>,
    /// Ranked fragment lookups.
    pub store: Box<dyn FragmentStore>,
    /// Grounded answers.
    pub generator: Arc<dyn GenerationClient + Send + Sync>,
    /// Streaming chat.
    pub chat: Box<dyn GenerationClient + Send + Sync>,
    /// PDF text extraction.
    pub extractor: Box<dyn TextExtractor>,
    /// Risk scoring chain.
    pub dispatcher: RiskDispatcher,
    /// Current prompt settings.
    pub settings: SettingsStore,
    /// Source of prompt settings for reloads.
    pub object_store: Box<dyn ObjectStore + Send + Sync>,
    /// Pipeline tunables.
    pub options: AssistantOptions,
}

/// Owns the long-lived clients shared by every request.
///
/// Construct once near process start and share it through an `Arc`.
pub struct AssistantService {
    embedding: Box<dyn EmbeddingClient + Send + Sync>,
    store: Box<dyn FragmentStore>,
    generator: Arc<dyn GenerationClient + Send + Sync>,
    chat: Box<dyn GenerationClient + Send + Sync>,
    extractor: Box<dyn TextExtractor>,
    dispatcher: RiskDispatcher,
    settings: SettingsStore,
    object_store: Box<dyn ObjectStore + Send + Sync>,
    options: AssistantOptions,
    metrics: Arc<AssistantMetrics>,
}

/// Abstraction over the assistant used by the HTTP surface.
#[async_trait]
pub trait AssistantApi: Send + Sync {
    /// Answer a regulatory question grounded in retrieved fragments.
    async fn answer_question(&self, question: String) -> Result<Answer, RetrievalError>;

    /// Stream a chat reply grounded in the system prompt and glossary.
    async fn chat_stream(
        &self,
        message: String,
        history: Vec<ChatExchange>,
    ) -> Result<ChatEventStream, RetrievalError>;

    /// Score already-extracted invoice and clinical record text.
    async fn assess_glosa_risk(&self, invoice_text: String, clinical_text: String)
    -> RiskAssessment;

    /// Extract both PDFs and score them. Extraction failures are never masked.
    async fn assess_glosa_documents(
        &self,
        documents: GlosaDocuments,
    ) -> Result<RiskAssessment, GlosaError>;

    /// Re-read prompt settings and swap them in.
    async fn reload_settings(&self) -> Result<Arc<PromptSettings>, ObjectStoreError>;

    /// Distinct source filenames in the fragment store.
    async fn list_sources(&self) -> Result<BTreeSet<String>, RetrievalError>;

    /// Current prompt settings.
    fn settings_snapshot(&self) -> Arc<PromptSettings>;

    /// Retrieve the current metrics snapshot for diagnostics.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
}

impl AssistantService {
    /// Build the service from configuration, preparing the fragment collection.
    pub async fn new(config: &Config) -> Result<Self, ServiceInitError> {
        tracing::info!("Initializing embedding client");
        let embedding = get_embedding_client(config)?;
        let generator: Arc<dyn GenerationClient + Send + Sync> =
            Arc::from(get_generation_client(config)?);
        let chat = get_chat_client(config)?;

        let qdrant = QdrantService::new(
            &config.qdrant_url,
            config.qdrant_api_key.clone(),
            config.request_timeout(),
        )?;
        tracing::debug!(
            collection = %config.qdrant_collection_name,
            vector_size = config.embedding_dimension,
            "Ensuring fragment collection"
        );
        qdrant
            .ensure_collection(
                &config.qdrant_collection_name,
                config.embedding_dimension as u64,
            )
            .await?;
        let store = QdrantFragmentStore::new(qdrant, config.qdrant_collection_name.clone());

        let object_store = get_object_store(config)?;
        let settings = SettingsStore::bootstrap(
            object_store.as_ref(),
            config.system_prompt_key.clone(),
            config.glossary_key.clone(),
        )
        .await;

        let tiers: Vec<Box<dyn RiskTier>> = vec![
            Box::new(HeuristicRiskModel::new()),
            Box::new(GenerativeRiskModel::new(
                Arc::clone(&generator),
                config.generation_model.clone(),
                config.glosa_excerpt_chars,
                config.generation_max_tokens,
                config.generation_temperature,
            )),
        ];

        Ok(Self::from_parts(AssistantParts {
            embedding,
            store: Box::new(store),
            generator,
            chat,
            extractor: Box::new(PdfTextExtractor::new()),
            dispatcher: RiskDispatcher::new(tiers),
            settings,
            object_store,
            options: AssistantOptions::from_config(config),
        }))
    }

    /// Assemble the service from explicit collaborators.
    pub fn from_parts(parts: AssistantParts) -> Self {
        let AssistantParts {
            embedding,
            store,
            generator,
            chat,
            extractor,
            dispatcher,
            settings,
            object_store,
            options,
        } = parts;
        tracing::debug!(tiers = ?dispatcher.tier_names(), top_k = options.top_k, "Assistant ready");
        Self {
            embedding,
            store,
            generator,
            chat,
            extractor,
            dispatcher,
            settings,
            object_store,
            options,
            metrics: Arc::new(AssistantMetrics::new()),
        }
    }

    /// Answer a question: embed, rank, assemble context, and generate.
    pub async fn answer_question(&self, question: String) -> Result<Answer, RetrievalError> {
        let result = self.answer_inner(question).await;
        self.metrics.record_question(result.is_ok());
        if let Err(error) = &result {
            tracing::error!(error = %error, "Question could not be answered");
        }
        result
    }

    async fn answer_inner(&self, question: String) -> Result<Answer, RetrievalError> {
        let question = question.trim().to_string();
        if question.is_empty() {
            return Err(RetrievalError::EmptyQuestion);
        }

        let vector = self.embed_query(&question).await?;
        let results = self.store.nearest(vector, self.options.top_k).await?;
        tracing::info!(
            fragments = results.len(),
            best_score = results.first().map(|r| r.score),
            "Fragments ranked"
        );

        let context = assemble_context(&results);
        let sources = distinct_sources(&results);
        let settings = self.settings.current();
        let request = GenerationRequest {
            model: self.options.generation_model.clone(),
            messages: vec![
                ChatMessage::system(settings.system_prompt.clone()),
                ChatMessage::user(build_answer_prompt(&context, &question)),
            ],
            max_tokens: Some(self.options.max_tokens),
            temperature: self.options.temperature,
        };
        let answer = self.generator.generate(request).await?;
        tracing::info!(sources = sources.len(), chars = answer.len(), "Answer generated");

        Ok(Answer { answer, sources })
    }

    async fn embed_query(&self, question: &str) -> Result<Vec<f32>, RetrievalError> {
        let mut vectors = self
            .embedding
            .generate_embeddings(vec![question.to_string()])
            .await?;
        let vector = vectors.pop().ok_or_else(|| {
            EmbeddingClientError::InvalidResponse("provider returned no embedding".into())
        })?;

        let expected = self.options.embedding_dimension;
        let actual = vector.len();
        if actual != expected {
            return Err(EmbeddingClientError::InvalidResponse(format!(
                "expected a {expected}-dimensional embedding, got {actual}"
            ))
            .into());
        }
        Ok(vector)
    }

    /// Build the chat turns: system prompt, glossary turns, recent history, then the message.
    pub fn build_chat_messages(
        &self,
        settings: &PromptSettings,
        message: &str,
        history: &[ChatExchange],
    ) -> Result<Vec<ChatMessage>, RetrievalError> {
        let mut messages = vec![ChatMessage::system(settings.system_prompt.clone())];
        for part in chunk(&settings.glossary, self.options.context_chunk_chars)? {
            messages.push(ChatMessage::system(format!("Glosario de referencia:\n{part}")));
        }

        let start = history.len().saturating_sub(CHAT_HISTORY_EXCHANGES);
        for exchange in &history[start..] {
            if let Some(text) = exchange.user_message.as_deref().map(str::trim)
                && !text.is_empty()
            {
                messages.push(ChatMessage::user(text));
            }
            if let Some(text) = exchange.bot_response.as_deref().map(str::trim)
                && !text.is_empty()
            {
                messages.push(ChatMessage::assistant(text));
            }
        }

        messages.push(ChatMessage::user(message));
        Ok(messages)
    }

    /// Start a streaming chat reply.
    pub async fn chat_stream(
        &self,
        message: String,
        history: Vec<ChatExchange>,
    ) -> Result<ChatEventStream, RetrievalError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(RetrievalError::EmptyQuestion);
        }

        let settings = self.settings.current();
        let messages = self.build_chat_messages(&settings, message, &history)?;
        tracing::info!(
            turns = messages.len(),
            settings_version = settings.version,
            "Starting chat stream"
        );
        let stream = self
            .chat
            .generate_stream(GenerationRequest {
                model: self.options.chat_model.clone(),
                messages,
                max_tokens: Some(self.options.max_tokens),
                temperature: self.options.temperature,
            })
            .await?;
        self.metrics.record_chat_session();
        Ok(stream)
    }

    /// Score extracted text through the tier chain.
    pub async fn assess_glosa_risk(
        &self,
        invoice_text: String,
        clinical_text: String,
    ) -> RiskAssessment {
        self.assess_case(GlosaCase {
            invoice_text,
            clinical_text,
            validations: None,
        })
        .await
    }

    /// Extract both documents, then score them.
    pub async fn assess_glosa_documents(
        &self,
        documents: GlosaDocuments,
    ) -> Result<RiskAssessment, GlosaError> {
        let GlosaDocuments {
            invoice_pdf,
            clinical_pdf,
            validations,
        } = documents;

        let extracted = tokio::try_join!(
            self.extractor.extract("factura", invoice_pdf),
            self.extractor.extract("historia_clinica", clinical_pdf),
        );
        let (invoice_text, clinical_text) = match extracted {
            Ok(texts) => texts,
            Err(error) => {
                self.metrics.record_extraction_failure();
                tracing::error!(error = %error, "Document extraction failed");
                return Err(error.into());
            }
        };

        Ok(self
            .assess_case(GlosaCase {
                invoice_text,
                clinical_text,
                validations,
            })
            .await)
    }

    async fn assess_case(&self, case: GlosaCase) -> RiskAssessment {
        let assessment = self.dispatcher.assess(&case).await;
        self.metrics.record_assessment(assessment.source);
        assessment
    }

    /// Re-read prompt settings from the object store.
    pub async fn reload_settings(&self) -> Result<Arc<PromptSettings>, ObjectStoreError> {
        match self.settings.reload(self.object_store.as_ref()).await {
            Ok(snapshot) => {
                self.metrics.record_reload();
                Ok(snapshot)
            }
            Err(error) => {
                tracing::error!(error = %error, "Settings reload failed; keeping previous snapshot");
                Err(error)
            }
        }
    }

    /// Distinct source filenames in the fragment store.
    pub async fn list_sources(&self) -> Result<BTreeSet<String>, RetrievalError> {
        Ok(self.store.list_sources().await?)
    }

    /// Current prompt settings.
    pub fn settings_snapshot(&self) -> Arc<PromptSettings> {
        self.settings.current()
    }

    /// Return the current metrics snapshot.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

#[async_trait]
impl AssistantApi for AssistantService {
    async fn answer_question(&self, question: String) -> Result<Answer, RetrievalError> {
        AssistantService::answer_question(self, question).await
    }

    async fn chat_stream(
        &self,
        message: String,
        history: Vec<ChatExchange>,
    ) -> Result<ChatEventStream, RetrievalError> {
        AssistantService::chat_stream(self, message, history).await
    }

    async fn assess_glosa_risk(
        &self,
        invoice_text: String,
        clinical_text: String,
    ) -> RiskAssessment {
        AssistantService::assess_glosa_risk(self, invoice_text, clinical_text).await
    }

    async fn assess_glosa_documents(
        &self,
        documents: GlosaDocuments,
    ) -> Result<RiskAssessment, GlosaError> {
        AssistantService::assess_glosa_documents(self, documents).await
    }

    async fn reload_settings(&self) -> Result<Arc<PromptSettings>, ObjectStoreError> {
        AssistantService::reload_settings(self).await
    }

    async fn list_sources(&self) -> Result<BTreeSet<String>, RetrievalError> {
        AssistantService::list_sources(self).await
    }

    fn settings_snapshot(&self) -> Arc<PromptSettings> {
        AssistantService::settings_snapshot(self)
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        AssistantService::metrics_snapshot(self)
    }
}
