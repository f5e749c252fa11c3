use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_COLLECTION: &str = "normativas";
const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_SYSTEM_PROMPT_KEY: &str = "config/system_prompt.txt";
const DEFAULT_GLOSSARY_KEY: &str = "config/glosario.txt";

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the Ripsy service.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Base URL of the Qdrant instance that stores regulatory fragments.
    pub qdrant_url: String,
    /// Name of the Qdrant collection holding the fragments.
    pub qdrant_collection_name: String,
    /// Optional API key required to access Qdrant.
    pub qdrant_api_key: Option<String>,
    /// Embedding provider used for fragments and questions.
    pub embedding_provider: ProviderKind,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// Provider used for answers, chat, and the generative risk tier.
    pub generation_provider: ProviderKind,
    /// Model used for answers and the generative risk tier.
    pub generation_model: String,
    /// Model used for the streaming chat path.
    pub chat_model: String,
    /// Output bound for generated answers.
    pub generation_max_tokens: u32,
    /// Sampling temperature for generated answers.
    pub generation_temperature: f32,
    /// Base URL of the local Ollama runtime.
    pub ollama_url: String,
    /// API key for OpenAI-compatible endpoints.
    pub openai_api_key: Option<String>,
    /// Base URL for OpenAI-compatible endpoints.
    pub openai_base_url: String,
    /// Number of fragments retrieved per question.
    pub retrieval_top_k: usize,
    /// Maximum characters per background context turn.
    pub context_chunk_chars: usize,
    /// Characters of each document handed to the generative risk tier.
    pub glosa_excerpt_chars: usize,
    /// Timeout applied to provider and store requests.
    pub request_timeout_secs: u64,
    /// Timeout applied to the streaming chat path.
    pub chat_timeout_secs: u64,
    /// Where prompt and glossary objects are read from.
    pub object_store: ObjectStoreLocation,
    /// Object key of the system prompt.
    pub system_prompt_key: String,
    /// Object key of the glossary.
    pub glossary_key: String,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
}

/// Supported backends for embeddings and generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Local Ollama runtime.
    Ollama,
    /// Hosted OpenAI-compatible API.
    OpenAI,
}

/// Backing location for configuration objects.
#[derive(Clone, Debug, Deserialize)]
pub enum ObjectStoreLocation {
    /// Objects are files below a local directory.
    Local(PathBuf),
    /// Objects are fetched over HTTP from `{endpoint}/{bucket}/{key}`.
    Http {
        /// Endpoint URL of the bucket server.
        endpoint: String,
        /// Bucket holding the objects.
        bucket: String,
    },
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let embedding_provider = parse_provider("EMBEDDING_PROVIDER", &load_env("EMBEDDING_PROVIDER")?)?;
        let generation_provider = match load_env_optional("GENERATION_PROVIDER") {
            Some(value) => parse_provider("GENERATION_PROVIDER", &value)?,
            None => embedding_provider,
        };
        let generation_model = load_env("GENERATION_MODEL")?;
        let chat_model = load_env_optional("CHAT_MODEL").unwrap_or_else(|| generation_model.clone());

        let embedding_dimension: usize = parse_required("EMBEDDING_DIMENSION")?;
        if embedding_dimension == 0 {
            return Err(ConfigError::InvalidValue("EMBEDDING_DIMENSION".into()));
        }
        let retrieval_top_k: usize = parse_optional("RETRIEVAL_TOP_K")?.unwrap_or(5);
        if retrieval_top_k == 0 {
            return Err(ConfigError::InvalidValue("RETRIEVAL_TOP_K".into()));
        }
        let context_chunk_chars: usize = parse_optional("CONTEXT_CHUNK_CHARS")?.unwrap_or(1500);
        if context_chunk_chars == 0 {
            return Err(ConfigError::InvalidValue("CONTEXT_CHUNK_CHARS".into()));
        }

        Ok(Self {
            qdrant_url: load_env("QDRANT_URL")?,
            qdrant_collection_name: load_env_optional("QDRANT_COLLECTION_NAME")
                .unwrap_or_else(|| DEFAULT_COLLECTION.to_string()),
            qdrant_api_key: load_env_optional("QDRANT_API_KEY"),
            embedding_provider,
            embedding_model: load_env("EMBEDDING_MODEL")?,
            embedding_dimension,
            generation_provider,
            generation_model,
            chat_model,
            generation_max_tokens: parse_optional("GENERATION_MAX_TOKENS")?.unwrap_or(800),
            generation_temperature: parse_optional("GENERATION_TEMPERATURE")?.unwrap_or(0.2),
            ollama_url: load_env_optional("OLLAMA_URL")
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            openai_api_key: load_env_optional("OPENAI_API_KEY"),
            openai_base_url: load_env_optional("OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
            retrieval_top_k,
            context_chunk_chars,
            glosa_excerpt_chars: parse_optional("GLOSA_EXCERPT_CHARS")?.unwrap_or(2000),
            request_timeout_secs: parse_optional("REQUEST_TIMEOUT_SECS")?.unwrap_or(60),
            chat_timeout_secs: parse_optional("CHAT_TIMEOUT_SECS")?.unwrap_or(30),
            object_store: load_object_store()?,
            system_prompt_key: load_env_optional("SYSTEM_PROMPT_KEY")
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT_KEY.to_string()),
            glossary_key: load_env_optional("GLOSSARY_KEY")
                .unwrap_or_else(|| DEFAULT_GLOSSARY_KEY.to_string()),
            server_port: parse_optional("SERVER_PORT")?,
        })
    }

    /// Timeout for provider and store requests.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Timeout for the streaming chat path.
    pub fn chat_timeout(&self) -> Duration {
        Duration::from_secs(self.chat_timeout_secs.max(1))
    }
}

fn load_object_store() -> Result<ObjectStoreLocation, ConfigError> {
    if let Some(endpoint) = load_env_optional("OBJECT_STORE_URL") {
        let bucket = load_env("OBJECT_STORE_BUCKET")?;
        return Ok(ObjectStoreLocation::Http { endpoint, bucket });
    }
    let root = load_env_optional("OBJECT_STORE_ROOT").unwrap_or_else(|| "data".to_string());
    Ok(ObjectStoreLocation::Local(PathBuf::from(root)))
}

fn load_env(key: &str) -> Result<String, ConfigError> {
    env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingVariable(key.to_string()))
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_required<T: std::str::FromStr>(key: &str) -> Result<T, ConfigError> {
    load_env(key)?
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(key.to_string()))
}

fn parse_optional<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    load_env_optional(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
}

fn parse_provider(key: &str, value: &str) -> Result<ProviderKind, ConfigError> {
    value
        .parse()
        .map_err(|()| ConfigError::InvalidValue(key.to_string()))
}

impl std::str::FromStr for ProviderKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            _ => Err(()),
        }
    }
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() {
    dotenvy::dotenv().ok();
    let config = Config::from_env().expect("Failed to load config from environment");
    tracing::debug!(
        qdrant_url = %config.qdrant_url,
        collection = %config.qdrant_collection_name,
        server_port = ?config.server_port,
        embedding_provider = ?config.embedding_provider,
        generation_provider = ?config.generation_provider,
        top_k = config.retrieval_top_k,
        "Loaded configuration"
    );
    CONFIG.set(config).expect("Failed to set config");
}
