//! Object storage reads for prompt configuration.

use crate::config::{Config, ObjectStoreLocation};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while reading objects.
#[derive(Debug, Error)]
pub enum ObjectStoreError {
    /// Object does not exist.
    #[error("object `{0}` not found")]
    NotFound(String),
    /// Local filesystem failure.
    #[error("failed to read object `{key}`: {source}")]
    Io {
        /// Requested key.
        key: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// HTTP transport or status failure.
    #[error("object request for `{key}` failed: {reason}")]
    Http {
        /// Requested key.
        key: String,
        /// Failure description.
        reason: String,
    },
    /// Object bytes were not valid UTF-8.
    #[error("object `{0}` is not valid UTF-8")]
    InvalidEncoding(String),
}

/// Read-only object storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read the object at `key` as UTF-8 text.
    async fn read_text(&self, key: &str) -> Result<String, ObjectStoreError>;
}

/// Build the object store described by the configuration.
pub fn get_object_store(
    config: &Config,
) -> Result<Box<dyn ObjectStore + Send + Sync>, ObjectStoreError> {
    match &config.object_store {
        ObjectStoreLocation::Local(root) => Ok(Box::new(LocalObjectStore::new(root.clone()))),
        ObjectStoreLocation::Http { endpoint, bucket } => Ok(Box::new(HttpObjectStore::new(
            endpoint,
            bucket,
            config.request_timeout(),
        )?)),
    }
}

/// Objects are files below a root directory.
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    /// Serve objects from `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn read_text(&self, key: &str) -> Result<String, ObjectStoreError> {
        let path = self.root.join(key.trim_start_matches('/'));
        let bytes = tokio::fs::read(&path).await.map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ObjectStoreError::NotFound(key.to_string())
            } else {
                ObjectStoreError::Io {
                    key: key.to_string(),
                    source,
                }
            }
        })?;
        String::from_utf8(bytes).map_err(|_| ObjectStoreError::InvalidEncoding(key.to_string()))
    }
}

/// Objects are fetched with `GET {endpoint}/{bucket}/{key}`.
pub struct HttpObjectStore {
    client: Client,
    endpoint: String,
    bucket: String,
}

impl HttpObjectStore {
    /// Build a store for `bucket` served at `endpoint`.
    pub fn new(endpoint: &str, bucket: &str, timeout: Duration) -> Result<Self, ObjectStoreError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ObjectStoreError::Http {
                key: String::new(),
                reason: err.to_string(),
            })?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            bucket: bucket.trim_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn read_text(&self, key: &str) -> Result<String, ObjectStoreError> {
        let url = format!(
            "{}/{}/{}",
            self.endpoint,
            self.bucket,
            key.trim_start_matches('/')
        );
        let http_error = |reason: String| ObjectStoreError::Http {
            key: key.to_string(),
            reason,
        };
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| http_error(err.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(ObjectStoreError::NotFound(key.to_string())),
            status if status.is_success() => {
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|err| http_error(err.to_string()))?;
                String::from_utf8(bytes.to_vec())
                    .map_err(|_| ObjectStoreError::InvalidEncoding(key.to_string()))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(http_error(format!("status {status}: {body}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::GET, MockServer};

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("ripsy-{name}-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(dir.join("config")).expect("scratch dir");
        dir
    }

    #[tokio::test]
    async fn local_store_reads_nested_keys() {
        let root = scratch_dir("local");
        std::fs::write(root.join("config/system_prompt.txt"), "Eres Ripsy.").expect("write");

        let store = LocalObjectStore::new(&root);
        let text = store
            .read_text("config/system_prompt.txt")
            .await
            .expect("read");
        assert_eq!(text, "Eres Ripsy.");

        let missing = store.read_text("config/nada.txt").await.expect_err("missing");
        assert!(matches!(missing, ObjectStoreError::NotFound(_)));
        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn http_store_fetches_bucket_objects() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/ripsy/config/glosario.txt");
                then.status(200).body("RIPS: registro individual");
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/ripsy/config/otro.txt");
                then.status(404);
            })
            .await;

        let store = HttpObjectStore::new(&server.base_url(), "ripsy", Duration::from_secs(5))
            .expect("store");
        let text = store.read_text("config/glosario.txt").await.expect("read");
        mock.assert();
        assert_eq!(text, "RIPS: registro individual");

        let missing = store.read_text("config/otro.txt").await.expect_err("404");
        assert!(matches!(missing, ObjectStoreError::NotFound(key) if key == "config/otro.txt"));
    }
}
