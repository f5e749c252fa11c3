//! Fragment store abstraction backed by a Qdrant collection.

use crate::{
    processing::{
        mappers::{map_scored_point, rank_results},
        types::RankedResult,
    },
    qdrant::{QdrantError, QdrantService, payload::SOURCE_KEY, scroller::stream_payloads},
};
use async_trait::async_trait;
use futures_util::{StreamExt, pin_mut};
use serde_json::{Value, json};
use std::collections::BTreeSet;
use thiserror::Error;

/// Errors raised while querying the fragment store.
#[derive(Debug, Error)]
pub enum FragmentStoreError {
    /// Qdrant transport or status failure.
    #[error(transparent)]
    Qdrant(#[from] QdrantError),
    /// A stored point lacked the payload needed to rebuild a fragment.
    #[error("malformed fragment point {0}")]
    MalformedPoint(String),
}

/// Nearest-neighbour lookups over persisted regulatory fragments.
#[async_trait]
pub trait FragmentStore: Send + Sync {
    /// Return up to `k` fragments closest to `vector`, best first.
    async fn nearest(
        &self,
        vector: Vec<f32>,
        k: usize,
    ) -> Result<Vec<RankedResult>, FragmentStoreError>;

    /// Distinct source filenames present in the store.
    async fn list_sources(&self) -> Result<BTreeSet<String>, FragmentStoreError>;
}

/// [`FragmentStore`] over a single cosine-distance Qdrant collection.
pub struct QdrantFragmentStore {
    service: QdrantService,
    collection: String,
}

impl QdrantFragmentStore {
    /// Wrap `service`, querying `collection`.
    pub fn new(service: QdrantService, collection: impl Into<String>) -> Self {
        Self {
            service,
            collection: collection.into(),
        }
    }
}

#[async_trait]
impl FragmentStore for QdrantFragmentStore {
    async fn nearest(
        &self,
        vector: Vec<f32>,
        k: usize,
    ) -> Result<Vec<RankedResult>, FragmentStoreError> {
        let points = self
            .service
            .search_points(&self.collection, vector, k)
            .await?;
        tracing::debug!(collection = %self.collection, hits = points.len(), "Nearest fragments fetched");
        let mut results = points
            .into_iter()
            .map(map_scored_point)
            .collect::<Result<Vec<_>, _>>()?;
        rank_results(&mut results);
        Ok(results)
    }

    async fn list_sources(&self) -> Result<BTreeSet<String>, FragmentStoreError> {
        let stream = stream_payloads(&self.service, &self.collection, json!([SOURCE_KEY]));
        pin_mut!(stream);

        let mut sources = BTreeSet::new();
        while let Some(payload) = stream.next().await {
            let payload = payload?;
            if let Some(Value::String(name)) = payload.get(SOURCE_KEY) {
                let trimmed = name.trim();
                if !trimmed.is_empty() {
                    sources.insert(trimmed.to_string());
                }
            }
        }
        Ok(sources)
    }
}
