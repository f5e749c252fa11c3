//! Versioned prompt settings: the system prompt and glossary used to ground chat turns.
//!
//! The current [`PromptSettings`] lives behind a single `RwLock<Arc<_>>`. Readers clone the
//! `Arc` once per request and keep a consistent view for its whole lifetime; a reload builds a
//! complete replacement before swapping it in, so nobody observes a half-updated snapshot.

use crate::storage::{ObjectStore, ObjectStoreError};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::{
    Arc, RwLock,
    atomic::{AtomicU64, Ordering},
};
use time::OffsetDateTime;

/// Prompt used when no configured prompt could be read at startup.
pub const DEFAULT_SYSTEM_PROMPT: &str = "Eres Ripsy, un asistente experto en facturación en \
salud en Colombia. Respondes en español, con precisión, sobre RIPS, glosas, CUPS, CIE y la \
normativa vigente. Si no conoces la respuesta, lo indicas.";

/// Immutable view of the prompt configuration.
#[derive(Debug, Clone, Serialize)]
pub struct PromptSettings {
    /// Monotonic version; 0 is the built-in default.
    pub version: u64,
    /// System prompt sent as the first turn.
    pub system_prompt: String,
    /// Glossary text, split into background turns at request time.
    pub glossary: String,
    /// SHA-256 of prompt and glossary.
    pub digest: String,
    /// RFC 3339 load timestamp.
    pub loaded_at: String,
}

impl PromptSettings {
    fn build(version: u64, system_prompt: String, glossary: String) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(system_prompt.as_bytes());
        hasher.update([0u8]);
        hasher.update(glossary.as_bytes());
        let loaded_at = OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_default();
        Self {
            version,
            system_prompt,
            glossary,
            digest: hex::encode(hasher.finalize()),
            loaded_at,
        }
    }

    /// Built-in fallback with no glossary.
    pub fn builtin() -> Self {
        Self::build(0, DEFAULT_SYSTEM_PROMPT.to_string(), String::new())
    }
}

/// Holder for the current [`PromptSettings`] snapshot.
pub struct SettingsStore {
    current: RwLock<Arc<PromptSettings>>,
    next_version: AtomicU64,
    prompt_key: String,
    glossary_key: String,
}

impl SettingsStore {
    /// Start from `initial`, reloading later from the given object keys.
    pub fn new(
        initial: PromptSettings,
        prompt_key: impl Into<String>,
        glossary_key: impl Into<String>,
    ) -> Self {
        let next_version = initial.version + 1;
        Self {
            current: RwLock::new(Arc::new(initial)),
            next_version: AtomicU64::new(next_version),
            prompt_key: prompt_key.into(),
            glossary_key: glossary_key.into(),
        }
    }

    /// Load the first snapshot from `store`, falling back to the built-in prompt on failure.
    pub async fn bootstrap(
        store: &dyn ObjectStore,
        prompt_key: impl Into<String>,
        glossary_key: impl Into<String>,
    ) -> Self {
        let settings = Self::new(PromptSettings::builtin(), prompt_key, glossary_key);
        match settings.reload(store).await {
            Ok(snapshot) => {
                tracing::info!(version = snapshot.version, digest = %snapshot.digest, "Prompt settings loaded");
            }
            Err(error) => {
                tracing::warn!(error = %error, "Using built-in prompt settings");
            }
        }
        settings
    }

    /// Current snapshot.
    pub fn current(&self) -> Arc<PromptSettings> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Re-read prompt and glossary and swap them in; on failure the previous snapshot stays.
    pub async fn reload(
        &self,
        store: &dyn ObjectStore,
    ) -> Result<Arc<PromptSettings>, ObjectStoreError> {
        let system_prompt = store.read_text(&self.prompt_key).await?;
        let glossary = match store.read_text(&self.glossary_key).await {
            Ok(text) => text,
            Err(ObjectStoreError::NotFound(key)) => {
                tracing::warn!(key = %key, "Glossary not found; continuing without it");
                String::new()
            }
            Err(error) => return Err(error),
        };

        let version = self.next_version.fetch_add(1, Ordering::SeqCst);
        let snapshot = Arc::new(PromptSettings::build(
            version,
            system_prompt.trim().to_string(),
            glossary,
        ));
        {
            let mut guard = match self.current.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if guard.version < snapshot.version {
                *guard = Arc::clone(&snapshot);
            }
        }
        tracing::info!(
            version = snapshot.version,
            digest = %snapshot.digest,
            glossary_chars = snapshot.glossary.chars().count(),
            "Prompt settings swapped"
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct MemoryStore {
        objects: Mutex<HashMap<String, String>>,
    }

    impl MemoryStore {
        async fn put(&self, key: &str, value: &str) {
            self.objects
                .lock()
                .await
                .insert(key.to_string(), value.to_string());
        }

        async fn remove(&self, key: &str) {
            self.objects.lock().await.remove(key);
        }
    }

    #[async_trait]
    impl ObjectStore for MemoryStore {
        async fn read_text(&self, key: &str) -> Result<String, ObjectStoreError> {
            self.objects
                .lock()
                .await
                .get(key)
                .cloned()
                .ok_or_else(|| ObjectStoreError::NotFound(key.to_string()))
        }
    }

    #[tokio::test]
    async fn bootstrap_falls_back_to_builtin() {
        let store = MemoryStore::default();
        let settings = SettingsStore::bootstrap(&store, "prompt", "glossary").await;
        let snapshot = settings.current();
        assert_eq!(snapshot.version, 0);
        assert_eq!(snapshot.system_prompt, DEFAULT_SYSTEM_PROMPT);
    }

    #[tokio::test]
    async fn reload_swaps_snapshot_and_bumps_version() {
        let store = MemoryStore::default();
        store.put("prompt", "Prompt v1").await;
        store.put("glossary", "RIPS: registro").await;
        let settings = SettingsStore::bootstrap(&store, "prompt", "glossary").await;
        let first = settings.current();
        assert_eq!(first.version, 1);
        assert_eq!(first.glossary, "RIPS: registro");

        store.put("prompt", "Prompt v2").await;
        let second = settings.reload(&store).await.expect("reload");
        assert_eq!(second.version, 2);
        assert_ne!(first.digest, second.digest);
        assert_eq!(settings.current().system_prompt, "Prompt v2");
        // readers holding the old Arc keep their view
        assert_eq!(first.system_prompt, "Prompt v1");
    }

    #[tokio::test]
    async fn failed_reload_keeps_previous_snapshot() {
        let store = MemoryStore::default();
        store.put("prompt", "Prompt v1").await;
        let settings = SettingsStore::bootstrap(&store, "prompt", "glossary").await;

        store.remove("prompt").await;
        let err = settings.reload(&store).await.expect_err("missing prompt");
        assert!(matches!(err, ObjectStoreError::NotFound(_)));
        assert_eq!(settings.current().system_prompt, "Prompt v1");
        assert_eq!(settings.current().version, 1);
    }
}
