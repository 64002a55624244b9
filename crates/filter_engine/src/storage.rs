use std::sync::Mutex;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

/// Storage keys shared by the page and the background.
pub mod keys {
    pub const FILTERING_ENABLED: &str = "filteringEnabled";
    pub const ALLOWED_TOPICS: &str = "allowedTopics";
    pub const USE_OWN_API_KEY: &str = "useOwnApiKey";
    pub const API_KEY: &str = "apiKey";
    pub const SELECTED_MODEL: &str = "selectedModel";
    pub const SEND_IMAGES: &str = "sendImages";
    pub const GLOBAL_API_REQUEST_COUNT: &str = "globalApiRequestCount";

    pub const ALL: [&str; 7] = [
        FILTERING_ENABLED,
        ALLOWED_TOPICS,
        USE_OWN_API_KEY,
        API_KEY,
        SELECTED_MODEL,
        SEND_IMAGES,
        GLOBAL_API_REQUEST_COUNT,
    ];
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage backend failed: {0}")]
    Backend(String),
    #[error("stored settings are malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Async key-value store with the semantics of the extension storage area.
///
/// `get` returns only the keys that are present.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, keys: &[&str]) -> Result<Map<String, Value>, StorageError>;
    async fn set(&self, values: Map<String, Value>) -> Result<(), StorageError>;
    async fn clear(&self) -> Result<(), StorageError>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<Map<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values(values: Map<String, Value>) -> Self {
        Self {
            values: Mutex::new(values),
        }
    }

    pub fn snapshot(&self) -> Result<Map<String, Value>, StorageError> {
        self.lock().map(|values| values.clone())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Map<String, Value>>, StorageError> {
        self.values
            .lock()
            .map_err(|_| StorageError::Backend("memory store lock poisoned".into()))
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, keys: &[&str]) -> Result<Map<String, Value>, StorageError> {
        let values = self.lock()?;
        Ok(keys
            .iter()
            .filter_map(|key| values.get(*key).map(|value| ((*key).to_owned(), value.clone())))
            .collect())
    }

    async fn set(&self, values: Map<String, Value>) -> Result<(), StorageError> {
        self.lock()?.extend(values);
        Ok(())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.lock()?.clear();
        Ok(())
    }
}

/// Typed view of every persisted setting. Missing keys take their defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoredSettings {
    pub filtering_enabled: bool,
    pub allowed_topics: Vec<String>,
    pub use_own_api_key: bool,
    pub api_key: String,
    pub selected_model: Option<String>,
    pub send_images: bool,
    pub global_api_request_count: u64,
}

impl StoredSettings {
    pub async fn load(store: &dyn KeyValueStore) -> Result<Self, StorageError> {
        let values = store.get(&keys::ALL).await?;
        Ok(serde_json::from_value(Value::Object(values))?)
    }
}
