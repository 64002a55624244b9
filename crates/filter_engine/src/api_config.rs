use std::sync::Arc;

use async_trait::async_trait;
use filter_logging::filter_warn;

use crate::storage::{KeyValueStore, StoredSettings};
use crate::types::ClassifyError;

pub const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const PROXY_URL: &str = "https://great-filter-vps.vercel.app/api/filter";
pub const DEFAULT_MODEL: &str = "google/gemini-2.5-flash-lite-preview-09-2025";

/// Where requests go and how the client identifies itself in own-key mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub direct_url: String,
    pub proxy_url: String,
    pub default_model: String,
    pub referer: String,
    pub title: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            direct_url: OPENROUTER_API_URL.into(),
            proxy_url: PROXY_URL.into(),
            default_model: DEFAULT_MODEL.into(),
            referer: "https://great-filter.extension".into(),
            title: "Great Filter Extension".into(),
        }
    }
}

/// Resolved request configuration for one upstream call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    pub uses_own_key: bool,
    pub api_key: String,
    pub model: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub send_images: bool,
}

impl ApiConfig {
    pub fn from_settings(settings: &StoredSettings, endpoints: &Endpoints) -> Self {
        let model = settings
            .selected_model
            .clone()
            .filter(|model| !model.trim().is_empty())
            .unwrap_or_else(|| endpoints.default_model.clone());
        if !settings.use_own_api_key {
            return Self {
                model,
                send_images: settings.send_images,
                ..Self::proxy(endpoints)
            };
        }

        let headers = vec![
            ("Content-Type".to_owned(), "application/json".to_owned()),
            (
                "Authorization".to_owned(),
                format!("Bearer {}", settings.api_key),
            ),
            ("HTTP-Referer".to_owned(), endpoints.referer.clone()),
            ("X-Title".to_owned(), endpoints.title.clone()),
        ];
        Self {
            uses_own_key: true,
            api_key: settings.api_key.clone(),
            model,
            url: endpoints.direct_url.clone(),
            headers,
            send_images: settings.send_images,
        }
    }

    /// Free-tier configuration through the metering proxy.
    pub fn proxy(endpoints: &Endpoints) -> Self {
        Self {
            uses_own_key: false,
            api_key: String::new(),
            model: endpoints.default_model.clone(),
            url: endpoints.proxy_url.clone(),
            headers: vec![("Content-Type".to_owned(), "application/json".to_owned())],
            send_images: false,
        }
    }

    pub fn validate(&self) -> Result<(), ClassifyError> {
        if self.url.trim().is_empty() {
            return Err(ClassifyError::NoApiUrl);
        }
        if self.uses_own_key && self.api_key.trim().is_empty() {
            return Err(ClassifyError::MissingApiKey);
        }
        Ok(())
    }
}

#[async_trait]
pub trait ConfigResolver: Send + Sync {
    async fn resolve(&self) -> ApiConfig;
}

/// Resolves configuration from the persisted settings on every call.
pub struct StoreConfigResolver {
    store: Arc<dyn KeyValueStore>,
    endpoints: Endpoints,
}

impl StoreConfigResolver {
    pub fn new(store: Arc<dyn KeyValueStore>, endpoints: Endpoints) -> Self {
        Self { store, endpoints }
    }
}

#[async_trait]
impl ConfigResolver for StoreConfigResolver {
    async fn resolve(&self) -> ApiConfig {
        match StoredSettings::load(self.store.as_ref()).await {
            Ok(settings) => ApiConfig::from_settings(&settings, &self.endpoints),
            Err(err) => {
                filter_warn!("Falling back to proxy configuration: {err}");
                ApiConfig::proxy(&self.endpoints)
            }
        }
    }
}
