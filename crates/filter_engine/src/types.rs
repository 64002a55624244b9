use filter_core::VisualState;
use serde::{Deserialize, Serialize};

use crate::page::ElementHandle;

/// One extracted content unit on the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedItem {
    pub title: String,
    /// Element carrying the state attribute and label.
    pub container: ElementHandle,
    /// Every element that receives visual treatment, container first.
    pub group: Vec<ElementHandle>,
    pub image_url: Option<String>,
    /// State attribute found on the container at scan time.
    pub state: Option<VisualState>,
}

/// Item as sent to the background. `index` is the 1-based position in the caller's batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItem {
    pub index: usize,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl BatchItem {
    pub fn new(index: usize, title: impl Into<String>) -> Self {
        Self {
            index,
            title: title.into(),
            image_url: None,
        }
    }

    pub fn with_image(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemDecision {
    pub index: usize,
    pub title: String,
    pub is_allowed: bool,
    pub response_line: String,
}

/// Quota metadata from an HTTP 429 "Daily limit exceeded" reply.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_usage: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_time: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    QuotaExceeded,
    Transport,
    Parse,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassifyError {
    #[error("API URL not configured")]
    NoApiUrl,
    #[error("API key is required when using own API key")]
    MissingApiKey,
    #[error("No preferences configured")]
    NoTopics,
    #[error("No content found on page")]
    NoItems,
    #[error("Daily limit exceeded")]
    DailyLimitExceeded(QuotaDetails),
    #[error("API request failed: {status} - {body}")]
    RequestFailed { status: u16, body: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid API response: {0}")]
    InvalidResponse(String),
}

impl ClassifyError {
    pub fn code(&self) -> &'static str {
        match self {
            ClassifyError::NoApiUrl => "NO_API_URL",
            ClassifyError::MissingApiKey => "MISSING_API_KEY",
            ClassifyError::NoTopics => "NO_TOPICS",
            ClassifyError::NoItems => "NO_ITEMS",
            ClassifyError::DailyLimitExceeded(_) => "DAILY_LIMIT_EXCEEDED",
            ClassifyError::RequestFailed { .. } => "REQUEST_FAILED",
            ClassifyError::Network(_) => "NETWORK_ERROR",
            ClassifyError::InvalidResponse(_) => "INVALID_RESPONSE",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ClassifyError::NoApiUrl
            | ClassifyError::MissingApiKey
            | ClassifyError::NoTopics
            | ClassifyError::NoItems => ErrorKind::Configuration,
            ClassifyError::DailyLimitExceeded(_) => ErrorKind::QuotaExceeded,
            ClassifyError::RequestFailed { .. } | ClassifyError::Network(_) => {
                ErrorKind::Transport
            }
            ClassifyError::InvalidResponse(_) => ErrorKind::Parse,
        }
    }
}

/// Items of one chunk whose request failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFailure {
    pub items: Vec<BatchItem>,
    pub error: ClassifyError,
}

/// Per-item results of a batch, in the caller's original order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BatchOutcome {
    pub decisions: Vec<ItemDecision>,
    pub failures: Vec<ChunkFailure>,
}

impl BatchOutcome {
    pub fn allowed_count(&self) -> usize {
        self.decisions.iter().filter(|d| d.is_allowed).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessagingError {
    /// The background side is gone.
    #[error("background disconnected")]
    Disconnected,
    /// The background answered with a response of the wrong shape.
    #[error("unexpected background response")]
    UnexpectedResponse,
}
