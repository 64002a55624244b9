//! Page ⇄ background message shapes.

use filter_core::{BatchFailureKind, QuotaNotice};
use serde::{Deserialize, Serialize};

use crate::types::{BatchItem, BatchOutcome, ClassifyError, ItemDecision, QuotaDetails};

/// Messages a page sends to the background.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum BackgroundRequest {
    CheckItemTitlesBatch {
        items: Vec<BatchItem>,
        topics: Vec<String>,
    },
    GetRecommendedFilter {
        items: Vec<TitleOnly>,
    },
    ContentProcessing,
    FilteringStarted,
    FilteringStopped,
    FilteringComplete,
}

impl BackgroundRequest {
    /// Lifecycle notifications carry no reply payload.
    pub fn is_notification(&self) -> bool {
        matches!(
            self,
            BackgroundRequest::ContentProcessing
                | BackgroundRequest::FilteringStarted
                | BackgroundRequest::FilteringStopped
                | BackgroundRequest::FilteringComplete
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum BackgroundResponse {
    Batch(BatchReply),
    Recommendation(RecommendationReply),
    /// Lifecycle notifications are acknowledged without content.
    Ack,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleOnly {
    pub title: String,
}

/// Structured error carried back to the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    #[serde(rename = "error")]
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota: Option<QuotaDetails>,
}

impl ErrorPayload {
    pub fn from_error(error: &ClassifyError) -> Self {
        let quota = match error {
            ClassifyError::DailyLimitExceeded(details) => Some(details.clone()),
            _ => None,
        };
        let message = quota
            .as_ref()
            .and_then(|details| details.message.clone())
            .unwrap_or_else(|| error.to_string());
        Self {
            code: error.code().to_owned(),
            message,
            quota,
        }
    }

    pub fn is_quota(&self) -> bool {
        self.code == "DAILY_LIMIT_EXCEEDED"
    }

    /// How the page's session should react to this error.
    pub fn failure_kind(&self) -> BatchFailureKind {
        if self.is_quota() {
            return BatchFailureKind::QuotaExceeded(quota_notice(
                self.quota.as_ref().unwrap_or(&QuotaDetails::default()),
            ));
        }
        match self.code.as_str() {
            "NO_API_URL" | "MISSING_API_KEY" | "NO_TOPICS" | "NO_ITEMS" => {
                BatchFailureKind::Configuration(self.message.clone())
            }
            _ => BatchFailureKind::Transport(self.message.clone()),
        }
    }
}

pub(crate) fn quota_notice(details: &QuotaDetails) -> QuotaNotice {
    QuotaNotice {
        message: details.message.clone(),
        daily_limit: details.daily_limit,
        current_usage: details.current_usage,
        remaining: details.remaining,
        reset_time: details.reset_time.clone(),
    }
}

/// Items of one failed chunk, by caller index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedChunk {
    pub indices: Vec<usize>,
    pub titles: Vec<String>,
    pub error: ErrorPayload,
}

/// Reply to `checkItemTitlesBatch`.
///
/// `error` is set when nothing could be decided: a configuration problem or
/// every chunk failing.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BatchReply {
    #[serde(default)]
    pub results: Vec<ItemDecision>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<FailedChunk>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

impl BatchReply {
    pub fn from_error(error: &ClassifyError) -> Self {
        Self {
            error: Some(ErrorPayload::from_error(error)),
            ..Self::default()
        }
    }

    pub fn from_outcome(outcome: BatchOutcome) -> Self {
        let failures: Vec<FailedChunk> = outcome
            .failures
            .into_iter()
            .map(|failure| FailedChunk {
                indices: failure.items.iter().map(|item| item.index).collect(),
                titles: failure.items.into_iter().map(|item| item.title).collect(),
                error: ErrorPayload::from_error(&failure.error),
            })
            .collect();
        let error = if outcome.decisions.is_empty() {
            failures.first().map(|failure| failure.error.clone())
        } else {
            None
        };
        Self {
            results: outcome.decisions,
            failures,
            error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RecommendationReply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RecommendationReply {
    pub fn suggestion(text: impl Into<String>) -> Self {
        Self {
            recommendation: Some(text.into()),
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            recommendation: None,
            error: Some(message.into()),
        }
    }
}

/// Commands the popup sends to a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum PageRequest {
    StartFiltering { topics: Vec<String> },
    StopFiltering,
    UpdatePreferences { topics: Vec<String> },
    GetFilteringState,
    GetRecommendedFilter,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum PageResponse {
    Ack {
        success: bool,
    },
    FilteringState {
        #[serde(rename = "isActive")]
        is_active: bool,
        topics: Option<Vec<String>>,
    },
    Recommendation(RecommendationReply),
}
