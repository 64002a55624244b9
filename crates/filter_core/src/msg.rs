use crate::{Generation, VisualState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Msg {
    /// Explicit start command from the popup.
    StartFiltering { topics: Vec<String> },
    /// Replace the topic set and re-filter the page from scratch.
    UpdatePreferences { topics: Vec<String> },
    /// Explicit stop command from the popup.
    StopFiltering,
    /// Persisted settings read once the page finished loading.
    StartupSettingsLoaded {
        filtering_enabled: bool,
        topics: Vec<String>,
    },
    /// Polling timer fired.
    PollTick,
    /// Result of a page scan: every extractable item, processed or not.
    Scanned { items: Vec<ScannedItem> },
    /// A dispatched batch settled. Chunks may have failed independently.
    BatchFinished {
        generation: Generation,
        decisions: Vec<Decision>,
        failures: Vec<BatchFailure>,
    },
    /// The page is going away.
    Shutdown,
    /// Fallback for placeholder wiring.
    NoOp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedItem {
    pub title: String,
    /// State attribute currently present on the container, if any.
    pub marker: Option<VisualState>,
}

impl ScannedItem {
    pub fn new(title: impl Into<String>, marker: Option<VisualState>) -> Self {
        Self {
            title: title.into(),
            marker,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub title: String,
    pub allowed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    pub titles: Vec<String>,
    pub kind: BatchFailureKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchFailureKind {
    /// Missing URL, key or topics. Surfaced, not retried.
    Configuration(String),
    /// Non-2xx or network failure. Items stay waiting.
    Transport(String),
    /// Upstream daily quota hit. Force-stops the session.
    QuotaExceeded(QuotaNotice),
}

/// Quota metadata echoed from the upstream service.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QuotaNotice {
    pub message: Option<String>,
    pub daily_limit: Option<u64>,
    pub current_usage: Option<u64>,
    pub remaining: Option<u64>,
    pub reset_time: Option<String>,
}
