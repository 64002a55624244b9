use std::collections::HashSet;

use crate::view_model::FilteringView;

/// Monotonic session version. Batch results tagged with an older generation are discarded.
pub type Generation = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MonitorPhase {
    #[default]
    Inactive,
    Processing,
    Active,
    /// Page torn down. Only an explicit start leaves this state.
    Stopped,
}

impl MonitorPhase {
    pub fn is_filtering(self) -> bool {
        matches!(self, MonitorPhase::Processing | MonitorPhase::Active)
    }
}

/// Presentation attached to a single container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VisualState {
    Waiting,
    Blocked,
    Allowed,
}

impl VisualState {
    pub fn as_str(self) -> &'static str {
        match self {
            VisualState::Waiting => "waiting",
            VisualState::Blocked => "blocked",
            VisualState::Allowed => "allowed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "waiting" => Some(VisualState::Waiting),
            "blocked" => Some(VisualState::Blocked),
            "allowed" => Some(VisualState::Allowed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FilterState {
    phase: MonitorPhase,
    topics: Vec<String>,
    generation: Generation,
    processed: HashSet<String>,
    blocked: HashSet<String>,
    pending: HashSet<String>,
    in_flight: usize,
    polling: bool,
    dirty: bool,
}

impl FilterState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn view(&self) -> FilteringView {
        let filtering = self.phase.is_filtering();
        FilteringView {
            is_active: filtering,
            phase: self.phase,
            topics: filtering.then(|| self.topics.clone()),
            processed_count: self.processed.len(),
            blocked_count: self.blocked.len(),
            pending_count: self.pending.len(),
            dirty: self.dirty,
        }
    }

    pub fn phase(&self) -> MonitorPhase {
        self.phase
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn is_processed(&self, title: &str) -> bool {
        self.processed.contains(title)
    }

    pub fn is_blocked(&self, title: &str) -> bool {
        self.blocked.contains(title)
    }

    pub fn is_pending(&self, title: &str) -> bool {
        self.pending.contains(title)
    }

    pub fn processed_titles(&self) -> &HashSet<String> {
        &self.processed
    }

    pub fn is_polling(&self) -> bool {
        self.polling
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn consume_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub(crate) fn begin_session(&mut self, topics: Vec<String>) {
        self.generation += 1;
        self.topics = topics;
        self.reset_sets();
        self.in_flight = 0;
        self.phase = MonitorPhase::Processing;
        self.dirty = true;
    }

    pub(crate) fn end_session(&mut self, phase: MonitorPhase) {
        self.generation += 1;
        self.topics.clear();
        self.reset_sets();
        self.in_flight = 0;
        self.phase = phase;
        self.dirty = true;
    }

    fn reset_sets(&mut self) {
        self.processed.clear();
        self.blocked.clear();
        self.pending.clear();
    }

    /// Titles are recorded at submission time so a later tick cannot resubmit them.
    pub(crate) fn record_submitted(&mut self, title: &str) {
        self.processed.insert(title.to_owned());
        self.pending.insert(title.to_owned());
        self.dirty = true;
    }

    pub(crate) fn record_verdict(&mut self, title: &str, allowed: bool) {
        self.pending.remove(title);
        if allowed {
            self.blocked.remove(title);
        } else {
            self.blocked.insert(title.to_owned());
        }
        self.dirty = true;
    }

    /// Visual state a processed title should carry right now.
    pub(crate) fn remembered_state(&self, title: &str) -> VisualState {
        if self.pending.contains(title) {
            VisualState::Waiting
        } else if self.blocked.contains(title) {
            VisualState::Blocked
        } else {
            VisualState::Allowed
        }
    }

    pub(crate) fn batch_dispatched(&mut self) {
        self.in_flight += 1;
        self.phase = MonitorPhase::Processing;
        self.dirty = true;
    }

    pub(crate) fn batch_settled(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    pub(crate) fn enter_active(&mut self) {
        self.phase = MonitorPhase::Active;
        self.dirty = true;
    }

    pub(crate) fn set_polling(&mut self, polling: bool) {
        self.polling = polling;
    }
}

/// Trims topics and drops empty entries, preserving order.
pub fn normalize_topics(topics: Vec<String>) -> Vec<String> {
    topics
        .into_iter()
        .map(|topic| topic.trim().to_owned())
        .filter(|topic| !topic.is_empty())
        .collect()
}
