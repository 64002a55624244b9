use crate::MonitorPhase;

/// Snapshot answered to `getFilteringState`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FilteringView {
    pub is_active: bool,
    pub phase: MonitorPhase,
    /// `None` whenever filtering is not running.
    pub topics: Option<Vec<String>>,
    pub processed_count: usize,
    pub blocked_count: usize,
    pub pending_count: usize,
    pub dirty: bool,
}
