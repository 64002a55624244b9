use crate::{Generation, QuotaNotice, VisualState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Run the site extractor over the page and answer with `Msg::Scanned`.
    ScanPage,
    /// Apply a visual state to the container currently carrying `title`.
    Present { title: String, state: VisualState },
    /// Remove every visual treatment the filter has applied to the page.
    ClearVisualState,
    /// Send the titles to the classification coordinator.
    DispatchBatch {
        generation: Generation,
        titles: Vec<String>,
        topics: Vec<String>,
    },
    StartPolling,
    StopPolling,
    Notify(Lifecycle),
    ShowQuotaNotice(QuotaNotice),
}

/// Fire-and-forget notifications sent to the background.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    FilteringStarted,
    ContentProcessing,
    FilteringComplete,
    FilteringStopped,
}
