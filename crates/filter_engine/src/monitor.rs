use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::sync::Arc;

use async_trait::async_trait;
use filter_core::{
    update, BatchFailure, BatchFailureKind, Decision, Effect, FilterState, FilteringView,
    Generation, Lifecycle, Msg, PollCadence, PollIntervals, ScannedItem, ScrollActivity,
    VisualState,
};
use filter_logging::{filter_debug, filter_info, filter_warn, set_poll_tick};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::extract::SiteExtractor;
use crate::messages::{BatchReply, PageRequest, PageResponse, RecommendationReply};
use crate::notice::{render_quota_notice, NOTICE_DISPLAY};
use crate::page::PageDocument;
use crate::storage::{KeyValueStore, StoredSettings};
use crate::types::{BatchItem, ExtractedItem, MessagingError};
use crate::visual::{VisualEffects, VisualStateMachine};

/// Titles sent along with a recommendation request.
const RECOMMENDATION_SAMPLE: usize = 20;

const RECOMMENDATION_WHILE_FILTERING: &str =
    "AI recommendations are only available when filtering is disabled";

/// The page's channel to the background classification service.
#[async_trait(?Send)]
pub trait ClassificationPort {
    async fn classify(
        &self,
        items: Vec<BatchItem>,
        topics: Vec<String>,
    ) -> Result<BatchReply, MessagingError>;

    async fn recommend(&self, titles: Vec<String>) -> Result<RecommendationReply, MessagingError>;

    /// Best-effort lifecycle notification.
    fn notify(&self, event: Lifecycle);
}

/// Runs a filtering session on one page.
///
/// Lives on a single thread: every task it starts is `spawn_local`, so it must
/// be driven from inside a [`tokio::task::LocalSet`].
#[derive(Clone)]
pub struct ContentMonitor {
    inner: Rc<Inner>,
}

struct Inner {
    page: Rc<RefCell<PageDocument>>,
    extractor: Box<dyn SiteExtractor>,
    visual: VisualStateMachine,
    port: Rc<dyn ClassificationPort>,
    store: Arc<dyn KeyValueStore>,
    state: RefCell<FilterState>,
    /// Latest scan result by title; visual commands resolve containers here.
    items: RefCell<HashMap<String, ExtractedItem>>,
    cadence: RefCell<PollCadence>,
    interval_changed: Notify,
    polling: RefCell<Option<CancellationToken>>,
    quiet_timer: RefCell<Option<CancellationToken>>,
    batches: RefCell<Vec<JoinHandle<()>>>,
    ticks: Cell<u64>,
}

impl ContentMonitor {
    pub fn new(
        page: Rc<RefCell<PageDocument>>,
        extractor: Box<dyn SiteExtractor>,
        port: Rc<dyn ClassificationPort>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            inner: Rc::new(Inner {
                page,
                extractor,
                visual: VisualStateMachine::default(),
                port,
                store,
                state: RefCell::new(FilterState::new()),
                items: RefCell::new(HashMap::new()),
                cadence: RefCell::new(PollCadence::new(PollIntervals::default())),
                interval_changed: Notify::new(),
                polling: RefCell::new(None),
                quiet_timer: RefCell::new(None),
                batches: RefCell::new(Vec::new()),
                ticks: Cell::new(0),
            }),
        }
    }

    /// Replaces timer settings. Has no effect once the monitor has been cloned.
    pub fn with_intervals(mut self, intervals: PollIntervals) -> Self {
        match Rc::get_mut(&mut self.inner) {
            Some(inner) => *inner.cadence.get_mut() = PollCadence::new(intervals),
            None => filter_warn!("Poll intervals ignored: monitor already shared"),
        }
        self
    }

    /// Replaces visual treatment values. Has no effect once the monitor has been cloned.
    pub fn with_visual_effects(mut self, effects: VisualEffects) -> Self {
        match Rc::get_mut(&mut self.inner) {
            Some(inner) => inner.visual = VisualStateMachine::new(effects),
            None => filter_warn!("Visual effects ignored: monitor already shared"),
        }
        self
    }

    pub fn page(&self) -> Rc<RefCell<PageDocument>> {
        self.inner.page.clone()
    }

    pub fn view(&self) -> FilteringView {
        self.inner.state.borrow().view()
    }

    pub fn is_polling(&self) -> bool {
        self.inner.polling.borrow().is_some()
    }

    pub fn scroll_activity(&self) -> ScrollActivity {
        self.inner.cadence.borrow().activity()
    }

    /// Page load: wait for extractable items, then honour the persisted auto-start flag.
    pub async fn boot(&self) {
        let intervals = *self.inner.cadence.borrow().intervals();
        let mut attempts = 0;
        loop {
            attempts += 1;
            let found = !self.inner.extractor.scan(&self.inner.page.borrow()).is_empty();
            if found || attempts >= intervals.startup_max_attempts {
                filter_debug!("Startup probe finished after {attempts} attempt(s), found={found}");
                break;
            }
            tokio::time::sleep(intervals.startup_check).await;
        }

        match StoredSettings::load(self.inner.store.as_ref()).await {
            Ok(settings) => {
                self.dispatch(Msg::StartupSettingsLoaded {
                    filtering_enabled: settings.filtering_enabled,
                    topics: settings.allowed_topics,
                });
                self.settle().await;
            }
            Err(err) => filter_warn!("Could not read filtering settings: {err}"),
        }
    }

    pub async fn handle_request(&self, request: PageRequest) -> PageResponse {
        match request {
            PageRequest::StartFiltering { topics } => {
                self.dispatch(Msg::StartFiltering { topics });
                self.settle().await;
                PageResponse::Ack { success: true }
            }
            PageRequest::UpdatePreferences { topics } => {
                self.dispatch(Msg::UpdatePreferences { topics });
                self.settle().await;
                PageResponse::Ack { success: true }
            }
            PageRequest::StopFiltering => {
                self.dispatch(Msg::StopFiltering);
                PageResponse::Ack { success: true }
            }
            PageRequest::GetFilteringState => {
                let view = self.view();
                PageResponse::FilteringState {
                    is_active: view.is_active,
                    topics: view.topics,
                }
            }
            PageRequest::GetRecommendedFilter => {
                PageResponse::Recommendation(self.recommend().await)
            }
        }
    }

    /// Scroll event from the page.
    pub fn on_scroll(&self) {
        if !self.is_polling() {
            return;
        }
        if self.inner.cadence.borrow_mut().on_scroll() {
            filter_debug!("Scrolling: switching to fast polling");
            self.inner.interval_changed.notify_waiters();
        }

        let token = CancellationToken::new();
        if let Some(previous) = self.inner.quiet_timer.borrow_mut().replace(token.clone()) {
            previous.cancel();
        }
        let quiet = self.inner.cadence.borrow().quiet_period();
        let monitor = self.clone();
        tokio::task::spawn_local(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(quiet) => {
                    if monitor.inner.cadence.borrow_mut().on_quiet() {
                        filter_debug!("Scrolling stopped: back to idle polling");
                        monitor.inner.interval_changed.notify_waiters();
                    }
                }
            }
        });
    }

    pub fn shutdown(&self) {
        self.dispatch(Msg::Shutdown);
    }

    /// Waits for every batch dispatched so far to be applied.
    pub async fn settle(&self) {
        let pending: Vec<JoinHandle<()>> = self.inner.batches.borrow_mut().drain(..).collect();
        for handle in pending {
            let _ = handle.await;
        }
    }

    async fn recommend(&self) -> RecommendationReply {
        if self.inner.state.borrow().phase().is_filtering() {
            return RecommendationReply::failed(RECOMMENDATION_WHILE_FILTERING);
        }
        let titles: Vec<String> = self
            .inner
            .extractor
            .scan(&self.inner.page.borrow())
            .into_iter()
            .take(RECOMMENDATION_SAMPLE)
            .map(|item| item.title)
            .collect();
        if titles.is_empty() {
            return RecommendationReply::default();
        }
        match self.inner.port.recommend(titles).await {
            Ok(reply) => reply,
            Err(err) => RecommendationReply::failed(err.to_string()),
        }
    }

    fn dispatch(&self, msg: Msg) {
        let mut queue = VecDeque::from([msg]);
        while let Some(msg) = queue.pop_front() {
            if matches!(msg, Msg::PollTick) {
                let tick = self.inner.ticks.get() + 1;
                self.inner.ticks.set(tick);
                set_poll_tick(tick);
            }
            let effects = {
                let mut slot = self.inner.state.borrow_mut();
                let (next, effects) = update(std::mem::take(&mut *slot), msg);
                *slot = next;
                effects
            };
            for effect in effects {
                if let Some(follow_up) = self.run_effect(effect) {
                    queue.push_back(follow_up);
                }
            }
        }
    }

    fn run_effect(&self, effect: Effect) -> Option<Msg> {
        match effect {
            Effect::ScanPage => Some(self.scan()),
            Effect::Present { title, state } => {
                self.present(&title, state);
                None
            }
            Effect::ClearVisualState => {
                let restored = self.inner.visual.clear_all(&mut self.inner.page.borrow_mut());
                self.inner.items.borrow_mut().clear();
                filter_debug!("Cleared visual state from {restored} elements");
                None
            }
            Effect::DispatchBatch {
                generation,
                titles,
                topics,
            } => {
                self.dispatch_batch(generation, titles, topics);
                None
            }
            Effect::StartPolling => {
                self.start_polling();
                None
            }
            Effect::StopPolling => {
                self.stop_polling();
                None
            }
            Effect::Notify(event) => {
                self.inner.port.notify(event);
                None
            }
            Effect::ShowQuotaNotice(notice) => {
                filter_warn!("Daily quota reached, filtering stopped");
                self.show_notice(render_quota_notice(&notice));
                None
            }
        }
    }

    fn scan(&self) -> Msg {
        let found = self.inner.extractor.scan(&self.inner.page.borrow());
        let scanned = found
            .iter()
            .map(|item| ScannedItem::new(item.title.clone(), item.state))
            .collect();
        let mut items = self.inner.items.borrow_mut();
        items.clear();
        items.extend(found.into_iter().map(|item| (item.title.clone(), item)));
        Msg::Scanned { items: scanned }
    }

    fn present(&self, title: &str, state: VisualState) {
        let items = self.inner.items.borrow();
        let Some(item) = items.get(title) else {
            filter_debug!("No container for {title:?}, skipping {}", state.as_str());
            return;
        };
        let applied = self
            .inner
            .visual
            .apply(&mut self.inner.page.borrow_mut(), item, state);
        if !applied {
            filter_debug!("Container for {title:?} is gone, {} not applied", state.as_str());
        }
    }

    fn dispatch_batch(&self, generation: Generation, titles: Vec<String>, topics: Vec<String>) {
        let items: Vec<BatchItem> = {
            let known = self.inner.items.borrow();
            titles
                .iter()
                .enumerate()
                .map(|(position, title)| BatchItem {
                    index: position + 1,
                    title: title.clone(),
                    image_url: known.get(title).and_then(|item| item.image_url.clone()),
                })
                .collect()
        };
        filter_info!("Dispatching {} items (generation {generation})", items.len());

        let monitor = self.clone();
        let handle = tokio::task::spawn_local(async move {
            let reply = monitor.inner.port.classify(items, topics).await;
            monitor.dispatch(batch_finished(generation, &titles, reply));
        });

        let mut batches = self.inner.batches.borrow_mut();
        batches.retain(|batch| !batch.is_finished());
        batches.push(handle);
    }

    fn start_polling(&self) {
        let token = CancellationToken::new();
        if let Some(previous) = self.inner.polling.borrow_mut().replace(token.clone()) {
            previous.cancel();
        }

        let monitor = self.clone();
        tokio::task::spawn_local(async move {
            loop {
                let interval = monitor.inner.cadence.borrow().interval();
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = monitor.inner.interval_changed.notified() => continue,
                    _ = tokio::time::sleep(interval) => monitor.dispatch(Msg::PollTick),
                }
            }
        });
    }

    fn stop_polling(&self) {
        if let Some(token) = self.inner.polling.borrow_mut().take() {
            token.cancel();
        }
        if let Some(token) = self.inner.quiet_timer.borrow_mut().take() {
            token.cancel();
        }
        self.inner.cadence.borrow_mut().reset();
    }

    fn show_notice(&self, text: String) {
        let id = self.inner.page.borrow_mut().push_notice(text);
        let page = self.inner.page.clone();
        tokio::task::spawn_local(async move {
            tokio::time::sleep(NOTICE_DISPLAY).await;
            page.borrow_mut().remove_notice(id);
        });
    }
}

/// Turns a background reply into the session message. Results align by index.
fn batch_finished(
    generation: Generation,
    titles: &[String],
    reply: Result<BatchReply, MessagingError>,
) -> Msg {
    let reply = match reply {
        Ok(reply) => reply,
        Err(err) => {
            filter_warn!("Batch of {} items lost: {err}", titles.len());
            return Msg::BatchFinished {
                generation,
                decisions: Vec::new(),
                failures: vec![BatchFailure {
                    titles: titles.to_vec(),
                    kind: BatchFailureKind::Transport(err.to_string()),
                }],
            };
        }
    };

    let decisions = reply
        .results
        .into_iter()
        .map(|result| Decision {
            title: result
                .index
                .checked_sub(1)
                .and_then(|position| titles.get(position))
                .cloned()
                .unwrap_or(result.title),
            allowed: result.is_allowed,
        })
        .collect();

    let mut failures: Vec<BatchFailure> = reply
        .failures
        .into_iter()
        .map(|failure| BatchFailure {
            kind: failure.error.failure_kind(),
            titles: failure.titles,
        })
        .collect();
    if failures.is_empty() {
        if let Some(error) = reply.error {
            failures.push(BatchFailure {
                titles: titles.to_vec(),
                kind: error.failure_kind(),
            });
        }
    }

    Msg::BatchFinished {
        generation,
        decisions,
        failures,
    }
}
