use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use async_trait::async_trait;
use filter_core::Lifecycle;
use filter_logging::{filter_debug, filter_error, filter_warn};
use tokio::sync::{mpsc, oneshot};

use crate::classify::BatchCoordinator;
use crate::messages::{
    BackgroundRequest, BackgroundResponse, BatchReply, RecommendationReply, TitleOnly,
};
use crate::monitor::ClassificationPort;
use crate::types::{BatchItem, MessagingError};

pub type TabId = u32;

/// Filtering status of one tab as last reported by its page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabPhase {
    Processing,
    Active,
    Inactive,
}

/// The background side: routes page messages to the shared coordinator.
pub struct Background {
    coordinator: Arc<BatchCoordinator>,
    tabs: Mutex<HashMap<TabId, TabPhase>>,
}

impl Background {
    pub fn new(coordinator: Arc<BatchCoordinator>) -> Self {
        Self {
            coordinator,
            tabs: Mutex::new(HashMap::new()),
        }
    }

    pub fn coordinator(&self) -> &BatchCoordinator {
        &self.coordinator
    }

    pub fn tab_phase(&self, tab: TabId) -> Option<TabPhase> {
        self.tabs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&tab)
            .copied()
    }

    pub async fn handle(&self, tab: TabId, request: BackgroundRequest) -> BackgroundResponse {
        match request {
            BackgroundRequest::CheckItemTitlesBatch { items, topics } => {
                let reply = match self.coordinator.classify(items, &topics).await {
                    Ok(outcome) => BatchReply::from_outcome(outcome),
                    Err(err) => {
                        filter_warn!("Tab {tab}: batch rejected: {err}");
                        BatchReply::from_error(&err)
                    }
                };
                BackgroundResponse::Batch(reply)
            }
            BackgroundRequest::GetRecommendedFilter { items } => {
                let titles: Vec<String> = items.into_iter().map(|item| item.title).collect();
                let reply = match self.coordinator.recommend(&titles).await {
                    Ok(text) => RecommendationReply::suggestion(text),
                    Err(err) => {
                        filter_warn!("Tab {tab}: recommendation failed: {err}");
                        RecommendationReply::failed(err.to_string())
                    }
                };
                BackgroundResponse::Recommendation(reply)
            }
            BackgroundRequest::FilteringStarted | BackgroundRequest::ContentProcessing => {
                self.set_phase(tab, TabPhase::Processing);
                BackgroundResponse::Ack
            }
            BackgroundRequest::FilteringComplete => {
                self.set_phase(tab, TabPhase::Active);
                BackgroundResponse::Ack
            }
            BackgroundRequest::FilteringStopped => {
                self.set_phase(tab, TabPhase::Inactive);
                BackgroundResponse::Ack
            }
        }
    }

    fn set_phase(&self, tab: TabId, phase: TabPhase) {
        filter_debug!("Tab {tab} is now {phase:?}");
        self.tabs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tab, phase);
    }
}

struct Envelope {
    tab: TabId,
    request: BackgroundRequest,
    reply: Option<oneshot::Sender<BackgroundResponse>>,
}

/// Message channel into a background running on its own thread and runtime.
#[derive(Clone)]
pub struct BackgroundHandle {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl BackgroundHandle {
    /// Starts the background thread. It exits once every handle is dropped.
    pub fn spawn(background: Arc<Background>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();

        let spawned = thread::Builder::new()
            .name("filter-background".into())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_multi_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        filter_error!("Background runtime failed to start: {err}");
                        return;
                    }
                };
                runtime.block_on(async move {
                    while let Some(envelope) = rx.recv().await {
                        let background = background.clone();
                        if envelope.request.is_notification() {
                            // Tab phases must follow arrival order.
                            deliver(background, envelope).await;
                        } else {
                            tokio::spawn(deliver(background, envelope));
                        }
                    }
                });
            });
        if let Err(err) = spawned {
            filter_error!("Background thread failed to start: {err}");
        }

        Self { tx }
    }

    pub async fn send(
        &self,
        tab: TabId,
        request: BackgroundRequest,
    ) -> Result<BackgroundResponse, MessagingError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Envelope {
                tab,
                request,
                reply: Some(reply_tx),
            })
            .map_err(|_| MessagingError::Disconnected)?;
        reply_rx.await.map_err(|_| MessagingError::Disconnected)
    }

    /// Fire-and-forget delivery.
    pub fn notify(&self, tab: TabId, request: BackgroundRequest) {
        let delivered = self.tx.send(Envelope {
            tab,
            request,
            reply: None,
        });
        if delivered.is_err() {
            filter_debug!("Dropped notification for tab {tab}: background gone");
        }
    }

    pub fn port(&self, tab: TabId) -> TabPort {
        TabPort {
            handle: self.clone(),
            tab,
        }
    }
}

async fn deliver(background: Arc<Background>, envelope: Envelope) {
    let response = background.handle(envelope.tab, envelope.request).await;
    if let Some(reply) = envelope.reply {
        let _ = reply.send(response);
    }
}

/// A page's view of the background.
#[derive(Clone)]
pub struct TabPort {
    handle: BackgroundHandle,
    tab: TabId,
}

impl TabPort {
    pub fn tab(&self) -> TabId {
        self.tab
    }
}

#[async_trait(?Send)]
impl ClassificationPort for TabPort {
    async fn classify(
        &self,
        items: Vec<BatchItem>,
        topics: Vec<String>,
    ) -> Result<BatchReply, MessagingError> {
        let request = BackgroundRequest::CheckItemTitlesBatch { items, topics };
        match self.handle.send(self.tab, request).await? {
            BackgroundResponse::Batch(reply) => Ok(reply),
            _ => Err(MessagingError::UnexpectedResponse),
        }
    }

    async fn recommend(&self, titles: Vec<String>) -> Result<RecommendationReply, MessagingError> {
        let items = titles.into_iter().map(|title| TitleOnly { title }).collect();
        let request = BackgroundRequest::GetRecommendedFilter { items };
        match self.handle.send(self.tab, request).await? {
            BackgroundResponse::Recommendation(reply) => Ok(reply),
            _ => Err(MessagingError::UnexpectedResponse),
        }
    }

    fn notify(&self, event: Lifecycle) {
        let request = match event {
            Lifecycle::FilteringStarted => BackgroundRequest::FilteringStarted,
            Lifecycle::ContentProcessing => BackgroundRequest::ContentProcessing,
            Lifecycle::FilteringComplete => BackgroundRequest::FilteringComplete,
            Lifecycle::FilteringStopped => BackgroundRequest::FilteringStopped,
        };
        self.handle.notify(self.tab, request);
    }
}
