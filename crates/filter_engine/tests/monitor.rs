use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::Rc;
use std::sync::{Arc, Once};
use std::time::Duration;

use async_trait::async_trait;
use filter_core::{Lifecycle, MonitorPhase, ScrollActivity};
use filter_engine::{
    BatchItem, BatchReply, ClassificationPort, ClassifyError, ContentMonitor, ItemDecision,
    MemoryStore, MessagingError, PageDocument, PageRequest, PageResponse, Platform, QuotaDetails,
    RecommendationReply, SiteExtractor, STATE_ATTR,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::task::LocalSet;

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(filter_logging::initialize_for_tests);
}

/// Scripted background: blocks every title mentioning politics.
#[derive(Default)]
struct FakePort {
    calls: RefCell<Vec<(Vec<BatchItem>, Vec<String>)>>,
    recommend_calls: RefCell<Vec<Vec<String>>>,
    events: RefCell<Vec<Lifecycle>>,
    delay: Cell<Duration>,
    quota: Cell<bool>,
}

impl FakePort {
    fn call_count(&self) -> usize {
        self.calls.borrow().len()
    }

    fn titles_of_call(&self, call: usize) -> Vec<String> {
        self.calls.borrow()[call]
            .0
            .iter()
            .map(|item| item.title.clone())
            .collect()
    }
}

#[async_trait(?Send)]
impl ClassificationPort for FakePort {
    async fn classify(
        &self,
        items: Vec<BatchItem>,
        topics: Vec<String>,
    ) -> Result<BatchReply, MessagingError> {
        self.calls.borrow_mut().push((items.clone(), topics));
        let delay = self.delay.get();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.quota.get() {
            return Ok(BatchReply::from_error(&ClassifyError::DailyLimitExceeded(
                QuotaDetails {
                    reset_time: Some("2025-06-01T00:00:00Z".into()),
                    ..QuotaDetails::default()
                },
            )));
        }
        Ok(BatchReply {
            results: items
                .into_iter()
                .map(|item| ItemDecision {
                    is_allowed: !item.title.contains("Politics"),
                    response_line: format!("{}. scripted", item.index),
                    index: item.index,
                    title: item.title,
                })
                .collect(),
            ..BatchReply::default()
        })
    }

    async fn recommend(&self, titles: Vec<String>) -> Result<RecommendationReply, MessagingError> {
        self.recommend_calls.borrow_mut().push(titles);
        Ok(RecommendationReply::suggestion("Block politics"))
    }

    fn notify(&self, event: Lifecycle) {
        self.events.borrow_mut().push(event);
    }
}

fn stories(titles: &[&str]) -> String {
    let rows: String = titles
        .iter()
        .enumerate()
        .map(|(i, title)| {
            format!(
                r#"<tr class="athing submission" id="{i}"><td class="title"><span class="titleline"><a href="/{i}">{title}</a></span></td></tr>
<tr><td class="subtext">{i} points</td></tr>
<tr class="spacer"></tr>
"#
            )
        })
        .collect();
    format!("<html><body><table>{rows}</table></body></html>")
}

const FOUR: [&str; 4] = [
    "Politics story one",
    "Cooking story two",
    "Politics story three",
    "Cooking story four",
];

struct Harness {
    monitor: ContentMonitor,
    port: Rc<FakePort>,
    page: Rc<RefCell<PageDocument>>,
}

impl Harness {
    fn new(html: &str) -> Self {
        Self::with_store(html, MemoryStore::new())
    }

    fn with_store(html: &str, store: MemoryStore) -> Self {
        init_logging();
        let page = Rc::new(RefCell::new(
            PageDocument::parse(html).with_url("https://news.ycombinator.com/"),
        ));
        let port = Rc::new(FakePort::default());
        let monitor = ContentMonitor::new(
            page.clone(),
            Box::new(Platform::HackerNews.extractor()),
            port.clone(),
            Arc::new(store),
        );
        Self {
            monitor,
            port,
            page,
        }
    }

    /// State attribute per story, in page order.
    fn states(&self) -> Vec<Option<String>> {
        let page = self.page.borrow();
        Platform::HackerNews
            .extractor()
            .scan(&page)
            .iter()
            .map(|item| page.attr(item.container, STATE_ATTR))
            .collect()
    }

    async fn start(&self, topics: &[&str]) {
        let response = self
            .monitor
            .handle_request(PageRequest::StartFiltering {
                topics: topics.iter().map(|t| t.to_string()).collect(),
            })
            .await;
        assert_eq!(response, PageResponse::Ack { success: true });
    }
}

async fn local<F: Future>(future: F) -> F::Output {
    LocalSet::new().run_until(future).await
}

fn s(value: &str) -> Option<String> {
    Some(value.to_owned())
}

#[tokio::test(start_paused = true)]
async fn start_marks_blocked_and_allowed() {
    local(async {
        let h = Harness::new(&stories(&FOUR));
        h.start(&["block politics"]).await;

        assert_eq!(
            h.states(),
            vec![s("blocked"), s("allowed"), s("blocked"), s("allowed")]
        );
        assert_eq!(h.port.call_count(), 1);
        assert_eq!(h.port.titles_of_call(0), FOUR.to_vec());
        assert_eq!(h.port.calls.borrow()[0].1, vec!["block politics".to_owned()]);
        assert_eq!(
            *h.port.events.borrow(),
            vec![
                Lifecycle::FilteringStarted,
                Lifecycle::ContentProcessing,
                Lifecycle::FilteringComplete
            ]
        );
        let view = h.monitor.view();
        assert_eq!(view.phase, MonitorPhase::Active);
        assert_eq!(view.blocked_count, 2);
        assert!(h.monitor.is_polling());
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn items_are_waiting_while_the_batch_is_out() {
    local(async {
        let h = Rc::new(Harness::new(&stories(&FOUR)));
        h.port.delay.set(Duration::from_secs(1));

        let runner = h.clone();
        let start = tokio::task::spawn_local(async move {
            runner.start(&["block politics"]).await;
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(h.port.call_count(), 1);
        assert_eq!(h.states(), vec![s("waiting"); 4]);
        assert_eq!(h.monitor.view().phase, MonitorPhase::Processing);

        start.await.unwrap();
        assert_eq!(
            h.states(),
            vec![s("blocked"), s("allowed"), s("blocked"), s("allowed")]
        );
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn rerendered_items_are_restored_without_a_new_request() {
    local(async {
        let h = Harness::new(&stories(&FOUR));
        h.start(&["block politics"]).await;

        h.page.borrow_mut().replace_html(&stories(&FOUR));
        assert_eq!(h.states(), vec![None; 4]);

        tokio::time::sleep(Duration::from_millis(2100)).await;

        assert_eq!(
            h.states(),
            vec![s("blocked"), s("allowed"), s("blocked"), s("allowed")]
        );
        assert_eq!(h.port.call_count(), 1);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn recycled_containers_with_stale_markers_are_corrected() {
    local(async {
        let h = Harness::new(&stories(&FOUR));
        h.start(&["block politics"]).await;

        // The host reuses nodes and carries over the previous occupant's marker.
        let recycled = stories(&FOUR)
            .replacen(r#"id="0""#, r#"id="0" data-gf-state="allowed""#, 1)
            .replacen(r#"id="1""#, r#"id="1" data-gf-state="blocked""#, 1);
        h.page.borrow_mut().replace_html(&recycled);
        assert_eq!(h.states(), vec![s("allowed"), s("blocked"), None, None]);

        tokio::time::sleep(Duration::from_millis(2100)).await;

        assert_eq!(
            h.states(),
            vec![s("blocked"), s("allowed"), s("blocked"), s("allowed")]
        );
        assert_eq!(h.port.call_count(), 1);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn polling_submits_only_new_items() {
    local(async {
        let h = Harness::new(&stories(&FOUR));
        h.start(&["block politics"]).await;

        let mut grown = FOUR.to_vec();
        grown.push("Politics story five");
        h.page.borrow_mut().replace_html(&stories(&grown));

        tokio::time::sleep(Duration::from_millis(2100)).await;

        assert_eq!(h.port.call_count(), 2);
        assert_eq!(h.port.titles_of_call(1), vec!["Politics story five"]);
        assert_eq!(h.states()[4], s("blocked"));

        // Nothing new: further ticks stay quiet.
        tokio::time::sleep(Duration::from_millis(4100)).await;
        assert_eq!(h.port.call_count(), 2);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn scrolling_speeds_up_polling_until_quiet() {
    local(async {
        let h = Harness::new(&stories(&FOUR));
        h.start(&["block politics"]).await;
        assert_eq!(h.monitor.scroll_activity(), ScrollActivity::Idle);

        let mut grown = FOUR.to_vec();
        grown.push("Cooking story five");
        h.page.borrow_mut().replace_html(&stories(&grown));
        h.monitor.on_scroll();
        assert_eq!(h.monitor.scroll_activity(), ScrollActivity::Active);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(h.port.call_count(), 2);

        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(h.monitor.scroll_activity(), ScrollActivity::Idle);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn scroll_events_before_start_are_ignored() {
    local(async {
        let h = Harness::new(&stories(&FOUR));
        h.monitor.on_scroll();
        assert_eq!(h.monitor.scroll_activity(), ScrollActivity::Idle);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn stop_then_start_filters_from_scratch() {
    local(async {
        let h = Harness::new(&stories(&FOUR));
        h.start(&["block politics"]).await;

        let response = h.monitor.handle_request(PageRequest::StopFiltering).await;
        assert_eq!(response, PageResponse::Ack { success: true });
        assert_eq!(h.states(), vec![None; 4]);
        assert!(!h.monitor.is_polling());
        assert_eq!(h.monitor.view().phase, MonitorPhase::Inactive);
        assert_eq!(h.port.events.borrow().last(), Some(&Lifecycle::FilteringStopped));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(h.port.call_count(), 1);

        h.start(&["block politics"]).await;
        assert_eq!(h.port.call_count(), 2);
        assert_eq!(h.port.titles_of_call(1), FOUR.to_vec());
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn update_preferences_reclassifies_everything() {
    local(async {
        let h = Harness::new(&stories(&FOUR));
        h.start(&["block politics"]).await;

        h.monitor
            .handle_request(PageRequest::UpdatePreferences {
                topics: vec!["block cooking".into()],
            })
            .await;

        assert_eq!(h.port.call_count(), 2);
        assert_eq!(h.port.calls.borrow()[1].1, vec!["block cooking".to_owned()]);
        assert_eq!(h.port.titles_of_call(1), FOUR.to_vec());
        let state = h.monitor.handle_request(PageRequest::GetFilteringState).await;
        assert_eq!(
            state,
            PageResponse::FilteringState {
                is_active: true,
                topics: Some(vec!["block cooking".into()]),
            }
        );
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn results_from_a_stopped_session_are_discarded() {
    local(async {
        let h = Rc::new(Harness::new(&stories(&FOUR)));
        h.port.delay.set(Duration::from_secs(1));

        let runner = h.clone();
        let start = tokio::task::spawn_local(async move {
            runner.start(&["block politics"]).await;
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.monitor.handle_request(PageRequest::StopFiltering).await;
        start.await.unwrap();

        assert_eq!(h.states(), vec![None; 4]);
        assert_eq!(h.monitor.view().processed_count, 0);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn quota_stops_the_session_and_shows_a_notice() {
    local(async {
        let h = Harness::new(&stories(&FOUR));
        h.port.quota.set(true);
        h.start(&["block politics"]).await;

        assert_eq!(h.monitor.view().phase, MonitorPhase::Inactive);
        assert!(!h.monitor.is_polling());
        let notices: Vec<String> = h.page.borrow().notices().map(str::to_owned).collect();
        assert_eq!(notices.len(), 1);
        assert!(notices[0].contains("Global Daily Quota Reached"));
        assert!(notices[0].contains("Resets at 00:00 UTC."));
        assert!(h
            .port
            .events
            .borrow()
            .contains(&Lifecycle::FilteringStopped));

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(h.page.borrow().notices().count(), 0);
        assert_eq!(h.port.call_count(), 1);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn boot_auto_starts_from_stored_settings() {
    local(async {
        let Ok(values) = serde_json::from_value(json!({
            "filteringEnabled": true,
            "allowedTopics": ["block politics", "  "]
        })) else {
            panic!("bad fixture");
        };
        let h = Harness::with_store(&stories(&FOUR), MemoryStore::with_values(values));

        h.monitor.boot().await;

        assert_eq!(h.monitor.view().phase, MonitorPhase::Active);
        assert_eq!(h.port.calls.borrow()[0].1, vec!["block politics".to_owned()]);
        assert_eq!(
            h.states(),
            vec![s("blocked"), s("allowed"), s("blocked"), s("allowed")]
        );
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn boot_gives_up_on_an_empty_page_and_stays_idle() {
    local(async {
        let h = Harness::new("<html><body></body></html>");
        let started = tokio::time::Instant::now();

        h.monitor.boot().await;

        assert!(started.elapsed() >= Duration::from_millis(49 * 50));
        assert_eq!(h.monitor.view().phase, MonitorPhase::Inactive);
        assert_eq!(h.port.call_count(), 0);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn recommendation_requires_filtering_off() {
    local(async {
        let titles: Vec<String> = (1..=25).map(|i| format!("Interesting story {i}")).collect();
        let refs: Vec<&str> = titles.iter().map(String::as_str).collect();
        let h = Harness::new(&stories(&refs));

        let reply = h.monitor.handle_request(PageRequest::GetRecommendedFilter).await;
        assert_eq!(
            reply,
            PageResponse::Recommendation(RecommendationReply::suggestion("Block politics"))
        );
        assert_eq!(h.port.recommend_calls.borrow()[0].len(), 20);

        h.start(&["block politics"]).await;
        let reply = h.monitor.handle_request(PageRequest::GetRecommendedFilter).await;
        assert_eq!(
            reply,
            PageResponse::Recommendation(RecommendationReply::failed(
                "AI recommendations are only available when filtering is disabled"
            ))
        );
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn recommendation_on_an_empty_page_is_empty() {
    local(async {
        let h = Harness::new("<html><body></body></html>");
        let reply = h.monitor.handle_request(PageRequest::GetRecommendedFilter).await;
        assert_eq!(
            reply,
            PageResponse::Recommendation(RecommendationReply::default())
        );
        assert!(h.port.recommend_calls.borrow().is_empty());
    })
    .await;
}
