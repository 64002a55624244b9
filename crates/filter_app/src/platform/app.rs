use std::cell::RefCell;
use std::fs;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use filter_engine::{
    Background, BackgroundHandle, BatchCoordinator, ClassifierSettings, ContentMonitor, Endpoints,
    KeyValueStore, PageDocument, PageRequest, PageResponse, Platform, ReqwestTransport,
    SiteExtractor, StoreConfigResolver, StoredSettings, TransportSettings, STATE_ATTR,
};
use filter_logging::{filter_info, filter_warn};
use tokio::task::LocalSet;

use super::cli::{Cli, Commands};
use super::logging;
use super::persistence::RonFileStore;

/// Tab id used for the single page this process hosts.
const PAGE_TAB: u32 = 1;

pub fn run_app() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::initialize(cli.log, cli.verbose);

    let store = RonFileStore::open(cli.state_dir.clone());
    filter_info!("Settings file: {:?}", store.path());
    let store: Arc<dyn KeyValueStore> = Arc::new(store);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start the page runtime")?;
    LocalSet::new().block_on(&runtime, run_command(cli.command, store))
}

async fn run_command(command: Commands, store: Arc<dyn KeyValueStore>) -> anyhow::Result<()> {
    match command {
        Commands::Stats => {
            let settings = StoredSettings::load(store.as_ref())
                .await
                .context("failed to read settings")?;
            println!("{}", settings.global_api_request_count);
            Ok(())
        }
        Commands::Filter {
            page,
            url,
            topics,
            seconds,
            content_type,
        } => {
            let topics = if topics.is_empty() {
                StoredSettings::load(store.as_ref())
                    .await
                    .context("failed to read settings")?
                    .allowed_topics
            } else {
                topics
            };
            if topics.iter().all(|topic| topic.trim().is_empty()) {
                bail!("no topics given and none stored; pass --topic");
            }

            let session = PageSession::open(&page, &url, content_type.as_deref(), store).await?;
            session
                .monitor
                .handle_request(PageRequest::StartFiltering { topics })
                .await;
            // Polling keeps running until the session ends.
            tokio::time::sleep(Duration::from_secs(seconds)).await;
            session.monitor.settle().await;
            session.print_states();
            session.monitor.shutdown();
            Ok(())
        }
        Commands::Recommend {
            page,
            url,
            content_type,
        } => {
            let session = PageSession::open(&page, &url, content_type.as_deref(), store).await?;
            let response = session
                .monitor
                .handle_request(PageRequest::GetRecommendedFilter)
                .await;
            let PageResponse::Recommendation(reply) = response else {
                bail!("unexpected reply to a recommendation request: {response:?}");
            };
            match (reply.recommendation, reply.error) {
                (_, Some(error)) => bail!("recommendation failed: {error}"),
                (Some(text), None) => println!("{text}"),
                (None, None) => println!("(no content found on page)"),
            }
            Ok(())
        }
    }
}

/// A saved page wired to a background classifier.
struct PageSession {
    platform: Platform,
    page: Rc<RefCell<PageDocument>>,
    monitor: ContentMonitor,
}

impl PageSession {
    async fn open(
        path: &Path,
        url: &str,
        content_type: Option<&str>,
        store: Arc<dyn KeyValueStore>,
    ) -> anyhow::Result<Self> {
        let platform = Platform::from_url(url)
            .with_context(|| format!("no site extractor for {url}"))?;
        let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let document = PageDocument::from_bytes(&bytes, content_type)
            .with_context(|| format!("failed to decode {}", path.display()))?
            .with_url(url);
        let page = Rc::new(RefCell::new(document));

        let coordinator = BatchCoordinator::new(
            Arc::new(ReqwestTransport::new(TransportSettings::default())?),
            Arc::new(StoreConfigResolver::new(store.clone(), Endpoints::default())),
            store.clone(),
            ClassifierSettings::default(),
        );
        coordinator.initialize_counter().await;
        let background = BackgroundHandle::spawn(Arc::new(Background::new(Arc::new(coordinator))));

        let monitor = ContentMonitor::new(
            page.clone(),
            Box::new(platform.extractor()),
            Rc::new(background.port(PAGE_TAB)),
            store,
        );
        Ok(Self {
            platform,
            page,
            monitor,
        })
    }

    fn print_states(&self) {
        let page = self.page.borrow();
        let items = self.platform.extractor().scan(&page);
        if items.is_empty() {
            filter_warn!("No items found on the page");
        }
        for item in items {
            let state = page
                .attr(item.container, STATE_ATTR)
                .unwrap_or_else(|| "unprocessed".to_owned());
            println!("{state:<11} {}", item.title);
        }
    }
}
