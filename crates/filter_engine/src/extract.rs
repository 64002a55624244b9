use std::collections::HashSet;

use filter_core::VisualState;
use filter_logging::{filter_debug, filter_warn};
use scraper::Selector;

use crate::page::{ElementHandle, PageDocument};
use crate::types::ExtractedItem;
use crate::visual::STATE_ATTR;

/// Scans a page for item containers and derives a title per item.
pub trait SiteExtractor: Send + Sync {
    /// Every extractable item currently on the page, in selector then document order.
    fn scan(&self, page: &PageDocument) -> Vec<ExtractedItem>;
}

/// How the elements belonging to one item are collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grouping {
    /// The container alone.
    Single,
    /// The container plus following sibling rows, up to the next submission row.
    /// A trailing spacer row is included and ends the run.
    SiblingRun,
}

#[derive(Debug, Clone)]
pub struct SiteProfile {
    pub container_selectors: Vec<Selector>,
    pub title_selectors: Vec<Selector>,
    /// Titles shorter than this many characters are ignored.
    pub min_title_len: usize,
    pub grouping: Grouping,
    pub image_selectors: Vec<Selector>,
}

impl SiteProfile {
    pub fn new(containers: &[&str], titles: &[&str]) -> Self {
        Self {
            container_selectors: parse_selectors(containers),
            title_selectors: parse_selectors(titles),
            min_title_len: 1,
            grouping: Grouping::Single,
            image_selectors: Vec::new(),
        }
    }

    pub fn with_min_title_len(mut self, len: usize) -> Self {
        self.min_title_len = len;
        self
    }

    pub fn with_grouping(mut self, grouping: Grouping) -> Self {
        self.grouping = grouping;
        self
    }

    pub fn with_images(mut self, selectors: &[&str]) -> Self {
        self.image_selectors = parse_selectors(selectors);
        self
    }
}

fn parse_selectors(raw: &[&str]) -> Vec<Selector> {
    raw.iter()
        .filter_map(|css| match Selector::parse(css) {
            Ok(selector) => Some(selector),
            Err(err) => {
                filter_warn!("Ignoring invalid selector {css:?}: {err}");
                None
            }
        })
        .collect()
}

/// Supported sites, chosen once from the page's host name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    YouTube,
    HackerNews,
    Reddit,
}

impl Platform {
    pub fn from_host(host: &str) -> Option<Self> {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        let matches = |domain: &str| host == domain || host.ends_with(&format!(".{domain}"));
        if matches("youtube.com") {
            Some(Platform::YouTube)
        } else if matches("news.ycombinator.com") {
            Some(Platform::HackerNews)
        } else if matches("reddit.com") {
            Some(Platform::Reddit)
        } else {
            None
        }
    }

    pub fn from_url(raw: &str) -> Option<Self> {
        let parsed = url::Url::parse(raw).ok()?;
        Self::from_host(parsed.host_str()?)
    }

    pub fn profile(self) -> SiteProfile {
        match self {
            Platform::YouTube => SiteProfile::new(
                &[
                    "ytd-rich-grid-media",
                    "ytd-video-renderer",
                    "ytd-compact-video-renderer",
                    "ytd-rich-item-renderer",
                    "ytd-grid-video-renderer",
                    "ytd-playlist-video-renderer",
                    "ytd-movie-renderer",
                    "yt-lockup-view-model",
                ],
                &[
                    "yt-formatted-string#video-title",
                    "a#video-title-link",
                    "h3 a",
                    "span[title]",
                    "a[title]",
                    "yt-lockup-view-model a[aria-label]",
                    "yt-lockup-view-model img[alt]",
                ],
            )
            .with_images(&["ytd-thumbnail img[src]", "yt-image img[src]", "img[src]"]),
            Platform::HackerNews => SiteProfile::new(
                &["tr.athing.submission", "tr.athing", "table tr.athing"],
                &[
                    ".titleline a",
                    ".title a",
                    ".storylink",
                    "td.title a",
                    ".athing .title a",
                ],
            )
            .with_min_title_len(6)
            .with_grouping(Grouping::SiblingRun),
            Platform::Reddit => SiteProfile::new(
                &["shreddit-post"],
                &["a[slot=\"title\"]", "[slot=\"title\"]", "h3"],
            )
            .with_images(&["img[src]"]),
        }
    }

    pub fn extractor(self) -> SelectorExtractor {
        SelectorExtractor::new(self.profile())
    }
}

/// Extractor driven entirely by a [`SiteProfile`].
#[derive(Debug, Clone)]
pub struct SelectorExtractor {
    profile: SiteProfile,
}

impl SelectorExtractor {
    pub fn new(profile: SiteProfile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> &SiteProfile {
        &self.profile
    }

    fn title_of(&self, page: &PageDocument, container: ElementHandle) -> Option<String> {
        self.profile.title_selectors.iter().find_map(|selector| {
            let element = page.select_first_within(container, selector)?;
            derive_title(page, element)
        })
    }

    fn group_of(&self, page: &PageDocument, container: ElementHandle) -> Vec<ElementHandle> {
        let mut group = vec![container];
        if self.profile.grouping == Grouping::Single {
            return group;
        }

        let mut next = page.next_element_sibling(container);
        while let Some(sibling) = next {
            if page.has_class(sibling, "athing") && page.has_class(sibling, "submission") {
                break;
            }
            group.push(sibling);
            next = page.next_element_sibling(sibling);
            if let Some(spacer) = next.filter(|candidate| page.has_class(*candidate, "spacer")) {
                group.push(spacer);
                break;
            }
        }
        group
    }

    fn image_of(&self, page: &PageDocument, container: ElementHandle) -> Option<String> {
        let src = self.profile.image_selectors.iter().find_map(|selector| {
            let image = page.select_first_within(container, selector)?;
            page.attr(image, "src").filter(|src| !src.trim().is_empty())
        })?;
        Some(absolutize(page.url(), src.trim()))
    }
}

impl SiteExtractor for SelectorExtractor {
    fn scan(&self, page: &PageDocument) -> Vec<ExtractedItem> {
        let mut seen_containers = HashSet::new();
        let mut seen_titles = HashSet::new();
        let mut items = Vec::new();

        for selector in &self.profile.container_selectors {
            for container in page.select(selector) {
                if !seen_containers.insert(container) {
                    continue;
                }
                let Some(title) = self.title_of(page, container) else {
                    continue;
                };
                if title.chars().count() < self.profile.min_title_len {
                    continue;
                }
                if !seen_titles.insert(title.clone()) {
                    filter_debug!("Skipping duplicate title in scan: {title}");
                    continue;
                }
                let state = page
                    .attr(container, STATE_ATTR)
                    .and_then(|raw| VisualState::parse(&raw));
                items.push(ExtractedItem {
                    group: self.group_of(page, container),
                    image_url: self.image_of(page, container),
                    title,
                    container,
                    state,
                });
            }
        }

        filter_debug!("Scan found {} items", items.len());
        items
    }
}

/// Text content first, then the `title`, `aria-label` and `alt` attributes.
fn derive_title(page: &PageDocument, element: ElementHandle) -> Option<String> {
    let text = page.text(element).filter(|text| !text.is_empty());
    text.or_else(|| {
        ["title", "aria-label", "alt"].iter().find_map(|name| {
            page.attr(element, name)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        })
    })
}

fn absolutize(base: Option<&str>, src: &str) -> String {
    base.and_then(|base| url::Url::parse(base).ok())
        .and_then(|base| base.join(src).ok())
        .map(|joined| joined.to_string())
        .unwrap_or_else(|| src.to_owned())
}
