use std::collections::{BTreeMap, BTreeSet, HashMap};

use ego_tree::NodeId;
use scraper::{ElementRef, Html, Selector};

use crate::decode::{decode_html, DecodeError};

/// Weak reference to an element of a specific document revision.
///
/// The host page owns element lifetime. Once it re-renders, handles from the
/// previous revision resolve to nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementHandle {
    node: NodeId,
    revision: u64,
}

pub type NoticeId = u64;

/// Mutations the filter applied on top of the host page's markup.
#[derive(Debug, Clone, Default)]
struct Overlay {
    /// `None` marks an attribute removed by the filter.
    attrs: BTreeMap<String, Option<String>>,
    added_classes: BTreeSet<String>,
    removed_classes: BTreeSet<String>,
    styles: BTreeMap<String, String>,
}

/// A parsed page plus everything the filter painted over it.
#[derive(Debug)]
pub struct PageDocument {
    html: Html,
    url: Option<String>,
    revision: u64,
    overlays: HashMap<NodeId, Overlay>,
    notices: Vec<(NoticeId, String)>,
    next_notice: NoticeId,
}

impl PageDocument {
    pub fn parse(html: &str) -> Self {
        Self {
            html: Html::parse_document(html),
            url: None,
            revision: 0,
            overlays: HashMap::new(),
            notices: Vec::new(),
            next_notice: 1,
        }
    }

    /// Decodes raw page bytes (BOM, charset header, detection) before parsing.
    pub fn from_bytes(bytes: &[u8], content_type: Option<&str>) -> Result<Self, DecodeError> {
        let decoded = decode_html(bytes, content_type)?;
        Ok(Self::parse(&decoded.html))
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn host(&self) -> Option<String> {
        let parsed = url::Url::parse(self.url.as_deref()?).ok()?;
        parsed.host_str().map(str::to_owned)
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// The host page re-rendered: new markup, every node recreated, our overlays gone.
    pub fn replace_html(&mut self, html: &str) {
        self.html = Html::parse_document(html);
        self.revision += 1;
        self.overlays.clear();
    }

    pub fn select(&self, selector: &Selector) -> Vec<ElementHandle> {
        self.html
            .select(selector)
            .map(|element| self.handle_of(element))
            .collect()
    }

    pub fn select_first_within(
        &self,
        scope: ElementHandle,
        selector: &Selector,
    ) -> Option<ElementHandle> {
        let element = self.element(scope)?;
        let found = element.select(selector).next()?;
        Some(self.handle_of(found))
    }

    pub fn is_live(&self, handle: ElementHandle) -> bool {
        self.element(handle).is_some()
    }

    pub fn tag_name(&self, handle: ElementHandle) -> Option<&str> {
        self.element(handle).map(|element| element.value().name())
    }

    /// Text content with whitespace runs collapsed.
    pub fn text(&self, handle: ElementHandle) -> Option<String> {
        let element = self.element(handle)?;
        let raw: String = element.text().collect();
        Some(raw.split_whitespace().collect::<Vec<_>>().join(" "))
    }

    pub fn attr(&self, handle: ElementHandle, name: &str) -> Option<String> {
        let element = self.element(handle)?;
        if let Some(overridden) = self
            .overlays
            .get(&handle.node)
            .and_then(|overlay| overlay.attrs.get(name))
        {
            return overridden.clone();
        }
        element.value().attr(name).map(str::to_owned)
    }

    pub fn set_attr(&mut self, handle: ElementHandle, name: &str, value: &str) -> bool {
        self.with_overlay(handle, |overlay| {
            overlay
                .attrs
                .insert(name.to_owned(), Some(value.to_owned()));
        })
    }

    pub fn remove_attr(&mut self, handle: ElementHandle, name: &str) -> bool {
        self.with_overlay(handle, |overlay| {
            overlay.attrs.insert(name.to_owned(), None);
        })
    }

    pub fn has_class(&self, handle: ElementHandle, class: &str) -> bool {
        let Some(element) = self.element(handle) else {
            return false;
        };
        if let Some(overlay) = self.overlays.get(&handle.node) {
            if overlay.removed_classes.contains(class) {
                return false;
            }
            if overlay.added_classes.contains(class) {
                return true;
            }
        }
        element.value().classes().any(|c| c == class)
    }

    pub fn add_class(&mut self, handle: ElementHandle, class: &str) -> bool {
        self.with_overlay(handle, |overlay| {
            overlay.removed_classes.remove(class);
            overlay.added_classes.insert(class.to_owned());
        })
    }

    pub fn remove_class(&mut self, handle: ElementHandle, class: &str) -> bool {
        self.with_overlay(handle, |overlay| {
            overlay.added_classes.remove(class);
            overlay.removed_classes.insert(class.to_owned());
        })
    }

    /// Sets an inline style property. An empty value clears it.
    pub fn set_style(&mut self, handle: ElementHandle, property: &str, value: &str) -> bool {
        self.with_overlay(handle, |overlay| {
            if value.is_empty() {
                overlay.styles.remove(property);
            } else {
                overlay
                    .styles
                    .insert(property.to_owned(), value.to_owned());
            }
        })
    }

    pub fn style(&self, handle: ElementHandle, property: &str) -> Option<&str> {
        if !self.is_live(handle) {
            return None;
        }
        self.overlays
            .get(&handle.node)?
            .styles
            .get(property)
            .map(String::as_str)
    }

    pub fn next_element_sibling(&self, handle: ElementHandle) -> Option<ElementHandle> {
        let element = self.element(handle)?;
        element
            .next_siblings()
            .find_map(ElementRef::wrap)
            .map(|sibling| self.handle_of(sibling))
    }

    /// Elements the filter has written to, in document order.
    pub fn touched_elements(&self) -> Vec<ElementHandle> {
        if self.overlays.is_empty() {
            return Vec::new();
        }
        // Tree traversal order is document order.
        self.html
            .tree
            .root()
            .descendants()
            .filter(|node| self.overlays.contains_key(&node.id()))
            .map(|node| ElementHandle {
                node: node.id(),
                revision: self.revision,
            })
            .collect()
    }

    /// Drops every mutation on the element, restoring the host page's own attributes.
    pub fn clear_overlay(&mut self, handle: ElementHandle) -> bool {
        if !self.is_live(handle) {
            return false;
        }
        self.overlays.remove(&handle.node);
        true
    }

    pub fn push_notice(&mut self, text: impl Into<String>) -> NoticeId {
        let id = self.next_notice;
        self.next_notice += 1;
        self.notices.push((id, text.into()));
        id
    }

    pub fn remove_notice(&mut self, id: NoticeId) {
        self.notices.retain(|(notice_id, _)| *notice_id != id);
    }

    pub fn notices(&self) -> impl Iterator<Item = &str> {
        self.notices.iter().map(|(_, text)| text.as_str())
    }

    fn element(&self, handle: ElementHandle) -> Option<ElementRef<'_>> {
        if handle.revision != self.revision {
            return None;
        }
        self.html.tree.get(handle.node).and_then(ElementRef::wrap)
    }

    fn handle_of(&self, element: ElementRef<'_>) -> ElementHandle {
        ElementHandle {
            node: element.id(),
            revision: self.revision,
        }
    }

    fn with_overlay(&mut self, handle: ElementHandle, apply: impl FnOnce(&mut Overlay)) -> bool {
        if !self.is_live(handle) {
            return false;
        }
        apply(self.overlays.entry(handle.node).or_default());
        true
    }
}
