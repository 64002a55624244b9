use filter_core::VisualState;

use crate::page::{ElementHandle, PageDocument};
use crate::types::ExtractedItem;

/// Machine-readable state attribute written on every primary container.
pub const STATE_ATTR: &str = "data-gf-state";

const CLASS_WAITING: &str = "gf-waiting";
const CLASS_BLOCKED: &str = "gf-blocked";
const CLASS_ALLOWED: &str = "gf-allowed";

const LABEL_PROCESSING: &str = "Processing:";
const LABEL_BLOCKED: &str = "Blocked:";
const LABEL_ALLOWED: &str = "Allowed:";

/// Inline style values used for the three presentation states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisualEffects {
    pub blur_radius: String,
    pub grayscale: String,
    pub brightness: String,
    pub waiting_opacity: String,
    pub blocked_opacity: String,
}

impl Default for VisualEffects {
    fn default() -> Self {
        Self {
            blur_radius: "6px".into(),
            grayscale: "100%".into(),
            brightness: "0.2".into(),
            waiting_opacity: "0.8".into(),
            blocked_opacity: "0.2".into(),
        }
    }
}

impl VisualEffects {
    fn filter(&self) -> String {
        format!(
            "blur({}) grayscale({}) brightness({})",
            self.blur_radius, self.grayscale, self.brightness
        )
    }
}

/// Applies waiting/blocked/allowed treatment to item groups.
///
/// Every command returns `false` when the item's container no longer exists in
/// the current document revision; nothing is written in that case.
#[derive(Debug, Clone, Default)]
pub struct VisualStateMachine {
    effects: VisualEffects,
}

impl VisualStateMachine {
    pub fn new(effects: VisualEffects) -> Self {
        Self { effects }
    }

    pub fn effects(&self) -> &VisualEffects {
        &self.effects
    }

    pub fn apply(&self, page: &mut PageDocument, item: &ExtractedItem, state: VisualState) -> bool {
        match state {
            VisualState::Waiting => self.mark_waiting(page, item),
            VisualState::Blocked => self.mark_blocked(page, item),
            VisualState::Allowed => self.mark_allowed(page, item),
        }
    }

    pub fn mark_waiting(&self, page: &mut PageDocument, item: &ExtractedItem) -> bool {
        if !page.is_live(item.container) {
            return false;
        }
        if page.has_class(item.container, CLASS_WAITING) {
            return true;
        }

        let filter = self.effects.filter();
        for element in live_group(page, item) {
            // Never soften a treatment that is already stronger.
            if page.style(element, "filter").is_none() {
                page.set_style(element, "filter", &filter);
                page.set_style(element, "opacity", &self.effects.waiting_opacity);
                page.set_style(element, "pointer-events", "none");
            }
        }
        self.label(
            page,
            item.container,
            VisualState::Waiting,
            &format!("{LABEL_PROCESSING} {}", item.title),
        );
        true
    }

    pub fn mark_blocked(&self, page: &mut PageDocument, item: &ExtractedItem) -> bool {
        if !page.is_live(item.container) {
            return false;
        }
        let filter = self.effects.filter();
        for element in live_group(page, item) {
            page.set_style(element, "filter", &filter);
            page.set_style(element, "opacity", &self.effects.blocked_opacity);
            page.set_style(element, "pointer-events", "none");
        }
        self.label(
            page,
            item.container,
            VisualState::Blocked,
            &format!("{LABEL_BLOCKED} {}", item.title),
        );
        true
    }

    pub fn mark_allowed(&self, page: &mut PageDocument, item: &ExtractedItem) -> bool {
        if !page.is_live(item.container) {
            return false;
        }
        for element in live_group(page, item) {
            page.set_style(element, "filter", "");
            page.set_style(element, "opacity", "");
            page.set_style(element, "pointer-events", "");
        }
        self.label(
            page,
            item.container,
            VisualState::Allowed,
            &format!("{LABEL_ALLOWED} Element kept"),
        );
        true
    }

    /// Removes every treatment from the page. Returns how many elements were restored.
    pub fn clear_all(&self, page: &mut PageDocument) -> usize {
        let touched = page.touched_elements();
        touched
            .into_iter()
            .filter(|element| page.clear_overlay(*element))
            .count()
    }

    pub fn state_of(page: &PageDocument, container: ElementHandle) -> Option<VisualState> {
        page.attr(container, STATE_ATTR)
            .and_then(|raw| VisualState::parse(&raw))
    }

    fn label(&self, page: &mut PageDocument, container: ElementHandle, state: VisualState, text: &str) {
        let (add, remove) = match state {
            VisualState::Waiting => (CLASS_WAITING, [CLASS_BLOCKED, CLASS_ALLOWED]),
            VisualState::Blocked => (CLASS_BLOCKED, [CLASS_WAITING, CLASS_ALLOWED]),
            VisualState::Allowed => (CLASS_ALLOWED, [CLASS_WAITING, CLASS_BLOCKED]),
        };
        for class in remove {
            page.remove_class(container, class);
        }
        page.add_class(container, add);
        page.set_attr(container, STATE_ATTR, state.as_str());
        page.set_attr(container, "title", text);
    }
}

fn live_group(page: &PageDocument, item: &ExtractedItem) -> Vec<ElementHandle> {
    item.group
        .iter()
        .copied()
        .filter(|element| page.is_live(*element))
        .collect()
}
