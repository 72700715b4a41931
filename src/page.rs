//! Parsed page snapshots and element observation handles.
//!
//! The engine never works against the live document. Each pass parses the
//! tab's HTML into a [`PageSnapshot`], and everything that must survive
//! between passes is carried as a [`TrackedElement`]: the selector that
//! found the node, its match index, and cached text/markup. Re-resolution
//! happens lazily on access; a handle that stops resolving is repaired by
//! text match or dropped.

use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html, Selector};

/// Length of the cached text prefix used to re-identify an element after
/// its match index shifted.
const HEAD_LEN: usize = 40;

pub struct PageSnapshot {
    url: String,
    captured_at: DateTime<Utc>,
    doc: Html,
}

impl PageSnapshot {
    pub fn new(url: impl Into<String>, html: &str) -> Self {
        Self {
            url: url.into(),
            captured_at: Utc::now(),
            doc: Html::parse_document(html),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn doc(&self) -> &Html {
        &self.doc
    }

    pub fn host(&self) -> Option<String> {
        let parsed = url::Url::parse(&self.url).ok()?;
        parsed.host_str().map(str::to_string)
    }
}

/// An element found by the locator, together with the selector chain entry
/// that produced it. The selector/index pair is what makes the sighting
/// trackable across snapshots.
#[derive(Clone, Copy)]
pub struct ElementHit<'a> {
    pub element: ElementRef<'a>,
    pub selector: &'static str,
    pub index: usize,
}

impl<'a> ElementHit<'a> {
    pub fn text(&self) -> String {
        element_text(&self.element)
    }

    pub fn markup(&self) -> String {
        self.element.html()
    }
}

/// Whole-subtree text with whitespace runs collapsed, so markup
/// reformatting does not register as a content change.
pub fn element_text(el: &ElementRef) -> String {
    let mut out = String::new();
    for chunk in el.text() {
        for word in chunk.split_whitespace() {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(word);
        }
    }
    out
}

/// Observation handle for a node the engine keeps coming back to. Purely
/// positional: the document owns the node, this only remembers how it was
/// found plus what it last contained.
#[derive(Debug, Clone)]
pub struct TrackedElement {
    selector: &'static str,
    index: usize,
    pub last_text: String,
    pub last_markup: String,
}

impl TrackedElement {
    pub fn from_hit(hit: &ElementHit, text: String, markup: String) -> Self {
        Self {
            selector: hit.selector,
            index: hit.index,
            last_text: text,
            last_markup: markup,
        }
    }

    pub fn selector(&self) -> &'static str {
        self.selector
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn refresh(&mut self, text: String, markup: String) {
        self.last_text = text;
        self.last_markup = markup;
    }

    /// Point this handle at a different node.
    pub fn retarget(&mut self, hit: &ElementHit, text: String, markup: String) {
        self.selector = hit.selector;
        self.index = hit.index;
        self.last_text = text;
        self.last_markup = markup;
    }

    /// Strict re-resolution: the same selector must still yield a match at
    /// the same index. Content is not checked here; deciding what a
    /// content change means is the classifier's job.
    pub fn resolve<'a>(&self, snap: &'a PageSnapshot) -> Option<ElementRef<'a>> {
        let selector = Selector::parse(self.selector).ok()?;
        snap.doc().select(&selector).nth(self.index)
    }

    /// Re-resolution with self-repair: if the index no longer lines up,
    /// scan the selector's matches for one that still carries the cached
    /// text head and adopt its position.
    pub fn relocate<'a>(&mut self, snap: &'a PageSnapshot) -> Option<ElementRef<'a>> {
        if let Some(el) = self.resolve(snap) {
            return Some(el);
        }
        if self.last_text.is_empty() {
            return None;
        }
        let selector = Selector::parse(self.selector).ok()?;
        let head = text_head(&self.last_text);
        for (index, el) in snap.doc().select(&selector).enumerate() {
            if normalize(&element_text(&el)).contains(&head) {
                self.index = index;
                return Some(el);
            }
        }
        None
    }
}

fn normalize(text: &str) -> String {
    text.to_lowercase()
}

fn text_head(text: &str) -> String {
    normalize(text).chars().take(HEAD_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit_for<'a>(
        snap: &'a PageSnapshot,
        selector: &'static str,
        index: usize,
    ) -> ElementHit<'a> {
        let parsed = Selector::parse(selector).unwrap();
        ElementHit {
            element: snap.doc().select(&parsed).nth(index).unwrap(),
            selector,
            index,
        }
    }

    #[test]
    fn text_is_whitespace_collapsed() {
        let snap = PageSnapshot::new(
            "https://chatgpt.com/c/1",
            "<div class=\"msg\">  Hello,\n   <b>world</b>. </div>",
        );
        let hit = hit_for(&snap, ".msg", 0);
        assert_eq!(hit.text(), "Hello, world.");
    }

    #[test]
    fn resolves_same_position_in_a_later_snapshot() {
        let snap_a = PageSnapshot::new(
            "https://chatgpt.com/c/1",
            "<div class=\"msg\">first answer text</div><div class=\"msg\">second answer text</div>",
        );
        let hit = hit_for(&snap_a, ".msg", 1);
        let tracked = TrackedElement::from_hit(&hit, hit.text(), hit.markup());

        let snap_b = PageSnapshot::new(
            "https://chatgpt.com/c/1",
            "<div class=\"msg\">first answer text</div><div class=\"msg\">second answer text grew</div>",
        );
        let el = tracked.resolve(&snap_b).unwrap();
        assert_eq!(element_text(&el), "second answer text grew");
    }

    #[test]
    fn relocates_by_text_head_when_index_shifts() {
        let snap_a = PageSnapshot::new(
            "https://chatgpt.com/c/1",
            "<p class=\"m\">alpha</p><p class=\"m\">the tracked answer body</p>",
        );
        let hit = hit_for(&snap_a, ".m", 1);
        let mut tracked = TrackedElement::from_hit(&hit, hit.text(), hit.markup());

        // First paragraph disappeared; the tracked node slid to index 0.
        let snap_b = PageSnapshot::new(
            "https://chatgpt.com/c/1",
            "<p class=\"m\">The tracked answer body, still here.</p>",
        );
        let el = tracked.relocate(&snap_b).unwrap();
        assert!(element_text(&el).starts_with("The tracked"));
        assert_eq!(tracked.index(), 0);
    }

    #[test]
    fn relocate_gives_up_when_text_is_gone() {
        let snap_a =
            PageSnapshot::new("https://chatgpt.com/c/1", "<p class=\"m\">old answer body</p>");
        let hit = hit_for(&snap_a, ".m", 0);
        let mut tracked = TrackedElement::from_hit(&hit, hit.text(), hit.markup());

        let snap_b = PageSnapshot::new("https://chatgpt.com/c/1", "<div>nothing matching</div>");
        assert!(tracked.relocate(&snap_b).is_none());
    }

    #[test]
    fn snapshot_host() {
        let snap = PageSnapshot::new("https://gemini.google.com/app", "<html></html>");
        assert_eq!(snap.host().as_deref(), Some("gemini.google.com"));
    }
}
