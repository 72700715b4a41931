//! Render model and event stream for the floating-panel side of things.
//!
//! The engine never touches live page markup: records carry cloned
//! markup strings, and the sanitizer here works on a locally parsed copy
//! before anything reaches a display surface.

use chrono::{DateTime, Utc};
use scraper::{Html, Node, Selector};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::error::EngineError;
use crate::platform::Platform;
use crate::store::ResponseRecord;
use crate::watcher::SessionPhase;

/// Display surfaces that lag behind simply drop old events.
const EVENT_BUFFER: usize = 32;

/// Elements removed wholesale from rendered clones.
const STRIPPED_ELEMENTS: &str =
    "script, style, button, svg, input, textarea, select, iframe, audio, video, \
     .copy-button, .edit-button";

/// A cleaned, display-ready rendering of one record.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordView {
    pub platform: Platform,
    /// 1-based position in the history.
    pub sequence: usize,
    pub total: usize,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question_html: Option<String>,
    pub answer_html: String,
    pub answer_text: String,
    pub is_complete: bool,
    pub is_placeholder: bool,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum PanelEvent {
    Record {
        view: RecordView,
    },
    /// Recoverable display problem; the panel offers a retry.
    Error {
        message: String,
        retriable: bool,
    },
    Cleared,
    Status {
        enabled: bool,
        platform: Option<Platform>,
        phase: SessionPhase,
    },
}

/// Broadcast sender for panel events. Cheap to clone; sending with no
/// subscribers is fine.
#[derive(Clone)]
pub struct PanelSink {
    tx: broadcast::Sender<PanelEvent>,
}

impl Default for PanelSink {
    fn default() -> Self {
        Self::new()
    }
}

impl PanelSink {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUFFER);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PanelEvent> {
        self.tx.subscribe()
    }

    pub fn send(&self, event: PanelEvent) {
        let _ = self.tx.send(event);
    }

    pub fn error(&self, message: impl Into<String>, retriable: bool) {
        self.send(PanelEvent::Error {
            message: message.into(),
            retriable,
        });
    }
}

/// Build the display view for one record.
pub fn render_record(
    record: &ResponseRecord,
    platform: Platform,
    total: usize,
) -> Result<RecordView, EngineError> {
    if record.full_text.trim().is_empty() && record.answer.last_markup.trim().is_empty() {
        return Err(EngineError::RenderFailure(
            "record holds neither text nor markup".to_string(),
        ));
    }

    Ok(RecordView {
        platform,
        sequence: record.sequence_index + 1,
        total,
        summary: record.summary.clone(),
        question_html: record
            .question
            .as_ref()
            .map(|q| sanitize_markup(&q.last_markup)),
        answer_html: sanitize_markup(&record.answer.last_markup),
        answer_text: record.full_text.clone(),
        is_complete: record.is_complete,
        is_placeholder: record.is_placeholder,
        captured_at: record.created_at,
    })
}

/// Strip scripts, styles and interactive controls from cloned markup,
/// drop event-handler attributes everywhere, and drop fixed sizing from
/// images so the panel can scale them.
pub fn sanitize_markup(markup: &str) -> String {
    let mut fragment = Html::parse_fragment(markup);

    if let Ok(selector) = Selector::parse(STRIPPED_ELEMENTS) {
        let doomed: Vec<_> = fragment.select(&selector).map(|el| el.id()).collect();
        for id in doomed {
            if let Some(mut node) = fragment.tree.get_mut(id) {
                node.detach();
            }
        }
    }

    let elements: Vec<_> = fragment
        .root_element()
        .descendants()
        .filter(|node| node.value().is_element())
        .map(|node| node.id())
        .collect();
    for id in elements {
        if let Some(mut node) = fragment.tree.get_mut(id) {
            if let Node::Element(el) = node.value() {
                let is_image = el.name() == "img";
                el.attrs.retain(|name, _| {
                    let attr = name.local.as_ref();
                    if attr.starts_with("on") {
                        return false;
                    }
                    !(is_image && (attr == "width" || attr == "height"))
                });
            }
        }
    }

    fragment.root_element().inner_html()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locator::{self, latest_answer};
    use crate::page::PageSnapshot;
    use crate::platform::profile_for;
    use crate::store::ResponseStore;

    #[test]
    fn sanitizer_strips_interactive_elements() {
        let cleaned = sanitize_markup(
            r#"<div>Keep this text<button class="copy">copy</button><script>alert(1)</script><svg><path d="m"/></svg></div>"#,
        );
        assert!(cleaned.contains("Keep this text"));
        assert!(!cleaned.contains("<button"));
        assert!(!cleaned.contains("<script"));
        assert!(!cleaned.contains("<svg"));
    }

    #[test]
    fn sanitizer_strips_handlers_and_image_sizing() {
        let cleaned = sanitize_markup(
            r#"<div onclick="steal()"><img src="x.png" width="800" height="600" alt="diagram"></div>"#,
        );
        assert!(!cleaned.contains("onclick"));
        assert!(!cleaned.contains("width"));
        assert!(!cleaned.contains("height"));
        assert!(cleaned.contains(r#"src="x.png""#));
        assert!(cleaned.contains("alt"));
    }

    #[test]
    fn sanitizer_removes_platform_buttons_by_class() {
        let cleaned = sanitize_markup(
            r#"<div><span class="copy-button">copy</span><p>The answer body.</p></div>"#,
        );
        assert!(!cleaned.contains("copy-button"));
        assert!(cleaned.contains("The answer body."));
    }

    #[test]
    fn rendering_a_tracked_record() {
        let snap = PageSnapshot::new(
            "https://chatgpt.com/c/1",
            r#"<div data-message-author-role="user">What is the capital of France?</div>
               <div data-message-author-role="assistant"><div class="markdown">The capital of France is Paris.<button aria-label="Copy"></button></div></div>"#,
        );
        let profile = profile_for("chatgpt.com").unwrap();
        let answer = latest_answer(profile, &snap).unwrap();
        let question = locator::find_corresponding_question(profile, &snap, &answer);
        let mut store = ResponseStore::new();
        store.record_or_update(&snap, &answer, question.as_ref(), profile, false);

        let view = render_record(store.latest().unwrap(), Platform::Chatgpt, store.len()).unwrap();
        assert_eq!(view.sequence, 1);
        assert_eq!(view.total, 1);
        assert!(view.is_complete);
        assert!(view.answer_html.contains("Paris"));
        assert!(!view.answer_html.contains("<button"));
        assert!(view.question_html.unwrap().contains("capital of France"));
    }

    #[test]
    fn empty_records_fail_to_render() {
        let snap = PageSnapshot::new(
            "https://chatgpt.com/c/1",
            r#"<div data-message-author-role="assistant">The capital of France is Paris.</div>"#,
        );
        let profile = profile_for("chatgpt.com").unwrap();
        let answer = latest_answer(profile, &snap).unwrap();
        let mut store = ResponseStore::new();
        store.record_or_update(&snap, &answer, None, profile, false);

        let mut record = store.latest().unwrap().clone();
        record.full_text = String::new();
        record.answer.refresh(String::new(), String::new());
        let err = render_record(&record, Platform::Chatgpt, 1).unwrap_err();
        assert!(matches!(err, EngineError::RenderFailure(_)));
    }

    #[test]
    fn panel_events_serialize_with_an_event_tag() {
        let event = PanelEvent::Error {
            message: "render hiccup".to_string(),
            retriable: true,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "error");
        assert_eq!(json["retriable"], true);

        let json = serde_json::to_value(&PanelEvent::Cleared).unwrap();
        assert_eq!(json["event"], "cleared");
    }

    #[test]
    fn sending_without_subscribers_is_harmless() {
        let sink = PanelSink::new();
        sink.send(PanelEvent::Cleared);
        sink.error("nobody listening", false);

        let mut rx = sink.subscribe();
        sink.send(PanelEvent::Cleared);
        assert!(matches!(rx.try_recv(), Ok(PanelEvent::Cleared)));
    }
}
