//! Ordered history of detected question/answer pairs with a navigation
//! cursor.
//!
//! The store owns the dedup and placeholder rules: every path that adds
//! content, including the missed-response backstop, funnels through
//! [`ResponseStore::record_or_update`]. Records keep their own text and
//! markup caches so history stays readable after the page moves on.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::classify::{
    self, ChangeReport, DISTINCT_RESPONSE_SIMILARITY, SAME_RESPONSE_SIMILARITY,
};
use crate::error::EngineError;
use crate::locator::{self, ContentRole};
use crate::page::{element_text, ElementHit, PageSnapshot, TrackedElement};
use crate::platform::PlatformProfile;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

/// Summaries never exceed this length, ellipsis included.
const SUMMARY_MAX_LEN: usize = 100;

#[derive(Debug, Clone)]
pub struct ResponseRecord {
    pub id: Uuid,
    pub answer: TrackedElement,
    pub question: Option<TrackedElement>,
    pub created_at: DateTime<Utc>,
    pub summary: String,
    pub full_text: String,
    pub is_complete: bool,
    pub is_placeholder: bool,
    pub sequence_index: usize,
}

/// What `record_or_update` did with a sighting.
#[derive(Debug)]
pub enum Upsert {
    Created { index: usize },
    Updated { index: usize, change: ChangeReport },
    /// Placeholder noise against a non-empty history.
    Ignored,
}

pub struct ResponseStore {
    records: Vec<ResponseRecord>,
    /// Index of the record shown in the panel, -1 when empty.
    cursor: isize,
}

impl Default for ResponseStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseStore {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            cursor: -1,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn cursor(&self) -> isize {
        self.cursor
    }

    pub fn records(&self) -> &[ResponseRecord] {
        &self.records
    }

    pub fn latest(&self) -> Option<&ResponseRecord> {
        self.records.last()
    }

    /// The record the cursor points at.
    pub fn current(&self) -> Option<&ResponseRecord> {
        usize::try_from(self.cursor)
            .ok()
            .and_then(|i| self.records.get(i))
    }

    /// Fold a located answer (and its question, when found) into history.
    ///
    /// The latest record wins all comparisons: a sighting of the same
    /// element updates it in place, near-identical text in a different
    /// element retargets it, and a reused element whose finished text got
    /// swapped for something unrelated starts a new record.
    pub fn record_or_update(
        &mut self,
        snap: &PageSnapshot,
        answer: &ElementHit,
        question: Option<&ElementHit>,
        profile: &PlatformProfile,
        generating: bool,
    ) -> Upsert {
        let content = locator::extract_content(profile, answer.element, ContentRole::Answer);
        let text = element_text(&content);
        let markup = content.html();
        let placeholder = classify::is_placeholder_content(&text);

        if let Some(index) = self.records.len().checked_sub(1) {
            let same_element = self.records[index]
                .answer
                .resolve(snap)
                .is_some_and(|el| el.id() == answer.element.id());

            if same_element {
                let latest = &self.records[index];
                if placeholder && !latest.is_placeholder {
                    // The node flashed back to "working on it" text;
                    // keep what we already captured.
                    return Upsert::Ignored;
                }
                if text == latest.full_text && markup == latest.answer.last_markup {
                    // Identical content is a sighting, not an update.
                    let record = &mut self.records[index];
                    if record.question.is_none() {
                        record.question = question.map(|q| capture_question(profile, q));
                    }
                    return Upsert::Ignored;
                }
                let similarity = classify::content_similarity(&latest.full_text, &text);
                if latest.is_complete && similarity < DISTINCT_RESPONSE_SIMILARITY && !placeholder
                {
                    log_debug!(
                        "element reused for new content (similarity {similarity:.2}), appending"
                    );
                    return self.append(answer, question, profile, generating, text, markup);
                }
                let record = &mut self.records[index];
                let change = apply_text(record, &text, profile, generating);
                record.answer.refresh(text, markup);
                if record.question.is_none() {
                    record.question = question.map(|q| capture_question(profile, q));
                }
                return Upsert::Updated { index, change };
            }

            let similarity = classify::content_similarity(&self.records[index].full_text, &text);
            if similarity >= SAME_RESPONSE_SIMILARITY {
                log_debug!("same response re-rendered elsewhere (similarity {similarity:.2})");
                let record = &mut self.records[index];
                let change = apply_text(record, &text, profile, generating);
                record.answer.retarget(answer, text, markup);
                return Upsert::Updated { index, change };
            }
        }

        if placeholder && !self.records.is_empty() {
            return Upsert::Ignored;
        }

        self.append(answer, question, profile, generating, text, markup)
    }

    fn append(
        &mut self,
        answer: &ElementHit,
        question: Option<&ElementHit>,
        profile: &PlatformProfile,
        generating: bool,
        text: String,
        markup: String,
    ) -> Upsert {
        let index = self.records.len();
        let record = ResponseRecord {
            id: Uuid::new_v4(),
            answer: TrackedElement::from_hit(answer, text.clone(), markup),
            question: question.map(|q| capture_question(profile, q)),
            created_at: Utc::now(),
            summary: truncate_summary(&text),
            is_complete: classify::is_complete_response(&text, profile, generating),
            is_placeholder: classify::is_placeholder_content(&text),
            full_text: text,
            sequence_index: index,
        };
        log_info!(
            "recorded response #{} ({} chars)",
            index + 1,
            record.full_text.chars().count()
        );
        self.records.push(record);
        self.cursor = index as isize;
        Upsert::Created { index }
    }

    /// Move the cursor. Out-of-range indices leave it untouched.
    pub fn navigate(&mut self, index: isize) -> Result<&ResponseRecord, EngineError> {
        let valid = usize::try_from(index)
            .ok()
            .and_then(|i| self.records.get(i))
            .is_some();
        if !valid {
            return Err(EngineError::OutOfRange {
                index,
                len: self.records.len(),
            });
        }
        self.cursor = index;
        Ok(&self.records[index as usize])
    }

    pub fn clear(&mut self) {
        if !self.records.is_empty() {
            log_info!("cleared {} tracked responses", self.records.len());
        }
        self.records.clear();
        self.cursor = -1;
    }

    /// Drop records whose element is gone from the page, trying a
    /// text-based re-location first. Returns how many were dropped.
    pub fn reconcile_with_dom(&mut self, snap: &PageSnapshot) -> usize {
        let before = self.records.len();
        self.records
            .retain_mut(|record| record.answer.relocate(snap).is_some());
        let dropped = before - self.records.len();
        if dropped > 0 {
            for (index, record) in self.records.iter_mut().enumerate() {
                record.sequence_index = index;
            }
            let len = self.records.len() as isize;
            if self.cursor >= len {
                self.cursor = len - 1;
            }
            log_debug!("dropped {dropped} stale records during reconcile");
        }
        dropped
    }

    /// Backstop for answers that appeared between scans (scrolled-in
    /// history, multiple turns landing at once). Appends unknown
    /// qualifying answers in document order, each through the normal
    /// dedup and placeholder rules.
    pub fn detect_missed_responses(
        &mut self,
        snap: &PageSnapshot,
        hits: &[ElementHit],
        profile: &PlatformProfile,
        generating: bool,
    ) -> usize {
        if !profile.track_missed || hits.len() <= self.records.len() {
            return 0;
        }

        let known: HashSet<_> = self
            .records
            .iter()
            .filter_map(|r| r.answer.resolve(snap).map(|el| el.id()))
            .collect();

        let mut appended = 0;
        for hit in hits {
            if known.contains(&hit.element.id()) {
                continue;
            }
            let question = locator::find_corresponding_question(profile, snap, hit);
            if let Upsert::Created { .. } =
                self.record_or_update(snap, hit, question.as_ref(), profile, generating)
            {
                appended += 1;
            }
        }
        if appended > 0 {
            log_info!("backfilled {appended} missed responses");
        }
        appended
    }
}

fn apply_text(
    record: &mut ResponseRecord,
    text: &str,
    profile: &PlatformProfile,
    generating: bool,
) -> ChangeReport {
    let change = classify::classify(&record.full_text, text, profile, generating);
    record.summary = truncate_summary(text);
    record.full_text = text.to_string();
    record.is_complete = change.complete;
    record.is_placeholder = classify::is_placeholder_content(text);
    change
}

fn capture_question(profile: &PlatformProfile, hit: &ElementHit) -> TrackedElement {
    let content = locator::extract_content(profile, hit.element, ContentRole::Question);
    TrackedElement::from_hit(hit, element_text(&content), content.html())
}

fn truncate_summary(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= SUMMARY_MAX_LEN {
        return text.to_string();
    }
    let head: String = chars[..SUMMARY_MAX_LEN - 3].iter().collect();
    format!("{head}...")
}
