//! Selector-chain resolution against a page snapshot.
//!
//! Chains are first-match-wins: the first selector that yields at least
//! one element decides the candidate set, and results are never merged
//! across selectors. Unparseable selectors count as a miss so the rest of
//! the chain still gets its chance; several profile entries use syntax
//! (`:has`) that not every engine accepts, and that is expected.

use std::collections::HashMap;

use scraper::{ElementRef, Selector};

use crate::error::EngineError;
use crate::page::{element_text, ElementHit, PageSnapshot};
use crate::platform::{PlatformProfile, QuestionFallback, GENERIC_ANSWER_FALLBACKS};

const ENABLE_LOGS: bool = true;

use crate::log_debug;

/// Upper bound for "short-text" question shape scoring.
const QUESTION_SHAPE_MAX_LEN: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentRole {
    Question,
    Answer,
}

/// Run one selector. A parse failure is reported as a miss, not a panic;
/// zero matches is simply an empty list.
pub fn try_selector<'a>(
    snap: &'a PageSnapshot,
    selector: &str,
) -> Result<Vec<ElementRef<'a>>, EngineError> {
    let parsed = Selector::parse(selector).map_err(|err| EngineError::SelectorMiss {
        selector: selector.to_string(),
        reason: err.to_string(),
    })?;
    Ok(snap.doc().select(&parsed).collect())
}

/// First selector in the list with at least one match surviving `keep`.
/// Hit indices refer to the selector's raw match list so handles resolve
/// consistently later.
fn first_match<'a>(
    snap: &'a PageSnapshot,
    selectors: &'static [&'static str],
    keep: impl Fn(&ElementRef<'a>) -> bool,
) -> Option<Vec<ElementHit<'a>>> {
    for selector in selectors {
        let matches = match try_selector(snap, selector) {
            Ok(matches) => matches,
            Err(err) => {
                log_debug!("{err}");
                continue;
            }
        };
        if matches.is_empty() {
            continue;
        }
        let hits: Vec<ElementHit<'a>> = matches
            .into_iter()
            .enumerate()
            .filter(|(_, el)| keep(el))
            .map(|(index, element)| ElementHit {
                element,
                selector,
                index,
            })
            .collect();
        if !hits.is_empty() {
            return Some(hits);
        }
    }
    None
}

/// Best-matching conversation container, falling back to the document
/// root when no container selector matches.
pub fn find_container<'a>(profile: &PlatformProfile, snap: &'a PageSnapshot) -> ElementRef<'a> {
    for selector in profile.container_selectors {
        match try_selector(snap, selector) {
            Ok(matches) => {
                if let Some(el) = matches.into_iter().next() {
                    return el;
                }
            }
            Err(err) => log_debug!("{err}"),
        }
    }
    snap.doc().root_element()
}

/// All qualifying answer candidates in document order: primary chain,
/// then platform fallbacks, then the generic list, with the platform's
/// minimum-text filter applied to the winning set.
pub fn find_answer_elements<'a>(
    profile: &PlatformProfile,
    snap: &'a PageSnapshot,
) -> Vec<ElementHit<'a>> {
    let candidates = first_match(snap, profile.answer_selectors, |_| true)
        .or_else(|| {
            first_match(snap, profile.answer_fallbacks, |el| {
                // Fallback selectors are broad enough to pick up user
                // turns; those are recognizable by their testid.
                el.value().attr("data-testid") != Some("user-message")
            })
        })
        .or_else(|| first_match(snap, GENERIC_ANSWER_FALLBACKS, |_| true));

    let Some(hits) = candidates else {
        return Vec::new();
    };

    hits.into_iter()
        .filter(|hit| hit.text().len() > profile.min_answer_len)
        .collect()
}

/// The latest answer is the last qualifying candidate in document order;
/// conversation DOMs append new turns.
pub fn latest_answer<'a>(
    profile: &PlatformProfile,
    snap: &'a PageSnapshot,
) -> Option<ElementHit<'a>> {
    find_answer_elements(profile, snap).into_iter().last()
}

pub fn find_question_elements<'a>(
    profile: &PlatformProfile,
    snap: &'a PageSnapshot,
) -> Vec<ElementHit<'a>> {
    first_match(snap, profile.question_selectors, |_| true).unwrap_or_default()
}

/// Locate the question an answer responds to. `None` is a degraded
/// display, not an error.
///
/// Strategy order: previous siblings of the answer, then the closest
/// preceding candidate in document order, then whatever last resort the
/// profile configures.
pub fn find_corresponding_question<'a>(
    profile: &PlatformProfile,
    snap: &'a PageSnapshot,
    answer: &ElementHit<'a>,
) -> Option<ElementHit<'a>> {
    let candidates = find_question_elements(profile, snap);
    if candidates.is_empty() {
        return None;
    }

    let mut sibling = *answer.element;
    while let Some(prev) = sibling.prev_siblings().find_map(|n| ElementRef::wrap(n)) {
        if let Some(hit) = candidates.iter().find(|c| c.element.id() == prev.id()) {
            return Some(*hit);
        }
        sibling = *prev;
    }

    let order: HashMap<_, _> = snap
        .doc()
        .root_element()
        .descendants()
        .enumerate()
        .map(|(position, node)| (node.id(), position))
        .collect();
    let answer_pos = order.get(&answer.element.id()).copied()?;

    match profile.question_fallback {
        QuestionFallback::InterrogativeScore => {
            // Broad selectors over-match on this platform; keep only
            // question-shaped candidates before taking the nearest
            // preceding one.
            candidates
                .iter()
                .filter(|c| looks_like_question(&c.text()))
                .filter_map(|c| Some((*c, *order.get(&c.element.id())?)))
                .filter(|(_, pos)| *pos < answer_pos)
                .max_by_key(|(_, pos)| *pos)
                .map(|(hit, _)| hit)
        }
        _ => {
            let preceding = candidates
                .iter()
                .filter_map(|c| Some((*c, *order.get(&c.element.id())?)))
                .filter(|(_, pos)| *pos < answer_pos)
                .max_by_key(|(_, pos)| *pos)
                .map(|(hit, _)| hit);
            match (preceding, profile.question_fallback) {
                (Some(hit), _) => Some(hit),
                (None, QuestionFallback::LastCandidate) => candidates.last().copied(),
                (None, _) => None,
            }
        }
    }
}

fn looks_like_question(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return false;
    }
    trimmed.ends_with('?') || trimmed.len() < QUESTION_SHAPE_MAX_LEN
}

/// Whether the platform is still producing output.
pub fn detect_generation(profile: &PlatformProfile, snap: &PageSnapshot) -> bool {
    for selector in profile.generation_indicators {
        match try_selector(snap, selector) {
            Ok(matches) if !matches.is_empty() => return true,
            Ok(_) => {}
            Err(err) => log_debug!("{err}"),
        }
    }
    false
}

/// Narrow an answer/question element to its renderable content. Falls
/// back to the element itself when nothing narrower qualifies.
pub fn extract_content<'a>(
    profile: &PlatformProfile,
    element: ElementRef<'a>,
    role: ContentRole,
) -> ElementRef<'a> {
    let selectors = match role {
        ContentRole::Question => profile.question_content_selectors,
        ContentRole::Answer => profile.answer_content_selectors,
    };

    for selector in selectors {
        let Ok(parsed) = Selector::parse(selector) else {
            continue;
        };
        if let Some(found) = element
            .select(&parsed)
            .find(|el| !element_text(el).is_empty())
        {
            return found;
        }
    }

    for selector in profile.content_fallbacks {
        let Ok(parsed) = Selector::parse(selector) else {
            continue;
        };
        if let Some(found) = element
            .select(&parsed)
            .find(|el| element_text(el).len() > 10)
        {
            return found;
        }
    }

    element
}
