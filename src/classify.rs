//! Text-delta classification for a tracked answer element.
//!
//! Given the previous and current text of the same element, decide what
//! kind of change happened and whether it warrants an immediate panel
//! refresh. All heuristics operate on visible text only; markup changes
//! with identical text are deliberately invisible here.

use std::collections::HashSet;

use crate::platform::PlatformProfile;

/// Texts below this length never count as a finished answer.
const MIN_COMPLETE_LEN: usize = 10;
/// At or below this trimmed length, text is treated as empty noise.
const NEAR_EMPTY_LEN: usize = 3;
/// "..." endings only mark a placeholder while the text is still short.
const ELLIPSIS_SHORT_LEN: usize = 60;
/// Short text with no sentence punctuation is an in-flight fragment.
const UNPUNCTUATED_SHORT_LEN: usize = 25;
/// How much of the previous text must survive as a prefix before a change
/// counts as growth rather than replacement.
const REPLACEMENT_HEAD_CHARS: usize = 30;
/// Absolute growth that always counts as a major expansion.
const MAJOR_GROWTH_CHARS: i64 = 200;
/// Floor for the relative (doubled-length) major-expansion rule, so tiny
/// texts doubling does not register as major.
const DOUBLED_GROWTH_FLOOR: i64 = 50;
/// Growth above this is a visible incremental update.
const INCREMENTAL_GROWTH_CHARS: i64 = 20;

/// Similarity at or above this means two texts are the same response.
pub const SAME_RESPONSE_SIMILARITY: f64 = 0.8;
/// Similarity below this means a reused element carries a new response.
pub const DISTINCT_RESPONSE_SIMILARITY: f64 = 0.3;

const TERMINAL_PUNCTUATION: [char; 4] = ['.', '!', '?', ':'];

/// Openers the platforms show while they are still working.
const PLACEHOLDER_PHRASES: &[&str] = &[
    "searching for",
    "let me check",
    "just a second",
    "one moment",
    "thinking",
    "generating",
    "working on",
];

/// Research-mode narration verbs; on platforms that narrate their research
/// steps, text containing these is not final until a concluding phrase
/// shows up.
const RESEARCH_WORKING_PHRASES: &[&str] = &[
    "searching",
    "browsing",
    "analyzing",
    "reading through",
    "gathering information",
];

const RESEARCH_CONCLUDING_PHRASES: &[&str] =
    &["in conclusion", "to summarize", "in summary", "final answer"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// The element was reused for entirely different content.
    Replacement,
    /// A placeholder resolved into a finished answer.
    PlaceholderToComplete,
    MajorExpansion,
    Incremental,
    Minor,
}

#[derive(Debug, Clone, Copy)]
pub struct ChangeReport {
    pub kind: ChangeKind,
    /// Significant changes go to the panel on the platform's fast path;
    /// minor ones are coalesced.
    pub significant: bool,
    pub complete: bool,
    pub was_placeholder: bool,
}

fn char_len(text: &str) -> i64 {
    text.chars().count() as i64
}

/// Transient "working on it" text the platforms render before streaming
/// the real answer.
pub fn is_placeholder_content(text: &str) -> bool {
    let trimmed = text.trim();
    if char_len(trimmed) < NEAR_EMPTY_LEN as i64 {
        return true;
    }

    let lower = trimmed.to_lowercase();
    if PLACEHOLDER_PHRASES.iter().any(|p| lower.starts_with(p)) {
        return true;
    }

    let len = char_len(trimmed) as usize;
    if len < ELLIPSIS_SHORT_LEN && (trimmed.ends_with("...") || trimmed.ends_with('…')) {
        return true;
    }

    len < UNPUNCTUATED_SHORT_LEN && !trimmed.ends_with(TERMINAL_PUNCTUATION)
}

/// Whether `text` reads as a finished answer. Never true while the page
/// reports active generation, and never true for placeholder text.
pub fn is_complete_response(text: &str, profile: &PlatformProfile, generating: bool) -> bool {
    if generating {
        return false;
    }
    let trimmed = text.trim();
    if (char_len(trimmed) as usize) < MIN_COMPLETE_LEN || is_placeholder_content(trimmed) {
        return false;
    }

    if profile.research_narration {
        let lower = trimmed.to_lowercase();
        let working = RESEARCH_WORKING_PHRASES.iter().any(|p| lower.contains(p));
        let concluded = RESEARCH_CONCLUDING_PHRASES
            .iter()
            .any(|p| lower.contains(p));
        if working && !concluded {
            return false;
        }
    }

    trimmed.ends_with(TERMINAL_PUNCTUATION) || has_structural_ending(trimmed)
}

/// Closed code fences and trailing list items also close an answer, even
/// without sentence punctuation.
fn has_structural_ending(text: &str) -> bool {
    let fences = text.matches("```").count();
    if fences > 0 && fences % 2 == 0 {
        return true;
    }
    let Some(last) = text.lines().rev().find(|l| !l.trim().is_empty()) else {
        return false;
    };
    let line = last.trim_start();
    line.starts_with("- ") || line.starts_with("* ") || starts_with_list_number(line)
}

fn starts_with_list_number(line: &str) -> bool {
    let mut saw_digit = false;
    for c in line.chars() {
        if c.is_ascii_digit() {
            saw_digit = true;
            continue;
        }
        return saw_digit && (c == '.' || c == ')');
    }
    false
}

/// Classify the transition from `previous` to `current` text of one
/// tracked element.
pub fn classify(
    previous: &str,
    current: &str,
    profile: &PlatformProfile,
    generating: bool,
) -> ChangeReport {
    let was_placeholder = is_placeholder_content(previous);
    let complete = is_complete_response(current, profile, generating);

    let prev_len = char_len(previous);
    let cur_len = char_len(current);
    let growth = cur_len - prev_len;

    let kind = if was_placeholder && complete {
        ChangeKind::PlaceholderToComplete
    } else if !previous.trim().is_empty() && !current.starts_with(&text_head(previous)) {
        ChangeKind::Replacement
    } else if growth > MAJOR_GROWTH_CHARS || (cur_len > 2 * prev_len && growth > DOUBLED_GROWTH_FLOOR)
    {
        ChangeKind::MajorExpansion
    } else if growth > INCREMENTAL_GROWTH_CHARS {
        ChangeKind::Incremental
    } else {
        ChangeKind::Minor
    };

    ChangeReport {
        kind,
        significant: kind != ChangeKind::Minor,
        complete,
        was_placeholder,
    }
}

fn text_head(text: &str) -> String {
    text.chars().take(REPLACEMENT_HEAD_CHARS).collect()
}

/// Dice coefficient over lowercased word sets, ignoring words of up to two
/// characters and punctuation stuck to word edges.
pub fn content_similarity(a: &str, b: &str) -> f64 {
    let ta = tokens(a);
    let tb = tokens(b);
    if ta.is_empty() && tb.is_empty() {
        return 1.0;
    }
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let shared = ta.intersection(&tb).count();
    (2.0 * shared as f64) / ((ta.len() + tb.len()) as f64)
}

fn tokens(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|w| w.chars().count() > 2)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::profile_for;

    #[test]
    fn placeholder_shapes() {
        assert!(is_placeholder_content(""));
        assert!(is_placeholder_content("  ok "));
        assert!(is_placeholder_content("Thinking..."));
        assert!(is_placeholder_content("Searching for sources"));
        assert!(is_placeholder_content("Just a second, loading the data"));
        assert!(is_placeholder_content("Gathering the latest information..."));
        assert!(is_placeholder_content("short fragment"));
    }

    #[test]
    fn real_answers_are_not_placeholders() {
        assert!(!is_placeholder_content("Hello, world."));
        assert!(!is_placeholder_content("Let me help. The answer is 42."));
        assert!(!is_placeholder_content(
            "A long explanation that keeps going well past the short-text limits without trailing dots"
        ));
    }

    #[test]
    fn completion_requires_idle_length_and_punctuation() {
        let profile = profile_for("chatgpt.com").unwrap();
        assert!(is_complete_response("Hello, world.", profile, false));
        assert!(!is_complete_response("Hello, world.", profile, true));
        assert!(!is_complete_response("Short.", profile, false));
        assert!(!is_complete_response("Thinking...", profile, false));
        assert!(!is_complete_response(
            "an unfinished sentence that simply stops midway",
            profile,
            false
        ));
    }

    #[test]
    fn structural_endings_count_as_complete() {
        let profile = profile_for("chatgpt.com").unwrap();
        assert!(is_complete_response(
            "The steps are\n- unpack the archive\n- run the installer",
            profile,
            false
        ));
        assert!(is_complete_response(
            "Use this snippet\n```\nfn main() {}\n```",
            profile,
            false
        ));
        assert!(is_complete_response(
            "Ranked results\n1. first option\n2) second option",
            profile,
            false
        ));
    }

    #[test]
    fn research_narration_needs_a_conclusion() {
        let deepseek = profile_for("chat.deepseek.com").unwrap();
        let chatgpt = profile_for("chatgpt.com").unwrap();

        let working = "Analyzing the sources for supporting details.";
        assert!(!is_complete_response(working, deepseek, false));
        assert!(is_complete_response(working, chatgpt, false));

        let concluded = "Analyzing finished. In conclusion, the answer is 42.";
        assert!(is_complete_response(concluded, deepseek, false));
    }

    #[test]
    fn growth_progression() {
        let profile = profile_for("chatgpt.com").unwrap();

        let start = "The answer";
        let grown = "The answer to your question is forty-two.";
        let report = classify(start, grown, profile, true);
        assert_eq!(report.kind, ChangeKind::Incremental);
        assert!(report.significant);
        assert!(!report.complete);

        let expanded = format!("{grown} {}", "And a detailed justification follows. ".repeat(8));
        let report = classify(grown, &expanded, profile, false);
        assert_eq!(report.kind, ChangeKind::MajorExpansion);
        assert!(report.significant);
    }

    #[test]
    fn small_and_no_op_changes_are_minor() {
        let profile = profile_for("chatgpt.com").unwrap();
        let text = "The capital of France is Paris.";
        let report = classify(text, text, profile, false);
        assert_eq!(report.kind, ChangeKind::Minor);
        assert!(!report.significant);
        assert!(report.complete);

        let report = classify(text, "The capital of France is Paris!!", profile, false);
        assert_eq!(report.kind, ChangeKind::Minor);
    }

    #[test]
    fn reused_element_is_a_replacement() {
        let profile = profile_for("chatgpt.com").unwrap();
        let report = classify(
            "The capital of France is Paris and it is a lovely city.",
            "Something entirely different now occupies this element.",
            profile,
            false,
        );
        assert_eq!(report.kind, ChangeKind::Replacement);
        assert!(report.significant);
    }

    #[test]
    fn placeholder_resolving_to_answer() {
        let profile = profile_for("gemini.google.com").unwrap();
        let report = classify("Thinking...", "The answer is 42.", profile, false);
        assert_eq!(report.kind, ChangeKind::PlaceholderToComplete);
        assert!(report.significant);
        assert!(report.complete);
        assert!(report.was_placeholder);
    }

    #[test]
    fn similarity_thresholds() {
        let same = content_similarity(
            "The capital of France is Paris.",
            "The capital of France is Paris",
        );
        assert!(same >= SAME_RESPONSE_SIMILARITY);

        let distinct = content_similarity(
            "The capital of France is Paris.",
            "Rust ownership prevents data races entirely.",
        );
        assert!(distinct < DISTINCT_RESPONSE_SIMILARITY);

        assert_eq!(content_similarity("", ""), 1.0);
        assert_eq!(content_similarity("a of in", "substantial words here"), 0.0);
    }
}
