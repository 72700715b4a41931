//! Static per-platform profiles: selector chains, generation indicators,
//! and update policies.
//!
//! Selector order encodes observed reliability per platform. The first
//! entries are precise, platform-specific hooks; later entries are
//! progressively more generic attribute/substring matches meant to
//! survive markup churn. The order must not be "tidied".

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Chatgpt,
    Claude,
    Gemini,
    Deepseek,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Chatgpt => "chatgpt",
            Platform::Claude => "claude",
            Platform::Gemini => "gemini",
            Platform::Deepseek => "deepseek",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How content updates are throttled before reaching the panel.
/// Durations are milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebouncePolicy {
    /// Push every detected change right away.
    Immediate,
    /// Always coalesce changes within the window.
    Fixed(u64),
    /// Coalesce only while a generation indicator is active, push
    /// immediately otherwise.
    WhileGenerating(u64),
}

/// Last-resort strategy when neither the sibling walk nor document-order
/// search finds a question for an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionFallback {
    None,
    /// Take the last question candidate on the page.
    LastCandidate,
    /// Score candidates by interrogative shape and take the nearest
    /// preceding one.
    InterrogativeScore,
}

/// Predicate configuration for "the page moved to a fresh, empty
/// conversation". Deliberately conservative: history is only cleared when
/// a fresh path matches *and* the same scan found zero answer candidates.
#[derive(Debug, Clone, Copy)]
pub struct NewConversationRule {
    /// URL paths that the platform uses for a blank conversation.
    pub fresh_paths: &'static [&'static str],
}

impl NewConversationRule {
    pub fn matches_url(&self, url: &str) -> bool {
        let path = match url::Url::parse(url) {
            Ok(u) => u.path().trim_end_matches('/').to_string(),
            Err(_) => return false,
        };
        self.fresh_paths
            .iter()
            .any(|p| path == p.trim_end_matches('/'))
    }
}

pub struct PlatformProfile {
    pub platform: Platform,
    /// Hostname fragments that select this profile.
    pub hosts: &'static [&'static str],

    pub container_selectors: &'static [&'static str],
    pub answer_selectors: &'static [&'static str],
    /// Tried when no answer selector matched, before the generic list.
    pub answer_fallbacks: &'static [&'static str],
    pub question_selectors: &'static [&'static str],

    /// Narrowing selectors for the renderable content inside an answer
    /// respectively question element.
    pub answer_content_selectors: &'static [&'static str],
    pub question_content_selectors: &'static [&'static str],
    /// Content narrowing fallbacks, tried against the element subtree.
    pub content_fallbacks: &'static [&'static str],

    /// Any match on these means the AI is still producing output.
    pub generation_indicators: &'static [&'static str],

    /// Candidates with trimmed text at or below this length are noise.
    pub min_answer_len: usize,

    pub debounce: DebouncePolicy,
    /// Whether missed-response backstop detection runs for this platform.
    pub track_missed: bool,
    /// Whether completion must see a concluding phrase when the text
    /// carries research-narration phrases.
    pub research_narration: bool,
    pub question_fallback: QuestionFallback,
    pub new_conversation: NewConversationRule,
}

static CHATGPT: PlatformProfile = PlatformProfile {
    platform: Platform::Chatgpt,
    hosts: &["chatgpt.com"],
    container_selectors: &[
        "main",
        "[role=\"main\"]",
        ".flex.flex-col.text-sm",
        ".h-full.w-full.flex.flex-col",
    ],
    answer_selectors: &[
        "[data-message-author-role=\"assistant\"]",
        ".group\\/conversation-turn",
        "[data-testid*=\"conversation-turn\"]",
        ".agent-turn",
        "[data-message-id]",
        ".group[data-testid]",
    ],
    answer_fallbacks: &[],
    question_selectors: &[
        "[data-message-author-role=\"user\"]",
        ".group\\/conversation-turn:has([data-message-author-role=\"user\"])",
        "[data-testid*=\"user\"]",
        ".user-message",
    ],
    answer_content_selectors: &[
        ".markdown",
        ".prose",
        "[data-message-author-role=\"assistant\"] > div > div",
        ".whitespace-pre-wrap",
        ".agent-turn .whitespace-pre-wrap",
        ".prose.w-full",
        ".whitespace-pre-wrap:not(code)",
    ],
    question_content_selectors: &[
        "[data-message-author-role=\"user\"] > div > div",
        ".whitespace-pre-wrap",
        ".user-message .whitespace-pre-wrap",
    ],
    content_fallbacks: &[],
    generation_indicators: &[
        "[data-testid*=\"stop\"]",
        ".result-streaming",
        "[aria-label*=\"Stop\"]",
        "[title*=\"Stop\"]",
    ],
    min_answer_len: 10,
    debounce: DebouncePolicy::WhileGenerating(800),
    track_missed: true,
    research_narration: false,
    question_fallback: QuestionFallback::None,
    new_conversation: NewConversationRule { fresh_paths: &[""] },
};

static CLAUDE: PlatformProfile = PlatformProfile {
    platform: Platform::Claude,
    hosts: &["claude.ai"],
    container_selectors: &["main", "[data-testid=\"conversation\"]"],
    answer_selectors: &[
        ".font-claude-message",
        "[data-testid=\"message\"]:not([data-testid=\"user-message\"])",
    ],
    answer_fallbacks: &[
        "[class*=\"font-claude\"]",
        "[data-testid*=\"message\"]",
        ".prose",
        "[role=\"group\"]",
    ],
    question_selectors: &[
        "[data-testid=\"user-message\"]",
        ".user-message",
        ".font-user-message",
    ],
    answer_content_selectors: &[
        ".font-claude-message",
        ".prose",
        "[data-testid=\"message\"] div",
    ],
    question_content_selectors: &[
        "[data-testid=\"user-message\"] div",
        ".user-message div",
        ".font-user-message",
    ],
    content_fallbacks: &[
        ".font-claude-message",
        ".prose",
        "[data-testid=\"message\"] > div > div",
        "div",
    ],
    generation_indicators: &[
        "[data-testid=\"stop-button\"]",
        "[aria-label*=\"stop\"]",
        ".animate-pulse",
    ],
    min_answer_len: 10,
    debounce: DebouncePolicy::Immediate,
    track_missed: true,
    research_narration: false,
    question_fallback: QuestionFallback::LastCandidate,
    new_conversation: NewConversationRule {
        fresh_paths: &["/new", "/chats"],
    },
};

static GEMINI: PlatformProfile = PlatformProfile {
    platform: Platform::Gemini,
    hosts: &["gemini.google.com"],
    container_selectors: &[".conversation", "main", "chat-window"],
    answer_selectors: &[
        ".model-response",
        ".response-container",
        "[data-response-id]",
        ".assistant-response",
    ],
    answer_fallbacks: &[],
    question_selectors: &[
        ".user-message",
        ".user-query",
        "[data-role=\"user\"]",
        ".human-message",
    ],
    answer_content_selectors: &[
        ".model-response-text",
        ".markdown",
        ".response-content",
        ".message-content",
    ],
    question_content_selectors: &[".user-message-text", ".query-content", ".user-content"],
    content_fallbacks: &[],
    generation_indicators: &["[aria-label*=\"Stop\"]", ".generating"],
    // Gemini renders short-lived placeholder text; a 10-char floor would
    // drop it before the placeholder rules ever see it.
    min_answer_len: 5,
    debounce: DebouncePolicy::Fixed(300),
    track_missed: false,
    research_narration: false,
    question_fallback: QuestionFallback::None,
    new_conversation: NewConversationRule {
        fresh_paths: &["/app"],
    },
};

static DEEPSEEK: PlatformProfile = PlatformProfile {
    platform: Platform::Deepseek,
    hosts: &["chat.deepseek.com"],
    container_selectors: &["._8f60047", "._0f72b0b", ".chat-container", "main"],
    answer_selectors: &["._4f9bf79", ".dad65929", "._7eb2358", "[class*=\"assistant\"]"],
    answer_fallbacks: &[
        ".ds-markdown",
        "._7eb2358",
        "._4f9bf79",
        ".dad65929",
        "[class*=\"markdown\"]",
    ],
    question_selectors: &[".user-message", "[class*=\"user\"]", ".human-message"],
    answer_content_selectors: &[
        ".ds-markdown",
        "._7eb2358",
        ".ds-markdown-paragraph",
        ".message-content",
    ],
    question_content_selectors: &[".user-content", ".human-message-text"],
    content_fallbacks: &[
        ".ds-markdown",
        ".ds-markdown-paragraph",
        "._7eb2358 svg + div",
        "div[class*=\"markdown\"]",
        "div",
    ],
    generation_indicators: &["[title*=\"Stop\"]", ".generating"],
    min_answer_len: 10,
    debounce: DebouncePolicy::Fixed(1500),
    track_missed: true,
    research_narration: true,
    question_fallback: QuestionFallback::InterrogativeScore,
    new_conversation: NewConversationRule { fresh_paths: &[""] },
};

/// Cross-platform fallbacks, tried only after the platform lists failed.
pub static GENERIC_ANSWER_FALLBACKS: &[&str] = &[
    "[class*=\"assistant\"]",
    "[class*=\"ai\"]",
    "[class*=\"response\"]",
    "[data-role=\"assistant\"]",
    "[role=\"assistant\"]",
    "[class*=\"message\"]:not([class*=\"user\"])",
];

static PROFILES: [&PlatformProfile; 4] = [&CHATGPT, &CLAUDE, &GEMINI, &DEEPSEEK];

pub fn all_profiles() -> &'static [&'static PlatformProfile] {
    &PROFILES
}

/// Pure lookup; `None` means unsupported platform, not an error.
pub fn profile_for(hostname: &str) -> Option<&'static PlatformProfile> {
    PROFILES
        .iter()
        .find(|p| p.hosts.iter().any(|h| hostname.contains(h)))
        .copied()
}

/// Lookup from a full URL.
pub fn profile_for_url(raw: &str) -> Option<&'static PlatformProfile> {
    let parsed = url::Url::parse(raw).ok()?;
    profile_for(parsed.host_str()?)
}
