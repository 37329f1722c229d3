use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::service::RequestContext;

/// How a query relates to the surrounding conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QueryClass {
    #[serde(rename = "GENERAL")]
    General,
    #[serde(rename = "POSITIONAL")]
    Positional,
    #[serde(rename = "TOPICAL")]
    Topical,
    #[serde(rename = "OVERVIEW")]
    Overview,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextInfo {
    pub has_session_context: bool,
    pub has_message_history: bool,
    pub has_conversation_context: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub is_conversational: bool,
    pub classification: QueryClass,
    pub confidence: f32,
    pub reasoning: String,
    pub context_info: ContextInfo,
}

fn pattern(source: &str) -> Regex {
    Regex::new(source).expect("classifier pattern is valid")
}

// The pattern sets below are part of the service contract and stay frozen;
// behaviour changes go through new rules, not edits to these.
static DISCOURSE_MARKERS: LazyLock<Regex> = LazyLock::new(|| {
    pattern(
        r"\b(as (you|i) (said|mentioned)|like (you|i) (said|mentioned)|as we discussed|as mentioned (earlier|before))\b",
    )
});

static POSITIONAL_ITEM: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r"\b(first|last|latest|previous|next)\s+(thing|question|message|topic|point)\b")
});

static POSITIONAL_SAID: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r"what\s+did\s+(i|you|we)\s+(say|ask|mention|send|write)\b.*\b(first|last|initially)\b")
});

static TEMPORAL_CONVERSATIONAL: LazyLock<Regex> = LazyLock::new(|| {
    pattern(
        r"\b(say|said|ask|asked|mention|mentioned|talk|talked|tell|told)\b.*\b(earlier|before|previously|just now|a moment ago)\b",
    )
});

static TOPICAL_DISCUSS: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r"what\s+(did|have)\s+we\s+(discuss|discussed|talk|talked|cover|covered)\b")
});

static TOPICAL_MENTION: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"did\s+(i|we|you)\s+(mention|discuss|bring up)\b"));

static TOPICAL_IN_PROGRESS: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"what\s+(were|was)\s+we\s+(discussing|talking)\b"));

static OVERVIEW_SUMMARIZE: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r"\b(summarize|summarise|recap)\b.*\b(conversation|chat|discussion|session)\b")
});

static OVERVIEW_OF: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r"\b(overview|summary)\s+of\s+(our|this|the)\s+(conversation|chat|discussion)\b")
});

static OVERVIEW_SO_FAR: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"what\s+have\s+we\s+(covered|done)\s+so\s+far\b"));

static CONVERSATIONAL_PRONOUNS: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"\b(you|we|us|our)\b"));

static TEMPORAL_MARKERS: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r"\b(earlier|before|previously|just now|a moment ago|last time)\b")
});

static ANAPHORA: LazyLock<Regex> = LazyLock::new(|| pattern(r"\b(that|this|it|those|these)\b"));

/// Deterministic rule engine deciding whether a query is about the
/// conversation itself, and how. Pure function, no I/O.
pub struct QueryClassifier;

impl QueryClassifier {
    pub fn classify(query: &str, ctx: &RequestContext) -> Classification {
        let text = query.trim().to_lowercase();

        let has_session_context = ctx
            .session_id
            .as_deref()
            .is_some_and(|s| !s.trim().is_empty());
        let has_message_history =
            ctx.message_count.unwrap_or(0) > 0 || ctx.has_history == Some(true);
        let has_conversation_context = has_session_context && has_message_history;

        let context_info = ContextInfo {
            has_session_context,
            has_message_history,
            has_conversation_context,
        };

        let verdict = |is_conversational, classification, confidence, reasoning: &str| {
            Classification {
                is_conversational,
                classification,
                confidence,
                reasoning: reasoning.to_string(),
                context_info: context_info.clone(),
            }
        };

        let positional =
            POSITIONAL_ITEM.is_match(&text) || POSITIONAL_SAID.is_match(&text);
        let topical = TOPICAL_DISCUSS.is_match(&text)
            || TOPICAL_MENTION.is_match(&text)
            || TOPICAL_IN_PROGRESS.is_match(&text);
        let overview = OVERVIEW_SUMMARIZE.is_match(&text)
            || OVERVIEW_OF.is_match(&text)
            || OVERVIEW_SO_FAR.is_match(&text);

        if !has_conversation_context {
            // Without a live conversation only the strongest markers count.
            if DISCOURSE_MARKERS.is_match(&text) {
                return verdict(
                    true,
                    QueryClass::Positional,
                    0.75,
                    "explicit discourse marker without session context",
                );
            }
            if CONVERSATIONAL_PRONOUNS.is_match(&text) && TEMPORAL_MARKERS.is_match(&text) {
                return verdict(
                    true,
                    QueryClass::Positional,
                    0.70,
                    "conversational pronoun with temporal marker, no session context",
                );
            }
            return verdict(
                false,
                QueryClass::General,
                0.90,
                "no conversation context available",
            );
        }

        if DISCOURSE_MARKERS.is_match(&text) {
            return verdict(
                true,
                QueryClass::Positional,
                0.98,
                "explicit discourse marker",
            );
        }
        if positional || TEMPORAL_CONVERSATIONAL.is_match(&text) {
            return verdict(
                true,
                QueryClass::Positional,
                0.95,
                "positional or temporal reference to the conversation",
            );
        }
        if topical {
            return verdict(
                true,
                QueryClass::Topical,
                0.92,
                "asks what the conversation covered",
            );
        }
        if overview {
            return verdict(
                true,
                QueryClass::Overview,
                0.90,
                "asks for a conversation summary",
            );
        }
        if ANAPHORA.is_match(&text) && CONVERSATIONAL_PRONOUNS.is_match(&text) {
            return verdict(
                true,
                QueryClass::Positional,
                0.85,
                "anaphoric reference with conversational pronouns",
            );
        }
        if CONVERSATIONAL_PRONOUNS.is_match(&text) {
            return verdict(
                false,
                QueryClass::General,
                0.60,
                "conversational pronouns only",
            );
        }

        verdict(
            false,
            QueryClass::General,
            0.85,
            "no conversational markers",
        )
    }
}
