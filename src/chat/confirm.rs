// SPDX-License-Identifier: MIT
//! Chat confirmation detection.
//!
//! Decides whether a chat exchange means "the numbers are agreed, build the
//! offer now".  The cost of a false negative is one more chat turn; the cost
//! of a false positive is materializing an offer from an unconfirmed
//! conversation.  Every heuristic here therefore fails closed: ambiguous
//! input returns `false`.
//!
//! Three signal sources, checked in order of authority:
//!   1. the backend's explicit confirmation flag (always wins),
//!   2. confirmation phrases in the outgoing user message,
//!   3. structured markers in the assistant reply.

use once_cell::sync::Lazy;
use regex::Regex;

/// Lowercased phrases in the outgoing message that commit the offer.
const CONFIRM_PHRASES: &[&str] = &[
    "passt so",
    "passt alles",
    "alles richtig",
    "in ordnung",
    "einverstanden",
    "ich bestätige",
    "bestätigt",
    "angebot erstellen",
    "erstell das angebot",
    "erstelle das angebot",
    "angebot bitte",
    "so übernehmen",
    "confirmed",
    "go ahead",
];

/// Tokens that turn an otherwise confirming message ambiguous.  Over-matching
/// here is deliberate; a missed confirmation only costs one more turn.
const HEDGE_TOKENS: &[&str] = &["nicht", "nein", "falsch", "aber", "?"];

/// Structured markers the reply side may carry once the backend considers the
/// offer confirmed.
static REPLY_MARKERS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // Marker emitted verbatim by the extraction backend.
        r"(?i)status\s*:\s*bestätigt",
        r"(?i)\bangebot wird (nun |jetzt )?erstellt\b",
        r"(?i)\bmengen (wurden |sind )?übernommen\b",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("reply marker regex is valid"))
    .collect()
});

/// True when the exchange confirms the offer.
///
/// `server_flag` is the backend's own verdict and short-circuits everything
/// else.  Empty inputs without the flag are never a confirmation.
pub fn detect(outgoing: &str, reply: &str, server_flag: bool) -> bool {
    if server_flag {
        return true;
    }
    outgoing_confirms(outgoing) || reply_confirms(reply)
}

/// Phrase scan over the user's outgoing message.  Case-folded substring
/// match, vetoed by any hedge token.
fn outgoing_confirms(text: &str) -> bool {
    let folded = text.to_lowercase();
    if folded.trim().is_empty() {
        return false;
    }
    if HEDGE_TOKENS.iter().any(|token| folded.contains(token)) {
        return false;
    }
    CONFIRM_PHRASES.iter().any(|phrase| folded.contains(phrase))
}

/// Marker scan over the assistant reply.  Only structured markers count;
/// free-form agreement in the reply is not trusted.
fn reply_confirms(text: &str) -> bool {
    if text.trim().is_empty() {
        return false;
    }
    REPLY_MARKERS.iter().any(|re| re.is_match(text))
}
