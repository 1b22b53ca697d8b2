//! Booking-intent gate for caller transcripts.
//!
//! Recognizes spoken appointment-time phrases ("tomorrow at 3pm", "next
//! Tuesday at 10:30 am") so the session knows when to forward a transcript
//! to collaborators as appointment-candidate text. Actually parsing the
//! phrase into a calendar time happens outside the bridge.

use once_cell::sync::Lazy;
use regex::Regex;

static TOMORROW_AT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\btomorrow\s+at\s+\d{1,2}(?::\d{2})?\s*[ap]\.?\s*m\.?")
        .expect("invalid tomorrow-at pattern")
});

static WEEKDAY_AT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:next\s+)?(?:monday|tuesday|wednesday|thursday|friday|saturday|sunday)\s+at\s+\d{1,2}(?::\d{2})?\s*[ap]\.?\s*m\.?",
    )
    .expect("invalid weekday-at pattern")
});

/// Whether a caller transcript contains a spoken appointment-time phrase.
pub fn appointment_candidate(text: &str) -> bool {
    TOMORROW_AT.is_match(text) || WEEKDAY_AT.is_match(text)
}
