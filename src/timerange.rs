//! Free-text time phrases to Splunk-relative search windows.

use serde::Serialize;

/// A search window in backend-relative time tokens (`-24h`, `@d`, `now`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeWindow {
    pub earliest: String,
    pub latest: String,
}

impl TimeWindow {
    fn new(earliest: &str, latest: &str) -> Self {
        Self {
            earliest: earliest.to_string(),
            latest: latest.to_string(),
        }
    }
}

impl Default for TimeWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW.0, DEFAULT_WINDOW.1)
    }
}

pub const DEFAULT_WINDOW: (&str, &str) = ("-1h", "now");

/// Ordered phrase table. The first row with any matching phrase wins, so
/// "last 24 hours" must be checked before "last hour".
const PHRASE_TABLE: &[(&[&str], &str, &str)] = &[
    (&["last 24 hours", "past 24 hours"], "-24h", "now"),
    (
        &["last 7 days", "past 7 days", "past week", "last week"],
        "-7d",
        "now",
    ),
    (&["last hour", "past hour"], "-1h", "now"),
    (&["today"], "@d", "now"),
    (&["yesterday"], "@d-1d", "@d"),
    (&["last 30 minutes", "past 30 minutes"], "-30m", "now"),
    (&["last 15 minutes", "past 15 minutes"], "-15m", "now"),
];

/// Resolve a free-text time range. Total: unknown or empty text yields the
/// default one-hour window.
pub fn resolve(text: &str) -> TimeWindow {
    let text = text.trim().to_lowercase();
    if text.is_empty() {
        return TimeWindow::default();
    }

    PHRASE_TABLE
        .iter()
        .find(|(phrases, _, _)| phrases.iter().any(|p| text.contains(p)))
        .map(|(_, earliest, latest)| TimeWindow::new(earliest, latest))
        .unwrap_or_default()
}
