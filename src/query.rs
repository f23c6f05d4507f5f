//! Intents the router can select and the SPL query each one runs.

use crate::timerange::TimeWindow;
use serde::Serialize;

/// Returned by [`generate_by_name`] for a name that is not a known intent.
/// Callers must check for it before submitting anything.
pub const UNKNOWN_QUERY: &str = "Unknown function";

/// Closed set of operations the model may select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    CheckStatus,
    SearchErrors,
    SearchNullPointerExceptions,
}

impl Intent {
    pub const ALL: [Intent; 3] = [
        Intent::CheckStatus,
        Intent::SearchErrors,
        Intent::SearchNullPointerExceptions,
    ];

    /// Tool name exposed to the model.
    pub fn name(&self) -> &'static str {
        match self {
            Intent::CheckStatus => "check_status",
            Intent::SearchErrors => "search_errors",
            Intent::SearchNullPointerExceptions => "search_null_pointer_exceptions",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Intent::CheckStatus => "Check the status of an application using Splunk logs.",
            Intent::SearchErrors => "Search for errors in a specific application's logs.",
            Intent::SearchNullPointerExceptions => {
                "Search for null pointer exceptions in a specific application's logs."
            }
        }
    }

    /// Validated lookup of a model-selected tool name.
    pub fn from_name(name: &str) -> Option<Intent> {
        Intent::ALL.into_iter().find(|i| i.name() == name.trim())
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Build the SPL search for an intent. The target is embedded verbatim; it is
/// expected to come from the model's validated tool arguments.
pub fn generate(intent: Intent, target: &str, window: &TimeWindow) -> String {
    let time_filter = format!(
        " earliest=\"{}\" latest=\"{}\"",
        window.earliest, window.latest
    );

    match intent {
        Intent::CheckStatus => format!(
            "search index=main sourcetype=test1 app=\"{}\" status!=200{}",
            target, time_filter
        ),
        Intent::SearchErrors => format!(
            "search index=main sourcetype=\"test1\" \"ERROR {}\"{}",
            target, time_filter
        ),
        Intent::SearchNullPointerExceptions => format!(
            "search index=\"main\" sourcetype=\"test3\" {} \"NullPointerException\" AND \"at \"{}",
            target, time_filter
        ),
    }
}

/// Same as [`generate`] but keyed by raw tool name. Unknown names yield
/// [`UNKNOWN_QUERY`].
pub fn generate_by_name(name: &str, target: &str, window: &TimeWindow) -> String {
    match Intent::from_name(name) {
        Some(intent) => generate(intent, target, window),
        None => UNKNOWN_QUERY.to_string(),
    }
}
