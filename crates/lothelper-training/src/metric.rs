//! Extraction of the quality metric a stage prints on success.
//!
//! Stages report their error metric as a labelled decimal on one output line.
//! The accepted labels are tried in order and the first label that matches
//! anywhere in the output wins:
//!
//! 1. `Test MAE: 2.45`
//! 2. `MAE: 2.45`
//! 3. `Mean Absolute Error: 2.45`
//!
//! Labels are case-insensitive and the value may carry a leading `$`.
//! No match yields `None`, which is distinct from a reported `0.0`.

use once_cell::sync::Lazy;
use regex::Regex;

static METRIC_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)test\s+mae:\s*\$?(\d+(?:\.\d+)?)",
        r"(?i)\bmae:\s*\$?(\d+(?:\.\d+)?)",
        r"(?i)mean\s+absolute\s+error:\s*\$?(\d+(?:\.\d+)?)",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

#[must_use]
pub fn extract_metric(output: &str) -> Option<f64> {
    METRIC_PATTERNS.iter().find_map(|pattern| {
        pattern
            .captures(output)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok())
    })
}
