// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Line classification and the filters built on top of it.
//!
//! Every row falls into exactly one [`LineClass`]; checks run in priority
//! order and the first match wins, so a line mentioning both "error" and
//! "success" is an error line.

use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineClass {
    Error,
    Failure,
    Warning,
    Http5xx,
    Http4xx,
    Http3xx,
    Http2xx,
    Success,
    Info,
    Debug,
    Prompt,
    Plain,
    Empty,
}

impl LineClass {
    pub const ALL: [LineClass; 13] = [
        LineClass::Error,
        LineClass::Failure,
        LineClass::Warning,
        LineClass::Http5xx,
        LineClass::Http4xx,
        LineClass::Http3xx,
        LineClass::Http2xx,
        LineClass::Success,
        LineClass::Info,
        LineClass::Debug,
        LineClass::Prompt,
        LineClass::Plain,
        LineClass::Empty,
    ];

    pub fn name(self) -> &'static str {
        match self {
            LineClass::Error => "error",
            LineClass::Failure => "failure",
            LineClass::Warning => "warning",
            LineClass::Http5xx => "http5xx",
            LineClass::Http4xx => "http4xx",
            LineClass::Http3xx => "http3xx",
            LineClass::Http2xx => "http2xx",
            LineClass::Success => "success",
            LineClass::Info => "info",
            LineClass::Debug => "debug",
            LineClass::Prompt => "prompt",
            LineClass::Plain => "plain",
            LineClass::Empty => "empty",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|class| class.name() == name)
    }
}

impl fmt::Display for LineClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

const ERROR_WORDS: &[&str] = &["error", "exception", "crash", "fatal", "critical"];
const FAILURE_WORDS: &[&str] = &["fail", "denied"];
const WARNING_WORDS: &[&str] = &["warn", "caution"];
const SUCCESS_WORDS: &[&str] = &["success", "passed", "complete"];
const INFO_WORDS: &[&str] = &["info", "get ", "post ", "put ", "patch ", "delete "];
const DEBUG_WORDS: &[&str] = &["debug", "trace", "verbose"];

/// Status code in an HTTP context: after `status:`, after `HTTP/x.y`, or as a
/// standalone token
fn http_status_pattern(leading_digit: char) -> String {
    format!(
        r"(?:status:\s*|http/\d\.\d\s+|[\s|]){}[0-9]{{2}}(?:\s|$|\))",
        leading_digit
    )
}

fn http_patterns() -> &'static [(LineClass, Option<Regex>)] {
    static PATTERNS: OnceLock<Vec<(LineClass, Option<Regex>)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (LineClass::Http5xx, '5'),
            (LineClass::Http4xx, '4'),
            (LineClass::Http3xx, '3'),
            (LineClass::Http2xx, '2'),
        ]
        .into_iter()
        .map(|(class, digit)| {
            let regex = Regex::new(&http_status_pattern(digit))
                .map_err(|e| warn!(error = %e, class = %class, "Invalid HTTP status pattern"))
                .ok();
            (class, regex)
        })
        .collect()
    })
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

fn is_prompt(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with('$')
        || trimmed.starts_with('%')
        || trimmed.chars().take(20).any(|c| c == '@')
}

/// Classify one row of output
pub fn classify(line: &str) -> LineClass {
    if line.trim().is_empty() {
        return LineClass::Empty;
    }
    let lower = line.to_lowercase();

    if contains_any(&lower, ERROR_WORDS) {
        return LineClass::Error;
    }
    if contains_any(&lower, FAILURE_WORDS) {
        return LineClass::Failure;
    }
    if contains_any(&lower, WARNING_WORDS) {
        return LineClass::Warning;
    }
    for (class, regex) in http_patterns() {
        if regex.as_ref().is_some_and(|re| re.is_match(&lower)) {
            return *class;
        }
    }
    if contains_any(&lower, SUCCESS_WORDS) {
        return LineClass::Success;
    }
    if contains_any(&lower, INFO_WORDS) {
        return LineClass::Info;
    }
    if contains_any(&lower, DEBUG_WORDS) {
        return LineClass::Debug;
    }
    if is_prompt(line) {
        return LineClass::Prompt;
    }
    LineClass::Plain
}

/// Predicate over row text used by the filtered index
#[derive(Clone)]
pub enum Filter {
    /// Rows whose class is in the set
    Classes(HashSet<LineClass>),
    /// Case-insensitive substring match
    Contains(String),
    Regex(Regex),
    Custom(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl Filter {
    pub fn classes(classes: impl IntoIterator<Item = LineClass>) -> Self {
        Filter::Classes(classes.into_iter().collect())
    }

    pub fn contains(needle: impl Into<String>) -> Self {
        Filter::Contains(needle.into().to_lowercase())
    }

    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(Filter::Regex)
    }

    pub fn custom(predicate: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        Filter::Custom(Arc::new(predicate))
    }

    pub fn matches(&self, line: &str) -> bool {
        match self {
            Filter::Classes(classes) => classes.contains(&classify(line)),
            Filter::Contains(needle) => line.to_lowercase().contains(needle.as_str()),
            Filter::Regex(re) => re.is_match(line),
            Filter::Custom(predicate) => predicate(line),
        }
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Classes(classes) => {
                let mut names: Vec<&str> = classes.iter().map(|c| c.name()).collect();
                names.sort_unstable();
                f.debug_tuple("Classes").field(&names).finish()
            }
            Filter::Contains(needle) => f.debug_tuple("Contains").field(needle).finish(),
            Filter::Regex(re) => f.debug_tuple("Regex").field(&re.as_str()).finish(),
            Filter::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order() {
        assert_eq!(classify("ERROR: build failed"), LineClass::Error);
        assert_eq!(classify("permission denied"), LineClass::Failure);
        assert_eq!(classify("3 tests failed"), LineClass::Failure);
        assert_eq!(classify("warning: unused variable"), LineClass::Warning);
        assert_eq!(classify("all tests passed"), LineClass::Success);
        assert_eq!(classify("INFO starting worker"), LineClass::Info);
        assert_eq!(classify("TRACE poll loop"), LineClass::Debug);
        assert_eq!(classify("hello there"), LineClass::Plain);
        assert_eq!(classify("   "), LineClass::Empty);
        assert_eq!(classify(""), LineClass::Empty);
    }

    #[test]
    fn test_http_status_codes_need_context() {
        assert_eq!(classify("HTTP/1.1 503 Service Unavailable"), LineClass::Http5xx);
        assert_eq!(classify("status: 404"), LineClass::Http4xx);
        assert_eq!(classify("| 301 | /old"), LineClass::Http3xx);
        assert_eq!(classify("GET /index.html 200"), LineClass::Http2xx);
        // Bare digits inside a word are not a status code
        assert_eq!(classify("build42001 ready"), LineClass::Plain);
    }

    #[test]
    fn test_http_verbs_are_info() {
        assert_eq!(classify("POST /api/items"), LineClass::Info);
    }

    #[test]
    fn test_prompts() {
        assert_eq!(classify("$ cargo build"), LineClass::Prompt);
        assert_eq!(classify("% ls"), LineClass::Prompt);
        assert_eq!(classify("user@host:~/src"), LineClass::Prompt);
    }

    #[test]
    fn test_class_names_round_trip() {
        for class in LineClass::ALL {
            assert_eq!(LineClass::from_name(class.name()), Some(class));
        }
        assert_eq!(LineClass::from_name("nope"), None);
    }

    #[test]
    fn test_filters() {
        let errors = Filter::classes([LineClass::Error, LineClass::Failure]);
        assert!(errors.matches("fatal: not a git repository"));
        assert!(!errors.matches("ok"));

        let needle = Filter::contains("Timeout");
        assert!(needle.matches("request TIMEOUT after 30s"));

        let re = Filter::regex(r"^\d+ passed").unwrap();
        assert!(re.matches("12 passed"));
        assert!(Filter::regex("(").is_err());

        let custom = Filter::custom(|line| line.len() > 3);
        assert!(custom.matches("abcd"));
        assert!(!custom.matches("abc"));
    }
}
