//! Classification of stdio server stderr output.
//!
//! Servers write all sorts of things to stderr: startup banners, progress,
//! deprecation warnings and, occasionally, real errors. Only the latter are
//! surfaced on the connection record.

use std::sync::LazyLock;

use regex::Regex;

static ERROR_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\berror\b").expect("valid regex"));

/// How a stderr line should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StderrLevel {
    /// Logged at `info`, otherwise ignored.
    Info,
    /// Logged at `warn` and attached to the record's diagnostics.
    Diagnostic,
}

/// Decides whether a stderr line is noise or a diagnostic.
pub trait StderrClassifier: Send + Sync {
    fn classify(&self, line: &str) -> StderrLevel;
}

/// Flags lines matching a regular expression as diagnostics.
///
/// The default pattern matches the whole word `error`, case-insensitively.
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    pattern: Regex,
}

impl KeywordClassifier {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self {
            pattern: ERROR_WORD.clone(),
        }
    }
}

impl StderrClassifier for KeywordClassifier {
    fn classify(&self, line: &str) -> StderrLevel {
        if self.pattern.is_match(line) {
            StderrLevel::Diagnostic
        } else {
            StderrLevel::Info
        }
    }
}
