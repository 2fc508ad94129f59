//! Inclusion/exclusion filter patterns.
//!
//! Three variants, dispatched by shape: `/…/`-delimited regular expressions
//! (optional trailing flags), asterisk wildcards (case-insensitive
//! full-string match), and plain substrings (case-sensitive `contains`).

use regex::{Regex, RegexBuilder};
use tracing::warn;

/// A filter pattern used to include or exclude rules.
#[derive(Debug, Clone)]
pub enum FilterPattern {
    /// `/…/` with optional flags; `i` maps to case-insensitive matching.
    Regex(Regex),
    /// Contains `*`; matched case-insensitively against the whole line.
    Wildcard(Regex),
    /// Case-sensitive substring test.
    Plain(String),
}

impl FilterPattern {
    /// Parse a pattern string. A malformed regex degrades to a plain
    /// substring match so that one bad entry cannot disable a whole
    /// exclusion file.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        if let Some(regex) = parse_regex_form(text) {
            return Self::Regex(regex);
        }
        if text.contains('*') {
            return Self::Wildcard(wildcard_to_regex(text));
        }
        Self::Plain(text.to_string())
    }

    /// Test a rule line against this pattern.
    #[must_use]
    pub fn matches(&self, line: &str) -> bool {
        match self {
            Self::Regex(re) | Self::Wildcard(re) => re.is_match(line),
            Self::Plain(text) => line.contains(text.as_str()),
        }
    }
}

fn parse_regex_form(text: &str) -> Option<Regex> {
    if text.len() < 2 || !text.starts_with('/') {
        return None;
    }
    let closing = text.rfind('/')?;
    if closing == 0 {
        return None;
    }
    let flags = &text[closing + 1..];
    if !flags.chars().all(|c| "dgimsuvy".contains(c)) {
        return None;
    }
    let body = &text[1..closing];
    match RegexBuilder::new(body)
        .case_insensitive(flags.contains('i'))
        .build()
    {
        Ok(re) => Some(re),
        Err(err) => {
            warn!(pattern = text, %err, "invalid regex pattern, matching as substring");
            None
        }
    }
}

fn wildcard_to_regex(text: &str) -> Regex {
    let escaped: Vec<String> = text.split('*').map(|part| regex::escape(part)).collect();
    let source = format!("^{}$", escaped.join(".*"));
    RegexBuilder::new(&source)
        .case_insensitive(true)
        .build()
        .unwrap_or_else(|_| Regex::new("$^").unwrap_or_else(|_| unreachable!()))
}
