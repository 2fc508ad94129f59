//! Line classification and the top-level [`Rule`] type.

use std::fmt;

use crate::adblock::AdblockRule;
use crate::hosts::EtcHostsRule;

/// A single classified line of a filter list.
///
/// Classification is total: every line maps to exactly one variant, and
/// `parse(s).to_string() == s` holds for every input (comments, blanks and
/// directives keep their raw text; rules reserialize from their parts).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    /// A comment line: leading `!`, `# ` (hash plus whitespace), a bare `#`,
    /// or a `####` heading.
    Comment(String),
    /// An empty or whitespace-only line.
    Blank(String),
    /// A preprocessor directive (`!#if`, `!#else`, `!#endif`, `!#include`).
    Directive(Directive),
    /// An `/etc/hosts`-style entry mapping an IP to one or more hostnames.
    EtcHosts(EtcHostsRule),
    /// Everything else: an adblock rule.
    Adblock(AdblockRule),
}

impl Rule {
    /// Classify a single line.
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Self::Blank(line.to_string());
        }
        if trimmed.starts_with("!#") {
            if let Some(directive) = Directive::parse(line) {
                return Self::Directive(directive);
            }
            // Unknown `!#` extensions degrade to plain comments.
            return Self::Comment(line.to_string());
        }
        if Self::is_comment_text(trimmed) {
            return Self::Comment(line.to_string());
        }
        if let Some(hosts) = EtcHostsRule::parse(line) {
            return Self::EtcHosts(hosts);
        }
        Self::Adblock(AdblockRule::parse(line))
    }

    fn is_comment_text(trimmed: &str) -> bool {
        if trimmed.starts_with('!') {
            return true;
        }
        if trimmed == "#" || trimmed.starts_with("####") {
            return true;
        }
        if let Some(rest) = trimmed.strip_prefix('#') {
            return rest.starts_with(char::is_whitespace);
        }
        false
    }

    /// True for comment lines.
    #[must_use]
    pub fn is_comment(&self) -> bool {
        matches!(self, Self::Comment(_))
    }

    /// True for blank lines.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        matches!(self, Self::Blank(_))
    }

    /// True for lines that carry a rule (hosts or adblock), as opposed to
    /// comments, blanks and directives.
    #[must_use]
    pub fn is_rule(&self) -> bool {
        matches!(self, Self::EtcHosts(_) | Self::Adblock(_))
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Comment(raw) | Self::Blank(raw) => f.write_str(raw),
            Self::Directive(d) => f.write_str(d.raw()),
            Self::EtcHosts(h) => f.write_str(h.raw()),
            Self::Adblock(a) => write!(f, "{a}"),
        }
    }
}

/// A preprocessor directive line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    raw: String,
    kind: DirectiveKind,
}

/// The recognized directive forms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectiveKind {
    /// `!#if <expr>` opens a conditional block.
    If(String),
    /// `!#else` toggles the innermost open block.
    Else,
    /// `!#endif` closes the innermost open block.
    Endif,
    /// `!#include <target>` inlines another source.
    Include(String),
}

impl Directive {
    /// Parse a directive line, returning `None` when the `!#` prefix is not
    /// followed by a recognized keyword.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        let body = trimmed.strip_prefix("!#")?;
        let kind = if body == "else" {
            DirectiveKind::Else
        } else if body == "endif" {
            DirectiveKind::Endif
        } else if let Some(rest) = keyword_argument(body, "if") {
            DirectiveKind::If(rest.to_string())
        } else if let Some(rest) = keyword_argument(body, "include") {
            DirectiveKind::Include(rest.to_string())
        } else {
            return None;
        };
        Some(Self {
            raw: line.to_string(),
            kind,
        })
    }

    /// The original line text.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The parsed directive form.
    #[must_use]
    pub fn kind(&self) -> &DirectiveKind {
        &self.kind
    }
}

/// `body` split after `keyword`, accepting both `if expr` and `if(expr)`
/// spellings. `None` when the keyword merely prefixes a longer word
/// (`!#iffy` is a comment, not a directive).
fn keyword_argument<'a>(body: &'a str, keyword: &str) -> Option<&'a str> {
    let rest = body.strip_prefix(keyword)?;
    if rest.is_empty() {
        return Some("");
    }
    let next = rest.chars().next()?;
    if next.is_alphanumeric() || next == '_' {
        return None;
    }
    Some(rest.trim())
}
