//! Evaluator for `!#if` preprocessor condition expressions.
//!
//! Grammar:
//!
//! ```text
//! expr := or
//! or   := and ('||' and)*
//! and  := not ('&&' not)*
//! not  := '!' not | atom
//! atom := 'true' | 'false' | identifier | '(' expr ')'
//! ```
//!
//! An identifier naming the current platform (case-insensitive) is true;
//! any other identifier, known platform or not, is false. This is a real
//! recursive-descent parser with a fixed recursion bound, never a string
//! `eval`. Malformed expressions evaluate to false; empty or
//! whitespace-only input evaluates to true.

use thiserror::Error;
use tracing::debug;

/// The closed set of platform identifiers a condition may name.
pub const KNOWN_PLATFORMS: &[&str] = &[
    "windows",
    "mac",
    "android",
    "ios",
    "ext_chromium",
    "ext_ff",
    "ext_edge",
    "ext_opera",
    "ext_safari",
    "ext_ublock",
    "adguard",
    "adguard_app_windows",
    "adguard_app_mac",
    "adguard_app_android",
    "adguard_app_ios",
    "adguard_ext_chromium",
    "adguard_ext_firefox",
    "adguard_ext_edge",
    "adguard_ext_opera",
    "adguard_ext_safari",
];

/// Default recursion bound shared by `!` chains and parenthesis nesting.
pub const DEFAULT_RECURSION_LIMIT: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
enum ExprError {
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unexpected token at offset {0}")]
    UnexpectedToken(usize),
    #[error("unbalanced parentheses")]
    UnbalancedParens,
    #[error("recursion depth exceeded")]
    TooDeep,
    #[error("trailing input at offset {0}")]
    TrailingInput(usize),
}

/// Evaluate a condition expression against the current platform.
///
/// `platform` is the identifier of the platform the list is being compiled
/// for; `None` means no platform identifier matches.
#[must_use]
pub fn evaluate(expr: &str, platform: Option<&str>) -> bool {
    evaluate_with_limit(expr, platform, DEFAULT_RECURSION_LIMIT)
}

/// [`evaluate`] with an explicit recursion bound, for hosts that tune it.
#[must_use]
pub fn evaluate_with_limit(expr: &str, platform: Option<&str>, max_depth: usize) -> bool {
    if expr.trim().is_empty() {
        return true;
    }
    match Parser::new(expr, platform, max_depth).parse() {
        Ok(value) => value,
        Err(err) => {
            debug!(expr, %err, "condition failed to parse, evaluating to false");
            false
        }
    }
}

/// True when `name` is one of the recognized platform identifiers.
#[must_use]
pub fn is_known_platform(name: &str) -> bool {
    KNOWN_PLATFORMS
        .iter()
        .any(|p| p.eq_ignore_ascii_case(name))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Not,
    And,
    Or,
    Open,
    Close,
}

struct Parser<'a> {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    platform: Option<&'a str>,
    max_depth: usize,
}

impl<'a> Parser<'a> {
    fn new(expr: &str, platform: Option<&'a str>, max_depth: usize) -> Parser<'a> {
        Parser {
            tokens: tokenize(expr),
            pos: 0,
            platform,
            max_depth,
        }
    }

    fn parse(mut self) -> Result<bool, ExprError> {
        // An empty token list here means the input was symbols-only garbage.
        if self.tokens.is_empty() {
            return Err(ExprError::UnexpectedEnd);
        }
        let value = self.parse_or(0)?;
        match self.peek() {
            None => Ok(value),
            Some((offset, _)) => Err(ExprError::TrailingInput(*offset)),
        }
    }

    fn parse_or(&mut self, depth: usize) -> Result<bool, ExprError> {
        let mut value = self.parse_and(depth)?;
        while self.eat(&Token::Or) {
            let rhs = self.parse_and(depth)?;
            value = value || rhs;
        }
        Ok(value)
    }

    fn parse_and(&mut self, depth: usize) -> Result<bool, ExprError> {
        let mut value = self.parse_not(depth)?;
        while self.eat(&Token::And) {
            let rhs = self.parse_not(depth)?;
            value = value && rhs;
        }
        Ok(value)
    }

    fn parse_not(&mut self, depth: usize) -> Result<bool, ExprError> {
        if depth >= self.max_depth {
            return Err(ExprError::TooDeep);
        }
        if self.eat(&Token::Not) {
            return Ok(!self.parse_not(depth + 1)?);
        }
        self.parse_atom(depth)
    }

    fn parse_atom(&mut self, depth: usize) -> Result<bool, ExprError> {
        if depth >= self.max_depth {
            return Err(ExprError::TooDeep);
        }
        match self.next() {
            Some((_, Token::Ident(name))) => Ok(self.ident_value(&name)),
            Some((_, Token::Open)) => {
                let value = self.parse_or(depth + 1)?;
                if self.eat(&Token::Close) {
                    Ok(value)
                } else {
                    Err(ExprError::UnbalancedParens)
                }
            }
            Some((offset, _)) => Err(ExprError::UnexpectedToken(offset)),
            None => Err(ExprError::UnexpectedEnd),
        }
    }

    fn ident_value(&self, name: &str) -> bool {
        match name {
            "true" => true,
            "false" => false,
            _ => {
                is_known_platform(name)
                    && self.platform.is_some_and(|p| p.eq_ignore_ascii_case(name))
            }
        }
    }

    fn peek(&self) -> Option<&(usize, Token)> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<(usize, Token)> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek().map(|(_, t)| t) == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }
}

fn tokenize(expr: &str) -> Vec<(usize, Token)> {
    let mut tokens = Vec::new();
    let bytes = expr.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b' ' | b'\t' => i += 1,
            b'(' => {
                tokens.push((i, Token::Open));
                i += 1;
            }
            b')' => {
                tokens.push((i, Token::Close));
                i += 1;
            }
            b'!' => {
                tokens.push((i, Token::Not));
                i += 1;
            }
            b'&' if bytes.get(i + 1) == Some(&b'&') => {
                tokens.push((i, Token::And));
                i += 2;
            }
            b'|' if bytes.get(i + 1) == Some(&b'|') => {
                tokens.push((i, Token::Or));
                i += 2;
            }
            c if c.is_ascii_alphanumeric() || c == b'_' => {
                let start = i;
                while i < bytes.len()
                    && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_')
                {
                    i += 1;
                }
                tokens.push((start, Token::Ident(expr[start..i].to_string())));
            }
            _ => {
                // An unexpected byte poisons the expression; emit a token the
                // parser will reject so the whole condition reads as false.
                tokens.push((i, Token::Close));
                i += 1;
            }
        }
    }
    tokens
}
