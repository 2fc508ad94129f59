//! `Validate` / `ValidateAllowIp`: drop unparseable, overbroad and unsafe
//! rules.

use std::net::{Ipv4Addr, Ipv6Addr};

use listforge_rules::Rule;
use tracing::debug;

/// Patterns that would match far too much to ever ship in a list.
pub const DANGEROUS_PATTERNS: &[&str] = &[
    "/",
    "*",
    "|",
    "||",
    "^",
    "@@",
    "http:",
    "https:",
    "ws:",
    "wss:",
    "http://",
    "https://",
    "ws://",
    "wss://",
];

/// Shortest significant pattern (anchors stripped) that is allowed through.
const MIN_SIGNIFICANT_LEN: usize = 3;

/// Drop rules that are unparseable, IP-only (unless `allow_ip`), or
/// dangerously broad. Comments, blanks and directives pass through.
pub(crate) fn validate(lines: Vec<String>, allow_ip: bool) -> Vec<String> {
    lines
        .into_iter()
        .filter(|line| {
            let keep = keep_line(line, allow_ip);
            if !keep {
                debug!(rule = line.as_str(), "validation dropped rule");
            }
            keep
        })
        .collect()
}

fn keep_line(line: &str, allow_ip: bool) -> bool {
    match Rule::parse(line) {
        Rule::Comment(_) | Rule::Blank(_) | Rule::Directive(_) => true,
        Rule::EtcHosts(_) => true,
        Rule::Adblock(rule) => {
            let pattern = rule.pattern().trim();
            if DANGEROUS_PATTERNS.contains(&pattern) {
                return false;
            }
            if is_regex_pattern(pattern) {
                // Unparseable regex rules are dropped outright.
                return regex::Regex::new(&pattern[1..pattern.len() - 1]).is_ok();
            }
            let significant = significant_part(pattern);
            if significant.chars().count() < MIN_SIGNIFICANT_LEN {
                return false;
            }
            if !allow_ip && is_ip_literal(significant) {
                return false;
            }
            true
        }
    }
}

fn is_regex_pattern(pattern: &str) -> bool {
    pattern.len() > 1 && pattern.starts_with('/') && pattern.ends_with('/')
}

/// The pattern with its anchor framing (`||`, `|`, trailing `^`/`|`)
/// removed.
fn significant_part(pattern: &str) -> &str {
    let mut rest = pattern;
    rest = rest.strip_prefix("||").unwrap_or(rest);
    rest = rest.strip_prefix('|').unwrap_or(rest);
    rest = rest.strip_suffix('|').unwrap_or(rest);
    rest = rest.strip_suffix('^').unwrap_or(rest);
    rest
}

fn is_ip_literal(text: &str) -> bool {
    text.parse::<Ipv4Addr>().is_ok() || text.parse::<Ipv6Addr>().is_ok()
}
