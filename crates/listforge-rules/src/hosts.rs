//! `/etc/hosts`-style rule lines.

use std::net::{Ipv4Addr, Ipv6Addr};

/// An `/etc/hosts` entry: an address token followed by one or more
/// hostnames, with an optional inline `# comment` tail.
///
/// The raw line is kept verbatim so that reserialization is byte-exact
/// regardless of the whitespace between tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EtcHostsRule {
    raw: String,
    ip: String,
    hostnames: Vec<String>,
    comment: Option<String>,
}

impl EtcHostsRule {
    /// Try to parse a hosts entry. Returns `None` when the line does not
    /// start with an IPv4/IPv6/`localhost` token followed by at least one
    /// hostname.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        let (body, comment) = match trimmed.find('#') {
            Some(idx) => (&trimmed[..idx], Some(trimmed[idx..].to_string())),
            None => (trimmed, None),
        };

        let mut tokens = body.split_whitespace();
        let ip = tokens.next()?;
        if !is_address_token(ip) {
            return None;
        }
        let hostnames: Vec<String> = tokens.map(str::to_string).collect();
        if hostnames.is_empty() || !hostnames.iter().all(|h| is_hostname_token(h)) {
            return None;
        }

        Some(Self {
            raw: line.to_string(),
            ip: ip.to_string(),
            hostnames,
            comment,
        })
    }

    /// The original line text.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The address token.
    #[must_use]
    pub fn ip(&self) -> &str {
        &self.ip
    }

    /// The mapped hostnames, in order.
    #[must_use]
    pub fn hostnames(&self) -> &[String] {
        &self.hostnames
    }

    /// The inline comment tail, `#` included, when present.
    #[must_use]
    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }
}

fn is_address_token(token: &str) -> bool {
    token == "localhost"
        || token.parse::<Ipv4Addr>().is_ok()
        || token.parse::<Ipv6Addr>().is_ok()
}

fn is_hostname_token(token: &str) -> bool {
    !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '.' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ipv4_entry() {
        let rule = EtcHostsRule::parse("0.0.0.0 ads.example ad.test").unwrap();
        assert_eq!(rule.ip(), "0.0.0.0");
        assert_eq!(rule.hostnames(), ["ads.example", "ad.test"]);
        assert!(rule.comment().is_none());
    }

    #[test]
    fn parses_ipv6_and_localhost_entries() {
        assert!(EtcHostsRule::parse("::1 ip6.example").is_some());
        assert!(EtcHostsRule::parse("fe80::1 link.example").is_some());
        assert!(EtcHostsRule::parse("localhost my.box").is_some());
    }

    #[test]
    fn keeps_inline_comment() {
        let rule = EtcHostsRule::parse("127.0.0.1 tracker.example # staging only").unwrap();
        assert_eq!(rule.hostnames(), ["tracker.example"]);
        assert_eq!(rule.comment(), Some("# staging only"));
    }

    #[test]
    fn rejects_non_hosts_lines() {
        assert!(EtcHostsRule::parse("||ads.example^").is_none());
        assert!(EtcHostsRule::parse("0.0.0.0").is_none());
        assert!(EtcHostsRule::parse("999.0.0.0.1 host").is_none());
        assert!(EtcHostsRule::parse("0.0.0.0 bad host!name").is_none());
    }

    #[test]
    fn raw_round_trip_preserves_spacing() {
        let line = "0.0.0.0\t ads.example   # tab separated";
        assert_eq!(EtcHostsRule::parse(line).unwrap().raw(), line);
    }
}
