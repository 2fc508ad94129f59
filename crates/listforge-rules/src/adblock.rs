//! Adblock rule decomposition: `[@@]<pattern>[$<options>]`.

use std::fmt;

/// A parsed adblock rule.
///
/// The options separator is the rightmost unescaped `$` (a backslash escapes
/// the dollar), so patterns such as `/banner\d+\$/` survive intact.
/// Serialization follows the parse grammar exactly, which makes
/// `AdblockRule::parse(s).to_string() == s` hold for every input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdblockRule {
    whitelist: bool,
    pattern: String,
    /// `None` when the rule has no `$` separator; `Some(vec![])` when the
    /// separator is present with nothing after it.
    options: Option<Vec<RuleOption>>,
}

/// A single `name` or `name=value` entry from a rule's option list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleOption {
    pub name: String,
    pub value: Option<String>,
}

impl RuleOption {
    fn parse(text: &str) -> Self {
        match text.split_once('=') {
            Some((name, value)) => Self {
                name: name.to_string(),
                value: Some(value.to_string()),
            },
            None => Self {
                name: text.to_string(),
                value: None,
            },
        }
    }
}

impl fmt::Display for RuleOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{}={}", self.name, value),
            None => f.write_str(&self.name),
        }
    }
}

impl AdblockRule {
    /// Decompose a rule line into whitelist flag, pattern and options.
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let (whitelist, body) = match line.strip_prefix("@@") {
            Some(rest) => (true, rest),
            None => (false, line),
        };

        match find_options_separator(body) {
            Some(idx) => {
                let pattern = body[..idx].to_string();
                let options_text = &body[idx + 1..];
                let options = if options_text.is_empty() {
                    Vec::new()
                } else {
                    options_text.split(',').map(RuleOption::parse).collect()
                };
                Self {
                    whitelist,
                    pattern,
                    options: Some(options),
                }
            }
            None => Self {
                whitelist,
                pattern: body.to_string(),
                options: None,
            },
        }
    }

    /// True for `@@`-prefixed allowing rules.
    #[must_use]
    pub const fn is_whitelist(&self) -> bool {
        self.whitelist
    }

    /// The matching pattern, without the `@@` prefix or option list.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// The parsed option list, empty when the rule has none.
    #[must_use]
    pub fn options(&self) -> &[RuleOption] {
        self.options.as_deref().unwrap_or(&[])
    }

    /// Find an option by name.
    #[must_use]
    pub fn find_modifier(&self, name: &str) -> Option<&RuleOption> {
        self.options().iter().find(|o| o.name == name)
    }

    /// Remove every option with the given name. Returns true when at least
    /// one was removed. A rule whose option list becomes empty reserializes
    /// in its pattern-only form.
    pub fn remove_modifier(&mut self, name: &str) -> bool {
        let Some(options) = self.options.as_mut() else {
            return false;
        };
        let before = options.len();
        options.retain(|o| o.name != name);
        let removed = options.len() != before;
        if options.is_empty() {
            self.options = None;
        }
        removed
    }

    /// Append an option to the rule's option list.
    pub fn add_modifier(&mut self, name: impl Into<String>, value: Option<String>) {
        let option = RuleOption {
            name: name.into(),
            value,
        };
        match self.options.as_mut() {
            Some(options) => options.push(option),
            None => self.options = Some(vec![option]),
        }
    }

    /// Rewrite the pattern in place, keeping whitelist flag and options.
    pub fn set_pattern(&mut self, pattern: impl Into<String>) {
        self.pattern = pattern.into();
    }

    /// Best-effort hostname extraction from the pattern.
    ///
    /// Strips `||` / `|` anchors and any URL scheme, then takes the longest
    /// leading run of hostname characters. Returns `None` when the pattern
    /// does not start with something hostname-shaped.
    #[must_use]
    pub fn hostname_part(&self) -> Option<&str> {
        let mut rest = self.pattern.as_str();
        rest = rest.strip_prefix("||").unwrap_or(rest);
        rest = rest.strip_prefix('|').unwrap_or(rest);
        if let Some(idx) = rest.find("://") {
            rest = &rest[idx + 3..];
        }
        let end = rest
            .find(|c: char| !is_hostname_char(c))
            .unwrap_or(rest.len());
        if end == 0 { None } else { Some(&rest[..end]) }
    }
}

fn is_hostname_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '.' || c == '_' || c == '*'
}

/// Index of the rightmost `$` not preceded by an odd number of backslashes.
fn find_options_separator(body: &str) -> Option<usize> {
    let bytes = body.as_bytes();
    for idx in (0..bytes.len()).rev() {
        if bytes[idx] != b'$' {
            continue;
        }
        let mut backslashes = 0;
        while backslashes < idx && bytes[idx - 1 - backslashes] == b'\\' {
            backslashes += 1;
        }
        if backslashes % 2 == 0 {
            return Some(idx);
        }
    }
    None
}

impl fmt::Display for AdblockRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.whitelist {
            f.write_str("@@")?;
        }
        f.write_str(&self.pattern)?;
        if let Some(options) = &self.options {
            f.write_str("$")?;
            let mut first = true;
            for option in options {
                if !first {
                    f.write_str(",")?;
                }
                first = false;
                write!(f, "{option}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_blocking_rule_with_options() {
        let rule = AdblockRule::parse("||ads.example^$third-party,domain=a.com|b.com");
        assert!(!rule.is_whitelist());
        assert_eq!(rule.pattern(), "||ads.example^");
        assert_eq!(rule.options().len(), 2);
        assert_eq!(rule.options()[0].name, "third-party");
        assert_eq!(
            rule.options()[1].value.as_deref(),
            Some("a.com|b.com")
        );
    }

    #[test]
    fn parses_whitelist_rule() {
        let rule = AdblockRule::parse("@@||allow.example^");
        assert!(rule.is_whitelist());
        assert_eq!(rule.pattern(), "||allow.example^");
        assert!(rule.options().is_empty());
    }

    #[test]
    fn escaped_dollar_stays_in_pattern() {
        let rule = AdblockRule::parse(r"/price\$\d+/$script");
        assert_eq!(rule.pattern(), r"/price\$\d+/");
        assert_eq!(rule.options()[0].name, "script");

        let no_options = AdblockRule::parse(r"/price\$\d+/");
        assert!(no_options.options().is_empty());
        assert_eq!(no_options.pattern(), r"/price\$\d+/");
    }

    #[test]
    fn rightmost_dollar_wins() {
        let rule = AdblockRule::parse("/ads$/$image");
        assert_eq!(rule.pattern(), "/ads$/");
        assert_eq!(rule.options()[0].name, "image");
    }

    #[test]
    fn modifier_edit_operations() {
        let mut rule = AdblockRule::parse("||ads.example^$third-party,important");
        assert!(rule.find_modifier("important").is_some());
        assert!(rule.remove_modifier("third-party"));
        assert!(!rule.remove_modifier("third-party"));
        assert_eq!(rule.to_string(), "||ads.example^$important");

        assert!(rule.remove_modifier("important"));
        assert_eq!(rule.to_string(), "||ads.example^");

        rule.add_modifier("dnstype", Some("AAAA".to_string()));
        assert_eq!(rule.to_string(), "||ads.example^$dnstype=AAAA");
    }

    #[test]
    fn trailing_separator_round_trips() {
        let rule = AdblockRule::parse("||ads.example^$");
        assert!(rule.options().is_empty());
        assert_eq!(rule.to_string(), "||ads.example^$");
    }

    #[test]
    fn hostname_part_extraction() {
        let cases = [
            ("||ads.example^", Some("ads.example")),
            ("|https://ads.example/path", Some("ads.example")),
            ("*.tracker.example^", Some("*.tracker.example")),
            ("||127.0.0.1^", Some("127.0.0.1")),
            ("/regex/", None),
        ];
        for (pattern, expected) in cases {
            let rule = AdblockRule::parse(pattern);
            assert_eq!(rule.hostname_part(), expected, "pattern {pattern:?}");
        }
    }

    #[test]
    fn round_trip_property() {
        for line in [
            "||ads.example^$third-party,domain=a.com|b.com",
            "@@||allow.example^$important",
            "||ads.example^$",
            "$third-party",
            "plain-text-rule",
        ] {
            assert_eq!(AdblockRule::parse(line).to_string(), line);
        }
    }
}
