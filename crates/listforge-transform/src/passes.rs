//! The structurally simple passes.

use std::collections::HashSet;

use listforge_rules::{Rule, SERVICE_HOSTNAMES};

/// Drop comment lines.
pub(crate) fn remove_comments(lines: Vec<String>) -> Vec<String> {
    lines
        .into_iter()
        .filter(|line| !Rule::parse(line).is_comment())
        .collect()
}

/// Convert `/etc/hosts` entries to adblock form, one `||host^` rule per
/// hostname. Service hostnames (`localhost` and friends) produce nothing.
/// Non-hosts lines pass through unchanged.
pub(crate) fn compress(lines: Vec<String>) -> Vec<String> {
    let mut out = Vec::with_capacity(lines.len());
    for line in lines {
        match Rule::parse(&line) {
            Rule::EtcHosts(hosts) => {
                for hostname in hosts.hostnames() {
                    if SERVICE_HOSTNAMES.contains(&hostname.to_lowercase().as_str()) {
                        continue;
                    }
                    out.push(format!("||{hostname}^"));
                }
            }
            _ => out.push(line),
        }
    }
    out
}

/// Remove exact duplicate lines, keeping the first occurrence.
pub(crate) fn deduplicate(lines: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::with_capacity(lines.len());
    lines
        .into_iter()
        .filter(|line| seen.insert(line.clone()))
        .collect()
}

/// Replace every blocking adblock rule with its allowing (`@@`) form.
/// Whitelist rules and non-rule lines pass through.
pub(crate) fn invert_allow(lines: Vec<String>) -> Vec<String> {
    lines
        .into_iter()
        .map(|line| match Rule::parse(&line) {
            Rule::Adblock(rule) if !rule.is_whitelist() => format!("@@{rule}"),
            _ => line,
        })
        .collect()
}

/// Drop empty and whitespace-only lines.
pub(crate) fn remove_empty_lines(lines: Vec<String>) -> Vec<String> {
    lines
        .into_iter()
        .filter(|line| !line.trim().is_empty())
        .collect()
}

/// Strip leading and trailing whitespace from every line.
pub(crate) fn trim_lines(lines: Vec<String>) -> Vec<String> {
    lines
        .into_iter()
        .map(|line| line.trim().to_string())
        .collect()
}

/// Ensure the list ends with exactly one empty line.
pub(crate) fn insert_final_new_line(mut lines: Vec<String>) -> Vec<String> {
    while lines.last().is_some_and(|line| line.trim().is_empty()) {
        lines.pop();
    }
    lines.push(String::new());
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(input: &[&str]) -> Vec<String> {
        input.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn remove_comments_keeps_rules() {
        let out = remove_comments(lines(&["! c", "# c", "||a.com^", "#@#sel", ""]));
        assert_eq!(out, lines(&["||a.com^", "#@#sel", ""]));
    }

    #[test]
    fn compress_converts_hosts() {
        let out = compress(lines(&[
            "# hdr",
            "0.0.0.0 ads.example ad.test",
            "||kept.example^",
        ]));
        assert_eq!(
            out,
            lines(&["# hdr", "||ads.example^", "||ad.test^", "||kept.example^"])
        );
    }

    #[test]
    fn compress_skips_service_hostnames() {
        let out = compress(lines(&["127.0.0.1 localhost ads.example"]));
        assert_eq!(out, lines(&["||ads.example^"]));
    }

    #[test]
    fn deduplicate_keeps_first_occurrence() {
        let out = deduplicate(lines(&["a", "b", "a", "c", "b", "a"]));
        assert_eq!(out, lines(&["a", "b", "c"]));
    }

    #[test]
    fn invert_allow_flips_blocking_rules() {
        let out = invert_allow(lines(&[
            "||ads.example^$third-party",
            "@@||already.example^",
            "! comment",
        ]));
        assert_eq!(
            out,
            lines(&[
                "@@||ads.example^$third-party",
                "@@||already.example^",
                "! comment"
            ])
        );
    }

    #[test]
    fn invert_allow_is_idempotent() {
        let input = lines(&["||ads.example^", "@@||allow.example^"]);
        let once = invert_allow(input);
        let twice = invert_allow(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn final_new_line_appends_and_collapses() {
        assert_eq!(insert_final_new_line(lines(&["a"])), lines(&["a", ""]));
        assert_eq!(
            insert_final_new_line(lines(&["a", "", "  ", ""])),
            lines(&["a", ""])
        );
        assert_eq!(insert_final_new_line(Vec::new()), lines(&[""]));
    }

    #[test]
    fn trim_and_remove_empty() {
        assert_eq!(trim_lines(lines(&["  a  ", "\tb"])), lines(&["a", "b"]));
        assert_eq!(remove_empty_lines(lines(&["a", "", "  ", "b"])), lines(&["a", "b"]));
    }
}
