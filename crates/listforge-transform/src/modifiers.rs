//! `RemoveModifiers`: strip a deny-list of options from adblock rules.

use listforge_rules::Rule;

/// Modifiers stripped by default: browser-scoped options that carry no
/// meaning for DNS-level blocklists.
pub const DEFAULT_REMOVED_MODIFIERS: &[&str] = &[
    "third-party",
    "3p",
    "first-party",
    "1p",
    "important",
    "popup",
];

/// Remove every deny-listed option from each adblock rule. A rule whose
/// option list becomes empty keeps its pattern-only form. Other line
/// classes pass through.
pub(crate) fn remove_modifiers(lines: Vec<String>, removed: &[String]) -> Vec<String> {
    lines
        .into_iter()
        .map(|line| match Rule::parse(&line) {
            Rule::Adblock(mut rule) => {
                let mut touched = false;
                for name in removed {
                    touched |= rule.remove_modifier(name);
                }
                if touched { rule.to_string() } else { line }
            }
            _ => line,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn removed() -> Vec<String> {
        DEFAULT_REMOVED_MODIFIERS
            .iter()
            .map(|m| (*m).to_string())
            .collect()
    }

    #[test]
    fn strips_denied_modifiers() {
        let out = remove_modifiers(
            vec!["||ads.example^$third-party,domain=a.com".to_string()],
            &removed(),
        );
        assert_eq!(out, vec!["||ads.example^$domain=a.com".to_string()]);
    }

    #[test]
    fn empty_option_list_collapses_to_pattern() {
        let out = remove_modifiers(
            vec!["||ads.example^$third-party,important".to_string()],
            &removed(),
        );
        assert_eq!(out, vec!["||ads.example^".to_string()]);
    }

    #[test]
    fn untouched_rules_keep_raw_text() {
        let input = vec![
            "||ads.example^$dnstype=AAAA".to_string(),
            "! comment".to_string(),
        ];
        assert_eq!(remove_modifiers(input.clone(), &removed()), input);
    }
}
