//! `ConvertToAscii`: punycode conversion of internationalized hostnames.

use listforge_rules::{Rule, to_ascii_hostname};

/// Rewrite non-ASCII hostnames in rule lines to punycode. Comments, blanks
/// and directives pass through untouched; ASCII lines are returned as-is,
/// which makes the pass idempotent.
pub(crate) fn convert_to_ascii(lines: Vec<String>) -> Vec<String> {
    lines
        .into_iter()
        .map(|line| {
            if line.is_ascii() {
                return line;
            }
            match Rule::parse(&line) {
                Rule::Comment(_) | Rule::Blank(_) | Rule::Directive(_) => line,
                Rule::EtcHosts(_) | Rule::Adblock(_) => convert_domains(&line),
            }
        })
        .collect()
}

/// Convert every hostname-shaped run in the line that carries non-ASCII
/// characters. This reaches hostnames wherever they appear: `||дом^`,
/// wildcarded `*.дом` forms, hosts-file hostname columns, and `domain=`
/// option values alike.
fn convert_domains(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut run = String::new();
    for c in line.chars() {
        if is_domain_char(c) {
            run.push(c);
        } else {
            flush_run(&mut out, &mut run);
            out.push(c);
        }
    }
    flush_run(&mut out, &mut run);
    out
}

fn flush_run(out: &mut String, run: &mut String) {
    if run.is_empty() {
        return;
    }
    if run.is_ascii() {
        out.push_str(run);
    } else {
        out.push_str(&to_ascii_hostname(run));
    }
    run.clear();
}

fn is_domain_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '.' || c == '_' || c == '*'
}
