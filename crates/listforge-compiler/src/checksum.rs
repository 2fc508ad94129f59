//! Filter-list checksum, byte-compatible with the ecosystem convention:
//! CRs dropped, newline runs collapsed, MD5, unpadded base64.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use md5::{Digest, Md5};

/// Compute the checksum digest for `header ++ body`.
#[must_use]
pub fn checksum(header: &[String], body: &[String]) -> String {
    let mut content = String::new();
    for (index, line) in header.iter().chain(body.iter()).enumerate() {
        if index > 0 {
            content.push('\n');
        }
        content.push_str(line);
    }
    let digest = Md5::digest(normalize(&content).as_bytes());
    let encoded = STANDARD.encode(digest);
    encoded.trim_end_matches('=').to_string()
}

/// The checksum formatted as its header line.
#[must_use]
pub fn checksum_line(header: &[String], body: &[String]) -> String {
    format!("! Checksum: {}", checksum(header, body))
}

/// Drop CRs and collapse every newline run to a single `\n`.
fn normalize(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    for c in content.chars() {
        match c {
            '\r' => {}
            '\n' if out.ends_with('\n') => {}
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(input: &[&str]) -> Vec<String> {
        input.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn normalization_collapses_newline_runs() {
        assert_eq!(normalize("a\r\n\r\n\nb"), "a\nb");
        assert_eq!(normalize("\n\na"), "\na");
        assert_eq!(normalize("plain"), "plain");
    }

    #[test]
    fn digest_is_unpadded_base64() {
        let digest = checksum(&lines(&["! Title: t"]), &lines(&["||a^"]));
        assert!(!digest.ends_with('='));
        assert!(!digest.is_empty());
        // MD5 is 16 bytes, so unpadded base64 is 22 characters.
        assert_eq!(digest.len(), 22);
    }

    #[test]
    fn checksum_ignores_blank_line_runs() {
        // The collapse rule makes these equivalent on the wire.
        let a = checksum(&lines(&["! h"]), &lines(&["||a^", "", "", "||b^"]));
        let b = checksum(&lines(&["! h"]), &lines(&["||a^", "", "||b^"]));
        assert_eq!(a, b);
    }

    #[test]
    fn checksum_is_content_sensitive() {
        let a = checksum(&lines(&["! h"]), &lines(&["||a^"]));
        let b = checksum(&lines(&["! h"]), &lines(&["||b^"]));
        assert_ne!(a, b);
    }

    #[test]
    fn known_vector() {
        // base64(md5("a\nb")) with padding stripped
        let digest = checksum(&lines(&["a"]), &lines(&["b"]));
        assert_eq!(digest, "jN60RBfzwmgmWV1YIM9XAA");
    }
}
