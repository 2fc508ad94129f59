//! Punycode conversion helpers for internationalized hostnames.

use tracing::debug;

/// Convert a hostname to its ASCII (punycode) form, label by label.
///
/// ASCII labels pass through untouched, which keeps the conversion
/// idempotent and leaves wildcard labels (`*`) intact: `*.ком` becomes
/// `*.xn--j1aef`. A label that cannot be encoded is kept as-is.
#[must_use]
pub fn to_ascii_hostname(host: &str) -> String {
    if host.is_ascii() {
        return host.to_string();
    }
    host.split('.')
        .map(to_ascii_label)
        .collect::<Vec<_>>()
        .join(".")
}

fn to_ascii_label(label: &str) -> String {
    if label.is_ascii() {
        return label.to_string();
    }
    let lowered = label.to_lowercase();
    match idna::punycode::encode_str(&lowered) {
        Some(encoded) => format!("xn--{encoded}"),
        None => {
            debug!(label, "punycode encoding failed, keeping label");
            label.to_string()
        }
    }
}
