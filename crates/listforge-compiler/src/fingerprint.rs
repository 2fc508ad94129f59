//! Stable configuration fingerprinting.

use listforge_config::Configuration;
use sha2::{Digest, Sha256};

use crate::error::CompileError;

/// SHA-256 over the JCS-canonical JSON of the configuration plus the
/// compiler version. Identical configurations fingerprint identically no
/// matter how their documents were formatted; a compiler upgrade changes
/// every fingerprint, which keys the result cache and dedup fence apart
/// across versions.
pub fn fingerprint(config: &Configuration, compiler_version: &str) -> Result<String, CompileError> {
    let value = serde_json::to_value(config)?;
    let canonical = serde_json_canonicalizer::to_vec(&value)
        .map_err(|err| CompileError::Fingerprint(err.to_string()))?;
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    hasher.update(b"\n");
    hasher.update(compiler_version.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(json: serde_json::Value) -> Configuration {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn identical_configs_share_a_fingerprint() {
        let a = config(serde_json::json!({
            "name": "l", "sources": [{"source": "mem://a"}]
        }));
        let b = a.clone();
        assert_eq!(
            fingerprint(&a, "1.0.0").unwrap(),
            fingerprint(&b, "1.0.0").unwrap()
        );
    }

    #[test]
    fn content_and_version_both_discriminate() {
        let a = config(serde_json::json!({
            "name": "l", "sources": [{"source": "mem://a"}]
        }));
        let b = config(serde_json::json!({
            "name": "l", "sources": [{"source": "mem://b"}]
        }));
        assert_ne!(
            fingerprint(&a, "1.0.0").unwrap(),
            fingerprint(&b, "1.0.0").unwrap()
        );
        assert_ne!(
            fingerprint(&a, "1.0.0").unwrap(),
            fingerprint(&a, "1.0.1").unwrap()
        );
    }

    #[test]
    fn fingerprint_is_hex_sha256() {
        let a = config(serde_json::json!({
            "name": "l", "sources": [{"source": "mem://a"}]
        }));
        let fp = fingerprint(&a, "1.0.0").unwrap();
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
