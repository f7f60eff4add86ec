//! Stable cache key for a media item, derived from its source URL or
//! source file-id (spec.md §3 glossary: "Fingerprint").

use sha2::{Digest, Sha256};

/// Hash `source` (a URL or a platform-native file-id) into a stable hex
/// fingerprint usable as the `media_fingerprint` table's primary key.
pub fn fingerprint(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic_and_distinguishes_inputs() {
        let a = fingerprint("https://cdn/x.png");
        let b = fingerprint("https://cdn/x.png");
        let c = fingerprint("https://cdn/y.png");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }
}
