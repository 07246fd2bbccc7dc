//! Cache key codec.

use std::fmt;

use sha2::{Digest, Sha256};

/// Logical cache address of one derivative.
///
/// Keys are `<scheme>:<preset>:<sha256>` where the digest covers the
/// length-prefixed triple, so distinct triples never share a digest input.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(scheme: &str, preset: &str, url: &str) -> Self {
        let mut hasher = Sha256::new();
        for part in [scheme, preset, url] {
            hasher.update((part.len() as u64).to_be_bytes());
            hasher.update(part.as_bytes());
        }
        let digest = hasher.finalize();
        Self(format!("{scheme}:{preset}:{}", hex::encode(&digest[..])))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn same_triple_same_key() {
        let a = CacheKey::new("s3", "thumb", "https://x/a.jpg");
        let b = CacheKey::new("s3", "thumb", "https://x/a.jpg");
        assert_eq!(a, b);
        assert!(a.as_str().starts_with("s3:thumb:"));
    }

    #[test]
    fn every_component_participates() {
        let base = CacheKey::new("s3", "thumb", "https://x/a.jpg");
        assert_ne!(base, CacheKey::new("fs", "thumb", "https://x/a.jpg"));
        assert_ne!(base, CacheKey::new("s3", "large", "https://x/a.jpg"));
        assert_ne!(base, CacheKey::new("s3", "thumb", "https://x/b.jpg"));
    }

    #[test]
    fn shifted_boundaries_do_not_collide() {
        // Concatenation of the parts is identical; the length prefix keeps them apart.
        let a = CacheKey::new("fs", "ab", "c");
        let b = CacheKey::new("fs", "a", "bc");
        assert_ne!(a, b);
    }

    #[test]
    fn no_collisions_across_a_corpus() {
        let mut seen = HashSet::new();
        for scheme in ["fs", "s3"] {
            for preset in ["thumb", "thumb-small", "large", "t"] {
                for n in 0..200 {
                    let url = format!("https://img.example.com/{n}/photo.jpg");
                    assert!(seen.insert(CacheKey::new(scheme, preset, &url)));
                }
            }
        }
        assert_eq!(seen.len(), 2 * 4 * 200);
    }
}
