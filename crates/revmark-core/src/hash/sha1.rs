use sha1::{Digest, Sha1};

pub fn sha1_hash_string(s: &str) -> String {
    sha1_hash_bytes(s.as_bytes())
}

pub fn sha1_hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Incremental hasher for identities built from several parts.
///
/// Every part is length-prefixed so that `["ab", "c"]` and `["a", "bc"]`
/// never collide.
#[derive(Default, Clone)]
pub struct Sha1Builder {
    hasher: Sha1,
}

impl Sha1Builder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn part(&mut self, part: &str) -> &mut Self {
        self.hasher.update((part.len() as u64).to_le_bytes());
        self.hasher.update(part.as_bytes());
        self
    }

    pub fn finish(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha1_empty_string() {
        assert_eq!(
            sha1_hash_string(""),
            "da39a3ee5e6b4b0d3255bfef95601890afd80709"
        );
    }

    #[test]
    fn sha1_test_string() {
        assert_eq!(
            sha1_hash_string("test"),
            "a94a8fe5ccb19ba61c4c0873d391e987982fbbd3"
        );
    }

    #[test]
    fn sha1_classic_test_phrase() {
        assert_eq!(
            sha1_hash_string("The quick brown fox jumps over the lazy dog"),
            "2fd4e1c67a2d28fced849ee1bb76e7391b93eb12"
        );
    }

    #[test]
    fn builder_separates_parts() {
        let mut left = Sha1Builder::new();
        left.part("ab").part("c");
        let mut right = Sha1Builder::new();
        right.part("a").part("bc");
        assert_ne!(left.finish(), right.finish());
    }

    #[test]
    fn builder_is_deterministic() {
        let build = || {
            let mut b = Sha1Builder::new();
            b.part("w:p").part("hello");
            b.finish()
        };
        assert_eq!(build(), build());
    }
}
