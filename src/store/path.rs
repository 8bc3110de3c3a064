//! Pure key -> on-disk path derivation.

use sha1::{Digest, Sha1};

const BLOCK_SIZE: usize = 5;

/// A derived on-disk location for a key: a nested directory path plus the
/// filename within it. `full_path()` is always `path_name/file_name`, and
/// the first path segment uniquely identifies the subtree deletion removes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathKey {
    pub path_name: String,
    pub file_name: String,
}

impl PathKey {
    pub fn full_path(&self) -> String {
        format!("{}/{}", self.path_name, self.file_name)
    }

    /// The first path segment, i.e. the directory `delete` removes to drop
    /// the whole subtree in one shot.
    pub fn first_segment(&self) -> &str {
        self.path_name.split('/').next().unwrap_or(&self.path_name)
    }
}

/// Derives a [`PathKey`] from a key. Implementations must be deterministic:
/// identical input produces identical output on every node.
pub trait PathTransformer: Send + Sync {
    fn derive(&self, key: &str) -> PathKey;
}

/// Content-addressed transform: SHA-1 the key, hex-encode it, and chunk the
/// 40-char digest into 8 segments of 5 characters. The full digest doubles
/// as the filename, so same key always lands at the same place on every
/// node regardless of transport or dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct CasPathTransformer;

impl PathTransformer for CasPathTransformer {
    fn derive(&self, key: &str) -> PathKey {
        let digest = Sha1::digest(key.as_bytes());
        let hex_digest = hex::encode(digest);

        let segment_count = hex_digest.len() / BLOCK_SIZE;
        let mut segments = Vec::with_capacity(segment_count);
        for i in 0..segment_count {
            let from = i * BLOCK_SIZE;
            let to = from + BLOCK_SIZE;
            segments.push(&hex_digest[from..to]);
        }

        PathKey {
            path_name: segments.join("/"),
            file_name: hex_digest,
        }
    }
}

/// Identity transform used in tests: the key is both the path and the
/// filename, with no hashing involved.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullPathTransformer;

impl PathTransformer for NullPathTransformer {
    fn derive(&self, key: &str) -> PathKey {
        PathKey {
            path_name: key.to_string(),
            file_name: key.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cas_transform_matches_reference_digest() {
        let key_path = CasPathTransformer.derive("maysecretkey");
        assert_eq!(
            key_path.path_name,
            "3b2b1/1b7a4/e96a0/7a1d6/68c44/e3fd3/0e96a/49764"
        );
        assert_eq!(
            key_path.file_name,
            "3b2b11b7a4e96a07a1d668c44e3fd30e96a49764"
        );
    }

    #[test]
    fn full_path_has_nine_segments() {
        let key_path = CasPathTransformer.derive("some arbitrary key");
        let segments: Vec<&str> = key_path.full_path().split('/').collect();
        assert_eq!(segments.len(), 9);
    }

    #[test]
    fn derivation_is_deterministic() {
        let a = CasPathTransformer.derive("repeat me");
        let b = CasPathTransformer.derive("repeat me");
        assert_eq!(a, b);
    }

    #[test]
    fn null_transform_round_trips_the_key() {
        let key_path = NullPathTransformer.derive("somefile");
        assert_eq!(key_path.path_name, "somefile");
        assert_eq!(key_path.file_name, "somefile");
    }
}
