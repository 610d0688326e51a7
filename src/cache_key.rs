//! Content-addressed cache keys.
//!
//! A request's logical identity (the PDF URI or the arXiv id) is hashed with
//! SHA-256 and hex-encoded. The result is 64 lower-case hex characters: fixed
//! length, no path separators, safe as a file name on every platform, and
//! stable across process restarts.
//!
//! The `.tar.gz` extension is a storage-format concern and is appended by
//! [`CacheKey::artifact_file_name`], never by [`derive_cache_key`].

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Extension of every published artifact.
pub const ARTIFACT_EXTENSION: &str = ".tar.gz";

const KEY_LEN: usize = 64;

/// Deterministic, filesystem-safe key derived from a request identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

/// Derive the cache key for a request identity.
///
/// Pure and total: the same identity always yields the same key.
pub fn derive_cache_key(identity: &str) -> CacheKey {
    let digest = Sha256::digest(identity.as_bytes());
    CacheKey(hex::encode(digest))
}

impl CacheKey {
    /// Accept a previously derived key, rejecting anything that could not
    /// have come out of [`derive_cache_key`].
    pub fn parse(s: &str) -> Option<Self> {
        let valid = s.len() == KEY_LEN && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        valid.then(|| CacheKey(s.to_string()))
    }

    /// Recover the key from an artifact file name (`<key>.tar.gz`).
    pub fn from_file_name(name: &str) -> Option<Self> {
        name.strip_suffix(ARTIFACT_EXTENSION).and_then(Self::parse)
    }

    /// File name of the artifact published under this key.
    pub fn artifact_file_name(&self) -> String {
        format!("{}{}", self.0, ARTIFACT_EXTENSION)
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
