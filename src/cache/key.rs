//! Cache Keys
//!
//! A key is the request URI plus the variance axes that select a distinct
//! response for it (e.g. `accept-encoding`). Two fetches are cache-equivalent
//! iff their keys are equal.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Cache key - request URI plus sorted variance axes
#[derive(Clone, Debug, Eq, Serialize, Deserialize)]
#[serde(from = "KeyParts", into = "KeyParts")]
pub struct CacheKey {
    /// Precomputed hash over uri and variance
    hash: u64,
    /// Request URI
    uri: String,
    /// Variance axes, sorted by axis name
    variance: Vec<(String, String)>,
}

impl CacheKey {
    /// Create a key with no variance axes
    pub fn new(uri: impl Into<String>) -> Self {
        Self::from_parts(uri.into(), Vec::new())
    }

    /// Add a variance axis. Axis names are case-insensitive; adding an axis
    /// that already exists replaces its value.
    pub fn with_variance(self, axis: impl Into<String>, value: impl Into<String>) -> Self {
        let axis = axis.into().to_ascii_lowercase();
        let value = value.into();
        let mut variance = self.variance;
        match variance.binary_search_by(|(a, _)| a.as_str().cmp(&axis)) {
            Ok(idx) => variance[idx].1 = value,
            Err(idx) => variance.insert(idx, (axis, value)),
        }
        Self::from_parts(self.uri, variance)
    }

    fn from_parts(uri: String, mut variance: Vec<(String, String)>) -> Self {
        for (axis, _) in &mut variance {
            axis.make_ascii_lowercase();
        }
        variance.sort();
        variance.dedup_by(|a, b| a.0 == b.0);

        let mut hash = Self::fx_hash(0, uri.as_bytes());
        for (axis, value) in &variance {
            hash = Self::fx_hash(hash, axis.as_bytes());
            hash = Self::fx_hash(hash, value.as_bytes());
        }

        Self {
            hash,
            uri,
            variance,
        }
    }

    /// Fast non-cryptographic hash (FxHash algorithm)
    #[inline]
    fn fx_hash(seed: u64, bytes: &[u8]) -> u64 {
        const K: u64 = 0x517cc1b727220a95;
        let mut hash = seed ^ K;
        for &byte in bytes {
            hash = hash.rotate_left(5) ^ (byte as u64);
            hash = hash.wrapping_mul(K);
        }
        hash
    }

    /// Get the request URI
    #[inline]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Get the variance axes, sorted by name
    pub fn variance(&self) -> &[(String, String)] {
        &self.variance
    }

    /// Get the precomputed hash
    #[inline]
    pub fn combined_hash(&self) -> u64 {
        self.hash
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        // Fast path: compare hashes first
        if self.hash != other.hash {
            return false;
        }
        self.uri == other.uri && self.variance == other.variance
    }
}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl PartialOrd for CacheKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CacheKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (&self.uri, &self.variance).cmp(&(&other.uri, &other.variance))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uri)?;
        if !self.variance.is_empty() {
            let axes: Vec<String> = self
                .variance
                .iter()
                .map(|(a, v)| format!("{}={}", a, v))
                .collect();
            write!(f, " [{}]", axes.join(","))?;
        }
        Ok(())
    }
}

impl From<&str> for CacheKey {
    fn from(uri: &str) -> Self {
        Self::new(uri)
    }
}

impl From<String> for CacheKey {
    fn from(uri: String) -> Self {
        Self::new(uri)
    }
}

/// Serialized form of a key
#[derive(Serialize, Deserialize)]
struct KeyParts {
    uri: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    variance: Vec<(String, String)>,
}

impl From<KeyParts> for CacheKey {
    fn from(parts: KeyParts) -> Self {
        CacheKey::from_parts(parts.uri, parts.variance)
    }
}

impl From<CacheKey> for KeyParts {
    fn from(key: CacheKey) -> Self {
        KeyParts {
            uri: key.uri,
            variance: key.variance,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
