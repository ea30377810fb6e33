//! Entry Identity Tokens
//!
//! An identity token names one generation of primary content. A new token is
//! minted only when the primary body is replaced; alternative-stream churn
//! never touches it. Tokens come from a single store-wide counter, so they are
//! unique across keys and ordered by creation.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Opaque identity of a primary-content generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityToken(u64);

impl IdentityToken {
    /// "No entry existed" - unequal to every minted token
    pub const ABSENT: IdentityToken = IdentityToken(0);

    /// Raw value, for persistence and display
    #[inline]
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Rebuild a token from a persisted value
    #[inline]
    pub fn from_u64(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn is_absent(&self) -> bool {
        self.0 == 0
    }
}

impl Default for IdentityToken {
    fn default() -> Self {
        Self::ABSENT
    }
}

impl fmt::Display for IdentityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_absent() {
            write!(f, "absent")
        } else {
            write!(f, "#{}", self.0)
        }
    }
}

/// Store-wide token source
#[derive(Debug)]
pub struct IdentityMint {
    next: AtomicU64,
}

impl Default for IdentityMint {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityMint {
    /// Create a mint whose first token is `#1`
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Mint the next token
    pub fn mint(&self) -> Result<IdentityToken> {
        let raw = self
            .next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_add(1))
            .map_err(|_| Error::Internal("identity space exhausted".to_string()))?;
        Ok(IdentityToken(raw))
    }

    /// Ensure future tokens are strictly greater than `seen`.
    /// Used when restoring persisted entries.
    pub fn advance_past(&self, seen: IdentityToken) {
        let floor = seen.0.saturating_add(1);
        self.next.fetch_max(floor, Ordering::AcqRel);
    }
}

// =============================================================================
// Tests
// =============================================================================
