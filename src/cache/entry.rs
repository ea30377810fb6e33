//! Cache Entry Types
//!
//! A [`CacheEntry`] is an immutable snapshot: one primary stream, at most one
//! alternative stream and the identity token of the primary generation.
//! Mutations build a new snapshot that shares the untouched streams, so a
//! reader holding an [`EntryView`] never observes a half-applied change.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::identity::IdentityToken;
use super::key::CacheKey;
use super::stream::ByteStream;

/// Alternative representation tagged with its content-type label
#[derive(Debug, Clone)]
pub struct AlternativeStream {
    label: String,
    stream: ByteStream,
}

impl AlternativeStream {
    pub fn new(label: impl Into<String>, stream: ByteStream) -> Self {
        Self {
            label: label.into(),
            stream,
        }
    }

    /// Content-type label the alternative was stored under
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn stream(&self) -> &ByteStream {
        &self.stream
    }

    /// Same label and the very same stream
    pub fn same_as(&self, other: &AlternativeStream) -> bool {
        self.label == other.label && self.stream.ptr_eq(&other.stream)
    }
}

/// Entry snapshot owned by the store
#[derive(Debug, Clone)]
pub struct CacheEntry {
    key: CacheKey,
    identity: IdentityToken,
    primary: ByteStream,
    alternative: Option<AlternativeStream>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl CacheEntry {
    /// New entry for a fresh primary generation
    pub(crate) fn new(
        key: CacheKey,
        identity: IdentityToken,
        primary: ByteStream,
        alternative: Option<AlternativeStream>,
    ) -> Self {
        let now = Utc::now();
        Self {
            key,
            identity,
            primary,
            alternative,
            created_at: now,
            updated_at: now,
        }
    }

    /// Rebuild an entry from persisted state
    pub(crate) fn restored(
        key: CacheKey,
        identity: IdentityToken,
        primary: ByteStream,
        alternative: Option<AlternativeStream>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            key,
            identity,
            primary,
            alternative,
            created_at,
            updated_at: Utc::now(),
        }
    }

    /// Same generation with a different alternative stream
    pub(crate) fn with_alternative(&self, alternative: Option<AlternativeStream>) -> Self {
        Self {
            key: self.key.clone(),
            identity: self.identity,
            primary: self.primary.clone(),
            alternative,
            created_at: self.created_at,
            updated_at: Utc::now(),
        }
    }

    #[inline]
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    #[inline]
    pub fn identity(&self) -> IdentityToken {
        self.identity
    }

    #[inline]
    pub fn primary(&self) -> &ByteStream {
        &self.primary
    }

    #[inline]
    pub fn alternative(&self) -> Option<&AlternativeStream> {
        self.alternative.as_ref()
    }

    pub fn alternative_label(&self) -> Option<&str> {
        self.alternative.as_ref().map(|a| a.label())
    }

    /// Alternative stream if it was stored under `label`
    pub fn alternative_for(&self, label: &str) -> Option<&ByteStream> {
        self.alternative
            .as_ref()
            .filter(|a| a.label() == label)
            .map(|a| a.stream())
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

/// Read-only, cheaply cloneable view of an entry snapshot
#[derive(Debug, Clone)]
pub struct EntryView {
    entry: Arc<CacheEntry>,
}

impl EntryView {
    pub(crate) fn new(entry: Arc<CacheEntry>) -> Self {
        Self { entry }
    }

    pub fn key(&self) -> &CacheKey {
        self.entry.key()
    }

    pub fn identity(&self) -> IdentityToken {
        self.entry.identity()
    }

    pub fn primary(&self) -> &ByteStream {
        self.entry.primary()
    }

    pub fn alternative(&self) -> Option<&AlternativeStream> {
        self.entry.alternative()
    }

    pub fn alternative_label(&self) -> Option<&str> {
        self.entry.alternative_label()
    }

    pub fn alternative_for(&self, label: &str) -> Option<&ByteStream> {
        self.entry.alternative_for(label)
    }

    /// Underlying snapshot
    pub fn entry(&self) -> &CacheEntry {
        &self.entry
    }

    /// True when both views are the same snapshot
    pub fn same_snapshot(&self, other: &EntryView) -> bool {
        Arc::ptr_eq(&self.entry, &other.entry)
    }
}

// =============================================================================
// Tests
// =============================================================================
