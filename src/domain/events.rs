//! Domain Events
//!
//! Immutable records of changes applied to the entry store. The fetch path
//! publishes one event per committed mutation (and per rejected
//! revalidation) to an [`EventPublisher`](super::ports::EventPublisher).
//!
//! # Example
//!
//! ```ignore
//! let event = CacheEvent::alternative_attached(&view);
//! event_publisher.publish(event).await?;
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::{CacheKey, EntryView, IdentityToken};

/// Domain event describing a change to a cache entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CacheEvent {
    /// First entry stored for a key.
    EntryCreated {
        key: String,
        identity: IdentityToken,
        content_type: String,
        size_bytes: u64,
        alternative: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Primary content replaced; a new identity was minted.
    EntryReplaced {
        key: String,
        previous: IdentityToken,
        identity: IdentityToken,
        size_bytes: u64,
        timestamp: DateTime<Utc>,
    },

    /// Alternative stream added or replaced.
    AlternativeAttached {
        key: String,
        identity: IdentityToken,
        label: String,
        size_bytes: u64,
        timestamp: DateTime<Utc>,
    },

    /// Alternative stream removed.
    AlternativeCleared {
        key: String,
        identity: IdentityToken,
        timestamp: DateTime<Utc>,
    },

    /// Entry removed from the store.
    EntryEvicted {
        key: String,
        identity: IdentityToken,
        timestamp: DateTime<Utc>,
    },

    /// The revalidation collaborator reported an impossible state.
    RevalidationRejected {
        key: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl CacheEvent {
    /// Get the event type name.
    pub fn event_type(&self) -> &'static str {
        match self {
            CacheEvent::EntryCreated { .. } => "EntryCreated",
            CacheEvent::EntryReplaced { .. } => "EntryReplaced",
            CacheEvent::AlternativeAttached { .. } => "AlternativeAttached",
            CacheEvent::AlternativeCleared { .. } => "AlternativeCleared",
            CacheEvent::EntryEvicted { .. } => "EntryEvicted",
            CacheEvent::RevalidationRejected { .. } => "RevalidationRejected",
        }
    }

    /// Get the key the event refers to.
    pub fn key(&self) -> &str {
        match self {
            CacheEvent::EntryCreated { key, .. }
            | CacheEvent::EntryReplaced { key, .. }
            | CacheEvent::AlternativeAttached { key, .. }
            | CacheEvent::AlternativeCleared { key, .. }
            | CacheEvent::EntryEvicted { key, .. }
            | CacheEvent::RevalidationRejected { key, .. } => key,
        }
    }

    /// Get the event timestamp.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            CacheEvent::EntryCreated { timestamp, .. }
            | CacheEvent::EntryReplaced { timestamp, .. }
            | CacheEvent::AlternativeAttached { timestamp, .. }
            | CacheEvent::AlternativeCleared { timestamp, .. }
            | CacheEvent::EntryEvicted { timestamp, .. }
            | CacheEvent::RevalidationRejected { timestamp, .. } => *timestamp,
        }
    }

    // =========================================================================
    // Constructors
    // =========================================================================

    /// Create an EntryCreated event.
    pub fn entry_created(view: &EntryView) -> Self {
        CacheEvent::EntryCreated {
            key: view.key().to_string(),
            identity: view.identity(),
            content_type: view.primary().content_type().to_string(),
            size_bytes: view.primary().len().unwrap_or(0) as u64,
            alternative: view.alternative_label().map(str::to_string),
            timestamp: Utc::now(),
        }
    }

    /// Create an EntryReplaced event.
    pub fn entry_replaced(view: &EntryView, previous: IdentityToken) -> Self {
        CacheEvent::EntryReplaced {
            key: view.key().to_string(),
            previous,
            identity: view.identity(),
            size_bytes: view.primary().len().unwrap_or(0) as u64,
            timestamp: Utc::now(),
        }
    }

    /// Create an AlternativeAttached event.
    pub fn alternative_attached(view: &EntryView) -> Self {
        let (label, size) = view
            .alternative()
            .map(|a| (a.label().to_string(), a.stream().len().unwrap_or(0) as u64))
            .unwrap_or_default();
        CacheEvent::AlternativeAttached {
            key: view.key().to_string(),
            identity: view.identity(),
            label,
            size_bytes: size,
            timestamp: Utc::now(),
        }
    }

    /// Create an AlternativeCleared event.
    pub fn alternative_cleared(view: &EntryView) -> Self {
        CacheEvent::AlternativeCleared {
            key: view.key().to_string(),
            identity: view.identity(),
            timestamp: Utc::now(),
        }
    }

    /// Create an EntryEvicted event.
    pub fn entry_evicted(key: &CacheKey, identity: IdentityToken) -> Self {
        CacheEvent::EntryEvicted {
            key: key.to_string(),
            identity,
            timestamp: Utc::now(),
        }
    }

    /// Create a RevalidationRejected event.
    pub fn revalidation_rejected(key: &CacheKey, reason: impl Into<String>) -> Self {
        CacheEvent::RevalidationRejected {
            key: key.to_string(),
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
