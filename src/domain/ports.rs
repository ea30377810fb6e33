//! Domain Ports (Port/Adapter Pattern)
//!
//! Collaborators the cache core depends on but never implements itself:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Cache Core                             │
//! │   CacheService ── EntryStore ── FlushCoordinator             │
//! └─────────────────────────────────────────────────────────────┘
//!          │                   │                     │
//!          ▼                   ▼                     ▼
//! ┌──────────────────┐ ┌──────────────────┐ ┌──────────────────┐
//! │RevalidationSource│ │PersistenceBackend│ │  EventPublisher  │
//! │ (network/origin) │ │ (durable store)  │ │ (audit/logging)  │
//! └──────────────────┘ └──────────────────┘ └──────────────────┘
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::cache::{CacheEntry, CacheKey, IdentityToken, RevalidationOutcome};
use crate::error::Result;

use super::events::CacheEvent;

// =============================================================================
// Revalidation
// =============================================================================

/// What the core tells the origin collaborator about a fetch.
#[derive(Debug, Clone)]
pub struct RevalidationRequest {
    /// Key being fetched
    pub key: CacheKey,
    /// Identity of the entry cached at request time (`ABSENT` on a miss)
    pub cached_identity: IdentityToken,
    /// Whether the caller asked for an alternative representation
    pub wants_alternative: bool,
    /// Label of the preferred alternative, if any
    pub preferred_label: Option<String>,
}

impl RevalidationRequest {
    /// True when the origin can answer conditionally.
    pub fn is_conditional(&self) -> bool {
        !self.cached_identity.is_absent()
    }
}

/// Port for the external conditional-request exchange.
///
/// Implementations map their protocol's revalidation response (e.g. 200 vs
/// 304) to a two-valued [`RevalidationOutcome`].
#[async_trait]
pub trait RevalidationSource: Send + Sync {
    /// Perform the exchange for `request`.
    async fn revalidate(&self, request: &RevalidationRequest) -> Result<RevalidationOutcome>;
}

// =============================================================================
// Persistence
// =============================================================================

/// Persisted alternative stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlternativeRecord {
    pub label: String,
    pub content_type: String,
    pub data: Bytes,
}

/// Durable form of one entry snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRecord {
    pub key: CacheKey,
    pub identity: IdentityToken,
    pub content_type: String,
    pub primary: Bytes,
    pub alternative: Option<AlternativeRecord>,
    pub created_at: DateTime<Utc>,
}

impl EntryRecord {
    /// Snapshot an entry. Entries only ever hold sealed streams.
    pub fn from_entry(entry: &CacheEntry) -> Result<Self> {
        let alternative = match entry.alternative() {
            Some(alt) => Some(AlternativeRecord {
                label: alt.label().to_string(),
                content_type: alt.stream().content_type().to_string(),
                data: alt.stream().content()?,
            }),
            None => None,
        };
        Ok(Self {
            key: entry.key().clone(),
            identity: entry.identity(),
            content_type: entry.primary().content_type().to_string(),
            primary: entry.primary().content()?,
            alternative,
            created_at: entry.created_at(),
        })
    }

    /// Total payload bytes.
    pub fn size_bytes(&self) -> u64 {
        let alt = self.alternative.as_ref().map(|a| a.data.len()).unwrap_or(0);
        (self.primary.len() + alt) as u64
    }
}

/// Persistence backend statistics
#[derive(Debug, Clone, Default)]
pub struct PersistenceStats {
    /// Records currently stored
    pub record_count: u64,
    /// Payload bytes currently stored
    pub total_bytes: u64,
    /// Store operations
    pub writes: u64,
    /// Remove operations
    pub deletes: u64,
}

/// Port for asynchronous durable storage of entries.
#[async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Store (or overwrite) the record for `record.key`.
    async fn store(&self, record: EntryRecord) -> Result<()>;

    /// Remove the record for `key`, returning whether one existed.
    async fn remove(&self, key: &CacheKey) -> Result<bool>;

    /// All stored records, for warm start.
    async fn load_all(&self) -> Result<Vec<EntryRecord>>;

    /// Backend statistics.
    fn stats(&self) -> PersistenceStats;
}

// =============================================================================
// Events
// =============================================================================

/// Port for publishing cache events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a cache event.
    async fn publish(&self, event: CacheEvent) -> Result<()>;

    /// Publish multiple events.
    async fn publish_all(&self, events: Vec<CacheEvent>) -> Result<()>;
}

// =============================================================================
// Tests
// =============================================================================
