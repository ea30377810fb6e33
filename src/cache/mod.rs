//! HTTP Response Cache Entry Store
//!
//! Keeps one entry per cache key: a primary body plus an optional
//! alternative representation, tagged with an identity token that changes
//! only when the primary content is replaced.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                           CacheService::fetch                             │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │  lookup ──► RevalidationSource ──► FreshnessValidator ──► EntryStore      │
//! │                (external)            (pure decision)      (per-key swap)  │
//! │                                                                │          │
//! │                                                        FlushCoordinator   │
//! │                                                    (ordered persistence)  │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Invariants
//!
//! - A lookup never observes a half-applied decision: entries are immutable
//!   `Arc` snapshots swapped whole.
//! - Identity tokens are unique per store lifetime and never reused, even
//!   across eviction.
//! - Attaching or clearing alternative data never changes identity.
//! - A flush returns only after every mutation committed before it is
//!   durable, or reports the failures it observed.

pub mod entry;
pub mod flush;
pub mod identity;
pub mod key;
pub mod metrics;
pub mod service;
pub mod store;
pub mod stream;
pub mod validator;

mod proptest;

pub use entry::{AlternativeStream, CacheEntry, EntryView};
pub use flush::{FlushConfig, FlushCoordinator, PersistOp};
pub use identity::{IdentityMint, IdentityToken};
pub use key::CacheKey;
pub use metrics::{CacheMetrics, LatencyTracker, MetricsSnapshot};
pub use service::{
    AlternativeWriter, BodySource, CacheConfig, CacheService, FetchRequest, FetchResponse,
    Representation,
};
pub use store::{EntryStore, Reconciliation};
pub use stream::{ByteStream, StreamPhase, StreamReader, StreamWriter};
pub use validator::{
    AlternativeIntent, Decision, DecisionKind, FreshnessValidator, RevalidationOutcome,
};
