//! entrystor - HTTP Response Cache Entry Store
//!
//! Stores cached HTTP responses keyed by request, each with an optional
//! alternative representation (for example a compiled form of a script)
//! and a stable identity token that only changes when the primary content
//! is replaced.
//!
//! # Architecture
//!
//! ```text
//! FetchRequest → CacheService → RevalidationSource (external)
//!                     │
//!                     ├─ FreshnessValidator (decide)
//!                     ├─ EntryStore (apply, per-key atomic)
//!                     └─ FlushCoordinator (ordered persistence)
//! ```
//!
//! # Modules
//!
//! - [`adapters`] - Infrastructure adapters implementing domain ports
//! - [`cache`] - Entry store, validator, streams, flush barrier, fetch API
//! - [`domain`] - Domain layer with ports and events
//! - [`error`] - Error types
//! - [`replay`] - Scenario replay driving a `CacheService` from YAML

pub mod adapters;
pub mod cache;
pub mod domain;
pub mod error;
pub mod replay;

// Re-export commonly used types
pub use cache::{
    AlternativeStream, ByteStream, CacheConfig, CacheEntry, CacheKey, CacheService, EntryStore,
    EntryView, FetchRequest, FetchResponse, FlushCoordinator, FreshnessValidator, IdentityToken,
    RevalidationOutcome,
};
pub use error::{Error, Result};
