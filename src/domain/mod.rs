//! Domain Layer
//!
//! - **Ports** (`ports.rs`) - Trait abstractions for external collaborators
//! - **Events** (`events.rs`) - Cache events for audit and decoupling
//!
//! # Usage
//!
//! ```ignore
//! use entrystor::domain::ports::{RevalidationSource, RevalidationRequest};
//!
//! struct HttpOrigin { /* client */ }
//!
//! #[async_trait]
//! impl RevalidationSource for HttpOrigin {
//!     async fn revalidate(&self, req: &RevalidationRequest) -> Result<RevalidationOutcome> {
//!         // 304 -> NotModified, 200 -> FullContent
//!     }
//! }
//! ```

pub mod events;
pub mod ports;

pub use events::CacheEvent;
pub use ports::{
    AlternativeRecord, EntryRecord, EventPublisher, PersistenceBackend, PersistenceStats,
    RevalidationRequest, RevalidationSource,
};
