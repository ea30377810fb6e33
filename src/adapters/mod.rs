//! Infrastructure Adapters
//!
//! Implementations of the domain ports.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Ports (domain::ports)                         │
//! │  RevalidationSource │ PersistenceBackend │ EventPublisher        │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Adapters (This Module)                       │
//! │  ScriptedOrigin │ InMemoryPersistence │ LoggingEventPublisher    │
//! │                                       │ InMemoryEventCollector   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A network transport plugs in by implementing `RevalidationSource` and
//! mapping its protocol's conditional response onto `RevalidationOutcome`.

pub mod event_publisher;
pub mod memory;
pub mod scripted;

pub use event_publisher::{InMemoryEventCollector, LoggingEventPublisher};
pub use memory::InMemoryPersistence;
pub use scripted::{ScriptedOrigin, ScriptedResponse};
