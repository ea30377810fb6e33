//! Cache Service - Fetch Entry Point
//!
//! Composes lookup → external revalidation → reconcile → representation
//! choice, and hands out alternative-data writers bound to the entry
//! generation they were opened for.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, error, instrument, warn};

use super::entry::{AlternativeStream, EntryView};
use super::flush::{FlushConfig, FlushCoordinator};
use super::identity::IdentityToken;
use super::key::CacheKey;
use super::metrics::{CacheMetrics, MetricsSnapshot};
use super::store::{EntryStore, Reconciliation};
use super::stream::{ByteStream, StreamWriter};
use super::validator::{AlternativeIntent, DecisionKind, FreshnessValidator};
use crate::domain::events::CacheEvent;
use crate::domain::ports::{
    EventPublisher, PersistenceBackend, RevalidationRequest, RevalidationSource,
};
use crate::error::{Error, Result};

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Give up on a flush barrier after this long (`None` waits forever)
    pub flush_timeout: Option<Duration>,
    /// Reject alternative streams larger than this
    pub max_stream_bytes: Option<usize>,
    /// Warn when the persistence backlog exceeds this many ops
    pub persistence_queue_warn: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            flush_timeout: Some(Duration::from_secs(30)),
            max_stream_bytes: Some(64 * 1024 * 1024),
            persistence_queue_warn: 1024,
        }
    }
}

impl CacheConfig {
    /// Reject settings that would make every write or flush fail
    pub fn validate(&self) -> Result<()> {
        if self.max_stream_bytes == Some(0) {
            return Err(Error::Config("max_stream_bytes must be positive".to_string()));
        }
        if self.flush_timeout == Some(Duration::ZERO) {
            return Err(Error::Config(
                "flush_timeout must be positive; use no timeout to wait forever".to_string(),
            ));
        }
        Ok(())
    }

    fn flush_config(&self) -> FlushConfig {
        FlushConfig {
            timeout: self.flush_timeout,
            queue_warn: self.persistence_queue_warn,
        }
    }
}

/// Which stored representation a response carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Representation {
    Primary,
    Alternative,
}

/// Where the response body came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodySource {
    /// Origin sent full content
    Network,
    /// Origin confirmed the cached copy
    Cache,
}

/// A fetch for one key
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub key: CacheKey,
    pub intent: AlternativeIntent,
}

impl FetchRequest {
    pub fn new(key: impl Into<CacheKey>) -> Self {
        Self {
            key: key.into(),
            intent: AlternativeIntent::None,
        }
    }

    /// Prefer the alternative representation stored under `label`
    pub fn prefer_alternative(mut self, label: impl Into<String>) -> Self {
        self.intent = AlternativeIntent::Prefer(label.into());
        self
    }

    /// Store `alternative` alongside the primary as part of this fetch
    pub fn supply_alternative(mut self, alternative: AlternativeStream) -> Self {
        self.intent = AlternativeIntent::Supply(alternative);
        self
    }

    pub fn wants_alternative(&self) -> bool {
        self.intent.wants_alternative()
    }
}

/// Result of a fetch
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// Entry the body was resolved from
    pub view: EntryView,
    /// Representation carried in `body`
    pub representation: Representation,
    /// Response body
    pub body: Bytes,
    /// Whether the body came from the network or the cache
    pub source: BodySource,
    /// Decision applied by the store
    pub decision: DecisionKind,
    sink: AlternativeSink,
}

impl FetchResponse {
    /// Identity of the live entry the response resolved to
    pub fn identity(&self) -> IdentityToken {
        self.view.identity()
    }

    /// Identity of the cache entry the body was read from: `ABSENT` when the
    /// body arrived from the network, the entry identity when served from
    /// cache.
    pub fn cache_entry_id(&self) -> IdentityToken {
        match self.source {
            BodySource::Cache => self.view.identity(),
            BodySource::Network => IdentityToken::ABSENT,
        }
    }

    /// Label of the alternative representation when one was served
    pub fn alternative_data_type(&self) -> Option<&str> {
        match self.representation {
            Representation::Alternative => self.view.alternative_label(),
            Representation::Primary => None,
        }
    }

    /// Content type of the body
    pub fn content_type(&self) -> &str {
        match self.representation {
            Representation::Alternative => self
                .view
                .alternative()
                .map(|a| a.stream().content_type())
                .unwrap_or_else(|| self.view.primary().content_type()),
            Representation::Primary => self.view.primary().content_type(),
        }
    }

    pub fn from_cache(&self) -> bool {
        self.source == BodySource::Cache
    }

    /// Writer for alternative data derived from this response's primary
    pub fn open_alternative_output(&self, label: impl Into<String>) -> AlternativeWriter {
        self.sink.open(&self.view, label.into())
    }
}

/// Everything an `AlternativeWriter` needs to attach its stream
#[derive(Clone)]
struct AlternativeSink {
    store: Arc<EntryStore>,
    events: Option<Arc<dyn EventPublisher>>,
    max_stream_bytes: Option<usize>,
}

impl AlternativeSink {
    fn open(&self, view: &EntryView, label: String) -> AlternativeWriter {
        let (writer, _) = ByteStream::open_with_limit(label.clone(), self.max_stream_bytes);
        AlternativeWriter {
            store: self.store.clone(),
            events: self.events.clone(),
            key: view.key().clone(),
            identity: view.identity(),
            label,
            writer,
        }
    }
}

impl std::fmt::Debug for AlternativeSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlternativeSink")
            .field("max_stream_bytes", &self.max_stream_bytes)
            .field("publishes_events", &self.events.is_some())
            .finish()
    }
}

/// HTTP response cache with alternative-data support
pub struct CacheService {
    store: Arc<EntryStore>,
    origin: Arc<dyn RevalidationSource>,
    validator: FreshnessValidator,
    events: Option<Arc<dyn EventPublisher>>,
    config: CacheConfig,
}

impl CacheService {
    /// In-memory cache with default configuration
    pub fn new(origin: Arc<dyn RevalidationSource>) -> Self {
        Self::with_config(CacheConfig::default(), origin)
    }

    /// In-memory cache
    pub fn with_config(config: CacheConfig, origin: Arc<dyn RevalidationSource>) -> Self {
        Self::from_store(config, origin, EntryStore::new())
    }

    /// Cache persisting every committed mutation to `backend`.
    /// Must be called from within a Tokio runtime.
    pub fn with_persistence(
        config: CacheConfig,
        origin: Arc<dyn RevalidationSource>,
        backend: Arc<dyn PersistenceBackend>,
    ) -> Self {
        let metrics = Arc::new(CacheMetrics::new());
        let flusher = Arc::new(FlushCoordinator::start(
            backend,
            config.flush_config(),
            metrics.clone(),
        ));
        let store = EntryStore::with_metrics(metrics).with_flusher(flusher);
        Self::from_store(config, origin, store)
    }

    fn from_store(
        config: CacheConfig,
        origin: Arc<dyn RevalidationSource>,
        store: EntryStore,
    ) -> Self {
        Self {
            store: Arc::new(store),
            origin,
            validator: FreshnessValidator::new(),
            events: None,
            config,
        }
    }

    /// Publish cache events to `publisher`
    pub fn with_event_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(publisher);
        self
    }

    pub fn store(&self) -> &Arc<EntryStore> {
        &self.store
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    // =========================================================================
    // Fetch
    // =========================================================================

    /// Resolve `request` against the cache and the origin collaborator
    #[instrument(skip(self, request), fields(key = %request.key, wants_alternative = request.wants_alternative()))]
    pub async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse> {
        let FetchRequest { key, intent } = request;

        let cached_identity = self
            .store
            .lookup(&key)
            .map(|view| view.identity())
            .unwrap_or(IdentityToken::ABSENT);

        let revalidation = RevalidationRequest {
            key: key.clone(),
            cached_identity,
            wants_alternative: intent.wants_alternative(),
            preferred_label: intent.label().map(str::to_string),
        };
        let outcome = self.origin.revalidate(&revalidation).await?;
        let source = if outcome.is_not_modified() {
            BodySource::Cache
        } else {
            BodySource::Network
        };

        let validator = self.validator;
        let result = self.store.reconcile_with(&key, |existing| {
            validator.decide(&key, existing, outcome, &intent)
        });

        let reconciled = match result {
            Ok(reconciled) => reconciled,
            Err(e @ Error::InconsistentRevalidation { .. }) => {
                error!(key = %key, error = %e, "Rejecting inconsistent revalidation");
                self.store.metrics().record_inconsistent_revalidation();
                self.publish(CacheEvent::revalidation_rejected(&key, e.to_string()))
                    .await;
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        self.publish_reconciliation(&reconciled).await;

        let view = reconciled.view;
        let alternative = intent
            .label()
            .and_then(|label| view.alternative_for(label))
            .map(|stream| stream.content())
            .transpose()?;
        let (representation, body) = match alternative {
            Some(body) => (Representation::Alternative, body),
            None => (Representation::Primary, view.primary().content()?),
        };

        self.store.metrics().record_served(
            source == BodySource::Cache,
            representation == Representation::Alternative,
        );

        debug!(
            identity = %view.identity(),
            decision = %reconciled.kind,
            ?representation,
            ?source,
            "Fetch resolved"
        );

        Ok(FetchResponse {
            view,
            representation,
            body,
            source,
            decision: reconciled.kind,
            sink: self.sink(),
        })
    }

    // =========================================================================
    // Direct entry operations
    // =========================================================================

    /// Current entry for `key` without contacting the origin
    pub fn lookup(&self, key: &CacheKey) -> Option<EntryView> {
        self.store.lookup(key)
    }

    /// Open a writer for alternative data on the generation `view` belongs to
    pub fn open_alternative_writer(
        &self,
        view: &EntryView,
        label: impl Into<String>,
    ) -> AlternativeWriter {
        self.sink().open(view, label.into())
    }

    fn sink(&self) -> AlternativeSink {
        AlternativeSink {
            store: self.store.clone(),
            events: self.events.clone(),
            max_stream_bytes: self.config.max_stream_bytes,
        }
    }

    /// Remove the alternative stream for `key`
    pub async fn clear_alternative(&self, key: &CacheKey) -> Result<EntryView> {
        let reconciled = self.store.clear_alternative(key)?;
        self.publish_reconciliation(&reconciled).await;
        Ok(reconciled.view)
    }

    /// Remove the entry for `key`; absent keys are a no-op
    pub async fn evict(&self, key: &CacheKey) -> Result<Option<IdentityToken>> {
        let removed = self.store.evict(key)?;
        if let Some(identity) = removed {
            self.publish(CacheEvent::entry_evicted(key, identity)).await;
        }
        Ok(removed)
    }

    /// Durability barrier over every mutation committed before this call
    pub async fn flush(&self) -> Result<()> {
        match self.store.flusher() {
            Some(flusher) => flusher.flush().await,
            None => {
                self.store.metrics().record_flush(Duration::ZERO);
                Ok(())
            }
        }
    }

    /// Warm-start the store from `backend`
    pub async fn restore(&self, backend: &dyn PersistenceBackend) -> Result<usize> {
        self.store.restore(backend).await
    }

    /// Persist everything queued and stop the persistence writer
    pub async fn shutdown(&self) -> Result<()> {
        if let Some(flusher) = self.store.flusher() {
            flusher.shutdown().await?;
        }
        Ok(())
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.store.metrics().snapshot()
    }

    // =========================================================================
    // Events
    // =========================================================================

    async fn publish_reconciliation(&self, reconciled: &Reconciliation) {
        if let Some(event) = event_for(reconciled) {
            self.publish(event).await;
        }
    }

    async fn publish(&self, event: CacheEvent) {
        publish_to(self.events.as_deref(), event).await;
    }
}

fn event_for(reconciled: &Reconciliation) -> Option<CacheEvent> {
    if !reconciled.changed {
        return None;
    }
    let view = &reconciled.view;
    match reconciled.kind {
        DecisionKind::Keep => None,
        DecisionKind::Replace if reconciled.created() => Some(CacheEvent::entry_created(view)),
        DecisionKind::Replace => Some(CacheEvent::entry_replaced(view, reconciled.previous)),
        DecisionKind::AttachAlternative => Some(CacheEvent::alternative_attached(view)),
        DecisionKind::ClearAlternative => Some(CacheEvent::alternative_cleared(view)),
    }
}

async fn publish_to(publisher: Option<&dyn EventPublisher>, event: CacheEvent) {
    if let Some(publisher) = publisher {
        let event_type = event.event_type();
        if let Err(e) = publisher.publish(event).await {
            warn!(event_type, error = %e, "Failed to publish cache event");
        }
    }
}

/// Write-once alternative-data output bound to one entry generation
pub struct AlternativeWriter {
    store: Arc<EntryStore>,
    events: Option<Arc<dyn EventPublisher>>,
    key: CacheKey,
    identity: IdentityToken,
    label: String,
    writer: StreamWriter,
}

impl AlternativeWriter {
    /// Append alternative bytes
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write(data)
    }

    /// Identity the alternative will be attached to
    pub fn identity(&self) -> IdentityToken {
        self.identity
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Seal and attach. Fails with `StaleEntry` when the primary content was
    /// replaced (or evicted) after the writer was opened.
    pub async fn finish(mut self) -> Result<EntryView> {
        let stream = self.writer.seal()?;
        let alternative = AlternativeStream::new(self.label.clone(), stream);
        let reconciled = self
            .store
            .attach_alternative(&self.key, self.identity, alternative)?;

        if let Some(event) = event_for(&reconciled) {
            publish_to(self.events.as_deref(), event).await;
        }
        Ok(reconciled.view)
    }
}

impl std::fmt::Debug for AlternativeWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlternativeWriter")
            .field("key", &self.key)
            .field("identity", &self.identity)
            .field("label", &self.label)
            .field("written", &self.writer.written())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
