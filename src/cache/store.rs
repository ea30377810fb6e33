//! Entry Store
//!
//! Maps cache keys to the live [`CacheEntry`] snapshot.
//!
//! # Design
//!
//! - Key → slot table in a `DashMap`; operations on different keys only meet
//!   briefly on a shard lock while fetching the slot.
//! - Each slot has an exclusive section that serialises reconciliations for
//!   its key, so a decision is always made against the entry it replaces.
//! - The live entry is an `Arc` swapped under a short write lock. Lookups
//!   clone the `Arc` and never see a partially applied decision.
//! - Persistence ops are submitted inside the section, so per-key durable
//!   order matches commit order; the actual I/O happens on the flush writer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, trace, warn};

use super::entry::{AlternativeStream, CacheEntry, EntryView};
use super::flush::{FlushCoordinator, PersistOp};
use super::identity::{IdentityMint, IdentityToken};
use super::key::CacheKey;
use super::metrics::CacheMetrics;
use super::stream::ByteStream;
use super::validator::{Decision, DecisionKind};
use crate::domain::ports::{EntryRecord, PersistenceBackend};
use crate::error::{Error, Result};

/// Per-key slot
struct KeySlot {
    /// Exclusive reconcile section
    section: Mutex<()>,
    /// Live snapshot
    current: RwLock<Option<Arc<CacheEntry>>>,
}

impl KeySlot {
    fn new() -> Self {
        Self {
            section: Mutex::new(()),
            current: RwLock::new(None),
        }
    }

    fn load(&self) -> Option<Arc<CacheEntry>> {
        self.current.read().clone()
    }

    fn is_vacant(&self) -> bool {
        self.current.read().is_none()
    }
}

/// Result of applying a decision
#[derive(Debug, Clone)]
pub struct Reconciliation {
    /// Entry after the decision
    pub view: EntryView,
    /// Decision that was applied
    pub kind: DecisionKind,
    /// Identity before the decision (`ABSENT` on a miss)
    pub previous: IdentityToken,
    /// Whether the live snapshot changed
    pub changed: bool,
}

impl Reconciliation {
    /// True when this reconciliation created the first entry for the key
    pub fn created(&self) -> bool {
        self.previous.is_absent() && self.kind == DecisionKind::Replace
    }
}

/// Concurrent key → entry store
pub struct EntryStore {
    slots: DashMap<CacheKey, Arc<KeySlot>>,
    mint: IdentityMint,
    entries: AtomicU64,
    metrics: Arc<CacheMetrics>,
    flusher: Option<Arc<FlushCoordinator>>,
}

impl Default for EntryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EntryStore {
    /// In-memory store without persistence
    pub fn new() -> Self {
        Self::with_metrics(Arc::new(CacheMetrics::new()))
    }

    /// Store reporting into shared metrics
    pub fn with_metrics(metrics: Arc<CacheMetrics>) -> Self {
        Self {
            slots: DashMap::new(),
            mint: IdentityMint::new(),
            entries: AtomicU64::new(0),
            metrics,
            flusher: None,
        }
    }

    /// Ship committed mutations to `flusher`
    pub fn with_flusher(mut self, flusher: Arc<FlushCoordinator>) -> Self {
        self.flusher = Some(flusher);
        self
    }

    pub fn metrics(&self) -> &Arc<CacheMetrics> {
        &self.metrics
    }

    pub fn flusher(&self) -> Option<&Arc<FlushCoordinator>> {
        self.flusher.as_ref()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.entries.load(Ordering::Relaxed) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys with a live entry
    pub fn keys(&self) -> Vec<CacheKey> {
        self.slots
            .iter()
            .filter(|slot| !slot.value().is_vacant())
            .map(|slot| slot.key().clone())
            .collect()
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Current entry for `key`, if any. No side effects beyond metrics.
    pub fn lookup(&self, key: &CacheKey) -> Option<EntryView> {
        let entry = self.existing_slot(key).and_then(|slot| slot.load());
        match entry {
            Some(entry) => {
                self.metrics.record_hit();
                Some(EntryView::new(entry))
            }
            None => {
                self.metrics.record_miss();
                None
            }
        }
    }

    /// Identity of the live entry, `ABSENT` when nothing is cached
    pub fn identity_of(&self, key: &CacheKey) -> IdentityToken {
        self.existing_slot(key)
            .and_then(|slot| slot.load())
            .map(|entry| entry.identity())
            .unwrap_or(IdentityToken::ABSENT)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Apply `decision` to the entry for `key`
    pub fn reconcile(&self, key: &CacheKey, decision: Decision) -> Result<Reconciliation> {
        self.reconcile_with(key, |_| Ok(decision))
    }

    /// Decide and apply atomically: `decide` sees the entry that the decision
    /// will replace, with no other reconciliation for `key` in between.
    pub fn reconcile_with<F>(&self, key: &CacheKey, decide: F) -> Result<Reconciliation>
    where
        F: FnOnce(Option<&CacheEntry>) -> Result<Decision>,
    {
        let slot = self.slot(key);
        let result = self.reconcile_in_slot(key, &slot, decide);
        drop(slot);
        self.release_if_vacant(key);
        result
    }

    fn reconcile_in_slot<F>(&self, key: &CacheKey, slot: &KeySlot, decide: F) -> Result<Reconciliation>
    where
        F: FnOnce(Option<&CacheEntry>) -> Result<Decision>,
    {
        let _section = slot.section.lock();
        let existing = slot.load();
        let previous = existing
            .as_ref()
            .map(|e| e.identity())
            .unwrap_or(IdentityToken::ABSENT);

        let decision = decide(existing.as_deref())?;
        let kind = decision.kind();

        let (next, changed) = match decision {
            Decision::Keep => (require(key, existing)?, false),

            Decision::AttachAlternative(alt) => {
                ensure_sealed(alt.stream())?;
                let current = require(key, existing)?;
                if current.alternative().is_some_and(|a| a.same_as(&alt)) {
                    (current, false)
                } else {
                    (Arc::new(current.with_alternative(Some(alt))), true)
                }
            }

            Decision::ClearAlternative => {
                let current = require(key, existing)?;
                if current.alternative().is_none() {
                    (current, false)
                } else {
                    (Arc::new(current.with_alternative(None)), true)
                }
            }

            Decision::Replace {
                primary,
                alternative,
            } => {
                ensure_sealed(&primary)?;
                if let Some(alt) = &alternative {
                    ensure_sealed(alt.stream())?;
                }
                let identity = self.mint.mint()?;
                if identity <= previous {
                    return Err(Error::IdentityCollision {
                        key: key.to_string(),
                        previous,
                        minted: identity,
                    });
                }
                let entry = CacheEntry::new(key.clone(), identity, primary, alternative);
                (Arc::new(entry), true)
            }
        };

        if changed {
            if let Some(flusher) = &self.flusher {
                flusher.submit(PersistOp::Store(EntryRecord::from_entry(&next)?))?;
            }
            *slot.current.write() = Some(next.clone());
            if previous.is_absent() {
                let entries = self.entries.fetch_add(1, Ordering::Relaxed) + 1;
                self.metrics.set_entries(entries);
            }
        }
        self.metrics.record_decision(kind);

        trace!(
            key = %key,
            decision = %kind,
            previous = %previous,
            identity = %next.identity(),
            changed,
            "Reconciled entry"
        );

        Ok(Reconciliation {
            view: EntryView::new(next),
            kind,
            previous,
            changed,
        })
    }

    /// Attach an alternative to the generation identified by `expected`.
    /// Fails with `StaleEntry` when the primary has been replaced (or the
    /// entry evicted) since the caller observed it.
    pub fn attach_alternative(
        &self,
        key: &CacheKey,
        expected: IdentityToken,
        alternative: AlternativeStream,
    ) -> Result<Reconciliation> {
        self.reconcile_with(key, |current| {
            let current_identity = current
                .map(|e| e.identity())
                .unwrap_or(IdentityToken::ABSENT);
            if current_identity != expected || expected.is_absent() {
                return Err(Error::StaleEntry {
                    key: key.to_string(),
                    expected,
                    current: current_identity,
                });
            }
            Ok(Decision::AttachAlternative(alternative))
        })
    }

    /// Remove the alternative stream, keeping the primary and identity
    pub fn clear_alternative(&self, key: &CacheKey) -> Result<Reconciliation> {
        self.reconcile(key, Decision::ClearAlternative)
    }

    /// Remove the entry for `key`. Evicting an absent key is a no-op.
    /// Returns the identity that was removed.
    pub fn evict(&self, key: &CacheKey) -> Result<Option<IdentityToken>> {
        let Some(slot) = self.existing_slot(key) else {
            return Ok(None);
        };

        let removed = {
            let _section = slot.section.lock();
            match slot.load() {
                Some(entry) => {
                    if let Some(flusher) = &self.flusher {
                        flusher.submit(PersistOp::Remove(key.clone()))?;
                    }
                    slot.current.write().take();
                    let entries = self.entries.fetch_sub(1, Ordering::Relaxed) - 1;
                    self.metrics.set_entries(entries);
                    self.metrics.record_eviction();
                    Some(entry.identity())
                }
                None => None,
            }
        };

        drop(slot);
        self.release_if_vacant(key);

        if let Some(identity) = removed {
            debug!(key = %key, identity = %identity, "Evicted entry");
        }
        Ok(removed)
    }

    /// Evict every entry, returning how many were removed
    pub fn evict_all(&self) -> Result<usize> {
        let mut removed = 0;
        for key in self.keys() {
            if self.evict(&key)?.is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    // =========================================================================
    // Warm start
    // =========================================================================

    /// Load persisted entries into an empty slot table. Keys that already
    /// have a live entry keep it. Future identities are minted above every
    /// restored token.
    pub async fn restore(&self, backend: &dyn PersistenceBackend) -> Result<usize> {
        let records = backend.load_all().await?;
        let mut restored = 0;

        for record in records {
            if record.identity.is_absent() {
                warn!(key = %record.key, "Skipping persisted record without identity");
                continue;
            }
            self.mint.advance_past(record.identity);

            let primary = ByteStream::sealed(record.content_type, record.primary);
            let alternative = record.alternative.map(|alt| {
                AlternativeStream::new(alt.label, ByteStream::sealed(alt.content_type, alt.data))
            });
            let entry = CacheEntry::restored(
                record.key.clone(),
                record.identity,
                primary,
                alternative,
                record.created_at,
            );

            let slot = self.slot(&record.key);
            let _section = slot.section.lock();
            let mut current = slot.current.write();
            if current.is_none() {
                *current = Some(Arc::new(entry));
                let entries = self.entries.fetch_add(1, Ordering::Relaxed) + 1;
                self.metrics.set_entries(entries);
                restored += 1;
            }
        }

        info!(restored, "Restored persisted cache entries");
        Ok(restored)
    }

    // =========================================================================
    // Slot management
    // =========================================================================

    fn existing_slot(&self, key: &CacheKey) -> Option<Arc<KeySlot>> {
        self.slots.get(key).map(|slot| slot.value().clone())
    }

    fn slot(&self, key: &CacheKey) -> Arc<KeySlot> {
        if let Some(slot) = self.existing_slot(key) {
            return slot;
        }
        self.slots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(KeySlot::new()))
            .value()
            .clone()
    }

    /// Drop an empty slot nobody else holds. Holding the shard lock inside
    /// `remove_if` means no new handle to the slot can be taken meanwhile.
    fn release_if_vacant(&self, key: &CacheKey) {
        self.slots
            .remove_if(key, |_, slot| Arc::strong_count(slot) == 1 && slot.is_vacant());
    }
}

fn require(key: &CacheKey, existing: Option<Arc<CacheEntry>>) -> Result<Arc<CacheEntry>> {
    existing.ok_or_else(|| Error::KeyNotFound(key.to_string()))
}

fn ensure_sealed(stream: &ByteStream) -> Result<()> {
    stream.content().map(|_| ())
}

// =============================================================================
// Tests
// =============================================================================
