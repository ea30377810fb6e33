//! EntryStor Integration Tests
//!
//! End-to-end tests through the public API:
//! - Entry identity across alternative-data churn and content changes
//! - Concurrent fetches and no-torn-entry reads
//! - Flush ordering, persistence failures and warm start
//! - Scenario replay

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;

use entrystor::adapters::{InMemoryEventCollector, InMemoryPersistence, ScriptedOrigin};
use entrystor::cache::{
    BodySource, CacheConfig, CacheKey, CacheService, FetchRequest, IdentityToken, Representation,
    RevalidationOutcome,
};
use entrystor::domain::PersistenceBackend;
use entrystor::Error;

const URL: &str = "http://localhost/content";
const RESPONSE: &str = "response body";
const RESPONSE_2: &str = "response body 2";
const ALT: &str = "!@#$%^&*()";
const ALT_TYPE: &str = "text/binary";

fn full(body: &str) -> RevalidationOutcome {
    RevalidationOutcome::full(body.to_string(), "text/plain")
}

// =============================================================================
// Entry Identity
// =============================================================================

mod identity_tests {
    use super::*;

    /// Alternative data is stored next to the response and served on
    /// preference; the entry id stays put until the origin changes content.
    #[tokio::test]
    async fn test_cache_entry_id_lifecycle() {
        let origin = Arc::new(ScriptedOrigin::with_script([
            full(RESPONSE),
            RevalidationOutcome::NotModified,
            RevalidationOutcome::NotModified,
            RevalidationOutcome::NotModified,
            RevalidationOutcome::NotModified,
            full(RESPONSE_2),
            RevalidationOutcome::NotModified,
        ]));
        let svc = CacheService::new(origin.clone());

        // Nothing cached: raw data, id absent
        let r = svc
            .fetch(FetchRequest::new(URL).prefer_alternative(ALT_TYPE))
            .await
            .unwrap();
        assert_eq!(r.body.as_ref(), RESPONSE.as_bytes());
        assert_eq!(r.alternative_data_type(), None);
        assert_eq!(r.cache_entry_id(), IdentityToken::ABSENT);

        let mut out = r.open_alternative_output(ALT_TYPE);
        out.write(ALT.as_bytes()).unwrap();
        out.finish().await.unwrap();
        svc.flush().await.unwrap();

        let r = svc
            .fetch(FetchRequest::new(URL).prefer_alternative(ALT_TYPE))
            .await
            .unwrap();
        assert_eq!(r.body.as_ref(), ALT.as_bytes());
        assert_eq!(r.alternative_data_type(), Some(ALT_TYPE));
        let target = r.cache_entry_id();
        assert!(!target.is_absent());

        let r = svc.fetch(FetchRequest::new(URL)).await.unwrap();
        assert_eq!(r.body.as_ref(), RESPONSE.as_bytes());
        assert_eq!(r.alternative_data_type(), None);
        assert_eq!(r.cache_entry_id(), target);

        let r = svc
            .fetch(FetchRequest::new(URL).prefer_alternative(ALT_TYPE))
            .await
            .unwrap();
        assert_eq!(r.body.as_ref(), ALT.as_bytes());
        assert_eq!(r.cache_entry_id(), target);

        let r = svc.fetch(FetchRequest::new(URL)).await.unwrap();
        assert_eq!(r.body.as_ref(), RESPONSE.as_bytes());
        assert_eq!(r.cache_entry_id(), target);

        // Changed content arrives from the network
        let r = svc.fetch(FetchRequest::new(URL)).await.unwrap();
        assert_eq!(r.body.as_ref(), RESPONSE_2.as_bytes());
        assert_eq!(r.source, BodySource::Network);
        assert_eq!(r.cache_entry_id(), IdentityToken::ABSENT);
        assert_ne!(r.identity(), target);

        let r = svc.fetch(FetchRequest::new(URL)).await.unwrap();
        assert_eq!(r.body.as_ref(), RESPONSE_2.as_bytes());
        assert!(!r.cache_entry_id().is_absent());
        assert_ne!(r.cache_entry_id(), target);

        assert_eq!(origin.remaining(), 0);
        assert_eq!(origin.call_count(), 7);
    }

    #[tokio::test]
    async fn test_replace_drops_alternative() {
        let origin = Arc::new(ScriptedOrigin::with_script([full(RESPONSE), full(RESPONSE_2)]));
        let svc = CacheService::new(origin);

        let r = svc.fetch(FetchRequest::new(URL)).await.unwrap();
        let mut out = r.open_alternative_output(ALT_TYPE);
        out.write(ALT.as_bytes()).unwrap();
        out.finish().await.unwrap();

        let r = svc
            .fetch(FetchRequest::new(URL).prefer_alternative(ALT_TYPE))
            .await
            .unwrap();
        assert_eq!(r.representation, Representation::Primary);
        assert_eq!(r.body.as_ref(), RESPONSE_2.as_bytes());
        assert!(r.view.alternative().is_none());
    }

    #[tokio::test]
    async fn test_evict_then_refetch_gets_new_identity() {
        let origin = Arc::new(ScriptedOrigin::with_script([full(RESPONSE), full(RESPONSE)]));
        let svc = CacheService::new(origin);
        let key = CacheKey::new(URL);

        let first = svc.fetch(FetchRequest::new(URL)).await.unwrap().identity();
        assert_eq!(svc.evict(&key).await.unwrap(), Some(first));
        assert_eq!(svc.evict(&key).await.unwrap(), None);

        let second = svc.fetch(FetchRequest::new(URL)).await.unwrap().identity();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_not_modified_for_uncached_key() {
        let events = Arc::new(InMemoryEventCollector::new());
        let svc = CacheService::new(Arc::new(ScriptedOrigin::new()))
            .with_event_publisher(events.clone());

        assert_matches!(
            svc.fetch(FetchRequest::new(URL)).await,
            Err(Error::InconsistentRevalidation { .. })
        );
        assert!(svc.lookup(&CacheKey::new(URL)).is_none());
        assert_eq!(events.event_types(), vec!["RevalidationRejected"]);
    }

    #[tokio::test]
    async fn test_variance_axes_are_distinct_keys() {
        let origin = Arc::new(ScriptedOrigin::with_script([full("gzip"), full("br")]));
        let svc = CacheService::new(origin);
        let gzip = CacheKey::new(URL).with_variance("Accept-Encoding", "gzip");
        let br = CacheKey::new(URL).with_variance("Accept-Encoding", "br");

        let a = svc.fetch(FetchRequest::new(gzip.clone())).await.unwrap();
        let b = svc.fetch(FetchRequest::new(br.clone())).await.unwrap();
        assert_ne!(a.identity(), b.identity());
        assert_eq!(svc.lookup(&gzip).unwrap().primary().content().unwrap().as_ref(), b"gzip");
        assert_eq!(svc.lookup(&br).unwrap().primary().content().unwrap().as_ref(), b"br");
    }
}

// =============================================================================
// Concurrency
// =============================================================================

mod concurrency_tests {
    use super::*;
    use futures::future::join_all;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_fetches_share_one_entry() {
        let origin = Arc::new(ScriptedOrigin::with_script([full(RESPONSE)]));
        let svc = Arc::new(CacheService::new(origin));
        svc.fetch(FetchRequest::new(URL)).await.unwrap();

        let tasks = (0..32).map(|i| {
            let svc = svc.clone();
            tokio::spawn(async move {
                let request = if i % 2 == 0 {
                    FetchRequest::new(URL).prefer_alternative(ALT_TYPE)
                } else {
                    FetchRequest::new(URL)
                };
                svc.fetch(request).await
            })
        });

        let identities: Vec<IdentityToken> = join_all(tasks)
            .await
            .into_iter()
            .map(|r| r.unwrap().unwrap().identity())
            .collect();

        assert!(identities.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(svc.store().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_readers_never_see_mismatched_alternative() {
        let mut script = vec![full("v0")];
        script.extend((1..50).map(|i| full(&format!("v{}", i))));
        let origin = Arc::new(ScriptedOrigin::with_script(script));
        let svc = Arc::new(CacheService::new(origin));
        svc.fetch(FetchRequest::new(URL)).await.unwrap();

        let writer = {
            let svc = svc.clone();
            tokio::spawn(async move {
                for _ in 1..50 {
                    let r = svc.fetch(FetchRequest::new(URL)).await.unwrap();
                    // Alternative derived from the primary it is attached to
                    let mut out = r.open_alternative_output(ALT_TYPE);
                    out.write(&r.body).unwrap();
                    let _ = out.finish().await;
                    tokio::task::yield_now().await;
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let svc = svc.clone();
                tokio::spawn(async move {
                    for _ in 0..500 {
                        let view = svc.lookup(&CacheKey::new(URL)).unwrap();
                        if let Some(alt) = view.alternative_for(ALT_TYPE) {
                            assert_eq!(
                                alt.content().unwrap(),
                                view.primary().content().unwrap()
                            );
                        }
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        writer.await.unwrap();
        for r in readers {
            r.await.unwrap();
        }
    }
}

// =============================================================================
// Durability
// =============================================================================

mod flush_tests {
    use super::*;

    fn persistent(
        script: Vec<RevalidationOutcome>,
        backend: Arc<InMemoryPersistence>,
    ) -> CacheService {
        let origin = Arc::new(ScriptedOrigin::with_script(script));
        CacheService::with_persistence(CacheConfig::default(), origin, backend)
    }

    #[tokio::test]
    async fn test_flush_makes_latest_snapshot_durable() {
        let backend = Arc::new(InMemoryPersistence::new().with_latency(Duration::from_millis(2)));
        let svc = persistent(vec![full(RESPONSE), full(RESPONSE_2)], backend.clone());
        let key = CacheKey::new(URL);

        svc.fetch(FetchRequest::new(URL)).await.unwrap();
        let r = svc.fetch(FetchRequest::new(URL)).await.unwrap();
        let mut out = r.open_alternative_output(ALT_TYPE);
        out.write(ALT.as_bytes()).unwrap();
        out.finish().await.unwrap();

        svc.flush().await.unwrap();

        let record = backend.get(&key).unwrap();
        assert_eq!(record.identity, r.identity());
        assert_eq!(record.primary.as_ref(), RESPONSE_2.as_bytes());
        assert_eq!(record.alternative.unwrap().data.as_ref(), ALT.as_bytes());
        assert_eq!(svc.metrics().persisted_ops, 3);
    }

    #[tokio::test]
    async fn test_flush_after_evict_removes_record() {
        let backend = Arc::new(InMemoryPersistence::new());
        let svc = persistent(vec![full(RESPONSE)], backend.clone());
        let key = CacheKey::new(URL);

        svc.fetch(FetchRequest::new(URL)).await.unwrap();
        svc.evict(&key).await.unwrap();
        svc.flush().await.unwrap();

        assert!(backend.get(&key).is_none());
        assert_eq!(backend.stats().deletes, 1);
    }

    #[tokio::test]
    async fn test_persistence_failure_reported_once() {
        let backend = Arc::new(InMemoryPersistence::new());
        backend.fail_next(1);
        let svc = persistent(vec![full(RESPONSE)], backend.clone());

        svc.fetch(FetchRequest::new(URL)).await.unwrap();
        assert_matches!(
            svc.flush().await,
            Err(Error::FlushFailed { failures: 1, .. })
        );
        // In-memory state is unaffected
        assert!(svc.lookup(&CacheKey::new(URL)).is_some());
        // Already reported
        svc.flush().await.unwrap();
        assert_eq!(svc.metrics().persistence_failures, 1);
    }

    #[tokio::test]
    async fn test_restore_resumes_identities() {
        let backend = Arc::new(InMemoryPersistence::new());
        let svc = persistent(vec![full(RESPONSE)], backend.clone());
        let r = svc.fetch(FetchRequest::new(URL)).await.unwrap();
        let mut out = r.open_alternative_output(ALT_TYPE);
        out.write(ALT.as_bytes()).unwrap();
        out.finish().await.unwrap();
        svc.shutdown().await.unwrap();
        let persisted_id = r.identity();

        let origin = Arc::new(ScriptedOrigin::with_script([
            RevalidationOutcome::NotModified,
            full(RESPONSE_2),
        ]));
        let restored = CacheService::new(origin);
        assert_eq!(restored.restore(backend.as_ref()).await.unwrap(), 1);

        let r = restored
            .fetch(FetchRequest::new(URL).prefer_alternative(ALT_TYPE))
            .await
            .unwrap();
        assert_eq!(r.cache_entry_id(), persisted_id);
        assert_eq!(r.body.as_ref(), ALT.as_bytes());

        let r = restored.fetch(FetchRequest::new(URL)).await.unwrap();
        assert!(r.identity() > persisted_id);
    }

    #[tokio::test]
    async fn test_flush_timeout() {
        let backend =
            Arc::new(InMemoryPersistence::new().with_latency(Duration::from_millis(200)));
        let origin = Arc::new(ScriptedOrigin::with_script([full(RESPONSE)]));
        let config = CacheConfig {
            flush_timeout: Some(Duration::from_millis(10)),
            ..Default::default()
        };
        let svc = CacheService::with_persistence(config, origin, backend);

        svc.fetch(FetchRequest::new(URL)).await.unwrap();
        assert_matches!(svc.flush().await, Err(Error::FlushTimeout(_)));
    }
}

// =============================================================================
// Replay
// =============================================================================

mod replay_tests {
    use super::*;
    use entrystor::replay::{replay_file, Replayer};

    const SCENARIO: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/scenarios/cache-entry-id.yaml");

    #[tokio::test]
    async fn test_replay_cache_entry_id_scenario() {
        let mut out = Vec::new();

        let replayer = replay_file(SCENARIO, Replayer::new(CacheConfig::default()), &mut out)
            .await
            .unwrap();

        let lines = String::from_utf8(out).unwrap();
        assert_eq!(lines.lines().count(), 10);
        assert!(replayer.remembered("target").is_some());

        let metrics = replayer.service().metrics();
        assert_eq!(metrics.replaces, 2);
        assert_eq!(metrics.attaches, 1);
        assert_eq!(metrics.alternatives_served, 2);
        assert!(metrics.encode_text().unwrap().contains("entrystor_"));
    }

    #[tokio::test]
    async fn test_replay_scenario_with_persistence() {
        let mut out = Vec::new();

        let replayer = replay_file(
            SCENARIO,
            Replayer::with_persistence(CacheConfig::default()),
            &mut out,
        )
        .await
        .unwrap();

        let lines: Vec<serde_json::Value> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 10);
        assert_eq!(lines[2]["action"], "flush");
        assert_eq!(lines[2]["persisted_records"], 1);

        // Replace plus attach were durable before the flush step returned
        assert!(replayer.service().metrics().persisted_ops >= 2);
        assert!(replayer.backend().is_some());
    }
}
