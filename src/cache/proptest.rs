//! Property-Based Tests for Entry Reconciliation
//!
//! Drives the validator and store with random operation sequences and checks
//! them against a tiny model.
//!
//! # Test Properties
//!
//! 1. **Identity Stability**: identity changes exactly when the primary is replaced
//! 2. **Uniqueness**: no identity is ever minted twice, eviction included
//! 3. **Alternative Tracking**: the alternative slot matches the last attach/clear
//! 4. **Rejection Is Side-Effect Free**: an inconsistent revalidation changes nothing

#![cfg(test)]

use std::collections::HashSet;

use proptest::prelude::*;

use super::entry::AlternativeStream;
use super::identity::IdentityToken;
use super::key::CacheKey;
use super::store::EntryStore;
use super::stream::ByteStream;
use super::validator::{AlternativeIntent, FreshnessValidator, RevalidationOutcome};
use crate::error::Error;

#[derive(Debug, Clone)]
enum Op {
    Full(Vec<u8>),
    NotModified,
    Supply(Vec<u8>),
    Clear,
    Evict,
}

// =============================================================================
// Property Strategies
// =============================================================================

fn body_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..64)
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => body_strategy().prop_map(Op::Full),
        3 => Just(Op::NotModified),
        2 => body_strategy().prop_map(Op::Supply),
        1 => Just(Op::Clear),
        1 => Just(Op::Evict),
    ]
}

fn ops_strategy() -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(op_strategy(), 1..60)
}

/// What the store should hold after each step
#[derive(Debug, Default)]
struct Model {
    identity: Option<IdentityToken>,
    primary: Vec<u8>,
    alternative: Option<Vec<u8>>,
}

// =============================================================================
// Reconciliation Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Identity changes only on Replace, never repeats, and the live entry
    /// always matches the model.
    #[test]
    fn prop_identity_changes_only_on_replace(ops in ops_strategy()) {
        let store = EntryStore::new();
        let validator = FreshnessValidator::new();
        let key = CacheKey::new("http://localhost/content");
        let mut model = Model::default();
        let mut seen = HashSet::new();

        for op in ops {
            match op {
                Op::Full(body) => {
                    let outcome = RevalidationOutcome::full(body.clone(), "text/plain");
                    let r = store
                        .reconcile_with(&key, |existing| {
                            validator.decide(&key, existing, outcome, &AlternativeIntent::None)
                        })
                        .unwrap();
                    let id = r.view.identity();
                    prop_assert!(seen.insert(id), "identity {} minted twice", id);
                    prop_assert_ne!(Some(id), model.identity);
                    model = Model { identity: Some(id), primary: body, alternative: None };
                }
                Op::NotModified => {
                    let r = store.reconcile_with(&key, |existing| {
                        validator.decide(
                            &key,
                            existing,
                            RevalidationOutcome::NotModified,
                            &AlternativeIntent::None,
                        )
                    });
                    match model.identity {
                        Some(id) => prop_assert_eq!(r.unwrap().view.identity(), id),
                        None => {
                            let rejected = matches!(r, Err(Error::InconsistentRevalidation { .. }));
                            prop_assert!(rejected, "not-modified on an uncached key was accepted");
                        }
                    }
                }
                Op::Supply(data) => {
                    let alt = AlternativeStream::new(
                        "text/binary",
                        ByteStream::sealed("text/binary", data.clone()),
                    );
                    let r = store.reconcile_with(&key, |existing| {
                        validator.decide(
                            &key,
                            existing,
                            RevalidationOutcome::NotModified,
                            &AlternativeIntent::Supply(alt),
                        )
                    });
                    match model.identity {
                        Some(id) => {
                            prop_assert_eq!(r.unwrap().view.identity(), id);
                            model.alternative = Some(data);
                        }
                        None => prop_assert!(r.is_err()),
                    }
                }
                Op::Clear => {
                    let r = store.clear_alternative(&key);
                    match model.identity {
                        Some(id) => {
                            prop_assert_eq!(r.unwrap().view.identity(), id);
                            model.alternative = None;
                        }
                        None => prop_assert!(matches!(r, Err(Error::KeyNotFound(_)))),
                    }
                }
                Op::Evict => {
                    let removed = store.evict(&key).unwrap();
                    prop_assert_eq!(removed, model.identity);
                    model = Model::default();
                }
            }

            let view = store.lookup(&key);
            prop_assert_eq!(view.as_ref().map(|v| v.identity()), model.identity);
            if let Some(view) = view {
                let primary = view.primary().content().unwrap();
                prop_assert_eq!(primary.as_ref(), model.primary.as_slice());
                let alt = view
                    .alternative_for("text/binary")
                    .map(|s| s.content().unwrap().to_vec());
                prop_assert_eq!(alt, model.alternative.clone());
            }
        }
    }

    /// Identities minted across many keys are all distinct.
    #[test]
    fn prop_identities_unique_across_keys(keys in prop::collection::vec(0u8..8, 1..100)) {
        let store = EntryStore::new();
        let mut seen = HashSet::new();

        for k in keys {
            let key = CacheKey::new(format!("http://localhost/{}", k));
            let r = store
                .reconcile_with(&key, |existing| {
                    FreshnessValidator::new().decide(
                        &key,
                        existing,
                        RevalidationOutcome::full("body", "text/plain"),
                        &AlternativeIntent::None,
                    )
                })
                .unwrap();
            prop_assert!(seen.insert(r.view.identity()));
        }
    }
}
