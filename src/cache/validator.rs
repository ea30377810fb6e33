//! Freshness Validation
//!
//! Pure decision function reconciling the entry currently in the store with
//! the outcome of an externally performed revalidation. No I/O happens here.
//!
//! # Decision table
//!
//! | existing | outcome        | alternative intent         | decision                       |
//! |----------|----------------|----------------------------|--------------------------------|
//! | any      | `FullContent`  | `Supply` and no entry      | `Replace` + alternative        |
//! | any      | `FullContent`  | otherwise                  | `Replace`, alternative cleared |
//! | none     | `NotModified`  | any                        | `InconsistentRevalidation`     |
//! | some     | `NotModified`  | `Supply` (new stream)      | `AttachAlternative`            |
//! | some     | `NotModified`  | otherwise                  | `Keep`                         |

use bytes::Bytes;
use tracing::debug;

use super::entry::{AlternativeStream, CacheEntry};
use super::key::CacheKey;
use super::stream::ByteStream;
use crate::error::{Error, Result};

/// Outcome reported by the revalidation collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevalidationOutcome {
    /// Origin returned complete (changed) content
    FullContent { body: Bytes, content_type: String },
    /// Origin confirmed the cached primary is current
    NotModified,
}

impl RevalidationOutcome {
    pub fn full(body: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        RevalidationOutcome::FullContent {
            body: body.into(),
            content_type: content_type.into(),
        }
    }

    pub fn is_not_modified(&self) -> bool {
        matches!(self, RevalidationOutcome::NotModified)
    }
}

/// What the caller wants from the alternative slot
#[derive(Debug, Clone, Default)]
pub enum AlternativeIntent {
    /// Primary only
    #[default]
    None,
    /// Serve the alternative stored under this label if present
    Prefer(String),
    /// Store this alternative alongside the primary
    Supply(AlternativeStream),
}

impl AlternativeIntent {
    pub fn wants_alternative(&self) -> bool {
        !matches!(self, AlternativeIntent::None)
    }

    /// Label the caller asked for, if any
    pub fn label(&self) -> Option<&str> {
        match self {
            AlternativeIntent::None => None,
            AlternativeIntent::Prefer(label) => Some(label.as_str()),
            AlternativeIntent::Supply(alt) => Some(alt.label()),
        }
    }
}

/// Reconciliation applied by the store
#[derive(Debug, Clone)]
pub enum Decision {
    /// Leave the entry untouched
    Keep,
    /// Add or replace the alternative stream; identity unchanged
    AttachAlternative(AlternativeStream),
    /// Drop the alternative stream; identity unchanged
    ClearAlternative,
    /// New primary generation; a fresh identity is minted
    Replace {
        primary: ByteStream,
        alternative: Option<AlternativeStream>,
    },
}

impl Decision {
    /// Short name used in logs, events and metrics
    pub fn kind(&self) -> DecisionKind {
        match self {
            Decision::Keep => DecisionKind::Keep,
            Decision::AttachAlternative(_) => DecisionKind::AttachAlternative,
            Decision::ClearAlternative => DecisionKind::ClearAlternative,
            Decision::Replace { .. } => DecisionKind::Replace,
        }
    }
}

/// Decision discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecisionKind {
    Keep,
    AttachAlternative,
    ClearAlternative,
    Replace,
}

impl DecisionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionKind::Keep => "keep",
            DecisionKind::AttachAlternative => "attach_alternative",
            DecisionKind::ClearAlternative => "clear_alternative",
            DecisionKind::Replace => "replace",
        }
    }
}

impl std::fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stateless freshness validator
#[derive(Debug, Clone, Copy, Default)]
pub struct FreshnessValidator;

impl FreshnessValidator {
    pub fn new() -> Self {
        Self
    }

    /// Decide how to reconcile `existing` with `outcome`
    pub fn decide(
        &self,
        key: &CacheKey,
        existing: Option<&CacheEntry>,
        outcome: RevalidationOutcome,
        intent: &AlternativeIntent,
    ) -> Result<Decision> {
        match (existing, outcome) {
            (None, RevalidationOutcome::NotModified) => Err(Error::InconsistentRevalidation {
                key: key.to_string(),
                reason: "origin reported not-modified but nothing is cached".to_string(),
            }),

            (existing, RevalidationOutcome::FullContent { body, content_type }) => {
                let primary = ByteStream::sealed(content_type, body);
                let alternative = match intent {
                    AlternativeIntent::Supply(alt) if existing.is_none() => Some(alt.clone()),
                    AlternativeIntent::Supply(alt) => {
                        debug!(
                            key = %key,
                            label = alt.label(),
                            "Dropping supplied alternative derived from superseded content"
                        );
                        None
                    }
                    _ => None,
                };
                Ok(Decision::Replace {
                    primary,
                    alternative,
                })
            }

            (Some(entry), RevalidationOutcome::NotModified) => match intent {
                AlternativeIntent::Supply(alt) => match entry.alternative() {
                    Some(current) if current.same_as(alt) => Ok(Decision::Keep),
                    _ => Ok(Decision::AttachAlternative(alt.clone())),
                },
                AlternativeIntent::Prefer(_) | AlternativeIntent::None => Ok(Decision::Keep),
            },
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::identity::IdentityToken;
    use assert_matches::assert_matches;

    fn key() -> CacheKey {
        CacheKey::new("http://localhost/content")
    }

    fn existing(alt: Option<AlternativeStream>) -> CacheEntry {
        CacheEntry::new(
            key(),
            IdentityToken::from_u64(1),
            ByteStream::sealed("text/plain", "response body"),
            alt,
        )
    }

    fn alt(data: &'static str) -> AlternativeStream {
        AlternativeStream::new("text/binary", ByteStream::sealed("text/binary", data))
    }

    #[test]
    fn test_full_content_replaces() {
        let v = FreshnessValidator::new();
        let d = v
            .decide(
                &key(),
                Some(&existing(Some(alt("XYZ")))),
                RevalidationOutcome::full("response body 2", "text/plain"),
                &AlternativeIntent::None,
            )
            .unwrap();

        match d {
            Decision::Replace {
                primary,
                alternative,
            } => {
                assert_eq!(primary.content().unwrap().as_ref(), b"response body 2");
                assert!(alternative.is_none());
            }
            other => panic!("unexpected decision {:?}", other),
        }
    }

    #[test]
    fn test_full_content_on_miss_with_preference_has_no_alternative() {
        let d = FreshnessValidator::new()
            .decide(
                &key(),
                None,
                RevalidationOutcome::full("response body", "text/plain"),
                &AlternativeIntent::Prefer("text/binary".to_string()),
            )
            .unwrap();

        assert_matches!(
            d,
            Decision::Replace {
                alternative: None,
                ..
            }
        );
    }

    #[test]
    fn test_full_content_on_miss_with_supplied_alternative_attaches() {
        let d = FreshnessValidator::new()
            .decide(
                &key(),
                None,
                RevalidationOutcome::full("response body", "text/plain"),
                &AlternativeIntent::Supply(alt("XYZ")),
            )
            .unwrap();

        match d {
            Decision::Replace {
                alternative: Some(a),
                ..
            } => assert_eq!(a.label(), "text/binary"),
            other => panic!("unexpected decision {:?}", other),
        }
    }

    #[test]
    fn test_full_content_drops_supplied_alternative_for_existing_entry() {
        let d = FreshnessValidator::new()
            .decide(
                &key(),
                Some(&existing(None)),
                RevalidationOutcome::full("new", "text/plain"),
                &AlternativeIntent::Supply(alt("XYZ")),
            )
            .unwrap();

        assert_matches!(
            d,
            Decision::Replace {
                alternative: None,
                ..
            }
        );
    }

    #[test]
    fn test_not_modified_without_entry_is_inconsistent() {
        let r = FreshnessValidator::new().decide(
            &key(),
            None,
            RevalidationOutcome::NotModified,
            &AlternativeIntent::None,
        );
        assert_matches!(r, Err(Error::InconsistentRevalidation { .. }));
    }

    #[test]
    fn test_not_modified_keeps() {
        let v = FreshnessValidator::new();
        let entry = existing(Some(alt("XYZ")));

        for intent in [
            AlternativeIntent::None,
            AlternativeIntent::Prefer("text/binary".to_string()),
            AlternativeIntent::Prefer("other/type".to_string()),
        ] {
            let d = v
                .decide(&key(), Some(&entry), RevalidationOutcome::NotModified, &intent)
                .unwrap();
            assert_matches!(d, Decision::Keep);
        }
    }

    #[test]
    fn test_not_modified_with_supplied_alternative_attaches() {
        let d = FreshnessValidator::new()
            .decide(
                &key(),
                Some(&existing(None)),
                RevalidationOutcome::NotModified,
                &AlternativeIntent::Supply(alt("XYZ")),
            )
            .unwrap();
        assert_eq!(d.kind(), DecisionKind::AttachAlternative);
    }

    #[test]
    fn test_resupplying_the_same_alternative_keeps() {
        let a = alt("XYZ");
        let entry = existing(Some(a.clone()));
        let d = FreshnessValidator::new()
            .decide(
                &key(),
                Some(&entry),
                RevalidationOutcome::NotModified,
                &AlternativeIntent::Supply(a),
            )
            .unwrap();
        assert_eq!(d.kind(), DecisionKind::Keep);
    }

    #[test]
    fn test_intent_helpers() {
        assert!(!AlternativeIntent::None.wants_alternative());
        assert_eq!(
            AlternativeIntent::Prefer("a".to_string()).label(),
            Some("a")
        );
        assert_eq!(AlternativeIntent::Supply(alt("x")).label(), Some("text/binary"));
        assert_eq!(DecisionKind::Replace.to_string(), "replace");
    }
}
