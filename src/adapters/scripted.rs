//! Scripted Origin Adapter
//!
//! `RevalidationSource` whose answers are queued up front, one per call.
//! Once the script runs out every call answers `NotModified`, like an origin
//! that keeps confirming the cached copy.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::cache::RevalidationOutcome;
use crate::domain::ports::{RevalidationRequest, RevalidationSource};
use crate::error::{Error, Result};

/// One scripted answer
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    /// Answer with this outcome
    Outcome(RevalidationOutcome),
    /// Fail the exchange
    Failure(String),
}

impl From<RevalidationOutcome> for ScriptedResponse {
    fn from(outcome: RevalidationOutcome) -> Self {
        ScriptedResponse::Outcome(outcome)
    }
}

/// Origin collaborator driven by a per-call script
#[derive(Debug, Default)]
pub struct ScriptedOrigin {
    script: Mutex<VecDeque<ScriptedResponse>>,
    calls: Mutex<Vec<RevalidationRequest>>,
}

impl ScriptedOrigin {
    /// Create an origin with an empty script
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an origin answering with `outcomes` in order
    pub fn with_script<I, R>(outcomes: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<ScriptedResponse>,
    {
        let origin = Self::new();
        origin
            .script
            .lock()
            .extend(outcomes.into_iter().map(Into::into));
        origin
    }

    /// Append an answer to the script
    pub fn push(&self, response: impl Into<ScriptedResponse>) {
        self.script.lock().push_back(response.into());
    }

    /// Scripted answers not yet consumed
    pub fn remaining(&self) -> usize {
        self.script.lock().len()
    }

    /// Requests received so far
    pub fn calls(&self) -> Vec<RevalidationRequest> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl RevalidationSource for ScriptedOrigin {
    async fn revalidate(&self, request: &RevalidationRequest) -> Result<RevalidationOutcome> {
        self.calls.lock().push(request.clone());
        let next = self.script.lock().pop_front();

        debug!(
            key = %request.key,
            conditional = request.is_conditional(),
            scripted = next.is_some(),
            "Scripted origin answering"
        );

        match next {
            Some(ScriptedResponse::Outcome(outcome)) => Ok(outcome),
            Some(ScriptedResponse::Failure(reason)) => Err(Error::Origin(reason)),
            None => Ok(RevalidationOutcome::NotModified),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
