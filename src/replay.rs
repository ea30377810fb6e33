//! Scenario Replay
//!
//! Drives a [`CacheService`] from a YAML script: a queue of origin answers
//! plus a list of steps with optional expectations. Each step produces one
//! JSON report line.
//!
//! ```yaml
//! origin:
//!   - full: { body: "response body", content_type: "text/plain" }
//! steps:
//!   - fetch: { key: "http://localhost/content", prefer: "text/binary",
//!              expect: { cache_entry_id: absent } }
//!   - write_alternative: { key: "http://localhost/content", label: "text/binary", data: "XYZ" }
//!   - fetch: { key: "http://localhost/content", prefer: "text/binary",
//!              expect: { alternative_type: "text/binary", remember: first } }
//! ```
//!
//! Once the `origin` list runs out every fetch is answered not-modified.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::adapters::{InMemoryPersistence, ScriptedOrigin, ScriptedResponse};
use crate::cache::{
    CacheConfig, CacheKey, CacheService, FetchRequest, FetchResponse, IdentityToken,
    RevalidationOutcome,
};
use crate::domain::ports::PersistenceBackend;
use crate::error::{Error, Result};

// =============================================================================
// Scenario Format
// =============================================================================

/// A replayable scenario
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    #[serde(default)]
    pub name: Option<String>,
    /// Origin answers, consumed one per fetch
    #[serde(default, with = "serde_yaml::with::singleton_map_recursive")]
    pub origin: Vec<OriginAnswer>,
    #[serde(with = "serde_yaml::with::singleton_map_recursive")]
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OriginAnswer {
    Full {
        body: String,
        #[serde(default = "default_content_type")]
        content_type: String,
    },
    NotModified,
    /// Fail the exchange with this message
    Failure(String),
}

fn default_content_type() -> String {
    "text/plain".to_string()
}

impl From<OriginAnswer> for ScriptedResponse {
    fn from(answer: OriginAnswer) -> Self {
        match answer {
            OriginAnswer::Full { body, content_type } => {
                ScriptedResponse::Outcome(RevalidationOutcome::full(body, content_type))
            }
            OriginAnswer::NotModified => {
                ScriptedResponse::Outcome(RevalidationOutcome::NotModified)
            }
            OriginAnswer::Failure(reason) => ScriptedResponse::Failure(reason),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Fetch {
        key: String,
        #[serde(default)]
        prefer: Option<String>,
        #[serde(default)]
        expect: Option<Expectation>,
    },
    /// Write alternative data against the last response fetched for `key`
    WriteAlternative {
        key: String,
        label: String,
        data: String,
    },
    Flush,
    Evict {
        key: String,
    },
    ClearAlternative {
        key: String,
    },
}

impl Step {
    fn action(&self) -> &'static str {
        match self {
            Step::Fetch { .. } => "fetch",
            Step::WriteAlternative { .. } => "write_alternative",
            Step::Flush => "flush",
            Step::Evict { .. } => "evict",
            Step::ClearAlternative { .. } => "clear_alternative",
        }
    }
}

/// Checks applied to a fetch response
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Expectation {
    #[serde(default)]
    pub body: Option<String>,
    /// Label of the served alternative; empty string means primary served
    #[serde(default)]
    pub alternative_type: Option<String>,
    #[serde(default)]
    pub from_cache: Option<bool>,
    #[serde(default)]
    pub cache_entry_id: Option<EntryIdExpectation>,
    /// Remember the live entry identity under this name
    #[serde(default)]
    pub remember: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryIdExpectation {
    Absent,
    Present,
    SameAs(String),
    DiffersFrom(String),
}

// =============================================================================
// Reports
// =============================================================================

/// One line of replay output
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub step: usize,
    pub action: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<IdentityToken>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_entry_id: Option<IdentityToken>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_cache: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alternative_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_len: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persisted_records: Option<u64>,
}

impl StepReport {
    fn new(step: usize, action: &'static str) -> Self {
        Self {
            step,
            action,
            key: None,
            identity: None,
            cache_entry_id: None,
            decision: None,
            from_cache: None,
            alternative_type: None,
            body_len: None,
            persisted_records: None,
        }
    }

    fn with_key(mut self, key: &str) -> Self {
        self.key = Some(key.to_string());
        self
    }
}

// =============================================================================
// Replayer
// =============================================================================

/// Runs scenarios against a fresh in-memory `CacheService`
pub struct Replayer {
    service: CacheService,
    origin: Arc<ScriptedOrigin>,
    backend: Option<Arc<InMemoryPersistence>>,
    last: HashMap<String, FetchResponse>,
    remembered: HashMap<String, IdentityToken>,
}

impl Replayer {
    pub fn new(config: CacheConfig) -> Self {
        let origin = Arc::new(ScriptedOrigin::new());
        let service = CacheService::with_config(config, origin.clone());
        Self::from_parts(service, origin, None)
    }

    /// Replayer whose cache persists through an in-memory backend, so
    /// `flush` steps wait on the persistence barrier.
    /// Must be called from within a Tokio runtime.
    pub fn with_persistence(config: CacheConfig) -> Self {
        let origin = Arc::new(ScriptedOrigin::new());
        let backend = Arc::new(InMemoryPersistence::new());
        let service = CacheService::with_persistence(config, origin.clone(), backend.clone());
        Self::from_parts(service, origin, Some(backend))
    }

    fn from_parts(
        service: CacheService,
        origin: Arc<ScriptedOrigin>,
        backend: Option<Arc<InMemoryPersistence>>,
    ) -> Self {
        Self {
            service,
            origin,
            backend,
            last: HashMap::new(),
            remembered: HashMap::new(),
        }
    }

    pub fn service(&self) -> &CacheService {
        &self.service
    }

    /// Persistence backend, when replaying with persistence
    pub fn backend(&self) -> Option<&Arc<InMemoryPersistence>> {
        self.backend.as_ref()
    }

    /// Identity remembered under `name`
    pub fn remembered(&self, name: &str) -> Option<IdentityToken> {
        self.remembered.get(name).copied()
    }

    /// Replay `scenario`, writing one JSON line per step to `out`
    pub async fn run<W: Write>(&mut self, scenario: Scenario, out: &mut W) -> Result<Vec<StepReport>> {
        info!(
            name = scenario.name.as_deref().unwrap_or("unnamed"),
            steps = scenario.steps.len(),
            origin_answers = scenario.origin.len(),
            "Replaying scenario"
        );
        for answer in scenario.origin {
            self.origin.push(answer);
        }

        let mut reports = Vec::with_capacity(scenario.steps.len());
        for (index, step) in scenario.steps.into_iter().enumerate() {
            let step_no = index + 1;
            debug!(step = step_no, action = step.action(), "Replaying step");
            let report = self.run_step(step_no, step).await?;
            serde_json::to_writer(&mut *out, &report)?;
            out.write_all(b"\n")?;
            reports.push(report);
        }
        Ok(reports)
    }

    async fn run_step(&mut self, step_no: usize, step: Step) -> Result<StepReport> {
        let action = step.action();
        match step {
            Step::Fetch {
                key,
                prefer,
                expect,
            } => {
                let mut request = FetchRequest::new(key.as_str());
                if let Some(label) = prefer {
                    request = request.prefer_alternative(label);
                }
                let response = self.service.fetch(request).await?;
                if let Some(expect) = expect {
                    self.check(step_no, &response, &expect)?;
                }

                let mut report = StepReport::new(step_no, action).with_key(&key);
                report.identity = Some(response.identity());
                report.cache_entry_id = Some(response.cache_entry_id());
                report.decision = Some(response.decision.as_str());
                report.from_cache = Some(response.from_cache());
                report.alternative_type = response.alternative_data_type().map(str::to_string);
                report.body_len = Some(response.body.len());

                self.last.insert(key, response);
                Ok(report)
            }

            Step::WriteAlternative { key, label, data } => {
                let response = self.last.get(&key).ok_or_else(|| {
                    Error::Scenario(format!(
                        "step {}: write_alternative for {} before any fetch",
                        step_no, key
                    ))
                })?;
                let mut writer = response.open_alternative_output(label);
                writer.write(data.as_bytes())?;
                let view = writer.finish().await?;

                let mut report = StepReport::new(step_no, action).with_key(&key);
                report.identity = Some(view.identity());
                report.alternative_type = view.alternative_label().map(str::to_string);
                report.body_len = Some(data.len());
                Ok(report)
            }

            Step::Flush => {
                self.service.flush().await?;
                let mut report = StepReport::new(step_no, action);
                report.persisted_records = self
                    .backend
                    .as_ref()
                    .map(|backend| backend.stats().record_count);
                Ok(report)
            }

            Step::Evict { key } => {
                let removed = self.service.evict(&CacheKey::new(key.as_str())).await?;
                let mut report = StepReport::new(step_no, action).with_key(&key);
                report.identity = removed;
                Ok(report)
            }

            Step::ClearAlternative { key } => {
                let view = self
                    .service
                    .clear_alternative(&CacheKey::new(key.as_str()))
                    .await?;
                let mut report = StepReport::new(step_no, action).with_key(&key);
                report.identity = Some(view.identity());
                Ok(report)
            }
        }
    }

    fn check(&mut self, step_no: usize, response: &FetchResponse, expect: &Expectation) -> Result<()> {
        let fail = |what: String| Error::Scenario(format!("step {}: {}", step_no, what));

        if let Some(body) = &expect.body {
            if response.body.as_ref() != body.as_bytes() {
                return Err(fail(format!(
                    "expected body {:?}, got {:?}",
                    body,
                    String::from_utf8_lossy(&response.body)
                )));
            }
        }

        if let Some(expected) = &expect.alternative_type {
            let actual = response.alternative_data_type().unwrap_or("");
            if actual != expected {
                return Err(fail(format!(
                    "expected alternative type {:?}, got {:?}",
                    expected, actual
                )));
            }
        }

        if let Some(expected) = expect.from_cache {
            if response.from_cache() != expected {
                return Err(fail(format!(
                    "expected from_cache={}, got {}",
                    expected,
                    response.from_cache()
                )));
            }
        }

        if let Some(expected) = &expect.cache_entry_id {
            let actual = response.cache_entry_id();
            let ok = match expected {
                EntryIdExpectation::Absent => actual.is_absent(),
                EntryIdExpectation::Present => !actual.is_absent(),
                EntryIdExpectation::SameAs(name) => actual == self.lookup_remembered(step_no, name)?,
                EntryIdExpectation::DiffersFrom(name) => {
                    actual != self.lookup_remembered(step_no, name)?
                }
            };
            if !ok {
                return Err(fail(format!(
                    "cache entry id {} does not satisfy {:?}",
                    actual, expected
                )));
            }
        }

        if let Some(name) = &expect.remember {
            self.remembered.insert(name.clone(), response.identity());
        }
        Ok(())
    }

    fn lookup_remembered(&self, step_no: usize, name: &str) -> Result<IdentityToken> {
        self.remembered(name).ok_or_else(|| {
            Error::Scenario(format!("step {}: nothing remembered as {:?}", step_no, name))
        })
    }
}

/// Parse and replay `path` with `replayer`, handing it back for inspection
pub async fn replay_file<W: Write>(
    path: impl AsRef<Path>,
    mut replayer: Replayer,
    out: &mut W,
) -> Result<Replayer> {
    let scenario = Scenario::from_path(path)?;
    replayer.run(scenario, out).await?;
    Ok(replayer)
}

// =============================================================================
// Tests
// =============================================================================
