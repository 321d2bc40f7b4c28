use crate::concurrency::CancelToken;
use burrow_runtime::{PackageProvider, Resolution, ResolvedInput, RuntimeError};
use burrow_schema::{InputRef, Manifest, ResolvedArtifact};
use burrow_store::ArtifactCache;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How often the coordinator re-checks cancellation and the deadline while
/// waiting on workers.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveOptions {
    pub workers: usize,
    pub timeout: Option<Duration>,
    /// Ignore the cache index and query the provider for every input.
    pub refresh: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            workers: crate::config::DEFAULT_WORKERS,
            timeout: None,
            refresh: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum MissingReason {
    NotFound,
    TimedOut,
    Cancelled,
    Unverified(String),
    Provider(String),
}

impl fmt::Display for MissingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissingReason::NotFound => f.write_str("not found"),
            MissingReason::TimedOut => f.write_str("timed out"),
            MissingReason::Cancelled => f.write_str("cancelled"),
            MissingReason::Unverified(e) => write!(f, "failed verification: {e}"),
            MissingReason::Provider(e) => write!(f, "provider error: {e}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingInput {
    pub input: InputRef,
    pub reason: MissingReason,
}

/// Every problem found in one resolution pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolutionError {
    pub missing: Vec<MissingInput>,
    pub conflicting: Vec<(InputRef, InputRef)>,
}

impl ResolutionError {
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.conflicting.is_empty()
    }

    pub fn is_timeout(&self) -> bool {
        self.missing
            .iter()
            .any(|m| m.reason == MissingReason::TimedOut)
    }
}

impl fmt::Display for ResolutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "resolution failed: {} missing, {} conflicting",
            self.missing.len(),
            self.conflicting.len()
        )?;
        for m in &self.missing {
            write!(f, "\n  missing {}: {}", m.input, m.reason)?;
        }
        for (a, b) in &self.conflicting {
            write!(f, "\n  conflict: {a} and {b} resolve to different artifacts")?;
        }
        Ok(())
    }
}

impl std::error::Error for ResolutionError {}

enum Outcome {
    Found(Arc<ResolvedArtifact>),
    Missing(MissingReason),
}

type LookupResult = Result<Option<ResolvedArtifact>, RuntimeError>;

/// Resolves a manifest's declared inputs against a [`PackageProvider`].
///
/// Lookups fan out over a rayon pool. The calling thread is the only one
/// that touches the cache, and only with artifacts that passed verification.
pub struct Resolver {
    provider: Arc<dyn PackageProvider>,
    cache: ArtifactCache,
    options: ResolveOptions,
    cancel: CancelToken,
}

impl Resolver {
    pub fn new(provider: Arc<dyn PackageProvider>, cache: ArtifactCache) -> Self {
        Self {
            provider,
            cache,
            options: ResolveOptions::default(),
            cancel: CancelToken::new(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: ResolveOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn options(&self) -> &ResolveOptions {
        &self.options
    }

    pub fn resolve(&self, manifest: &Manifest) -> Result<Resolution, ResolutionError> {
        let started = Instant::now();
        let queries = query_list(manifest);
        let mut outcomes: Vec<Option<Outcome>> = queries.iter().map(|_| None).collect();

        let mut cached = 0usize;
        if !self.options.refresh {
            for (slot, input) in outcomes.iter_mut().zip(&queries) {
                match self.cache.lookup(input) {
                    Ok(Some(artifact)) => {
                        debug!("{input}: cache hit {}", artifact.content_id.short());
                        *slot = Some(Outcome::Found(Arc::new(artifact)));
                        cached += 1;
                    }
                    Ok(None) => {}
                    Err(e) => warn!("{input}: ignoring unreadable cache entry: {e}"),
                }
            }
        }

        let pending: Vec<usize> = (0..queries.len())
            .filter(|&i| outcomes[i].is_none())
            .collect();
        if !pending.is_empty() {
            self.query_provider(&queries, &pending, &mut outcomes);
        }

        let mut error = ResolutionError::default();
        let mut found: HashMap<&str, Arc<ResolvedArtifact>> = HashMap::new();
        for (input, outcome) in queries.iter().zip(outcomes) {
            match outcome {
                Some(Outcome::Found(artifact)) => {
                    found.insert(input.name(), artifact);
                }
                Some(Outcome::Missing(reason)) => error.missing.push(MissingInput {
                    input: input.clone(),
                    reason,
                }),
                None => error.missing.push(MissingInput {
                    input: input.clone(),
                    reason: MissingReason::Provider("no result from worker".to_owned()),
                }),
            }
        }
        error.conflicting = find_conflicts(&queries, &found);

        if !error.is_empty() {
            warn!(
                "resolution of '{}' failed: {} missing, {} conflicting",
                manifest.name(),
                error.missing.len(),
                error.conflicting.len()
            );
            return Err(error);
        }

        let entries = manifest
            .inputs()
            .filter_map(|(role, input)| {
                found.get(input.name()).map(|artifact| ResolvedInput {
                    role,
                    input: input.clone(),
                    artifact: Arc::clone(artifact),
                })
            })
            .collect();
        info!(
            "resolved {} inputs for '{}' ({cached} cached) in {:?}",
            queries.len(),
            manifest.name(),
            started.elapsed()
        );
        Ok(Resolution::new(entries))
    }

    fn query_provider(
        &self,
        queries: &[InputRef],
        pending: &[usize],
        outcomes: &mut [Option<Outcome>],
    ) {
        if self.cancel.is_cancelled() {
            for &i in pending {
                outcomes[i] = Some(Outcome::Missing(MissingReason::Cancelled));
            }
            return;
        }

        let (tx, rx) = mpsc::channel::<(usize, LookupResult)>();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.workers.max(1))
            .thread_name(|i| format!("burrow-resolve-{i}"))
            .build();
        if let Err(e) = &pool {
            warn!("falling back to the global pool: {e}");
        }

        for &i in pending {
            let provider = Arc::clone(&self.provider);
            let input = queries[i].clone();
            let tx = tx.clone();
            let job = move || {
                let result = provider.lookup(&input);
                // The coordinator may have stopped listening.
                let _ = tx.send((i, result));
            };
            match &pool {
                Ok(pool) => pool.spawn(job),
                Err(_) => rayon::spawn(job),
            }
        }
        drop(tx);

        let deadline = self.options.timeout.map(|t| Instant::now() + t);
        let mut outstanding = pending.len();
        let mut abandoned = None;
        while outstanding > 0 {
            if self.cancel.is_cancelled() {
                abandoned = Some(MissingReason::Cancelled);
                break;
            }
            let wait = match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        abandoned = Some(MissingReason::TimedOut);
                        break;
                    }
                    (d - now).min(POLL_INTERVAL)
                }
                None => POLL_INTERVAL,
            };
            match rx.recv_timeout(wait) {
                Ok((i, result)) => {
                    outstanding -= 1;
                    outcomes[i] = Some(self.accept(&queries[i], result));
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        if let Some(reason) = abandoned {
            let left: Vec<_> = pending.iter().filter(|&&i| outcomes[i].is_none()).collect();
            warn!("abandoning {} outstanding lookups: {reason}", left.len());
            for &i in left {
                outcomes[i] = Some(Outcome::Missing(reason.clone()));
            }
        }
    }

    /// Verify a provider answer and commit it to the cache.
    fn accept(&self, input: &InputRef, result: LookupResult) -> Outcome {
        let artifact = match result {
            Ok(Some(artifact)) => artifact,
            Ok(None) => {
                debug!("{input}: not found");
                return Outcome::Missing(MissingReason::NotFound);
            }
            Err(e) => {
                debug!("{input}: {e}");
                return Outcome::Missing(MissingReason::Provider(e.to_string()));
            }
        };

        if let Err(e) = artifact.verify() {
            warn!("{input}: rejecting unverifiable artifact: {e}");
            return Outcome::Missing(MissingReason::Unverified(e.to_string()));
        }

        if let Err(e) = self
            .cache
            .put(&artifact)
            .and_then(|id| self.cache.record(input, &id))
        {
            warn!("{input}: could not cache artifact: {e}");
        }
        debug!(
            "{input}: resolved to {} {} ({})",
            artifact.name,
            artifact.version,
            artifact.content_id.short()
        );
        Outcome::Found(Arc::new(artifact))
    }
}

/// Build inputs then link inputs, each name once.
fn query_list(manifest: &Manifest) -> Vec<InputRef> {
    let mut seen = HashSet::new();
    manifest
        .inputs()
        .filter(|(_, input)| seen.insert(input.name()))
        .map(|(_, input)| input.clone())
        .collect()
}

/// Distinct inputs whose artifacts name the same package but differ in content.
fn find_conflicts(
    queries: &[InputRef],
    found: &HashMap<&str, Arc<ResolvedArtifact>>,
) -> Vec<(InputRef, InputRef)> {
    let resolved: Vec<(&InputRef, &Arc<ResolvedArtifact>)> = queries
        .iter()
        .filter_map(|q| found.get(q.name()).map(|a| (q, a)))
        .collect();

    let mut conflicts = Vec::new();
    for (i, (qa, a)) in resolved.iter().enumerate() {
        for (qb, b) in &resolved[i + 1..] {
            if a.name == b.name && a.content_id != b.content_id {
                conflicts.push(((*qa).clone(), (*qb).clone()));
            }
        }
    }
    conflicts
}
