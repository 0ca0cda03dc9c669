//! Reachability search over an ordered corpus.
//!
//! Coverage is assumed monotonic in corpus order: if the first `k` entries reach
//! a line, so does every longer prefix. Under that assumption a lower-bound
//! binary search finds the first entry reaching a line in `O(log n)` oracle
//! queries. Flaky targets can break the assumption; results are then best effort
//! unless the linear verification pass is enabled.

use crate::corpus::Corpus;
use crate::oracle::{CoverageOracle, OracleError, Verdict};
use crate::snapshot::{SnapshotBuilder, SnapshotError};
use crate::target::TargetLocation;
use crate::timing::{ElapsedTime, TimestampLedger};
use rayon::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum SearchError {
    /// Staging failed; scratch space problems are fatal to the whole run.
    #[error("Snapshot failure: {0}")]
    Snapshot(#[from] SnapshotError),

    /// The oracle could not answer; fatal only to the current target.
    #[error("Oracle failure: {0}")]
    Oracle(#[from] OracleError),

    #[error("Search was cancelled")]
    Aborted,

    #[error("Failed to build worker pool: {0}")]
    Pool(String),
}

/// Final answer for one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchResult {
    /// `entry` at corpus `index` is the first input reaching the target.
    /// `elapsed` is `None` when the timestamp ledger has no row for it.
    Found {
        entry: String,
        index: usize,
        elapsed: Option<ElapsedTime>,
    },
    /// The full corpus does not reach the target.
    NotFound,
    /// The coverage tool failed while answering for this target.
    Inconclusive { reason: String },
    /// The search was cancelled before it finished.
    Aborted,
}

/// A target paired with its result, in input order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetReport {
    pub target: TargetLocation,
    pub result: SearchResult,
}

/// Cooperative cancellation flag shared between searches and watchdogs.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Cancels the token once `deadline` has elapsed.
    pub fn cancel_after(&self, deadline: Duration) {
        let token = self.clone();
        std::thread::spawn(move || {
            std::thread::sleep(deadline);
            if !token.is_cancelled() {
                warn!(?deadline, "search deadline reached, cancelling");
                token.cancel();
            }
        });
    }
}

#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Worker threads for batch queries and per-target bisections.
    pub threads: usize,
    /// Re-check every bisection with a linear scan and prefer its answer.
    pub verify: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            threads: 1,
            verify: false,
        }
    }
}

pub struct ReachabilitySearch<'a, O: CoverageOracle> {
    corpus: &'a Corpus,
    oracle: &'a O,
    snapshots: SnapshotBuilder,
    cancel: CancelToken,
    options: SearchOptions,
}

impl<'a, O: CoverageOracle> ReachabilitySearch<'a, O> {
    pub fn new(
        corpus: &'a Corpus,
        oracle: &'a O,
        snapshots: SnapshotBuilder,
        cancel: CancelToken,
        options: SearchOptions,
    ) -> Self {
        Self {
            corpus,
            oracle,
            snapshots,
            cancel,
            options,
        }
    }

    /// Stages the first `count` entries in a fresh snapshot and asks whether they reach `target`.
    pub fn probe(&self, count: usize, target: &TargetLocation) -> Result<Verdict, SearchError> {
        if self.cancel.is_cancelled() {
            return Err(SearchError::Aborted);
        }
        let snapshot = self.snapshots.stage(self.corpus, count)?;
        let verdict = self.oracle.probe(snapshot.path(), target)?;
        debug!(%target, staged = snapshot.staged(), ?verdict, "probe");
        Ok(verdict)
    }

    /// Lower-bound search over `[0, n)` for the shortest reaching prefix.
    ///
    /// Assumes the full corpus reaches `target`; returns `n` if no shorter prefix does.
    pub fn bisect(&self, target: &TargetLocation) -> Result<usize, SearchError> {
        let mut left = 0;
        let mut right = self.corpus.len();

        while left < right {
            let mid = left + (right - left) / 2;
            if self.probe(mid, target)?.is_reached() {
                right = mid;
            } else {
                left = mid + 1;
            }
        }
        Ok(left)
    }

    /// Index of the first entry reaching `target`, or `None` if the full corpus misses it.
    ///
    /// An empty corpus is answered without querying the oracle, an unreached
    /// target costs exactly one query.
    pub fn locate(&self, target: &TargetLocation) -> Result<Option<usize>, SearchError> {
        let n = self.corpus.len();
        if n == 0 {
            return Ok(None);
        }
        if !self.probe(n, target)?.is_reached() {
            return Ok(None);
        }
        Ok(Some(entry_index(self.bisect(target)?)))
    }

    /// Reference search probing every prefix in order.
    pub fn linear_scan(&self, target: &TargetLocation) -> Result<Option<usize>, SearchError> {
        for count in 1..=self.corpus.len() {
            if self.probe(count, target)?.is_reached() {
                return Ok(Some(count - 1));
            }
        }
        Ok(None)
    }

    /// Batch mode: stages the whole corpus once and classifies every target
    /// against that single snapshot. Queries run in parallel; the snapshot is
    /// not modified while they are outstanding.
    pub fn triage(
        &self,
        targets: &[TargetLocation],
    ) -> Result<Vec<Result<Verdict, OracleError>>, SearchError> {
        if self.corpus.is_empty() {
            return Ok(vec![Ok(Verdict::NotReached); targets.len()]);
        }
        if self.cancel.is_cancelled() {
            return Err(SearchError::Aborted);
        }

        let snapshot = self.snapshots.stage(self.corpus, self.corpus.len())?;
        if let Err(e) = self.oracle.compute(snapshot.path()) {
            warn!(error = %e, "coverage computation over the full corpus failed");
            return Ok(vec![Err(e); targets.len()]);
        }

        let dir = snapshot.path();
        Ok(targets
            .par_iter()
            .map(|target| self.oracle.query(dir, target))
            .collect())
    }

    /// Two-phase search: batch triage, then a bisection for every reached target.
    /// Results come back in the order of `targets`.
    pub fn run(
        &self,
        targets: &[TargetLocation],
        ledger: &TimestampLedger,
    ) -> Result<Vec<TargetReport>, SearchError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.threads.max(1))
            .build()
            .map_err(|e| SearchError::Pool(e.to_string()))?;

        pool.install(|| -> Result<Vec<TargetReport>, SearchError> {
            let classified = match self.triage(targets) {
                Ok(classified) => classified,
                Err(SearchError::Aborted) => {
                    return Ok(targets
                        .iter()
                        .map(|target| TargetReport {
                            target: target.clone(),
                            result: SearchResult::Aborted,
                        })
                        .collect());
                }
                Err(e) => return Err(e),
            };

            targets
                .par_iter()
                .zip(classified.into_par_iter())
                .map(|(target, verdict)| -> Result<TargetReport, SearchError> {
                    let result = match verdict {
                        Ok(Verdict::Reached) => {
                            info!(%target, "line is reached");
                            self.find_first(target, ledger)?
                        }
                        Ok(Verdict::NotReached) => {
                            info!(%target, "line is not reached");
                            SearchResult::NotFound
                        }
                        Err(e) => {
                            warn!(%target, error = %e, "oracle failed during triage");
                            SearchResult::Inconclusive {
                                reason: e.to_string(),
                            }
                        }
                    };
                    Ok(TargetReport {
                        target: target.clone(),
                        result,
                    })
                })
                .collect()
        })
    }

    /// Bisects a target already known to be reached by the full corpus and
    /// resolves the discovery time of the entry found.
    fn find_first(
        &self,
        target: &TargetLocation,
        ledger: &TimestampLedger,
    ) -> Result<SearchResult, SearchError> {
        let mut index = match self.bisect(target) {
            Ok(prefix) => entry_index(prefix),
            Err(e) => return isolate(target, e),
        };

        if self.options.verify {
            match self.linear_scan(target) {
                Ok(Some(linear)) if linear != index => {
                    warn!(
                        %target,
                        bisected = index,
                        linear,
                        "coverage is not monotonic for this target, using the linear scan"
                    );
                    index = linear;
                }
                Ok(Some(_)) => {}
                Ok(None) => {
                    warn!(%target, "verification scan found no reaching prefix, keeping bisection result");
                }
                Err(e) => return isolate(target, e),
            }
        }

        let Some(entry) = self.corpus.get(index) else {
            return Ok(SearchResult::NotFound);
        };
        let elapsed = match ledger.elapsed_of(&entry.id) {
            Ok(t) => Some(t),
            Err(e) => {
                warn!(%target, error = %e, "discovery time unknown");
                None
            }
        };
        info!(
            %target,
            entry = %entry.id,
            time = elapsed.as_ref().map(|t| t.as_str()).unwrap_or("unknown"),
            "first reaching input"
        );
        Ok(SearchResult::Found {
            entry: entry.id.clone(),
            index,
            elapsed,
        })
    }
}

/// Converts a shortest reaching prefix length into the index of its last entry.
/// A zero-length prefix means the line is reached without any input, which is
/// attributed to the first entry.
fn entry_index(prefix: usize) -> usize {
    prefix.saturating_sub(1)
}

/// Keeps per-target failures from aborting the run.
fn isolate(target: &TargetLocation, err: SearchError) -> Result<SearchResult, SearchError> {
    match err {
        SearchError::Aborted => {
            warn!(%target, "search aborted");
            Ok(SearchResult::Aborted)
        }
        SearchError::Oracle(e) => {
            warn!(%target, error = %e, "oracle failed during bisection");
            Ok(SearchResult::Inconclusive {
                reason: e.to_string(),
            })
        }
        other => Err(other),
    }
}
