// Copyright (c) The bsprun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::lcov::{LcovSection, LineHits, parse_lcov};
use crate::{
    errors::{CoverageError, DisplayErrorChain},
    helpers::{lock, resolve_path, uri_to_path},
    run::OriginId,
};
use camino::{Utf8Path, Utf8PathBuf};
use std::{
    collections::{BTreeMap, HashMap},
    future::Future,
    sync::{Arc, Mutex},
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Opaque key for the per-line details of one file in one ingested report.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct CoverageToken {
    run: OriginId,
    seq: u64,
}

/// Summary of the coverage of one file, produced each time a report mentioning it is ingested.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileCoverage {
    /// Key for [`CoverageAggregator::load_detailed_coverage`].
    pub token: CoverageToken,
    /// Absolute path to the source file.
    pub path: Utf8PathBuf,
    /// Number of lines in the report with a non-zero cumulative hit count.
    pub covered_lines: usize,
    /// Number of lines in the report.
    pub total_lines: usize,
}

/// Cumulative hit count for one line.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LineCoverage {
    /// The 1-based line number.
    pub line: u32,
    /// Total hits for this line across all reports ingested so far in the run.
    pub hits: u64,
}

/// Merges LCOV reports into cumulative per-run, per-file line hit counts.
///
/// Reports are processed one at a time, in the order [`Self::ingest`] was called, by a
/// background worker task. A report that fails to load is reported to the caller and logged;
/// later reports are unaffected.
#[derive(Clone, Debug)]
pub struct CoverageAggregator {
    sender: mpsc::UnboundedSender<IngestJob>,
    state: Arc<Mutex<CoverageState>>,
}

impl CoverageAggregator {
    /// Creates a new aggregator and spawns its worker.
    ///
    /// Relative paths in reports are resolved against `workspace_root`. Must be called from
    /// within a tokio runtime.
    pub fn new(workspace_root: impl Into<Utf8PathBuf>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(CoverageState::default()));
        tokio::spawn(run_worker(receiver, state.clone(), workspace_root.into()));
        Self { sender, state }
    }

    /// Restricts coverage for `run` to files under the given directories.
    ///
    /// Empty paths are ignored. If no roots remain, all files are included.
    pub fn set_coverage_roots(&self, run: OriginId, roots: impl IntoIterator<Item = Utf8PathBuf>) {
        let roots: Vec<_> = roots
            .into_iter()
            .filter(|root| !root.as_str().is_empty())
            .collect();
        lock(&self.state).runs.entry(run).or_default().roots = roots;
    }

    /// Queues the report at `report_uri` (a path or `file://` URI) for ingestion into `run`.
    ///
    /// The report is queued immediately; the returned future resolves once it has been
    /// processed, with a summary for every file it contributed to.
    pub fn ingest(
        &self,
        run: OriginId,
        report_uri: &str,
    ) -> impl Future<Output = Result<Vec<FileCoverage>, CoverageError>> + Send + 'static {
        let (done, receiver) = oneshot::channel();
        let job = IngestJob {
            run,
            report: uri_to_path(report_uri),
            done,
        };
        let queued = self.sender.send(job).is_ok();

        async move {
            if !queued {
                return Err(CoverageError::WorkerGone);
            }
            receiver.await.unwrap_or(Err(CoverageError::WorkerGone))
        }
    }

    /// Returns the cumulative line hits for `path` in `run`, keyed by 1-based line number.
    pub fn line_hits(&self, run: OriginId, path: &Utf8Path) -> Option<BTreeMap<u32, u64>> {
        lock(&self.state)
            .runs
            .get(&run)
            .and_then(|coverage| coverage.files.get(path))
            .cloned()
    }

    /// Returns the per-line details behind a [`FileCoverage`] summary, or an empty list if the
    /// token is unknown or its run has been discarded.
    pub fn load_detailed_coverage(&self, token: CoverageToken) -> Vec<LineCoverage> {
        lock(&self.state)
            .runs
            .get(&token.run)
            .and_then(|coverage| coverage.details.get(&token.seq))
            .cloned()
            .unwrap_or_default()
    }

    /// Drops all coverage data held for `run`.
    pub fn discard_run(&self, run: OriginId) {
        lock(&self.state).runs.remove(&run);
    }
}

#[derive(Debug)]
struct IngestJob {
    run: OriginId,
    report: Utf8PathBuf,
    done: oneshot::Sender<Result<Vec<FileCoverage>, CoverageError>>,
}

#[derive(Debug, Default)]
struct CoverageState {
    runs: HashMap<OriginId, RunCoverage>,
    next_seq: u64,
}

#[derive(Debug, Default)]
struct RunCoverage {
    roots: Vec<Utf8PathBuf>,
    files: BTreeMap<Utf8PathBuf, BTreeMap<u32, u64>>,
    details: HashMap<u64, Vec<LineCoverage>>,
}

impl RunCoverage {
    fn includes(&self, path: &Utf8Path) -> bool {
        self.roots.is_empty() || self.roots.iter().any(|root| path.starts_with(root))
    }

    /// Adds `lines` to the running totals for `path`, returning the new totals for those lines.
    fn merge(&mut self, path: Utf8PathBuf, lines: &[LineHits]) -> Vec<LineCoverage> {
        let totals = self.files.entry(path).or_default();
        let mut touched = BTreeMap::new();
        for LineHits { line, hits } in lines {
            let total = totals.entry(*line).or_insert(0);
            *total = total.saturating_add(*hits);
            touched.insert(*line, *total);
        }
        touched
            .into_iter()
            .map(|(line, hits)| LineCoverage { line, hits })
            .collect()
    }
}

async fn run_worker(
    mut receiver: mpsc::UnboundedReceiver<IngestJob>,
    state: Arc<Mutex<CoverageState>>,
    workspace_root: Utf8PathBuf,
) {
    while let Some(job) = receiver.recv().await {
        let report = resolve_path(&workspace_root, job.report);
        let result = ingest_report(&state, &workspace_root, job.run, &report).await;
        match &result {
            Ok(files) => debug!("ingested coverage report `{report}` ({} files)", files.len()),
            Err(error) => warn!("error processing coverage: {}", DisplayErrorChain::new(error)),
        }
        // The caller may have stopped waiting; the data is merged either way.
        _ = job.done.send(result);
    }
}

async fn ingest_report(
    state: &Mutex<CoverageState>,
    workspace_root: &Utf8Path,
    run: OriginId,
    report: &Utf8Path,
) -> Result<Vec<FileCoverage>, CoverageError> {
    let contents = tokio::fs::read_to_string(report)
        .await
        .map_err(|error| CoverageError::Read {
            path: report.to_owned(),
            error,
        })?;
    let sections = parse_lcov(&contents).map_err(|error| CoverageError::Parse {
        path: report.to_owned(),
        error,
    })?;

    let mut state = lock(state);
    let CoverageState { runs, next_seq } = &mut *state;
    let coverage = runs.entry(run).or_default();

    let mut summaries = Vec::new();
    for LcovSection {
        source_file,
        lines,
    } in sections
    {
        let path = resolve_path(workspace_root, uri_to_path(&source_file));
        if !coverage.includes(&path) {
            continue;
        }

        let details = coverage.merge(path.clone(), &lines);
        let seq = *next_seq;
        *next_seq += 1;

        summaries.push(FileCoverage {
            token: CoverageToken { run, seq },
            path,
            covered_lines: details.iter().filter(|line| line.hits > 0).count(),
            total_lines: details.len(),
        });
        coverage.details.insert(seq, details);
    }

    Ok(summaries)
}
