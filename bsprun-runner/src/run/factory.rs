// Copyright (c) The bsprun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{OriginId, RunSink, TestRun};
use crate::{
    cancel::CancelToken,
    client::BspClient,
    coverage::CoverageAggregator,
    tree::{NodeId, TestTree},
};
use camino::Utf8PathBuf;
use std::{fmt, sync::Arc};
use tracing::debug;

/// What a run is asked to do.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum RunProfile {
    /// Run tests.
    #[default]
    Run,

    /// Run tests and collect coverage.
    Coverage,
}

impl fmt::Display for RunProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Run => write!(f, "run"),
            Self::Coverage => write!(f, "coverage"),
        }
    }
}

/// The selection and profile for a new run.
#[derive(Clone, Debug)]
pub struct RunRequest {
    /// The nodes to run. Their descendants are included.
    pub roots: Vec<NodeId>,

    /// The profile to run with.
    pub profile: RunProfile,
}

impl RunRequest {
    /// Creates a new request for the given roots, with the default profile.
    pub fn new(roots: Vec<NodeId>) -> Self {
        Self {
            roots,
            profile: RunProfile::default(),
        }
    }

    /// Sets the profile.
    pub fn with_profile(mut self, profile: RunProfile) -> Self {
        self.profile = profile;
        self
    }
}

/// Creates [`TestRun`]s wired up to a client's notifications.
#[derive(Clone, Debug)]
pub struct RunFactory {
    client: BspClient,
    coverage: Option<CoverageAggregator>,
    coverage_roots: Vec<Utf8PathBuf>,
}

impl RunFactory {
    /// Creates a new factory. Runs created by it don't collect coverage.
    pub fn new(client: BspClient) -> Self {
        Self {
            client,
            coverage: None,
            coverage_roots: Vec::new(),
        }
    }

    /// Feeds coverage reports published during runs into `aggregator`.
    ///
    /// Runs with the [`RunProfile::Coverage`] profile only collect coverage for files under
    /// `roots`, or all files if `roots` is empty.
    pub fn with_coverage(
        mut self,
        aggregator: CoverageAggregator,
        roots: impl IntoIterator<Item = Utf8PathBuf>,
    ) -> Self {
        self.coverage = Some(aggregator);
        self.coverage_roots = roots.into_iter().collect();
        self
    }

    /// Returns the client runs are created for.
    pub fn client(&self) -> &BspClient {
        &self.client
    }

    /// Creates a run for `request` and starts receiving notifications for it.
    ///
    /// The run stops receiving notifications once [`TestRun::execute`] completes, or when
    /// the run is dropped.
    pub fn begin_run(
        &self,
        tree: Arc<TestTree>,
        request: RunRequest,
        sink: Arc<dyn RunSink>,
        cancel: CancelToken,
    ) -> TestRun {
        let origin_id = OriginId::new_v4();
        let coverage = match (&self.coverage, request.profile) {
            (Some(aggregator), RunProfile::Coverage) => {
                aggregator.set_coverage_roots(origin_id, self.coverage_roots.iter().cloned());
                Some(aggregator.clone())
            }
            _ => None,
        };
        debug!("beginning {} run {origin_id}", request.profile);

        let run = TestRun::new(origin_id, tree, &request, sink, cancel, coverage);
        let registration = self
            .client
            .register_origin(origin_id.to_string(), run.handler());
        run.set_registration(registration);
        run
    }
}
