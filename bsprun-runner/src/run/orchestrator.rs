// Copyright (c) The bsprun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{OriginId, RunProfile, RunRequest, RunSink, RunStatus, RunSummary};
use crate::{
    cancel::CancelToken,
    client::{OriginHandler, OriginRegistration},
    coverage::CoverageAggregator,
    errors::{DisplayErrorChain, RunError},
    helpers::{lock, non_null, strip_ansi, to_crlf},
    task_events::TaskEventTracker,
    tree::{NodeId, NodeType, TestNode, TestTree},
};
use bsprun_metadata::{
    JUnitStyleTestCaseData, LogMessageParams, TaskFinishParams, TaskStartParams, TestFinish,
    TestStatus, bazel::PublishOutputParams,
};
use debug_ignore::DebugIgnore;
use std::{
    collections::{BTreeMap, HashMap},
    future::Future,
    sync::{Arc, Mutex, Weak},
};
use swrite::{SWrite, swrite};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Appended to the run output when a run stops early because it was cancelled.
pub const RUN_CANCELLED_MESSAGE: &str =
    "Run canceled by user.  Remaining items will be skipped.\r\n";

/// A single test run over a selection of a [`TestTree`].
///
/// Cloning is cheap; all clones refer to the same run.
#[derive(Clone, Debug)]
pub struct TestRun {
    inner: Arc<RunInner>,
}

#[derive(Debug)]
struct RunInner {
    origin_id: OriginId,
    profile: RunProfile,
    tree: Arc<TestTree>,
    sink: DebugIgnore<Arc<dyn RunSink>>,
    cancel: CancelToken,
    coverage: Option<CoverageAggregator>,
    state: Mutex<RunState>,
    registration: Mutex<Option<OriginRegistration>>,
}

#[derive(Debug, Default)]
struct RunState {
    statuses: HashMap<NodeId, RunStatus>,
    by_type: BTreeMap<NodeType, Vec<NodeId>>,
    by_lookup_key: HashMap<String, Vec<NodeId>>,
    tasks: TaskEventTracker,
    pending_coverage: Vec<JoinHandle<()>>,
    executed: bool,
}

impl TestRun {
    pub(crate) fn new(
        origin_id: OriginId,
        tree: Arc<TestTree>,
        request: &RunRequest,
        sink: Arc<dyn RunSink>,
        cancel: CancelToken,
        coverage: Option<CoverageAggregator>,
    ) -> Self {
        let state = collect_nodes(&tree, &request.roots);
        debug!(
            "run {origin_id}: {} nodes selected from {} roots",
            state.statuses.len(),
            request.roots.len()
        );
        Self {
            inner: Arc::new(RunInner {
                origin_id,
                profile: request.profile,
                tree,
                sink: DebugIgnore(sink),
                cancel,
                coverage,
                state: Mutex::new(state),
                registration: Mutex::new(None),
            }),
        }
    }

    /// Returns the origin ID of this run.
    pub fn origin_id(&self) -> OriginId {
        self.inner.origin_id
    }

    /// Returns the profile this run was requested with.
    pub fn profile(&self) -> RunProfile {
        self.inner.profile
    }

    /// Returns the tree this run selects from.
    pub fn tree(&self) -> &TestTree {
        &self.inner.tree
    }

    /// Returns the cancellation token for this run.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.inner.cancel
    }

    /// Returns the number of nodes in this run.
    pub fn len(&self) -> usize {
        lock(&self.inner.state).statuses.len()
    }

    /// Returns true if the run contains no nodes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the current status of `node`, or `None` if it isn't part of this run.
    pub fn status(&self, node: NodeId) -> Option<RunStatus> {
        lock(&self.inner.state).statuses.get(&node).copied()
    }

    /// Runs `callback` for every node of the run, lowest rank first.
    ///
    /// All nodes are enqueued first. Each node that is still pending when reached is marked
    /// started and handed to `callback`; if the callback leaves it started, it is marked
    /// skipped. Nodes the callback resolved along the way (for example through
    /// [`Self::pending_children`]) are not visited again. If the run is cancelled, the
    /// remaining nodes are left as they are.
    ///
    /// Once all nodes are done, this waits for outstanding coverage reports, ends the sink and
    /// stops receiving notifications for the run.
    pub async fn execute<F, Fut>(&self, mut callback: F) -> Result<RunSummary, RunError>
    where
        F: FnMut(TestRun, NodeId) -> Fut,
        Fut: Future<Output = ()>,
    {
        let ranked = {
            let mut state = lock(&self.inner.state);
            if state.executed {
                return Err(RunError::AlreadyExecuted {
                    origin_id: self.inner.origin_id.to_string(),
                });
            }
            state.executed = true;
            state.by_type.values().flatten().copied().collect::<Vec<_>>()
        };

        for &node in &ranked {
            self.update_status(node, RunStatus::Enqueued, None);
        }

        for node in PendingNodes::new(self.clone(), ranked) {
            if self.inner.cancel.is_cancelled() {
                debug!("run {} cancelled before {node}", self.inner.origin_id);
                self.inner.sink.append_output(RUN_CANCELLED_MESSAGE);
                break;
            }

            self.update_status(node, RunStatus::Started, None);
            callback(self.clone(), node).await;
            if self.status(node) == Some(RunStatus::Started) {
                self.update_status(node, RunStatus::Skipped, None);
            }
        }

        // Ingesting a report can't start new ingestions, but reports can keep arriving until
        // the server is done with our requests.
        loop {
            let pending = std::mem::take(&mut lock(&self.inner.state).pending_coverage);
            if pending.is_empty() {
                break;
            }
            for handle in pending {
                if let Err(error) = handle.await {
                    warn!("coverage task for run {} failed: {error}", self.inner.origin_id);
                }
            }
        }

        lock(&self.inner.registration).take();
        self.inner.sink.end();
        Ok(self.summary())
    }

    /// Sets the status of `node` and reports it to the sink.
    ///
    /// Updates to a status of lower rank than the current one are ignored. `message` is only
    /// used for [`RunStatus::Failed`] and [`RunStatus::Errored`].
    pub fn update_status(&self, node: NodeId, status: RunStatus, message: Option<&str>) {
        {
            let mut state = lock(&self.inner.state);
            let Some(current) = state.statuses.get_mut(&node) else {
                debug!("ignoring status update for {node}, which is not part of this run");
                return;
            };
            if status < *current {
                debug!("ignoring update of {node} from {current} to {status}");
                return;
            }
            *current = status;
        }

        let Some(test_node) = self.inner.tree.get(node) else {
            return;
        };
        let sink = &self.inner.sink;
        match status {
            RunStatus::Pending => {}
            RunStatus::Enqueued => sink.enqueued(test_node),
            RunStatus::Started => sink.started(test_node),
            RunStatus::Passed => sink.passed(test_node),
            RunStatus::Failed => sink.failed(test_node, message),
            RunStatus::Skipped => sink.skipped(test_node),
            RunStatus::Errored => sink.errored(test_node, message),
        }
    }

    /// Returns the descendants of `node` that are still pending, lowest rank first.
    ///
    /// Status is checked as the iterator advances, so nodes resolved in the meantime are not
    /// yielded.
    pub fn pending_children(&self, node: NodeId) -> PendingNodes {
        self.collect_pending(node, None)
    }

    /// Like [`Self::pending_children`], but excludes descendants at or above `level` in rank,
    /// along with everything below them.
    pub fn pending_children_below(&self, node: NodeId, level: NodeType) -> PendingNodes {
        self.collect_pending(node, Some(level))
    }

    /// Appends text to the run output.
    pub fn append_output(&self, text: &str) {
        self.inner.sink.append_output(text);
    }

    /// Returns counts of the current node statuses.
    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary {
            cancelled: self.inner.cancel.is_cancelled(),
            ..RunSummary::default()
        };
        for status in lock(&self.inner.state).statuses.values() {
            summary.add(*status);
        }
        summary
    }

    pub(crate) fn handler(&self) -> Arc<dyn OriginHandler> {
        Arc::new(RunEventHandler {
            run: Arc::downgrade(&self.inner),
        })
    }

    pub(crate) fn set_registration(&self, registration: OriginRegistration) {
        *lock(&self.inner.registration) = Some(registration);
    }

    fn collect_pending(&self, node: NodeId, level: Option<NodeType>) -> PendingNodes {
        let tree = &self.inner.tree;
        let mut by_type: BTreeMap<NodeType, Vec<NodeId>> = BTreeMap::new();
        let mut stack: Vec<NodeId> = tree.children(node).iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            let Some(node_type) = tree.get(id).and_then(TestNode::node_type) else {
                continue;
            };
            if level.is_some_and(|level| node_type <= level) {
                continue;
            }
            by_type.entry(node_type).or_default().push(id);
            stack.extend(tree.children(id).iter().rev());
        }
        PendingNodes::new(self.clone(), by_type.into_values().flatten().collect())
    }

    fn on_log_message(&self, message: &str) {
        let message = strip_ansi(message);
        match message.strip_suffix('\\') {
            Some(continued) => self.append_output(&to_crlf(continued)),
            None => {
                let mut text = to_crlf(&message);
                text.push_str("\r\n");
                self.append_output(&text);
            }
        }
    }

    fn on_task_finish(&self, params: &TaskFinishParams) {
        lock(&self.inner.state).tasks.add_task_finish(params.clone());

        let finish = match params.test_finish() {
            Ok(Some(finish)) => finish,
            Ok(None) => return,
            Err(error) => {
                warn!(
                    "ignoring invalid test-finish data for task {}: {error}",
                    params.task_id.id
                );
                return;
            }
        };
        let junit = finish.junit_data().unwrap_or_else(|error| {
            debug!("ignoring invalid JUnit data for `{}`: {error}", finish.display_name);
            None
        });

        let key = lookup_key(&finish, junit.as_ref());
        let matches = self.match_test_result(&params.task_id.id, &key);
        if matches.is_empty() {
            self.append_output(&format!(
                "Updating {}: Unable to match this test result to an item in this run.\r\n",
                finish.display_name
            ));
            return;
        }

        let Some((status, message)) = test_outcome(&finish, junit.as_ref()) else {
            debug!("ignoring unknown status {:?} for `{key}`", finish.status);
            return;
        };
        for node in matches {
            self.update_status(node, status, message.as_deref());
        }
    }

    /// Returns the nodes that a test result for `key`, reported by task `task_id`, applies to.
    fn match_test_result(&self, task_id: &str, key: &str) -> Vec<NodeId> {
        let state = lock(&self.inner.state);
        let Some(candidates) = state.by_lookup_key.get(key) else {
            return Vec::new();
        };
        let Some(target) = state.tasks.build_target_id(task_id) else {
            // Without a target, the result applies to the test in every target of the run.
            return candidates.clone();
        };
        candidates
            .iter()
            .copied()
            .filter(|node| {
                self.inner
                    .tree
                    .get(*node)
                    .and_then(TestNode::info)
                    .and_then(|info| info.target.as_ref())
                    .is_some_and(|node_target| node_target.id == target)
            })
            .collect()
    }

    fn on_publish_output(&self, params: &PublishOutputParams) {
        let report = match params.coverage_report() {
            Ok(Some(report)) => report,
            Ok(None) => return,
            Err(error) => {
                warn!("ignoring invalid coverage report notification: {error}");
                return;
            }
        };
        let Some(coverage) = &self.inner.coverage else {
            debug!("no coverage aggregator, ignoring `{}`", report.lcov_report_uri);
            return;
        };

        let ingest = coverage.ingest(self.inner.origin_id, &report.lcov_report_uri);
        let sink = self.inner.sink.0.clone();
        let handle = tokio::spawn(async move {
            match ingest.await {
                Ok(files) => {
                    for file in &files {
                        sink.add_coverage(file);
                    }
                }
                Err(error) => sink.append_output(&format!(
                    "Error processing coverage: {}\r\n",
                    to_crlf(&DisplayErrorChain::new(&error).to_string())
                )),
            }
        });
        lock(&self.inner.state).pending_coverage.push(handle);
    }
}

/// Iterates over nodes that are still pending, in a fixed order.
#[derive(Debug)]
pub struct PendingNodes {
    run: TestRun,
    nodes: std::vec::IntoIter<NodeId>,
}

impl PendingNodes {
    fn new(run: TestRun, nodes: Vec<NodeId>) -> Self {
        Self {
            run,
            nodes: nodes.into_iter(),
        }
    }
}

impl Iterator for PendingNodes {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let run = &self.run;
        self.nodes
            .by_ref()
            .find(|node| run.status(*node).is_some_and(RunStatus::is_pending))
    }
}

/// Routes notifications for a run's origin ID back to the run.
struct RunEventHandler {
    run: Weak<RunInner>,
}

impl RunEventHandler {
    fn run(&self) -> Option<TestRun> {
        self.run.upgrade().map(|inner| TestRun { inner })
    }
}

impl OriginHandler for RunEventHandler {
    fn on_log_message(&self, params: &LogMessageParams) -> bool {
        let Some(run) = self.run() else {
            return false;
        };
        run.on_log_message(&params.message);
        true
    }

    fn on_task_start(&self, params: &TaskStartParams) -> bool {
        let Some(run) = self.run() else {
            return false;
        };
        lock(&run.inner.state).tasks.add_task_start(params.clone());
        true
    }

    fn on_task_finish(&self, params: &TaskFinishParams) -> bool {
        let Some(run) = self.run() else {
            return false;
        };
        run.on_task_finish(params);
        true
    }

    fn on_publish_output(&self, params: &PublishOutputParams) -> bool {
        let Some(run) = self.run() else {
            return false;
        };
        run.on_publish_output(params);
        true
    }
}

/// Selects every node with metadata reachable from `roots`, grouped by type.
///
/// Nodes without metadata are skipped along with their descendants.
fn collect_nodes(tree: &TestTree, roots: &[NodeId]) -> RunState {
    let mut state = RunState::default();
    let mut stack: Vec<NodeId> = roots.iter().rev().copied().collect();
    while let Some(id) = stack.pop() {
        let Some(node) = tree.get(id) else {
            continue;
        };
        let Some(info) = node.info() else {
            continue;
        };
        // Overlapping roots select the same node more than once.
        if state.statuses.insert(id, RunStatus::Pending).is_some() {
            continue;
        }
        state.by_type.entry(info.node_type).or_default().push(id);
        if let Some(key) = &info.lookup_key {
            state
                .by_lookup_key
                .entry(key.clone())
                .or_default()
                .push(id);
        }
        stack.extend(node.children().iter().rev());
    }
    state
}

/// Returns the key that a test result is matched to nodes with: the display name, prefixed by
/// the class name if there is one.
fn lookup_key(finish: &TestFinish, junit: Option<&JUnitStyleTestCaseData>) -> String {
    match junit.and_then(|junit| non_null(junit.class_name.as_deref())) {
        Some(class_name) => format!("{class_name}.{}", finish.display_name),
        None => finish.display_name.clone(),
    }
}

fn test_outcome(
    finish: &TestFinish,
    junit: Option<&JUnitStyleTestCaseData>,
) -> Option<(RunStatus, Option<String>)> {
    let outcome = match finish.status {
        TestStatus::Passed => (RunStatus::Passed, None),
        TestStatus::Skipped | TestStatus::Ignored => (RunStatus::Skipped, None),
        TestStatus::Cancelled => (RunStatus::Errored, Some("Cancelled".to_owned())),
        TestStatus::Failed => (RunStatus::Failed, Some(failure_message(finish, junit))),
        TestStatus::Other(_) => return None,
    };
    Some(outcome)
}

fn failure_message(finish: &TestFinish, junit: Option<&JUnitStyleTestCaseData>) -> String {
    let mut message = String::new();
    if let Some(text) = non_null(finish.message.as_deref()) {
        swrite!(message, "{text}\n\n");
    }
    if let Some(junit) = junit {
        if !finish.display_name.is_empty() {
            swrite!(message, "[TEST CASE] {}\n\n", finish.display_name);
        }
        if let Some(error_type) = non_null(junit.error_type.as_deref()) {
            swrite!(message, "[ERROR TYPE] {error_type}\n\n");
        }
        if let Some(error) = non_null(junit.error_message.as_deref()) {
            swrite!(message, "[ERROR] {error}\n\n");
        }
        if let Some(content) = non_null(junit.error_content.as_deref()) {
            swrite!(message, "[FULL ERROR]\n\n{content}\n\n");
        }
    }
    message.truncate(message.trim_end().len());
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cancel::CancelSource,
        coverage::FileCoverage,
        tree::TestNodeInfo,
    };
    use bsprun_metadata::{BuildTarget, BuildTargetIdentifier, StatusCode, TaskId, data_kind};
    use camino_tempfile::Utf8TempDir;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<String>>,
        output: Mutex<String>,
        coverage: Mutex<Vec<FileCoverage>>,
    }

    impl RecordingSink {
        fn record(&self, event: String) {
            self.events.lock().unwrap().push(event);
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }

        fn output(&self) -> String {
            self.output.lock().unwrap().clone()
        }
    }

    impl RunSink for RecordingSink {
        fn enqueued(&self, node: &TestNode) {
            self.record(format!("enqueued {}", node.label()));
        }

        fn started(&self, node: &TestNode) {
            self.record(format!("started {}", node.label()));
        }

        fn passed(&self, node: &TestNode) {
            self.record(format!("passed {}", node.label()));
        }

        fn failed(&self, node: &TestNode, message: Option<&str>) {
            self.record(format!("failed {}: {}", node.label(), message.unwrap_or_default()));
        }

        fn errored(&self, node: &TestNode, message: Option<&str>) {
            self.record(format!("errored {}: {}", node.label(), message.unwrap_or_default()));
        }

        fn skipped(&self, node: &TestNode) {
            self.record(format!("skipped {}", node.label()));
        }

        fn append_output(&self, text: &str) {
            self.output.lock().unwrap().push_str(text);
        }

        fn add_coverage(&self, coverage: &FileCoverage) {
            self.coverage.lock().unwrap().push(coverage.clone());
        }

        fn end(&self) {
            self.record("end".to_owned());
        }
    }

    fn target(uri: &str) -> BuildTarget {
        serde_json::from_value(json!({"id": {"uri": uri}})).unwrap()
    }

    fn info(node_type: NodeType, target_uri: &str) -> Option<TestNodeInfo> {
        Some(TestNodeInfo::new(node_type).with_target(target(target_uri)))
    }

    /// root -> {a -> {a1.ts, a2.ts}, b -> b1.ts}
    struct Fixture {
        tree: Arc<TestTree>,
        root: NodeId,
        a: NodeId,
        a1: NodeId,
        a2: NodeId,
        b: NodeId,
        b1: NodeId,
    }

    fn fixture() -> Fixture {
        let mut tree = TestTree::new();
        let root = tree.add_root("root", Some(TestNodeInfo::new(NodeType::Root)));
        let a = tree.add_child(root, "a", info(NodeType::Target, "//a")).unwrap();
        let a1 = tree.add_child(a, "a1.ts", info(NodeType::SourceFile, "//a")).unwrap();
        let a2 = tree.add_child(a, "a2.ts", info(NodeType::SourceFile, "//a")).unwrap();
        let b = tree.add_child(root, "b", info(NodeType::Target, "//b")).unwrap();
        let b1 = tree.add_child(b, "b1.ts", info(NodeType::SourceFile, "//b")).unwrap();
        Fixture {
            tree: Arc::new(tree),
            root,
            a,
            a1,
            a2,
            b,
            b1,
        }
    }

    fn new_run(
        tree: &Arc<TestTree>,
        roots: Vec<NodeId>,
        cancel: CancelToken,
        coverage: Option<CoverageAggregator>,
    ) -> (TestRun, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let run = TestRun::new(
            OriginId::new_v4(),
            tree.clone(),
            &RunRequest::new(roots),
            sink.clone(),
            cancel,
            coverage,
        );
        (run, sink)
    }

    #[tokio::test]
    async fn visits_nodes_in_rank_order() {
        let f = fixture();
        let (run, sink) = new_run(&f.tree, vec![f.root], CancelToken::never(), None);
        assert_eq!(run.len(), 6);

        let visited = Mutex::new(Vec::new());
        let summary = run
            .execute(|run, node| {
                visited.lock().unwrap().push(node);
                async move { run.update_status(node, RunStatus::Passed, None) }
            })
            .await
            .unwrap();

        assert_eq!(
            *visited.lock().unwrap(),
            vec![f.root, f.a, f.b, f.a1, f.a2, f.b1]
        );
        assert_eq!(summary.passed, 6);
        assert!(summary.is_success());

        let events = sink.events();
        assert_eq!(
            events.iter().filter(|e| e.starts_with("enqueued")).count(),
            6
        );
        assert_eq!(events.last().map(String::as_str), Some("end"));
    }

    #[tokio::test]
    async fn nodes_without_metadata_are_not_selected() {
        let mut tree = TestTree::new();
        let root = tree.add_root("root", Some(TestNodeInfo::new(NodeType::Root)));
        let folder = tree.add_child(root, "folder", None).unwrap();
        tree.add_child(folder, "hidden", info(NodeType::Target, "//hidden"))
            .unwrap();
        let visible = tree
            .add_child(root, "visible", info(NodeType::Target, "//visible"))
            .unwrap();
        let tree = Arc::new(tree);

        let (run, _sink) = new_run(&tree, vec![root], CancelToken::never(), None);
        assert_eq!(run.len(), 2);
        assert_eq!(run.status(folder), None);
        assert_eq!(run.status(visible), Some(RunStatus::Pending));
    }

    #[tokio::test]
    async fn untouched_nodes_are_skipped() {
        let f = fixture();
        let (run, _sink) = new_run(&f.tree, vec![f.a], CancelToken::never(), None);

        // Only the target reports a result; its files are never resolved.
        let summary = run
            .execute(|run, node| async move {
                if node == f.a {
                    run.update_status(node, RunStatus::Passed, None);
                }
            })
            .await
            .unwrap();

        assert_eq!(run.status(f.a), Some(RunStatus::Passed));
        assert_eq!(run.status(f.a1), Some(RunStatus::Skipped));
        assert_eq!(run.status(f.a2), Some(RunStatus::Skipped));
        assert_eq!(summary.skipped, 2);
    }

    #[tokio::test]
    async fn pending_children_are_resolved_by_the_parent() {
        let f = fixture();
        let (run, _sink) = new_run(&f.tree, vec![f.a], CancelToken::never(), None);

        let calls = Mutex::new(0);
        run.execute(|run, node| {
            *calls.lock().unwrap() += 1;
            async move {
                run.update_status(node, RunStatus::Passed, None);
                for child in run.pending_children(node) {
                    run.update_status(child, RunStatus::Passed, None);
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(run.status(f.a1), Some(RunStatus::Passed));
        assert_eq!(run.status(f.a2), Some(RunStatus::Passed));
    }

    #[tokio::test]
    async fn pending_children_below_skips_nested_targets() {
        let mut tree = TestTree::new();
        let dir = tree.add_root("dir", Some(TestNodeInfo::new(NodeType::Root)));
        let file = tree
            .add_child(dir, "file", info(NodeType::SourceFile, "//a"))
            .unwrap();
        let nested = tree.add_child(dir, "nested", info(NodeType::Target, "//n")).unwrap();
        let nested_file = tree
            .add_child(nested, "nested-file", info(NodeType::SourceFile, "//n"))
            .unwrap();
        let tree = Arc::new(tree);
        let (run, _sink) = new_run(&tree, vec![dir], CancelToken::never(), None);

        let all: Vec<_> = run.pending_children(dir).collect();
        assert_eq!(all, vec![nested, file, nested_file]);
        let below: Vec<_> = run.pending_children_below(dir, NodeType::Target).collect();
        assert_eq!(below, vec![file]);
    }

    #[tokio::test]
    async fn pending_children_rechecks_status() {
        let f = fixture();
        let (run, _sink) = new_run(&f.tree, vec![f.root], CancelToken::never(), None);

        let mut children = run.pending_children(f.root);
        assert_eq!(children.next(), Some(f.a));
        run.update_status(f.b, RunStatus::Passed, None);
        run.update_status(f.a1, RunStatus::Failed, Some("boom"));
        assert_eq!(children.collect::<Vec<_>>(), vec![f.a2, f.b1]);
    }

    #[tokio::test]
    async fn status_never_moves_down() {
        let f = fixture();
        let (run, sink) = new_run(&f.tree, vec![f.a], CancelToken::never(), None);

        run.update_status(f.a, RunStatus::Failed, Some("first"));
        run.update_status(f.a, RunStatus::Passed, None);
        run.update_status(f.a, RunStatus::Errored, Some("worse"));
        run.update_status(f.b, RunStatus::Passed, None);

        assert_eq!(run.status(f.a), Some(RunStatus::Errored));
        assert_eq!(run.status(f.b), None);
        assert_eq!(sink.events(), vec!["failed a: first", "errored a: worse"]);
    }

    #[tokio::test]
    async fn cancellation_stops_the_run() {
        let f = fixture();
        let source = CancelSource::new();
        let (run, sink) = new_run(&f.tree, vec![f.root], source.token(), None);

        let calls = Mutex::new(0);
        let summary = run
            .execute(|run, node| {
                let mut calls = calls.lock().unwrap();
                *calls += 1;
                if *calls == 2 {
                    source.cancel();
                }
                async move { run.update_status(node, RunStatus::Passed, None) }
            })
            .await
            .unwrap();

        assert_eq!(*calls.lock().unwrap(), 2);
        let resolved = [f.root, f.a, f.b, f.a1, f.a2, f.b1]
            .into_iter()
            .filter(|node| !run.status(*node).unwrap().is_pending())
            .count();
        assert_eq!(resolved, 2);
        assert_eq!(run.status(f.b), Some(RunStatus::Enqueued));
        assert!(summary.cancelled);
        assert_eq!(summary.not_run, 4);
        assert_eq!(sink.output(), RUN_CANCELLED_MESSAGE);
        assert_eq!(sink.events().last().map(String::as_str), Some("end"));
    }

    #[tokio::test]
    async fn execute_only_once() {
        let f = fixture();
        let (run, _sink) = new_run(&f.tree, vec![f.b], CancelToken::never(), None);
        run.execute(|_, _| async {}).await.unwrap();
        assert!(matches!(
            run.execute(|_, _| async {}).await,
            Err(RunError::AlreadyExecuted { .. })
        ));
    }

    #[tokio::test]
    async fn log_messages_are_appended() {
        let f = fixture();
        let (run, sink) = new_run(&f.tree, vec![f.root], CancelToken::never(), None);
        let handler = run.handler();

        let log = |message: &str| LogMessageParams {
            message_type: bsprun_metadata::MessageType::Info,
            task: None,
            origin_id: Some(run.origin_id().to_string()),
            message: message.to_owned(),
        };
        for message in ["compiling \\", "//a:a\ndone", "\u{1b}[32mPASSED\u{1b}[0m"] {
            assert!(handler.on_log_message(&log(message)));
        }
        assert_eq!(sink.output(), "compiling //a:a\r\ndone\r\nPASSED\r\n");

        // Once the run is gone, its handler no longer consumes anything.
        let stray = log("after the run");
        drop(run);
        assert!(!handler.on_log_message(&stray));
        assert_eq!(sink.output(), "compiling //a:a\r\ndone\r\nPASSED\r\n");
    }

    fn task_start(id: &str, parents: &[&str], target: Option<&str>) -> TaskStartParams {
        TaskStartParams {
            task_id: TaskId::with_parents(id, parents.iter().copied()),
            origin_id: None,
            event_time: None,
            message: None,
            data_kind: target.map(|_| data_kind::TEST_TASK.to_owned()),
            data: target.map(|uri| json!({"target": {"uri": uri}})),
        }
    }

    fn test_finish(id: &str, parents: &[&str], finish: serde_json::Value) -> TaskFinishParams {
        TaskFinishParams {
            task_id: TaskId::with_parents(id, parents.iter().copied()),
            origin_id: None,
            event_time: None,
            message: None,
            status: StatusCode::Ok,
            data_kind: Some(data_kind::TEST_FINISH.to_owned()),
            data: Some(finish),
        }
    }

    struct CaseFixture {
        tree: Arc<TestTree>,
        root: NodeId,
        case_a: NodeId,
        case_b: NodeId,
    }

    /// Two targets that both contain `com.example.FooTest.testBar`.
    fn case_fixture() -> CaseFixture {
        let mut tree = TestTree::new();
        let root = tree.add_root("root", Some(TestNodeInfo::new(NodeType::Root)));
        let mut case_in = |target_uri: &str| {
            let target_node = tree
                .add_child(root, target_uri, info(NodeType::Target, target_uri))
                .unwrap();
            let case_info = TestNodeInfo::new(NodeType::Case)
                .with_target(target(target_uri))
                .with_lookup_key("com.example.FooTest.testBar");
            tree.add_child(target_node, "testBar", Some(case_info)).unwrap()
        };
        let case_a = case_in("//a");
        let case_b = case_in("//b");
        CaseFixture {
            tree: Arc::new(tree),
            root,
            case_a,
            case_b,
        }
    }

    fn junit_finish(status: i64) -> serde_json::Value {
        json!({
            "displayName": "testBar",
            "status": status,
            "message": "null",
            "dataKind": "junit-style-test-case-data",
            "data": {
                "className": "com.example.FooTest",
                "errorType": "java.lang.AssertionError",
                "errorMessage": "expected 1",
                "errorContent": "at FooTest.java:10",
            },
        })
    }

    #[tokio::test]
    async fn test_results_from_unknown_tasks_match_every_target() {
        let f = case_fixture();
        let (run, sink) = new_run(&f.tree, vec![f.root], CancelToken::never(), None);
        let handler = run.handler();

        handler.on_task_start(&task_start("t1", &[], Some("//b")));
        handler.on_task_start(&task_start("t2", &["t1"], None));
        handler.on_task_finish(&test_finish("t3", &["t2"], junit_finish(2)));
        // t3 never started, so its target is unknown.
        assert_eq!(run.status(f.case_a), Some(RunStatus::Failed));
        assert_eq!(run.status(f.case_b), Some(RunStatus::Failed));

        let events = sink.events();
        assert_eq!(events.len(), 2, "{events:?}");
        assert!(events.iter().all(|event| event.starts_with("failed testBar: [TEST CASE] testBar")));
    }

    #[tokio::test]
    async fn test_results_are_matched_through_the_task_chain() {
        let f = case_fixture();
        let (run, sink) = new_run(&f.tree, vec![f.root], CancelToken::never(), None);
        let handler = run.handler();

        handler.on_task_start(&task_start("t1", &[], Some("//b")));
        handler.on_task_start(&task_start("t2", &["t1"], None));
        handler.on_task_finish(&test_finish("t2", &["t1"], junit_finish(1)));

        assert_eq!(run.status(f.case_a), Some(RunStatus::Pending));
        assert_eq!(run.status(f.case_b), Some(RunStatus::Passed));
        assert_eq!(sink.events(), vec!["passed testBar"]);
    }

    #[tokio::test]
    async fn unmatched_test_results_are_reported() {
        let f = case_fixture();
        let (run, sink) = new_run(&f.tree, vec![f.root], CancelToken::never(), None);

        run.handler().on_task_finish(&test_finish(
            "t1",
            &[],
            json!({"displayName": "testOther", "status": 1}),
        ));
        assert_eq!(
            sink.output(),
            "Updating testOther: Unable to match this test result to an item in this run.\r\n"
        );
        assert!(sink.events().is_empty());
    }

    #[test]
    fn failure_messages() {
        let finish: TestFinish = serde_json::from_value(junit_finish(2)).unwrap();
        let junit = finish.junit_data().unwrap();
        assert_eq!(
            failure_message(&finish, junit.as_ref()),
            "[TEST CASE] testBar\n\n\
             [ERROR TYPE] java.lang.AssertionError\n\n\
             [ERROR] expected 1\n\n\
             [FULL ERROR]\n\nat FooTest.java:10"
        );

        let finish: TestFinish = serde_json::from_value(json!({
            "displayName": "plain",
            "status": 2,
            "message": "assertion failed",
        }))
        .unwrap();
        assert_eq!(failure_message(&finish, None), "assertion failed");
        assert_eq!(lookup_key(&finish, None), "plain");
    }

    #[test]
    fn test_outcomes() {
        let outcome = |status: i64| {
            let finish: TestFinish =
                serde_json::from_value(json!({"displayName": "t", "status": status})).unwrap();
            test_outcome(&finish, None)
        };
        assert_eq!(outcome(1), Some((RunStatus::Passed, None)));
        assert_eq!(outcome(3), Some((RunStatus::Skipped, None)));
        assert_eq!(outcome(5), Some((RunStatus::Skipped, None)));
        assert_eq!(
            outcome(4),
            Some((RunStatus::Errored, Some("Cancelled".to_owned())))
        );
        assert_eq!(outcome(42), None);
    }

    #[tokio::test]
    async fn coverage_reports_are_ingested_before_the_run_ends() {
        let dir = Utf8TempDir::new().unwrap();
        let report = dir.path().join("coverage.dat");
        std::fs::write(&report, "SF:src/a.ts\nDA:1,3\nDA:2,0\nend_of_record\n").unwrap();
        let bad_report = dir.path().join("bad.dat");
        std::fs::write(&bad_report, "DA:1,1\n").unwrap();

        let f = fixture();
        let aggregator = CoverageAggregator::new(dir.path());
        let (run, sink) = new_run(&f.tree, vec![f.b], CancelToken::never(), Some(aggregator));
        let handler = run.handler();

        run.execute(|run, node| {
            let handler = handler.clone();
            let report = report.clone();
            let bad_report = bad_report.clone();
            async move {
                for uri in [format!("file://{report}"), bad_report.to_string()] {
                    handler.on_publish_output(&PublishOutputParams {
                        origin_id: run.origin_id().to_string(),
                        task_id: None,
                        build_target: Some(BuildTargetIdentifier::new("//b")),
                        data_kind: Some("coverage-report".to_owned()),
                        data: Some(json!({"lcovReportUri": uri})),
                    });
                }
                run.update_status(node, RunStatus::Passed, None);
            }
        })
        .await
        .unwrap();

        let coverage = sink.coverage.lock().unwrap().clone();
        assert_eq!(coverage.len(), 1);
        assert_eq!(coverage[0].path, dir.path().join("src/a.ts"));
        assert_eq!((coverage[0].covered_lines, coverage[0].total_lines), (1, 2));
        assert!(
            sink.output().starts_with("Error processing coverage: "),
            "{}",
            sink.output()
        );
    }
}
