// Copyright (c) The bsprun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{client::wait_until, fixtures::*};
use bsprun_metadata::BuildTarget;
use bsprun_runner::{
    cancel::{CancelSource, CancelToken},
    coverage::CoverageAggregator,
    run::{
        ExecutorSettings, RUN_CANCELLED_MESSAGE, RunFactory, RunProfile, RunRequest, RunStatus,
        TargetExecutor,
    },
    tree::{NodeType, TestNodeInfo, TestTree},
};
use camino_tempfile::Utf8TempDir;
use color_eyre::eyre::Result;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;

fn target(uri: &str) -> BuildTarget {
    serde_json::from_value(json!({"id": {"uri": uri}})).unwrap()
}

fn target_info(node_type: NodeType, uri: &str) -> Option<TestNodeInfo> {
    Some(TestNodeInfo::new(node_type).with_target(target(uri)))
}

#[tokio::test]
async fn run_with_results_and_coverage() -> Result<()> {
    let dir = Utf8TempDir::new()?;
    let report = dir.path().join("coverage.dat");
    std::fs::write(
        &report,
        "SF:src/A.java\nDA:1,1\nDA:2,0\nDA:3,4\nend_of_record\n",
    )?;

    let server = FakeBsp::new()
        .with_target("//a:test", &["src/A.java"])
        .with_target("//b:test", &["src/B.java"])
        .with_script(
            "//a:test",
            TestScript::Respond {
                notifications: vec![
                    (
                        "build/taskStart",
                        json!({
                            "taskId": {"id": "t1"},
                            "dataKind": "test-task",
                            "data": {"target": {"uri": "//a:test"}},
                        }),
                    ),
                    (
                        "build/taskStart",
                        json!({"taskId": {"id": "t2", "parents": ["t1"]}}),
                    ),
                    (
                        "build/logMessage",
                        json!({"type": 4, "message": "running FooTest"}),
                    ),
                    (
                        "build/taskFinish",
                        json!({
                            "taskId": {"id": "t2", "parents": ["t1"]},
                            "status": 1,
                            "dataKind": "test-finish",
                            "data": {
                                "displayName": "testBar",
                                "status": 2,
                                "dataKind": "junit-style-test-case-data",
                                "data": {
                                    "className": "com.example.FooTest",
                                    "errorMessage": "expected 1",
                                },
                            },
                        }),
                    ),
                    (
                        "build/publishOutput",
                        json!({
                            "dataKind": "coverage-report",
                            "data": {"lcovReportUri": format!("file://{report}")},
                        }),
                    ),
                ],
                result: json!({"statusCode": 1}),
            },
        )
        .with_script(
            "//b:test",
            TestScript::Respond {
                notifications: Vec::new(),
                result: json!({
                    "statusCode": 2,
                    "dataKind": "bazel-test",
                    "data": {"stdoutCollector": {"lines": ["boom"]}},
                }),
            },
        );
    let client = server.client();

    let mut tree = TestTree::new();
    let root = tree.add_root("root", Some(TestNodeInfo::new(NodeType::Root)));
    let a = tree.add_child(root, "a", target_info(NodeType::Target, "//a:test")).unwrap();
    let case = TestNodeInfo::new(NodeType::Case)
        .with_target(target("//a:test"))
        .with_lookup_key("com.example.FooTest.testBar");
    let test_bar = tree.add_child(a, "testBar", Some(case)).unwrap();
    let b = tree.add_child(root, "b", target_info(NodeType::Target, "//b:test")).unwrap();
    let b_file = tree
        .add_child(b, "B.java", target_info(NodeType::SourceFile, "//b:test"))
        .unwrap();

    let factory = RunFactory::new(client.clone())
        .with_coverage(CoverageAggregator::new(dir.path()), Vec::new());
    let sink = Arc::new(RecordingSink::default());
    let run = factory.begin_run(
        Arc::new(tree),
        RunRequest::new(vec![root]).with_profile(RunProfile::Coverage),
        sink.clone(),
        CancelToken::never(),
    );
    let executor = TargetExecutor::new(client.clone(), ExecutorSettings::default());
    let summary = run
        .execute(|run, node| {
            let executor = executor.clone();
            async move { executor.run_node(run, node).await }
        })
        .await?;

    assert_eq!(
        sink.events(),
        vec![
            "started root",
            "skipped root",
            "started a",
            "failed testBar: [TEST CASE] testBar\n\n[ERROR] expected 1",
            "passed a",
            "started b",
            "failed b: boom",
            "failed B.java: boom",
            "end",
        ]
    );
    assert_eq!(run.status(test_bar), Some(RunStatus::Failed));
    assert_eq!(run.status(b_file), Some(RunStatus::Failed));
    assert_eq!(
        (summary.passed, summary.failed, summary.skipped),
        (1, 3, 1)
    );
    assert!(!summary.is_success());
    assert_eq!(sink.output(), "running FooTest\r\n");

    let coverage = sink.coverage();
    assert_eq!(coverage.len(), 1);
    assert_eq!(coverage[0].path, dir.path().join("src/A.java"));
    assert_eq!((coverage[0].covered_lines, coverage[0].total_lines), (2, 3));

    let requests: Vec<_> = server
        .received()
        .into_iter()
        .filter(|message| message["method"] == "buildTarget/test")
        .collect();
    assert_eq!(requests.len(), 2);
    for request in &requests {
        assert_eq!(request["params"]["originId"], run.origin_id().to_string());
        assert_eq!(request["params"]["dataKind"], "bazel-test");
        assert_eq!(request["params"]["data"]["coverage"], true);
    }
    Ok(())
}

#[tokio::test]
async fn cancellation_is_forwarded_and_stops_the_run() -> Result<()> {
    let server = FakeBsp::new()
        .with_target("//a:test", &[])
        .with_target("//b:test", &[])
        .with_script("//a:test", TestScript::WaitForCancel);
    let client = server.client();

    let mut tree = TestTree::new();
    let root = tree.add_root("root", None);
    let a = tree.add_child(root, "a", target_info(NodeType::Target, "//a:test")).unwrap();
    let b = tree.add_child(root, "b", target_info(NodeType::Target, "//b:test")).unwrap();

    let source = CancelSource::new();
    let sink = Arc::new(RecordingSink::default());
    let run = RunFactory::new(client.clone()).begin_run(
        Arc::new(tree),
        RunRequest::new(vec![a, b]),
        sink.clone(),
        source.token(),
    );
    let executor = TargetExecutor::new(client.clone(), ExecutorSettings::default());
    let task = tokio::spawn({
        let run = run.clone();
        async move {
            run.execute(|run, node| {
                let executor = executor.clone();
                async move { executor.run_node(run, node).await }
            })
            .await
        }
    });

    wait_until(|| {
        server
            .received_methods()
            .iter()
            .any(|method| method == "buildTarget/test")
    })
    .await?;
    source.cancel();
    let summary = task.await??;

    assert!(summary.cancelled);
    assert_eq!(run.status(a), Some(RunStatus::Errored));
    assert_eq!(run.status(b), Some(RunStatus::Enqueued));
    assert_eq!(
        sink.events(),
        vec![
            "started a",
            "errored a: Testing canceled by user during run of a.",
            "end",
        ]
    );
    assert_eq!(sink.output(), RUN_CANCELLED_MESSAGE);

    let received = server.received();
    let test_request = received
        .iter()
        .find(|message| message["method"] == "buildTarget/test")
        .unwrap();
    let cancel = received
        .iter()
        .find(|message| message["method"] == "$/cancelRequest")
        .unwrap();
    assert_eq!(cancel["params"]["id"], test_request["id"]);
    Ok(())
}
