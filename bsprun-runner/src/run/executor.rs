// Copyright (c) The bsprun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{OriginId, RunProfile, RunStatus, TestRun};
use crate::{
    client::BspClient,
    config::RunConfig,
    errors::DisplayErrorChain,
    tree::{NodeId, NodeType, TestNodeInfo},
};
use bsprun_metadata::{
    StatusCode, TestParams, TestResult,
    bazel::{self, BazelTestParamsData, BazelTestResultData},
};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Settings applied to every `buildTarget/test` request made by a [`TargetExecutor`].
#[derive(Clone, Debug, Default)]
pub struct ExecutorSettings {
    arguments: Vec<String>,
    environment: BTreeMap<String, String>,
    working_directory: String,
    additional_params: Vec<String>,
    ide_client: Option<String>,
}

impl ExecutorSettings {
    /// Creates settings from the `[run]` section of the config.
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            arguments: config.arguments().to_vec(),
            environment: config.environment().clone(),
            working_directory: config.working_directory().to_owned(),
            additional_params: config.additional_params().to_vec(),
            ide_client: config.ide_client().map(ToOwned::to_owned),
        }
    }

    /// Returns the request for running a node with metadata `info`, or `None` if the node has
    /// no build target.
    pub fn test_params(
        &self,
        origin_id: OriginId,
        profile: RunProfile,
        info: &TestNodeInfo,
    ) -> Option<TestParams> {
        let target = info.target.as_ref()?;

        let test_filter = match info.node_type {
            NodeType::SourceFile | NodeType::Suite | NodeType::Case => info.test_filter.clone(),
            NodeType::Root | NodeType::Target | NodeType::SourceDirectory => None,
        };
        let mut additional_params = self.additional_params.clone();
        if let Some(client) = &self.ide_client {
            additional_params.push(format!("--test_env=IDE_CLIENT={client}"));
        }
        let data = BazelTestParamsData {
            coverage: Some(profile == RunProfile::Coverage),
            test_filter,
            // Bazel BSP servers split this on whitespace.
            additional_bazel_params: (!additional_params.is_empty())
                .then(|| additional_params.join(" ")),
        };

        Some(TestParams {
            targets: vec![target.id.clone()],
            origin_id: Some(origin_id.to_string()),
            arguments: self.arguments.clone(),
            environment_variables: self.environment.clone(),
            working_directory: self.working_directory.clone(),
            data_kind: Some(bazel::BAZEL_TEST.to_owned()),
            data: serde_json::to_value(data).ok(),
        })
    }
}

/// Runs nodes by sending `buildTarget/test` for their build target.
///
/// [`Self::run_node`] is meant to be passed to [`TestRun::execute`].
#[derive(Clone, Debug)]
pub struct TargetExecutor {
    client: BspClient,
    settings: ExecutorSettings,
}

impl TargetExecutor {
    /// Creates a new executor.
    pub fn new(client: BspClient, settings: ExecutorSettings) -> Self {
        Self { client, settings }
    }

    /// Runs `node` and records the outcome on it and on every pending descendant that isn't
    /// run through a target of its own.
    ///
    /// Nodes without a build target are left alone.
    pub async fn run_node(&self, run: TestRun, node: NodeId) {
        let Some(test_node) = run.tree().get(node) else {
            return;
        };
        let label = test_node.label().to_owned();
        let params = test_node.info().and_then(|info| {
            self.settings
                .test_params(run.origin_id(), run.profile(), info)
        });
        let Some(params) = params else {
            debug!("{label} has no build target, not running it");
            return;
        };

        match self
            .client
            .build_target_test(&params, run.cancel_token())
            .await
        {
            Ok(result) => {
                let (status, message) = result_outcome(&result);
                debug!("{label}: {status}");
                run.update_status(node, status, message.as_deref());
                for child in run.pending_children_below(node, NodeType::Target) {
                    run.update_status(child, status, message.as_deref());
                }
            }
            Err(error) if error.is_cancelled() => {
                run.update_status(
                    node,
                    RunStatus::Errored,
                    Some(&format!("Testing canceled by user during run of {label}.")),
                );
            }
            Err(error) => {
                let error = DisplayErrorChain::new(&error).to_string();
                warn!("error running {label}: {error}");
                run.update_status(node, RunStatus::Errored, Some(&error));
            }
        }
    }
}

/// Maps the result of `buildTarget/test` to a node status.
fn result_outcome(result: &TestResult) -> (RunStatus, Option<String>) {
    match result.status_code {
        StatusCode::Ok => (RunStatus::Passed, None),
        StatusCode::Error => {
            let stdout = result
                .data
                .clone()
                .and_then(|data| serde_json::from_value::<BazelTestResultData>(data).ok())
                .and_then(|data| data.stdout_collector)
                .map(|collector| collector.lines.join("\n"));
            (RunStatus::Failed, stdout)
        }
        StatusCode::Cancelled | StatusCode::Other(_) => (RunStatus::Skipped, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bsprun_metadata::BuildTarget;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use test_case::test_case;

    fn target_info(node_type: NodeType) -> TestNodeInfo {
        let target: BuildTarget = serde_json::from_value(json!({"id": {"uri": "//a:test"}})).unwrap();
        TestNodeInfo::new(node_type).with_target(target)
    }

    fn settings() -> ExecutorSettings {
        ExecutorSettings {
            arguments: vec!["--verbose".to_owned()],
            environment: BTreeMap::from([("CI".to_owned(), "1".to_owned())]),
            working_directory: "/work".to_owned(),
            additional_params: vec!["--config=ci".to_owned(), "--jobs=4".to_owned()],
            ide_client: Some("bsprun".to_owned()),
        }
    }

    #[test]
    fn test_params_for_a_target() {
        let origin_id = OriginId::new_v4();
        let params = settings()
            .test_params(origin_id, RunProfile::Coverage, &target_info(NodeType::Target))
            .unwrap();

        assert_eq!(
            serde_json::to_value(&params).unwrap(),
            json!({
                "targets": [{"uri": "//a:test"}],
                "originId": origin_id.to_string(),
                "arguments": ["--verbose"],
                "environmentVariables": {"CI": "1"},
                "workingDirectory": "/work",
                "dataKind": "bazel-test",
                "data": {
                    "coverage": true,
                    "additionalBazelParams": "--config=ci --jobs=4 --test_env=IDE_CLIENT=bsprun",
                },
            })
        );
    }

    #[test]
    fn test_filter_only_applies_below_targets() {
        let settings = ExecutorSettings::default();
        let filter_of = |node_type| {
            let info = target_info(node_type).with_test_filter("FooTest#testBar");
            let params = settings
                .test_params(OriginId::new_v4(), RunProfile::Run, &info)
                .unwrap();
            params.data.unwrap()["testFilter"].as_str().map(ToOwned::to_owned)
        };

        assert_eq!(filter_of(NodeType::Target), None);
        assert_eq!(filter_of(NodeType::SourceDirectory), None);
        assert_eq!(filter_of(NodeType::SourceFile).as_deref(), Some("FooTest#testBar"));
        assert_eq!(filter_of(NodeType::Case).as_deref(), Some("FooTest#testBar"));
    }

    #[test]
    fn no_params_without_a_target() {
        let params = settings().test_params(
            OriginId::new_v4(),
            RunProfile::Run,
            &TestNodeInfo::new(NodeType::Root),
        );
        assert_eq!(params, None);
    }

    #[test]
    fn no_additional_params_when_empty() {
        let params = ExecutorSettings::default()
            .test_params(OriginId::new_v4(), RunProfile::Run, &target_info(NodeType::Target))
            .unwrap();
        assert_eq!(params.data, Some(json!({"coverage": false})));
    }

    #[test_case(json!({"statusCode": 1}), RunStatus::Passed, None ; "ok")]
    #[test_case(json!({"statusCode": 2}), RunStatus::Failed, None ; "error without output")]
    #[test_case(
        json!({"statusCode": 2, "dataKind": "bazel-test", "data": {"stdoutCollector": {"lines": ["a", "b"]}}}),
        RunStatus::Failed,
        Some("a\nb")
        ; "error with output"
    )]
    #[test_case(json!({"statusCode": 3}), RunStatus::Skipped, None ; "cancelled")]
    #[test_case(json!({"statusCode": 9}), RunStatus::Skipped, None ; "unknown")]
    fn result_outcomes(result: serde_json::Value, status: RunStatus, message: Option<&str>) {
        let result: TestResult = serde_json::from_value(result).unwrap();
        assert_eq!(
            result_outcome(&result),
            (status, message.map(ToOwned::to_owned))
        );
    }
}
