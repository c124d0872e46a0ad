// Copyright (c) The bsprun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! An in-process build server that answers over a duplex stream.

use bsprun_runner::{
    client::{BspClient, ClientSettings, TracingClientSink},
    connection::{ConnectionManager, ServerLauncher},
    coverage::FileCoverage,
    errors::ConnectionError,
    rpc::{FrameReader, ServerChannel, write_frame},
    run::RunSink,
    tree::TestNode,
};
use futures::{FutureExt, future::BoxFuture};
use serde_json::{Value, json};
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::io::{AsyncRead, AsyncWrite};

pub(crate) const WORKSPACE_ROOT: &str = "/workspace";

/// How the fake server answers `buildTarget/test` for a target.
#[derive(Clone, Debug)]
pub(crate) enum TestScript {
    /// Sends the notifications, with the request's origin ID filled in, then the result.
    Respond {
        notifications: Vec<(&'static str, Value)>,
        result: Value,
    },
    /// Never answers unless the request is cancelled, in which case it answers with an internal
    /// error the way Bazel BSP does.
    WaitForCancel,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct FakeBsp {
    state: Arc<FakeState>,
}

#[derive(Debug, Default)]
struct FakeState {
    targets: Mutex<Vec<Value>>,
    sources: Mutex<HashMap<String, Vec<String>>>,
    scripts: Mutex<HashMap<String, TestScript>>,
    received: Mutex<Vec<Value>>,
    launches: AtomicUsize,
}

impl FakeBsp {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_target(self, uri: &str, sources: &[&str]) -> Self {
        self.state.targets.lock().unwrap().push(json!({
            "id": {"uri": uri},
            "displayName": uri,
            "tags": ["test"],
            "languageIds": ["java"],
            "dependencies": [],
            "capabilities": {"canCompile": true, "canTest": true, "canRun": false, "canDebug": false},
        }));
        self.state.sources.lock().unwrap().insert(
            uri.to_owned(),
            sources.iter().map(|s| format!("file://{WORKSPACE_ROOT}/{s}")).collect(),
        );
        self
    }

    pub(crate) fn with_script(self, uri: &str, script: TestScript) -> Self {
        self.state
            .scripts
            .lock()
            .unwrap()
            .insert(uri.to_owned(), script);
        self
    }

    pub(crate) fn client(&self) -> BspClient {
        let manager = ConnectionManager::new(Arc::new(self.clone()), Duration::from_millis(500));
        BspClient::new(
            manager,
            ClientSettings::new(WORKSPACE_ROOT, vec!["java".to_owned()]),
            Arc::new(TracingClientSink),
        )
    }

    pub(crate) fn launches(&self) -> usize {
        self.state.launches.load(Ordering::SeqCst)
    }

    /// Returns every message received so far, in order.
    pub(crate) fn received(&self) -> Vec<Value> {
        self.state.received.lock().unwrap().clone()
    }

    pub(crate) fn received_methods(&self) -> Vec<String> {
        self.received()
            .iter()
            .filter_map(|message| message["method"].as_str().map(ToOwned::to_owned))
            .collect()
    }
}

impl ServerLauncher for FakeBsp {
    fn launch(&self) -> BoxFuture<'static, Result<ServerChannel, ConnectionError>> {
        let state = self.state.clone();
        async move {
            state.launches.fetch_add(1, Ordering::SeqCst);
            let (client, server) = tokio::io::duplex(1 << 16);
            let (client_reader, client_writer) = tokio::io::split(client);
            let (server_reader, server_writer) = tokio::io::split(server);
            tokio::spawn(serve(state, server_reader, server_writer));
            Ok(ServerChannel::new(client_reader, client_writer))
        }
        .boxed()
    }
}

async fn serve(
    state: Arc<FakeState>,
    reader: impl AsyncRead + Unpin,
    mut writer: impl AsyncWrite + Unpin,
) {
    let mut reader = FrameReader::new(reader);
    // Requests waiting for `$/cancelRequest`.
    let mut waiting: Vec<Value> = Vec::new();

    while let Ok(Some(body)) = reader.read_frame().await {
        let message: Value = serde_json::from_slice(&body).unwrap();
        state.received.lock().unwrap().push(message.clone());

        let id = message.get("id").cloned();
        let params = &message["params"];
        let mut outgoing = Vec::new();
        match (message["method"].as_str().unwrap_or_default(), id) {
            ("build/initialize", Some(id)) => outgoing.push(response(
                id,
                json!({
                    "displayName": "fake-bsp",
                    "version": "1.0.0",
                    "bspVersion": "2.2.0",
                    "capabilities": {"testProvider": {"languageIds": ["java"]}},
                }),
            )),
            ("workspace/buildTargets", Some(id)) => {
                let targets = state.targets.lock().unwrap().clone();
                outgoing.push(response(id, json!({"targets": targets})));
            }
            ("buildTarget/sources", Some(id)) => {
                let sources = state.sources.lock().unwrap();
                let items: Vec<_> = params["targets"]
                    .as_array()
                    .into_iter()
                    .flatten()
                    .map(|target| {
                        let uri = target["uri"].as_str().unwrap_or_default();
                        let files: Vec<_> = sources
                            .get(uri)
                            .into_iter()
                            .flatten()
                            .map(|file| json!({"uri": file, "kind": 1, "generated": false}))
                            .collect();
                        json!({"target": target, "sources": files})
                    })
                    .collect();
                outgoing.push(response(id, json!({"items": items})));
            }
            ("buildTarget/test", Some(id)) => {
                let uri = params["targets"][0]["uri"].as_str().unwrap_or_default();
                let origin_id = params["originId"].clone();
                let script = state.scripts.lock().unwrap().get(uri).cloned();
                match script {
                    Some(TestScript::Respond {
                        notifications,
                        result,
                    }) => {
                        for (method, mut params) in notifications {
                            params["originId"] = origin_id.clone();
                            outgoing.push(json!({"jsonrpc": "2.0", "method": method, "params": params}));
                        }
                        let mut result = result;
                        result["originId"] = origin_id;
                        outgoing.push(response(id, result));
                    }
                    Some(TestScript::WaitForCancel) => waiting.push(id),
                    None => outgoing.push(response(
                        id,
                        json!({"originId": origin_id, "statusCode": 1}),
                    )),
                }
            }
            ("$/cancelRequest", None) => {
                let cancelled = params["id"].clone();
                if let Some(index) = waiting.iter().position(|id| *id == cancelled) {
                    let id = waiting.remove(index);
                    outgoing.push(json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": {"code": -32603, "message": "interrupted"},
                    }));
                }
            }
            ("build/shutdown", Some(id)) => outgoing.push(response(id, Value::Null)),
            ("build/exit", None) => break,
            (_, None) => {}
            (method, Some(id)) => outgoing.push(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32601, "message": format!("unknown method {method}")},
            })),
        }

        for message in outgoing {
            let body = serde_json::to_vec(&message).unwrap();
            if write_frame(&mut writer, &body).await.is_err() {
                return;
            }
        }
    }
}

fn response(id: Value, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}

/// Records everything a run reports, as one line per event.
#[derive(Debug, Default)]
pub(crate) struct RecordingSink {
    events: Mutex<Vec<String>>,
    output: Mutex<String>,
    coverage: Mutex<Vec<FileCoverage>>,
}

impl RecordingSink {
    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub(crate) fn output(&self) -> String {
        self.output.lock().unwrap().clone()
    }

    pub(crate) fn coverage(&self) -> Vec<FileCoverage> {
        self.coverage.lock().unwrap().clone()
    }
}

impl RunSink for RecordingSink {
    fn enqueued(&self, _node: &TestNode) {}

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
