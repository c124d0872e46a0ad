// Copyright (c) The bsprun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use bsprun_metadata::BuildTargetIdentifier;
use bsprun_runner::errors::{ConnectionError, RequestError};
use color_eyre::eyre::{Result, ensure};
use pretty_assertions::assert_eq;
use std::time::Duration;

/// Polls `f` until it returns true, for up to five seconds.
pub(crate) async fn wait_until(mut f: impl FnMut() -> bool) -> Result<()> {
    for _ in 0..500 {
        if f() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    ensure!(f(), "condition not met within five seconds");
    Ok(())
}

#[tokio::test]
async fn handshake_precedes_requests() -> Result<()> {
    let server = FakeBsp::new()
        .with_target("//a:test", &[])
        .with_target("//b:test", &[]);
    let client = server.client();

    let targets = client.workspace_build_targets().await?;
    let uris: Vec<_> = targets.targets.iter().map(|t| t.id.uri.as_str()).collect();
    assert_eq!(uris, vec!["//a:test", "//b:test"]);

    assert_eq!(
        server.received_methods(),
        vec![
            "build/initialize",
            "build/initialized",
            "workspace/buildTargets"
        ]
    );
    let initialize = &server.received()[0];
    assert_eq!(initialize["params"]["rootUri"], "file:///workspace");
    assert_eq!(initialize["params"]["bspVersion"], "2.2.0");

    let result = client.initialize_result().await?;
    assert_eq!(result.display_name, "fake-bsp");
    Ok(())
}

#[tokio::test]
async fn concurrent_requests_share_one_handshake() -> Result<()> {
    let server = FakeBsp::new().with_target("//a:test", &["src/A.java"]);
    let client = server.client();

    let (targets, sources) = tokio::join!(
        client.workspace_build_targets(),
        client.build_target_sources(vec![BuildTargetIdentifier::new("//a:test")]),
    );
    assert_eq!(targets?.targets.len(), 1);
    let sources = sources?;
    assert_eq!(sources.items.len(), 1);
    assert_eq!(sources.items[0].sources[0].uri, "file:///workspace/src/A.java");

    assert_eq!(server.launches(), 1);
    let initializes = server
        .received_methods()
        .into_iter()
        .filter(|method| method == "build/initialize")
        .count();
    assert_eq!(initializes, 1);
    Ok(())
}

#[tokio::test]
async fn shutdown_disposes_the_connection() -> Result<()> {
    let server = FakeBsp::new();
    let client = server.client();
    client.workspace_build_targets().await?;

    client.shutdown().await;
    wait_until(|| server.received_methods().iter().any(|m| m == "build/exit")).await?;
    let methods = server.received_methods();
    assert_eq!(&methods[methods.len() - 2..], ["build/shutdown", "build/exit"]);

    let error = client.workspace_build_targets().await.unwrap_err();
    assert!(
        matches!(
            error,
            RequestError::NotConnected {
                error: ConnectionError::Disposed
            }
        ),
        "{error:?}"
    );
    assert_eq!(server.launches(), 1);
    Ok(())
}
