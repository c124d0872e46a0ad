// Copyright (c) The bsprun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Selecting build targets and laying them out as a test tree.

use bsprun_metadata::{BuildTarget, SourceItemKind, SourcesItem};
use bsprun_runner::{
    helpers::uri_to_path,
    tree::{NodeId, NodeType, TestNodeInfo, TestTree},
};
use camino::Utf8Path;
use std::collections::HashMap;

/// Returns the test-capable targets whose label or URI contains any of `patterns`, sorted by
/// URI. An empty pattern list selects every test-capable target.
pub(crate) fn select_targets(targets: Vec<BuildTarget>, patterns: &[String]) -> Vec<BuildTarget> {
    let mut selected: Vec<_> = targets
        .into_iter()
        .filter(|target| target.capabilities.can_test)
        .filter(|target| {
            patterns.is_empty()
                || patterns.iter().any(|pattern| {
                    target.id.uri.contains(pattern.as_str())
                        || target.label().contains(pattern.as_str())
                })
        })
        .collect();
    selected.sort_by(|a, b| a.id.cmp(&b.id));
    selected.dedup_by(|a, b| a.id == b.id);
    selected
}

/// A tree of selected targets and their sources.
#[derive(Debug)]
pub(crate) struct SelectedTree {
    pub(crate) tree: TestTree,
    /// The target nodes, which are the roots of the run.
    pub(crate) targets: Vec<NodeId>,
}

/// Lays out `targets` under an organizational root, with one child per source of each target.
///
/// Generated sources are left out. Source labels are relative to the workspace root when
/// possible.
pub(crate) fn build_tree(
    workspace_root: &Utf8Path,
    targets: &[BuildTarget],
    sources: Vec<SourcesItem>,
) -> SelectedTree {
    let mut sources_by_target: HashMap<_, Vec<_>> = HashMap::new();
    for item in sources {
        sources_by_target
            .entry(item.target.clone())
            .or_default()
            .extend(item.sources);
    }

    let mut tree = TestTree::new();
    let root = tree.add_root(workspace_root.as_str(), None);
    let mut target_nodes = Vec::with_capacity(targets.len());

    for target in targets {
        let info = TestNodeInfo::new(NodeType::Target).with_target(target.clone());
        let Some(target_node) = tree.add_child(root, target.label(), Some(info)) else {
            continue;
        };
        target_nodes.push(target_node);

        let mut items = sources_by_target.remove(&target.id).unwrap_or_default();
        items.retain(|item| !item.generated);
        items.sort_by(|a, b| a.uri.cmp(&b.uri));
        items.dedup_by(|a, b| a.uri == b.uri);

        for item in items {
            let node_type = match item.kind {
                SourceItemKind::Directory => NodeType::SourceDirectory,
                _ => NodeType::SourceFile,
            };
            let path = uri_to_path(&item.uri);
            let label = path
                .strip_prefix(workspace_root)
                .unwrap_or(&path)
                .as_str()
                .to_owned();
            let info = TestNodeInfo::new(node_type).with_target(target.clone());
            tree.add_child(target_node, label, Some(info));
        }
    }

    SelectedTree {
        tree,
        targets: target_nodes,
    }
}
