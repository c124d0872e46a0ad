// Copyright (c) The bsprun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The tree of test nodes a run is selected from.
//!
//! Nodes live in an arena and are addressed by [`NodeId`]. IDs stay valid until the node (or
//! one of its ancestors) is removed with [`TestTree::remove`]; they are never reused.

use bsprun_metadata::BuildTarget;
use std::fmt;

/// Identifies a node within a [`TestTree`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct NodeId(usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The level of a node in the test hierarchy.
///
/// Variants are declared in rank order: runs visit all nodes of a lower rank before any node of
/// a higher one.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum NodeType {
    /// The root of the tree.
    Root,
    /// A build target.
    Target,
    /// A directory of sources within a target.
    SourceDirectory,
    /// A single source file within a target.
    SourceFile,
    /// A group of test cases, such as a class.
    Suite,
    /// A single test case.
    Case,
}

impl NodeType {
    /// All node types, in rank order.
    pub const ALL: [NodeType; 6] = [
        Self::Root,
        Self::Target,
        Self::SourceDirectory,
        Self::SourceFile,
        Self::Suite,
        Self::Case,
    ];
}

/// Orchestration metadata attached to a node.
///
/// Nodes without metadata are purely organizational and never take part in a run.
#[derive(Clone, Debug, PartialEq)]
pub struct TestNodeInfo {
    /// The level of this node.
    pub node_type: NodeType,
    /// The build target this node is run through, if any.
    pub target: Option<BuildTarget>,
    /// Restricts a run of this node to matching tests.
    pub test_filter: Option<String>,
    /// Key used to match `test-finish` results to this node.
    pub lookup_key: Option<String>,
}

impl TestNodeInfo {
    /// Creates metadata of the given type with no target, filter or lookup key.
    pub fn new(node_type: NodeType) -> Self {
        Self {
            node_type,
            target: None,
            test_filter: None,
            lookup_key: None,
        }
    }

    /// Sets the build target.
    pub fn with_target(mut self, target: BuildTarget) -> Self {
        self.target = Some(target);
        self
    }

    /// Sets the test filter.
    pub fn with_test_filter(mut self, test_filter: impl Into<String>) -> Self {
        self.test_filter = Some(test_filter.into());
        self
    }

    /// Sets the lookup key.
    pub fn with_lookup_key(mut self, lookup_key: impl Into<String>) -> Self {
        self.lookup_key = Some(lookup_key.into());
        self
    }
}

/// A node in a [`TestTree`].
#[derive(Clone, Debug)]
pub struct TestNode {
    id: NodeId,
    label: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    info: Option<TestNodeInfo>,
}

impl TestNode {
    /// Returns this node's ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Returns the human-readable label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Returns the parent, or `None` for a root.
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Returns the children, in insertion order.
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Returns the orchestration metadata, if any.
    pub fn info(&self) -> Option<&TestNodeInfo> {
        self.info.as_ref()
    }

    /// Returns the node type, if this node has metadata.
    pub fn node_type(&self) -> Option<NodeType> {
        self.info.as_ref().map(|info| info.node_type)
    }
}

/// An arena of test nodes.
#[derive(Clone, Debug, Default)]
pub struct TestTree {
    nodes: Vec<Option<TestNode>>,
    roots: Vec<NodeId>,
}

impl TestTree {
    /// Creates an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a new root node.
    pub fn add_root(&mut self, label: impl Into<String>, info: Option<TestNodeInfo>) -> NodeId {
        let id = self.insert(label.into(), None, info);
        self.roots.push(id);
        id
    }

    /// Adds a child below `parent`. Returns `None` if `parent` is not in the tree.
    pub fn add_child(
        &mut self,
        parent: NodeId,
        label: impl Into<String>,
        info: Option<TestNodeInfo>,
    ) -> Option<NodeId> {
        self.get(parent)?;
        let id = self.insert(label.into(), Some(parent), info);
        if let Some(Some(parent)) = self.nodes.get_mut(parent.0) {
            parent.children.push(id);
        }
        Some(id)
    }

    /// Returns the node with the given ID.
    pub fn get(&self, id: NodeId) -> Option<&TestNode> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    /// Returns the root nodes, in insertion order.
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Returns the children of `id`, or an empty slice if `id` is not in the tree.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        match self.get(id) {
            Some(node) => &node.children,
            None => &[],
        }
    }

    /// Removes `id` and all of its descendants. Returns the number of nodes removed.
    pub fn remove(&mut self, id: NodeId) -> usize {
        let Some(node) = self.nodes.get_mut(id.0).and_then(Option::take) else {
            return 0;
        };

        match node.parent {
            Some(parent) => {
                if let Some(Some(parent)) = self.nodes.get_mut(parent.0) {
                    parent.children.retain(|child| *child != id);
                }
            }
            None => self.roots.retain(|root| *root != id),
        }

        let mut removed = 1;
        let mut stack = node.children;
        while let Some(child) = stack.pop() {
            if let Some(child) = self.nodes.get_mut(child.0).and_then(Option::take) {
                removed += 1;
                stack.extend(child.children);
            }
        }
        removed
    }

    /// Returns the number of nodes in the tree.
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|node| node.is_some()).count()
    }

    /// Returns true if the tree has no nodes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(
        &mut self,
        label: String,
        parent: Option<NodeId>,
        info: Option<TestNodeInfo>,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Some(TestNode {
            id,
            label,
            parent,
            children: Vec::new(),
            info,
        }));
        id
    }
}
