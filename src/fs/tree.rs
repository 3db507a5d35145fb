//! Synthetic tree construction
//!
//! The tree is assembled with a [`TreeBuilder`] before mounting and frozen by
//! [`TreeBuilder::build`]. The resulting [`OverlayTree`] offers no way to
//! add, remove or rename nodes.

use super::node::{OverlayNode, SyntheticDirectory, SyntheticLeaf};
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Split a configured path into its components.
///
/// Empty and `.` components are dropped; `..` and paths that name nothing
/// are rejected.
pub fn normalize_path(path: &str) -> Result<Vec<&str>> {
    let mut components = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => continue,
            ".." => {
                return Err(Error::InvalidConfig(format!(
                    "path {:?} must not contain '..'",
                    path
                )))
            }
            name => components.push(name),
        }
    }

    if components.is_empty() {
        return Err(Error::InvalidConfig(format!("path {:?} is empty", path)));
    }
    Ok(components)
}

enum PendingNode {
    Leaf(Arc<SyntheticLeaf>),
    Directory(PendingDirectory),
}

#[derive(Default)]
struct PendingDirectory {
    children: HashMap<String, PendingNode>,
    order: Vec<String>,
}

impl PendingDirectory {
    fn attach(&mut self, name: &str, node: PendingNode) {
        self.order.push(name.to_string());
        self.children.insert(name.to_string(), node);
    }

    fn freeze(self) -> SyntheticDirectory {
        let children = self
            .children
            .into_iter()
            .map(|(name, node)| {
                let node = match node {
                    PendingNode::Leaf(leaf) => OverlayNode::Leaf(leaf),
                    PendingNode::Directory(dir) => OverlayNode::Directory(Arc::new(dir.freeze())),
                };
                (name, node)
            })
            .collect();
        SyntheticDirectory::from_parts(children, self.order)
    }
}

/// Collects synthetic leaves before the mount starts
#[derive(Default)]
pub struct TreeBuilder {
    root: PendingDirectory,
    leaves: usize,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place `leaf` at `path`, creating missing intermediate directories
    pub fn insert(&mut self, path: &str, leaf: SyntheticLeaf) -> Result<()> {
        let components = normalize_path(path)?;
        let (last, parents) = components
            .split_last()
            .ok_or_else(|| Error::InvalidConfig(format!("path {:?} is empty", path)))?;

        let mut dir = &mut self.root;
        for (depth, name) in parents.iter().enumerate() {
            if !dir.children.contains_key(*name) {
                dir.attach(name, PendingNode::Directory(PendingDirectory::default()));
            }
            dir = match dir.children.get_mut(*name) {
                Some(PendingNode::Directory(child)) => child,
                _ => {
                    return Err(Error::PathCollision(format!(
                        "{} is a file, cannot hold {}",
                        components[..=depth].join("/"),
                        path
                    )))
                }
            };
        }

        if dir.children.contains_key(*last) {
            return Err(Error::PathCollision(format!(
                "{} is configured more than once",
                components.join("/")
            )));
        }
        dir.attach(last, PendingNode::Leaf(Arc::new(leaf)));
        self.leaves += 1;
        Ok(())
    }

    pub fn build(self) -> OverlayTree {
        OverlayTree {
            root: Arc::new(self.root.freeze()),
            leaves: self.leaves,
        }
    }
}

/// Frozen synthetic tree rooted at the mount root
pub struct OverlayTree {
    root: Arc<SyntheticDirectory>,
    leaves: usize,
}

impl OverlayTree {
    /// A tree with no synthetic nodes besides the root
    pub fn empty() -> Self {
        TreeBuilder::new().build()
    }

    pub fn root(&self) -> &Arc<SyntheticDirectory> {
        &self.root
    }

    pub fn root_node(&self) -> OverlayNode {
        OverlayNode::Directory(self.root.clone())
    }

    /// Number of configured leaves
    pub fn leaf_count(&self) -> usize {
        self.leaves
    }

    /// Synthetic node at `path` (relative to the mount root), if any
    pub fn resolve(&self, path: &Path) -> Option<OverlayNode> {
        let mut node = self.root_node();
        for component in path.iter() {
            let name = component.to_str()?;
            if name == "/" {
                continue;
            }
            node = match &node {
                OverlayNode::Directory(dir) => dir.child(name)?.clone(),
                _ => return None,
            };
        }
        Some(node)
    }

    /// Paths of every synthetic leaf, in insertion order
    pub fn leaf_paths(&self) -> Vec<PathBuf> {
        fn walk(dir: &SyntheticDirectory, prefix: &Path, out: &mut Vec<PathBuf>) {
            for (name, node) in dir.children() {
                let path = prefix.join(name);
                match node {
                    OverlayNode::Leaf(_) => out.push(path),
                    OverlayNode::Directory(child) => walk(child, &path, out),
                    OverlayNode::Passthrough => {}
                }
            }
        }

        let mut out = Vec::new();
        walk(&self.root, Path::new(""), &mut out);
        out
    }
}
