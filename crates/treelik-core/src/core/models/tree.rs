use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Clone)]
pub enum TreeError {
    #[error("Tree has no nodes")]
    Empty,
    #[error("Node {node} has {count} children; only strictly binary trees are supported")]
    NotBinary { node: usize, count: usize },
    #[error("Leaf {node} has no taxon label")]
    UnlabelledLeaf { node: usize },
    #[error("Taxon '{0}' appears more than once")]
    DuplicateTaxon(String),
    #[error("Invalid branch length {length} on node {node}")]
    InvalidBranchLength { node: usize, length: f64 },
    #[error("Node index {0} is out of range")]
    NodeOutOfRange(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub parent: Option<usize>,
    pub children: Option<(usize, usize)>,
    pub branch_length: f64,
    pub taxon: Option<String>,
}

impl Node {
    pub fn is_external(&self) -> bool {
        self.children.is_none()
    }
}

/// A rooted, strictly binary phylogenetic tree.
///
/// Nodes are numbered the way the likelihood engine expects them: external
/// nodes (tips) occupy `0..tip_count`, internal nodes follow in post-order,
/// so the root is always the last node. The branch of a node is the edge to
/// its parent and carries the node's index.
#[derive(Debug, Clone, PartialEq)]
pub struct Tree {
    nodes: Vec<Node>,
    tip_count: usize,
    root: usize,
}

impl Tree {
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn tip_count(&self) -> usize {
        self.tip_count
    }

    pub fn internal_node_count(&self) -> usize {
        self.nodes.len() - self.tip_count
    }

    pub fn root(&self) -> usize {
        self.root
    }

    pub fn node(&self, index: usize) -> Option<&Node> {
        self.nodes.get(index)
    }

    pub fn is_external(&self, index: usize) -> bool {
        index < self.tip_count
    }

    pub fn children(&self, index: usize) -> Option<(usize, usize)> {
        self.nodes.get(index).and_then(|n| n.children)
    }

    pub fn parent(&self, index: usize) -> Option<usize> {
        self.nodes.get(index).and_then(|n| n.parent)
    }

    pub fn branch_length(&self, index: usize) -> f64 {
        self.nodes[index].branch_length
    }

    pub fn set_branch_length(&mut self, index: usize, length: f64) -> Result<(), TreeError> {
        if !length.is_finite() || length < 0.0 {
            return Err(TreeError::InvalidBranchLength {
                node: index,
                length,
            });
        }
        let node = self
            .nodes
            .get_mut(index)
            .ok_or(TreeError::NodeOutOfRange(index))?;
        node.branch_length = length;
        Ok(())
    }

    pub fn branch_lengths(&self) -> Vec<f64> {
        self.nodes.iter().map(|n| n.branch_length).collect()
    }

    /// Overwrites every branch length at once, e.g. when restoring a stored state.
    pub fn set_branch_lengths(&mut self, lengths: &[f64]) {
        for (node, &length) in self.nodes.iter_mut().zip(lengths) {
            node.branch_length = length;
        }
    }

    pub fn taxon_id(&self, tip: usize) -> Option<&str> {
        self.nodes.get(tip).and_then(|n| n.taxon.as_deref())
    }

    pub fn taxon_index(&self, taxon: &str) -> Option<usize> {
        self.nodes[..self.tip_count]
            .iter()
            .position(|n| n.taxon.as_deref() == Some(taxon))
    }

    /// Node indices with every child listed before its parent.
    pub fn post_order(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![(self.root, false)];
        while let Some((index, expanded)) = stack.pop() {
            match (self.nodes[index].children, expanded) {
                (Some((left, right)), false) => {
                    stack.push((index, true));
                    stack.push((right, false));
                    stack.push((left, false));
                }
                _ => order.push(index),
            }
        }
        order
    }
}

#[derive(Debug, Clone)]
struct RawNode {
    label: Option<String>,
    length: f64,
    children: Vec<usize>,
}

/// Assembles a [`Tree`] from nodes added in any order, then renumbers them.
#[derive(Debug, Default, Clone)]
pub struct TreeBuilder {
    nodes: Vec<RawNode>,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_leaf(&mut self, label: impl Into<String>, length: f64) -> usize {
        self.nodes.push(RawNode {
            label: Some(label.into()),
            length,
            children: Vec::new(),
        });
        self.nodes.len() - 1
    }

    pub fn add_internal(&mut self, children: Vec<usize>, label: Option<String>, length: f64) -> usize {
        self.nodes.push(RawNode {
            label,
            length,
            children,
        });
        self.nodes.len() - 1
    }

    pub fn build(self, root: usize) -> Result<Tree, TreeError> {
        if self.nodes.is_empty() {
            return Err(TreeError::Empty);
        }
        if root >= self.nodes.len() {
            return Err(TreeError::NodeOutOfRange(root));
        }

        // Raw post-order, recording tips and internals separately.
        let mut tips = Vec::new();
        let mut internals = Vec::new();
        let mut stack = vec![(root, false)];
        while let Some((raw, expanded)) = stack.pop() {
            let node = &self.nodes[raw];
            if node.children.is_empty() {
                tips.push(raw);
                continue;
            }
            if node.children.len() != 2 {
                return Err(TreeError::NotBinary {
                    node: raw,
                    count: node.children.len(),
                });
            }
            if expanded {
                internals.push(raw);
            } else {
                stack.push((raw, true));
                stack.push((node.children[1], false));
                stack.push((node.children[0], false));
            }
        }

        let tip_count = tips.len();
        let mut new_index = vec![usize::MAX; self.nodes.len()];
        for (i, &raw) in tips.iter().chain(internals.iter()).enumerate() {
            new_index[raw] = i;
        }

        let mut seen = HashSet::new();
        let mut nodes = Vec::with_capacity(tip_count + internals.len());
        for &raw in tips.iter().chain(internals.iter()) {
            let src = &self.nodes[raw];
            let i = new_index[raw];
            let length = if raw == root { 0.0 } else { src.length };
            if !length.is_finite() || length < 0.0 {
                return Err(TreeError::InvalidBranchLength { node: i, length });
            }
            let taxon = if src.children.is_empty() {
                let label = src
                    .label
                    .clone()
                    .ok_or(TreeError::UnlabelledLeaf { node: i })?;
                if !seen.insert(label.clone()) {
                    return Err(TreeError::DuplicateTaxon(label));
                }
                Some(label)
            } else {
                None
            };
            let children = if src.children.is_empty() {
                None
            } else {
                Some((new_index[src.children[0]], new_index[src.children[1]]))
            };
            nodes.push(Node {
                parent: None,
                children,
                branch_length: length,
                taxon,
            });
        }

        for i in 0..nodes.len() {
            if let Some((left, right)) = nodes[i].children {
                nodes[left].parent = Some(i);
                nodes[right].parent = Some(i);
            }
        }

        let root = nodes.len() - 1;
        Ok(Tree {
            nodes,
            tip_count,
            root,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn four_taxon_tree() -> Tree {
        let mut b = TreeBuilder::new();
        let a = b.add_leaf("A", 0.1);
        let bb = b.add_leaf("B", 0.2);
        let c = b.add_leaf("C", 0.3);
        let d = b.add_leaf("D", 0.4);
        let ab = b.add_internal(vec![a, bb], None, 0.5);
        let cd = b.add_internal(vec![c, d], None, 0.6);
        let root = b.add_internal(vec![ab, cd], None, 0.0);
        b.build(root).unwrap()
    }

    #[test]
    fn build_numbers_tips_first_and_root_last() {
        let tree = four_taxon_tree();
        assert_eq!(tree.node_count(), 7);
        assert_eq!(tree.tip_count(), 4);
        assert_eq!(tree.internal_node_count(), 3);
        assert_eq!(tree.root(), 6);
        assert_eq!(tree.taxon_id(0), Some("A"));
        assert_eq!(tree.taxon_id(3), Some("D"));
        assert_eq!(tree.children(4), Some((0, 1)));
        assert_eq!(tree.children(5), Some((2, 3)));
        assert_eq!(tree.children(6), Some((4, 5)));
        assert_eq!(tree.parent(0), Some(4));
        assert_eq!(tree.parent(6), None);
    }

    #[test]
    fn post_order_lists_children_before_parents() {
        let tree = four_taxon_tree();
        let order = tree.post_order();
        assert_eq!(order.len(), 7);
        let position = |n: usize| order.iter().position(|&x| x == n).unwrap();
        for node in 4..7 {
            let (l, r) = tree.children(node).unwrap();
            assert!(position(l) < position(node));
            assert!(position(r) < position(node));
        }
        assert_eq!(*order.last().unwrap(), tree.root());
    }

    #[test]
    fn root_branch_length_is_zeroed() {
        let tree = four_taxon_tree();
        assert_eq!(tree.branch_length(tree.root()), 0.0);
        assert_eq!(tree.branch_length(4), 0.5);
    }

    #[test]
    fn build_rejects_multifurcations() {
        let mut b = TreeBuilder::new();
        let a = b.add_leaf("A", 0.1);
        let bb = b.add_leaf("B", 0.1);
        let c = b.add_leaf("C", 0.1);
        let root = b.add_internal(vec![a, bb, c], None, 0.0);
        assert!(matches!(
            b.build(root),
            Err(TreeError::NotBinary { count: 3, .. })
        ));
    }

    #[test]
    fn build_rejects_duplicate_taxa() {
        let mut b = TreeBuilder::new();
        let a = b.add_leaf("A", 0.1);
        let a2 = b.add_leaf("A", 0.1);
        let root = b.add_internal(vec![a, a2], None, 0.0);
        assert_eq!(b.build(root), Err(TreeError::DuplicateTaxon("A".into())));
    }

    #[test]
    fn set_branch_length_rejects_negative_values() {
        let mut tree = four_taxon_tree();
        assert!(tree.set_branch_length(0, -1.0).is_err());
        assert!(tree.set_branch_length(0, 0.25).is_ok());
        assert_eq!(tree.branch_length(0), 0.25);
    }

    #[test]
    fn taxon_index_finds_tips_by_label() {
        let tree = four_taxon_tree();
        assert_eq!(tree.taxon_index("C"), Some(2));
        assert_eq!(tree.taxon_index("Z"), None);
    }
}
