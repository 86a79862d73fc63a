use super::operations::{BranchOperation, NodeOperation};
use crate::core::models::tree::Tree;

/// Work needed to bring an engine's buffers up to date with a tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Traversal {
    pub branch_operations: Vec<BranchOperation>,
    /// Children always precede their parents.
    pub node_operations: Vec<NodeOperation>,
}

impl Traversal {
    pub fn is_empty(&self) -> bool {
        self.branch_operations.is_empty() && self.node_operations.is_empty()
    }
}

/// Collects the branches flagged in `dirty` and every internal node whose subtree changed.
///
/// A node's partials are stale when either child's partials or either child's branch
/// changed. The root has no branch of its own, so its flag only forces its partials.
pub fn traverse(tree: &Tree, dirty: &[bool]) -> Traversal {
    let root = tree.root();
    let mut changed = vec![false; tree.node_count()];
    let mut traversal = Traversal::default();

    for node in tree.post_order() {
        let is_dirty = dirty.get(node).copied().unwrap_or(false);
        if is_dirty && node != root {
            traversal.branch_operations.push(BranchOperation {
                branch: node,
                length: tree.branch_length(node),
            });
        }
        let mut update = is_dirty;
        if let Some((left, right)) = tree.children(node) {
            if changed[left] || changed[right] || is_dirty {
                traversal.node_operations.push(NodeOperation {
                    node,
                    left_child: left,
                    right_child: right,
                });
                update = true;
            }
        }
        changed[node] = update;
    }
    traversal
}

/// Every branch and every internal node, as needed after a full invalidation.
pub fn traverse_all(tree: &Tree) -> Traversal {
    traverse(tree, &vec![true; tree.node_count()])
}

/// Operations for every internal node in post-order.
pub fn all_node_operations(tree: &Tree) -> Vec<NodeOperation> {
    tree.post_order()
        .into_iter()
        .filter_map(|node| {
            tree.children(node).map(|(left, right)| NodeOperation {
                node,
                left_child: left,
                right_child: right,
            })
        })
        .collect()
}
