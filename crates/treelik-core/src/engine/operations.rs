use super::buffers::BufferIndexHelper;
use super::rescaling::ScalingDecision;

/// Sentinel for "no buffer" in flattened operation tuples.
pub const NONE: i32 = -1;
pub const OPERATION_TUPLE_SIZE: usize = 7;
/// Operation tuple plus partition index and cumulative scale buffer.
pub const PARTITION_OPERATION_TUPLE_SIZE: usize = 9;

/// Request to recompute the transition matrix of the branch above `branch`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BranchOperation {
    pub branch: usize,
    pub length: f64,
}

/// Request to recompute the partials of `node` from its two children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeOperation {
    pub node: usize,
    pub left_child: usize,
    pub right_child: usize,
}

/// One instruction for the compute engine, with buffer indices already resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operation {
    pub destination: usize,
    pub scale_write: Option<usize>,
    pub scale_read: Option<usize>,
    pub left_child: usize,
    pub left_matrix: usize,
    pub right_child: usize,
    pub right_matrix: usize,
}

fn as_tuple_index(index: Option<usize>) -> i32 {
    index.map_or(NONE, |i| i as i32)
}

impl Operation {
    pub fn to_tuple(&self) -> [i32; OPERATION_TUPLE_SIZE] {
        [
            self.destination as i32,
            as_tuple_index(self.scale_write),
            as_tuple_index(self.scale_read),
            self.left_child as i32,
            self.left_matrix as i32,
            self.right_child as i32,
            self.right_matrix as i32,
        ]
    }
}

/// An [`Operation`] restricted to the patterns of one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionOperation {
    pub operation: Operation,
    pub partition: usize,
}

impl PartitionOperation {
    pub fn to_tuple(&self) -> [i32; PARTITION_OPERATION_TUPLE_SIZE] {
        let op = self.operation.to_tuple();
        [
            op[0],
            op[1],
            op[2],
            op[3],
            op[4],
            op[5],
            op[6],
            self.partition as i32,
            NONE,
        ]
    }
}

/// Ordered operations for one `update_partials` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationList {
    operations: Vec<Operation>,
}

impl OperationList {
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Concatenated fixed-width tuples, the wire form expected by native engines.
    pub fn flatten(&self) -> Vec<i32> {
        self.operations.iter().flat_map(|op| op.to_tuple()).collect()
    }
}

/// Where the cumulative scale factors for the root come from in one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScaleAccumulation {
    /// Scaling is off.
    None,
    /// Reuse the accumulator computed by an earlier evaluation.
    Reuse(usize),
    /// Reset `destination` and sum `sources` into it.
    Recompute {
        destination: usize,
        sources: Vec<usize>,
    },
    /// Let the engine accumulate its own automatic scale factors.
    Auto { sources: Vec<usize> },
}

impl ScaleAccumulation {
    pub fn cumulative_index(&self) -> Option<usize> {
        match self {
            Self::Reuse(index) => Some(*index),
            Self::Recompute { destination, .. } => Some(*destination),
            Self::None | Self::Auto { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ResolvedNode {
    destination: usize,
    scale_write: Option<usize>,
    scale_read: Option<usize>,
    left_child: usize,
    right_child: usize,
}

/// Turns node-update requests into engine operations.
///
/// The encoder owns the double-buffered bookkeeping of partials and scale buffers: which
/// physical partials buffer is current for every node, which scale buffer holds each
/// internal node's factors, and which slot is the scale accumulator.
#[derive(Debug, Clone)]
pub struct OperationEncoder {
    tip_count: usize,
    internal_count: usize,
    partials: BufferIndexHelper,
    scales: BufferIndexHelper,
    scale_indices: Vec<usize>,
    stored_scale_indices: Vec<usize>,
}

impl OperationEncoder {
    pub fn new(node_count: usize, tip_count: usize) -> Self {
        let internal_count = node_count.saturating_sub(tip_count);
        let scales = BufferIndexHelper::new(internal_count + 1, 0);
        let scale_indices: Vec<usize> = (0..internal_count).map(|i| scales.offset_index(i)).collect();
        Self {
            tip_count,
            internal_count,
            partials: BufferIndexHelper::new(node_count, tip_count),
            scales,
            stored_scale_indices: scale_indices.clone(),
            scale_indices,
        }
    }

    pub fn tip_count(&self) -> usize {
        self.tip_count
    }

    pub fn internal_count(&self) -> usize {
        self.internal_count
    }

    pub fn partials_buffer_count(&self) -> usize {
        self.partials.buffer_count()
    }

    pub fn scale_buffer_count(&self) -> usize {
        self.scales.buffer_count()
    }

    pub fn partials_index(&self, node: usize) -> usize {
        self.partials.offset_index(node)
    }

    pub fn scale_indices(&self) -> &[usize] {
        &self.scale_indices
    }

    fn resolve(&mut self, op: &NodeOperation, decision: &ScalingDecision, flip_partials: bool) -> ResolvedNode {
        if flip_partials {
            self.partials.flip_offset(op.node);
        }
        let destination = self.partials.offset_index(op.node);
        let n = op.node - self.tip_count;

        let (scale_write, scale_read) = if decision.use_scale_factors {
            if decision.recompute_scale_factors {
                self.scales.flip_offset(n);
                self.scale_indices[n] = self.scales.offset_index(n);
                (Some(self.scale_indices[n]), None)
            } else {
                (None, Some(self.scale_indices[n]))
            }
        } else {
            if decision.use_auto_scaling {
                self.scale_indices[n] = destination;
            }
            (None, None)
        };

        ResolvedNode {
            destination,
            scale_write,
            scale_read,
            left_child: self.partials.offset_index(op.left_child),
            right_child: self.partials.offset_index(op.right_child),
        }
    }

    /// Encodes `node_ops` in order. `matrix_index` maps a node to the transition matrix
    /// buffer of the branch above it.
    pub fn encode(
        &mut self,
        node_ops: &[NodeOperation],
        decision: &ScalingDecision,
        flip_partials: bool,
        matrix_index: impl Fn(usize) -> usize,
    ) -> OperationList {
        let operations = node_ops
            .iter()
            .map(|op| {
                let r = self.resolve(op, decision, flip_partials);
                Operation {
                    destination: r.destination,
                    scale_write: r.scale_write,
                    scale_read: r.scale_read,
                    left_child: r.left_child,
                    left_matrix: matrix_index(op.left_child),
                    right_child: r.right_child,
                    right_matrix: matrix_index(op.right_child),
                }
            })
            .collect();
        OperationList { operations }
    }

    /// Encodes `node_ops` once per partition. Buffers flip once per node; only the
    /// transition matrices differ between partitions.
    pub fn encode_partitioned(
        &mut self,
        node_ops: &[NodeOperation],
        decision: &ScalingDecision,
        flip_partials: bool,
        partition_count: usize,
        matrix_index: impl Fn(usize, usize) -> usize,
    ) -> Vec<PartitionOperation> {
        let mut operations = Vec::with_capacity(node_ops.len() * partition_count);
        for op in node_ops {
            let r = self.resolve(op, decision, flip_partials);
            for partition in 0..partition_count {
                operations.push(PartitionOperation {
                    operation: Operation {
                        destination: r.destination,
                        scale_write: r.scale_write,
                        scale_read: r.scale_read,
                        left_child: r.left_child,
                        left_matrix: matrix_index(partition, op.left_child),
                        right_child: r.right_child,
                        right_matrix: matrix_index(partition, op.right_child),
                    },
                    partition,
                });
            }
        }
        operations
    }

    /// Decides how the root's cumulative scale factors are obtained for this attempt.
    pub fn accumulation(&mut self, decision: &ScalingDecision) -> ScaleAccumulation {
        let accumulator = self.internal_count;
        if decision.use_scale_factors {
            if decision.recompute_scale_factors {
                self.scales.flip_offset(accumulator);
                ScaleAccumulation::Recompute {
                    destination: self.scales.offset_index(accumulator),
                    sources: self.scale_indices.clone(),
                }
            } else {
                ScaleAccumulation::Reuse(self.scales.offset_index(accumulator))
            }
        } else if decision.use_auto_scaling {
            ScaleAccumulation::Auto {
                sources: self.scale_indices.clone(),
            }
        } else {
            ScaleAccumulation::None
        }
    }

    pub fn store_state(&mut self) {
        self.partials.store_state();
        self.scales.store_state();
        self.stored_scale_indices.clone_from(&self.scale_indices);
    }

    pub fn restore_state(&mut self) {
        self.partials.restore_state();
        self.scales.restore_state();
        std::mem::swap(&mut self.scale_indices, &mut self.stored_scale_indices);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ((A,B)AB,C)R: tips 0..3, AB = 3, R = 4
    fn three_taxon_ops() -> Vec<NodeOperation> {
        vec![
            NodeOperation {
                node: 3,
                left_child: 0,
                right_child: 1,
            },
            NodeOperation {
                node: 4,
                left_child: 3,
                right_child: 2,
            },
        ]
    }

    fn identity_matrix(node: usize) -> usize {
        node
    }

    #[test]
    fn encode_preserves_topological_order() {
        let mut encoder = OperationEncoder::new(5, 3);
        let list = encoder.encode(
            &three_taxon_ops(),
            &ScalingDecision::default(),
            true,
            identity_matrix,
        );
        assert_eq!(list.len(), 2);
        let ops = list.operations();
        // AB flipped into its second slot: 3 + extent 2
        assert_eq!(ops[0].destination, 5);
        assert_eq!(ops[1].destination, 6);
        assert_eq!(ops[1].left_child, ops[0].destination);
        assert_eq!(ops[1].right_child, 2);
    }

    #[test]
    fn encode_without_scaling_leaves_scale_fields_empty() {
        let mut encoder = OperationEncoder::new(5, 3);
        let list = encoder.encode(
            &three_taxon_ops(),
            &ScalingDecision::default(),
            false,
            identity_matrix,
        );
        let tuple = list.operations()[0].to_tuple();
        assert_eq!(tuple, [3, NONE, NONE, 0, 0, 1, 1]);
        assert_eq!(list.flatten().len(), 2 * OPERATION_TUPLE_SIZE);
    }

    #[test]
    fn recompute_writes_fresh_scale_buffers_and_reuse_reads_them() {
        let mut encoder = OperationEncoder::new(5, 3);
        let recompute = ScalingDecision {
            use_scale_factors: true,
            recompute_scale_factors: true,
            ..Default::default()
        };
        let list = encoder.encode(&three_taxon_ops(), &recompute, true, identity_matrix);
        // scale helper: 3 logical slots (2 internal + accumulator), extent 3
        assert_eq!(list.operations()[0].scale_write, Some(3));
        assert_eq!(list.operations()[1].scale_write, Some(4));
        assert_eq!(list.operations()[0].scale_read, None);

        let reuse = ScalingDecision {
            use_scale_factors: true,
            ..Default::default()
        };
        let list = encoder.encode(&three_taxon_ops(), &reuse, true, identity_matrix);
        assert_eq!(list.operations()[0].scale_write, None);
        assert_eq!(list.operations()[0].scale_read, Some(3));
        assert_eq!(list.operations()[1].scale_read, Some(4));
    }

    #[test]
    fn auto_scaling_records_partials_buffers() {
        let mut encoder = OperationEncoder::new(5, 3);
        let auto = ScalingDecision {
            use_auto_scaling: true,
            ..Default::default()
        };
        let list = encoder.encode(&three_taxon_ops(), &auto, true, identity_matrix);
        assert_eq!(encoder.scale_indices(), &[5, 6]);
        assert_eq!(list.operations()[0].scale_write, None);
        assert_eq!(
            encoder.accumulation(&auto),
            ScaleAccumulation::Auto {
                sources: vec![5, 6]
            }
        );
    }

    #[test]
    fn accumulation_flips_accumulator_only_when_recomputing() {
        let mut encoder = OperationEncoder::new(5, 3);
        let recompute = ScalingDecision {
            use_scale_factors: true,
            recompute_scale_factors: true,
            ..Default::default()
        };
        let first = encoder.accumulation(&recompute);
        assert_eq!(first.cumulative_index(), Some(5));
        let reuse = ScalingDecision {
            use_scale_factors: true,
            ..Default::default()
        };
        assert_eq!(encoder.accumulation(&reuse), ScaleAccumulation::Reuse(5));
        assert_eq!(encoder.accumulation(&recompute).cumulative_index(), Some(2));
        assert_eq!(
            encoder.accumulation(&ScalingDecision::default()),
            ScaleAccumulation::None
        );
    }

    #[test]
    fn restore_returns_to_stored_buffers_and_scale_indices() {
        let mut encoder = OperationEncoder::new(5, 3);
        let recompute = ScalingDecision {
            use_scale_factors: true,
            recompute_scale_factors: true,
            ..Default::default()
        };
        encoder.encode(&three_taxon_ops(), &recompute, true, identity_matrix);
        encoder.store_state();
        let stored_root = encoder.partials_index(4);
        let stored_scales = encoder.scale_indices().to_vec();

        encoder.encode(&three_taxon_ops(), &recompute, true, identity_matrix);
        assert_ne!(encoder.partials_index(4), stored_root);
        assert_ne!(encoder.scale_indices(), stored_scales.as_slice());

        encoder.restore_state();
        assert_eq!(encoder.partials_index(4), stored_root);
        assert_eq!(encoder.scale_indices(), stored_scales.as_slice());
    }

    #[test]
    fn encode_partitioned_flips_once_per_node() {
        let mut encoder = OperationEncoder::new(5, 3);
        let ops = encoder.encode_partitioned(
            &three_taxon_ops(),
            &ScalingDecision::default(),
            true,
            2,
            |partition, node| partition * 100 + node,
        );
        assert_eq!(ops.len(), 4);
        assert_eq!(ops[0].operation.destination, ops[1].operation.destination);
        assert_eq!(ops[0].operation.destination, 5);
        assert_eq!(ops[1].operation.left_matrix, 100);
        assert_eq!(ops[3].partition, 1);
        assert_eq!(ops[3].to_tuple()[7], 1);
        assert_eq!(ops[3].to_tuple()[8], NONE);
    }
}
