/// Double-buffered mapping from logical indices to physical engine buffers.
///
/// Indices below `min_index` are fixed (e.g. tips) and always map to `base + i`. Every
/// other index owns two physical slots, `base + i` and `base + i + extent`, and a flip bit
/// selects which one is current. The helper keeps two generations of flip bits; storing
/// copies the current generation into the other one and restoring simply switches which
/// generation is current, so no buffer contents ever move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferIndexHelper {
    min_index: usize,
    extent: usize,
    base: usize,
    generations: [Vec<bool>; 2],
    current: usize,
}

impl BufferIndexHelper {
    /// `max_index` is the number of logical indices; those below `min_index` never flip.
    pub fn new(max_index: usize, min_index: usize) -> Self {
        let extent = max_index.saturating_sub(min_index);
        Self {
            min_index,
            extent,
            base: 0,
            generations: [vec![false; extent], vec![false; extent]],
            current: 0,
        }
    }

    /// Shifts every physical index by `base`, giving this helper a disjoint range.
    pub fn with_base(mut self, base: usize) -> Self {
        self.base = base;
        self
    }

    pub fn buffer_count(&self) -> usize {
        2 * self.extent + self.min_index
    }

    pub fn extent(&self) -> usize {
        self.extent
    }

    pub fn min_index(&self) -> usize {
        self.min_index
    }

    fn slot(&self, index: usize) -> Option<usize> {
        index
            .checked_sub(self.min_index)
            .filter(|&slot| slot < self.extent)
    }

    /// Toggles the current physical slot of `index`. Fixed indices are left untouched.
    pub fn flip_offset(&mut self, index: usize) {
        debug_assert!(
            index < self.min_index + self.extent,
            "buffer index {index} out of range"
        );
        if let Some(slot) = self.slot(index) {
            let bits = &mut self.generations[self.current];
            bits[slot] = !bits[slot];
        }
    }

    pub fn offset_index(&self, index: usize) -> usize {
        let offset = match self.slot(index) {
            Some(slot) if self.generations[self.current][slot] => self.extent,
            _ => 0,
        };
        self.base + index + offset
    }

    pub fn store_state(&mut self) {
        let (a, b) = self.generations.split_at_mut(1);
        if self.current == 0 {
            b[0].clone_from(&a[0]);
        } else {
            a[0].clone_from(&b[0]);
        }
    }

    pub fn restore_state(&mut self) {
        self.current ^= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(helper: &BufferIndexHelper, count: usize) -> Vec<usize> {
        (0..count).map(|i| helper.offset_index(i)).collect()
    }

    #[test]
    fn new_partials_helper_has_expected_buffer_count() {
        // 4 tips + 3 internal nodes
        let helper = BufferIndexHelper::new(7, 4);
        assert_eq!(helper.extent(), 3);
        assert_eq!(helper.buffer_count(), 10);
        assert_eq!(mapping(&helper, 7), vec![0, 1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn flip_offset_moves_internal_index_to_second_slot() {
        let mut helper = BufferIndexHelper::new(7, 4);
        helper.flip_offset(5);
        assert_eq!(helper.offset_index(5), 8);
        helper.flip_offset(5);
        assert_eq!(helper.offset_index(5), 5);
    }

    #[test]
    fn flipping_tip_indices_is_a_no_op() {
        let mut helper = BufferIndexHelper::new(7, 4);
        for tip in 0..4 {
            helper.flip_offset(tip);
            helper.flip_offset(tip);
            helper.flip_offset(tip);
            assert_eq!(helper.offset_index(tip), tip);
        }
    }

    #[test]
    fn store_then_restore_reproduces_mapping() {
        let mut helper = BufferIndexHelper::new(9, 5);
        for &i in &[5, 7, 8, 7, 6, 2] {
            helper.flip_offset(i);
        }
        let before = mapping(&helper, 9);
        helper.store_state();
        helper.restore_state();
        assert_eq!(mapping(&helper, 9), before);
    }

    #[test]
    fn restore_undoes_flips_made_after_store() {
        let mut helper = BufferIndexHelper::new(7, 4);
        helper.flip_offset(4);
        helper.store_state();
        let stored = mapping(&helper, 7);
        helper.flip_offset(4);
        helper.flip_offset(6);
        assert_ne!(mapping(&helper, 7), stored);
        helper.restore_state();
        assert_eq!(mapping(&helper, 7), stored);
    }

    #[test]
    fn repeated_cycles_stay_consistent() {
        let mut helper = BufferIndexHelper::new(7, 4);
        for cycle in 0..10 {
            helper.store_state();
            let stored = mapping(&helper, 7);
            helper.flip_offset(4 + cycle % 3);
            if cycle % 2 == 0 {
                helper.restore_state();
                assert_eq!(mapping(&helper, 7), stored);
            }
        }
    }

    #[test]
    fn scale_helper_uses_every_index_including_accumulator() {
        let mut helper = BufferIndexHelper::new(4, 0).with_base(10);
        assert_eq!(helper.buffer_count(), 8);
        assert_eq!(helper.offset_index(3), 13);
        helper.flip_offset(3);
        assert_eq!(helper.offset_index(3), 17);
        helper.flip_offset(0);
        assert_eq!(helper.offset_index(0), 14);
    }
}
