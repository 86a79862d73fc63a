use super::{
    ComputeEngine, ComputeError, EngineFactory, EngineFlags, InstanceDetails, InstanceSpec,
    ResourceDetails, RootRequest,
};
use crate::core::substitution::eigen::EigenDecomposition;
use crate::engine::operations::{Operation, PartitionOperation};
use tracing::{debug, info, warn};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

const CPU_RESOURCE: usize = 0;

/// Creates [`CpuEngine`] instances.
///
/// The factory advertises a configurable set of capabilities so that callers can be tested
/// against engines lacking, for example, automatic scaling.
#[derive(Debug, Clone)]
pub struct CpuEngineFactory {
    supported: EngineFlags,
}

impl Default for CpuEngineFactory {
    fn default() -> Self {
        let mut supported = EngineFlags::PROCESSOR_CPU
            | EngineFlags::PRECISION_DOUBLE
            | EngineFlags::SCALING_MANUAL
            | EngineFlags::SCALING_AUTO
            | EngineFlags::EIGEN_REAL
            | EngineFlags::VECTOR_NONE
            | EngineFlags::THREADING_NONE;
        if cfg!(feature = "parallel") {
            supported |= EngineFlags::THREADING_PARALLEL;
        }
        Self { supported }
    }
}

impl CpuEngineFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_supported_flags(supported: EngineFlags) -> Self {
        Self { supported }
    }

    pub fn supported_flags(&self) -> EngineFlags {
        self.supported
    }

    fn grant_flags(&self, spec: &InstanceSpec) -> EngineFlags {
        let requested = spec.preference_flags | spec.requirement_flags;

        let unmet = spec.requirement_flags.difference(self.supported);
        if !unmet.is_empty() {
            warn!("Required engine flags not supported, continuing without: {}", unmet);
        }
        if requested.contains(EngineFlags::PRECISION_SINGLE) {
            debug!("Single precision requested; the CPU engine computes in double precision");
        }
        if requested.contains(EngineFlags::PROCESSOR_GPU) {
            debug!("GPU processing requested; using the CPU engine");
        }

        let mut granted = EngineFlags::PROCESSOR_CPU
            | EngineFlags::PRECISION_DOUBLE
            | EngineFlags::EIGEN_REAL
            | EngineFlags::VECTOR_NONE;

        if requested.contains(EngineFlags::SCALING_AUTO)
            && self.supported.contains(EngineFlags::SCALING_AUTO)
        {
            granted |= EngineFlags::SCALING_AUTO;
        } else {
            granted |= EngineFlags::SCALING_MANUAL;
        }

        if self.supported.contains(EngineFlags::THREADING_PARALLEL)
            && !requested.contains(EngineFlags::THREADING_NONE)
        {
            granted |= EngineFlags::THREADING_PARALLEL;
        } else {
            granted |= EngineFlags::THREADING_NONE;
        }

        granted & self.supported
    }
}

impl EngineFactory for CpuEngineFactory {
    type Engine = CpuEngine;

    fn resources(&self) -> Vec<ResourceDetails> {
        vec![ResourceDetails {
            number: CPU_RESOURCE,
            name: "CPU".to_string(),
            description: "Reference double-precision engine".to_string(),
            flags: self.supported,
        }]
    }

    fn create_instance(&self, spec: &InstanceSpec) -> Result<CpuEngine, ComputeError> {
        if spec.state_count < 2 {
            return Err(ComputeError::Instance(format!(
                "state count must be at least 2, got {}",
                spec.state_count
            )));
        }
        if spec.category_count == 0 || spec.partition_count == 0 || spec.pattern_count == 0 {
            return Err(ComputeError::Instance(
                "category, partition and pattern counts must be positive".to_string(),
            ));
        }
        if spec.tip_count > spec.partials_buffer_count {
            return Err(ComputeError::Instance(format!(
                "{} tips do not fit in {} partials buffers",
                spec.tip_count, spec.partials_buffer_count
            )));
        }

        if let Some(&resource) = spec.resources.first() {
            if resource != CPU_RESOURCE {
                info!("Resource {} is not available, falling back to the CPU", resource);
            }
        }

        let flags = self.grant_flags(spec);
        let details = InstanceDetails {
            resource_number: CPU_RESOURCE,
            implementation_name: "CPU-reference".to_string(),
            flags,
        };
        debug!(%details, "Created compute engine instance");
        Ok(CpuEngine::new(spec, details))
    }
}

/// Reference partial-likelihood engine.
///
/// Partials buffers are laid out as `[category][pattern][state]`, transition matrices as
/// `[category][from][to]`, and scale buffers hold one natural-log factor per pattern.
#[derive(Debug, Clone)]
pub struct CpuEngine {
    details: InstanceDetails,
    tip_count: usize,
    state_count: usize,
    pattern_count: usize,
    category_count: usize,
    partition_count: usize,
    tip_states: Vec<Option<Vec<usize>>>,
    partials: Vec<Option<Vec<f64>>>,
    auto_scales: Vec<Vec<f64>>,
    auto_cumulative: Vec<f64>,
    scale_buffers: Vec<Vec<f64>>,
    eigen: Vec<Option<EigenDecomposition>>,
    matrices: Vec<Option<Vec<f64>>>,
    category_rates: Vec<Option<Vec<f64>>>,
    category_weights: Vec<Option<Vec<f64>>>,
    state_frequencies: Vec<Option<Vec<f64>>>,
    pattern_weights: Vec<f64>,
    pattern_partitions: Vec<usize>,
    site_log_likelihoods: Vec<f64>,
}

enum Source<'a> {
    States(&'a [usize]),
    Partials(&'a [f64]),
}

fn check_index(kind: &'static str, index: usize, count: usize) -> Result<(), ComputeError> {
    if index < count {
        Ok(())
    } else {
        Err(ComputeError::BufferOutOfRange { kind, index, count })
    }
}

fn check_len(what: &'static str, expected: usize, found: usize) -> Result<(), ComputeError> {
    if expected == found {
        Ok(())
    } else {
        Err(ComputeError::LengthMismatch {
            what,
            expected,
            found,
        })
    }
}

impl CpuEngine {
    fn new(spec: &InstanceSpec, details: InstanceDetails) -> Self {
        let auto = details.flags.contains(EngineFlags::SCALING_AUTO);
        Self {
            tip_count: spec.tip_count,
            state_count: spec.state_count,
            pattern_count: spec.pattern_count,
            category_count: spec.category_count,
            partition_count: spec.partition_count,
            tip_states: vec![None; spec.tip_count],
            partials: vec![None; spec.partials_buffer_count],
            auto_scales: if auto {
                vec![vec![0.0; spec.pattern_count]; spec.partials_buffer_count]
            } else {
                Vec::new()
            },
            auto_cumulative: vec![0.0; spec.pattern_count],
            scale_buffers: vec![vec![0.0; spec.pattern_count]; spec.scale_buffer_count],
            eigen: vec![None; spec.eigen_buffer_count],
            matrices: vec![None; spec.matrix_buffer_count],
            category_rates: vec![None; spec.partition_count],
            category_weights: vec![None; spec.partition_count],
            state_frequencies: vec![None; spec.partition_count],
            pattern_weights: vec![1.0; spec.pattern_count],
            pattern_partitions: vec![0; spec.pattern_count],
            site_log_likelihoods: vec![0.0; spec.pattern_count],
            details,
        }
    }

    fn auto_scaling(&self) -> bool {
        self.details.flags.contains(EngineFlags::SCALING_AUTO)
    }

    fn partials_len(&self) -> usize {
        self.category_count * self.pattern_count * self.state_count
    }

    fn in_partition(&self, pattern: usize, partition: Option<usize>) -> bool {
        partition.is_none_or(|p| self.pattern_partitions[pattern] == p)
    }

    fn source(&self, buffer: usize) -> Result<Source<'_>, ComputeError> {
        if let Some(Some(states)) = self.tip_states.get(buffer) {
            return Ok(Source::States(states));
        }
        check_index("partials", buffer, self.partials.len())?;
        self.partials[buffer]
            .as_deref()
            .map(Source::Partials)
            .ok_or(ComputeError::Uninitialized("partials buffer"))
    }

    fn matrix(&self, index: usize) -> Result<&[f64], ComputeError> {
        check_index("matrix", index, self.matrices.len())?;
        self.matrices[index]
            .as_deref()
            .ok_or(ComputeError::Uninitialized("transition matrix"))
    }

    fn compute_into(
        &self,
        dest: &mut [f64],
        op: &Operation,
        partition: Option<usize>,
    ) -> Result<(), ComputeError> {
        let left = self.source(op.left_child)?;
        let right = self.source(op.right_child)?;
        let left_matrix = self.matrix(op.left_matrix)?;
        let right_matrix = self.matrix(op.right_matrix)?;

        let n = self.state_count;
        let pattern_count = self.pattern_count;
        let block = pattern_count * n;

        let fill = |(category, out): (usize, &mut [f64])| {
            let lm = &left_matrix[category * n * n..(category + 1) * n * n];
            let rm = &right_matrix[category * n * n..(category + 1) * n * n];
            for pattern in 0..pattern_count {
                if !self.in_partition(pattern, partition) {
                    continue;
                }
                for i in 0..n {
                    let l = propagate(&left, lm, category, pattern, i, n, pattern_count);
                    let r = propagate(&right, rm, category, pattern, i, n, pattern_count);
                    out[pattern * n + i] = l * r;
                }
            }
        };

        #[cfg(feature = "parallel")]
        dest.par_chunks_mut(block).enumerate().for_each(fill);
        #[cfg(not(feature = "parallel"))]
        dest.chunks_mut(block).enumerate().for_each(fill);

        Ok(())
    }

    fn pattern_max(&self, partials: &[f64], pattern: usize) -> f64 {
        let n = self.state_count;
        let block = self.pattern_count * n;
        (0..self.category_count)
            .flat_map(|c| partials[c * block + pattern * n..c * block + (pattern + 1) * n].iter())
            .fold(0.0_f64, |acc, &v| acc.max(v))
    }

    fn scale_pattern(&self, partials: &mut [f64], pattern: usize, factor: f64) {
        let n = self.state_count;
        let block = self.pattern_count * n;
        for c in 0..self.category_count {
            for v in &mut partials[c * block + pattern * n..c * block + (pattern + 1) * n] {
                *v /= factor;
            }
        }
    }

    /// Divides each pattern by its largest entry and returns the log factors.
    fn normalize(&self, partials: &mut [f64], partition: Option<usize>, log_factors: &mut [f64]) {
        for pattern in 0..self.pattern_count {
            if !self.in_partition(pattern, partition) {
                continue;
            }
            let max = self.pattern_max(partials, pattern);
            if max > 0.0 && max.is_finite() {
                self.scale_pattern(partials, pattern, max);
                log_factors[pattern] = max.ln();
            } else {
                log_factors[pattern] = 0.0;
            }
        }
    }

    fn apply_operation(
        &mut self,
        op: &Operation,
        partition: Option<usize>,
        cumulative_scale: Option<usize>,
    ) -> Result<(), ComputeError> {
        check_index("partials", op.destination, self.partials.len())?;
        if op.destination < self.tip_count {
            return Err(ComputeError::BufferOutOfRange {
                kind: "writable partials",
                index: op.destination,
                count: self.tip_count,
            });
        }
        for index in [op.scale_write, op.scale_read, cumulative_scale]
            .into_iter()
            .flatten()
        {
            check_index("scale", index, self.scale_buffers.len())?;
        }

        let len = self.partials_len();
        let mut dest = self.partials[op.destination]
            .take()
            .unwrap_or_else(|| vec![0.0; len]);
        let computed = self.compute_into(&mut dest, op, partition);
        if computed.is_ok() {
            if let Some(scale) = op.scale_write {
                let mut factors = std::mem::take(&mut self.scale_buffers[scale]);
                self.normalize(&mut dest, partition, &mut factors);
                if let Some(cumulative) = cumulative_scale {
                    for pattern in 0..self.pattern_count {
                        if self.in_partition(pattern, partition) {
                            self.scale_buffers[cumulative][pattern] += factors[pattern];
                        }
                    }
                }
                self.scale_buffers[scale] = factors;
            } else if let Some(scale) = op.scale_read {
                for pattern in 0..self.pattern_count {
                    if self.in_partition(pattern, partition) {
                        let factor = self.scale_buffers[scale][pattern].exp();
                        self.scale_pattern(&mut dest, pattern, factor);
                    }
                }
            } else if self.auto_scaling() {
                let mut factors = std::mem::take(&mut self.auto_scales[op.destination]);
                self.normalize(&mut dest, partition, &mut factors);
                self.auto_scales[op.destination] = factors;
            }
        }
        self.partials[op.destination] = Some(dest);
        computed
    }

    fn root_log_likelihood(
        &self,
        root: &RootRequest,
        partition: Option<usize>,
        site: &mut [f64],
    ) -> Result<f64, ComputeError> {
        let partials = match self.source(root.buffer)? {
            Source::Partials(p) => p,
            Source::States(_) => {
                return Err(ComputeError::BufferOutOfRange {
                    kind: "root partials",
                    index: root.buffer,
                    count: self.partials.len(),
                });
            }
        };
        check_index("category weights", root.category_weights_index, self.partition_count)?;
        check_index("state frequencies", root.state_frequencies_index, self.partition_count)?;
        let weights = self.category_weights[root.category_weights_index]
            .as_deref()
            .ok_or(ComputeError::Uninitialized("category weights"))?;
        let frequencies = self.state_frequencies[root.state_frequencies_index]
            .as_deref()
            .ok_or(ComputeError::Uninitialized("state frequencies"))?;
        let cumulative: Option<&[f64]> = match root.cumulative_scale {
            Some(index) => {
                check_index("scale", index, self.scale_buffers.len())?;
                Some(&self.scale_buffers[index])
            }
            None if self.auto_scaling() => Some(&self.auto_cumulative),
            None => None,
        };

        let n = self.state_count;
        let block = self.pattern_count * n;
        let mut total = 0.0;
        for pattern in 0..self.pattern_count {
            if !self.in_partition(pattern, partition) {
                continue;
            }
            let mut sum = 0.0;
            for (c, w) in weights.iter().enumerate() {
                let offset = c * block + pattern * n;
                let state_sum: f64 = frequencies
                    .iter()
                    .zip(&partials[offset..offset + n])
                    .map(|(pi, l)| pi * l)
                    .sum();
                sum += w * state_sum;
            }
            let log_l = sum.ln() + cumulative.map_or(0.0, |c| c[pattern]);
            site[pattern] = log_l;
            total += self.pattern_weights[pattern] * log_l;
        }
        Ok(total)
    }
}

fn propagate(
    source: &Source<'_>,
    matrix: &[f64],
    category: usize,
    pattern: usize,
    state: usize,
    n: usize,
    pattern_count: usize,
) -> f64 {
    let row = &matrix[state * n..(state + 1) * n];
    match source {
        Source::States(states) => {
            let observed = states[pattern];
            if observed < n { row[observed] } else { 1.0 }
        }
        Source::Partials(partials) => {
            let offset = (category * pattern_count + pattern) * n;
            row.iter()
                .zip(&partials[offset..offset + n])
                .map(|(p, l)| p * l)
                .sum()
        }
    }
}

impl ComputeEngine for CpuEngine {
    fn details(&self) -> &InstanceDetails {
        &self.details
    }

    fn set_tip_states(&mut self, tip: usize, states: &[usize]) -> Result<(), ComputeError> {
        check_index("tip", tip, self.tip_count)?;
        check_len("tip states", self.pattern_count, states.len())?;
        self.tip_states[tip] = Some(states.to_vec());
        Ok(())
    }

    fn set_tip_partials(&mut self, tip: usize, partials: &[f64]) -> Result<(), ComputeError> {
        check_index("tip", tip, self.tip_count)?;
        check_len(
            "tip partials",
            self.pattern_count * self.state_count,
            partials.len(),
        )?;
        let full: Vec<f64> = (0..self.category_count)
            .flat_map(|_| partials.iter().copied())
            .collect();
        self.tip_states[tip] = None;
        self.partials[tip] = Some(full);
        Ok(())
    }

    fn set_partials(&mut self, buffer: usize, partials: &[f64]) -> Result<(), ComputeError> {
        check_index("partials", buffer, self.partials.len())?;
        check_len("partials", self.partials_len(), partials.len())?;
        if let Some(slot) = self.tip_states.get_mut(buffer) {
            *slot = None;
        }
        self.partials[buffer] = Some(partials.to_vec());
        Ok(())
    }

    fn get_partials(
        &self,
        buffer: usize,
        scale: Option<usize>,
        out: &mut [f64],
    ) -> Result<(), ComputeError> {
        check_len("partials", self.partials_len(), out.len())?;
        let n = self.state_count;
        match self.source(buffer)? {
            Source::Partials(p) => out.copy_from_slice(p),
            Source::States(states) => {
                for (chunk_index, chunk) in out.chunks_mut(n).enumerate() {
                    let observed = states[chunk_index % self.pattern_count];
                    for (i, v) in chunk.iter_mut().enumerate() {
                        *v = if observed >= n || observed == i { 1.0 } else { 0.0 };
                    }
                }
            }
        }
        if let Some(index) = scale {
            check_index("scale", index, self.scale_buffers.len())?;
            for (chunk_index, chunk) in out.chunks_mut(n).enumerate() {
                let factor = self.scale_buffers[index][chunk_index % self.pattern_count].exp();
                chunk.iter_mut().for_each(|v| *v *= factor);
            }
        }
        Ok(())
    }

    fn set_pattern_weights(&mut self, weights: &[f64]) -> Result<(), ComputeError> {
        check_len("pattern weights", self.pattern_count, weights.len())?;
        self.pattern_weights = weights.to_vec();
        Ok(())
    }

    fn set_pattern_partitions(
        &mut self,
        partition_count: usize,
        assignments: &[usize],
    ) -> Result<(), ComputeError> {
        check_len("pattern partitions", self.pattern_count, assignments.len())?;
        if partition_count > self.partition_count {
            return Err(ComputeError::BufferOutOfRange {
                kind: "partition",
                index: partition_count - 1,
                count: self.partition_count,
            });
        }
        for &partition in assignments {
            check_index("partition", partition, partition_count)?;
        }
        self.pattern_partitions = assignments.to_vec();
        Ok(())
    }

    fn set_state_frequencies(&mut self, index: usize, frequencies: &[f64]) -> Result<(), ComputeError> {
        check_index("state frequencies", index, self.partition_count)?;
        check_len("state frequencies", self.state_count, frequencies.len())?;
        self.state_frequencies[index] = Some(frequencies.to_vec());
        Ok(())
    }

    fn set_category_weights(&mut self, index: usize, weights: &[f64]) -> Result<(), ComputeError> {
        check_index("category weights", index, self.partition_count)?;
        check_len("category weights", self.category_count, weights.len())?;
        self.category_weights[index] = Some(weights.to_vec());
        Ok(())
    }

    fn set_category_rates(&mut self, index: usize, rates: &[f64]) -> Result<(), ComputeError> {
        check_index("category rates", index, self.partition_count)?;
        check_len("category rates", self.category_count, rates.len())?;
        self.category_rates[index] = Some(rates.to_vec());
        Ok(())
    }

    fn set_eigen_decomposition(
        &mut self,
        index: usize,
        decomposition: &EigenDecomposition,
    ) -> Result<(), ComputeError> {
        check_index("eigen", index, self.eigen.len())?;
        check_len(
            "eigenvalues",
            self.state_count,
            decomposition.state_count(),
        )?;
        self.eigen[index] = Some(decomposition.clone());
        Ok(())
    }

    fn update_transition_matrices(
        &mut self,
        eigen_index: usize,
        category_rates_index: usize,
        matrix_indices: &[usize],
        lengths: &[f64],
    ) -> Result<(), ComputeError> {
        check_len("branch lengths", matrix_indices.len(), lengths.len())?;
        check_index("eigen", eigen_index, self.eigen.len())?;
        check_index("category rates", category_rates_index, self.partition_count)?;
        let eigen = self.eigen[eigen_index]
            .as_ref()
            .ok_or(ComputeError::Uninitialized("eigen decomposition"))?;
        let rates = self.category_rates[category_rates_index]
            .as_deref()
            .ok_or(ComputeError::Uninitialized("category rates"))?;

        let n = self.state_count;
        for (&index, &length) in matrix_indices.iter().zip(lengths) {
            check_index("matrix", index, self.matrices.len())?;
            let mut values = Vec::with_capacity(rates.len() * n * n);
            for &rate in rates {
                let p = eigen.transition_matrix(rate * length);
                for i in 0..n {
                    for j in 0..n {
                        values.push(p[(i, j)]);
                    }
                }
            }
            self.matrices[index] = Some(values);
        }
        Ok(())
    }

    fn update_partials(
        &mut self,
        operations: &[Operation],
        cumulative_scale: Option<usize>,
    ) -> Result<(), ComputeError> {
        for op in operations {
            self.apply_operation(op, None, cumulative_scale)?;
        }
        Ok(())
    }

    fn update_partials_by_partition(
        &mut self,
        operations: &[PartitionOperation],
    ) -> Result<(), ComputeError> {
        for op in operations {
            check_index("partition", op.partition, self.partition_count)?;
            self.apply_operation(&op.operation, Some(op.partition), None)?;
        }
        Ok(())
    }

    fn reset_scale_factors(&mut self, index: usize) -> Result<(), ComputeError> {
        check_index("scale", index, self.scale_buffers.len())?;
        self.scale_buffers[index].fill(0.0);
        Ok(())
    }

    fn accumulate_scale_factors(
        &mut self,
        sources: &[usize],
        destination: Option<usize>,
    ) -> Result<(), ComputeError> {
        match destination {
            Some(dest) => {
                check_index("scale", dest, self.scale_buffers.len())?;
                let mut total = std::mem::take(&mut self.scale_buffers[dest]);
                let result = sources.iter().try_for_each(|&source| {
                    check_index("scale", source, self.scale_buffers.len())?;
                    for (t, s) in total.iter_mut().zip(&self.scale_buffers[source]) {
                        *t += s;
                    }
                    Ok(())
                });
                self.scale_buffers[dest] = total;
                result
            }
            None => {
                if !self.auto_scaling() {
                    return Ok(());
                }
                let mut total = vec![0.0; self.pattern_count];
                for &source in sources {
                    check_index("partials", source, self.auto_scales.len())?;
                    for (t, s) in total.iter_mut().zip(&self.auto_scales[source]) {
                        *t += s;
                    }
                }
                self.auto_cumulative = total;
                Ok(())
            }
        }
    }

    fn calculate_root_log_likelihoods(&mut self, roots: &[RootRequest]) -> Result<f64, ComputeError> {
        let mut site = vec![0.0; self.pattern_count];
        let mut total = 0.0;
        let mut per_root = vec![0.0; self.pattern_count];
        for root in roots {
            total += self.root_log_likelihood(root, None, &mut per_root)?;
            for (s, r) in site.iter_mut().zip(&per_root) {
                *s += r;
            }
        }
        self.site_log_likelihoods = site;
        Ok(total)
    }

    fn calculate_root_log_likelihoods_by_partition(
        &mut self,
        roots: &[RootRequest],
    ) -> Result<Vec<f64>, ComputeError> {
        let mut site = vec![0.0; self.pattern_count];
        let totals = roots
            .iter()
            .map(|root| {
                check_index("partition", root.partition, self.partition_count)?;
                self.root_log_likelihood(root, Some(root.partition), &mut site)
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.site_log_likelihoods = site;
        Ok(totals)
    }

    fn site_log_likelihoods(&self, out: &mut [f64]) -> Result<(), ComputeError> {
        check_len("site log-likelihoods", self.pattern_count, out.len())?;
        out.copy_from_slice(&self.site_log_likelihoods);
        Ok(())
    }
}
