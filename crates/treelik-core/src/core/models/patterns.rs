use super::alignment::Alignment;
use super::data_type::DataType;
use std::collections::HashMap;

/// Unique alignment columns with the number of sites that share each one.
#[derive(Debug, Clone, PartialEq)]
pub struct SitePatterns {
    data_type: DataType,
    taxa: Vec<String>,
    // [pattern][taxon]
    patterns: Vec<Vec<usize>>,
    weights: Vec<f64>,
    site_patterns: Vec<usize>,
}

impl SitePatterns {
    pub fn from_alignment(alignment: &Alignment) -> Self {
        let taxon_count = alignment.taxon_count();
        let mut lookup: HashMap<Vec<usize>, usize> = HashMap::new();
        let mut patterns = Vec::new();
        let mut weights: Vec<f64> = Vec::new();
        let mut site_patterns = Vec::with_capacity(alignment.site_count());

        for site in 0..alignment.site_count() {
            let column: Vec<usize> = (0..taxon_count)
                .map(|taxon| alignment.state(taxon, site))
                .collect();
            let index = match lookup.get(&column) {
                Some(&index) => {
                    weights[index] += 1.0;
                    index
                }
                None => {
                    let index = patterns.len();
                    lookup.insert(column.clone(), index);
                    patterns.push(column);
                    weights.push(1.0);
                    index
                }
            };
            site_patterns.push(index);
        }

        Self {
            data_type: alignment.data_type(),
            taxa: alignment.taxa().to_vec(),
            patterns,
            weights,
            site_patterns,
        }
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn taxa(&self) -> &[String] {
        &self.taxa
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn state(&self, taxon: usize, pattern: usize) -> usize {
        self.patterns[pattern][taxon]
    }

    /// Pattern index of every original site, in site order.
    pub fn site_patterns(&self) -> &[usize] {
        &self.site_patterns
    }

    pub fn has_ambiguity(&self) -> bool {
        let state_count = self.data_type.state_count();
        let unknown = self.data_type.unknown_code();
        self.patterns
            .iter()
            .flatten()
            .any(|&code| code >= state_count && code != unknown)
    }
}

/// Patterns whose tip observations are probability vectors rather than single states.
#[derive(Debug, Clone, PartialEq)]
pub struct UncertainPatterns {
    data_type: DataType,
    taxa: Vec<String>,
    // [taxon][pattern * state_count + state]
    partials: Vec<Vec<f64>>,
    weights: Vec<f64>,
}

impl UncertainPatterns {
    pub fn new(
        data_type: DataType,
        taxa: Vec<String>,
        partials: Vec<Vec<f64>>,
        weights: Vec<f64>,
    ) -> Self {
        Self {
            data_type,
            taxa,
            partials,
            weights,
        }
    }

    /// Expands ambiguity codes of exact patterns into indicator vectors.
    pub fn from_site_patterns(patterns: &SitePatterns) -> Self {
        let data_type = patterns.data_type();
        let state_count = data_type.state_count();
        let partials = (0..patterns.taxa().len())
            .map(|taxon| {
                let mut row = Vec::with_capacity(patterns.pattern_count() * state_count);
                for pattern in 0..patterns.pattern_count() {
                    let set = data_type.state_set(patterns.state(taxon, pattern));
                    row.extend(set.into_iter().map(|on| if on { 1.0 } else { 0.0 }));
                }
                row
            })
            .collect();
        Self {
            data_type,
            taxa: patterns.taxa().to_vec(),
            partials,
            weights: patterns.weights().to_vec(),
        }
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn taxa(&self) -> &[String] {
        &self.taxa
    }

    pub fn pattern_count(&self) -> usize {
        self.weights.len()
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn fill_partials(&self, taxon: usize, pattern: usize, out: &mut [f64]) {
        let n = self.data_type.state_count();
        out[..n].copy_from_slice(&self.partials[taxon][pattern * n..(pattern + 1) * n]);
    }

    pub fn taxon_partials(&self, taxon: usize) -> &[f64] {
        &self.partials[taxon]
    }
}

/// Tip data as handed to the likelihood engine: exact states or per-state partials.
#[derive(Debug, Clone, PartialEq)]
pub enum PatternSource {
    Exact(SitePatterns),
    Uncertain(UncertainPatterns),
}

impl PatternSource {
    pub fn data_type(&self) -> DataType {
        match self {
            PatternSource::Exact(p) => p.data_type(),
            PatternSource::Uncertain(p) => p.data_type(),
        }
    }

    pub fn taxa(&self) -> &[String] {
        match self {
            PatternSource::Exact(p) => p.taxa(),
            PatternSource::Uncertain(p) => p.taxa(),
        }
    }

    pub fn taxon_index(&self, taxon: &str) -> Option<usize> {
        self.taxa().iter().position(|t| t == taxon)
    }

    pub fn pattern_count(&self) -> usize {
        match self {
            PatternSource::Exact(p) => p.pattern_count(),
            PatternSource::Uncertain(p) => p.pattern_count(),
        }
    }

    pub fn weights(&self) -> &[f64] {
        match self {
            PatternSource::Exact(p) => p.weights(),
            PatternSource::Uncertain(p) => p.weights(),
        }
    }

    /// Converts exact patterns carrying partial ambiguity codes into uncertain patterns.
    pub fn with_ambiguities(self) -> Self {
        match self {
            PatternSource::Exact(p) if p.has_ambiguity() => {
                PatternSource::Uncertain(UncertainPatterns::from_site_patterns(&p))
            }
            other => other,
        }
    }
}

impl From<SitePatterns> for PatternSource {
    fn from(patterns: SitePatterns) -> Self {
        PatternSource::Exact(patterns)
    }
}

impl From<UncertainPatterns> for PatternSource {
    fn from(patterns: UncertainPatterns) -> Self {
        PatternSource::Uncertain(patterns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alignment() -> Alignment {
        let mut aln = Alignment::new(DataType::Nucleotide);
        aln.add_sequence("A", "AACGA").unwrap();
        aln.add_sequence("B", "AACRA").unwrap();
        aln
    }

    #[test]
    fn from_alignment_compresses_identical_columns() {
        let patterns = SitePatterns::from_alignment(&alignment());
        assert_eq!(patterns.pattern_count(), 3);
        assert_eq!(patterns.weights(), &[3.0, 1.0, 1.0]);
        assert_eq!(patterns.site_patterns(), &[0, 0, 1, 2, 0]);
        assert_eq!(patterns.state(1, 2), 4);
    }

    #[test]
    fn has_ambiguity_ignores_plain_gaps() {
        let patterns = SitePatterns::from_alignment(&alignment());
        assert!(patterns.has_ambiguity());

        let mut aln = Alignment::new(DataType::Nucleotide);
        aln.add_sequence("A", "A-").unwrap();
        aln.add_sequence("B", "AC").unwrap();
        assert!(!SitePatterns::from_alignment(&aln).has_ambiguity());
    }

    #[test]
    fn uncertain_patterns_expand_ambiguity_codes() {
        let patterns = SitePatterns::from_alignment(&alignment());
        let uncertain = UncertainPatterns::from_site_patterns(&patterns);
        let mut out = [0.0; 4];
        uncertain.fill_partials(1, 2, &mut out);
        assert_eq!(out, [1.0, 0.0, 1.0, 0.0]);
        uncertain.fill_partials(0, 0, &mut out);
        assert_eq!(out, [1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn with_ambiguities_only_converts_when_needed() {
        let source = PatternSource::from(SitePatterns::from_alignment(&alignment()));
        assert!(matches!(source.with_ambiguities(), PatternSource::Uncertain(_)));

        let mut aln = Alignment::new(DataType::Nucleotide);
        aln.add_sequence("A", "AC").unwrap();
        aln.add_sequence("B", "AC").unwrap();
        let exact = PatternSource::from(SitePatterns::from_alignment(&aln));
        assert!(matches!(exact.with_ambiguities(), PatternSource::Exact(_)));
    }
}
