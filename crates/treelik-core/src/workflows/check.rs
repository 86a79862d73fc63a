use super::likelihood::TreeDataLikelihood;
use crate::engine::delegate::DataLikelihoodDelegate;
use crate::engine::error::EngineError;
use crate::engine::progress::{CycleOutcome, Progress, ProgressReporter};
use crate::engine::state::EvaluationStats;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct CheckConfig {
    pub cycles: u64,
    pub seed: u64,
    /// Branch lengths are multiplied by a factor in `[1/window, window]`.
    pub window: f64,
    pub accept_probability: f64,
    pub tolerance: f64,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            cycles: 100,
            seed: 1,
            window: 2.0,
            accept_probability: 0.5,
            tolerance: 1e-8,
        }
    }
}

/// A restored state whose log-likelihood differed from the stored one.
#[derive(Debug, Clone, PartialEq)]
pub struct Deviation {
    pub cycle: u64,
    pub stored: f64,
    pub restored: f64,
}

#[derive(Debug, Clone)]
pub struct CheckReport {
    pub initial_log_likelihood: f64,
    pub final_log_likelihood: f64,
    /// The final state evaluated again from scratch.
    pub full_log_likelihood: f64,
    pub accepted: u64,
    pub rejected: u64,
    pub deviations: Vec<Deviation>,
    pub stats: EvaluationStats,
}

impl CheckReport {
    pub fn passed(&self, tolerance: f64) -> bool {
        self.deviations.is_empty() && within(self.final_log_likelihood, self.full_log_likelihood, tolerance)
    }
}

fn within(a: f64, b: f64, tolerance: f64) -> bool {
    a == b || (a - b).abs() <= tolerance
}

/// Runs random store/propose/evaluate cycles and verifies every rejection.
///
/// Each cycle scales one branch length. A rejected proposal is restored and the
/// restored branch is then re-evaluated through the delegate, which must reproduce the
/// stored log-likelihood from the restored buffers. At the end the incremental result
/// is compared with a full recomputation.
#[instrument(skip_all, name = "check_workflow")]
pub fn run<D: DataLikelihoodDelegate>(
    likelihood: &mut TreeDataLikelihood<D>,
    config: &CheckConfig,
    reporter: &ProgressReporter,
) -> Result<CheckReport, EngineError> {
    reporter.report(Progress::PhaseStart {
        name: "Store/Restore Check",
    });
    let mut rng = StdRng::seed_from_u64(config.seed);
    let initial_log_likelihood = likelihood.log_likelihood()?;
    info!(log_likelihood = initial_log_likelihood, "Initial state evaluated.");

    let branches: Vec<usize> = (0..likelihood.tree().node_count())
        .filter(|&node| node != likelihood.tree().root())
        .collect();
    if branches.is_empty() && config.cycles > 0 {
        return Err(EngineError::IncompatibleData(
            "the tree has no branches to perturb".to_string(),
        ));
    }
    let log_window = config.window.max(1.0).ln();

    let mut accepted = 0;
    let mut rejected = 0;
    let mut deviations = Vec::new();

    reporter.report(Progress::CyclesStart {
        total: config.cycles,
    });
    for cycle in 0..config.cycles {
        let stored = likelihood.log_likelihood()?;
        likelihood.store_state();

        let branch = branches[rng.gen_range(0..branches.len())];
        let original = likelihood.tree().branch_length(branch);
        let factor = (rng.gen_range(-1.0f64..=1.0) * log_window).exp();
        likelihood.set_branch_length(branch, original * factor)?;
        let proposed = likelihood.log_likelihood()?;

        let accept = proposed.is_finite() && rng.gen_bool(config.accept_probability);
        debug!(cycle, branch, proposed, accept, "Proposal evaluated.");
        let outcome = if accept {
            likelihood.accept_state();
            accepted += 1;
            CycleOutcome::Accepted
        } else {
            likelihood.restore_state();
            likelihood.set_branch_length(branch, original)?;
            let restored = likelihood.log_likelihood()?;
            rejected += 1;
            if within(restored, stored, config.tolerance) {
                CycleOutcome::Restored
            } else {
                warn!(cycle, stored, restored, "Restored state does not reproduce the stored likelihood.");
                deviations.push(Deviation {
                    cycle,
                    stored,
                    restored,
                });
                CycleOutcome::Deviated
            }
        };
        reporter.report(Progress::CycleFinished(outcome));
    }
    reporter.report(Progress::CyclesFinish);

    let final_log_likelihood = likelihood.log_likelihood()?;
    likelihood.make_dirty();
    let full_log_likelihood = likelihood.log_likelihood()?;
    if !within(final_log_likelihood, full_log_likelihood, config.tolerance) {
        warn!(
            final_log_likelihood,
            full_log_likelihood, "Incremental likelihood differs from a full recomputation."
        );
    }

    let stats = likelihood.delegate().evaluation_stats();
    info!(accepted, rejected, deviations = deviations.len(), "Check complete ({stats}).");
    reporter.report(Progress::PhaseFinish);

    Ok(CheckReport {
        initial_log_likelihood,
        final_log_likelihood,
        full_log_likelihood,
        accepted,
        rejected,
        deviations,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::newick::parse_newick;
    use crate::core::models::alignment::Alignment;
    use crate::core::models::data_type::DataType;
    use crate::core::models::patterns::{PatternSource, SitePatterns};
    use crate::core::substitution::branch_model::BranchModel;
    use crate::core::substitution::models::Hky;
    use crate::core::substitution::site_rates::DiscreteRates;
    use crate::engine::compute::cpu::CpuEngineFactory;
    use crate::engine::config::LikelihoodConfig;
    use crate::engine::delegate::SinglePartitionDelegate;
    use crate::engine::multi_partition::{MultiPartitionDelegate, PartitionData};
    use crate::engine::rescaling::RescalingScheme;
    use std::sync::Mutex;

    const TREE: &str = "(((A:0.1,B:0.2):0.05,C:0.3):0.1,(D:0.2,E:0.4):0.2);";

    fn patterns(columns: &[&str; 5]) -> PatternSource {
        let mut alignment = Alignment::new(DataType::Nucleotide);
        for (taxon, sequence) in ["A", "B", "C", "D", "E"].iter().zip(columns) {
            alignment.add_sequence(taxon, sequence).unwrap();
        }
        SitePatterns::from_alignment(&alignment).into()
    }

    fn first_block() -> PatternSource {
        patterns(&["ACGTACGTTA", "ACGTACGTTC", "ACCTACGATA", "TCGTAGGATA", "TCGAAGGATC"])
    }

    fn hky() -> BranchModel {
        BranchModel::homogeneous(Box::new(Hky::new(4.0, &[0.25, 0.3, 0.2, 0.25]).unwrap()))
    }

    fn config(scheme: RescalingScheme) -> LikelihoodConfig {
        LikelihoodConfig::builder()
            .rescaling_scheme(scheme)
            .delay_rescaling_until_underflow(false)
            .build()
            .unwrap()
    }

    #[test]
    fn single_partition_passes_under_every_scheme() {
        for scheme in [
            RescalingScheme::None,
            RescalingScheme::Always,
            RescalingScheme::Dynamic,
            RescalingScheme::Auto,
        ] {
            let tree = parse_newick(TREE).unwrap();
            let delegate = SinglePartitionDelegate::new(
                &CpuEngineFactory::new(),
                &tree,
                first_block(),
                hky(),
                Box::new(DiscreteRates::equal_weights(vec![0.3, 1.0, 1.7]).unwrap()),
                &config(scheme),
            )
            .unwrap();
            let mut likelihood = TreeDataLikelihood::new(tree, delegate);
            let check = CheckConfig {
                cycles: 40,
                ..CheckConfig::default()
            };
            let report = run(&mut likelihood, &check, &ProgressReporter::new()).unwrap();
            assert!(report.passed(check.tolerance), "{scheme}: {report:?}");
            assert_eq!(report.accepted + report.rejected, 40);
            assert!(report.rejected > 0);
        }
    }

    #[test]
    fn multi_partition_passes() {
        let tree = parse_newick(TREE).unwrap();
        let data = vec![
            PartitionData {
                patterns: first_block(),
                branch_model: hky(),
                site_model: Box::new(DiscreteRates::equal_weights(vec![0.5, 1.5]).unwrap()),
            },
            PartitionData {
                patterns: patterns(&["GGAT", "GGTT", "GCAT", "CGAT", "CGAA"]),
                branch_model: hky(),
                site_model: Box::new(DiscreteRates::equal_weights(vec![0.2, 1.8]).unwrap()),
            },
        ];
        let delegate = MultiPartitionDelegate::new(
            &CpuEngineFactory::new(),
            &tree,
            data,
            &config(RescalingScheme::Dynamic),
        )
        .unwrap();
        let mut likelihood = TreeDataLikelihood::new(tree, delegate);
        let check = CheckConfig {
            cycles: 30,
            seed: 7,
            ..CheckConfig::default()
        };
        let report = run(&mut likelihood, &check, &ProgressReporter::new()).unwrap();
        assert!(report.passed(check.tolerance), "{report:?}");
    }

    #[test]
    fn progress_events_bracket_every_cycle() {
        let tree = parse_newick(TREE).unwrap();
        let delegate = SinglePartitionDelegate::new(
            &CpuEngineFactory::new(),
            &tree,
            first_block(),
            hky(),
            Box::new(DiscreteRates::equal_weights(vec![1.0]).unwrap()),
            &config(RescalingScheme::None),
        )
        .unwrap();
        let mut likelihood = TreeDataLikelihood::new(tree, delegate);

        let events = Mutex::new(Vec::new());
        let reporter = ProgressReporter::with_callback(Box::new(|event| {
            events.lock().unwrap().push(event);
        }));
        let check = CheckConfig {
            cycles: 5,
            ..CheckConfig::default()
        };
        run(&mut likelihood, &check, &reporter).unwrap();
        drop(reporter);

        let events = events.into_inner().unwrap();
        assert_eq!(events.first(), Some(&Progress::PhaseStart { name: "Store/Restore Check" }));
        assert_eq!(events[1], Progress::CyclesStart { total: 5 });
        let finished = events
            .iter()
            .filter(|e| matches!(e, Progress::CycleFinished(_)))
            .count();
        assert_eq!(finished, 5);
        assert_eq!(events.last(), Some(&Progress::PhaseFinish));
    }

    #[test]
    fn single_tip_tree_is_rejected_instead_of_panicking() {
        let tree = parse_newick("A:0.1;").unwrap();
        let mut alignment = Alignment::new(DataType::Nucleotide);
        alignment.add_sequence("A", "ACGTR").unwrap();
        let config = LikelihoodConfig::builder()
            .rescaling_scheme(RescalingScheme::None)
            .use_ambiguities(true)
            .build()
            .unwrap();
        let delegate = SinglePartitionDelegate::new(
            &CpuEngineFactory::new(),
            &tree,
            SitePatterns::from_alignment(&alignment).into(),
            hky(),
            Box::new(DiscreteRates::equal_weights(vec![1.0]).unwrap()),
            &config,
        )
        .unwrap();
        let mut likelihood = TreeDataLikelihood::new(tree, delegate);

        let result = run(&mut likelihood, &CheckConfig::default(), &ProgressReporter::new());
        assert!(matches!(result, Err(EngineError::IncompatibleData(_))));
    }

    #[test]
    fn same_seed_gives_the_same_walk() {
        let build = || {
            let tree = parse_newick(TREE).unwrap();
            let delegate = SinglePartitionDelegate::new(
                &CpuEngineFactory::new(),
                &tree,
                first_block(),
                hky(),
                Box::new(DiscreteRates::equal_weights(vec![1.0]).unwrap()),
                &config(RescalingScheme::Always),
            )
            .unwrap();
            TreeDataLikelihood::new(tree, delegate)
        };
        let check = CheckConfig {
            cycles: 20,
            seed: 42,
            ..CheckConfig::default()
        };
        let a = run(&mut build(), &check, &ProgressReporter::new()).unwrap();
        let b = run(&mut build(), &check, &ProgressReporter::new()).unwrap();
        assert_eq!(a.accepted, b.accepted);
        assert_eq!(a.final_log_likelihood, b.final_log_likelihood);
    }
}
