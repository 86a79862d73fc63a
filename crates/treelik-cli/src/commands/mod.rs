pub mod check;
pub mod evaluate;

use crate::config::models::AppConfig;
use crate::error::{CliError, Result};
use tracing::info;
use treelik::core::io::fasta::FastaReader;
use treelik::core::io::newick::NewickFile;
use treelik::core::io::traits::TreeFile;
use treelik::core::models::patterns::{PatternSource, SitePatterns};
use treelik::core::substitution::branch_model::BranchModel;
use treelik::engine::compute::cpu::CpuEngineFactory;
use treelik::engine::delegate::{DataLikelihoodDelegate, SinglePartitionDelegate};
use treelik::engine::multi_partition::{MultiPartitionDelegate, PartitionData};
use treelik::workflows::likelihood::TreeDataLikelihood;

pub type Likelihood = TreeDataLikelihood<Box<dyn DataLikelihoodDelegate>>;

/// Reads the tree and every alignment and wires them to a CPU engine.
///
/// One alignment gives a single-partition delegate; several share one engine instance.
pub fn load_likelihood(config: &AppConfig) -> Result<Likelihood> {
    info!("Loading tree from {:?}", &config.tree_path);
    let tree = NewickFile::read_from_path(&config.tree_path).map_err(|e| CliError::FileParsing {
        path: config.tree_path.clone(),
        source: e.into(),
    })?;

    let reader = FastaReader::new(config.data_type);
    let mut partitions = Vec::with_capacity(config.alignment_paths.len());
    for path in &config.alignment_paths {
        info!("Loading alignment from {:?}", path);
        let alignment = reader.read_from_path(path).map_err(|e| CliError::FileParsing {
            path: path.clone(),
            source: e.into(),
        })?;
        let patterns: PatternSource = SitePatterns::from_alignment(&alignment).into();
        let model = config
            .model
            .build(config.data_type)
            .map_err(|e| CliError::Config(e.to_string()))?;
        let site_model = config
            .site_rates
            .build()
            .map_err(|e| CliError::Config(e.to_string()))?;
        partitions.push(PartitionData {
            patterns,
            branch_model: BranchModel::homogeneous(model),
            site_model,
        });
    }

    let factory = CpuEngineFactory::new();
    let delegate: Box<dyn DataLikelihoodDelegate> = if partitions.len() == 1 {
        let Some(partition) = partitions.pop() else {
            return Err(CliError::Argument("No alignment given".to_string()));
        };
        Box::new(SinglePartitionDelegate::new(
            &factory,
            &tree,
            partition.patterns,
            partition.branch_model,
            partition.site_model,
            &config.likelihood,
        )?)
    } else {
        Box::new(MultiPartitionDelegate::new(
            &factory,
            &tree,
            partitions,
            &config.likelihood,
        )?)
    };

    Ok(TreeDataLikelihood::new(tree, delegate))
}
