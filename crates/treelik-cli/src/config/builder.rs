use super::defaults::DefaultsConfig;
use super::file::{FileConfig, FileEngineConfig, FileModelConfig};
use super::models::{AppConfig, ModelSpec, SiteRatesSpec};
use crate::cli::InputArgs;
use crate::error::{CliError, Result};
use std::str::FromStr;
use treelik::core::models::data_type::DataType;
use treelik::engine::compute::EngineFlags;
use treelik::engine::config::LikelihoodConfig;
use treelik::engine::rescaling::RescalingScheme;
use treelik::workflows::check::CheckConfig;

pub fn build_config(args: &InputArgs) -> Result<AppConfig> {
    let defaults = DefaultsConfig::default();

    let file_config = if let Some(config_path) = &args.config {
        FileConfig::from_file(config_path)?
    } else {
        FileConfig::default()
    };

    let mut file_config = apply_set_values(file_config, &args.set_values)?;

    let data_file = file_config.data.take().unwrap_or_default();
    let data_type_name = args
        .data_type
        .as_deref()
        .or(data_file.data_type.as_deref())
        .unwrap_or(&defaults.data_type);
    let data_type: DataType = parse_value("data.data-type", data_type_name)?;
    let use_ambiguities = args.use_ambiguities || data_file.use_ambiguities.unwrap_or(false);

    let model_file = file_config.model.take().unwrap_or_default();
    let model = merge_model(args, model_file, data_type, &defaults)?;

    let rates_file = file_config.site_rates.take().unwrap_or_default();
    let site_rates = SiteRatesSpec {
        rates: rates_file.rates.unwrap_or_default(),
        proportions: rates_file.proportions,
    };

    let engine_file = file_config.engine.take().unwrap_or_default();
    let likelihood = merge_engine(args, engine_file, use_ambiguities, &defaults)?;

    let check_file = file_config.check.take().unwrap_or_default();
    let check = CheckConfig {
        cycles: check_file.cycles.unwrap_or(defaults.cycles),
        seed: check_file.seed.unwrap_or(defaults.seed),
        window: check_file.window.unwrap_or(defaults.window),
        accept_probability: check_file
            .accept_probability
            .unwrap_or(defaults.accept_probability),
        tolerance: check_file.tolerance.unwrap_or(defaults.tolerance),
    };
    if !(0.0..=1.0).contains(&check.accept_probability) {
        return Err(CliError::Config(format!(
            "`check.accept-probability` must lie in [0, 1], got {}",
            check.accept_probability
        )));
    }

    Ok(AppConfig {
        tree_path: args.tree.clone(),
        alignment_paths: args.alignments.clone(),
        data_type,
        model,
        site_rates,
        likelihood,
        check,
    })
}

fn merge_model(
    args: &InputArgs,
    file: FileModelConfig,
    data_type: DataType,
    defaults: &DefaultsConfig,
) -> Result<ModelSpec> {
    let name = args
        .model
        .as_deref()
        .or(file.kind.as_deref())
        .unwrap_or(&defaults.model)
        .to_ascii_lowercase();
    let states = data_type.state_count();
    let frequencies = file
        .frequencies
        .unwrap_or_else(|| vec![1.0 / states as f64; states]);

    match name.as_str() {
        "jc" | "jc69" | "jukes-cantor" => Ok(ModelSpec::JukesCantor),
        "hky" | "hky85" => Ok(ModelSpec::Hky {
            kappa: args.kappa.or(file.kappa).unwrap_or(defaults.kappa),
            frequencies,
        }),
        "gtr" => {
            let rates = file.rates.unwrap_or_else(|| vec![1.0; 6]);
            let rates: [f64; 6] = rates.as_slice().try_into().map_err(|_| {
                CliError::Config(format!(
                    "`model.rates` needs 6 exchangeabilities, got {}",
                    rates.len()
                ))
            })?;
            Ok(ModelSpec::Gtr { rates, frequencies })
        }
        other => Err(CliError::Config(format!(
            "Unknown substitution model '{}'. Expected one of: jc, hky, gtr.",
            other
        ))),
    }
}

fn merge_engine(
    args: &InputArgs,
    file: FileEngineConfig,
    use_ambiguities: bool,
    defaults: &DefaultsConfig,
) -> Result<LikelihoodConfig> {
    let scheme_name = args
        .rescaling
        .as_deref()
        .or(file.rescaling_scheme.as_deref())
        .unwrap_or(&defaults.rescaling_scheme);
    let scheme: RescalingScheme = parse_value("engine.rescaling-scheme", scheme_name)?;
    let delay = if args.no_delay {
        false
    } else {
        file.delay_rescaling.unwrap_or(defaults.delay_rescaling)
    };

    let mut builder = LikelihoodConfig::builder()
        .rescaling_scheme(scheme)
        .rescaling_frequency(
            file.rescaling_frequency
                .unwrap_or(defaults.rescaling_frequency),
        )
        .delay_rescaling_until_underflow(delay)
        .use_ambiguities(use_ambiguities)
        .force_vectorization(file.force_vectorization.unwrap_or(false));

    if let Some(order) = file.resource_order {
        builder = builder.resource_order(order);
    }
    if let Some(entries) = file.preferred_flags {
        builder = builder.preferred_flags(parse_flag_entries(&entries)?);
    }
    if let Some(entries) = file.required_flags {
        builder = builder.required_flags(parse_flag_entries(&entries)?);
    }

    builder.build().map_err(|e| CliError::Config(e.to_string()))
}

fn parse_flag_entries(entries: &[String]) -> Result<Vec<EngineFlags>> {
    entries
        .iter()
        .map(|entry| {
            entry
                .split('|')
                .filter(|name| !name.trim().is_empty())
                .try_fold(EngineFlags::NONE, |flags, name| {
                    EngineFlags::from_name(name)
                        .map(|flag| flags | flag)
                        .ok_or_else(|| CliError::Config(format!("Unknown engine flag '{}'", name.trim())))
                })
        })
        .collect()
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| CliError::Config(format!("Invalid value for {}: {}", key, value)))
}

fn apply_set_values(mut config: FileConfig, set_values: &[String]) -> Result<FileConfig> {
    for kv_pair in set_values {
        let (key, value) = kv_pair.split_once('=').ok_or_else(|| {
            CliError::Config(format!(
                "Invalid --set format: '{}'. Expected KEY=VALUE.",
                kv_pair
            ))
        })?;
        let key = key.trim();
        let value = value.trim();

        match key {
            "data.data-type" => {
                config.data.get_or_insert_with(Default::default).data_type = Some(value.to_string());
            }
            "data.use-ambiguities" => {
                config.data.get_or_insert_with(Default::default).use_ambiguities =
                    Some(parse_value(key, value)?);
            }
            "model.type" => {
                config.model.get_or_insert_with(Default::default).kind = Some(value.to_string());
            }
            "model.kappa" => {
                config.model.get_or_insert_with(Default::default).kappa = Some(parse_value(key, value)?);
            }
            "engine.rescaling-scheme" => {
                config.engine.get_or_insert_with(Default::default).rescaling_scheme =
                    Some(value.to_string());
            }
            "engine.rescaling-frequency" => {
                config.engine.get_or_insert_with(Default::default).rescaling_frequency =
                    Some(parse_value(key, value)?);
            }
            "engine.delay-rescaling" => {
                config.engine.get_or_insert_with(Default::default).delay_rescaling =
                    Some(parse_value(key, value)?);
            }
            "check.cycles" => {
                config.check.get_or_insert_with(Default::default).cycles = Some(parse_value(key, value)?);
            }
            "check.seed" => {
                config.check.get_or_insert_with(Default::default).seed = Some(parse_value(key, value)?);
            }
            "check.tolerance" => {
                config.check.get_or_insert_with(Default::default).tolerance =
                    Some(parse_value(key, value)?);
            }
            _ => {
                return Err(CliError::Config(format!(
                    "Unsupported configuration key for --set: '{}'",
                    key
                )));
            }
        }
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Commands};
    use clap::Parser;
    use std::fs;
    use std::path::{Path, PathBuf};
    use tempfile::tempdir;

    fn input_args(extra: &[&str]) -> InputArgs {
        let mut args = vec!["treelik", "evaluate", "-t", "tree.nwk", "-a", "data.fasta"];
        args.extend_from_slice(extra);
        match Cli::parse_from(args).command {
            Commands::Evaluate(evaluate) => evaluate.input,
            _ => panic!("Expected 'evaluate' subcommand"),
        }
    }

    fn write_config(dir: &Path, content: &str) -> PathBuf {
        let path = dir.join("treelik.toml");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn defaults_apply_without_a_config_file() {
        let config = build_config(&input_args(&[])).unwrap();
        assert_eq!(config.data_type, DataType::Nucleotide);
        assert_eq!(
            config.model,
            ModelSpec::Hky {
                kappa: 2.0,
                frequencies: vec![0.25; 4]
            }
        );
        assert_eq!(config.likelihood.rescaling_scheme, RescalingScheme::Default);
        assert!(config.likelihood.delay_rescaling_until_underflow);
        assert_eq!(config.check.cycles, 100);
        assert_eq!(config.alignment_paths, vec![PathBuf::from("data.fasta")]);
    }

    #[test]
    fn file_values_are_loaded() {
        let dir = tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"
            [model]
            type = "gtr"
            rates = [1.0, 4.0, 0.5, 1.0, 4.0, 1.0]
            frequencies = [0.3, 0.2, 0.2, 0.3]

            [site-rates]
            rates = [0.5, 1.5]

            [engine]
            rescaling-scheme = "always"
            rescaling-frequency = 25
            preferred-flags = ["PROCESSOR_CPU|PRECISION_DOUBLE", "SCALING_AUTO"]

            [check]
            cycles = 12
            "#,
        );
        let config = build_config(&input_args(&["-c", path.to_str().unwrap()])).unwrap();
        assert!(matches!(config.model, ModelSpec::Gtr { rates, .. } if rates[1] == 4.0));
        assert_eq!(config.site_rates.rates, vec![0.5, 1.5]);
        assert_eq!(config.likelihood.rescaling_scheme, RescalingScheme::Always);
        assert_eq!(config.likelihood.rescaling_frequency, 25);
        assert_eq!(
            config.likelihood.preferred_flags,
            vec![
                EngineFlags::PROCESSOR_CPU | EngineFlags::PRECISION_DOUBLE,
                EngineFlags::SCALING_AUTO
            ]
        );
        assert_eq!(config.check.cycles, 12);
    }

    #[test]
    fn cli_arguments_override_file_values() {
        let dir = tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"
            [model]
            type = "hky"
            kappa = 3.0

            [engine]
            rescaling-scheme = "always"
            delay-rescaling = true
            "#,
        );
        let config = build_config(&input_args(&[
            "-c",
            path.to_str().unwrap(),
            "--kappa",
            "7.5",
            "-r",
            "dynamic",
            "--no-delay",
        ]))
        .unwrap();
        assert!(matches!(config.model, ModelSpec::Hky { kappa, .. } if kappa == 7.5));
        assert_eq!(config.likelihood.rescaling_scheme, RescalingScheme::Dynamic);
        assert!(!config.likelihood.delay_rescaling_until_underflow);
    }

    #[test]
    fn set_values_override_file_values() {
        let args = input_args(&["-S", "engine.rescaling-frequency=10", "-S", "model.type=jc"]);
        let config = build_config(&args).unwrap();
        assert_eq!(config.likelihood.rescaling_frequency, 10);
        assert_eq!(config.model, ModelSpec::JukesCantor);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = tempdir().unwrap();
        let path = write_config(dir.path(), "[engine]\nrescale = true\n");
        let result = build_config(&input_args(&["-c", path.to_str().unwrap()]));
        assert!(matches!(result, Err(CliError::FileParsing { .. })));

        let result = build_config(&input_args(&["-S", "engine.turbo=1"]));
        assert!(matches!(result, Err(CliError::Config(_))));
    }

    #[test]
    fn invalid_values_are_reported() {
        assert!(matches!(
            build_config(&input_args(&["-r", "sometimes"])),
            Err(CliError::Config(_))
        ));
        assert!(matches!(
            build_config(&input_args(&["-m", "f81"])),
            Err(CliError::Config(_))
        ));
        assert!(matches!(
            build_config(&input_args(&["-S", "check.cycles=many"])),
            Err(CliError::Config(_))
        ));
    }

    #[test]
    fn flag_entries_reject_unknown_names() {
        assert!(parse_flag_entries(&["PROCESSOR_CPU|WARP_DRIVE".to_string()]).is_err());
        assert_eq!(
            parse_flag_entries(&["scaling_manual".to_string()]).unwrap(),
            vec![EngineFlags::SCALING_MANUAL]
        );
    }
}
