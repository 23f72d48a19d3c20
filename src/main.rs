//! coverage-gate - coverage-gated build runner
//!
//! Runs the configured test commands under coverage instrumentation, merges
//! the LCOV tracefiles they produce into one report, and fails the build when
//! coverage falls below the configured minimum.
//!
//! ## Usage
//!
//! ```bash
//! # Write an example configuration
//! coverage-gate config init
//!
//! # Full build: tests, reports, gate, post-gate step
//! coverage-gate check --threshold 0.85
//!
//! # Gate the last test run again without re-running tests
//! coverage-gate verify
//! ```
//!
//! Exit status: 0 success, 1 test failures, 2 gate violation, 3 both,
//! 4 post-gate step failed.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

mod cli;
mod config;
mod coverage;
mod executor;
mod models;
mod output;
mod pipeline;
mod results;
mod utils;

use cli::{Args, Command};
use config::{print_env_help, ConfigFile, EnvConfig, GateConfig};
use models::Ratio;
use output::{OutputFormat, ResultFormatter};
use pipeline::{BuildResult, Pipeline};
use utils::{init_logger, LogLevel};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let env = EnvConfig::load();
    let level = match env.log_level()? {
        Some(level) if !args.verbose => level,
        _ => LogLevel::from_verbose(args.verbose || env.verbose.unwrap_or(false)),
    };
    init_logger(level);

    let code = match &args.command {
        Command::Check(check) => {
            let config = resolve_config(&args, &env, |config| {
                apply_threshold(config, check.threshold.as_deref())?;
                apply_runner_flags(config, check.parallel, check.concurrent);
                Ok(())
            })?;
            let format = output_format(check.format.as_deref(), &env)?;
            warn_if_no_tests(&config);
            let build = Pipeline::new(config).check().await?;
            print_build(&build, format)
        }
        Command::Test(test) => {
            let config = resolve_config(&args, &env, |config| {
                apply_runner_flags(config, test.parallel, test.concurrent);
                Ok(())
            })?;
            let format = output_format(test.format.as_deref(), &env)?;
            warn_if_no_tests(&config);
            let build = Pipeline::new(config).test().await?;
            print_build(&build, format)
        }
        Command::Report(report) => {
            let config = resolve_config(&args, &env, |_| Ok(()))?;
            let format = output_format(report.format.as_deref(), &env)?;
            let build = Pipeline::new(config).report()?;
            print_build(&build, format)
        }
        Command::Verify(verify) => {
            let config = resolve_config(&args, &env, |config| {
                apply_threshold(config, verify.threshold.as_deref())
            })?;
            let format = output_format(verify.format.as_deref(), &env)?;
            let build = Pipeline::new(config).verify()?;
            print_build(&build, format)
        }
        Command::List(list) => {
            let config = resolve_config(&args, &env, |_| Ok(()))?;
            list_tests(&config, list.detailed);
            0
        }
        Command::Config(config_args) => {
            manage_config(&args, &env, &config_args.action)?;
            0
        }
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

/// Layer configuration: defaults, file, profile, environment, then CLI flags
fn resolve_config(
    args: &Args,
    env: &EnvConfig,
    overrides: impl FnOnce(&mut GateConfig) -> Result<()>,
) -> Result<Arc<GateConfig>> {
    let file = match args
        .config
        .clone()
        .or_else(|| env.config_file.as_ref().map(Into::into))
    {
        Some(path) => ConfigFile::load(&path)?,
        None => ConfigFile::load_default()?,
    };

    let profile = args.profile.as_deref().or(env.profile.as_deref());
    let mut config = file.resolve(profile)?;
    env.apply(&mut config)?;
    if let Some(build_dir) = &args.build_dir {
        config.build_dir = build_dir.clone();
    }
    overrides(&mut config)?;

    debug!(
        "Resolved configuration: {} tests, build dir {}",
        config.tests.len(),
        config.build_dir.display()
    );
    Ok(Arc::new(config))
}

fn apply_threshold(config: &mut GateConfig, threshold: Option<&str>) -> Result<()> {
    if let Some(threshold) = threshold {
        let minimum: Ratio = threshold
            .parse()
            .with_context(|| format!("Invalid --threshold '{threshold}'"))?;
        config.gate.set_threshold(minimum);
    }
    Ok(())
}

fn apply_runner_flags(config: &mut GateConfig, parallel: bool, concurrent: Option<usize>) {
    if parallel {
        config.runner.parallel = true;
    }
    if let Some(concurrent) = concurrent {
        config.runner.max_concurrent = concurrent.max(1);
    }
}

fn output_format(flag: Option<&str>, env: &EnvConfig) -> Result<OutputFormat> {
    match flag.or(env.format.as_deref()) {
        Some(name) => OutputFormat::from_str(name)
            .ok_or_else(|| anyhow::anyhow!("Unknown output format: {name}")),
        None => Ok(OutputFormat::Table),
    }
}

fn warn_if_no_tests(config: &GateConfig) {
    if config.tests.is_empty() {
        warn!("No tests configured; coverage will be empty");
    }
}

fn print_build(build: &BuildResult, format: OutputFormat) -> i32 {
    let mut formatter = ResultFormatter::new(format);
    if std::env::var_os("NO_COLOR").is_some() || !std::io::stdout().is_terminal() {
        formatter = formatter.no_color();
    }
    println!("{}", formatter.format_build(build));
    build.exit_code()
}

fn list_tests(config: &GateConfig, detailed: bool) {
    println!("\nConfigured Tests ({} total)\n", config.tests.len());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    for (n, test) in config.tests.iter().enumerate() {
        let disabled = if test.enabled { "" } else { " (disabled)" };
        if detailed {
            println!("  {:2}. {}{}", n + 1, test.id, disabled);
            if !test.description.is_empty() {
                println!("      Description: {}", test.description);
            }
            println!("      Command:     {}", test.command_line());
            let timeout = test.timeout_secs.unwrap_or(config.runner.timeout_secs);
            println!("      Timeout:     {timeout}s");
            if let Some(tracefile) = &test.tracefile {
                println!("      Tracefile:   {}", tracefile.display());
            }
            if let Some(dir) = &test.working_dir {
                println!("      Working dir: {}", dir.display());
            }
            for (key, value) in &test.env {
                println!("      Env:         {key}={value}");
            }
            println!();
        } else {
            println!("  {:2}. {:24} {}{}", n + 1, test.id, test.description, disabled);
        }
    }

    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");
    println!("Gate rules:");
    for rule in &config.gate.rules {
        println!("  - {} {} >= {}", rule.scope, rule.counter, rule.minimum);
    }
}

fn manage_config(args: &Args, env: &EnvConfig, action: &cli::ConfigAction) -> Result<()> {
    match action {
        cli::ConfigAction::Init { output, force } => {
            if output.exists() && !force {
                anyhow::bail!(
                    "Configuration file already exists: {}. Use --force to overwrite.",
                    output.display()
                );
            }

            ConfigFile::example().save(output)?;
            println!("✓ Configuration file created: {}", output.display());
            println!("\nEdit the file to describe your test commands.");
        }

        cli::ConfigAction::Show { env: show_env, format } => {
            if *show_env {
                env.print_summary();
                println!();
                print_env_help();
            } else {
                let config = resolve_config(args, env, |_| Ok(()))?;
                let output = if format == "json" {
                    serde_json::to_string_pretty(config.as_ref())?
                } else {
                    serde_yaml::to_string(config.as_ref())?
                };
                println!("{output}");
            }
        }

        cli::ConfigAction::Validate { file } => {
            let path = file
                .clone()
                .or_else(|| args.config.clone())
                .or_else(ConfigFile::find)
                .ok_or_else(|| anyhow::anyhow!("No configuration file found"))?;
            validate_file(&path)?;
        }
    }

    Ok(())
}

fn validate_file(path: &Path) -> Result<()> {
    match ConfigFile::load(path) {
        Ok(config) => {
            println!("✓ Configuration file is valid: {}", path.display());
            println!(
                "  {} tests, {} rules, {} profiles",
                config.settings.tests.len(),
                config.settings.gate.rules.len(),
                config.profiles.len()
            );
            println!("  Profiles: {}", config.available_profiles().join(", "));
            Ok(())
        }
        Err(e) => {
            println!("✗ Configuration file is invalid: {}", path.display());
            println!("  Error: {e:#}");
            Err(e)
        }
    }
}
