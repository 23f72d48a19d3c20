//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Coverage-gated build runner
#[derive(Parser, Debug)]
#[command(name = "coverage-gate")]
#[command(version)]
#[command(about = "Run tests under coverage instrumentation and fail the build below a minimum")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file (defaults to ./coverage-gate.yaml and friends)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Configuration profile to apply
    #[arg(short = 'P', long, global = true)]
    pub profile: Option<String>,

    /// Build directory for execution data and reports
    #[arg(long, global = true)]
    pub build_dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run tests, write reports, enforce the gate, then run the post-gate step
    Check(CheckArgs),

    /// Run tests and write reports without enforcing the gate
    Test(TestArgs),

    /// Render reports from the last test run
    Report(ReportArgs),

    /// Enforce the gate against the last test run
    Verify(VerifyArgs),

    /// List configured tests
    List(ListArgs),

    /// Manage configuration files
    Config(ConfigArgs),
}

/// Arguments for check command
#[derive(Parser, Debug)]
pub struct CheckArgs {
    /// Project line coverage minimum (0.80 or 80%)
    #[arg(short, long)]
    pub threshold: Option<String>,

    /// Run tests in parallel
    #[arg(short, long)]
    pub parallel: bool,

    /// Number of concurrent tests (when parallel)
    #[arg(short = 'j', long)]
    pub concurrent: Option<usize>,

    /// Output format (table, json, json-pretty, summary)
    #[arg(short, long)]
    pub format: Option<String>,
}

/// Arguments for test command
#[derive(Parser, Debug)]
pub struct TestArgs {
    /// Run tests in parallel
    #[arg(short, long)]
    pub parallel: bool,

    /// Number of concurrent tests (when parallel)
    #[arg(short = 'j', long)]
    pub concurrent: Option<usize>,

    /// Output format (table, json, json-pretty, summary)
    #[arg(short, long)]
    pub format: Option<String>,
}

/// Arguments for report command
#[derive(Parser, Debug)]
pub struct ReportArgs {
    /// Output format (table, json, json-pretty, summary)
    #[arg(short, long)]
    pub format: Option<String>,
}

/// Arguments for verify command
#[derive(Parser, Debug)]
pub struct VerifyArgs {
    /// Project line coverage minimum (0.80 or 80%)
    #[arg(short, long)]
    pub threshold: Option<String>,

    /// Output format (table, json, json-pretty, summary)
    #[arg(short, long)]
    pub format: Option<String>,
}

/// Arguments for list command
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Show commands, timeouts and environment
    #[arg(short, long)]
    pub detailed: bool,
}

/// Arguments for config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write an example configuration file
    Init {
        /// Output path
        #[arg(short, long, default_value = "coverage-gate.yaml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the resolved configuration
    Show {
        /// Show environment variable overrides instead
        #[arg(long)]
        env: bool,

        /// Output format (yaml, json)
        #[arg(short, long, default_value = "yaml")]
        format: String,
    },

    /// Validate a configuration file
    Validate {
        /// File to validate (defaults to the discovered config file)
        file: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parsing() {
        let args = Args::parse_from(["coverage-gate", "list", "--detailed"]);
        match args.command {
            Command::List(list_args) => {
                assert!(list_args.detailed);
            }
            _ => panic!("Expected List command"),
        }
    }

    #[test]
    fn test_check_args() {
        let args = Args::parse_from([
            "coverage-gate",
            "check",
            "--threshold",
            "85%",
            "--parallel",
            "--concurrent",
            "8",
            "--profile",
            "release",
        ]);
        assert_eq!(args.profile.as_deref(), Some("release"));
        match args.command {
            Command::Check(check) => {
                assert_eq!(check.threshold.as_deref(), Some("85%"));
                assert!(check.parallel);
                assert_eq!(check.concurrent, Some(8));
                assert!(check.format.is_none());
            }
            _ => panic!("Expected Check command"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = Args::parse_from([
            "coverage-gate",
            "verify",
            "--build-dir",
            "target/cov",
            "-v",
            "-c",
            "ci.yaml",
        ]);
        assert!(args.verbose);
        assert_eq!(args.build_dir, Some(PathBuf::from("target/cov")));
        assert_eq!(args.config, Some(PathBuf::from("ci.yaml")));
        assert!(matches!(args.command, Command::Verify(_)));
    }

    #[test]
    fn test_config_init_defaults() {
        let args = Args::parse_from(["coverage-gate", "config", "init"]);
        match args.command {
            Command::Config(ConfigArgs {
                action: ConfigAction::Init { output, force },
            }) => {
                assert_eq!(output, PathBuf::from("coverage-gate.yaml"));
                assert!(!force);
            }
            _ => panic!("Expected Config Init command"),
        }
    }
}
