// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::config::default_config_path;

/// Command-line arguments for `buildpipe`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "buildpipe",
    version,
    about = "Run build pipelines as dependency graphs with bounded concurrency.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the pipeline file (TOML).
    ///
    /// Default: `Buildpipe.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value_os_t = default_config_path())]
    pub config: PathBuf,

    /// Override `[pipeline].max_concurrency`.
    #[arg(long, value_name = "N")]
    pub max_concurrency: Option<usize>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `BUILDPIPE_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the execution plan, but don't run anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Print the final report as JSON instead of text.
    #[arg(long)]
    pub json: bool,

    /// Run the built-in project build with simulated steps instead of a
    /// pipeline file.
    #[arg(long)]
    pub project: bool,

    /// With `--project`: leave out dependency installation.
    #[arg(long, requires = "project")]
    pub skip_install: bool,

    /// With `--project`: leave out file synchronisation.
    #[arg(long, requires = "project")]
    pub skip_sync: bool,

    /// With `--project`: make this step fail once (repeatable).
    #[arg(long, value_name = "STEP", requires = "project")]
    pub fail_step: Vec<String>,

    /// With `--project`: multiply simulated step durations by this factor.
    #[arg(long, value_name = "FACTOR", default_value_t = 0.1)]
    pub time_scale: f64,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let args = CliArgs::parse_from(["buildpipe"]);
        assert_eq!(args.config, default_config_path());
        assert!(!args.project);
        assert!(args.max_concurrency.is_none());
    }

    #[test]
    fn project_flags_require_project() {
        assert!(CliArgs::try_parse_from(["buildpipe", "--skip-install"]).is_err());
        let args = CliArgs::try_parse_from([
            "buildpipe",
            "--project",
            "--fail-step",
            "install-dependencies",
            "--fail-step",
            "sync-project-files",
        ])
        .unwrap();
        assert_eq!(args.fail_step.len(), 2);
    }
}
