// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Command-line arguments for `fraglet`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "fraglet",
    version,
    about = "Run code fragments inside vein containers.",
    long_about = None,
    args_conflicts_with_subcommands = true
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `FRAGLET_CONFIG_PATH`, then `Fraglet.toml` in the current
    /// working directory, then built-in defaults.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `FRAGLET_LOG` or `warn` is used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Vein to run in, optionally with a mode (`python` or `python:main`).
    #[arg(short = 'v', long, value_name = "NAME[:MODE]", conflicts_with = "image")]
    pub vein: Option<String>,

    /// Container image to run in instead of a vein.
    #[arg(short = 'i', long, value_name = "IMAGE")]
    pub image: Option<String>,

    /// In-container path the code is mounted at (default from config).
    #[arg(short = 'p', long, value_name = "PATH")]
    pub fraglet_path: Option<String>,

    /// Execution mode; selects `/fraglet-<MODE>.yml` inside the container.
    #[arg(short = 'm', long, value_name = "MODE")]
    pub mode: Option<String>,

    /// Script file to run; `-` or absent reads the code from stdin.
    #[arg(value_name = "SCRIPT")]
    pub script: Option<String>,

    /// Arguments passed through to the program.
    #[arg(value_name = "ARGS", trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Pull the container images of the named veins.
    Refresh {
        /// Refresh every known vein.
        #[arg(long, conflicts_with = "veins")]
        all: bool,

        #[arg(value_name = "VEIN")]
        veins: Vec<String>,
    },

    /// Print a vein's built-in guide.
    Guide {
        #[arg(short = 'm', long, value_name = "MODE")]
        mode: Option<String>,

        #[arg(value_name = "VEIN")]
        vein: String,
    },
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
